// KS3 Transport Library for Kingsoft Cloud Object Storage
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Various utility and helper functions

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::engine::Engine as _;
use chrono::{DateTime, Datelike, Utc};
use crc_fast::CrcAlgorithm;
use hmac::{Hmac, Mac};
use md5::compute as md5compute;
use multimap::MultiMap;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use sha1::Sha1;
use xmltree::Element;

use crate::ks3::error::Error;

/// Date and time with UTC timezone
pub type UtcTime = DateTime<Utc>;

/// Multimap for string key and string value
pub type Multimap = MultiMap<String, String>;

/// Encodes data using base64 algorithm
pub fn b64encode<T: AsRef<[u8]>>(input: T) -> String {
    BASE64.encode(input)
}

/// Gets base64 encoded MD5 hash of given data
pub fn md5sum_hash(data: &[u8]) -> String {
    b64encode(md5compute(data).as_slice())
}

/// Computes HMAC-SHA1 of `data` keyed with `key`.
pub fn hmac_sha1(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut hasher = Hmac::<Sha1>::new_from_slice(key).expect("HMAC can take keys of any size");
    hasher.update(data);
    hasher.finalize().into_bytes().to_vec()
}

/// CRC-64/ECMA-182 checksum of a complete buffer.
pub fn crc64(data: &[u8]) -> u64 {
    crc_fast::checksum(CrcAlgorithm::Crc64Xz, data)
}

/// Combines two CRC-64/ECMA-182 checksums as if the second buffer (of
/// `len2` bytes) had been appended to the first.
pub fn crc64_combine(crc1: u64, crc2: u64, len2: u64) -> u64 {
    crc_fast::checksum_combine(CrcAlgorithm::Crc64Xz, crc1, crc2, len2)
}

/// Gets current UTC time
pub fn utc_now() -> UtcTime {
    chrono::offset::Utc::now()
}

/// Gets HTTP header value of given time
pub fn to_http_header_value(time: UtcTime) -> String {
    format!(
        "{}, {:02} {} {} GMT",
        time.weekday(),
        time.day(),
        match time.month() {
            1 => "Jan",
            2 => "Feb",
            3 => "Mar",
            4 => "Apr",
            5 => "May",
            6 => "Jun",
            7 => "Jul",
            8 => "Aug",
            9 => "Sep",
            10 => "Oct",
            11 => "Nov",
            12 => "Dec",
            _ => "",
        },
        time.format("%Y %H:%M:%S")
    )
}

// Characters to escape in query strings and object keys. Based on RFC 3986:
// all non-alphanumeric characters are escaped except the unreserved marks
// '-', '_', '.', '~'.
const QUERY_ESCAPE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Percent-escapes `s` with the RFC 3986 query escape set.
pub fn urlencode(s: &str) -> String {
    utf8_percent_encode(s, QUERY_ESCAPE).collect()
}

/// Gets text value of given XML element for given tag.
pub fn get_text(element: &Element, tag: &str) -> Result<String, Error> {
    Ok(element
        .get_child(tag)
        .ok_or(Error::XmlError(format!("<{tag}> tag not found")))?
        .get_text()
        .ok_or(Error::XmlError(format!("text of <{tag}> tag not found")))?
        .to_string())
}

/// Gets default text value of given XML element for given tag.
pub fn get_default_text(element: &Element, tag: &str) -> String {
    element.get_child(tag).map_or(String::new(), |v| {
        v.get_text().unwrap_or_default().to_string()
    })
}
