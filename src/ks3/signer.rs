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

//! Request signing.
//!
//! KS3 authenticates requests with an HMAC-SHA1 signature over a canonical
//! string-to-sign. The V1 scheme signs `x-kss-*` headers plus an allow-list
//! of sub-resources; the V2 scheme additionally signs caller-nominated
//! headers and every query parameter. V2 is carried for compatibility with
//! newer service deployments and has seen far less production traffic than
//! V1; prefer V1 unless the service demands otherwise.

use std::collections::BTreeMap;

use http::Method;

use crate::ks3::creds::Credentials;
use crate::ks3::header_constants::{CONTENT_MD5, CONTENT_TYPE, DATE, KSS_PREFIX};
use crate::ks3::utils::{b64encode, hmac_sha1, Multimap};

/// Which signing scheme the client speaks.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum AuthVersion {
    #[default]
    V1,
    V2,
}

/// First value of a header, looked up case-insensitively.
pub(crate) fn header_value(headers: &Multimap, name: &str) -> String {
    for (k, v) in headers.iter() {
        if k.eq_ignore_ascii_case(name) {
            return v.clone();
        }
    }
    String::new()
}

/// Returns the caller-nominated additional headers actually present on the
/// request, lowercased and sorted. Only meaningful under V2.
pub fn additional_headers_present(headers: &Multimap, additional: &[String]) -> Vec<String> {
    let mut present: Vec<String> = additional
        .iter()
        .map(|name| name.to_lowercase())
        .filter(|name| !name.starts_with(KSS_PREFIX))
        .filter(|name| headers.iter().any(|(k, _)| k.eq_ignore_ascii_case(name)))
        .collect();
    present.sort();
    present.dedup();
    present
}

/// Assembles the canonical string-to-sign.
pub fn string_to_sign(
    method: &Method,
    headers: &Multimap,
    canonical_resource: &str,
    auth_version: AuthVersion,
    additional: &[String],
) -> String {
    let additional_present = additional_headers_present(headers, additional);

    // Lowercased signed headers, values sorted and comma-joined.
    let mut signed: BTreeMap<String, String> = BTreeMap::new();
    for (k, values) in headers.iter_all() {
        let key = k.to_lowercase();
        let take = key.starts_with(KSS_PREFIX)
            || (auth_version == AuthVersion::V2 && additional_present.contains(&key));
        if take {
            let mut vs = values.clone();
            vs.sort();
            signed.insert(key, vs.join(","));
        }
    }

    let mut buf = format!(
        "{}\n{}\n{}\n{}\n",
        method.as_str(),
        header_value(headers, CONTENT_MD5),
        header_value(headers, CONTENT_TYPE),
        header_value(headers, DATE),
    );
    for (k, v) in &signed {
        buf.push_str(k);
        buf.push(':');
        buf.push_str(v);
        buf.push('\n');
    }
    if auth_version == AuthVersion::V2 && !additional_present.is_empty() {
        buf.push_str(&additional_present.join(";"));
        buf.push('\n');
    }
    buf.push_str(canonical_resource);
    buf
}

/// Base64 HMAC-SHA1 of the string-to-sign.
pub fn signature(secret_key: &str, string_to_sign: &str) -> String {
    b64encode(hmac_sha1(secret_key.as_bytes(), string_to_sign.as_bytes()))
}

/// Computes the `Authorization` header value for the request.
pub fn authorization(
    method: &Method,
    headers: &Multimap,
    canonical_resource: &str,
    creds: &Credentials,
    auth_version: AuthVersion,
    additional: &[String],
) -> String {
    let sts = string_to_sign(method, headers, canonical_resource, auth_version, additional);
    let sig = signature(&creds.secret_key, &sts);
    match auth_version {
        AuthVersion::V1 => format!("KSS {}:{sig}", creds.access_key),
        AuthVersion::V2 => {
            let present = additional_headers_present(headers, additional);
            if present.is_empty() {
                format!("KSS2 AccessKeyId:{},Signature:{sig}", creds.access_key)
            } else {
                format!(
                    "KSS2 AccessKeyId:{},AdditionalHeaders:{},Signature:{sig}",
                    creds.access_key,
                    present.join(";")
                )
            }
        }
    }
}
