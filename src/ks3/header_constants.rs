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

//! Header and query-parameter names used on the KS3 wire protocol.

pub const AUTHORIZATION: &str = "Authorization";
pub const CONTENT_LENGTH: &str = "Content-Length";
pub const CONTENT_MD5: &str = "Content-Md5";
pub const CONTENT_TYPE: &str = "Content-Type";
pub const DATE: &str = "Date";
pub const HOST: &str = "Host";
pub const USER_AGENT: &str = "User-Agent";

/// Prefix of all KS3 business headers. Headers under this prefix are always
/// part of the canonicalized header section of the string-to-sign.
pub const KSS_PREFIX: &str = "x-kss-";

pub const KSS_SECURITY_TOKEN: &str = "X-Kss-Security-Token";
pub const KSS_REQUEST_ID: &str = "X-Kss-Request-Id";
pub const KSS_CHECKSUM_CRC64ECMA: &str = "X-Kss-Checksum-Crc64ecma";
pub const KSS_ACL: &str = "X-Kss-Acl";
pub const KSS_STORAGE_CLASS: &str = "X-Kss-Storage-Class";
pub const KSS_SERVER_SIDE_ENCRYPTION: &str = "X-Kss-Server-Side-Encryption";
pub const KSS_TAGGING: &str = "X-Kss-Tagging";
pub const KSS_COPY_SOURCE: &str = "X-Kss-Copy-Source";
pub const KSS_METADATA_DIRECTIVE: &str = "X-Kss-Metadata-Directive";
pub const KSS_TRAFFIC_LIMIT: &str = "X-Kss-Traffic-Limit";

// Query parameters of the V1 pre-signed URL scheme.
pub const PARAM_EXPIRES: &str = "Expires";
pub const PARAM_ACCESS_KEY_ID: &str = "KSSAccessKeyId";
pub const PARAM_SIGNATURE: &str = "Signature";
pub const PARAM_SECURITY_TOKEN: &str = "security-token";

// Query parameters of the V2 pre-signed URL scheme.
pub const PARAM_SIGNATURE_VERSION_V2: &str = "X-Kss-signature-version";
pub const PARAM_EXPIRES_V2: &str = "X-Kss-expires";
pub const PARAM_ACCESS_KEY_ID_V2: &str = "X-Kss-access-key-id";
pub const PARAM_SIGNATURE_V2: &str = "X-Kss-signature";
pub const PARAM_ADDITIONAL_HEADERS_V2: &str = "X-Kss-additional-headers";

/// Marker value carried by [`PARAM_SIGNATURE_VERSION_V2`].
pub const SIGNATURE_VERSION_V2: &str = "KSS2";
