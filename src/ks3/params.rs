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

//! Query parameters and canonicalization.
//!
//! KS3 signs a "canonical resource" derived from bucket, object key and a
//! subset of the query parameters. Under the V1 scheme only a fixed
//! allow-list of sub-resources participates in signing; under V2 every
//! parameter is signed, percent-escaped. [`QueryParams`] keeps parameters
//! typed through [`SubResource`], with a custom pass-through for anything
//! the service grows later.

use std::collections::BTreeMap;

use crate::ks3::signer::AuthVersion;
use crate::ks3::utils::urlencode;

/// Sub-resources and response-override parameters recognized by the KS3
/// service. This is exactly the set that participates in V1 signing.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub enum SubResource {
    Acl,
    Uploads,
    Location,
    Cors,
    Logging,
    Website,
    Referer,
    Lifecycle,
    Delete,
    Append,
    Tagging,
    ObjectMeta,
    UploadId,
    PartNumber,
    SecurityToken,
    Position,
    Img,
    Style,
    StyleName,
    Replication,
    ReplicationProgress,
    ReplicationLocation,
    Cname,
    BucketInfo,
    Comp,
    Qos,
    Live,
    Status,
    Vod,
    StartTime,
    EndTime,
    Symlink,
    Process,
    ResponseContentType,
    TrafficLimit,
    ResponseContentLanguage,
    ResponseExpires,
    ResponseCacheControl,
    ResponseContentDisposition,
    ResponseContentEncoding,
    Udf,
    UdfName,
    UdfImage,
    UdfId,
    UdfImageDesc,
    UdfApplication,
    UdfApplicationLog,
    Restore,
    Callback,
    CallbackVar,
    QosInfo,
    Policy,
    Stat,
    Encryption,
    Versions,
    Versioning,
    VersionId,
    RequestPayment,
    RequestPayer,
    Sequential,
    Inventory,
    InventoryId,
    ContinuationToken,
    AsyncFetch,
    Worm,
    WormId,
    WormExtend,
    WithHashContext,
    EnableMd5,
    EnableSha1,
    EnableSha256,
    HashCtx,
    Md5Ctx,
    TransferAcceleration,
    RegionList,
}

impl SubResource {
    /// The wire name of the parameter.
    pub fn as_str(&self) -> &'static str {
        match self {
            SubResource::Acl => "acl",
            SubResource::Uploads => "uploads",
            SubResource::Location => "location",
            SubResource::Cors => "cors",
            SubResource::Logging => "logging",
            SubResource::Website => "website",
            SubResource::Referer => "referer",
            SubResource::Lifecycle => "lifecycle",
            SubResource::Delete => "delete",
            SubResource::Append => "append",
            SubResource::Tagging => "tagging",
            SubResource::ObjectMeta => "objectMeta",
            SubResource::UploadId => "uploadId",
            SubResource::PartNumber => "partNumber",
            SubResource::SecurityToken => "security-token",
            SubResource::Position => "position",
            SubResource::Img => "img",
            SubResource::Style => "style",
            SubResource::StyleName => "styleName",
            SubResource::Replication => "replication",
            SubResource::ReplicationProgress => "replicationProgress",
            SubResource::ReplicationLocation => "replicationLocation",
            SubResource::Cname => "cname",
            SubResource::BucketInfo => "bucketInfo",
            SubResource::Comp => "comp",
            SubResource::Qos => "qos",
            SubResource::Live => "live",
            SubResource::Status => "status",
            SubResource::Vod => "vod",
            SubResource::StartTime => "startTime",
            SubResource::EndTime => "endTime",
            SubResource::Symlink => "symlink",
            SubResource::Process => "x-ks3-process",
            SubResource::ResponseContentType => "response-content-type",
            SubResource::TrafficLimit => "x-ks3-traffic-limit",
            SubResource::ResponseContentLanguage => "response-content-language",
            SubResource::ResponseExpires => "response-expires",
            SubResource::ResponseCacheControl => "response-cache-control",
            SubResource::ResponseContentDisposition => "response-content-disposition",
            SubResource::ResponseContentEncoding => "response-content-encoding",
            SubResource::Udf => "udf",
            SubResource::UdfName => "udfName",
            SubResource::UdfImage => "udfImage",
            SubResource::UdfId => "udfId",
            SubResource::UdfImageDesc => "udfImageDesc",
            SubResource::UdfApplication => "udfApplication",
            SubResource::UdfApplicationLog => "udfApplicationLog",
            SubResource::Restore => "restore",
            SubResource::Callback => "callback",
            SubResource::CallbackVar => "callback-var",
            SubResource::QosInfo => "qosInfo",
            SubResource::Policy => "policy",
            SubResource::Stat => "stat",
            SubResource::Encryption => "encryption",
            SubResource::Versions => "versions",
            SubResource::Versioning => "versioning",
            SubResource::VersionId => "versionId",
            SubResource::RequestPayment => "requestPayment",
            SubResource::RequestPayer => "x-ks3-request-payer",
            SubResource::Sequential => "sequential",
            SubResource::Inventory => "inventory",
            SubResource::InventoryId => "inventoryId",
            SubResource::ContinuationToken => "continuation-token",
            SubResource::AsyncFetch => "asyncFetch",
            SubResource::Worm => "worm",
            SubResource::WormId => "wormId",
            SubResource::WormExtend => "wormExtend",
            SubResource::WithHashContext => "withHashContext",
            SubResource::EnableMd5 => "x-ks3-enable-md5",
            SubResource::EnableSha1 => "x-ks3-enable-sha1",
            SubResource::EnableSha256 => "x-ks3-enable-sha256",
            SubResource::HashCtx => "x-ks3-hash-ctx",
            SubResource::Md5Ctx => "x-ks3-md5-ctx",
            SubResource::TransferAcceleration => "transferAcceleration",
            SubResource::RegionList => "regionList",
        }
    }

    /// Reverse lookup; `None` for parameters outside the signing allow-list.
    pub fn from_name(name: &str) -> Option<SubResource> {
        Some(match name {
            "acl" => SubResource::Acl,
            "uploads" => SubResource::Uploads,
            "location" => SubResource::Location,
            "cors" => SubResource::Cors,
            "logging" => SubResource::Logging,
            "website" => SubResource::Website,
            "referer" => SubResource::Referer,
            "lifecycle" => SubResource::Lifecycle,
            "delete" => SubResource::Delete,
            "append" => SubResource::Append,
            "tagging" => SubResource::Tagging,
            "objectMeta" => SubResource::ObjectMeta,
            "uploadId" => SubResource::UploadId,
            "partNumber" => SubResource::PartNumber,
            "security-token" => SubResource::SecurityToken,
            "position" => SubResource::Position,
            "img" => SubResource::Img,
            "style" => SubResource::Style,
            "styleName" => SubResource::StyleName,
            "replication" => SubResource::Replication,
            "replicationProgress" => SubResource::ReplicationProgress,
            "replicationLocation" => SubResource::ReplicationLocation,
            "cname" => SubResource::Cname,
            "bucketInfo" => SubResource::BucketInfo,
            "comp" => SubResource::Comp,
            "qos" => SubResource::Qos,
            "live" => SubResource::Live,
            "status" => SubResource::Status,
            "vod" => SubResource::Vod,
            "startTime" => SubResource::StartTime,
            "endTime" => SubResource::EndTime,
            "symlink" => SubResource::Symlink,
            "x-ks3-process" => SubResource::Process,
            "response-content-type" => SubResource::ResponseContentType,
            "x-ks3-traffic-limit" => SubResource::TrafficLimit,
            "response-content-language" => SubResource::ResponseContentLanguage,
            "response-expires" => SubResource::ResponseExpires,
            "response-cache-control" => SubResource::ResponseCacheControl,
            "response-content-disposition" => SubResource::ResponseContentDisposition,
            "response-content-encoding" => SubResource::ResponseContentEncoding,
            "udf" => SubResource::Udf,
            "udfName" => SubResource::UdfName,
            "udfImage" => SubResource::UdfImage,
            "udfId" => SubResource::UdfId,
            "udfImageDesc" => SubResource::UdfImageDesc,
            "udfApplication" => SubResource::UdfApplication,
            "udfApplicationLog" => SubResource::UdfApplicationLog,
            "restore" => SubResource::Restore,
            "callback" => SubResource::Callback,
            "callback-var" => SubResource::CallbackVar,
            "qosInfo" => SubResource::QosInfo,
            "policy" => SubResource::Policy,
            "stat" => SubResource::Stat,
            "encryption" => SubResource::Encryption,
            "versions" => SubResource::Versions,
            "versioning" => SubResource::Versioning,
            "versionId" => SubResource::VersionId,
            "requestPayment" => SubResource::RequestPayment,
            "x-ks3-request-payer" => SubResource::RequestPayer,
            "sequential" => SubResource::Sequential,
            "inventory" => SubResource::Inventory,
            "inventoryId" => SubResource::InventoryId,
            "continuation-token" => SubResource::ContinuationToken,
            "asyncFetch" => SubResource::AsyncFetch,
            "worm" => SubResource::Worm,
            "wormId" => SubResource::WormId,
            "wormExtend" => SubResource::WormExtend,
            "withHashContext" => SubResource::WithHashContext,
            "x-ks3-enable-md5" => SubResource::EnableMd5,
            "x-ks3-enable-sha1" => SubResource::EnableSha1,
            "x-ks3-enable-sha256" => SubResource::EnableSha256,
            "x-ks3-hash-ctx" => SubResource::HashCtx,
            "x-ks3-md5-ctx" => SubResource::Md5Ctx,
            "transferAcceleration" => SubResource::TransferAcceleration,
            "regionList" => SubResource::RegionList,
            _ => return None,
        })
    }
}

/// Escapes an object key for use in URL paths and V1 canonical resources.
///
/// Percent-escaping first, then the KS3 fixups: spaces become `%20` (never
/// `+`), `*` becomes `%2A`, `~` stays literal, path separators stay literal
/// except that an empty segment and a leading separator are re-escaped so
/// the path structure survives.
pub fn escape_object_key(key: &str) -> String {
    let escaped = urlencode(key).replace("%2F", "/");
    let mut out = escaped.replace("//", "/%2F");
    if let Some(rest) = out.strip_prefix('/') {
        out = format!("%2F{rest}");
    }
    out
}

/// Ordered query-parameter set for a single request.
#[derive(Clone, Debug, Default)]
pub struct QueryParams {
    params: BTreeMap<String, Option<String>>,
}

impl QueryParams {
    pub fn new() -> Self {
        QueryParams::default()
    }

    /// Adds a value-less sub-resource, e.g. `?acl`.
    pub fn add(&mut self, res: SubResource) -> &mut Self {
        self.params.insert(res.as_str().to_string(), None);
        self
    }

    /// Adds a sub-resource with a value, e.g. `?uploadId=xyz`.
    pub fn add_value(&mut self, res: SubResource, value: impl Into<String>) -> &mut Self {
        self.params.insert(res.as_str().to_string(), Some(value.into()));
        self
    }

    /// Pass-through for parameters this library does not know about. Custom
    /// parameters are sent on the wire; under V1 they do not participate in
    /// signing unless their name happens to be in the allow-list.
    pub fn add_custom(
        &mut self,
        key: impl Into<String>,
        value: Option<String>,
    ) -> &mut Self {
        self.params.insert(key.into(), value);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&Option<String>> {
        self.params.get(key)
    }

    /// Serializes every parameter for the request line: keys sorted,
    /// percent-escaped, empty values rendered as a bare key.
    pub fn to_query_string(&self) -> String {
        let mut buf = String::new();
        for (k, v) in &self.params {
            if !buf.is_empty() {
                buf.push('&');
            }
            buf.push_str(&urlencode(k));
            if let Some(v) = v {
                if !v.is_empty() {
                    buf.push('=');
                    buf.push_str(&urlencode(v));
                }
            }
        }
        buf
    }

    /// Serializes the parameters that participate in signing.
    ///
    /// V1 keeps only allow-listed sub-resources, raw. V2 takes every
    /// parameter, percent-escaped, sorted by escaped key.
    pub fn sub_resource_string(&self, auth_version: AuthVersion) -> String {
        let mut pairs: Vec<(String, Option<String>)> = match auth_version {
            AuthVersion::V1 => self
                .params
                .iter()
                .filter(|(k, _)| SubResource::from_name(k).is_some())
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            AuthVersion::V2 => self
                .params
                .iter()
                .map(|(k, v)| {
                    (
                        urlencode(k),
                        v.as_ref().map(|v| urlencode(v)),
                    )
                })
                .collect(),
        };
        pairs.sort();

        let mut buf = String::new();
        for (k, v) in pairs {
            if !buf.is_empty() {
                buf.push('&');
            }
            buf.push_str(&k);
            if let Some(v) = v {
                if !v.is_empty() {
                    buf.push('=');
                    buf.push_str(&v);
                }
            }
        }
        buf
    }

    /// Builds the canonical resource signed into the request.
    pub fn canonical_resource(
        &self,
        bucket: &str,
        object: &str,
        auth_version: AuthVersion,
    ) -> String {
        let sub = self.sub_resource_string(auth_version);
        let sub = if sub.is_empty() {
            String::new()
        } else {
            format!("?{sub}")
        };

        if bucket.is_empty() {
            return match auth_version {
                AuthVersion::V1 => format!("/{sub}"),
                AuthVersion::V2 => format!("{}{sub}", urlencode("/")),
            };
        }
        match auth_version {
            AuthVersion::V1 => format!("/{bucket}/{}{sub}", escape_object_key(object)),
            AuthVersion::V2 => format!(
                "{}{}{sub}",
                urlencode(&format!("/{bucket}/")),
                urlencode(object)
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_object_key() {
        assert_eq!(escape_object_key("report.pdf"), "report.pdf");
        assert_eq!(escape_object_key("a b.txt"), "a%20b.txt");
        assert_eq!(escape_object_key("a+b.txt"), "a%2Bb.txt");
        assert_eq!(escape_object_key("star*tilde~"), "star%2Atilde~");
        assert_eq!(escape_object_key("dir/obj"), "dir/obj");
        assert_eq!(escape_object_key("dir//obj"), "dir/%2Fobj");
        assert_eq!(escape_object_key("/leading"), "%2Fleading");
        assert_eq!(escape_object_key("中文.txt"), "%E4%B8%AD%E6%96%87.txt");
    }

    #[test]
    fn test_sub_resource_roundtrip() {
        assert_eq!(SubResource::UploadId.as_str(), "uploadId");
        assert_eq!(
            SubResource::from_name("uploadId"),
            Some(SubResource::UploadId)
        );
        assert_eq!(SubResource::from_name("prefix"), None);
        assert_eq!(SubResource::from_name("max-keys"), None);
    }

    #[test]
    fn test_to_query_string() {
        let mut params = QueryParams::new();
        params.add(SubResource::Acl);
        params.add_value(SubResource::UploadId, "id with space");
        params.add_custom("prefix", Some("docs/".to_string()));
        assert_eq!(
            params.to_query_string(),
            "acl&prefix=docs%2F&uploadId=id%20with%20space"
        );
    }

    #[test]
    fn test_sub_resource_string_v1_filters() {
        let mut params = QueryParams::new();
        params.add(SubResource::Uploads);
        params.add_value(SubResource::PartNumber, "5");
        params.add_custom("prefix", Some("docs/".to_string()));
        params.add_custom("max-keys", Some("100".to_string()));
        assert_eq!(
            params.sub_resource_string(AuthVersion::V1),
            "partNumber=5&uploads"
        );
    }

    #[test]
    fn test_sub_resource_string_v2_signs_everything() {
        let mut params = QueryParams::new();
        params.add(SubResource::Uploads);
        params.add_custom("prefix", Some("a b".to_string()));
        assert_eq!(
            params.sub_resource_string(AuthVersion::V2),
            "prefix=a%20b&uploads"
        );
    }

    #[test]
    fn test_canonical_resource_v1() {
        let mut params = QueryParams::new();
        params.add(SubResource::Acl);
        assert_eq!(
            params.canonical_resource("my-bucket", "docs/a b.txt", AuthVersion::V1),
            "/my-bucket/docs/a%20b.txt?acl"
        );
        assert_eq!(
            QueryParams::new().canonical_resource("", "", AuthVersion::V1),
            "/"
        );
        assert_eq!(
            QueryParams::new().canonical_resource("my-bucket", "", AuthVersion::V1),
            "/my-bucket/"
        );
    }

    #[test]
    fn test_canonical_resource_v2() {
        let params = QueryParams::new();
        assert_eq!(
            params.canonical_resource("my-bucket", "docs/obj", AuthVersion::V2),
            "%2Fmy-bucket%2Fdocs%2Fobj"
        );
        assert_eq!(params.canonical_resource("", "", AuthVersion::V2), "%2F");
    }
}
