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

//! The transport client.
//!
//! One request is one pass through: build the URL and default headers,
//! sign, prepare the body pipeline, send, classify the response. Nothing
//! here retries; callers own that policy.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use futures_util::StreamExt;
use http::{HeaderMap, Method};
use log::debug;

use crate::ks3::body::{prepare, BodyOptions, CrcHandle, RequestBody};
use crate::ks3::creds::Provider;
use crate::ks3::error::{Error, ServiceError};
use crate::ks3::header_constants::{
    AUTHORIZATION, CONTENT_MD5, DATE, HOST, KSS_CHECKSUM_CRC64ECMA, KSS_REQUEST_ID,
    KSS_SECURITY_TOKEN, PARAM_ACCESS_KEY_ID, PARAM_ADDITIONAL_HEADERS_V2, PARAM_EXPIRES,
    PARAM_EXPIRES_V2, PARAM_ACCESS_KEY_ID_V2, PARAM_SIGNATURE, PARAM_SIGNATURE_V2,
    PARAM_SIGNATURE_VERSION_V2, SIGNATURE_VERSION_V2, USER_AGENT,
};
use crate::ks3::http::BaseUrl;
use crate::ks3::limiter::{throttle, RateLimiter};
use crate::ks3::params::{escape_object_key, QueryParams, SubResource};
use crate::ks3::progress::{ProgressEvent, ProgressEventKind, ProgressListener};
use crate::ks3::response::{Response, ResponseBodyStream};
use crate::ks3::signer::{
    additional_headers_present, authorization, header_value, signature, string_to_sign,
    AuthVersion,
};
use crate::ks3::utils::{to_http_header_value, utc_now, Multimap};

/// 16 MiB; larger bodies spill to a temp file during MD5 computation.
const DEFAULT_MD5_THRESHOLD: u64 = 16 * 1024 * 1024;

/// Transport configuration.
#[derive(Clone, Debug)]
pub struct Config {
    pub endpoint: String,
    /// Endpoint is a user domain bound to a single bucket.
    pub is_cname: bool,
    /// Put the bucket in the path instead of the subdomain.
    pub path_style_access: bool,
    pub auth_version: AuthVersion,
    /// Compute `Content-MD5` for request bodies. Off by default.
    pub enable_md5: bool,
    pub md5_threshold: u64,
    /// Compute CRC64 while sending and expose it for verification. On by
    /// default.
    pub enable_crc: bool,
    /// Upload speed cap in KiB/s, 0 for unlimited.
    pub upload_limit_speed: u32,
    /// Download speed cap in KiB/s, 0 for unlimited.
    pub download_limit_speed: u32,
    pub user_agent: String,
    /// Non-`x-kss-` headers to include in V2 signatures.
    pub additional_headers: Vec<String>,
}

impl Config {
    pub fn new(endpoint: &str) -> Config {
        Config {
            endpoint: endpoint.to_string(),
            is_cname: false,
            path_style_access: false,
            auth_version: AuthVersion::V1,
            enable_md5: false,
            md5_threshold: DEFAULT_MD5_THRESHOLD,
            enable_crc: true,
            upload_limit_speed: 0,
            download_limit_speed: 0,
            user_agent: format!("ks3-rs/{}", env!("CARGO_PKG_VERSION")),
            additional_headers: Vec::new(),
        }
    }
}

/// The KS3 transport. Construct once and share; all methods take `&self`.
#[derive(Clone, Debug)]
pub struct Client {
    config: Config,
    base_url: BaseUrl,
    provider: Option<Arc<dyn Provider>>,
    http_client: reqwest::Client,
    upload_limiter: Option<RateLimiter>,
    download_limiter: Option<RateLimiter>,
}

impl Client {
    /// Builds the client, parsing the endpoint and constructing the HTTP
    /// connection pool once. Pass `None` for anonymous access.
    pub fn new(config: Config, provider: Option<Arc<dyn Provider>>) -> Result<Client, Error> {
        let base_url = BaseUrl::new(&config.endpoint, config.is_cname, config.path_style_access)?;
        // KS3 3xx responses are classification input, not something to
        // follow silently.
        let http_client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()?;
        let upload_limiter = match config.upload_limit_speed {
            0 => None,
            speed => Some(RateLimiter::new(speed)),
        };
        let download_limiter = match config.download_limit_speed {
            0 => None,
            speed => Some(RateLimiter::new(speed)),
        };
        Ok(Client {
            config,
            base_url,
            provider,
            http_client,
            upload_limiter,
            download_limiter,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Sends a signed request addressed by bucket and object.
    pub async fn execute(
        &self,
        method: Method,
        bucket: Option<&str>,
        object: Option<&str>,
        params: &QueryParams,
        headers: Option<&Multimap>,
        body: Option<RequestBody>,
        init_crc: u64,
        listener: Option<Arc<dyn ProgressListener>>,
    ) -> Result<Response, Error> {
        let bucket = bucket.unwrap_or_default();
        let object = object.unwrap_or_default();
        let url = self.base_url.make_url(
            bucket,
            &escape_object_key(object),
            &params.to_query_string(),
        );
        let resource = params.canonical_resource(bucket, object, self.config.auth_version);
        self.do_request(
            method,
            &url,
            Some(resource.as_str()),
            headers,
            body,
            init_crc,
            listener,
        )
        .await
    }

    /// Sends a request to an already-signed URL, skipping the signing step.
    pub async fn execute_url(
        &self,
        method: Method,
        signed_url: &str,
        headers: Option<&Multimap>,
        body: Option<RequestBody>,
        init_crc: u64,
        listener: Option<Arc<dyn ProgressListener>>,
    ) -> Result<Response, Error> {
        self.do_request(method, signed_url, None, headers, body, init_crc, listener)
            .await
    }

    /// Produces a pre-signed URL a third party can use until `expires_unix`.
    pub fn presign_url(
        &self,
        method: Method,
        bucket: Option<&str>,
        object: Option<&str>,
        expires_unix: i64,
        params: &QueryParams,
        headers: Option<&Multimap>,
    ) -> Result<String, Error> {
        let provider = self
            .provider
            .as_ref()
            .ok_or_else(|| Error::Credentials("pre-signing requires credentials".to_string()))?;
        let creds = provider.fetch()?;
        let bucket = bucket.unwrap_or_default();
        let object = object.unwrap_or_default();

        let mut params = params.clone();
        if let Some(token) = &creds.session_token {
            params.add_value(SubResource::SecurityToken, token.clone());
        }

        // The Date slot of the string-to-sign carries the expiration.
        let mut hmap = Multimap::new();
        hmap.insert(DATE.to_string(), expires_unix.to_string());
        hmap.insert(USER_AGENT.to_string(), self.config.user_agent.clone());
        if let Some(extra) = headers {
            merge_headers(&mut hmap, extra);
        }

        if self.config.auth_version == AuthVersion::V2 {
            params.add_custom(
                PARAM_SIGNATURE_VERSION_V2,
                Some(SIGNATURE_VERSION_V2.to_string()),
            );
            params.add_custom(PARAM_EXPIRES_V2, Some(expires_unix.to_string()));
            params.add_custom(PARAM_ACCESS_KEY_ID_V2, Some(creds.access_key.clone()));
            let additional = additional_headers_present(&hmap, &self.config.additional_headers);
            if !additional.is_empty() {
                params.add_custom(PARAM_ADDITIONAL_HEADERS_V2, Some(additional.join(";")));
            }
        }

        let resource = params.canonical_resource(bucket, object, self.config.auth_version);
        let sts = string_to_sign(
            &method,
            &hmap,
            &resource,
            self.config.auth_version,
            &self.config.additional_headers,
        );
        let sig = signature(&creds.secret_key, &sts);

        match self.config.auth_version {
            AuthVersion::V1 => {
                params.add_custom(PARAM_EXPIRES, Some(expires_unix.to_string()));
                params.add_custom(PARAM_ACCESS_KEY_ID, Some(creds.access_key.clone()));
                params.add_custom(PARAM_SIGNATURE, Some(sig));
            }
            AuthVersion::V2 => {
                params.add_custom(PARAM_SIGNATURE_V2, Some(sig));
            }
        }

        Ok(self.base_url.make_url(
            bucket,
            &escape_object_key(object),
            &params.to_query_string(),
        ))
    }

    async fn do_request(
        &self,
        method: Method,
        url: &str,
        canonical_resource: Option<&str>,
        headers: Option<&Multimap>,
        body: Option<RequestBody>,
        init_crc: u64,
        listener: Option<Arc<dyn ProgressListener>>,
    ) -> Result<Response, Error> {
        let parsed = reqwest::Url::parse(url).map_err(|e| Error::InvalidUrl(e.to_string()))?;
        let host = match parsed.port() {
            Some(port) => format!("{}:{port}", parsed.host_str().unwrap_or_default()),
            None => parsed.host_str().unwrap_or_default().to_string(),
        };

        // Defaults first so caller headers win.
        let mut hmap = Multimap::new();
        hmap.insert(HOST.to_string(), host.clone());
        hmap.insert(USER_AGENT.to_string(), self.config.user_agent.clone());

        let creds = match (&self.provider, canonical_resource) {
            (Some(provider), Some(_)) => Some(provider.fetch()?),
            _ => None,
        };
        if canonical_resource.is_some() {
            hmap.insert(DATE.to_string(), to_http_header_value(utc_now()));
            if let Some(token) = creds.as_ref().and_then(|c| c.session_token.as_ref()) {
                hmap.insert(KSS_SECURITY_TOKEN.to_string(), token.clone());
            }
        }
        if let Some(extra) = headers {
            merge_headers(&mut hmap, extra);
        }

        let opts = BodyOptions {
            enable_md5: self.config.enable_md5 && header_value(&hmap, CONTENT_MD5).is_empty(),
            md5_threshold: self.config.md5_threshold,
            enable_crc: self.config.enable_crc
                && header_value(&hmap, KSS_CHECKSUM_CRC64ECMA).is_empty(),
            init_crc,
        };
        let upload_limiter =
            if method == Method::GET || method == Method::HEAD || method == Method::DELETE {
                None
            } else {
                self.upload_limiter.clone()
            };
        let prepared = prepare(body, &opts, listener.clone(), upload_limiter).await?;
        if let Some(md5) = &prepared.content_md5 {
            if header_value(&hmap, CONTENT_MD5).is_empty() {
                hmap.insert(CONTENT_MD5.to_string(), md5.clone());
            }
        }

        if let (Some(resource), Some(creds)) = (canonical_resource, &creds) {
            let auth = authorization(
                &method,
                &hmap,
                resource,
                creds,
                self.config.auth_version,
                &self.config.additional_headers,
            );
            hmap.insert(AUTHORIZATION.to_string(), auth);
        }

        let total = prepared.size.value().unwrap_or(0);
        publish(&listener, ProgressEventKind::Started, 0, total, 0);

        debug!(
            "[req] method:{} host:{} path:{} query:{} headers:{:?}",
            method,
            host,
            parsed.path(),
            parsed.query().unwrap_or_default(),
            hmap
        );

        let mut builder = self
            .http_client
            .request(method.clone(), parsed)
            .headers(to_header_map(&hmap)?);
        if let Some(body) = prepared.body {
            builder = builder.body(body);
        }

        let transferred = Arc::clone(&prepared.transferred);
        match builder.send().await {
            Err(e) => {
                publish(
                    &listener,
                    ProgressEventKind::Failed,
                    transferred.load(Ordering::Relaxed),
                    total,
                    0,
                );
                Err(Error::Http(e))
            }
            Ok(resp) => {
                debug!(
                    "[resp] status:{} headers:{:?}",
                    resp.status(),
                    resp.headers()
                );
                publish(
                    &listener,
                    ProgressEventKind::Completed,
                    transferred.load(Ordering::Relaxed),
                    total,
                    0,
                );
                self.handle_response(resp, prepared.client_crc, &method).await
            }
        }
    }

    /// Classifies the raw HTTP response into a typed outcome.
    async fn handle_response(
        &self,
        resp: reqwest::Response,
        client_crc: CrcHandle,
        method: &Method,
    ) -> Result<Response, Error> {
        let status = resp.status();
        let headers = resp.headers().clone();
        let request_id = headers
            .get(KSS_REQUEST_ID)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let client_crc = if self.config.enable_crc {
            client_crc.get()
        } else {
            0
        };
        let server_crc = headers
            .get(KSS_CHECKSUM_CRC64ECMA)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());

        if status.is_success() {
            let mut body: ResponseBodyStream =
                Box::pin(resp.bytes_stream().map(|r| r.map_err(Error::Http)));
            if *method == Method::GET {
                if let Some(limiter) = &self.download_limiter {
                    body = Box::pin(throttle(body, limiter.clone()));
                }
            }
            return Ok(Response {
                status,
                headers,
                body,
                client_crc,
                server_crc,
            });
        }

        if (300..=307).contains(&status.as_u16()) {
            // The full response rides in the error, body unread.
            let body: ResponseBodyStream =
                Box::pin(resp.bytes_stream().map(|r| r.map_err(Error::Http)));
            return Err(Error::Redirect {
                response: Box::new(Response {
                    status,
                    headers,
                    body,
                    client_crc,
                    server_crc,
                }),
            });
        }

        let body_bytes = resp.bytes().await?;
        if !(400..=505).contains(&status.as_u16()) {
            return Err(Error::InvalidResponse {
                status_code: status.as_u16(),
                request_id,
                message: "status code out of range for a service error".to_string(),
            });
        }
        // 4xx/5xx carry an <Error> document when they carry anything at all.
        if body_bytes.is_empty() {
            return Err(ServiceError::from_status(status.as_u16(), &request_id).into());
        }
        match ServiceError::parse_xml(&body_bytes, status.as_u16(), &request_id) {
            Ok(service_err) => Err(service_err.into()),
            Err(parse_err) => Err(parse_err),
        }
    }
}

fn publish(
    listener: &Option<Arc<dyn ProgressListener>>,
    kind: ProgressEventKind,
    consumed: u64,
    total: u64,
    rw: u64,
) {
    if let Some(listener) = listener {
        listener.progress_changed(&ProgressEvent::new(kind, consumed, total, rw));
    }
}

/// Overlays `extra` onto `base`, replacing any default with the same name
/// regardless of case.
fn merge_headers(base: &mut Multimap, extra: &Multimap) {
    for (k, values) in extra.iter_all() {
        let existing: Vec<String> = base
            .keys()
            .filter(|b| b.eq_ignore_ascii_case(k))
            .cloned()
            .collect();
        for name in existing {
            base.remove(&name);
        }
        for v in values {
            base.insert(k.clone(), v.clone());
        }
    }
}

fn to_header_map(hmap: &Multimap) -> Result<HeaderMap, Error> {
    let mut headers = HeaderMap::new();
    for (k, values) in hmap.iter_all() {
        let name = http::header::HeaderName::from_bytes(k.as_bytes())
            .map_err(|e| Error::InvalidHeader(format!("{k}: {e}")))?;
        for v in values {
            let value = http::header::HeaderValue::from_str(v)
                .map_err(|e| Error::InvalidHeader(format!("{k}: {e}")))?;
            headers.append(name.clone(), value);
        }
    }
    Ok(headers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ks3::creds::StaticProvider;

    fn client() -> Client {
        let config = Config::new("http://ks3-cn-beijing.ksyuncs.com");
        let provider = StaticProvider::new("ak", "sk", None);
        Client::new(config, Some(provider.into())).unwrap()
    }

    #[test]
    fn test_config_defaults() {
        let config = Config::new("https://ks3-cn-beijing.ksyuncs.com");
        assert!(!config.enable_md5);
        assert!(config.enable_crc);
        assert_eq!(config.md5_threshold, 16 * 1024 * 1024);
        assert_eq!(config.auth_version, AuthVersion::V1);
        assert!(config.user_agent.starts_with("ks3-rs/"));
    }

    #[test]
    fn test_merge_headers_overrides_case_insensitively() {
        let mut base = Multimap::new();
        base.insert("Date".to_string(), "default".to_string());
        base.insert("Host".to_string(), "default-host".to_string());
        let mut extra = Multimap::new();
        extra.insert("date".to_string(), "caller".to_string());
        merge_headers(&mut base, &extra);
        assert_eq!(header_value(&base, "Date"), "caller");
        assert_eq!(header_value(&base, "Host"), "default-host");
    }

    #[test]
    fn test_presign_v1_url() {
        let url = client()
            .presign_url(
                Method::GET,
                Some("my-bucket"),
                Some("docs/report.pdf"),
                1700000000,
                &QueryParams::new(),
                None,
            )
            .unwrap();
        assert!(url.starts_with("http://my-bucket.ks3-cn-beijing.ksyuncs.com/docs/report.pdf?"));
        assert!(url.contains("Expires=1700000000"));
        assert!(url.contains("KSSAccessKeyId=ak"));
        assert!(url.contains("Signature="));
    }

    #[test]
    fn test_presign_v2_url() {
        let mut config = Config::new("http://ks3-cn-beijing.ksyuncs.com");
        config.auth_version = AuthVersion::V2;
        let provider = StaticProvider::new("ak", "sk", None);
        let client = Client::new(config, Some(provider.into())).unwrap();
        let url = client
            .presign_url(
                Method::GET,
                Some("b"),
                Some("o"),
                1700000000,
                &QueryParams::new(),
                None,
            )
            .unwrap();
        assert!(url.contains("X-Kss-signature-version=KSS2"));
        assert!(url.contains("X-Kss-expires=1700000000"));
        assert!(url.contains("X-Kss-access-key-id=ak"));
        assert!(url.contains("X-Kss-signature="));
    }

    #[test]
    fn test_presign_requires_credentials() {
        let config = Config::new("http://ks3-cn-beijing.ksyuncs.com");
        let client = Client::new(config, None).unwrap();
        assert!(client
            .presign_url(
                Method::GET,
                Some("b"),
                Some("o"),
                1700000000,
                &QueryParams::new(),
                None,
            )
            .is_err());
    }

    #[test]
    fn test_presign_includes_security_token() {
        let config = Config::new("http://ks3-cn-beijing.ksyuncs.com");
        let provider = StaticProvider::new("ak", "sk", Some("tok"));
        let client = Client::new(config, Some(provider.into())).unwrap();
        let url = client
            .presign_url(
                Method::GET,
                Some("b"),
                Some("o"),
                1700000000,
                &QueryParams::new(),
                None,
            )
            .unwrap();
        assert!(url.contains("security-token=tok"));
    }

    #[test]
    fn test_to_header_map_rejects_bad_names() {
        let mut hmap = Multimap::new();
        hmap.insert("bad header".to_string(), "v".to_string());
        assert!(to_header_map(&hmap).is_err());
    }
}
