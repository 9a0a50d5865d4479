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

//! Error types returned by the transport.
//!
//! Errors surface exactly once; nothing in this crate retries. The caller
//! decides whether a [`ServiceError`] or a transport failure is worth another
//! attempt.

use bytes::Bytes;
use thiserror::Error;

use crate::ks3::response::Response;
use crate::ks3::utils::{get_default_text, get_text};

/// Error response sent by the KS3 service, parsed from an `<Error>` XML
/// body or synthesized from the status line when the body is empty.
#[derive(Clone, Debug, Default, Error)]
#[error("ks3: service returned error: StatusCode={status_code}, ErrorCode={code}, ErrorMessage=\"{message}\", RequestId={request_id}")]
pub struct ServiceError {
    /// Service error code, e.g. `NoSuchKey`.
    pub code: String,
    /// Human readable message from the service.
    pub message: String,
    /// Request id echoed by the service.
    pub request_id: String,
    /// The raw response body, byte for byte, useful when the service
    /// returned more detail than the three standard tags.
    pub raw_message: Bytes,
    /// HTTP status code of the response.
    pub status_code: u16,
}

impl ServiceError {
    /// Parses a `<Error><Code/><Message/><RequestId/></Error>` body.
    pub fn parse_xml(body: &Bytes, status_code: u16, request_id: &str) -> Result<Self, Error> {
        let root = xmltree::Element::parse(body.as_ref()).map_err(|e| Error::InvalidResponse {
            status_code,
            request_id: request_id.to_string(),
            message: e.to_string(),
        })?;
        let code = get_text(&root, "Code").map_err(|_| Error::InvalidResponse {
            status_code,
            request_id: request_id.to_string(),
            message: "<Code> tag not found".to_string(),
        })?;
        let mut err = ServiceError {
            code,
            message: get_default_text(&root, "Message"),
            request_id: get_default_text(&root, "RequestId"),
            raw_message: body.clone(),
            status_code,
        };
        if err.request_id.is_empty() {
            err.request_id = request_id.to_string();
        }
        Ok(err)
    }

    /// Builds the error used when the service sent a failure status with an
    /// empty body.
    pub fn from_status(status_code: u16, request_id: &str) -> Self {
        ServiceError {
            status_code,
            request_id: request_id.to_string(),
            ..Default::default()
        }
    }
}

/// CRC64 mismatch between the locally computed value and the one reported
/// by the service.
#[derive(Clone, Debug, Error)]
#[error("ks3: the crc of {operation} is inconsistent, client {client_crc} but server {server_crc}; request id is {request_id}")]
pub struct CrcCheckError {
    pub client_crc: u64,
    pub server_crc: u64,
    pub operation: String,
    pub request_id: String,
}

/// Status code outside the set the caller declared acceptable.
#[derive(Clone, Debug, Error)]
pub struct UnexpectedStatusCodeError {
    pub allowed: Vec<u16>,
    pub got: u16,
}

impl std::fmt::Display for UnexpectedStatusCodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let allowed = self
            .allowed
            .iter()
            .map(|v| v.to_string())
            .collect::<Vec<_>>()
            .join(" or ");
        let reason = http::StatusCode::from_u16(self.got)
            .ok()
            .and_then(|s| s.canonical_reason())
            .unwrap_or_default();
        if reason.is_empty() {
            write!(
                f,
                "ks3: status code from service response is {}; was expecting {allowed}",
                self.got
            )
        } else {
            write!(
                f,
                "ks3: status code from service response is {} {reason}; was expecting {allowed}",
                self.got
            )
        }
    }
}

/// Error returned by this library.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Service(#[from] ServiceError),

    #[error(transparent)]
    UnexpectedStatusCode(#[from] UnexpectedStatusCodeError),

    #[error(transparent)]
    CrcCheck(#[from] CrcCheckError),

    /// Connection-level failure from the HTTP client, returned unchanged.
    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("invalid url: {0}")]
    InvalidUrl(String),

    #[error("invalid header: {0}")]
    InvalidHeader(String),

    /// The service answered with a redirect status. KS3 does not redirect
    /// in normal operation, so these surface as errors carrying the full
    /// response, its body left unread for the caller to inspect.
    #[error("ks3: service returned {} {}", .response.status.as_u16(), .response.status.canonical_reason().unwrap_or_default())]
    Redirect { response: Box<Response> },

    /// The service answered with a failure status but the body could not
    /// be understood as an `<Error>` document.
    #[error("ks3: service returned invalid response body, status = {status_code}, request id = {request_id}: {message}")]
    InvalidResponse {
        status_code: u16,
        request_id: String,
        message: String,
    },

    #[error("credentials error: {0}")]
    Credentials(String),

    #[error("xml parse error: {0}")]
    XmlError(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_error_display() {
        let err = ServiceError {
            code: "NoSuchKey".to_string(),
            message: "The specified key does not exist.".to_string(),
            request_id: "abc123".to_string(),
            raw_message: Bytes::new(),
            status_code: 404,
        };
        assert_eq!(
            err.to_string(),
            "ks3: service returned error: StatusCode=404, ErrorCode=NoSuchKey, \
             ErrorMessage=\"The specified key does not exist.\", RequestId=abc123"
        );
    }

    #[test]
    fn test_parse_xml() {
        let body = Bytes::from_static(
            b"<?xml version=\"1.0\" encoding=\"UTF-8\"?>\
              <Error><Code>AccessDenied</Code><Message>Access Denied</Message>\
              <RequestId>abc123</RequestId></Error>",
        );
        let err = ServiceError::parse_xml(&body, 403, "").unwrap();
        assert_eq!(err.code, "AccessDenied");
        assert_eq!(err.message, "Access Denied");
        assert_eq!(err.request_id, "abc123");
        assert_eq!(err.status_code, 403);
        // The raw body survives byte for byte.
        assert_eq!(err.raw_message, body);
    }

    #[test]
    fn test_parse_xml_request_id_fallback() {
        let body = Bytes::from_static(b"<Error><Code>Busy</Code></Error>");
        let err = ServiceError::parse_xml(&body, 503, "req-7").unwrap();
        assert_eq!(err.request_id, "req-7");
        assert_eq!(err.message, "");
    }

    #[test]
    fn test_parse_xml_garbage() {
        let body = Bytes::from_static(b"not xml at all");
        let err = ServiceError::parse_xml(&body, 500, "req-9").unwrap_err();
        match err {
            Error::InvalidResponse {
                status_code,
                request_id,
                ..
            } => {
                assert_eq!(status_code, 500);
                assert_eq!(request_id, "req-9");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_unexpected_status_code_display() {
        let err = UnexpectedStatusCodeError {
            allowed: vec![200, 204],
            got: 500,
        };
        assert_eq!(
            err.to_string(),
            "ks3: status code from service response is 500 Internal Server Error; \
             was expecting 200 or 204"
        );
    }

    #[test]
    fn test_unexpected_status_code_display_without_reason() {
        let err = UnexpectedStatusCodeError {
            allowed: vec![200],
            got: 599,
        };
        assert_eq!(
            err.to_string(),
            "ks3: status code from service response is 599; was expecting 200"
        );
    }
}
