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

//! Typed response and post-transfer checks.

use std::pin::Pin;

use bytes::{Bytes, BytesMut};
use futures_util::stream::{Stream, StreamExt};
use http::{HeaderMap, StatusCode};

use crate::ks3::error::{CrcCheckError, Error, UnexpectedStatusCodeError};
use crate::ks3::header_constants::KSS_REQUEST_ID;

pub type ResponseBodyStream = Pin<Box<dyn Stream<Item = Result<Bytes, Error>> + Send>>;

/// Response handed back to the caller. Success statuses hand one back
/// directly, redirect errors carry theirs with the body unread, and other
/// failure statuses surface as errors carrying the body bytes that were
/// read during classification.
pub struct Response {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: ResponseBodyStream,
    /// CRC64 of the request body as computed while sending; 0 when CRC was
    /// disabled or there was no body.
    pub client_crc: u64,
    /// CRC64 reported by the service, absent when the service sent none.
    pub server_crc: Option<u64>,
}

impl std::fmt::Debug for Response {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Response")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .field("client_crc", &self.client_crc)
            .field("server_crc", &self.server_crc)
            .finish_non_exhaustive()
    }
}

impl Response {
    /// Request id echoed by the service, empty when absent.
    pub fn request_id(&self) -> String {
        self.headers
            .get(KSS_REQUEST_ID)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string()
    }

    /// Reads the remaining body into memory.
    pub async fn bytes(mut self) -> Result<Bytes, Error> {
        let mut buf = BytesMut::new();
        while let Some(chunk) = self.body.next().await {
            buf.extend_from_slice(&chunk?);
        }
        Ok(buf.freeze())
    }
}

/// Verifies end-to-end integrity of an upload. Passes when the service did
/// not report a CRC at all.
pub fn check_crc(resp: &Response, operation: &str) -> Result<(), Error> {
    match resp.server_crc {
        None => Ok(()),
        Some(server_crc) if server_crc == resp.client_crc => Ok(()),
        Some(server_crc) => Err(CrcCheckError {
            client_crc: resp.client_crc,
            server_crc,
            operation: operation.to_string(),
            request_id: resp.request_id(),
        }
        .into()),
    }
}

/// Checks the response status against the set of codes the operation
/// considers success.
pub fn check_resp_code(status: StatusCode, allowed: &[u16]) -> Result<(), Error> {
    let got = status.as_u16();
    if allowed.contains(&got) {
        Ok(())
    } else {
        Err(UnexpectedStatusCodeError {
            allowed: allowed.to_vec(),
            got,
        }
        .into())
    }
}
