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

//! # KS3 transport (`ks3`)
//!
//! This crate implements the request/response transport layer for KS3
//! (Kingsoft Cloud Object Storage) compatible services: canonical request
//! construction, request signing (the header-based V1 scheme and the
//! extended V2 scheme), streaming request bodies with simultaneous MD5 and
//! CRC64 computation, token-bucket transfer throttling, and classification
//! of HTTP responses into typed success/error outcomes with end-to-end
//! integrity verification.
//!
//! The crate deliberately stops at the transport boundary. Retry policy,
//! higher-level resource mapping and endpoint discovery belong to callers;
//! every error is returned exactly once, and response bytes already read
//! from the wire are preserved for inspection.
//!
//! ## Basic usage
//!
//! ```no_run
//! use ks3::ks3::client::{Client, Config};
//! use ks3::ks3::creds::StaticProvider;
//! use ks3::ks3::params::QueryParams;
//! use http::Method;
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = Config::new("https://ks3-cn-beijing.ksyuncs.com");
//!     let provider = StaticProvider::new("my-access-key", "my-secret-key", None);
//!     let client = Client::new(config, Some(provider.into())).unwrap();
//!
//!     let resp = client
//!         .execute(
//!             Method::GET,
//!             Some("my-bucket"),
//!             Some("docs/report.pdf"),
//!             &QueryParams::new(),
//!             None,
//!             None,
//!             0,
//!             None,
//!         )
//!         .await
//!         .expect("request failed");
//!
//!     println!("status: {}", resp.status);
//! }
//! ```

#![allow(clippy::result_large_err)]
#![allow(clippy::too_many_arguments)]
pub mod ks3;
