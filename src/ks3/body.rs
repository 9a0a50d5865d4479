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

//! Request body preparation.
//!
//! Before a body goes on the wire it may need a `Content-MD5` (which
//! requires a second pass, so non-rewindable sources spill to a temp file),
//! a streaming CRC64 computed while the bytes are sent, progress events,
//! and upload throttling. [`prepare`] assembles that pipeline; the CRC
//! value becomes readable through [`CrcHandle`] once the body has been
//! fully transmitted.

use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{ready, Context, Poll};

use async_std::io::{ReadExt, WriteExt};
use async_stream::{stream, try_stream};
use bytes::{Bytes, BytesMut};
use crc_fast::{CrcAlgorithm, Digest as CrcFastDigest};
use futures_util::stream::{Stream, StreamExt};
use uuid::Uuid;

use crate::ks3::error::Error;
use crate::ks3::limiter::{throttle, RateLimiter};
use crate::ks3::progress::{ProgressEvent, ProgressEventKind, ProgressListener};
use crate::ks3::utils::crc64_combine;

type IoResult<T> = std::result::Result<T, std::io::Error>;
type BodyStream = Pin<Box<dyn Stream<Item = IoResult<Bytes>> + Send>>;

/// Prefix of temp files created while spilling bodies for MD5 computation.
const TEMP_FILE_PREFIX: &str = "ks3-rs-temp-";

const FILE_CHUNK_SIZE: usize = 8192;

// region: Size

#[derive(Debug, Clone, PartialEq, Eq, Copy, Default)]
pub enum Size {
    Known(u64),
    #[default]
    Unknown,
}

impl Size {
    pub fn is_known(&self) -> bool {
        matches!(self, Size::Known(_))
    }

    /// Returns the size if known, otherwise returns `None`.
    pub fn value(&self) -> Option<u64> {
        match self {
            Size::Known(v) => Some(*v),
            Size::Unknown => None,
        }
    }
}

impl From<Option<u64>> for Size {
    fn from(value: Option<u64>) -> Self {
        match value {
            Some(v) => Size::Known(v),
            None => Size::Unknown,
        }
    }
}

impl From<u64> for Size {
    fn from(value: u64) -> Self {
        Size::Known(value)
    }
}

// endregion: Size

/// Request body that can be sent by the transport.
///
/// Can be constructed from a stream of `Bytes`, a file path, or in-memory
/// bytes.
pub struct RequestBody(Inner);

enum Inner {
    Stream(BodyStream, Size),
    FilePath(PathBuf),
    Bytes(Bytes),
}

impl From<Bytes> for RequestBody {
    fn from(value: Bytes) -> Self {
        RequestBody(Inner::Bytes(value))
    }
}

impl From<Vec<u8>> for RequestBody {
    fn from(value: Vec<u8>) -> Self {
        RequestBody(Inner::Bytes(Bytes::from(value)))
    }
}

impl From<String> for RequestBody {
    fn from(value: String) -> Self {
        RequestBody(Inner::Bytes(Bytes::from(value)))
    }
}

impl From<&'static str> for RequestBody {
    fn from(value: &'static str) -> Self {
        RequestBody(Inner::Bytes(Bytes::from(value)))
    }
}

impl From<&Path> for RequestBody {
    fn from(value: &Path) -> Self {
        RequestBody(Inner::FilePath(value.to_path_buf()))
    }
}

impl From<PathBuf> for RequestBody {
    fn from(value: PathBuf) -> Self {
        RequestBody(Inner::FilePath(value))
    }
}

impl RequestBody {
    /// Create a new `RequestBody` from a stream of `Bytes`.
    pub fn new_from_stream(
        r: impl Stream<Item = IoResult<Bytes>> + Send + 'static,
        size: impl Into<Size>,
    ) -> Self {
        RequestBody(Inner::Stream(Box::pin(r), size.into()))
    }
}

/// Removes the spill file when the sending stream is dropped, on success,
/// failure and cancellation alike.
struct SpillGuard {
    path: PathBuf,
}

impl Drop for SpillGuard {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

/// Shared cell through which the streaming CRC value is published after
/// the body has been fully read.
#[derive(Clone, Debug, Default)]
pub struct CrcHandle(Arc<AtomicU64>);

impl CrcHandle {
    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Acquire)
    }

    fn set(&self, value: u64) {
        self.0.store(value, Ordering::Release);
    }
}

/// Feeds every chunk through a CRC64 digest on the way to the wire and
/// publishes the (seed-combined) value when the source is exhausted.
struct CrcTeeStream {
    inner: BodyStream,
    digest: Option<CrcFastDigest>,
    init_crc: u64,
    len: u64,
    out: CrcHandle,
}

impl CrcTeeStream {
    fn new(inner: BodyStream, init_crc: u64, out: CrcHandle) -> Self {
        CrcTeeStream {
            inner,
            digest: Some(CrcFastDigest::new(CrcAlgorithm::Crc64Xz)),
            init_crc,
            len: 0,
            out,
        }
    }
}

impl Stream for CrcTeeStream {
    type Item = IoResult<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        match ready!(this.inner.as_mut().poll_next(cx)) {
            Some(Ok(chunk)) => {
                if let Some(digest) = this.digest.as_mut() {
                    digest.update(&chunk);
                }
                this.len += chunk.len() as u64;
                Poll::Ready(Some(Ok(chunk)))
            }
            Some(Err(e)) => Poll::Ready(Some(Err(e))),
            None => {
                if let Some(digest) = this.digest.take() {
                    let mut crc = digest.finalize();
                    if this.init_crc != 0 {
                        crc = crc64_combine(this.init_crc, crc, this.len);
                    }
                    this.out.set(crc);
                }
                Poll::Ready(None)
            }
        }
    }
}

/// Knobs the transport passes down from its configuration.
#[derive(Clone, Copy, Debug)]
pub struct BodyOptions {
    pub enable_md5: bool,
    pub md5_threshold: u64,
    pub enable_crc: bool,
    pub init_crc: u64,
}

/// The body after pipeline assembly, ready to attach to a request.
pub struct PreparedBody {
    pub body: Option<reqwest::Body>,
    pub size: Size,
    pub content_md5: Option<String>,
    pub client_crc: CrcHandle,
    /// Bytes handed to the wire so far, shared with the progress events.
    pub transferred: Arc<AtomicU64>,
}

impl PreparedBody {
    fn empty() -> Self {
        PreparedBody {
            body: None,
            size: Size::Known(0),
            content_md5: None,
            client_crc: CrcHandle::default(),
            transferred: Arc::new(AtomicU64::new(0)),
        }
    }
}

enum Source {
    Mem(Bytes),
    File(PathBuf, u64, Option<SpillGuard>),
    Stream(BodyStream, Size),
}

/// Assembles the sending pipeline for `body`.
///
/// MD5 first (buffer or spill), then the CRC tee, then progress counting,
/// with the upload limiter outermost so throttling covers exactly the
/// bytes that reach the wire.
pub async fn prepare(
    body: Option<RequestBody>,
    opts: &BodyOptions,
    listener: Option<Arc<dyn ProgressListener>>,
    limiter: Option<RateLimiter>,
) -> Result<PreparedBody, Error> {
    let Some(body) = body else {
        return Ok(PreparedBody::empty());
    };

    let mut source = match body.0 {
        Inner::Bytes(b) => Source::Mem(b),
        Inner::FilePath(path) => {
            let len = async_std::fs::metadata(&path).await?.len();
            Source::File(path, len, None)
        }
        Inner::Stream(s, size) => Source::Stream(s, size),
    };

    let mut content_md5 = None;
    if opts.enable_md5 {
        let (s, md5) = compute_md5(source, opts.md5_threshold).await?;
        source = s;
        content_md5 = Some(md5);
    }

    let size = match &source {
        Source::Mem(b) => Size::Known(b.len() as u64),
        Source::File(_, len, _) => Size::Known(*len),
        Source::Stream(_, size) => *size,
    };
    if size == Size::Known(0) {
        let mut prepared = PreparedBody::empty();
        prepared.content_md5 = content_md5;
        return Ok(prepared);
    }

    let client_crc = CrcHandle::default();
    let transferred = Arc::new(AtomicU64::new(0));

    // Plain in-memory bodies with nothing to observe go out sized; every
    // wrapped body is sent chunked.
    if let Source::Mem(b) = &source {
        if !opts.enable_crc && listener.is_none() && limiter.is_none() {
            return Ok(PreparedBody {
                body: Some(reqwest::Body::from(b.clone())),
                size,
                content_md5,
                client_crc,
                transferred,
            });
        }
    }

    let mut stream: BodyStream = match source {
        Source::Mem(b) => Box::pin(futures_util::stream::iter([Ok::<_, std::io::Error>(b)])),
        Source::File(path, _, guard) => Box::pin(try_stream! {
            let _guard = guard;
            let mut file = async_std::fs::File::open(&path).await?;
            let mut buf = vec![0u8; FILE_CHUNK_SIZE];
            loop {
                let n = file.read(&mut buf).await?;
                if n == 0 {
                    break;
                }
                yield Bytes::copy_from_slice(&buf[..n]);
            }
        }),
        Source::Stream(s, _) => s,
    };

    if opts.enable_crc {
        stream = Box::pin(CrcTeeStream::new(stream, opts.init_crc, client_crc.clone()));
    }

    {
        let counter = Arc::clone(&transferred);
        let total = size.value().unwrap_or(0);
        stream = Box::pin(stream! {
            let mut inner = stream;
            while let Some(item) = inner.next().await {
                match item {
                    Ok(chunk) => {
                        let n = chunk.len() as u64;
                        let consumed = counter.fetch_add(n, Ordering::Relaxed) + n;
                        if let Some(listener) = &listener {
                            listener.progress_changed(&ProgressEvent::new(
                                ProgressEventKind::Transferred,
                                consumed,
                                total,
                                n,
                            ));
                        }
                        yield Ok(chunk);
                    }
                    Err(e) => yield Err(e),
                }
            }
        });
    }

    // Throttling applies only to bodies whose length is known and positive;
    // a zero length already returned above.
    if let Some(limiter) = limiter {
        if size.is_known() {
            stream = Box::pin(throttle(stream, limiter));
        }
    }

    Ok(PreparedBody {
        body: Some(reqwest::Body::wrap_stream(stream)),
        size,
        content_md5,
        client_crc,
        transferred,
    })
}

/// Computes the base64 `Content-MD5`, spilling non-rewindable sources to a
/// temp file so the bytes can be sent afterwards. Small streams with a
/// known length at or below the threshold are buffered in memory instead.
async fn compute_md5(source: Source, md5_threshold: u64) -> Result<(Source, String), Error> {
    match source {
        Source::Mem(b) => {
            let md5 = crate::ks3::utils::md5sum_hash(&b);
            Ok((Source::Mem(b), md5))
        }
        Source::File(path, len, guard) => {
            let mut file = async_std::fs::File::open(&path).await?;
            let mut ctx = md5::Context::new();
            let mut buf = vec![0u8; FILE_CHUNK_SIZE];
            loop {
                let n = file.read(&mut buf).await?;
                if n == 0 {
                    break;
                }
                ctx.consume(&buf[..n]);
            }
            let md5 = crate::ks3::utils::b64encode(ctx.compute().as_slice());
            Ok((Source::File(path, len, guard), md5))
        }
        Source::Stream(mut s, size) => {
            if let Size::Known(len) = size {
                if len != 0 && len <= md5_threshold {
                    let mut buf = BytesMut::with_capacity(len as usize);
                    while let Some(chunk) = s.next().await {
                        buf.extend_from_slice(&chunk?);
                    }
                    let b = buf.freeze();
                    let md5 = crate::ks3::utils::md5sum_hash(&b);
                    return Ok((Source::Mem(b), md5));
                }
            }
            let (path, len, md5, guard) = spill(s).await?;
            Ok((Source::File(path, len, Some(guard)), md5))
        }
    }
}

/// Writes the stream to a uuid-named file in the OS temp dir, feeding the
/// MD5 digest along the way.
async fn spill(mut s: BodyStream) -> Result<(PathBuf, u64, String, SpillGuard), Error> {
    let path = std::env::temp_dir().join(format!("{TEMP_FILE_PREFIX}{}", Uuid::new_v4()));
    let guard = SpillGuard { path: path.clone() };

    let mut file = async_std::fs::File::create(&path).await?;
    let mut ctx = md5::Context::new();
    let mut len = 0u64;
    while let Some(chunk) = s.next().await {
        let chunk = chunk?;
        ctx.consume(&chunk);
        file.write_all(&chunk).await?;
        len += chunk.len() as u64;
    }
    file.flush().await?;
    let md5 = crate::ks3::utils::b64encode(ctx.compute().as_slice());
    Ok((path, len, md5, guard))
}
