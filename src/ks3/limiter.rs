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

//! Transfer speed throttling.
//!
//! A token bucket where one token stands for 1024 bytes. The bucket refills
//! at the configured rate (KiB/s), holds at most one second worth of tokens
//! (burst = rate) and starts empty, so the very first chunk already pays
//! for itself.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_stream::stream;
use bytes::Bytes;
use futures_util::{Stream, StreamExt};

/// Bytes represented by a single token.
const PER_TOKEN_SIZE: usize = 1024;

#[derive(Debug)]
struct TokenBucket {
    /// Tokens added per second.
    rate: f64,
    /// Maximum tokens the bucket can hold.
    burst: f64,
    available: f64,
    last: Instant,
}

impl TokenBucket {
    fn new(rate: u32) -> Self {
        TokenBucket {
            rate: rate as f64,
            burst: rate as f64,
            available: 0.0,
            last: Instant::now(),
        }
    }

    /// Takes `tokens` out of the bucket, going negative if it must, and
    /// returns how long the caller has to wait before using them.
    fn reserve(&mut self, tokens: f64) -> Duration {
        let now = Instant::now();
        let refill = now.duration_since(self.last).as_secs_f64() * self.rate;
        self.available = (self.available + refill).min(self.burst);
        self.last = now;
        self.available -= tokens;
        if self.available >= 0.0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(-self.available / self.rate)
        }
    }
}

/// Shared token-bucket limiter. Cloning shares the bucket, so one limiter
/// throttles every transfer it is attached to collectively.
#[derive(Clone, Debug)]
pub struct RateLimiter {
    burst_tokens: usize,
    bucket: Arc<Mutex<TokenBucket>>,
}

impl RateLimiter {
    /// Creates a limiter allowing `speed` KiB per second.
    pub fn new(speed: u32) -> Self {
        RateLimiter {
            burst_tokens: speed as usize,
            bucket: Arc::new(Mutex::new(TokenBucket::new(speed))),
        }
    }

    /// Largest chunk a single reservation may cover.
    pub fn max_chunk(&self) -> usize {
        self.burst_tokens * PER_TOKEN_SIZE
    }

    /// Waits until `len` bytes may pass.
    pub async fn acquire(&self, len: usize) {
        if len == 0 {
            return;
        }
        let tokens = len.div_ceil(PER_TOKEN_SIZE) as f64;
        let delay = {
            let mut bucket = self.bucket.lock().expect("limiter lock poisoned");
            bucket.reserve(tokens)
        };
        if delay > Duration::ZERO {
            async_std::task::sleep(delay).await;
        }
    }
}

/// Wraps a byte stream so that it never exceeds the limiter's rate.
/// Oversized chunks are split so no single reservation outruns the burst.
pub fn throttle<S, E>(body: S, limiter: RateLimiter) -> impl Stream<Item = Result<Bytes, E>>
where
    S: Stream<Item = Result<Bytes, E>>,
{
    stream! {
        futures_util::pin_mut!(body);
        while let Some(item) = body.next().await {
            match item {
                Ok(mut buf) => {
                    while !buf.is_empty() {
                        let n = buf.len().min(limiter.max_chunk());
                        let chunk = buf.split_to(n);
                        limiter.acquire(chunk.len()).await;
                        yield Ok(chunk);
                    }
                }
                Err(e) => yield Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::convert::Infallible;

    #[test]
    fn test_bucket_starts_empty() {
        let mut bucket = TokenBucket::new(100);
        // 10 tokens against an empty bucket at 100 tokens/s is a 100ms wait.
        let delay = bucket.reserve(10.0);
        assert!(delay >= Duration::from_millis(90), "delay = {delay:?}");
        assert!(delay <= Duration::from_millis(110), "delay = {delay:?}");
    }

    #[test]
    fn test_bucket_refill_caps_at_burst() {
        let mut bucket = TokenBucket::new(50);
        bucket.available = 0.0;
        bucket.last = Instant::now() - Duration::from_secs(60);
        // A minute idle must not bank more than one second of tokens.
        assert_eq!(bucket.reserve(50.0), Duration::ZERO);
        let delay = bucket.reserve(50.0);
        assert!(delay > Duration::from_millis(900), "delay = {delay:?}");
    }

    #[test]
    fn test_max_chunk() {
        let limiter = RateLimiter::new(8);
        assert_eq!(limiter.max_chunk(), 8 * 1024);
    }

    #[tokio::test]
    async fn test_throttle_splits_chunks() {
        // Rate high enough that delays stay tiny for the test payload.
        let limiter = RateLimiter::new(4096);
        let payload = Bytes::from(vec![7u8; 10 * 1024 * 1024]);
        let source =
            futures_util::stream::iter(vec![Ok::<_, Infallible>(payload.clone())]);
        let throttled = throttle(source, limiter.clone());
        futures_util::pin_mut!(throttled);

        let mut total = 0usize;
        while let Some(chunk) = throttled.next().await {
            let chunk = chunk.unwrap();
            assert!(chunk.len() <= limiter.max_chunk());
            total += chunk.len();
        }
        assert_eq!(total, payload.len());
    }

    #[tokio::test]
    async fn test_acquire_paces_transfer() {
        // 100 KiB/s; three 10 KiB acquisitions against an empty bucket
        // should take about 300ms.
        let limiter = RateLimiter::new(100);
        let start = Instant::now();
        for _ in 0..3 {
            limiter.acquire(10 * 1024).await;
        }
        assert!(start.elapsed() >= Duration::from_millis(250));
    }
}
