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

//! Transfer progress reporting.

/// What happened to the transfer.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProgressEventKind {
    /// The request is about to be sent.
    Started,
    /// A segment of the body was handed to the wire.
    Transferred,
    /// The round-trip finished and a response was received.
    Completed,
    /// The request failed before a response was received.
    Failed,
}

/// A single progress notification.
#[derive(Clone, Copy, Debug)]
pub struct ProgressEvent {
    pub kind: ProgressEventKind,
    /// Bytes transferred so far.
    pub consumed_bytes: u64,
    /// Total body size, 0 when unknown.
    pub total_bytes: u64,
    /// Bytes in this segment; 0 for non-data events.
    pub rw_bytes: u64,
}

impl ProgressEvent {
    pub fn new(kind: ProgressEventKind, consumed: u64, total: u64, rw: u64) -> Self {
        ProgressEvent {
            kind,
            consumed_bytes: consumed,
            total_bytes: total,
            rw_bytes: rw,
        }
    }
}

/// Listener invoked synchronously on the sending task. Implementations must
/// be cheap; a slow listener stalls the transfer.
pub trait ProgressListener: Send + Sync {
    fn progress_changed(&self, event: &ProgressEvent);
}
