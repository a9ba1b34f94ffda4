use std::time::Instant;

use relay_core::{ModelFamily, RequestId};
use tokio::sync::oneshot;

use crate::identifier::Identifier;

/// What a waiter learns when it stops waiting.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DequeueOutcome {
    /// The dequeue loop picked this request; dispatch now.
    Proceed,
    /// The stall reaper evicted this request; the caller should write a
    /// spoofed terminal error event in the client's dialect.
    Stalled,
}

pub struct QueueEntry {
    pub id: RequestId,
    pub family: ModelFamily,
    pub identifier: Identifier,
    pub enqueue_time: Instant,
    pub retry_count: u32,
    pub(crate) notify: Option<oneshot::Sender<DequeueOutcome>>,
}

impl QueueEntry {
    pub fn waited(&self) -> std::time::Duration {
        self.enqueue_time.elapsed()
    }
}
