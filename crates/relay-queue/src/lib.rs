//! The process-wide request queue: admission, FIFO-with-shared-IP-demotion
//! dequeue, a stall reaper, and the heartbeat/wait-estimate arithmetic a
//! streaming connection needs while it waits (§4.4).

pub mod entry;
pub mod estimator;
pub mod heartbeat;
pub mod identifier;
pub mod queue;

pub use entry::{DequeueOutcome, QueueEntry};
pub use estimator::WaitEstimator;
pub use heartbeat::{heartbeat_size_bytes, HeartbeatMonitor, MAX_HEARTBEAT_BYTES, MIN_HEARTBEAT_BYTES};
pub use identifier::Identifier;
pub use queue::{run_dequeue_loop, run_estimator_tick, run_stall_reaper, RequestQueue, MAX_RETRIES};
