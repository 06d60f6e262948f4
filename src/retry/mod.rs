//! Retry with bounded exponential backoff.
//!
//! [`BackoffPolicy`] computes the wait between attempts and
//! [`RetryScheduler`] drives independent jobs until they succeed, are
//! withdrawn, or the scheduler shuts down.

pub mod backoff;
pub mod scheduler;

pub use backoff::BackoffPolicy;
pub use scheduler::{JobHandle, JobId, RetryScheduler};
