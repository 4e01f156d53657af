//! Multi-tenant log delivery worker.
//!
//! Notifications arriving on an SQS queue announce compressed NDJSON log
//! files landing in a central S3 bucket. The worker resolves the owning
//! tenant's delivery configurations, reads and normalizes the file where
//! needed, and fans the contents out to customer-owned destinations
//! (CloudWatch Logs or S3) under assumed-role credentials, with at-least-once
//! semantics and replayable offsets for partial stream failures.

#![deny(unreachable_pub)]

pub mod cli;
pub mod config;
pub mod credentials;
pub mod event;
pub mod fetch;
pub mod metrics;
pub mod notification;
pub mod path;
pub mod sinks;
pub mod tenant;
pub mod worker;

pub use worker::{Worker, WorkerContext};

pub type Error = Box<dyn std::error::Error + Send + Sync + 'static>;
pub type Result<T> = std::result::Result<T, Error>;

/// How the worker loop must react to a failed operation.
///
/// Poison inputs can never succeed and are acknowledged so the queue does not
/// redeliver them forever; retryable failures leave the message in flight for
/// queue redelivery or self-reinjection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Poison,
    Retryable,
}

impl Classification {
    pub const fn is_poison(self) -> bool {
        matches!(self, Classification::Poison)
    }
}
