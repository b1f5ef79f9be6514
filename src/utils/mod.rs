//! Shared utilities: retry timing and identifier generation.

pub mod backoff;
pub mod ids;

pub use backoff::{Backoff, BackoffPolicy};
pub use ids::{call_session_id, timestamp_of};
