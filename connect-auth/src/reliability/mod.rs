//! Reliability patterns for host communication.
//!
//! Provides bounded retry with backoff for transient failures when talking to
//! hosts.

mod retry;

pub use retry::{RetryConfig, RetryPolicy, is_retryable, retry_with_backoff};
