//! Reliability policy for the HTTP transport.
//!
//! ```text
//! Request → [RetryPolicy (backoff)] → [Transport]
//! ```

pub mod backoff;
pub mod retry;

pub use retry::{default_retryable, RetryConfig, RetryHook, RetryPolicy, RetryPredicate};
