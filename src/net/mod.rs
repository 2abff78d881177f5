//! Networking primitives: client construction, transport errors, the retry
//! executor, and per-domain pacing.
//!
//! Everything above this module speaks in terms of [`FetchError`] and the
//! [`RetryExecutor`]; raw `reqwest` errors never escape it.

mod error;
mod http_client;
mod pacing;
mod retry;

pub use error::FetchError;
pub use http_client::{
    CONNECT_TIMEOUT_SECS, READ_TIMEOUT_SECS, build_http_client, check_status, parse_retry_after,
};
pub use pacing::DomainPacer;
pub use retry::{Attempt, DEFAULT_MAX_RETRIES, RetryExecutor, RetryPolicy};
