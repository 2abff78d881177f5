//! Multi-credential rotation with independent health tracking.
//!
//! The pool holds N opaque API credentials, each with its own status machine,
//! cooldown window, and usage statistics. Callers acquire a credential, make
//! their request with no pool lock held, then report the outcome back so the
//! pool can rotate away from rate-limited or rejected credentials.
//!
//! # Example
//!
//! ```
//! use teradl_core::credentials::CredentialPool;
//!
//! let pool = CredentialPool::new(vec!["secret-a".to_string(), "secret-b".to_string()]);
//! let lease = pool.acquire().unwrap();
//! // ... perform the request with lease.secret ...
//! pool.mark_success(&lease.id, std::time::Duration::from_millis(180));
//! ```

mod credential;
mod pool;

pub use credential::{Credential, CredentialSnapshot, CredentialStatus, FailureKind};
pub use pool::{CredentialPool, LeasedCredential, PoolStats};
