//! The rotation pool: ordered credentials behind a single exclusive lock.

use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, info, warn};

use super::credential::{
    Credential, CredentialSnapshot, CredentialStatus, classify_failure, retry_after_from_message,
};

/// A credential becomes unavailable after this many failures in a row.
pub(super) const DEFAULT_MAX_CONSECUTIVE_FAILURES: u32 = 3;

/// A credential handed out for one request.
///
/// Carries a copy of the secret so the caller performs its network I/O with
/// no pool lock held; outcomes are reported back by id.
#[derive(Debug, Clone)]
pub struct LeasedCredential {
    pub id: String,
    pub secret: String,
}

#[derive(Debug)]
struct PoolState {
    credentials: Vec<Credential>,
    cursor: usize,
    rotations: u64,
}

/// Thread-safe pool of rotating credentials.
///
/// All state mutations happen under one `Mutex` held only across in-memory
/// lookups and updates, never across a network call.
#[derive(Debug)]
pub struct CredentialPool {
    state: Mutex<PoolState>,
    max_consecutive_failures: u32,
}

impl CredentialPool {
    /// Creates a pool from opaque secrets; empty secrets are skipped and ids
    /// are assigned in order (`key_1`, `key_2`, …).
    #[must_use]
    pub fn new(secrets: Vec<String>) -> Self {
        Self::with_max_consecutive_failures(secrets, DEFAULT_MAX_CONSECUTIVE_FAILURES)
    }

    /// Creates a pool with a custom consecutive-failure threshold.
    #[must_use]
    pub fn with_max_consecutive_failures(secrets: Vec<String>, threshold: u32) -> Self {
        let credentials: Vec<Credential> = secrets
            .into_iter()
            .filter(|secret| !secret.trim().is_empty())
            .enumerate()
            .map(|(index, secret)| Credential::new(format!("key_{}", index + 1), secret))
            .collect();

        info!(count = credentials.len(), "credential pool initialized");

        Self {
            state: Mutex::new(PoolState {
                credentials,
                cursor: 0,
                rotations: 0,
            }),
            max_consecutive_failures: threshold.max(1),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of credentials in the pool, regardless of health.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().credentials.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().credentials.is_empty()
    }

    /// Hands out the next available credential and advances the cursor past
    /// it, or `None` when a full scan finds nothing usable.
    ///
    /// Selecting a rate-limited credential whose cooldown has expired moves
    /// it to `Recovering` first.
    #[must_use]
    pub fn acquire(&self) -> Option<LeasedCredential> {
        let now = Instant::now();
        let mut state = self.lock();
        let count = state.credentials.len();
        if count == 0 {
            warn!("credential pool is empty");
            return None;
        }

        let start = state.cursor;
        let threshold = self.max_consecutive_failures;
        for offset in 0..count {
            let index = (start + offset) % count;
            if state.credentials[index].is_available(threshold, now) {
                let credential = &mut state.credentials[index];
                credential.total_requests += 1;
                let lease = LeasedCredential {
                    id: credential.id.clone(),
                    secret: credential.secret.clone(),
                };
                if offset > 0 {
                    state.rotations += 1;
                }
                state.cursor = (index + 1) % count;
                debug!(credential = %lease.id, "credential acquired");
                return Some(lease);
            }
        }

        warn!("no available credential after full rotation scan");
        None
    }

    /// Reports a successful request made with `id`.
    pub fn mark_success(&self, id: &str, latency: Duration) {
        let mut state = self.lock();
        if let Some(credential) = state.credentials.iter_mut().find(|c| c.id == id) {
            credential.record_success(latency);
            debug!(
                credential = %id,
                latency_ms = latency.as_millis(),
                "request succeeded"
            );
        }
    }

    /// Reports a failed request made with `id`, classifying the failure from
    /// the upstream message and optional HTTP status.
    ///
    /// Rate limits parse a cooldown window out of the message when present
    /// and otherwise apply the default one-hour window.
    pub fn mark_failure(&self, id: &str, message: &str, status: Option<u16>) {
        let kind = classify_failure(message, status);
        let retry_after = retry_after_from_message(message);
        let now = Instant::now();

        let mut state = self.lock();
        if let Some(credential) = state.credentials.iter_mut().find(|c| c.id == id) {
            credential.record_failure(kind, retry_after, now);
            debug!(
                credential = %id,
                kind = ?kind,
                status = ?status,
                "request failed"
            );
        }
    }

    /// Restores one credential to a clean healthy state.
    pub fn reset(&self, id: &str) -> bool {
        let mut state = self.lock();
        match state.credentials.iter_mut().find(|c| c.id == id) {
            Some(credential) => {
                credential.reset();
                true
            }
            None => false,
        }
    }

    /// Restores every credential to a clean healthy state.
    pub fn reset_all(&self) {
        let mut state = self.lock();
        for credential in &mut state.credentials {
            credential.reset();
        }
        info!("all credentials reset");
    }

    /// Takes a credential out of rotation until re-enabled.
    pub fn disable(&self, id: &str) -> bool {
        self.set_status(id, CredentialStatus::Disabled)
    }

    /// Returns a disabled credential to rotation with a clean slate.
    pub fn enable(&self, id: &str) -> bool {
        let mut state = self.lock();
        match state.credentials.iter_mut().find(|c| c.id == id) {
            Some(credential) => {
                credential.reset();
                true
            }
            None => false,
        }
    }

    /// Adds a credential and returns its assigned id.
    pub fn add(&self, secret: impl Into<String>) -> String {
        let mut state = self.lock();
        let next = state
            .credentials
            .iter()
            .filter_map(|c| c.id.strip_prefix("key_")?.parse::<usize>().ok())
            .max()
            .unwrap_or(0)
            + 1;
        let id = format!("key_{next}");
        state.credentials.push(Credential::new(id.clone(), secret));
        info!(credential = %id, "credential added");
        id
    }

    /// Removes a credential from the pool.
    pub fn remove(&self, id: &str) -> bool {
        let mut state = self.lock();
        let before = state.credentials.len();
        state.credentials.retain(|c| c.id != id);
        let removed = state.credentials.len() != before;
        if removed && state.cursor >= state.credentials.len() {
            state.cursor = 0;
        }
        removed
    }

    /// Health snapshot of one credential.
    #[must_use]
    pub fn status_of(&self, id: &str) -> Option<CredentialSnapshot> {
        let now = Instant::now();
        let state = self.lock();
        state
            .credentials
            .iter()
            .find(|c| c.id == id)
            .map(|c| c.snapshot(self.max_consecutive_failures, now))
    }

    /// Health snapshots of every credential, in pool order.
    #[must_use]
    pub fn snapshots(&self) -> Vec<CredentialSnapshot> {
        let now = Instant::now();
        let state = self.lock();
        state
            .credentials
            .iter()
            .map(|c| c.snapshot(self.max_consecutive_failures, now))
            .collect()
    }

    /// Aggregate pool statistics for operational visibility.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        let now = Instant::now();
        let state = self.lock();

        let mut stats = PoolStats {
            total: state.credentials.len(),
            rotations: state.rotations,
            ..PoolStats::default()
        };
        for credential in &state.credentials {
            let snapshot = credential.snapshot(self.max_consecutive_failures, now);
            if snapshot.available {
                stats.available += 1;
            }
            match snapshot.status {
                CredentialStatus::RateLimited => stats.rate_limited += 1,
                CredentialStatus::Invalid => stats.invalid += 1,
                CredentialStatus::Failed => stats.failed += 1,
                _ => {}
            }
            stats.total_requests += snapshot.total_requests;
            stats.successful_requests += snapshot.successful_requests;
            stats.failed_requests += snapshot.failed_requests;
        }

        let settled = stats.successful_requests + stats.failed_requests;
        #[allow(clippy::cast_precision_loss)]
        if settled > 0 {
            stats.success_rate = (stats.successful_requests as f64 / settled as f64) * 100.0;
        } else {
            stats.success_rate = 100.0;
        }
        stats
    }

    fn set_status(&self, id: &str, status: CredentialStatus) -> bool {
        let mut state = self.lock();
        match state.credentials.iter_mut().find(|c| c.id == id) {
            Some(credential) => {
                credential.status = status;
                true
            }
            None => false,
        }
    }
}

/// Aggregate pool health counters.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PoolStats {
    pub total: usize,
    pub available: usize,
    pub rate_limited: usize,
    pub invalid: usize,
    pub failed: usize,
    pub rotations: u64,
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub success_rate: f64,
}
