//! Individual credential records: status machine, cooldowns, and statistics.

use std::sync::LazyLock;
use std::time::{Duration, Instant};

use regex::Regex;
use serde::Serialize;

/// Cooldown applied when a rate-limit response names no retry window.
pub(super) const DEFAULT_COOLDOWN: Duration = Duration::from_secs(3600);

/// Smoothing factors for the latency moving average.
const LATENCY_KEEP: f64 = 0.7;
const LATENCY_BLEND: f64 = 0.3;

/// Message fragments that indicate rate limiting regardless of status code.
const RATE_LIMIT_KEYWORDS: &[&str] = &[
    "rate limit",
    "rate limited",
    "quota exceeded",
    "too many requests",
    "limit exceeded",
    "throttled",
];

/// Message fragments that indicate the credential itself was rejected.
const AUTH_KEYWORDS: &[&str] = &["unauthorized", "invalid", "forbidden", "access denied"];

/// Cooldown windows spelled out in error message text.
#[allow(clippy::expect_used)]
static RETRY_AFTER_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"retry after (\d+) seconds?",
        r"wait (\d+) seconds?",
        r"try again in (\d+) seconds?",
        r"retry-after[:\s]+(\d+)",
    ]
    .iter()
    .map(|pattern| Regex::new(pattern).expect("retry-after pattern is valid"))
    .collect()
});

/// Health state of one credential.
///
/// Transitions: `Healthy → RateLimited` (cooldown), `RateLimited → Recovering`
/// (cooldown expired, observed at selection time), `Recovering → Healthy`
/// (next success), `* → Invalid` (rejected), `* → Failed` (other errors),
/// `* ↔ Disabled` (operator action).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialStatus {
    Healthy,
    RateLimited,
    Recovering,
    Failed,
    Invalid,
    Disabled,
}

/// How a reported failure was classified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// 429 or a rate-limit keyword; credential cools down.
    RateLimited,
    /// 401/403 or an authorization keyword; credential is dead.
    Unauthorized,
    /// Anything else; counts toward consecutive failures.
    Other,
}

/// Classifies a failure from its message and optional HTTP status.
#[must_use]
pub(super) fn classify_failure(message: &str, status: Option<u16>) -> FailureKind {
    match status {
        Some(429) => return FailureKind::RateLimited,
        Some(401 | 403) => return FailureKind::Unauthorized,
        _ => {}
    }

    let message = message.to_lowercase();
    if RATE_LIMIT_KEYWORDS.iter().any(|kw| message.contains(kw)) {
        FailureKind::RateLimited
    } else if AUTH_KEYWORDS.iter().any(|kw| message.contains(kw)) {
        FailureKind::Unauthorized
    } else {
        FailureKind::Other
    }
}

/// Extracts a cooldown window spelled out in an error message.
#[must_use]
pub(super) fn retry_after_from_message(message: &str) -> Option<Duration> {
    let message = message.to_lowercase();
    RETRY_AFTER_PATTERNS.iter().find_map(|pattern| {
        pattern
            .captures(&message)
            .and_then(|captures| captures[1].parse::<u64>().ok())
            .map(Duration::from_secs)
    })
}

/// One API credential with its health state and usage statistics.
#[derive(Debug, Clone)]
pub struct Credential {
    pub(super) id: String,
    pub(super) secret: String,
    pub(super) status: CredentialStatus,
    pub(super) rate_limited_until: Option<Instant>,
    pub(super) consecutive_failures: u32,
    pub(super) total_requests: u64,
    pub(super) successful_requests: u64,
    pub(super) failed_requests: u64,
    pub(super) rate_limit_count: u64,
    pub(super) average_latency: Option<Duration>,
}

impl Credential {
    pub(super) fn new(id: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            secret: secret.into(),
            status: CredentialStatus::Healthy,
            rate_limited_until: None,
            consecutive_failures: 0,
            total_requests: 0,
            successful_requests: 0,
            failed_requests: 0,
            rate_limit_count: 0,
            average_latency: None,
        }
    }

    /// Whether this credential may be handed out right now.
    ///
    /// A rate-limited credential whose cooldown has expired moves to
    /// `Recovering` as a side effect, mirroring the selection-time check.
    pub(super) fn is_available(&mut self, max_consecutive_failures: u32, now: Instant) -> bool {
        match self.status {
            CredentialStatus::Disabled | CredentialStatus::Invalid => return false,
            CredentialStatus::RateLimited => {
                let expired = self.rate_limited_until.is_none_or(|until| now > until);
                if !expired {
                    return false;
                }
                self.status = CredentialStatus::Recovering;
                self.rate_limited_until = None;
            }
            _ => {}
        }

        self.consecutive_failures < max_consecutive_failures
    }

    /// Records a successful request and the observed latency.
    pub(super) fn record_success(&mut self, latency: Duration) {
        self.successful_requests += 1;
        self.consecutive_failures = 0;

        if self.status == CredentialStatus::Recovering {
            self.status = CredentialStatus::Healthy;
        }

        self.average_latency = Some(match self.average_latency {
            // First observation seeds the average.
            None => latency,
            Some(average) => average.mul_f64(LATENCY_KEEP) + latency.mul_f64(LATENCY_BLEND),
        });
    }

    /// Records a failure of the given kind.
    pub(super) fn record_failure(
        &mut self,
        kind: FailureKind,
        retry_after: Option<Duration>,
        now: Instant,
    ) {
        self.failed_requests += 1;
        self.consecutive_failures += 1;

        match kind {
            FailureKind::RateLimited => {
                self.status = CredentialStatus::RateLimited;
                self.rate_limit_count += 1;
                let cooldown = retry_after.unwrap_or(DEFAULT_COOLDOWN);
                self.rate_limited_until = Some(now + cooldown);
            }
            FailureKind::Unauthorized => {
                self.status = CredentialStatus::Invalid;
            }
            FailureKind::Other => {
                self.status = CredentialStatus::Failed;
            }
        }
    }

    /// Restores the credential to a clean healthy state.
    pub(super) fn reset(&mut self) {
        self.status = CredentialStatus::Healthy;
        self.consecutive_failures = 0;
        self.rate_limited_until = None;
    }

    pub(super) fn snapshot(&self, max_consecutive_failures: u32, now: Instant) -> CredentialSnapshot {
        let available = match self.status {
            CredentialStatus::Disabled | CredentialStatus::Invalid => false,
            CredentialStatus::RateLimited => {
                self.rate_limited_until.is_none_or(|until| now > until)
                    && self.consecutive_failures < max_consecutive_failures
            }
            _ => self.consecutive_failures < max_consecutive_failures,
        };
        let total = self.successful_requests + self.failed_requests;
        #[allow(clippy::cast_precision_loss)]
        let success_rate = if total == 0 {
            100.0
        } else {
            (self.successful_requests as f64 / total as f64) * 100.0
        };

        CredentialSnapshot {
            id: self.id.clone(),
            status: self.status,
            available,
            total_requests: self.total_requests,
            successful_requests: self.successful_requests,
            failed_requests: self.failed_requests,
            rate_limit_count: self.rate_limit_count,
            consecutive_failures: self.consecutive_failures,
            success_rate,
            average_latency_ms: self
                .average_latency
                .map(|latency| latency.as_secs_f64() * 1000.0),
            cooldown_remaining_secs: self
                .rate_limited_until
                .and_then(|until| until.checked_duration_since(now))
                .map(|remaining| remaining.as_secs()),
        }
    }
}

/// Read-only view of one credential's health, safe to expose and serialize.
///
/// The secret value is deliberately absent.
#[derive(Debug, Clone, Serialize)]
pub struct CredentialSnapshot {
    pub id: String,
    pub status: CredentialStatus,
    pub available: bool,
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub rate_limit_count: u64,
    pub consecutive_failures: u32,
    pub success_rate: f64,
    pub average_latency_ms: Option<f64>,
    pub cooldown_remaining_secs: Option<u64>,
}
