//! Fixed user-agent pool for identity rotation.
//!
//! Upstream mirrors fingerprint and block repetitive clients, so retries
//! re-present themselves as a different browser. The pool is the single source
//! for identity strings: the retry executor draws from it on every retry and
//! holds the drawn identity constant within an attempt.

use rand::seq::SliceRandom;

/// Built-in browser identities, rotated across retries.
const BUILTIN_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) \
     Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) \
     Chrome/119.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) \
     Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) \
     Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:109.0) Gecko/20100101 Firefox/121.0",
];

/// A fixed pool of user-agent strings with an initial pick held for the
/// first attempt of each operation.
#[derive(Debug, Clone)]
pub struct UserAgentPool {
    agents: Vec<String>,
    initial: String,
}

impl UserAgentPool {
    /// Creates a pool from configured agents, falling back to the built-in
    /// set when the list is empty.
    #[must_use]
    pub fn new(agents: Vec<String>) -> Self {
        let agents = if agents.is_empty() {
            BUILTIN_AGENTS.iter().map(ToString::to_string).collect()
        } else {
            agents
        };
        let initial = agents
            .choose(&mut rand::thread_rng())
            .cloned()
            .unwrap_or_default();
        Self { agents, initial }
    }

    /// Creates a pool with the built-in browser identities.
    #[must_use]
    pub fn builtin() -> Self {
        Self::new(Vec::new())
    }

    /// The identity used for first attempts (chosen once per pool).
    #[must_use]
    pub fn initial(&self) -> &str {
        &self.initial
    }

    /// Draws a fresh identity for a retry.
    #[must_use]
    pub fn rotate(&self) -> String {
        self.agents
            .choose(&mut rand::thread_rng())
            .cloned()
            .unwrap_or_else(|| self.initial.clone())
    }

    /// True when `agent` came from this pool.
    #[must_use]
    pub fn contains(&self, agent: &str) -> bool {
        self.agents.iter().any(|candidate| candidate == agent)
    }
}

impl Default for UserAgentPool {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_pool_is_nonempty() {
        let pool = UserAgentPool::builtin();
        assert!(pool.contains(pool.initial()));
    }

    #[test]
    fn test_rotate_stays_within_pool() {
        let pool = UserAgentPool::builtin();
        for _ in 0..20 {
            assert!(pool.contains(&pool.rotate()));
        }
    }

    #[test]
    fn test_custom_agents_are_used() {
        let pool = UserAgentPool::new(vec!["agent-a".to_string(), "agent-b".to_string()]);
        assert!(pool.contains("agent-a"));
        assert!(!pool.contains(BUILTIN_AGENTS[0]));
        assert!(pool.initial() == "agent-a" || pool.initial() == "agent-b");
    }

    #[test]
    fn test_empty_config_falls_back_to_builtin() {
        let pool = UserAgentPool::new(Vec::new());
        assert!(pool.contains(BUILTIN_AGENTS[0]));
    }
}
