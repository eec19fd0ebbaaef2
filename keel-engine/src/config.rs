//! Engine configuration

use std::time::Duration;

use serde::Deserialize;

/// Settings for plan and apply runs
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Maximum number of provider operations in flight
    pub parallelism: usize,
    /// Upper bound for a single provider call; 0 means no limit
    pub provider_timeout_ms: u64,
    /// How long apply waits for a held run lock; 0 fails immediately
    pub lock_timeout_ms: u64,
    /// Run lock key, one per state namespace
    pub lock_key: String,
    /// Lock holder description; defaults to user@host
    pub holder: Option<String>,
}

impl EngineConfig {
    pub const DEFAULT_PARALLELISM: usize = 10;
    pub const DEFAULT_PROVIDER_TIMEOUT_MS: u64 = 30 * 60 * 1000;

    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism;
        self
    }

    pub fn with_provider_timeout(mut self, timeout: Duration) -> Self {
        self.provider_timeout_ms = millis(timeout);
        self
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout_ms = millis(timeout);
        self
    }

    pub fn with_lock_key(mut self, key: impl Into<String>) -> Self {
        self.lock_key = key.into();
        self
    }

    pub fn with_holder(mut self, holder: impl Into<String>) -> Self {
        self.holder = Some(holder.into());
        self
    }

    /// Parallelism, never below one
    pub fn parallelism(&self) -> usize {
        self.parallelism.max(1)
    }

    /// `None` when provider calls are unbounded
    pub fn provider_timeout(&self) -> Option<Duration> {
        (self.provider_timeout_ms > 0).then(|| Duration::from_millis(self.provider_timeout_ms))
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    pub fn holder(&self) -> String {
        self.holder.clone().unwrap_or_else(keel_state::lock_owner)
    }
}

/// Sub-millisecond durations round up so a non-zero timeout never becomes 0
fn millis(duration: Duration) -> u64 {
    let ms = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
    if ms == 0 && !duration.is_zero() { 1 } else { ms }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            parallelism: Self::DEFAULT_PARALLELISM,
            provider_timeout_ms: Self::DEFAULT_PROVIDER_TIMEOUT_MS,
            lock_timeout_ms: 0,
            lock_key: "default".to_string(),
            holder: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.parallelism(), 10);
        assert_eq!(config.provider_timeout(), Some(Duration::from_secs(1800)));
        assert_eq!(config.lock_timeout(), Duration::ZERO);
        assert_eq!(config.lock_key, "default");
        assert!(config.holder().contains('@'));
    }

    #[test]
    fn test_partial_deserialize() {
        let config: EngineConfig =
            serde_json::from_str(r#"{"parallelism": 2, "lock_key": "prod"}"#).unwrap();
        assert_eq!(config.parallelism, 2);
        assert_eq!(config.lock_key, "prod");
        assert_eq!(
            config.provider_timeout_ms,
            EngineConfig::DEFAULT_PROVIDER_TIMEOUT_MS
        );
    }

    #[test]
    fn test_zero_parallelism_runs_one_at_a_time() {
        let config = EngineConfig::default().with_parallelism(0);
        assert_eq!(config.parallelism(), 1);
    }

    #[test]
    fn test_sub_second_timeouts_are_kept() {
        let config = EngineConfig::default()
            .with_provider_timeout(Duration::from_millis(500))
            .with_lock_timeout(Duration::from_millis(250));
        assert_eq!(config.provider_timeout(), Some(Duration::from_millis(500)));
        assert_eq!(config.lock_timeout(), Duration::from_millis(250));

        let config = EngineConfig::default().with_provider_timeout(Duration::from_micros(10));
        assert_eq!(config.provider_timeout(), Some(Duration::from_millis(1)));
    }

    #[test]
    fn test_zero_provider_timeout_means_no_limit() {
        let config: EngineConfig =
            serde_json::from_str(r#"{"provider_timeout_ms": 0, "lock_timeout_ms": 1500}"#)
                .unwrap();
        assert_eq!(config.provider_timeout(), None);
        assert_eq!(config.lock_timeout(), Duration::from_millis(1500));
        assert_eq!(
            EngineConfig::default()
                .with_provider_timeout(Duration::ZERO)
                .provider_timeout(),
            None
        );
    }
}
