// Configuration management module
// This file handles loading of router settings from the environment and the
// normalization pass that replaces invalid values with safe defaults.

use anyhow::Result;
use serde::Deserialize;
use std::collections::HashMap;
use tracing::warn;

const MIN_KEY_ROTATION_MS: u64 = 60 * 60 * 1000; // 1 hour floor
const DEFAULT_MIN_HEALTH_SCORE: f64 = 0.7;

/// Chain-selection scoring weights. Must sum to 1; normalized on load.
#[derive(Debug, Clone, Deserialize)]
pub struct SelectionWeights {
    pub fee: f64,
    pub latency: f64,
    pub reliability: f64,
    pub regime: f64,
}

impl Default for SelectionWeights {
    fn default() -> Self {
        Self {
            fee: 0.3,
            latency: 0.25,
            reliability: 0.25,
            regime: 0.2,
        }
    }
}

impl SelectionWeights {
    /// Normalize so the weights sum to 1.0. Non-finite or non-positive
    /// totals fall back to the defaults with a warning.
    pub fn normalize(&mut self) {
        let sum = self.fee + self.latency + self.reliability + self.regime;
        if !sum.is_finite() || sum <= 0.0 {
            warn!(sum, "invalid selection weights; using defaults");
            *self = Self::default();
            return;
        }
        if (sum - 1.0).abs() > 1e-9 {
            warn!(sum, "selection weights do not sum to 1; normalizing");
            self.fee /= sum;
            self.latency /= sum;
            self.reliability /= sum;
            self.regime /= sum;
        }
    }

    pub fn sum(&self) -> f64 {
        self.fee + self.latency + self.reliability + self.regime
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SlashingProtection {
    pub enabled: bool,
    /// Maximum slippage tolerance a request may ask for.
    pub max_slippage: f64,
    /// Maximum consecutive failures per (strategy, chain, market).
    pub max_consecutive_failures: u32,
}

impl Default for SlashingProtection {
    fn default() -> Self {
        Self {
            enabled: true,
            max_slippage: 0.05,
            max_consecutive_failures: 3,
        }
    }
}

/// How signing keys are held. The core only ever sees public addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyStorageMode {
    Memory,
    External,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Preferred chain when deployment bias applies.
    pub default_chain_id: String,
    pub selection_weights: SelectionWeights,
    /// Hard health filter for chain selection, in [0, 1].
    pub min_chain_health_score: f64,
    /// Schedule failover retries automatically on adapter failure.
    pub auto_retry_enabled: bool,
    pub max_retry_attempts: u32,
    pub retry_backoff_base_ms: u64,
    /// Retry queue hard cap; oldest-created entries evicted beyond it.
    pub max_retry_queue_size: usize,
    /// Retry entry TTL in milliseconds.
    pub retry_entry_ttl_ms: u64,
    /// Retry queue sweep interval.
    pub retry_cleanup_interval_ms: u64,
    /// Health cache window for per-chain probes.
    pub health_cache_ms: u64,
    /// Congestion/bridge metric polling interval.
    pub polling_interval_ms: u64,
    /// Default per-execution adapter timeout.
    pub execution_timeout_ms: u64,
    /// Chains eligible for execution at all.
    pub allowed_chains: Vec<String>,
    /// Contract allow-list for edge enforcement (gateway / deployment
    /// tooling). The authorization waterfall runs a fixed check order and
    /// does not consult this list; empty means unrestricted.
    pub allowed_contracts: Vec<String>,
    /// Caller IP allow-list for edge enforcement, same scope as
    /// `allowed_contracts`. Empty means unrestricted.
    pub allowed_ips: Vec<String>,
    /// Per-chain gas/fee ceilings.
    pub max_gas_limits: HashMap<String, f64>,
    /// Per-chain transaction value ceilings.
    pub max_tx_value_limits: HashMap<String, f64>,
    /// Trailing rate-limit window.
    pub rate_limit_window_ms: u64,
    pub rate_limit_max_requests: usize,
    pub key_storage_mode: KeyStorageMode,
    /// Key rotation interval; floored to 1 hour.
    pub key_rotation_interval_ms: u64,
    pub slashing_protection: SlashingProtection,
    /// Executions below this count are ignored by historical selection.
    pub min_executions_for_stats: u64,
    /// Stats older than this are ignored by historical selection.
    pub stats_relevance_period_ms: u64,
    /// Execution history cap per (strategy, market).
    pub max_history_length: usize,
    /// Per-chain affinity for the current market regime, in [0, 1].
    pub regime_affinities: HashMap<String, HashMap<String, f64>>,
    /// HTTP API bind address.
    pub listen_addr: String,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            default_chain_id: "ethereum".to_string(),
            selection_weights: SelectionWeights::default(),
            min_chain_health_score: DEFAULT_MIN_HEALTH_SCORE,
            auto_retry_enabled: true,
            max_retry_attempts: 3,
            retry_backoff_base_ms: 1_000,
            max_retry_queue_size: 1_000,
            retry_entry_ttl_ms: 24 * 60 * 60 * 1000,
            retry_cleanup_interval_ms: 5 * 60 * 1000,
            health_cache_ms: 30_000,
            polling_interval_ms: 60_000,
            execution_timeout_ms: 30_000,
            allowed_chains: vec![
                "ethereum".to_string(),
                "solana".to_string(),
                "cosmos".to_string(),
            ],
            allowed_contracts: Vec::new(),
            allowed_ips: Vec::new(),
            max_gas_limits: HashMap::new(),
            max_tx_value_limits: HashMap::new(),
            rate_limit_window_ms: 60_000,
            rate_limit_max_requests: 100,
            key_storage_mode: KeyStorageMode::Memory,
            key_rotation_interval_ms: 24 * 60 * 60 * 1000,
            slashing_protection: SlashingProtection::default(),
            min_executions_for_stats: 5,
            stats_relevance_period_ms: 24 * 60 * 60 * 1000,
            max_history_length: 100,
            regime_affinities: HashMap::new(),
            listen_addr: "127.0.0.1:8080".to_string(),
        }
    }
}

impl RouterConfig {
    /// Load from `XROUTER__`-prefixed environment variables on top of the
    /// defaults, then run the normalization pass.
    pub fn load() -> Result<Self> {
        let cfg = config::Config::builder()
            .add_source(config::Environment::with_prefix("XROUTER").separator("__"))
            .build()?;
        let mut loaded: RouterConfig = cfg.try_deserialize().unwrap_or_else(|err| {
            warn!(error = %err, "failed to deserialize config; using defaults");
            RouterConfig::default()
        });
        loaded.normalize();
        Ok(loaded)
    }

    /// Auto-correct invalid values with a logged warning. Only a config that
    /// leaves the router with nothing to route to is treated as fatal, and
    /// that is decided later at adapter registration.
    pub fn normalize(&mut self) {
        self.selection_weights.normalize();

        if !(0.0..=1.0).contains(&self.min_chain_health_score)
            || !self.min_chain_health_score.is_finite()
        {
            warn!(
                value = self.min_chain_health_score,
                "min_chain_health_score outside [0,1]; resetting to {}",
                DEFAULT_MIN_HEALTH_SCORE
            );
            self.min_chain_health_score = DEFAULT_MIN_HEALTH_SCORE;
        }

        if self.max_retry_attempts == 0 {
            warn!("max_retry_attempts of 0 disables failover; resetting to 3");
            self.max_retry_attempts = 3;
        }
        if self.retry_backoff_base_ms == 0 {
            warn!("retry_backoff_base_ms of 0; resetting to 1000");
            self.retry_backoff_base_ms = 1_000;
        }
        if self.max_retry_queue_size == 0 {
            warn!("max_retry_queue_size of 0; resetting to 1000");
            self.max_retry_queue_size = 1_000;
        }
        if self.key_rotation_interval_ms < MIN_KEY_ROTATION_MS {
            warn!(
                value = self.key_rotation_interval_ms,
                "key rotation interval below 1h floor; clamping"
            );
            self.key_rotation_interval_ms = MIN_KEY_ROTATION_MS;
        }
        if self.rate_limit_max_requests == 0 {
            warn!("rate_limit_max_requests of 0 blocks everything; resetting to 100");
            self.rate_limit_max_requests = 100;
        }
        if !(0.0..=1.0).contains(&self.slashing_protection.max_slippage) {
            warn!(
                value = self.slashing_protection.max_slippage,
                "slashing max_slippage outside [0,1]; resetting to 0.05"
            );
            self.slashing_protection.max_slippage = 0.05;
        }
        if self.max_history_length == 0 {
            warn!("max_history_length of 0; resetting to 100");
            self.max_history_length = 100;
        }
    }

    /// Affinity of `chain_id` for `regime`, defaulting to a neutral 0.5.
    pub fn regime_affinity(&self, chain_id: &str, regime: &str) -> f64 {
        self.regime_affinities
            .get(chain_id)
            .and_then(|per_regime| per_regime.get(regime))
            .copied()
            .unwrap_or(0.5)
            .clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn weights_normalize_to_one() {
        let mut weights = SelectionWeights {
            fee: 2.0,
            latency: 1.0,
            reliability: 0.5,
            regime: 0.5,
        };
        weights.normalize();
        assert!((weights.sum() - 1.0).abs() < 1e-9);
        assert!((weights.fee - 0.5).abs() < 1e-9);
    }

    #[test]
    fn degenerate_weights_fall_back_to_defaults() {
        let mut weights = SelectionWeights {
            fee: 0.0,
            latency: 0.0,
            reliability: 0.0,
            regime: 0.0,
        };
        weights.normalize();
        assert!((weights.sum() - 1.0).abs() < 1e-9);
        assert!((weights.fee - 0.3).abs() < 1e-9);
    }

    #[test]
    fn invalid_values_are_auto_corrected() {
        let mut cfg = RouterConfig {
            min_chain_health_score: 3.2,
            key_rotation_interval_ms: 1_000,
            rate_limit_max_requests: 0,
            ..RouterConfig::default()
        };
        cfg.normalize();
        assert!((cfg.min_chain_health_score - 0.7).abs() < 1e-9);
        assert_eq!(cfg.key_rotation_interval_ms, 60 * 60 * 1000);
        assert_eq!(cfg.rate_limit_max_requests, 100);
    }

    #[test]
    fn regime_affinity_defaults_to_neutral() {
        let cfg = RouterConfig::default();
        assert!((cfg.regime_affinity("ethereum", "volatile") - 0.5).abs() < 1e-9);
    }
}
