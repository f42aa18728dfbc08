// Strategy deployment registry
// Source of truth for where a strategy is deployed and how each chain has
// performed for it. Purely data and derived stats; no external calls. Write
// paths log failures instead of propagating them so bookkeeping can never
// abort an execution.

use crate::adapters::{epoch_ms, StrategyGenome};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, VecDeque};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

const SCORE_TIME_CAP_MS: f64 = 10_000.0;
const SCORE_FEE_CAP: f64 = 0.1;

/// Where a strategy is deployed on one chain. Keyed by (chain_id, address);
/// upserted on register, never deleted, only deactivated/reactivated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentRecord {
    pub strategy_id: String,
    pub chain_id: String,
    pub address: String,
    /// SHA-256 of the deployed bytecode, hex-encoded.
    pub content_hash: String,
    pub is_active: bool,
    pub abi_version: String,
    pub genome_snapshot: StrategyGenome,
    pub metadata: HashMap<String, String>,
    pub timestamp: u64,
}

/// One execution appended to a (strategy, market) history list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub strategy_id: String,
    pub chain_id: String,
    pub market: String,
    pub tx_id: Option<String>,
    pub timestamp: u64,
    pub fee_cost: f64,
    pub execution_time_ms: u64,
    pub success: bool,
    pub error: Option<String>,
    pub slippage: Option<f64>,
    pub block_height: Option<u64>,
}

/// Derived per-(strategy, market, chain) performance statistics, updated
/// incrementally on every recorded execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainExecutionStats {
    pub chain_id: String,
    pub total_executions: u64,
    pub successful_executions: u64,
    pub avg_execution_time_ms: f64,
    pub avg_fee_cost: f64,
    pub avg_slippage: f64,
    pub last_execution_timestamp: u64,
    pub success_rate: f64,
}

impl ChainExecutionStats {
    fn new(chain_id: &str) -> Self {
        Self {
            chain_id: chain_id.to_string(),
            total_executions: 0,
            successful_executions: 0,
            avg_execution_time_ms: 0.0,
            avg_fee_cost: 0.0,
            avg_slippage: 0.0,
            last_execution_timestamp: 0,
            success_rate: 0.0,
        }
    }

    /// 1/n decay: avg' = avg * (n-1)/n + value/n, with n the updated count.
    fn fold_avg(avg: f64, n: u64, value: f64) -> f64 {
        let n = n as f64;
        avg * (n - 1.0) / n + value / n
    }

    fn update(&mut self, record: &ExecutionRecord) {
        self.total_executions += 1;
        if record.success {
            self.successful_executions += 1;
        }
        let n = self.total_executions;
        self.avg_execution_time_ms =
            Self::fold_avg(self.avg_execution_time_ms, n, record.execution_time_ms as f64);
        self.avg_fee_cost = Self::fold_avg(self.avg_fee_cost, n, record.fee_cost);
        if let Some(slippage) = record.slippage {
            self.avg_slippage = Self::fold_avg(self.avg_slippage, n, slippage);
        }
        self.last_execution_timestamp = record.timestamp;
        self.success_rate = self.successful_executions as f64 / self.total_executions as f64;
    }

    /// Historical quality score: success rate dominates, then normalized
    /// time and fee (lower is better, capped at 10s and 0.1 respectively).
    fn score(&self) -> f64 {
        let time_score = 1.0 - self.avg_execution_time_ms.min(SCORE_TIME_CAP_MS) / SCORE_TIME_CAP_MS;
        let fee_score = 1.0 - self.avg_fee_cost.min(SCORE_FEE_CAP) / SCORE_FEE_CAP;
        0.5 * self.success_rate + 0.3 * time_score + 0.2 * fee_score
    }
}

pub struct DeploymentRegistry {
    /// Keyed by (chain_id, address).
    deployments: RwLock<HashMap<(String, String), DeploymentRecord>>,
    /// Keyed by (strategy_id, market); capped, oldest evicted.
    history: RwLock<HashMap<(String, String), VecDeque<ExecutionRecord>>>,
    /// Keyed by (strategy_id, market); Vec preserves first-seen chain order
    /// so the optimal-chain tie-break stays stable.
    stats: RwLock<HashMap<(String, String), Vec<ChainExecutionStats>>>,
    /// Keyed by (strategy_id, chain_id, market); reset to 0 on any success.
    consecutive_failures: RwLock<HashMap<(String, String, String), u32>>,
    max_history_length: usize,
    min_executions_for_stats: u64,
    stats_relevance_period_ms: u64,
}

impl DeploymentRegistry {
    pub fn new(
        max_history_length: usize,
        min_executions_for_stats: u64,
        stats_relevance_period_ms: u64,
    ) -> Self {
        Self {
            deployments: RwLock::new(HashMap::new()),
            history: RwLock::new(HashMap::new()),
            stats: RwLock::new(HashMap::new()),
            consecutive_failures: RwLock::new(HashMap::new()),
            max_history_length: max_history_length.max(1),
            min_executions_for_stats,
            stats_relevance_period_ms,
        }
    }

    /// Upsert a deployment by (chain_id, address). Idempotent; returns false
    /// only on internal error, never panics or propagates.
    #[allow(clippy::too_many_arguments)]
    pub async fn register_deployment(
        &self,
        strategy_id: &str,
        chain_id: &str,
        address: &str,
        genome: &StrategyGenome,
        bytecode_hash: &str,
        abi_version: &str,
        metadata: HashMap<String, String>,
    ) -> bool {
        if strategy_id.is_empty() || chain_id.is_empty() || address.is_empty() {
            warn!(strategy_id, chain_id, address, "rejecting deployment with empty key field");
            return false;
        }
        let record = DeploymentRecord {
            strategy_id: strategy_id.to_string(),
            chain_id: chain_id.to_string(),
            address: address.to_string(),
            content_hash: bytecode_hash.to_ascii_lowercase(),
            is_active: true,
            abi_version: abi_version.to_string(),
            genome_snapshot: genome.clone(),
            metadata,
            timestamp: epoch_ms(),
        };
        let key = (chain_id.to_string(), address.to_string());
        let mut deployments = self.deployments.write().await;
        let replaced = deployments.insert(key, record).is_some();
        info!(strategy_id, chain_id, address, replaced, "registered deployment");
        true
    }

    pub async fn deployments_for(&self, strategy_id: &str) -> Vec<DeploymentRecord> {
        let deployments = self.deployments.read().await;
        deployments
            .values()
            .filter(|d| d.strategy_id == strategy_id)
            .cloned()
            .collect()
    }

    /// Whether the strategy has an active deployment on the chain.
    pub async fn is_deployed(&self, strategy_id: &str, chain_id: &str) -> bool {
        let deployments = self.deployments.read().await;
        deployments
            .values()
            .any(|d| d.strategy_id == strategy_id && d.chain_id == chain_id && d.is_active)
    }

    pub async fn deactivate_deployment(&self, chain_id: &str, address: &str) -> bool {
        self.set_active(chain_id, address, false).await
    }

    pub async fn reactivate_deployment(&self, chain_id: &str, address: &str) -> bool {
        self.set_active(chain_id, address, true).await
    }

    async fn set_active(&self, chain_id: &str, address: &str, active: bool) -> bool {
        let mut deployments = self.deployments.write().await;
        match deployments.get_mut(&(chain_id.to_string(), address.to_string())) {
            Some(record) => {
                record.is_active = active;
                debug!(chain_id, address, active, "toggled deployment");
                true
            }
            None => false,
        }
    }

    /// Append an execution to the capped history and fold it into the
    /// derived stats and failure counters.
    pub async fn record_execution(&self, record: ExecutionRecord) {
        let history_key = (record.strategy_id.clone(), record.market.clone());

        {
            let mut history = self.history.write().await;
            let list = history.entry(history_key.clone()).or_default();
            list.push_back(record.clone());
            while list.len() > self.max_history_length {
                list.pop_front();
            }
        }

        {
            let mut stats = self.stats.write().await;
            let per_chain = stats.entry(history_key).or_default();
            let idx = match per_chain.iter().position(|s| s.chain_id == record.chain_id) {
                Some(idx) => idx,
                None => {
                    per_chain.push(ChainExecutionStats::new(&record.chain_id));
                    per_chain.len() - 1
                }
            };
            per_chain[idx].update(&record);
        }

        {
            let key = (
                record.strategy_id.clone(),
                record.chain_id.clone(),
                record.market.clone(),
            );
            let mut failures = self.consecutive_failures.write().await;
            if record.success {
                failures.insert(key, 0);
            } else {
                *failures.entry(key).or_insert(0) += 1;
            }
        }
    }

    /// Consecutive failures for (strategy, chain, market). Resets on success.
    pub async fn consecutive_failures(
        &self,
        strategy_id: &str,
        chain_id: &str,
        market: &str,
    ) -> u32 {
        let failures = self.consecutive_failures.read().await;
        failures
            .get(&(
                strategy_id.to_string(),
                chain_id.to_string(),
                market.to_string(),
            ))
            .copied()
            .unwrap_or(0)
    }

    /// Best historical chain for (strategy, market): only chains with enough
    /// executions and fresh stats qualify; highest score wins, first-seen
    /// breaks ties. None when no chain qualifies.
    pub async fn optimal_chain(&self, strategy_id: &str, market: &str) -> Option<String> {
        let now = epoch_ms();
        let stats = self.stats.read().await;
        let per_chain = stats.get(&(strategy_id.to_string(), market.to_string()))?;

        let mut best: Option<(&ChainExecutionStats, f64)> = None;
        for entry in per_chain {
            if entry.total_executions < self.min_executions_for_stats {
                continue;
            }
            if now.saturating_sub(entry.last_execution_timestamp) > self.stats_relevance_period_ms {
                continue;
            }
            let score = entry.score();
            // Strictly-greater keeps the first-seen chain on ties.
            if best.map(|(_, s)| score > s).unwrap_or(true) {
                best = Some((entry, score));
            }
        }
        best.map(|(entry, score)| {
            debug!(strategy_id, market, chain = %entry.chain_id, score, "optimal historical chain");
            entry.chain_id.clone()
        })
    }

    pub async fn stats_for(&self, strategy_id: &str, market: &str) -> Vec<ChainExecutionStats> {
        let stats = self.stats.read().await;
        stats
            .get(&(strategy_id.to_string(), market.to_string()))
            .cloned()
            .unwrap_or_default()
    }

    pub async fn history_for(&self, strategy_id: &str, market: &str) -> Vec<ExecutionRecord> {
        let history = self.history.read().await;
        history
            .get(&(strategy_id.to_string(), market.to_string()))
            .map(|list| list.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Compare SHA-256 of the supplied bytecode with the stored content
    /// hash. A mismatch is logged as a warning, never raised.
    pub async fn verify_deployment(&self, chain_id: &str, address: &str, bytecode: &[u8]) -> bool {
        let deployments = self.deployments.read().await;
        let record = match deployments.get(&(chain_id.to_string(), address.to_string())) {
            Some(record) => record,
            None => {
                warn!(chain_id, address, "verify requested for unknown deployment");
                return false;
            }
        };
        let digest = hex::encode(Sha256::digest(bytecode));
        let matches = digest == record.content_hash;
        if !matches {
            warn!(
                chain_id,
                address,
                expected = %record.content_hash,
                actual = %digest,
                "deployment bytecode hash mismatch"
            );
        }
        matches
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> DeploymentRegistry {
        DeploymentRegistry::new(100, 5, 24 * 60 * 60 * 1000)
    }

    fn record(chain: &str, success: bool, time_ms: u64, fee: f64) -> ExecutionRecord {
        ExecutionRecord {
            strategy_id: "s1".to_string(),
            chain_id: chain.to_string(),
            market: "ETH-USD".to_string(),
            tx_id: Some("tx".to_string()),
            timestamp: epoch_ms(),
            fee_cost: fee,
            execution_time_ms: time_ms,
            success,
            error: None,
            slippage: Some(0.001),
            block_height: Some(1),
        }
    }

    #[tokio::test]
    async fn register_is_idempotent_per_chain_address() {
        let reg = registry();
        let genome = StrategyGenome::new("s1");
        assert!(
            reg.register_deployment("s1", "ethereum", "0xabc", &genome, "aa", "1", HashMap::new())
                .await
        );
        assert!(
            reg.register_deployment("s1", "ethereum", "0xabc", &genome, "bb", "2", HashMap::new())
                .await
        );
        let deployed = reg.deployments_for("s1").await;
        assert_eq!(deployed.len(), 1);
        assert_eq!(deployed[0].content_hash, "bb");
    }

    #[tokio::test]
    async fn deactivate_unknown_deployment_returns_false() {
        let reg = registry();
        assert!(!reg.deactivate_deployment("ethereum", "0xmissing").await);
    }

    #[tokio::test]
    async fn incremental_average_matches_arithmetic_mean() {
        let reg = registry();
        for time in [100u64, 200, 300, 400] {
            reg.record_execution(record("ethereum", true, time, 0.01)).await;
        }
        let stats = reg.stats_for("s1", "ETH-USD").await;
        assert_eq!(stats.len(), 1);
        assert!((stats[0].avg_execution_time_ms - 250.0).abs() < 1e-6);
        assert!((stats[0].success_rate - 1.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn history_is_capped_with_oldest_evicted() {
        let reg = DeploymentRegistry::new(3, 5, 24 * 60 * 60 * 1000);
        for i in 0..5u64 {
            reg.record_execution(record("ethereum", true, 100 + i, 0.01)).await;
        }
        let history = reg.history_for("s1", "ETH-USD").await;
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].execution_time_ms, 102);
    }

    #[tokio::test]
    async fn optimal_chain_excludes_thin_and_stale_stats() {
        let reg = DeploymentRegistry::new(100, 5, 1_000);
        // solana: only 2 executions, perfect record. Excluded for thin stats.
        for _ in 0..2 {
            reg.record_execution(record("solana", true, 10, 0.0001)).await;
        }
        // ethereum: qualifying but stale last execution.
        for _ in 0..5 {
            let mut r = record("ethereum", true, 10, 0.0001);
            r.timestamp = epoch_ms().saturating_sub(10_000);
            reg.record_execution(r).await;
        }
        assert_eq!(reg.optimal_chain("s1", "ETH-USD").await, None);

        // A fresh qualifying chain wins even with a worse raw record.
        for _ in 0..5 {
            reg.record_execution(record("cosmos", false, 5_000, 0.05)).await;
        }
        reg.record_execution(record("cosmos", true, 5_000, 0.05)).await;
        assert_eq!(reg.optimal_chain("s1", "ETH-USD").await, Some("cosmos".to_string()));
    }

    #[tokio::test]
    async fn first_seen_chain_wins_score_ties() {
        let reg = DeploymentRegistry::new(100, 5, 24 * 60 * 60 * 1000);
        for _ in 0..5 {
            reg.record_execution(record("ethereum", true, 100, 0.001)).await;
        }
        for _ in 0..5 {
            reg.record_execution(record("solana", true, 100, 0.001)).await;
        }
        assert_eq!(reg.optimal_chain("s1", "ETH-USD").await, Some("ethereum".to_string()));
    }

    #[tokio::test]
    async fn consecutive_failures_reset_on_success() {
        let reg = registry();
        reg.record_execution(record("ethereum", false, 100, 0.01)).await;
        reg.record_execution(record("ethereum", false, 100, 0.01)).await;
        assert_eq!(reg.consecutive_failures("s1", "ethereum", "ETH-USD").await, 2);
        reg.record_execution(record("ethereum", true, 100, 0.01)).await;
        assert_eq!(reg.consecutive_failures("s1", "ethereum", "ETH-USD").await, 0);
    }

    #[tokio::test]
    async fn verify_deployment_compares_sha256() {
        let reg = registry();
        let bytecode = b"contract-bytecode";
        let hash = hex::encode(Sha256::digest(bytecode));
        let genome = StrategyGenome::new("s1");
        reg.register_deployment("s1", "ethereum", "0xabc", &genome, &hash, "1", HashMap::new())
            .await;
        assert!(reg.verify_deployment("ethereum", "0xabc", bytecode).await);
        assert!(!reg.verify_deployment("ethereum", "0xabc", b"tampered").await);
    }
}
