// Simulated chain adapter for paper trading
// Conforms to the same contract as real chain backends but fabricates
// latency, fees, and failures so routing behavior can be exercised without
// touching a network.

use crate::adapters::{
    epoch_ms, ChainAdapter, ChainHealth, ExecutionOutcome, ExecutionParams, FeeEstimate, FeeTiers,
    StrategyGenome, StrategyValidation,
};
use anyhow::Result;
use async_trait::async_trait;
use rand::Rng;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct SimulatedChainConfig {
    pub chain_id: String,
    pub base_fee: f64,
    pub base_latency_ms: u64,
    /// Random latency jitter added on top of the base, in milliseconds.
    pub latency_jitter_ms: u64,
    /// Probability in [0, 1] that an execution fails.
    pub failure_rate: f64,
    pub base_congestion: f64,
    pub average_block_time_ms: u64,
}

impl SimulatedChainConfig {
    pub fn new(chain_id: impl Into<String>) -> Self {
        Self {
            chain_id: chain_id.into(),
            base_fee: 0.001,
            base_latency_ms: 50,
            latency_jitter_ms: 100,
            failure_rate: 0.0,
            base_congestion: 0.2,
            average_block_time_ms: 12_000,
        }
    }
}

pub struct SimulatedChainAdapter {
    config: SimulatedChainConfig,
    block_height: AtomicU64,
}

impl SimulatedChainAdapter {
    pub fn new(config: SimulatedChainConfig) -> Self {
        Self {
            config,
            block_height: AtomicU64::new(1_000_000),
        }
    }

    fn roll_latency_ms(&self) -> u64 {
        if self.config.latency_jitter_ms == 0 {
            return self.config.base_latency_ms;
        }
        let jitter = rand::thread_rng().gen_range(0..=self.config.latency_jitter_ms);
        self.config.base_latency_ms + jitter
    }

    fn roll_failure(&self) -> bool {
        if self.config.failure_rate <= 0.0 {
            return false;
        }
        rand::thread_rng().gen_bool(self.config.failure_rate.clamp(0.0, 1.0))
    }
}

#[async_trait]
impl ChainAdapter for SimulatedChainAdapter {
    fn chain_id(&self) -> &str {
        &self.config.chain_id
    }

    async fn initialize(&self) -> Result<bool> {
        Ok(true)
    }

    async fn execute_strategy(
        &self,
        _genome: &StrategyGenome,
        _market: &str,
        params: &ExecutionParams,
    ) -> Result<ExecutionOutcome> {
        let latency = self.roll_latency_ms();
        tokio::time::sleep(Duration::from_millis(latency.min(params.timeout_ms))).await;

        if self.roll_failure() {
            return Ok(ExecutionOutcome::failure(format!(
                "simulated execution failure on {}",
                self.config.chain_id
            )));
        }

        let height = self.block_height.fetch_add(1, Ordering::Relaxed) + 1;
        let slippage = params.max_slippage * rand::thread_rng().gen_range(0.0..0.5);
        Ok(ExecutionOutcome {
            success: true,
            transaction_id: Some(format!("sim-{}", Uuid::new_v4())),
            fee_cost: self.config.base_fee,
            execution_time_ms: latency,
            error: None,
            actual_slippage: Some(slippage),
            block_height: Some(height),
            timestamp: epoch_ms(),
        })
    }

    async fn estimate_fees(
        &self,
        _genome: &StrategyGenome,
        _market: &str,
        _params: &ExecutionParams,
    ) -> Result<FeeEstimate> {
        let fee = self.config.base_fee;
        Ok(FeeEstimate {
            estimated_fee: fee,
            network_congestion: self.config.base_congestion,
            recommended_fees: FeeTiers {
                slow: fee * 0.8,
                average: fee,
                fast: fee * 1.5,
            },
            estimated_confirm_ms: FeeTiers {
                slow: (self.config.average_block_time_ms * 3) as f64,
                average: (self.config.average_block_time_ms * 2) as f64,
                fast: self.config.average_block_time_ms as f64,
            },
        })
    }

    async fn health(&self) -> Result<ChainHealth> {
        Ok(ChainHealth {
            is_operational: true,
            current_block_height: self.block_height.load(Ordering::Relaxed),
            latest_block_timestamp: epoch_ms(),
            average_block_time_ms: self.config.average_block_time_ms,
            network_congestion: self.config.base_congestion,
            current_tps: 100.0,
            rpc_response_time_ms: self.config.base_latency_ms,
            is_configured: true,
        })
    }

    async fn validate_strategy(&self, genome: &StrategyGenome) -> Result<StrategyValidation> {
        if genome.id.is_empty() {
            return Ok(StrategyValidation::invalid(vec![
                "strategy id is empty".to_string(),
            ]));
        }
        Ok(StrategyValidation::valid())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn params() -> ExecutionParams {
        ExecutionParams {
            amount: 10.0,
            max_slippage: 0.01,
            timeout_ms: 5_000,
            gas_limit: None,
            regime: None,
            preferred_chain: None,
        }
    }

    #[tokio::test]
    async fn always_failing_adapter_reports_failure_outcome() {
        let mut config = SimulatedChainConfig::new("sim");
        config.failure_rate = 1.0;
        config.base_latency_ms = 0;
        config.latency_jitter_ms = 0;
        let adapter = SimulatedChainAdapter::new(config);

        let genome = StrategyGenome {
            id: "s1".to_string(),
            parameters: HashMap::new(),
            metadata: HashMap::new(),
        };
        let outcome = adapter
            .execute_strategy(&genome, "ETH-USD", &params())
            .await
            .unwrap();
        assert!(!outcome.success);
        assert!(outcome.error.is_some());
    }

    #[tokio::test]
    async fn successful_execution_carries_tx_id_and_fee() {
        let mut config = SimulatedChainConfig::new("sim");
        config.base_latency_ms = 0;
        config.latency_jitter_ms = 0;
        let adapter = SimulatedChainAdapter::new(config);

        let genome = StrategyGenome::new("s1");
        let outcome = adapter
            .execute_strategy(&genome, "ETH-USD", &params())
            .await
            .unwrap();
        assert!(outcome.success);
        assert!(outcome.transaction_id.is_some());
        assert!(outcome.fee_cost > 0.0);
    }
}
