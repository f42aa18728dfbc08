// Chain selector
// Scores every candidate adapter on fees, confirmation latency, aggregated
// health, deployment bias, and regime affinity, then picks the highest.
// A single adapter's probe failure becomes a zero component, never an
// aborted scoring pass.

use crate::adapters::{ChainAdapter, ExecutionParams, FeeEstimate, StrategyGenome};
use crate::config::RouterConfig;
use crate::registry::DeploymentRegistry;
use crate::router::health::ChainHealthStatus;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

const DEPLOYMENT_BIAS: f64 = 0.2;
const LATENCY_REFERENCE_MS: f64 = 60_000.0;

/// Winning candidate of a selection pass.
pub struct SelectedChain {
    pub chain_id: String,
    pub adapter: Arc<dyn ChainAdapter>,
    pub score: f64,
    pub fee_estimate: Option<FeeEstimate>,
}

pub struct ChainSelector {
    config: Arc<RouterConfig>,
    registry: Arc<DeploymentRegistry>,
    probe_timeout: Duration,
}

impl ChainSelector {
    pub fn new(
        config: Arc<RouterConfig>,
        registry: Arc<DeploymentRegistry>,
        probe_timeout: Duration,
    ) -> Self {
        Self {
            config,
            registry,
            probe_timeout,
        }
    }

    /// Score candidates in registration order; the first-seen chain wins
    /// ties. Chains in `excluded` (failed earlier attempts) never qualify.
    #[tracing::instrument(skip_all, fields(strategy = %genome.id, market = market))]
    pub async fn select(
        &self,
        adapters: &[Arc<dyn ChainAdapter>],
        statuses: &[ChainHealthStatus],
        genome: &StrategyGenome,
        market: &str,
        params: &ExecutionParams,
        excluded: &HashSet<String>,
    ) -> Option<SelectedChain> {
        let weights = &self.config.selection_weights;
        let historical_best = self.registry.optimal_chain(&genome.id, market).await;
        let mut best: Option<SelectedChain> = None;

        for adapter in adapters {
            let chain_id = adapter.chain_id().to_string();
            if excluded.contains(&chain_id) {
                continue;
            }

            let health = statuses
                .iter()
                .find(|s| s.chain_id == chain_id)
                .map(|s| s.score)
                .unwrap_or(0.0);
            if health < self.config.min_chain_health_score {
                debug!(chain = %chain_id, health, "skipped: below health floor");
                continue;
            }

            match tokio::time::timeout(self.probe_timeout, adapter.validate_strategy(genome)).await
            {
                Ok(Ok(validation)) if validation.is_valid => {}
                Ok(Ok(validation)) => {
                    debug!(chain = %chain_id, errors = ?validation.errors, "skipped: strategy invalid");
                    continue;
                }
                Ok(Err(err)) => {
                    debug!(chain = %chain_id, error = %err, "skipped: validation failed");
                    continue;
                }
                Err(_) => {
                    debug!(chain = %chain_id, "skipped: validation timed out");
                    continue;
                }
            }

            let fee_estimate = match tokio::time::timeout(
                self.probe_timeout,
                adapter.estimate_fees(genome, market, params),
            )
            .await
            {
                Ok(Ok(estimate)) => Some(estimate),
                Ok(Err(err)) => {
                    debug!(chain = %chain_id, error = %err, "fee estimate failed; scoring without it");
                    None
                }
                Err(_) => {
                    debug!(chain = %chain_id, "fee estimate timed out; scoring without it");
                    None
                }
            };

            let fee_component = fee_estimate
                .as_ref()
                .map(|e| 1.0 / (1.0 + e.estimated_fee))
                .unwrap_or(0.0);
            let latency_component = fee_estimate
                .as_ref()
                .map(|e| {
                    let avg_ms = e.estimated_confirm_ms.average;
                    if avg_ms <= 0.0 {
                        1.0
                    } else {
                        (LATENCY_REFERENCE_MS / avg_ms).min(1.0)
                    }
                })
                .unwrap_or(0.0);

            let preferred = params.preferred_chain.as_deref() == Some(chain_id.as_str())
                || (params.preferred_chain.is_none()
                    && chain_id == self.config.default_chain_id)
                || historical_best.as_deref() == Some(chain_id.as_str());
            let bias = if preferred && self.registry.is_deployed(&genome.id, &chain_id).await {
                DEPLOYMENT_BIAS
            } else {
                0.0
            };

            let affinity = params
                .regime
                .map(|r| self.config.regime_affinity(&chain_id, r.as_str()))
                .unwrap_or(0.5);

            let score = bias
                + weights.fee * fee_component
                + weights.latency * latency_component
                + weights.reliability * health
                + weights.regime * affinity;

            debug!(
                chain = %chain_id,
                score,
                bias,
                fee_component,
                latency_component,
                health,
                affinity,
                "scored candidate chain"
            );

            // Strictly-greater keeps the earliest-registered chain on ties.
            if best.as_ref().map(|b| score > b.score).unwrap_or(true) {
                best = Some(SelectedChain {
                    chain_id,
                    adapter: adapter.clone(),
                    score,
                    fee_estimate,
                });
            }
        }

        best
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{
        epoch_ms, ChainHealth, ExecutionOutcome, FeeTiers, StrategyValidation,
    };
    use crate::router::health::{ChainHealthStatus, HealthClass};
    use async_trait::async_trait;

    struct FixedFeeAdapter {
        chain: String,
        fee: f64,
    }

    impl FixedFeeAdapter {
        fn new(chain: &str, fee: f64) -> Arc<Self> {
            Arc::new(Self {
                chain: chain.to_string(),
                fee,
            })
        }
    }

    #[async_trait]
    impl ChainAdapter for FixedFeeAdapter {
        fn chain_id(&self) -> &str {
            &self.chain
        }

        async fn initialize(&self) -> anyhow::Result<bool> {
            Ok(true)
        }

        async fn execute_strategy(
            &self,
            _genome: &StrategyGenome,
            _market: &str,
            _params: &ExecutionParams,
        ) -> anyhow::Result<ExecutionOutcome> {
            Ok(ExecutionOutcome::failure("not used"))
        }

        async fn estimate_fees(
            &self,
            _genome: &StrategyGenome,
            _market: &str,
            _params: &ExecutionParams,
        ) -> anyhow::Result<crate::adapters::FeeEstimate> {
            Ok(crate::adapters::FeeEstimate {
                estimated_fee: self.fee,
                network_congestion: 0.1,
                recommended_fees: FeeTiers {
                    slow: self.fee,
                    average: self.fee,
                    fast: self.fee,
                },
                estimated_confirm_ms: FeeTiers {
                    slow: 30_000.0,
                    average: 10_000.0,
                    fast: 3_000.0,
                },
            })
        }

        async fn health(&self) -> anyhow::Result<ChainHealth> {
            Ok(ChainHealth {
                is_operational: true,
                current_block_height: 1,
                latest_block_timestamp: epoch_ms(),
                average_block_time_ms: 12_000,
                network_congestion: 0.1,
                current_tps: 10.0,
                rpc_response_time_ms: 40,
                is_configured: true,
            })
        }

        async fn validate_strategy(
            &self,
            _genome: &StrategyGenome,
        ) -> anyhow::Result<StrategyValidation> {
            Ok(StrategyValidation::valid())
        }
    }

    fn status(chain: &str, score: f64) -> ChainHealthStatus {
        ChainHealthStatus {
            chain_id: chain.to_string(),
            score,
            class: HealthClass::Healthy,
            health: None,
        }
    }

    fn selector() -> ChainSelector {
        let config = Arc::new(crate::config::RouterConfig::default());
        let registry = Arc::new(crate::registry::DeploymentRegistry::new(
            100,
            5,
            24 * 60 * 60 * 1000,
        ));
        ChainSelector::new(config, registry, Duration::from_secs(5))
    }

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
    async fn cheaper_fee_beats_identical_competitors() {
        let selector = selector();
        let adapters: Vec<Arc<dyn ChainAdapter>> = vec![
            FixedFeeAdapter::new("pricey", 0.5),
            FixedFeeAdapter::new("cheap", 0.001),
        ];
        let statuses = vec![status("pricey", 0.9), status("cheap", 0.9)];
        let genome = StrategyGenome::new("s1");
        let picked = selector
            .select(&adapters, &statuses, &genome, "ETH-USD", &params(), &HashSet::new())
            .await
            .unwrap();
        assert_eq!(picked.chain_id, "cheap");
    }

    #[tokio::test]
    async fn excluded_and_unhealthy_chains_never_qualify() {
        let selector = selector();
        let adapters: Vec<Arc<dyn ChainAdapter>> = vec![
            FixedFeeAdapter::new("excluded", 0.001),
            FixedFeeAdapter::new("sick", 0.001),
            FixedFeeAdapter::new("ok", 0.5),
        ];
        // "sick" sits below the 0.7 health floor.
        let statuses = vec![status("excluded", 0.9), status("sick", 0.3), status("ok", 0.9)];
        let mut excluded = HashSet::new();
        excluded.insert("excluded".to_string());
        let genome = StrategyGenome::new("s1");
        let picked = selector
            .select(&adapters, &statuses, &genome, "ETH-USD", &params(), &excluded)
            .await
            .unwrap();
        assert_eq!(picked.chain_id, "ok");
    }

    #[tokio::test]
    async fn equal_scores_keep_the_first_registered_chain() {
        let selector = selector();
        let adapters: Vec<Arc<dyn ChainAdapter>> = vec![
            FixedFeeAdapter::new("alpha", 0.01),
            FixedFeeAdapter::new("beta", 0.01),
        ];
        let statuses = vec![status("alpha", 0.9), status("beta", 0.9)];
        let genome = StrategyGenome::new("s1");
        let picked = selector
            .select(&adapters, &statuses, &genome, "ETH-USD", &params(), &HashSet::new())
            .await
            .unwrap();
        assert_eq!(picked.chain_id, "alpha");
    }

    #[tokio::test]
    async fn empty_candidate_set_returns_none() {
        let selector = selector();
        let adapters: Vec<Arc<dyn ChainAdapter>> = vec![FixedFeeAdapter::new("only", 0.01)];
        let statuses = vec![status("only", 0.2)];
        let genome = StrategyGenome::new("s1");
        assert!(selector
            .select(&adapters, &statuses, &genome, "ETH-USD", &params(), &HashSet::new())
            .await
            .is_none());
    }
}
