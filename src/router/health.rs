// Chain health aggregation
// Probes every adapter concurrently behind a short-lived cache; repeated
// calls within the cache window never issue a second live probe for the
// same chain. A probe failure becomes health zero, never an abort.

use crate::adapters::{epoch_ms, ChainAdapter, ChainHealth};
use crate::metrics;
use crate::telemetry::{TelemetryEvent, TelemetrySink};
use futures::future::join_all;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthClass {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChainHealthStatus {
    pub chain_id: String,
    /// Aggregated score in [0, 1].
    pub score: f64,
    pub class: HealthClass,
    pub health: Option<ChainHealth>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SystemHealth {
    pub status: String,
    pub healthy: usize,
    pub degraded: usize,
    pub unhealthy: usize,
    pub chains: Vec<ChainHealthStatus>,
}

struct CacheSlot {
    status: ChainHealthStatus,
    fetched_at: Instant,
}

pub struct HealthMonitor {
    cache: RwLock<HashMap<String, CacheSlot>>,
    cache_ttl: Duration,
    probe_timeout: Duration,
}

/// Score a raw probe result: operational base plus RPC-latency, congestion,
/// and block-freshness tiers.
pub fn score_health(health: &ChainHealth) -> f64 {
    let mut score = 0.0;
    if health.is_operational {
        score += 0.5;
    }
    if health.rpc_response_time_ms < 100 {
        score += 0.2;
    } else if health.rpc_response_time_ms < 500 {
        score += 0.1;
    }
    if health.network_congestion < 0.3 {
        score += 0.2;
    } else if health.network_congestion < 0.7 {
        score += 0.1;
    }
    let block_age_ms = epoch_ms().saturating_sub(health.latest_block_timestamp);
    if block_age_ms < 15_000 {
        score += 0.1;
    }
    score
}

fn classify(health: &ChainHealth) -> HealthClass {
    if !health.is_operational {
        return HealthClass::Unhealthy;
    }
    if health.network_congestion < 0.3 {
        HealthClass::Healthy
    } else if health.network_congestion < 0.7 {
        HealthClass::Degraded
    } else {
        HealthClass::Unhealthy
    }
}

impl HealthMonitor {
    pub fn new(cache_ttl: Duration, probe_timeout: Duration) -> Self {
        Self {
            cache: RwLock::new(HashMap::new()),
            cache_ttl,
            probe_timeout,
        }
    }

    /// Health statuses for all adapters. Fresh cache entries are served as
    /// is; the rest are probed concurrently, so total latency tracks the
    /// slowest single probe rather than the sum.
    pub async fn statuses(&self, adapters: &[Arc<dyn ChainAdapter>]) -> Vec<ChainHealthStatus> {
        let mut fresh: HashMap<String, ChainHealthStatus> = HashMap::new();
        let mut stale: Vec<Arc<dyn ChainAdapter>> = Vec::new();
        {
            let cache = self.cache.read().await;
            for adapter in adapters {
                match cache.get(adapter.chain_id()) {
                    Some(slot) if slot.fetched_at.elapsed() < self.cache_ttl => {
                        fresh.insert(adapter.chain_id().to_string(), slot.status.clone());
                    }
                    _ => stale.push(adapter.clone()),
                }
            }
        }

        if !stale.is_empty() {
            let probes = stale.iter().map(|adapter| {
                let adapter = adapter.clone();
                let timeout = self.probe_timeout;
                async move {
                    metrics::HEALTH_PROBES
                        .with_label_values(&[adapter.chain_id()])
                        .inc();
                    let probed = tokio::time::timeout(timeout, adapter.health()).await;
                    let status = match probed {
                        Ok(Ok(health)) => ChainHealthStatus {
                            chain_id: adapter.chain_id().to_string(),
                            score: score_health(&health),
                            class: classify(&health),
                            health: Some(health),
                        },
                        Ok(Err(err)) => {
                            warn!(chain = adapter.chain_id(), error = %err, "health probe failed");
                            unhealthy(adapter.chain_id())
                        }
                        Err(_) => {
                            warn!(chain = adapter.chain_id(), "health probe timed out");
                            unhealthy(adapter.chain_id())
                        }
                    };
                    status
                }
            });
            let probed: Vec<ChainHealthStatus> = join_all(probes).await;

            let mut cache = self.cache.write().await;
            for status in probed {
                debug!(chain = %status.chain_id, score = status.score, "refreshed chain health");
                fresh.insert(status.chain_id.clone(), status.clone());
                cache.insert(
                    status.chain_id.clone(),
                    CacheSlot {
                        status,
                        fetched_at: Instant::now(),
                    },
                );
            }
        }

        // Preserve adapter registration order in the output.
        adapters
            .iter()
            .filter_map(|a| fresh.get(a.chain_id()).cloned())
            .collect()
    }

    pub async fn score_for(
        &self,
        adapters: &[Arc<dyn ChainAdapter>],
        chain_id: &str,
    ) -> Option<f64> {
        self.statuses(adapters)
            .await
            .into_iter()
            .find(|s| s.chain_id == chain_id)
            .map(|s| s.score)
    }

    /// Aggregate system health: >=80% healthy adapters is healthy, >=50% is
    /// degraded, anything less is unhealthy.
    pub async fn system_health(
        &self,
        adapters: &[Arc<dyn ChainAdapter>],
        sink: &dyn TelemetrySink,
    ) -> SystemHealth {
        let chains = self.statuses(adapters).await;
        let healthy = chains.iter().filter(|c| c.class == HealthClass::Healthy).count();
        let degraded = chains.iter().filter(|c| c.class == HealthClass::Degraded).count();
        let unhealthy = chains.iter().filter(|c| c.class == HealthClass::Unhealthy).count();
        let total = chains.len().max(1);
        let ratio = healthy as f64 / total as f64;
        let status = if ratio >= 0.8 {
            "healthy"
        } else if ratio >= 0.5 {
            "degraded"
        } else {
            "unhealthy"
        };

        sink.emit(TelemetryEvent::SystemHealthCheckCompleted {
            healthy,
            degraded,
            unhealthy,
            status: status.to_string(),
        });

        SystemHealth {
            status: status.to_string(),
            healthy,
            degraded,
            unhealthy,
            chains,
        }
    }
}

fn unhealthy(chain_id: &str) -> ChainHealthStatus {
    ChainHealthStatus {
        chain_id: chain_id.to_string(),
        score: 0.0,
        class: HealthClass::Unhealthy,
        health: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{
        ExecutionOutcome, ExecutionParams, FeeEstimate, FeeTiers, StrategyGenome,
        StrategyValidation,
    };
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct CountingAdapter {
        chain: String,
        probes: AtomicU32,
        congestion: f64,
        operational: bool,
    }

    impl CountingAdapter {
        fn new(chain: &str) -> Self {
            Self {
                chain: chain.to_string(),
                probes: AtomicU32::new(0),
                congestion: 0.1,
                operational: true,
            }
        }
    }

    #[async_trait]
    impl ChainAdapter for CountingAdapter {
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
        ) -> anyhow::Result<FeeEstimate> {
            Ok(FeeEstimate {
                estimated_fee: 0.001,
                network_congestion: self.congestion,
                recommended_fees: FeeTiers { slow: 0.0008, average: 0.001, fast: 0.0015 },
                estimated_confirm_ms: FeeTiers { slow: 30_000.0, average: 15_000.0, fast: 5_000.0 },
            })
        }

        async fn health(&self) -> anyhow::Result<ChainHealth> {
            self.probes.fetch_add(1, Ordering::SeqCst);
            Ok(ChainHealth {
                is_operational: self.operational,
                current_block_height: 100,
                latest_block_timestamp: epoch_ms(),
                average_block_time_ms: 12_000,
                network_congestion: self.congestion,
                current_tps: 50.0,
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

    #[tokio::test]
    async fn repeated_calls_within_window_hit_the_cache() {
        let monitor = HealthMonitor::new(Duration::from_secs(30), Duration::from_secs(5));
        let adapter = Arc::new(CountingAdapter::new("ethereum"));
        let adapters: Vec<Arc<dyn ChainAdapter>> = vec![adapter.clone()];

        for _ in 0..5 {
            let statuses = monitor.statuses(&adapters).await;
            assert_eq!(statuses.len(), 1);
        }
        assert_eq!(adapter.probes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn fast_uncongested_fresh_chain_scores_full_marks() {
        let monitor = HealthMonitor::new(Duration::from_secs(30), Duration::from_secs(5));
        let adapter = Arc::new(CountingAdapter::new("ethereum"));
        let adapters: Vec<Arc<dyn ChainAdapter>> = vec![adapter];
        let statuses = monitor.statuses(&adapters).await;
        // 0.5 operational + 0.2 rpc + 0.2 congestion + 0.1 fresh block.
        assert!((statuses[0].score - 1.0).abs() < 1e-9);
        assert_eq!(statuses[0].class, HealthClass::Healthy);
    }

    #[tokio::test]
    async fn aggregate_thresholds_classify_system_status() {
        let monitor = HealthMonitor::new(Duration::from_secs(30), Duration::from_secs(5));
        let healthy = Arc::new(CountingAdapter::new("a"));
        let mut congested = CountingAdapter::new("b");
        congested.congestion = 0.5;
        let mut down = CountingAdapter::new("c");
        down.operational = false;
        let adapters: Vec<Arc<dyn ChainAdapter>> =
            vec![healthy, Arc::new(congested), Arc::new(down)];

        let sink = crate::telemetry::CapturingSink::new();
        let system = monitor.system_health(&adapters, &sink).await;
        assert_eq!(system.healthy, 1);
        assert_eq!(system.degraded, 1);
        assert_eq!(system.unhealthy, 1);
        // 1/3 healthy is below the 50% degraded floor.
        assert_eq!(system.status, "unhealthy");
        assert!(sink.names().contains(&"system_health_check_completed"));
    }
}
