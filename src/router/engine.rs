// Cross-chain execution router
// Top-level orchestrator: validates the request, scores candidate chains,
// authorizes through the security layer, executes through the chosen
// adapter, records the outcome, and drives backoff failover across the
// remaining chains. Callers never observe a raw error; every run ends in a
// structured result with a success flag.

use crate::adapters::{epoch_ms, ChainAdapter, ExecutionOutcome, ExecutionParams, StrategyGenome};
use crate::config::RouterConfig;
use crate::errors::RouterError;
use crate::metrics;
use crate::registry::{DeploymentRegistry, ExecutionRecord};
use crate::router::breaker::BridgeBreakers;
use crate::router::health::{HealthMonitor, SystemHealth};
use crate::router::path::{self, ChainNode, PathResult};
use crate::router::retry::{spawn_cleanup_task, RetryEntry, RetryQueue};
use crate::router::selector::ChainSelector;
use crate::security::keys::spawn_rotation_task;
use crate::security::SecurityLayer;
use crate::telemetry::{TelemetryEvent, TelemetrySink};
use backoff::{future::retry, ExponentialBackoff};
use serde::Serialize;
use std::collections::HashSet;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OnceCell, RwLock};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

const PROBE_TIMEOUT: Duration = Duration::from_secs(5);
/// How often expired signing keys are looked for. Key expiry itself comes
/// from the configured rotation interval on each key.
const KEY_ROTATION_CHECK: Duration = Duration::from_secs(60 * 60);

/// Final result of one routed execution.
#[derive(Debug, Clone, Serialize)]
pub struct RouteExecution {
    pub execution_id: String,
    pub success: bool,
    pub chain_id: Option<String>,
    pub outcome: Option<ExecutionOutcome>,
    pub error: Option<String>,
    /// Failover retries consumed.
    pub attempts: u32,
    pub risk_score: f64,
}

impl RouteExecution {
    fn failure(execution_id: String, error: String, attempts: u32, risk_score: f64) -> Self {
        Self {
            execution_id,
            success: false,
            chain_id: None,
            outcome: None,
            error: Some(error),
            attempts,
            risk_score,
        }
    }
}

/// Router-level execution statistics.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionStats {
    pub total_executions: u64,
    pub successful_executions: u64,
    pub failed_executions: u64,
    pub avg_execution_time_ms: Option<f64>,
    pub success_rate: f64,
}

pub struct ExecutionRouter {
    config: Arc<RouterConfig>,
    adapters: RwLock<Vec<Arc<dyn ChainAdapter>>>,
    registry: Arc<DeploymentRegistry>,
    security: Arc<SecurityLayer>,
    selector: ChainSelector,
    health: HealthMonitor,
    breakers: BridgeBreakers,
    retry_queue: Arc<RetryQueue>,
    sink: Arc<dyn TelemetrySink>,
    total_executions: AtomicU64,
    successful_executions: AtomicU64,
    failed_executions: AtomicU64,
    total_execution_time_ms: AtomicU64,
}

impl ExecutionRouter {
    pub fn new(
        config: Arc<RouterConfig>,
        registry: Arc<DeploymentRegistry>,
        security: Arc<SecurityLayer>,
        sink: Arc<dyn TelemetrySink>,
    ) -> Self {
        let selector = ChainSelector::new(config.clone(), registry.clone(), PROBE_TIMEOUT);
        let health = HealthMonitor::new(
            Duration::from_millis(config.health_cache_ms),
            PROBE_TIMEOUT,
        );
        let retry_queue = Arc::new(RetryQueue::new(
            config.max_retry_queue_size,
            config.retry_entry_ttl_ms,
        ));
        Self {
            config: config.clone(),
            adapters: RwLock::new(Vec::new()),
            registry,
            security,
            selector,
            health,
            breakers: BridgeBreakers::new(sink.clone()),
            retry_queue,
            sink,
            total_executions: AtomicU64::new(0),
            successful_executions: AtomicU64::new(0),
            failed_executions: AtomicU64::new(0),
            total_execution_time_ms: AtomicU64::new(0),
        }
    }

    pub fn registry(&self) -> &Arc<DeploymentRegistry> {
        &self.registry
    }

    pub fn security(&self) -> &Arc<SecurityLayer> {
        &self.security
    }

    pub fn retry_queue(&self) -> &Arc<RetryQueue> {
        &self.retry_queue
    }

    pub fn breakers(&self) -> &BridgeBreakers {
        &self.breakers
    }

    /// Register an adapter, bringing it up with exponential backoff. A
    /// backend that never comes up is a configuration error, not a panic.
    pub async fn register_adapter(
        &self,
        adapter: Arc<dyn ChainAdapter>,
    ) -> Result<(), RouterError> {
        let chain_id = adapter.chain_id().to_string();
        let policy = ExponentialBackoff {
            initial_interval: Duration::from_millis(100),
            max_interval: Duration::from_secs(2),
            max_elapsed_time: Some(Duration::from_secs(10)),
            multiplier: 2.0,
            ..Default::default()
        };
        let init_adapter = adapter.clone();
        let ready = retry(policy, || {
            let adapter = init_adapter.clone();
            async move {
                adapter
                    .initialize()
                    .await
                    .map_err(backoff::Error::transient)
            }
        })
        .await
        .map_err(|e| {
            RouterError::Configuration(format!("adapter {chain_id} failed to initialize: {e}"))
        })?;
        if !ready {
            return Err(RouterError::Configuration(format!(
                "adapter {chain_id} reported itself unavailable"
            )));
        }

        self.security.keys().ensure_key(&chain_id).await;

        let mut adapters = self.adapters.write().await;
        if adapters.iter().any(|a| a.chain_id() == chain_id) {
            warn!(chain_id, "adapter already registered; replacing");
            adapters.retain(|a| a.chain_id() != chain_id);
        }
        adapters.push(adapter);
        info!(chain_id, total = adapters.len(), "registered chain adapter");
        Ok(())
    }

    async fn adapters_snapshot(&self) -> Vec<Arc<dyn ChainAdapter>> {
        self.adapters.read().await.clone()
    }

    /// Route and execute one strategy request. The full failover loop runs
    /// inline; the returned result is final. Any internal error is caught
    /// here and converted into a structured failure.
    #[tracing::instrument(skip_all, fields(strategy = %genome.id, market = market))]
    pub async fn execute_strategy(
        &self,
        genome: &StrategyGenome,
        market: &str,
        params: &ExecutionParams,
    ) -> RouteExecution {
        let execution_id = Uuid::new_v4().to_string();
        self.total_executions.fetch_add(1, Ordering::Relaxed);

        let result = match self
            .execute_with_failover(&execution_id, genome, market, params)
            .await
        {
            Ok(result) => result,
            Err((err, attempts)) => {
                error!(execution_id = %execution_id, error = %err, attempts, "execution aborted");
                let risk = match &err {
                    RouterError::AuthorizationDenied { risk_score, .. } => *risk_score,
                    _ => 0.0,
                };
                RouteExecution::failure(execution_id, err.to_string(), attempts, risk)
            }
        };

        if result.success {
            self.successful_executions.fetch_add(1, Ordering::Relaxed);
            if let Some(outcome) = &result.outcome {
                self.total_execution_time_ms
                    .fetch_add(outcome.execution_time_ms, Ordering::Relaxed);
            }
        } else {
            self.failed_executions.fetch_add(1, Ordering::Relaxed);
        }
        result
    }

    /// Errors carry the attempt count consumed before the abort so the
    /// structured failure result reports it.
    async fn execute_with_failover(
        &self,
        execution_id: &str,
        genome: &StrategyGenome,
        market: &str,
        params: &ExecutionParams,
    ) -> Result<RouteExecution, (RouterError, u32)> {
        self.validate_request(genome, market, params)
            .await
            .map_err(|e| (e, 0))?;

        let adapters = self.adapters_snapshot().await;
        let mut excluded: HashSet<String> = HashSet::new();
        let mut attempt: u32 = 0;
        let created_at = epoch_ms();

        loop {
            // Selecting
            let statuses = self.health.statuses(&adapters).await;
            let selected = self
                .selector
                .select(&adapters, &statuses, genome, market, params, &excluded)
                .await;
            let selected = match selected {
                Some(selected) => selected,
                None if attempt == 0 => {
                    return Err((
                        RouterError::SystemUnavailable(
                            "no chain passed health and validation filters".to_string(),
                        ),
                        0,
                    ));
                }
                None => {
                    // Failover exhausted the candidate set.
                    self.retry_queue.remove(execution_id).await;
                    self.sink.emit(TelemetryEvent::ExecutionRetryFailed {
                        execution_id: execution_id.to_string(),
                        attempts: attempt,
                        last_error: "no remaining chain qualified".to_string(),
                    });
                    metrics::RETRIES.with_label_values(&["exhausted"]).inc();
                    return Ok(RouteExecution::failure(
                        execution_id.to_string(),
                        "no remaining chain qualified after failover".to_string(),
                        attempt,
                        0.0,
                    ));
                }
            };
            self.sink.emit(TelemetryEvent::ExecutionChainSelected {
                strategy_id: genome.id.clone(),
                chain_id: selected.chain_id.clone(),
                score: selected.score,
            });

            // Authorizing; a policy rejection is final, never retried.
            let auth = self
                .security
                .authorize_execution(genome, &selected.chain_id, market, params)
                .await;
            if !auth.is_authorized {
                self.retry_queue.remove(execution_id).await;
                return Err((
                    RouterError::AuthorizationDenied {
                        reason: auth
                            .reason
                            .unwrap_or_else(|| "authorization denied".to_string()),
                        risk_score: auth.risk_score,
                    },
                    attempt,
                ));
            }

            // Executing, bounded by the caller-supplied timeout.
            let outcome = match tokio::time::timeout(
                Duration::from_millis(params.timeout_ms),
                selected.adapter.execute_strategy(genome, market, params),
            )
            .await
            {
                Ok(Ok(outcome)) => outcome,
                Ok(Err(err)) => ExecutionOutcome::failure(format!("adapter error: {err}")),
                Err(_) => ExecutionOutcome::failure(format!(
                    "execution timed out after {}ms",
                    params.timeout_ms
                )),
            };

            // Record the outcome regardless of success.
            self.registry
                .record_execution(ExecutionRecord {
                    strategy_id: genome.id.clone(),
                    chain_id: selected.chain_id.clone(),
                    market: market.to_string(),
                    tx_id: outcome.transaction_id.clone(),
                    timestamp: outcome.timestamp,
                    fee_cost: outcome.fee_cost,
                    execution_time_ms: outcome.execution_time_ms,
                    success: outcome.success,
                    error: outcome.error.clone(),
                    slippage: outcome.actual_slippage,
                    block_height: outcome.block_height,
                })
                .await;
            self.security
                .record_execution_result(&genome.id, &selected.chain_id, market, outcome.success)
                .await;
            let outcome_label = if outcome.success { "success" } else { "failure" };
            metrics::EXECUTIONS
                .with_label_values(&[&selected.chain_id, outcome_label])
                .inc();
            metrics::EXECUTION_LATENCY
                .with_label_values(&[&selected.chain_id])
                .observe(outcome.execution_time_ms as f64 / 1_000.0);

            if outcome.success {
                if attempt > 0 {
                    self.retry_queue.remove(execution_id).await;
                    self.sink.emit(TelemetryEvent::ExecutionRetrySuccess {
                        execution_id: execution_id.to_string(),
                        chain_id: selected.chain_id.clone(),
                    });
                }
                info!(
                    execution_id,
                    chain = %selected.chain_id,
                    attempts = attempt,
                    time_ms = outcome.execution_time_ms,
                    "strategy executed"
                );
                return Ok(RouteExecution {
                    execution_id: execution_id.to_string(),
                    success: true,
                    chain_id: Some(selected.chain_id),
                    outcome: Some(outcome),
                    error: None,
                    attempts: attempt,
                    risk_score: auth.risk_score,
                });
            }

            // Failed on this chain; exclude it from further attempts.
            let last_error = outcome
                .error
                .clone()
                .unwrap_or_else(|| "execution failed".to_string());
            warn!(execution_id, chain = %selected.chain_id, error = %last_error, "chain execution failed");
            excluded.insert(selected.chain_id.clone());

            if !self.config.auto_retry_enabled || attempt >= self.config.max_retry_attempts {
                self.retry_queue.remove(execution_id).await;
                if self.config.auto_retry_enabled {
                    self.sink.emit(TelemetryEvent::ExecutionRetryFailed {
                        execution_id: execution_id.to_string(),
                        attempts: attempt,
                        last_error: last_error.clone(),
                    });
                    metrics::RETRIES.with_label_values(&["exhausted"]).inc();
                }
                return Ok(RouteExecution::failure(
                    execution_id.to_string(),
                    last_error,
                    attempt,
                    auth.risk_score,
                ));
            }

            // Retrying: queue the entry and wait out the backoff delay.
            attempt += 1;
            let shift = (attempt - 1).min(20);
            let delay_ms = self
                .config
                .retry_backoff_base_ms
                .saturating_mul(1u64 << shift);
            let entry_created_at = self
                .retry_queue
                .get(execution_id)
                .await
                .map(|e| e.created_at)
                .unwrap_or(created_at);
            self.retry_queue
                .upsert(RetryEntry {
                    execution_id: execution_id.to_string(),
                    attempts: attempt,
                    next_retry_timestamp: epoch_ms() + delay_ms,
                    last_error,
                    failed_chain_ids: excluded.iter().cloned().collect(),
                    created_at: entry_created_at,
                    last_attempt_at: epoch_ms(),
                    priority: 0,
                    genome: genome.clone(),
                    market: market.to_string(),
                    params: params.clone(),
                })
                .await;
            self.sink.emit(TelemetryEvent::ExecutionRetryQueued {
                execution_id: execution_id.to_string(),
                attempt,
                delay_ms,
            });
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            self.sink.emit(TelemetryEvent::ExecutionRetryAttempt {
                execution_id: execution_id.to_string(),
                attempt,
            });
            debug!(execution_id, attempt, "retrying on remaining chains");
        }
    }

    /// Context validation. Violations abort before any side effect.
    async fn validate_request(
        &self,
        genome: &StrategyGenome,
        market: &str,
        params: &ExecutionParams,
    ) -> Result<(), RouterError> {
        if genome.id.trim().is_empty() {
            return Err(RouterError::Validation("genome id is empty".to_string()));
        }
        if market.trim().is_empty() {
            return Err(RouterError::Validation("market is empty".to_string()));
        }
        if !(params.amount > 0.0) || !params.amount.is_finite() {
            return Err(RouterError::Validation(format!(
                "amount must be positive, got {}",
                params.amount
            )));
        }
        if !(0.0..=1.0).contains(&params.max_slippage) {
            return Err(RouterError::Validation(format!(
                "slippage tolerance must be in [0,1], got {}",
                params.max_slippage
            )));
        }
        if params.timeout_ms == 0 {
            return Err(RouterError::Validation("timeout must be positive".to_string()));
        }

        let adapters = self.adapters_snapshot().await;
        if adapters.is_empty() {
            return Err(RouterError::SystemUnavailable(
                "no chain adapters registered".to_string(),
            ));
        }
        let statuses = self.health.statuses(&adapters).await;
        if !statuses.iter().any(|s| s.score > 0.0) {
            return Err(RouterError::SystemUnavailable(
                "no healthy chain adapter available".to_string(),
            ));
        }
        if self.breakers.all_open().await {
            return Err(RouterError::SystemUnavailable(
                "all bridge circuit breakers are open".to_string(),
            ));
        }
        Ok(())
    }

    /// Run a bridge operation behind its circuit breaker.
    pub async fn execute_bridge_operation<T, F, Fut>(
        &self,
        bridge_id: &str,
        op: F,
    ) -> Result<T, RouterError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        self.breakers.call(bridge_id, op).await
    }

    /// Cheapest multi-hop bridge path between two registered chains.
    pub async fn find_optimal_path(&self, source: &str, target: &str) -> Option<PathResult> {
        let adapters = self.adapters_snapshot().await;
        let statuses = self.health.statuses(&adapters).await;

        let probe_genome = StrategyGenome::new("path-probe");
        let probe_params = ExecutionParams {
            amount: 1.0,
            max_slippage: 0.01,
            timeout_ms: PROBE_TIMEOUT.as_millis() as u64,
            gas_limit: None,
            regime: None,
            preferred_chain: None,
        };

        let estimates = futures::future::join_all(adapters.iter().map(|adapter| {
            let genome = probe_genome.clone();
            let params = probe_params.clone();
            let adapter = adapter.clone();
            async move {
                tokio::time::timeout(
                    PROBE_TIMEOUT,
                    adapter.estimate_fees(&genome, "", &params),
                )
                .await
            }
        }))
        .await;

        let nodes: Vec<ChainNode> = adapters
            .iter()
            .zip(estimates)
            .map(|(adapter, estimate)| {
                let chain_id = adapter.chain_id().to_string();
                let health = statuses
                    .iter()
                    .find(|s| s.chain_id == chain_id)
                    .map(|s| s.score)
                    .unwrap_or(0.0);
                match estimate {
                    Ok(Ok(fees)) => ChainNode {
                        chain_id,
                        fee: fees.estimated_fee,
                        latency_ms: fees.estimated_confirm_ms.average,
                        health,
                    },
                    _ => ChainNode {
                        chain_id,
                        fee: 0.0,
                        latency_ms: 0.0,
                        health: 0.0,
                    },
                }
            })
            .collect();

        path::find_optimal_path(&nodes, source, target)
    }

    /// Aggregated system health across all adapters.
    pub async fn system_health(&self) -> SystemHealth {
        let adapters = self.adapters_snapshot().await;
        self.health.system_health(&adapters, &*self.sink).await
    }

    pub fn stats(&self) -> ExecutionStats {
        let total = self.total_executions.load(Ordering::Relaxed);
        let successful = self.successful_executions.load(Ordering::Relaxed);
        let failed = self.failed_executions.load(Ordering::Relaxed);
        let total_time = self.total_execution_time_ms.load(Ordering::Relaxed);
        ExecutionStats {
            total_executions: total,
            successful_executions: successful,
            failed_executions: failed,
            avg_execution_time_ms: if successful > 0 {
                Some(total_time as f64 / successful as f64)
            } else {
                None
            },
            success_rate: if total > 0 {
                successful as f64 / total as f64
            } else {
                0.0
            },
        }
    }

    /// Start the background maintenance timers. None of them ever blocks an
    /// in-flight execution request.
    pub fn spawn_maintenance(router: &Arc<Self>) -> Vec<tokio::task::JoinHandle<()>> {
        let mut handles = Vec::new();

        handles.push(spawn_cleanup_task(
            router.retry_queue.clone(),
            Duration::from_millis(router.config.retry_cleanup_interval_ms),
        ));
        handles.push(spawn_rotation_task(
            router.security.keys().clone(),
            router.sink.clone(),
            KEY_ROTATION_CHECK,
        ));

        // Health/congestion polling keeps the probe cache warm.
        let router = Arc::clone(router);
        handles.push(tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval(Duration::from_millis(router.config.polling_interval_ms));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let adapters = router.adapters_snapshot().await;
                if !adapters.is_empty() {
                    let _ = router.health.statuses(&adapters).await;
                }
            }
        }));

        handles
    }
}

/// One-shot construction guard: the first caller runs the init future and
/// every concurrent caller joins it, so the router can never be built twice.
pub struct RouterFactory {
    cell: OnceCell<Arc<ExecutionRouter>>,
}

impl RouterFactory {
    pub const fn new() -> Self {
        Self {
            cell: OnceCell::const_new(),
        }
    }

    pub async fn get_or_init<F, Fut>(&self, init: F) -> Arc<ExecutionRouter>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Arc<ExecutionRouter>>,
    {
        self.cell.get_or_init(init).await.clone()
    }

    pub fn get(&self) -> Option<Arc<ExecutionRouter>> {
        self.cell.get().cloned()
    }
}

impl Default for RouterFactory {
    fn default() -> Self {
        Self::new()
    }
}
