// Router HTTP API implementation
// This file provides HTTP endpoints for routed execution, path planning,
// deployment management, and statistics.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router as AxumRouter,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::adapters::{ExecutionParams, MarketRegime, StrategyGenome};
use crate::metrics;
use crate::registry::{ChainExecutionStats, DeploymentRecord};
use crate::router::breaker::BreakerSnapshot;
use crate::router::engine::{ExecutionRouter, ExecutionStats, RouteExecution};
use crate::router::health::SystemHealth;
use crate::router::path::PathResult;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

fn bad_request(message: impl Into<String>) -> (StatusCode, Json<ErrorResponse>) {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
}

/// Create the HTTP router with API endpoints
pub fn create_api_router(router: Arc<ExecutionRouter>) -> AxumRouter {
    AxumRouter::new()
        .route("/health", get(health_check))
        .route("/api/v1/execute", post(execute_strategy))
        .route("/api/v1/path", get(find_path))
        .route("/api/v1/stats", get(get_stats))
        .route("/api/v1/deployments", post(register_deployment))
        .route("/api/v1/deployments/:strategy_id", get(get_deployments))
        .route("/metrics", get(get_metrics))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(router)
}

/// Health check endpoint with aggregated per-chain detail
async fn health_check(State(router): State<Arc<ExecutionRouter>>) -> Json<SystemHealth> {
    Json(router.system_health().await)
}

#[derive(Debug, Deserialize)]
pub struct ExecuteRequest {
    pub strategy_id: String,
    pub market: String,
    pub amount: f64,
    pub max_slippage: f64,
    pub timeout_ms: Option<u64>,
    pub gas_limit: Option<f64>,
    pub regime: Option<MarketRegime>,
    pub preferred_chain: Option<String>,
    #[serde(default)]
    pub parameters: HashMap<String, serde_json::Value>,
}

/// Execute endpoint - routes the strategy and runs the failover loop.
/// The response always carries a final structured result; a routing or
/// policy failure is a 200 with success=false, not a 5xx.
async fn execute_strategy(
    State(router): State<Arc<ExecutionRouter>>,
    Json(req): Json<ExecuteRequest>,
) -> Json<RouteExecution> {
    let mut genome = StrategyGenome::new(req.strategy_id);
    genome.parameters = req.parameters;
    let params = ExecutionParams {
        amount: req.amount,
        max_slippage: req.max_slippage,
        timeout_ms: req.timeout_ms.unwrap_or(30_000),
        gas_limit: req.gas_limit,
        regime: req.regime,
        preferred_chain: req.preferred_chain,
    };
    Json(router.execute_strategy(&genome, &req.market, &params).await)
}

#[derive(Debug, Deserialize)]
pub struct PathQuery {
    pub source: String,
    pub target: String,
}

/// Path planning endpoint - cheapest bridge route between two chains
async fn find_path(
    State(router): State<Arc<ExecutionRouter>>,
    Query(query): Query<PathQuery>,
) -> Result<Json<PathResult>, (StatusCode, Json<ErrorResponse>)> {
    match router.find_optimal_path(&query.source, &query.target).await {
        Some(path) => Ok(Json(path)),
        None => Err(bad_request(format!(
            "no bridge path from {} to {}",
            query.source, query.target
        ))),
    }
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub execution: ExecutionStats,
    pub retry_queue_depth: usize,
    pub bridge_breakers: Vec<BreakerSnapshot>,
}

/// Get execution, retry-queue, and circuit-breaker statistics
async fn get_stats(State(router): State<Arc<ExecutionRouter>>) -> Json<StatsResponse> {
    Json(StatsResponse {
        execution: router.stats(),
        retry_queue_depth: router.retry_queue().len().await,
        bridge_breakers: router.breakers().snapshot().await,
    })
}

#[derive(Debug, Deserialize)]
pub struct RegisterDeploymentRequest {
    pub strategy_id: String,
    pub chain_id: String,
    pub address: String,
    pub bytecode_hash: String,
    pub abi_version: String,
    #[serde(default)]
    pub parameters: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Serialize)]
pub struct RegisterDeploymentResponse {
    pub registered: bool,
}

/// Register a strategy deployment
async fn register_deployment(
    State(router): State<Arc<ExecutionRouter>>,
    Json(req): Json<RegisterDeploymentRequest>,
) -> Result<Json<RegisterDeploymentResponse>, (StatusCode, Json<ErrorResponse>)> {
    let mut genome = StrategyGenome::new(req.strategy_id.clone());
    genome.parameters = req.parameters;
    let registered = router
        .registry()
        .register_deployment(
            &req.strategy_id,
            &req.chain_id,
            &req.address,
            &genome,
            &req.bytecode_hash,
            &req.abi_version,
            req.metadata,
        )
        .await;
    if !registered {
        return Err(bad_request("deployment rejected: empty key field"));
    }
    Ok(Json(RegisterDeploymentResponse { registered }))
}

#[derive(Debug, Deserialize)]
pub struct DeploymentsQuery {
    pub market: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct DeploymentsResponse {
    pub deployments: Vec<DeploymentRecord>,
    pub stats: Vec<ChainExecutionStats>,
    pub optimal_chain: Option<String>,
}

/// Get deployments and per-chain execution stats for a strategy
async fn get_deployments(
    State(router): State<Arc<ExecutionRouter>>,
    Path(strategy_id): Path<String>,
    Query(query): Query<DeploymentsQuery>,
) -> Json<DeploymentsResponse> {
    let deployments = router.registry().deployments_for(&strategy_id).await;
    let (stats, optimal_chain) = match query.market {
        Some(market) => (
            router.registry().stats_for(&strategy_id, &market).await,
            router.registry().optimal_chain(&strategy_id, &market).await,
        ),
        None => (Vec::new(), None),
    };
    Json(DeploymentsResponse {
        deployments,
        stats,
        optimal_chain,
    })
}

/// Prometheus exposition endpoint
async fn get_metrics() -> String {
    metrics::encode_text()
}
