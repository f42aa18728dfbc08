// Chain adapter module
// This file defines the uniform contract implemented by chain-specific
// execution backends, plus the request/outcome types that flow through the
// router, registry, and security layer.

pub mod simulated;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since the Unix epoch.
pub fn epoch_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Opaque strategy identity and parameter bundle being routed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyGenome {
    pub id: String,
    pub parameters: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl StrategyGenome {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            parameters: HashMap::new(),
            metadata: HashMap::new(),
        }
    }
}

/// Classified market condition used as a chain-affinity scoring input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarketRegime {
    Trending,
    Ranging,
    Volatile,
    Calm,
}

impl MarketRegime {
    pub fn as_str(&self) -> &'static str {
        match self {
            MarketRegime::Trending => "trending",
            MarketRegime::Ranging => "ranging",
            MarketRegime::Volatile => "volatile",
            MarketRegime::Calm => "calm",
        }
    }
}

/// Per-request execution parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionParams {
    pub amount: f64,
    /// Requested slippage tolerance in [0, 1].
    pub max_slippage: f64,
    pub timeout_ms: u64,
    /// Requested gas/fee budget, checked against per-chain ceilings.
    pub gas_limit: Option<f64>,
    pub regime: Option<MarketRegime>,
    /// Chain the caller would prefer when deployment bias applies.
    pub preferred_chain: Option<String>,
}

/// Outcome of a single adapter execution attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    pub success: bool,
    pub transaction_id: Option<String>,
    pub fee_cost: f64,
    pub execution_time_ms: u64,
    pub error: Option<String>,
    pub actual_slippage: Option<f64>,
    pub block_height: Option<u64>,
    pub timestamp: u64,
}

impl ExecutionOutcome {
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            transaction_id: None,
            fee_cost: 0.0,
            execution_time_ms: 0,
            error: Some(message.into()),
            actual_slippage: None,
            block_height: None,
            timestamp: epoch_ms(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FeeTiers {
    pub slow: f64,
    pub average: f64,
    pub fast: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeeEstimate {
    pub estimated_fee: f64,
    /// Current congestion in [0, 1].
    pub network_congestion: f64,
    pub recommended_fees: FeeTiers,
    /// Estimated confirmation times in milliseconds per fee tier.
    pub estimated_confirm_ms: FeeTiers,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainHealth {
    pub is_operational: bool,
    pub current_block_height: u64,
    pub latest_block_timestamp: u64,
    pub average_block_time_ms: u64,
    pub network_congestion: f64,
    pub current_tps: f64,
    pub rpc_response_time_ms: u64,
    pub is_configured: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyValidation {
    pub is_valid: bool,
    pub errors: Vec<String>,
}

impl StrategyValidation {
    pub fn valid() -> Self {
        Self {
            is_valid: true,
            errors: Vec::new(),
        }
    }

    pub fn invalid(errors: Vec<String>) -> Self {
        Self {
            is_valid: false,
            errors,
        }
    }
}

/// Chain-specific execution backend behind a uniform contract.
///
/// Implementations live outside the core (Ethereum/Solana/Cosmos clients);
/// the router only consumes this seam. Every call is expected to return
/// promptly; the router additionally bounds each call with a timeout.
#[async_trait]
pub trait ChainAdapter: Send + Sync {
    fn chain_id(&self) -> &str;

    /// Bring up the backend. Returns false when the chain is unreachable.
    async fn initialize(&self) -> Result<bool>;

    async fn execute_strategy(
        &self,
        genome: &StrategyGenome,
        market: &str,
        params: &ExecutionParams,
    ) -> Result<ExecutionOutcome>;

    async fn estimate_fees(
        &self,
        genome: &StrategyGenome,
        market: &str,
        params: &ExecutionParams,
    ) -> Result<FeeEstimate>;

    async fn health(&self) -> Result<ChainHealth>;

    async fn validate_strategy(&self, genome: &StrategyGenome) -> Result<StrategyValidation>;
}
