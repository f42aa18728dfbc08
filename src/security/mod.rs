// Execution security layer
// Independent policy gate in front of the router: an ordered authorization
// waterfall (allow-list, rate window, fee/value ceilings, slashing
// protection, key presence) that short-circuits on the first failing check,
// each check carrying its own risk score.

pub mod keys;
pub mod token;

use crate::adapters::{ExecutionParams, StrategyGenome};
use crate::config::RouterConfig;
use crate::metrics;
use crate::registry::DeploymentRegistry;
use crate::telemetry::{TelemetryEvent, TelemetrySink};
use keys::KeyStore;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Risk scores attached to each rejecting check.
const RISK_CHAIN_NOT_ALLOWED: f64 = 1.0;
const RISK_RATE_LIMITED: f64 = 0.9;
const RISK_VALUE_EXCEEDED: f64 = 0.85;
const RISK_GAS_EXCEEDED: f64 = 0.8;
const RISK_SLIPPAGE_EXCEEDED: f64 = 0.7;
const RISK_REPEATED_FAILURES: f64 = 0.6;
const RISK_NO_SIGNING_KEY: f64 = 0.5;

/// Ephemeral result of an authorization pass.
#[derive(Debug, Clone, Serialize)]
pub struct AuthorizationResult {
    pub is_authorized: bool,
    pub reason: Option<String>,
    pub auth_token: Option<String>,
    pub expiration_timestamp: Option<u64>,
    pub risk_score: f64,
}

impl AuthorizationResult {
    fn denied(reason: impl Into<String>, risk_score: f64) -> Self {
        Self {
            is_authorized: false,
            reason: Some(reason.into()),
            auth_token: None,
            expiration_timestamp: None,
            risk_score,
        }
    }
}

/// Trailing-window request counter. Timestamps older than the window are
/// dropped on every check.
struct RateWindow {
    timestamps: VecDeque<Instant>,
    window: Duration,
    max_requests: usize,
}

impl RateWindow {
    fn new(window: Duration, max_requests: usize) -> Self {
        Self {
            timestamps: VecDeque::with_capacity(max_requests.min(1024)),
            window,
            max_requests,
        }
    }

    /// Try to admit one request. Returns (admitted, usage before this one).
    fn try_admit(&mut self) -> (bool, usize) {
        let now = Instant::now();
        while let Some(front) = self.timestamps.front() {
            if now.duration_since(*front) > self.window {
                self.timestamps.pop_front();
            } else {
                break;
            }
        }
        let current = self.timestamps.len();
        if current >= self.max_requests {
            return (false, current);
        }
        self.timestamps.push_back(now);
        (true, current)
    }
}

pub struct SecurityLayer {
    config: Arc<RouterConfig>,
    registry: Arc<DeploymentRegistry>,
    keys: Arc<KeyStore>,
    rate: Mutex<RateWindow>,
    sink: Arc<dyn TelemetrySink>,
}

impl SecurityLayer {
    pub fn new(
        config: Arc<RouterConfig>,
        registry: Arc<DeploymentRegistry>,
        keys: Arc<KeyStore>,
        sink: Arc<dyn TelemetrySink>,
    ) -> Self {
        let rate = RateWindow::new(
            Duration::from_millis(config.rate_limit_window_ms),
            config.rate_limit_max_requests,
        );
        Self {
            config,
            registry,
            keys,
            rate: Mutex::new(rate),
            sink,
        }
    }

    pub fn keys(&self) -> &Arc<KeyStore> {
        &self.keys
    }

    fn reject(
        &self,
        genome: &StrategyGenome,
        chain_id: &str,
        check: &'static str,
        reason: String,
        risk: f64,
    ) -> AuthorizationResult {
        metrics::AUTH_REJECTIONS.with_label_values(&[check]).inc();
        self.sink.emit(TelemetryEvent::ExecutionAuthorizationRejected {
            strategy_id: genome.id.clone(),
            chain_id: chain_id.to_string(),
            reason: reason.clone(),
            risk_score: risk,
        });
        debug!(strategy = %genome.id, chain_id, check, %reason, "authorization rejected");
        AuthorizationResult::denied(reason, risk)
    }

    /// Ordered authorization waterfall. Short-circuits on the first failing
    /// check with that check's own risk score; on pass, the returned risk
    /// score accumulates the proportional contributions of the passed
    /// checks and a signed token is attached.
    pub async fn authorize_execution(
        &self,
        genome: &StrategyGenome,
        chain_id: &str,
        market: &str,
        params: &ExecutionParams,
    ) -> AuthorizationResult {
        let mut risk = 0.0_f64;

        // 1. Chain allow-list.
        if !self.config.allowed_chains.iter().any(|c| c == chain_id) {
            return self.reject(
                genome,
                chain_id,
                "chain_allowlist",
                format!("chain {chain_id} is not on the allow-list"),
                RISK_CHAIN_NOT_ALLOWED,
            );
        }

        // 2. Trailing-window rate limit.
        {
            let mut rate = self.rate.lock().await;
            let (admitted, usage) = rate.try_admit();
            if !admitted {
                return self.reject(
                    genome,
                    chain_id,
                    "rate_limit",
                    format!(
                        "rate limit exceeded: {usage} requests in trailing window (max {})",
                        rate.max_requests
                    ),
                    RISK_RATE_LIMITED,
                );
            }
            risk += usage as f64 / rate.max_requests as f64 * 0.1;
        }

        // 3. Requested gas/fee against the per-chain ceiling.
        if let (Some(requested), Some(ceiling)) =
            (params.gas_limit, self.config.max_gas_limits.get(chain_id))
        {
            if requested > *ceiling {
                return self.reject(
                    genome,
                    chain_id,
                    "gas_ceiling",
                    format!("requested gas {requested} exceeds chain ceiling {ceiling}"),
                    RISK_GAS_EXCEEDED,
                );
            }
            risk += requested / ceiling * 0.1;
        }

        // 4. Slashing protection: slippage tolerance and repeated failures.
        if self.config.slashing_protection.enabled {
            let max_slippage = self.config.slashing_protection.max_slippage;
            if params.max_slippage > max_slippage {
                return self.reject(
                    genome,
                    chain_id,
                    "slippage_ceiling",
                    format!(
                        "slippage tolerance {} exceeds ceiling {max_slippage}",
                        params.max_slippage
                    ),
                    RISK_SLIPPAGE_EXCEEDED,
                );
            }
            risk += params.max_slippage / max_slippage * 0.05;

            let failures = self
                .registry
                .consecutive_failures(&genome.id, chain_id, market)
                .await;
            let max_failures = self.config.slashing_protection.max_consecutive_failures;
            if failures >= max_failures {
                return self.reject(
                    genome,
                    chain_id,
                    "consecutive_failures",
                    format!("{failures} consecutive failures on {chain_id} (max {max_failures})"),
                    RISK_REPEATED_FAILURES,
                );
            }
            risk += failures as f64 / max_failures as f64 * 0.05;
        }

        // 5. Transaction value against the per-chain ceiling; within bound it
        // still contributes proportionally to the risk score.
        if let Some(ceiling) = self.config.max_tx_value_limits.get(chain_id) {
            if params.amount > *ceiling {
                return self.reject(
                    genome,
                    chain_id,
                    "tx_value_ceiling",
                    format!(
                        "transaction value {} exceeds chain ceiling {ceiling}",
                        params.amount
                    ),
                    RISK_VALUE_EXCEEDED,
                );
            }
            risk += params.amount / ceiling * 0.2;
        }

        // 6. An active signing key must exist for the chain.
        let signing_key = match self.keys.signing_key(chain_id).await {
            Some(key) => key,
            None => {
                return self.reject(
                    genome,
                    chain_id,
                    "signing_key",
                    format!("no active signing key for chain {chain_id}"),
                    RISK_NO_SIGNING_KEY,
                );
            }
        };

        let (auth_token, expiration) = match token::mint_token(
            &signing_key,
            &genome.id,
            chain_id,
            market,
            params.amount,
        ) {
            Ok(minted) => minted,
            Err(err) => {
                // Token minting failure is internal, not a policy rejection,
                // but the caller still must not execute.
                warn!(error = %err, chain_id, "failed to mint authorization token");
                return self.reject(
                    genome,
                    chain_id,
                    "token_mint",
                    format!("failed to mint authorization token: {err}"),
                    RISK_NO_SIGNING_KEY,
                );
            }
        };

        self.sink.emit(TelemetryEvent::ExecutionAuthorizationGranted {
            strategy_id: genome.id.clone(),
            chain_id: chain_id.to_string(),
            risk_score: risk,
        });

        AuthorizationResult {
            is_authorized: true,
            reason: None,
            auth_token: Some(auth_token),
            expiration_timestamp: Some(expiration),
            risk_score: risk,
        }
    }

    /// Verify a previously minted token against the chain's active key.
    pub async fn verify_token(
        &self,
        chain_id: &str,
        auth_token: &str,
    ) -> Result<token::TokenClaims, crate::errors::RouterError> {
        let key = self.keys.verifying_key(chain_id).await.ok_or_else(|| {
            crate::errors::RouterError::Validation(format!("no active key for chain {chain_id}"))
        })?;
        token::verify_token(&key, auth_token)
    }

    /// Post-execution bookkeeping hook. The registry already owns the
    /// consecutive-failure counter; this warns as a chain approaches the
    /// configured maximum.
    pub async fn record_execution_result(
        &self,
        strategy_id: &str,
        chain_id: &str,
        market: &str,
        success: bool,
    ) {
        if success {
            return;
        }
        let failures = self
            .registry
            .consecutive_failures(strategy_id, chain_id, market)
            .await;
        let max = self.config.slashing_protection.max_consecutive_failures;
        if max > 0 && failures + 1 >= max {
            warn!(
                strategy_id,
                chain_id,
                market,
                failures,
                max,
                "consecutive failures approaching slashing-protection limit"
            );
        }
    }
}
