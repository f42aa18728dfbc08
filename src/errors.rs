// Error types and error handling module
// This file defines the error taxonomy for the cross-chain execution router:
// validation, policy, adapter, configuration, and availability failures.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RouterError {
    /// Bad input rejected before any side effect.
    #[error("validation error: {0}")]
    Validation(String),
    /// Policy rejection from the security layer. Never retried.
    #[error("authorization denied: {reason} (risk {risk_score})")]
    AuthorizationDenied { reason: String, risk_score: f64 },
    /// Transient adapter failure, eligible for retry and circuit-breaking.
    #[error("adapter execution failure on {chain_id}: {message}")]
    AdapterExecution { chain_id: String, message: String },
    /// Invalid configuration that could not be auto-corrected.
    #[error("configuration error: {0}")]
    Configuration(String),
    /// Total outage: zero adapters, or every bridge breaker open.
    #[error("system unavailable: {0}")]
    SystemUnavailable(String),
    /// Bridge call rejected by an open circuit breaker.
    #[error("bridge circuit open for {0}")]
    BridgeCircuitOpen(String),
}

impl RouterError {
    /// Whether the router may reschedule this failure on another chain.
    pub fn is_retryable(&self) -> bool {
        matches!(self, RouterError::AdapterExecution { .. })
    }
}
