// Telemetry event sink
// Fire-and-forget event emission consumed by external observability tooling.
// A sink failure must never fail the operation that emitted the event.

use crate::metrics;
use serde::Serialize;
use std::sync::Mutex;
use tracing::debug;

/// Named events emitted by the router core.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TelemetryEvent {
    ExecutionChainSelected {
        strategy_id: String,
        chain_id: String,
        score: f64,
    },
    ExecutionAuthorizationGranted {
        strategy_id: String,
        chain_id: String,
        risk_score: f64,
    },
    ExecutionAuthorizationRejected {
        strategy_id: String,
        chain_id: String,
        reason: String,
        risk_score: f64,
    },
    ExecutionRetryQueued {
        execution_id: String,
        attempt: u32,
        delay_ms: u64,
    },
    ExecutionRetryAttempt {
        execution_id: String,
        attempt: u32,
    },
    ExecutionRetrySuccess {
        execution_id: String,
        chain_id: String,
    },
    ExecutionRetryFailed {
        execution_id: String,
        attempts: u32,
        last_error: String,
    },
    BridgeCircuitBreakerOpened {
        bridge_id: String,
        failure_count: u32,
        timeout_ms: u64,
    },
    BridgeCircuitBreakerClosed {
        bridge_id: String,
    },
    SystemHealthCheckCompleted {
        healthy: usize,
        degraded: usize,
        unhealthy: usize,
        status: String,
    },
    KeyRotated {
        chain_id: String,
        retired_key_id: String,
        new_key_id: String,
    },
}

impl TelemetryEvent {
    pub fn name(&self) -> &'static str {
        match self {
            TelemetryEvent::ExecutionChainSelected { .. } => "execution_chain_selected",
            TelemetryEvent::ExecutionAuthorizationGranted { .. } => {
                "execution_authorization_granted"
            }
            TelemetryEvent::ExecutionAuthorizationRejected { .. } => {
                "execution_authorization_rejected"
            }
            TelemetryEvent::ExecutionRetryQueued { .. } => "execution_retry_queued",
            TelemetryEvent::ExecutionRetryAttempt { .. } => "execution_retry_attempt",
            TelemetryEvent::ExecutionRetrySuccess { .. } => "execution_retry_success",
            TelemetryEvent::ExecutionRetryFailed { .. } => "execution_retry_failed",
            TelemetryEvent::BridgeCircuitBreakerOpened { .. } => "bridge_circuit_breaker_opened",
            TelemetryEvent::BridgeCircuitBreakerClosed { .. } => "bridge_circuit_breaker_closed",
            TelemetryEvent::SystemHealthCheckCompleted { .. } => "system_health_check_completed",
            TelemetryEvent::KeyRotated { .. } => "key_rotated",
        }
    }
}

/// Append-only event sink, called synchronously. Implementations must be
/// cheap and must never propagate an error to the caller.
pub trait TelemetrySink: Send + Sync {
    fn emit(&self, event: TelemetryEvent);
}

/// Default sink: structured log line plus a prometheus counter bump.
pub struct TracingSink;

impl TelemetrySink for TracingSink {
    fn emit(&self, event: TelemetryEvent) {
        match serde_json::to_string(&event) {
            Ok(json) => debug!(event = event.name(), payload = %json, "telemetry"),
            Err(_) => debug!(event = event.name(), "telemetry"),
        }
        if let TelemetryEvent::ExecutionRetryQueued { .. } = &event {
            metrics::RETRIES.with_label_values(&["queued"]).inc();
        }
    }
}

/// Test sink that records every emitted event.
pub struct CapturingSink {
    events: Mutex<Vec<TelemetryEvent>>,
}

impl CapturingSink {
    pub fn new() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
        }
    }

    pub fn events(&self) -> Vec<TelemetryEvent> {
        self.events.lock().map(|g| g.clone()).unwrap_or_default()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.events().iter().map(|e| e.name()).collect()
    }
}

impl Default for CapturingSink {
    fn default() -> Self {
        Self::new()
    }
}

impl TelemetrySink for CapturingSink {
    fn emit(&self, event: TelemetryEvent) {
        if let Ok(mut guard) = self.events.lock() {
            guard.push(event);
        }
    }
}
