// Bridge circuit breakers
// Per-bridge closed/open/half-open failure isolation. A thrown error from
// the wrapped operation counts as a breaker failure, a normal return as a
// success, independent of the router's retry state machine.

use crate::errors::RouterError;
use crate::metrics;
use crate::telemetry::{TelemetryEvent, TelemetrySink};
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

pub const MAX_FAILURES: u32 = 5;
pub const BASE_TIMEOUT: Duration = Duration::from_secs(30);
pub const MAX_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, Serialize)]
pub struct BreakerSnapshot {
    pub bridge_id: String,
    pub state: BreakerState,
    pub failure_count: u32,
    pub timeout_ms: u64,
}

struct Breaker {
    state: BreakerState,
    failure_count: u32,
    last_failure: Option<Instant>,
    next_retry: Option<Instant>,
    timeout: Duration,
}

impl Default for Breaker {
    fn default() -> Self {
        Self {
            state: BreakerState::Closed,
            failure_count: 0,
            last_failure: None,
            next_retry: None,
            timeout: BASE_TIMEOUT,
        }
    }
}

pub struct BridgeBreakers {
    inner: Mutex<HashMap<String, Breaker>>,
    sink: Arc<dyn TelemetrySink>,
}

impl BridgeBreakers {
    pub fn new(sink: Arc<dyn TelemetrySink>) -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
            sink,
        }
    }

    /// Run `op` behind the bridge's breaker. While open (and before the
    /// scheduled retry time) the call is rejected without invoking `op`.
    pub async fn call<T, F, Fut>(&self, bridge_id: &str, op: F) -> Result<T, RouterError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        // Admission check; open breakers past next_retry move to half-open.
        {
            let mut inner = self.inner.lock().await;
            let breaker = inner.entry(bridge_id.to_string()).or_default();
            if breaker.state == BreakerState::Open {
                let due = breaker
                    .next_retry
                    .map(|at| Instant::now() >= at)
                    .unwrap_or(true);
                if !due {
                    return Err(RouterError::BridgeCircuitOpen(bridge_id.to_string()));
                }
                breaker.state = BreakerState::HalfOpen;
                debug!(bridge_id, "bridge breaker half-open, probing");
            }
        }

        match op().await {
            Ok(value) => {
                self.record_success(bridge_id).await;
                Ok(value)
            }
            Err(err) => {
                self.record_failure(bridge_id).await;
                Err(RouterError::AdapterExecution {
                    chain_id: bridge_id.to_string(),
                    message: format!("bridge operation failed: {err}"),
                })
            }
        }
    }

    async fn record_success(&self, bridge_id: &str) {
        let mut inner = self.inner.lock().await;
        let breaker = inner.entry(bridge_id.to_string()).or_default();
        match breaker.state {
            BreakerState::HalfOpen => {
                breaker.state = BreakerState::Closed;
                breaker.failure_count = 0;
                breaker.timeout = BASE_TIMEOUT;
                breaker.next_retry = None;
                metrics::BREAKER_TRANSITIONS
                    .with_label_values(&[bridge_id, "closed"])
                    .inc();
                self.sink.emit(TelemetryEvent::BridgeCircuitBreakerClosed {
                    bridge_id: bridge_id.to_string(),
                });
            }
            BreakerState::Closed => {
                // A success interrupts the consecutive-failure streak.
                breaker.failure_count = 0;
            }
            BreakerState::Open => {}
        }
    }

    async fn record_failure(&self, bridge_id: &str) {
        let mut inner = self.inner.lock().await;
        let breaker = inner.entry(bridge_id.to_string()).or_default();
        breaker.last_failure = Some(Instant::now());
        match breaker.state {
            BreakerState::HalfOpen => {
                // Re-open with a doubled timeout, capped at five minutes.
                breaker.timeout = (breaker.timeout * 2).min(MAX_TIMEOUT);
                open_breaker(breaker, bridge_id, &*self.sink);
            }
            BreakerState::Closed => {
                breaker.failure_count += 1;
                if breaker.failure_count >= MAX_FAILURES {
                    open_breaker(breaker, bridge_id, &*self.sink);
                }
            }
            BreakerState::Open => {}
        }
    }

    pub async fn is_open(&self, bridge_id: &str) -> bool {
        let inner = self.inner.lock().await;
        inner
            .get(bridge_id)
            .map(|b| b.state == BreakerState::Open)
            .unwrap_or(false)
    }

    /// True when at least one breaker is tracked and every one of them is
    /// open. Used by the router's total-outage guard.
    pub async fn all_open(&self) -> bool {
        let inner = self.inner.lock().await;
        !inner.is_empty() && inner.values().all(|b| b.state == BreakerState::Open)
    }

    pub async fn snapshot(&self) -> Vec<BreakerSnapshot> {
        let inner = self.inner.lock().await;
        inner
            .iter()
            .map(|(bridge_id, b)| BreakerSnapshot {
                bridge_id: bridge_id.clone(),
                state: b.state,
                failure_count: b.failure_count,
                timeout_ms: b.timeout.as_millis() as u64,
            })
            .collect()
    }
}

fn open_breaker(breaker: &mut Breaker, bridge_id: &str, sink: &dyn TelemetrySink) {
    breaker.state = BreakerState::Open;
    breaker.next_retry = Some(Instant::now() + breaker.timeout);
    warn!(
        bridge_id,
        failures = breaker.failure_count,
        timeout_ms = breaker.timeout.as_millis() as u64,
        "bridge circuit breaker opened"
    );
    metrics::BREAKER_TRANSITIONS
        .with_label_values(&[bridge_id, "open"])
        .inc();
    sink.emit(TelemetryEvent::BridgeCircuitBreakerOpened {
        bridge_id: bridge_id.to_string(),
        failure_count: breaker.failure_count,
        timeout_ms: breaker.timeout.as_millis() as u64,
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::CapturingSink;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn breakers() -> (BridgeBreakers, Arc<CapturingSink>) {
        let sink = Arc::new(CapturingSink::new());
        (BridgeBreakers::new(sink.clone()), sink)
    }

    #[tokio::test]
    async fn opens_after_exactly_five_consecutive_failures() {
        let (breakers, sink) = breakers();
        for i in 0..5 {
            assert!(
                !breakers.is_open("wormhole").await,
                "breaker open after only {i} failures"
            );
            let _ = breakers
                .call("wormhole", || async { anyhow::bail!("down") })
                .await
                .map(|_: ()| ());
        }
        assert!(breakers.is_open("wormhole").await);
        assert!(sink
            .names()
            .contains(&"bridge_circuit_breaker_opened"));
    }

    #[tokio::test]
    async fn open_breaker_rejects_without_invoking_operation() {
        let (breakers, _) = breakers();
        for _ in 0..5 {
            let _ = breakers
                .call("wormhole", || async { anyhow::bail!("down") })
                .await
                .map(|_: ()| ());
        }
        let invoked = AtomicU32::new(0);
        let result = breakers
            .call("wormhole", || async {
                invoked.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await;
        assert!(matches!(result, Err(RouterError::BridgeCircuitOpen(_))));
        assert_eq!(invoked.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn success_in_closed_state_resets_failure_streak() {
        let (breakers, _) = breakers();
        for _ in 0..4 {
            let _ = breakers
                .call("axelar", || async { anyhow::bail!("down") })
                .await
                .map(|_: ()| ());
        }
        breakers.call("axelar", || async { Ok(()) }).await.unwrap();
        // Four more failures still do not reach the threshold.
        for _ in 0..4 {
            let _ = breakers
                .call("axelar", || async { anyhow::bail!("down") })
                .await
                .map(|_: ()| ());
        }
        assert!(!breakers.is_open("axelar").await);
    }

    #[tokio::test(start_paused = true)]
    async fn half_open_success_closes_and_resets() {
        let (breakers, sink) = breakers();
        for _ in 0..5 {
            let _ = breakers
                .call("wormhole", || async { anyhow::bail!("down") })
                .await
                .map(|_: ()| ());
        }
        assert!(breakers.is_open("wormhole").await);

        // Advance past the retry timeout; next call probes half-open.
        tokio::time::advance(BASE_TIMEOUT + Duration::from_secs(1)).await;
        breakers.call("wormhole", || async { Ok(()) }).await.unwrap();

        let snapshot = breakers.snapshot().await;
        let entry = snapshot.iter().find(|s| s.bridge_id == "wormhole").unwrap();
        assert_eq!(entry.state, BreakerState::Closed);
        assert_eq!(entry.failure_count, 0);
        assert_eq!(entry.timeout_ms, BASE_TIMEOUT.as_millis() as u64);
        assert!(sink.names().contains(&"bridge_circuit_breaker_closed"));
    }

    #[tokio::test(start_paused = true)]
    async fn half_open_failure_reopens_with_doubled_timeout() {
        let (breakers, _) = breakers();
        for _ in 0..5 {
            let _ = breakers
                .call("wormhole", || async { anyhow::bail!("down") })
                .await
                .map(|_: ()| ());
        }
        tokio::time::advance(BASE_TIMEOUT + Duration::from_secs(1)).await;
        let _ = breakers
            .call("wormhole", || async { anyhow::bail!("still down") })
            .await
            .map(|_: ()| ());

        let snapshot = breakers.snapshot().await;
        let entry = snapshot.iter().find(|s| s.bridge_id == "wormhole").unwrap();
        assert_eq!(entry.state, BreakerState::Open);
        assert_eq!(entry.timeout_ms, (BASE_TIMEOUT * 2).as_millis() as u64);
    }

    #[tokio::test]
    async fn all_open_requires_every_tracked_bridge() {
        let (breakers, _) = breakers();
        assert!(!breakers.all_open().await);
        for _ in 0..5 {
            let _ = breakers
                .call("wormhole", || async { anyhow::bail!("down") })
                .await
                .map(|_: ()| ());
        }
        breakers.call("axelar", || async { Ok(()) }).await.unwrap();
        assert!(!breakers.all_open().await);
    }
}
