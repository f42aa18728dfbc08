// Retry queue
// Tracks failed executions awaiting a backoff retry. Hard-capped with
// oldest-first eviction; a periodic sweep drops entries past their TTL and
// trims overflow, logging the purge counts.

use crate::adapters::{epoch_ms, ExecutionParams, StrategyGenome};
use crate::metrics;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// One failed execution awaiting retry. Carries the original request so the
/// router can re-run it against a different chain.
#[derive(Debug, Clone, Serialize)]
pub struct RetryEntry {
    pub execution_id: String,
    pub attempts: u32,
    pub next_retry_timestamp: u64,
    pub last_error: String,
    pub failed_chain_ids: Vec<String>,
    pub created_at: u64,
    pub last_attempt_at: u64,
    pub priority: u8,
    #[serde(skip)]
    pub genome: StrategyGenome,
    pub market: String,
    #[serde(skip)]
    pub params: ExecutionParams,
}

pub struct RetryQueue {
    entries: Mutex<HashMap<String, RetryEntry>>,
    max_size: usize,
    ttl_ms: u64,
}

impl RetryQueue {
    pub fn new(max_size: usize, ttl_ms: u64) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            max_size: max_size.max(1),
            ttl_ms,
        }
    }

    /// Insert or update an entry. Over the hard cap, the oldest-created
    /// entry is evicted first.
    pub async fn upsert(&self, entry: RetryEntry) {
        let mut entries = self.entries.lock().await;
        entries.insert(entry.execution_id.clone(), entry);
        while entries.len() > self.max_size {
            let oldest = entries
                .values()
                .min_by_key(|e| e.created_at)
                .map(|e| e.execution_id.clone());
            match oldest {
                Some(id) => {
                    entries.remove(&id);
                    metrics::RETRIES.with_label_values(&["evicted_overflow"]).inc();
                    debug!(execution_id = %id, "evicted oldest retry entry over cap");
                }
                None => break,
            }
        }
    }

    pub async fn remove(&self, execution_id: &str) -> Option<RetryEntry> {
        let mut entries = self.entries.lock().await;
        entries.remove(execution_id)
    }

    pub async fn get(&self, execution_id: &str) -> Option<RetryEntry> {
        let entries = self.entries.lock().await;
        entries.get(execution_id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    pub async fn snapshot(&self) -> Vec<RetryEntry> {
        let entries = self.entries.lock().await;
        entries.values().cloned().collect()
    }

    /// Drop entries past the TTL, then trim overflow oldest-first. Returns
    /// (expired, overflow) purge counts.
    pub async fn cleanup(&self) -> (usize, usize) {
        let now = epoch_ms();
        let mut entries = self.entries.lock().await;

        let before = entries.len();
        entries.retain(|_, e| now.saturating_sub(e.created_at) <= self.ttl_ms);
        let expired = before - entries.len();

        let mut overflow = 0;
        while entries.len() > self.max_size {
            let oldest = entries
                .values()
                .min_by_key(|e| e.created_at)
                .map(|e| e.execution_id.clone());
            match oldest {
                Some(id) => {
                    entries.remove(&id);
                    overflow += 1;
                }
                None => break,
            }
        }

        if expired > 0 || overflow > 0 {
            info!(expired, overflow, remaining = entries.len(), "retry queue sweep purged entries");
            metrics::RETRIES
                .with_label_values(&["purged"])
                .inc_by((expired + overflow) as f64);
        }
        (expired, overflow)
    }
}

/// Spawn the periodic cleanup sweep.
pub fn spawn_cleanup_task(
    queue: Arc<RetryQueue>,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            queue.cleanup().await;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: &str, created_at: u64) -> RetryEntry {
        RetryEntry {
            execution_id: id.to_string(),
            attempts: 1,
            next_retry_timestamp: created_at + 1_000,
            last_error: "boom".to_string(),
            failed_chain_ids: vec!["ethereum".to_string()],
            created_at,
            last_attempt_at: created_at,
            priority: 0,
            genome: StrategyGenome::new("s1"),
            market: "ETH-USD".to_string(),
            params: ExecutionParams {
                amount: 1.0,
                max_slippage: 0.01,
                timeout_ms: 1_000,
                gas_limit: None,
                regime: None,
                preferred_chain: None,
            },
        }
    }

    #[tokio::test]
    async fn overflow_evicts_oldest_created_first() {
        let queue = RetryQueue::new(2, u64::MAX / 2);
        let now = epoch_ms();
        queue.upsert(entry("a", now - 3_000)).await;
        queue.upsert(entry("b", now - 2_000)).await;
        queue.upsert(entry("c", now - 1_000)).await;
        assert_eq!(queue.len().await, 2);
        assert!(queue.get("a").await.is_none());
        assert!(queue.get("b").await.is_some());
        assert!(queue.get("c").await.is_some());
    }

    #[tokio::test]
    async fn cleanup_enforces_ttl_and_cap() {
        let ttl = 24 * 60 * 60 * 1000u64;
        let queue = RetryQueue::new(2, ttl);
        let now = epoch_ms();
        // One entry well past the 24h TTL; upsert keeps it until the sweep.
        {
            let mut entries = queue.entries.lock().await;
            entries.insert("old".to_string(), entry("old", now - ttl - 1_000));
            entries.insert("x".to_string(), entry("x", now - 3_000));
            entries.insert("y".to_string(), entry("y", now - 2_000));
            entries.insert("z".to_string(), entry("z", now - 1_000));
        }
        let (expired, overflow) = queue.cleanup().await;
        assert_eq!(expired, 1);
        assert_eq!(overflow, 1);
        assert_eq!(queue.len().await, 2);
        assert!(queue.get("old").await.is_none());
        assert!(queue.get("x").await.is_none());
        assert!(queue.get("z").await.is_some());
    }

    #[tokio::test]
    async fn upsert_updates_in_place() {
        let queue = RetryQueue::new(10, u64::MAX / 2);
        let now = epoch_ms();
        queue.upsert(entry("a", now)).await;
        let mut updated = entry("a", now);
        updated.attempts = 2;
        updated.failed_chain_ids.push("solana".to_string());
        queue.upsert(updated).await;
        assert_eq!(queue.len().await, 1);
        let stored = queue.get("a").await.unwrap();
        assert_eq!(stored.attempts, 2);
        assert_eq!(stored.failed_chain_ids.len(), 2);
    }
}
