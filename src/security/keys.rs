// Signing key lifecycle module
// One active Ed25519 key per chain. Rotation replaces the record and retires
// the prior key id; a background tick rotates any key past its scheduled
// rotation timestamp.

use crate::adapters::epoch_ms;
use crate::config::KeyStorageMode;
use crate::telemetry::{TelemetryEvent, TelemetrySink};
use ed25519_dalek::{SigningKey, VerifyingKey};
use rand_core::OsRng;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

/// Public view of a chain's active key. The private half never leaves the
/// store.
#[derive(Debug, Clone, Serialize)]
pub struct KeyInfo {
    pub key_id: String,
    pub created_at: u64,
    pub last_rotated_at: u64,
    pub next_rotation_timestamp: u64,
    pub public_address: String,
}

struct ActiveKey {
    signing_key: SigningKey,
    info: KeyInfo,
}

pub struct KeyStore {
    keys: RwLock<HashMap<String, ActiveKey>>,
    rotation_interval_ms: u64,
    mode: KeyStorageMode,
}

impl KeyStore {
    pub fn new(rotation_interval_ms: u64, mode: KeyStorageMode) -> Self {
        if mode == KeyStorageMode::External {
            // External custody is wired through the same interface; only the
            // in-memory provider is bundled here.
            warn!("external key storage requested; falling back to in-memory provider");
        }
        Self {
            keys: RwLock::new(HashMap::new()),
            rotation_interval_ms,
            mode,
        }
    }

    pub fn mode(&self) -> KeyStorageMode {
        self.mode
    }

    fn generate(rotation_interval_ms: u64) -> ActiveKey {
        let signing_key = SigningKey::generate(&mut OsRng);
        let now = epoch_ms();
        let info = KeyInfo {
            key_id: Uuid::new_v4().to_string(),
            created_at: now,
            last_rotated_at: now,
            next_rotation_timestamp: now + rotation_interval_ms,
            public_address: hex::encode(signing_key.verifying_key().to_bytes()),
        };
        ActiveKey { signing_key, info }
    }

    /// Provision a key for the chain if none exists yet.
    pub async fn ensure_key(&self, chain_id: &str) -> KeyInfo {
        {
            let keys = self.keys.read().await;
            if let Some(active) = keys.get(chain_id) {
                return active.info.clone();
            }
        }
        let mut keys = self.keys.write().await;
        let active = keys
            .entry(chain_id.to_string())
            .or_insert_with(|| Self::generate(self.rotation_interval_ms));
        info!(chain_id, key_id = %active.info.key_id, "provisioned signing key");
        active.info.clone()
    }

    pub async fn active_key_info(&self, chain_id: &str) -> Option<KeyInfo> {
        let keys = self.keys.read().await;
        keys.get(chain_id).map(|active| active.info.clone())
    }

    pub async fn signing_key(&self, chain_id: &str) -> Option<SigningKey> {
        let keys = self.keys.read().await;
        keys.get(chain_id).map(|active| active.signing_key.clone())
    }

    pub async fn verifying_key(&self, chain_id: &str) -> Option<VerifyingKey> {
        let keys = self.keys.read().await;
        keys.get(chain_id)
            .map(|active| active.signing_key.verifying_key())
    }

    /// Replace the chain's key, retiring the prior id. Returns
    /// (retired_id, new_info); None when the chain has no key.
    pub async fn rotate(&self, chain_id: &str) -> Option<(String, KeyInfo)> {
        let mut keys = self.keys.write().await;
        let slot = keys.get_mut(chain_id)?;
        let retired = slot.info.key_id.clone();
        let mut fresh = Self::generate(self.rotation_interval_ms);
        fresh.info.created_at = slot.info.created_at;
        let info = fresh.info.clone();
        *slot = fresh;
        info!(chain_id, retired = %retired, new = %info.key_id, "rotated signing key");
        Some((retired, info))
    }

    /// Rotate every key whose scheduled rotation timestamp has passed.
    pub async fn rotate_expired(&self) -> Vec<(String, String, KeyInfo)> {
        let now = epoch_ms();
        let due: Vec<String> = {
            let keys = self.keys.read().await;
            keys.iter()
                .filter(|(_, active)| now >= active.info.next_rotation_timestamp)
                .map(|(chain, _)| chain.clone())
                .collect()
        };
        let mut rotated = Vec::new();
        for chain_id in due {
            if let Some((retired, info)) = self.rotate(&chain_id).await {
                rotated.push((chain_id, retired, info));
            }
        }
        rotated
    }
}

/// Spawn the rotation tick. Each key carries its own scheduled rotation
/// timestamp; `check_interval` only bounds how promptly an expired key is
/// noticed, not when keys expire.
pub fn spawn_rotation_task(
    keys: Arc<KeyStore>,
    sink: Arc<dyn TelemetrySink>,
    check_interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(check_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            for (chain_id, retired, info) in keys.rotate_expired().await {
                sink.emit(TelemetryEvent::KeyRotated {
                    chain_id,
                    retired_key_id: retired,
                    new_key_id: info.key_id,
                });
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rotation_retires_old_key_id() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let store = KeyStore::new(60 * 60 * 1000, KeyStorageMode::Memory);
            let first = store.ensure_key("ethereum").await;
            let (retired, fresh) = store.rotate("ethereum").await.unwrap();
            assert_eq!(retired, first.key_id);
            assert_ne!(fresh.key_id, first.key_id);
            assert_ne!(fresh.public_address, first.public_address);
            // Original creation time survives rotation.
            assert_eq!(fresh.created_at, first.created_at);
        });
    }

    #[tokio::test]
    async fn ensure_key_is_idempotent() {
        let store = KeyStore::new(60 * 60 * 1000, KeyStorageMode::Memory);
        let a = store.ensure_key("solana").await;
        let b = store.ensure_key("solana").await;
        assert_eq!(a.key_id, b.key_id);
    }

    #[tokio::test]
    async fn rotate_expired_only_touches_due_keys() {
        let store = KeyStore::new(60 * 60 * 1000, KeyStorageMode::Memory);
        store.ensure_key("ethereum").await;
        // Fresh key: next rotation is an hour out, nothing to do.
        assert!(store.rotate_expired().await.is_empty());
    }
}
