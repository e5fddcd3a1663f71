//! Push subscription records and the store seam the dispatcher writes through.
//!
//! The dispatcher only ever reads a user's subscriptions and then mutates one
//! endpoint at a time, so any store that makes single-key updates safe under
//! concurrency can back it. [`MemorySubscriptionStore`] is the in-process
//! implementation used by the CLI and tests; it persists to a JSON file.

// Rust guideline compliant 2026-02

use std::collections::HashMap;
#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD as BASE64URL, Engine};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::PushError;

/// Subscriber key material as the browser reports it (base64url).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionKeys {
    /// Browser's P-256 ECDH public key (uncompressed point).
    pub p256dh: String,
    /// 16-byte auth secret.
    pub auth: String,
}

impl SubscriptionKeys {
    /// Decoded `p256dh` bytes.
    pub fn p256dh_bytes(&self) -> crate::Result<Vec<u8>> {
        decode_key("p256dh", &self.p256dh)
    }

    /// Decoded `auth` bytes.
    pub fn auth_bytes(&self) -> crate::Result<Vec<u8>> {
        decode_key("auth", &self.auth)
    }
}

// Some browsers pad their base64url output.
fn decode_key(name: &str, value: &str) -> crate::Result<Vec<u8>> {
    BASE64URL
        .decode(value.trim().trim_end_matches('='))
        .map_err(|e| PushError::Crypto(format!("{name} is not base64url: {e}")))
}

/// Delivery health counters for one endpoint.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionHealth {
    /// Deliveries accepted by the push service.
    pub success_count: u64,
    /// Deliveries that failed for any reason other than the endpoint being gone.
    pub failure_count: u64,
    /// Failures since the last success.
    pub consecutive_failures: u32,
    /// Time of the last accepted delivery.
    pub last_success_at: Option<DateTime<Utc>>,
    /// Time of the last failed delivery.
    pub last_failure_at: Option<DateTime<Utc>>,
}

impl SubscriptionHealth {
    fn record_success(&mut self, at: DateTime<Utc>) {
        self.success_count += 1;
        self.consecutive_failures = 0;
        self.last_success_at = Some(at);
    }

    fn record_failure(&mut self, at: DateTime<Utc>) {
        self.failure_count += 1;
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.last_failure_at = Some(at);
    }
}

/// A browser push subscription owned by one user.
///
/// `endpoint` is the identity. Keys never change for a given endpoint; a
/// browser that rotates keys registers a new subscription.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    /// Push service endpoint URL.
    pub endpoint: String,
    /// Encryption keys for this endpoint.
    pub keys: SubscriptionKeys,
    /// Owning user. Absent in raw browser `PushSubscription` JSON.
    #[serde(default)]
    pub user_id: String,
    /// Delivery health counters.
    #[serde(default)]
    pub health: SubscriptionHealth,
}

impl Subscription {
    /// Create a subscription with fresh health counters.
    pub fn new(user_id: impl Into<String>, endpoint: impl Into<String>, keys: SubscriptionKeys) -> Self {
        Self {
            endpoint: endpoint.into(),
            keys,
            user_id: user_id.into(),
            health: SubscriptionHealth::default(),
        }
    }
}

/// Persistence the dispatcher depends on.
#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    /// All subscriptions registered for `user_id`.
    async fn find_by_user(&self, user_id: &str) -> Result<Vec<Subscription>>;

    /// Note an accepted delivery on `endpoint`.
    async fn record_success(&self, endpoint: &str) -> Result<()>;

    /// Note a failed delivery on `endpoint`. The subscription is kept.
    async fn record_failure(&self, endpoint: &str) -> Result<()>;

    /// Forget `endpoint`; the push service reported it gone.
    async fn delete_by_endpoint(&self, endpoint: &str) -> Result<()>;
}

/// In-memory subscription store keyed by endpoint.
#[derive(Debug, Default)]
pub struct MemorySubscriptionStore {
    subscriptions: RwLock<HashMap<String, Subscription>>,
}

impl MemorySubscriptionStore {
    /// Build a store from existing records. Later duplicates of an endpoint win.
    pub fn from_subscriptions(subscriptions: impl IntoIterator<Item = Subscription>) -> Self {
        let map = subscriptions
            .into_iter()
            .map(|sub| (sub.endpoint.clone(), sub))
            .collect();
        Self {
            subscriptions: RwLock::new(map),
        }
    }

    /// Add a subscription, replacing any record with the same endpoint.
    ///
    /// Re-registering the same keys keeps the endpoint's health counters.
    /// Different keys count as a new subscription and start from zero.
    pub async fn upsert(&self, mut subscription: Subscription) {
        let mut subscriptions = self.subscriptions.write().await;
        if let Some(existing) = subscriptions.get(&subscription.endpoint) {
            if existing.user_id != subscription.user_id {
                log::info!(
                    "[WebPush] Endpoint {} moved from user {} to {}",
                    short_endpoint(&subscription.endpoint),
                    existing.user_id,
                    subscription.user_id
                );
            }
            if existing.keys == subscription.keys {
                subscription.health = existing.health.clone();
            }
        }
        subscriptions.insert(subscription.endpoint.clone(), subscription);
    }

    /// Remove a subscription. Returns whether it existed.
    pub async fn remove(&self, endpoint: &str) -> bool {
        self.subscriptions.write().await.remove(endpoint).is_some()
    }

    /// Look up one subscription by endpoint.
    pub async fn get(&self, endpoint: &str) -> Option<Subscription> {
        self.subscriptions.read().await.get(endpoint).cloned()
    }

    /// Number of stored subscriptions.
    pub async fn len(&self) -> usize {
        self.subscriptions.read().await.len()
    }

    /// Whether the store is empty.
    pub async fn is_empty(&self) -> bool {
        self.subscriptions.read().await.is_empty()
    }

    /// Load from a JSON file. A missing file yields an empty store.
    pub async fn load(path: &Path) -> Result<Self> {
        let exists = tokio::fs::try_exists(path)
            .await
            .with_context(|| format!("Failed to check subscriptions file {}", path.display()))?;
        if !exists {
            log::debug!("[WebPush] No subscription file at {:?}, starting empty", path);
            return Ok(Self::default());
        }

        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read subscriptions file {}", path.display()))?;
        let subscriptions: Vec<Subscription> =
            serde_json::from_str(&content).context("Failed to parse subscriptions file")?;

        log::info!("[WebPush] Loaded {} push subscription(s)", subscriptions.len());
        Ok(Self::from_subscriptions(subscriptions))
    }

    /// Write all subscriptions to `path` as pretty JSON, sorted by endpoint.
    ///
    /// The file holds auth secrets, so it is made owner-only on Unix.
    pub async fn save(&self, path: &Path) -> Result<()> {
        let mut snapshot: Vec<Subscription> =
            self.subscriptions.read().await.values().cloned().collect();
        snapshot.sort_by(|a, b| a.endpoint.cmp(&b.endpoint));

        let content =
            serde_json::to_string_pretty(&snapshot).context("Failed to serialize subscriptions")?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .context("Failed to create subscriptions directory")?;
        }
        tokio::fs::write(path, content)
            .await
            .with_context(|| format!("Failed to write subscriptions file {}", path.display()))?;

        #[cfg(unix)]
        {
            tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
                .await
                .context("Failed to set subscriptions file permissions")?;
        }

        log::debug!("[WebPush] Saved {} push subscription(s) to {:?}", snapshot.len(), path);
        Ok(())
    }
}

#[async_trait]
impl SubscriptionStore for MemorySubscriptionStore {
    async fn find_by_user(&self, user_id: &str) -> Result<Vec<Subscription>> {
        Ok(self
            .subscriptions
            .read()
            .await
            .values()
            .filter(|sub| sub.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn record_success(&self, endpoint: &str) -> Result<()> {
        match self.subscriptions.write().await.get_mut(endpoint) {
            Some(sub) => sub.health.record_success(Utc::now()),
            None => log::debug!("[WebPush] Success for unknown endpoint {}", short_endpoint(endpoint)),
        }
        Ok(())
    }

    async fn record_failure(&self, endpoint: &str) -> Result<()> {
        match self.subscriptions.write().await.get_mut(endpoint) {
            Some(sub) => sub.health.record_failure(Utc::now()),
            None => log::debug!("[WebPush] Failure for unknown endpoint {}", short_endpoint(endpoint)),
        }
        Ok(())
    }

    async fn delete_by_endpoint(&self, endpoint: &str) -> Result<()> {
        self.remove(endpoint).await;
        Ok(())
    }
}

/// Endpoint shortened for logs; the tail is a bearer capability.
pub(crate) fn short_endpoint(endpoint: &str) -> &str {
    let end = endpoint
        .char_indices()
        .nth(48)
        .map_or(endpoint.len(), |(i, _)| i);
    &endpoint[..end]
}
