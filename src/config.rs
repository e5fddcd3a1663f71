//! Configuration loading.
//!
//! Push settings live in `config.json` under the config directory and can be
//! overridden per process with `WEBPUSH_*` environment variables. The VAPID
//! private key may come from either place; deployments usually inject it
//! through the environment.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::notifications::push::{Urgency, DEFAULT_REQUEST_TIMEOUT, DEFAULT_TTL_SECS};

/// Contact used when none is configured.
pub const DEFAULT_CONTACT: &str = "mailto:admin@localhost";

/// Push delivery configuration.
#[derive(Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct PushConfig {
    /// VAPID signing key: PKCS8 DER, base64url.
    pub vapid_private_key: Option<String>,
    /// Published VAPID key: uncompressed P-256 point, base64url.
    pub vapid_public_key: Option<String>,
    /// `mailto:` or `https:` contact for the token `sub` claim.
    pub contact_uri: String,
    /// Message time-to-live at the push service, seconds.
    pub ttl_secs: u32,
    /// Urgency sent with every message.
    pub urgency: Urgency,
    /// Bound on one push service exchange, seconds.
    pub request_timeout_secs: u64,
    /// Icon merged into payloads that have none.
    pub default_icon: Option<String>,
    /// Badge merged into payloads that have none.
    pub default_badge: Option<String>,
    /// Subscription store file used by the CLI.
    pub subscriptions_path: Option<PathBuf>,
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            vapid_private_key: None,
            vapid_public_key: None,
            contact_uri: DEFAULT_CONTACT.to_string(),
            ttl_secs: DEFAULT_TTL_SECS,
            urgency: Urgency::Normal,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT.as_secs(),
            default_icon: None,
            default_badge: None,
            subscriptions_path: None,
        }
    }
}

impl fmt::Debug for PushConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PushConfig")
            .field(
                "vapid_private_key",
                &self.vapid_private_key.as_ref().map(|_| "<redacted>"),
            )
            .field("vapid_public_key", &self.vapid_public_key)
            .field("contact_uri", &self.contact_uri)
            .field("ttl_secs", &self.ttl_secs)
            .field("urgency", &self.urgency)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("default_icon", &self.default_icon)
            .field("default_badge", &self.default_badge)
            .field("subscriptions_path", &self.subscriptions_path)
            .finish()
    }
}

impl PushConfig {
    /// Returns the configuration directory path, creating it if necessary.
    ///
    /// `WEBPUSH_CONFIG_DIR` wins; otherwise the platform config directory
    /// (macOS: ~/Library/Application Support/webpush).
    pub fn config_dir() -> Result<PathBuf> {
        let dir = if let Ok(dir) = std::env::var("WEBPUSH_CONFIG_DIR") {
            PathBuf::from(dir)
        } else {
            dirs::config_dir()
                .context("Could not determine config directory")?
                .join("webpush")
        };
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create config directory {}", dir.display()))?;
        Ok(dir)
    }

    /// Load `config.json` from the config directory, then apply environment overrides.
    pub fn load() -> Result<Self> {
        let path = Self::config_dir()?.join("config.json");
        let mut config = if path.exists() {
            Self::load_from_file(&path)?
        } else {
            log::debug!("No config file at {:?}, using defaults", path);
            Self::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Parse a config file. Missing fields take their defaults.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    /// Apply `WEBPUSH_*` variables from the process environment.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let var = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        if let Some(key) = var("WEBPUSH_VAPID_PRIVATE_KEY") {
            self.vapid_private_key = Some(key);
        }
        if let Some(key) = var("WEBPUSH_VAPID_PUBLIC_KEY") {
            self.vapid_public_key = Some(key);
        }
        if let Some(contact) = var("WEBPUSH_CONTACT") {
            self.contact_uri = contact;
        }
        if let Some(ttl) = var("WEBPUSH_TTL") {
            match ttl.trim().parse() {
                Ok(ttl) => self.ttl_secs = ttl,
                Err(e) => log::warn!("Ignoring WEBPUSH_TTL={ttl:?}: {e}"),
            }
        }
        if let Some(urgency) = var("WEBPUSH_URGENCY") {
            match urgency.parse() {
                Ok(urgency) => self.urgency = urgency,
                Err(e) => log::warn!("Ignoring WEBPUSH_URGENCY: {e}"),
            }
        }
        if let Some(timeout) = var("WEBPUSH_TIMEOUT_SECS") {
            match timeout.trim().parse() {
                Ok(secs) => self.request_timeout_secs = secs,
                Err(e) => log::warn!("Ignoring WEBPUSH_TIMEOUT_SECS={timeout:?}: {e}"),
            }
        }
        if let Some(icon) = var("WEBPUSH_DEFAULT_ICON") {
            self.default_icon = Some(icon);
        }
        if let Some(badge) = var("WEBPUSH_DEFAULT_BADGE") {
            self.default_badge = Some(badge);
        }
        if let Some(path) = var("WEBPUSH_SUBSCRIPTIONS") {
            self.subscriptions_path = Some(PathBuf::from(path));
        }
    }

    /// Request timeout. Zero falls back to the default so a request can never hang.
    pub fn request_timeout(&self) -> Duration {
        if self.request_timeout_secs == 0 {
            DEFAULT_REQUEST_TIMEOUT
        } else {
            Duration::from_secs(self.request_timeout_secs)
        }
    }

    /// Subscription store file: configured path, else `subscriptions.json` in the config dir.
    pub fn subscriptions_path(&self) -> Result<PathBuf> {
        match &self.subscriptions_path {
            Some(path) => Ok(path.clone()),
            None => Ok(Self::config_dir()?.join("subscriptions.json")),
        }
    }

    /// Config fragment holding just the VAPID key pair, as `keygen` prints it.
    pub fn key_fragment(private_key: &str, public_key: &str, contact_uri: &str) -> HashMap<&'static str, String> {
        HashMap::from([
            ("vapid_private_key", private_key.to_string()),
            ("vapid_public_key", public_key.to_string()),
            ("contact_uri", contact_uri.to_string()),
        ])
    }
}
