//! Web push delivery: one encrypted POST per subscription, fanned out per user.
//!
//! Each attempt issues a fresh VAPID token for the endpoint's origin, encrypts
//! the payload for that subscriber, and classifies the push service's answer.
//! The outcome then drives exactly one store update for that endpoint:
//!
//! | Outcome          | Store effect       | Counted as |
//! |------------------|--------------------|------------|
//! | `Delivered`      | `record_success`   | sent       |
//! | `Gone`           | `delete_by_endpoint` | failed   |
//! | `Rejected`       | `record_failure`   | failed     |
//! | `NetworkError`   | `record_failure`   | failed     |
//! | crypto/payload error | `record_failure` | failed   |
//!
//! Nothing is retried here.

// Rust guideline compliant 2026-02

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use reqwest::header::{AUTHORIZATION, CONTENT_ENCODING, CONTENT_TYPE};
use serde::{Deserialize, Serialize};

use super::ece;
use super::store::{short_endpoint, Subscription, SubscriptionStore};
use super::vapid::SigningIdentity;
use crate::config::PushConfig;
use crate::error::{PushError, Result};

/// Default message time-to-live at the push service (24 hours).
pub const DEFAULT_TTL_SECS: u32 = 86_400;

/// Default bound on a single push service exchange.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Rejection bodies are cut to this many characters before logging.
const MAX_ERROR_BODY_CHARS: usize = 500;

/// Bytes of a rejection body read off the wire; enough for the character cap.
const MAX_ERROR_BODY_BYTES: usize = MAX_ERROR_BODY_CHARS * 4;

/// Application-level notification, serialized as JSON into the encrypted body.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct NotificationPayload {
    /// Notification title.
    pub title: String,
    /// Notification body text.
    pub body: String,
    /// Icon URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    /// Badge URL (monochrome status bar icon on Android).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub badge: Option<String>,
    /// Page to open when the notification is clicked.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Collapse tag; a newer notification with the same tag replaces the older.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    /// Free-form data for the service worker.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl NotificationPayload {
    /// Payload with just a title and body.
    pub fn new(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            body: body.into(),
            ..Self::default()
        }
    }

    /// Set the click-through URL.
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Set the collapse tag.
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    /// Fill `icon` and `badge` from defaults where the caller left them unset.
    pub fn with_defaults(mut self, icon: Option<&str>, badge: Option<&str>) -> Self {
        if self.icon.is_none() {
            self.icon = icon.map(str::to_string);
        }
        if self.badge.is_none() {
            self.badge = badge.map(str::to_string);
        }
        self
    }
}

/// RFC 8030 `Urgency` header value.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Urgency {
    /// Deliver when the device is on power and Wi-Fi.
    Low,
    /// Deliver at the push service's discretion.
    #[default]
    Normal,
    /// Deliver immediately.
    High,
}

impl Urgency {
    /// Header value.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Normal => "normal",
            Self::High => "high",
        }
    }
}

impl fmt::Display for Urgency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Urgency {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "normal" => Ok(Self::Normal),
            "high" => Ok(Self::High),
            other => Err(format!("unknown urgency {other:?} (expected low, normal, or high)")),
        }
    }
}

/// Result of one delivery attempt to one endpoint.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Push service accepted the message (200 or 201).
    Delivered,
    /// Endpoint no longer exists (404 or 410).
    Gone,
    /// Any other HTTP status.
    Rejected {
        /// HTTP status code.
        status: u16,
        /// Response body, truncated.
        body: String,
    },
    /// The request never got an HTTP answer.
    NetworkError(String),
}

impl DeliveryOutcome {
    /// Classify a push service response.
    pub fn from_response(status: u16, body: &str) -> Self {
        match status {
            200 | 201 => Self::Delivered,
            404 | 410 => Self::Gone,
            _ => Self::Rejected {
                status,
                body: truncate_chars(body, MAX_ERROR_BODY_CHARS),
            },
        }
    }

    /// Whether the message reached the push service.
    pub fn is_delivered(&self) -> bool {
        matches!(self, Self::Delivered)
    }
}

/// Counts for one recipient.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct DeliveryReport {
    /// Endpoints that accepted the message.
    pub sent: usize,
    /// Endpoints that did not.
    pub failed: usize,
}

/// Counts summed across a batch of recipients.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    /// Endpoints that accepted the message.
    pub total_sent: usize,
    /// Endpoints that did not.
    pub total_failed: usize,
}

/// Per-request settings applied to every delivery.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeliveryOptions {
    /// `TTL` header, seconds.
    pub ttl_secs: u32,
    /// `Urgency` header.
    pub urgency: Urgency,
    /// Bound on one request/response exchange.
    pub request_timeout: Duration,
    /// Icon merged into payloads that have none.
    pub default_icon: Option<String>,
    /// Badge merged into payloads that have none.
    pub default_badge: Option<String>,
}

impl Default for DeliveryOptions {
    fn default() -> Self {
        Self {
            ttl_secs: DEFAULT_TTL_SECS,
            urgency: Urgency::Normal,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            default_icon: None,
            default_badge: None,
        }
    }
}

impl DeliveryOptions {
    /// Options taken from loaded configuration.
    pub fn from_config(config: &PushConfig) -> Self {
        Self {
            ttl_secs: config.ttl_secs,
            urgency: config.urgency,
            request_timeout: config.request_timeout(),
            default_icon: config.default_icon.clone(),
            default_badge: config.default_badge.clone(),
        }
    }
}

/// Delivers notifications to every push subscription of a user.
///
/// Holds the process-wide signing identity. A dispatcher built without one
/// is disabled: every send fails with [`PushError::Configuration`] before
/// touching the store or the network.
pub struct PushDispatcher {
    client: reqwest::Client,
    identity: std::result::Result<Arc<SigningIdentity>, String>,
    store: Arc<dyn SubscriptionStore>,
    options: DeliveryOptions,
}

impl fmt::Debug for PushDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PushDispatcher")
            .field("identity", &self.identity)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl PushDispatcher {
    /// Dispatcher that signs with `identity`.
    pub fn new(
        identity: SigningIdentity,
        store: Arc<dyn SubscriptionStore>,
        options: DeliveryOptions,
    ) -> Result<Self> {
        Self::build(Ok(Arc::new(identity)), store, options)
    }

    /// Dispatcher with push disabled for `reason`.
    pub fn disabled(
        reason: impl Into<String>,
        store: Arc<dyn SubscriptionStore>,
        options: DeliveryOptions,
    ) -> Result<Self> {
        Self::build(Err(reason.into()), store, options)
    }

    /// Dispatcher from configuration. Missing or invalid VAPID keys disable push.
    pub fn from_config(config: &PushConfig, store: Arc<dyn SubscriptionStore>) -> Result<Self> {
        let options = DeliveryOptions::from_config(config);
        match SigningIdentity::from_config(config) {
            Ok(identity) => Self::new(identity, store, options),
            Err(e) => {
                log::warn!("[WebPush] Push disabled: {e}");
                Self::disabled(e.to_string(), store, options)
            }
        }
    }

    fn build(
        identity: std::result::Result<Arc<SigningIdentity>, String>,
        store: Arc<dyn SubscriptionStore>,
        options: DeliveryOptions,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(options.request_timeout)
            .build()
            .map_err(|e| PushError::Configuration(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            identity,
            store,
            options,
        })
    }

    /// Whether a signing identity is loaded.
    pub fn is_enabled(&self) -> bool {
        self.identity.is_ok()
    }

    /// Published VAPID key, if push is enabled.
    pub fn public_key(&self) -> Option<&str> {
        self.identity
            .as_ref()
            .ok()
            .map(|identity| identity.public_key_base64url())
    }

    fn identity(&self) -> Result<&SigningIdentity> {
        self.identity
            .as_deref()
            .map_err(|reason| PushError::Configuration(reason.clone()))
    }

    /// One attempt against one endpoint.
    ///
    /// HTTP and transport failures come back as outcomes. `Err` means the
    /// request was never sent: no identity, bad key material, or a payload
    /// that does not fit in one record.
    pub async fn deliver_to_endpoint(
        &self,
        subscription: &Subscription,
        payload: &NotificationPayload,
    ) -> Result<DeliveryOutcome> {
        let identity = self.identity()?;
        let authorization = identity.authorization_header(&subscription.endpoint)?;

        let plaintext = serde_json::to_vec(payload)?;
        let record = ece::encrypt(
            &plaintext,
            &subscription.keys.p256dh_bytes()?,
            &subscription.keys.auth_bytes()?,
        )?;

        let response = self
            .client
            .post(&subscription.endpoint)
            .header(AUTHORIZATION, authorization)
            .header(CONTENT_TYPE, "application/octet-stream")
            .header(CONTENT_ENCODING, "aes128gcm")
            .header("TTL", self.options.ttl_secs.to_string())
            .header("Urgency", self.options.urgency.as_str())
            .timeout(self.options.request_timeout)
            .body(record)
            .send()
            .await;

        let response = match response {
            Ok(response) => response,
            Err(e) => return Ok(DeliveryOutcome::NetworkError(describe_transport_error(&e))),
        };

        let status = response.status().as_u16();
        if matches!(status, 200 | 201 | 404 | 410) {
            return Ok(DeliveryOutcome::from_response(status, ""));
        }
        let body = read_error_body(response).await;
        Ok(DeliveryOutcome::from_response(status, &body))
    }

    /// Deliver to one endpoint and apply the matching store update.
    async fn deliver_and_settle(
        &self,
        subscription: &Subscription,
        payload: &NotificationPayload,
    ) -> Result<DeliveryOutcome> {
        let endpoint = subscription.endpoint.as_str();
        let result = self.deliver_to_endpoint(subscription, payload).await;

        let side_effect = match &result {
            Ok(DeliveryOutcome::Delivered) => {
                log::debug!("[WebPush] Delivered to {}", short_endpoint(endpoint));
                self.store.record_success(endpoint).await
            }
            Ok(DeliveryOutcome::Gone) => {
                log::info!(
                    "[WebPush] Subscription gone, deleting {}",
                    short_endpoint(endpoint)
                );
                self.store.delete_by_endpoint(endpoint).await
            }
            Ok(DeliveryOutcome::Rejected { status, body }) => {
                log::warn!(
                    "[WebPush] Push service rejected {} (HTTP {status}): {body}",
                    short_endpoint(endpoint)
                );
                self.store.record_failure(endpoint).await
            }
            Ok(DeliveryOutcome::NetworkError(message)) => {
                log::warn!(
                    "[WebPush] Request to {} failed: {message}",
                    short_endpoint(endpoint)
                );
                self.store.record_failure(endpoint).await
            }
            Err(e) => {
                log::warn!(
                    "[WebPush] Could not send to {}: {e}",
                    short_endpoint(endpoint)
                );
                self.store.record_failure(endpoint).await
            }
        };

        if let Err(e) = side_effect {
            log::warn!(
                "[WebPush] Failed to update subscription {}: {e:#}",
                short_endpoint(endpoint)
            );
        }
        result
    }

    /// Send `payload` to every subscription of `user_id`, concurrently.
    ///
    /// Only a missing signing identity is an error; every per-endpoint
    /// failure is folded into the counts.
    pub async fn send_to_user(
        &self,
        user_id: &str,
        payload: &NotificationPayload,
    ) -> Result<DeliveryReport> {
        self.identity()?;

        let subscriptions = match self.store.find_by_user(user_id).await {
            Ok(subscriptions) => subscriptions,
            Err(e) => {
                log::error!("[WebPush] Failed to load subscriptions for {user_id}: {e:#}");
                return Ok(DeliveryReport { sent: 0, failed: 1 });
            }
        };

        if subscriptions.is_empty() {
            log::debug!("[WebPush] No push subscriptions for {user_id}");
            return Ok(DeliveryReport::default());
        }

        let payload = payload.clone().with_defaults(
            self.options.default_icon.as_deref(),
            self.options.default_badge.as_deref(),
        );

        let results = join_all(
            subscriptions
                .iter()
                .map(|subscription| self.deliver_and_settle(subscription, &payload)),
        )
        .await;

        let report = results
            .iter()
            .fold(DeliveryReport::default(), |mut report, result| {
                if matches!(result, Ok(outcome) if outcome.is_delivered()) {
                    report.sent += 1;
                } else {
                    report.failed += 1;
                }
                report
            });

        log::info!(
            "[WebPush] User {user_id}: {} sent, {} failed",
            report.sent,
            report.failed
        );
        Ok(report)
    }

    /// Run [`send_to_user`](Self::send_to_user) for every recipient
    /// concurrently and sum the counts.
    pub async fn send_to_users<S: AsRef<str>>(
        &self,
        user_ids: &[S],
        payload: &NotificationPayload,
    ) -> Result<BatchReport> {
        self.identity()?;

        let reports = join_all(
            user_ids
                .iter()
                .map(|user_id| self.send_to_user(user_id.as_ref(), payload)),
        )
        .await;

        let mut batch = BatchReport::default();
        for report in reports {
            let report = report?;
            batch.total_sent += report.sent;
            batch.total_failed += report.failed;
        }
        Ok(batch)
    }
}

fn describe_transport_error(err: &reqwest::Error) -> String {
    if err.is_timeout() {
        format!("timed out: {err}")
    } else if err.is_connect() {
        format!("connection failed: {err}")
    } else {
        err.to_string()
    }
}

/// Read at most [`MAX_ERROR_BODY_BYTES`] of a response body.
///
/// The remainder is left unread; dropping the response closes it.
async fn read_error_body(mut response: reqwest::Response) -> String {
    let mut buf = Vec::new();
    let mut overflowed = false;
    loop {
        match response.chunk().await {
            Ok(Some(chunk)) => {
                let room = MAX_ERROR_BODY_BYTES - buf.len();
                if chunk.len() > room {
                    buf.extend_from_slice(&chunk[..room]);
                    overflowed = true;
                    break;
                }
                buf.extend_from_slice(&chunk);
            }
            Ok(None) => break,
            Err(e) => return format!("<failed to read response body: {e}>"),
        }
    }
    let mut body = String::from_utf8_lossy(&buf).into_owned();
    if overflowed {
        body.push('…');
    }
    body
}

fn truncate_chars(input: &str, max_chars: usize) -> String {
    let mut chars = input.chars();
    let mut out: String = chars.by_ref().take(max_chars).collect();
    if chars.next().is_some() {
        out.push('…');
    }
    out
}
