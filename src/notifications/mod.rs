//! Web push notification delivery.
//!
//! Authenticates to browser push services with VAPID and encrypts every
//! message end-to-end for the subscribing browser.
//!
//! # Architecture
//!
//! ```text
//! Caller decides to notify a user
//!     ↓
//! PushDispatcher::send_to_user loads the user's subscriptions
//!     ↓  (concurrently, one per endpoint)
//! vapid: fresh ES256 token for the endpoint origin
//! ece:   aes128gcm record for the subscriber's keys
//!     ↓
//! POST to the push service → Delivered | Gone | Rejected | NetworkError
//!     ↓
//! SubscriptionStore: record_success | delete_by_endpoint | record_failure
//! ```
//!
//! # Modules
//!
//! - [`kdf`] - HKDF extract/expand over HMAC-SHA-256
//! - [`vapid`] - signing identity and token issuing (RFC 8292)
//! - [`ece`] - single-record aes128gcm encryption (RFC 8291)
//! - [`store`] - subscription records and the store seam
//! - [`push`] - payloads, outcomes, and the dispatcher

// Rust guideline compliant 2026-02

pub mod ece;
pub mod kdf;
pub mod push;
pub mod store;
pub mod vapid;
