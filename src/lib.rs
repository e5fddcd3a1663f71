//! Web push delivery engine.
//!
//! Sends notifications to browser push subscriptions: VAPID-signed
//! (RFC 8292), aes128gcm-encrypted (RFC 8291), fanned out concurrently to
//! every endpoint a user has registered.
//!
//! # Modules
//!
//! - [`notifications`] - crypto, subscriptions, and delivery
//! - [`config`] - configuration loading/overrides
//! - [`error`] - error taxonomy

pub mod config;
pub mod error;
pub mod notifications;

// Re-export commonly used types
pub use config::PushConfig;
pub use error::{PushError, Result};
pub use notifications::push::{
    BatchReport, DeliveryOptions, DeliveryOutcome, DeliveryReport, NotificationPayload,
    PushDispatcher, Urgency,
};
pub use notifications::store::{
    MemorySubscriptionStore, Subscription, SubscriptionHealth, SubscriptionKeys, SubscriptionStore,
};
pub use notifications::vapid::SigningIdentity;
