//! Error taxonomy for push delivery.
//!
//! Only [`PushError::Configuration`] ever escapes a fan-out call. Every other
//! variant is caught at the per-subscription boundary and counted as a
//! failed delivery for that endpoint.

use thiserror::Error;

/// Errors produced by the push delivery engine.
#[derive(Error, Debug)]
pub enum PushError {
    /// Signing identity is missing or unusable. Push is disabled.
    #[error("Push is not configured: {0}")]
    Configuration(String),
    /// Subscriber key material could not be imported, derived, or used.
    #[error("Crypto failure: {0}")]
    Crypto(String),
    /// Subscription endpoint is not an http(s) URL with a host.
    #[error("Invalid push endpoint: {0}")]
    InvalidEndpoint(String),
    /// Serialized payload does not fit in a single encryption record.
    #[error("Payload too large: {len} bytes exceeds the {max} byte limit")]
    PayloadTooLarge {
        /// Plaintext length in bytes.
        len: usize,
        /// Largest plaintext accepted.
        max: usize,
    },
    /// Payload could not be serialized to JSON.
    #[error("Failed to serialize payload: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl PushError {
    /// Whether this error disables push entirely rather than failing one delivery.
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }
}

/// Result alias used throughout the library.
pub type Result<T> = std::result::Result<T, PushError>;
