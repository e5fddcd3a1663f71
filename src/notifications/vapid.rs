//! VAPID signing identity and token issuing (RFC 8292).
//!
//! The server holds one P-256 ECDSA key pair for its whole lifetime. The
//! public half is handed to browsers as `applicationServerKey` when they
//! subscribe; the private half signs a short-lived ES256 JWT for every
//! delivery attempt, scoped to the push service origin.

// Rust guideline compliant 2026-02

use std::fmt;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD as BASE64URL, Engine};
use chrono::{DateTime, Utc};
use p256::ecdsa::signature::{Signer, Verifier};
use p256::ecdsa::{Signature, SigningKey, VerifyingKey};
use p256::elliptic_curve::rand_core::OsRng;
use p256::pkcs8::{DecodePrivateKey, EncodePrivateKey};
use p256::SecretKey;
use reqwest::Url;
use serde::{Deserialize, Serialize};

use crate::config::PushConfig;
use crate::error::{PushError, Result};

/// Token lifetime. RFC 8292 caps `exp` at 24 hours; 12 leaves room for clock skew.
pub const TOKEN_LIFETIME_SECS: i64 = 12 * 60 * 60;

/// Length of an uncompressed SEC1 P-256 point (`0x04 || x || y`).
pub const PUBLIC_KEY_LEN: usize = 65;

#[derive(Serialize)]
struct TokenHeader {
    alg: &'static str,
    typ: &'static str,
}

const TOKEN_HEADER: TokenHeader = TokenHeader {
    alg: "ES256",
    typ: "JWT",
};

/// Claims carried in a VAPID token.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Push service origin (`scheme://host[:port]`).
    pub aud: String,
    /// Expiry, seconds since the Unix epoch.
    pub exp: i64,
    /// Contact URI for the application server operator.
    pub sub: String,
}

/// Origin of a push endpoint, used as the token audience.
///
/// The path is discarded and default ports are omitted, matching how push
/// services compare the `aud` claim against their own origin.
pub fn audience(endpoint: &str) -> Result<String> {
    let url = Url::parse(endpoint)
        .map_err(|e| PushError::InvalidEndpoint(format!("{endpoint}: {e}")))?;

    if !matches!(url.scheme(), "https" | "http") {
        return Err(PushError::InvalidEndpoint(format!(
            "{endpoint}: unsupported scheme {}",
            url.scheme()
        )));
    }

    let origin = url.origin();
    if !origin.is_tuple() {
        return Err(PushError::InvalidEndpoint(format!("{endpoint}: no host")));
    }
    Ok(origin.ascii_serialization())
}

/// Issue a VAPID token for `endpoint`, expiring 12 hours from now.
pub fn issue_token(endpoint: &str, contact_uri: &str, signing_key: &SigningKey) -> Result<String> {
    issue_token_at(endpoint, contact_uri, signing_key, Utc::now())
}

/// Issue a VAPID token as of `now`.
///
/// Produces `base64url(header).base64url(claims).base64url(r || s)`, all
/// without padding.
pub fn issue_token_at(
    endpoint: &str,
    contact_uri: &str,
    signing_key: &SigningKey,
    now: DateTime<Utc>,
) -> Result<String> {
    let claims = TokenClaims {
        aud: audience(endpoint)?,
        exp: now.timestamp() + TOKEN_LIFETIME_SECS,
        sub: contact_uri.to_string(),
    };

    let header = BASE64URL.encode(serde_json::to_vec(&TOKEN_HEADER)?);
    let payload = BASE64URL.encode(serde_json::to_vec(&claims)?);
    let signing_input = format!("{header}.{payload}");

    let signature: Signature = signing_key.sign(signing_input.as_bytes());
    Ok(format!(
        "{signing_input}.{}",
        BASE64URL.encode(signature.to_bytes())
    ))
}

/// Verify a token's ES256 signature and return its claims.
///
/// Expiry is not checked; that is the push service's call.
pub fn verify_token(token: &str, verifying_key: &VerifyingKey) -> Result<TokenClaims> {
    let mut segments = token.split('.');
    let (Some(header), Some(payload), Some(signature), None) = (
        segments.next(),
        segments.next(),
        segments.next(),
        segments.next(),
    ) else {
        return Err(PushError::Crypto("token must have three segments".into()));
    };

    let signature = BASE64URL
        .decode(signature)
        .map_err(|e| PushError::Crypto(format!("token signature encoding: {e}")))?;
    let signature = Signature::from_slice(&signature)
        .map_err(|e| PushError::Crypto(format!("token signature: {e}")))?;
    verifying_key
        .verify(format!("{header}.{payload}").as_bytes(), &signature)
        .map_err(|e| PushError::Crypto(format!("token signature mismatch: {e}")))?;

    let claims = BASE64URL
        .decode(payload)
        .map_err(|e| PushError::Crypto(format!("token claims encoding: {e}")))?;
    Ok(serde_json::from_slice(&claims)?)
}

/// Process-wide VAPID identity: signing key, published key, contact URI.
///
/// Loaded once at startup and shared read-only by every delivery.
pub struct SigningIdentity {
    signing_key: SigningKey,
    public_key_b64: String,
    contact_uri: String,
}

impl fmt::Debug for SigningIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningIdentity")
            .field("public_key", &self.public_key_b64)
            .field("contact_uri", &self.contact_uri)
            .field("signing_key", &"<redacted>")
            .finish()
    }
}

impl SigningIdentity {
    /// Generate a fresh VAPID key pair.
    pub fn generate(contact_uri: &str) -> Result<Self> {
        validate_contact(contact_uri)?;
        Ok(Self::from_signing_key(
            SigningKey::random(&mut OsRng),
            contact_uri,
        ))
    }

    /// Load an identity from base64url key material.
    ///
    /// The private key is PKCS8 DER; a raw 32-byte scalar or SEC1 DER is also
    /// accepted. When `public_key_b64` is given it must equal the key derived
    /// from the private key, since browsers subscribed against it.
    pub fn from_base64url(
        private_key_b64: &str,
        public_key_b64: Option<&str>,
        contact_uri: &str,
    ) -> Result<Self> {
        validate_contact(contact_uri)?;

        let private_bytes = BASE64URL
            .decode(private_key_b64.trim())
            .map_err(|e| PushError::Configuration(format!("Invalid base64url for VAPID private key: {e}")))?;
        let identity = Self::from_signing_key(decode_private_key(&private_bytes)?, contact_uri);

        if let Some(published) = public_key_b64 {
            let published = BASE64URL
                .decode(published.trim())
                .map_err(|e| PushError::Configuration(format!("Invalid base64url for VAPID public key: {e}")))?;
            if published.len() != PUBLIC_KEY_LEN || published[0] != 0x04 {
                return Err(PushError::Configuration(
                    "VAPID public key must be a 65-byte uncompressed P-256 point".into(),
                ));
            }
            if published != identity.public_key_bytes() {
                return Err(PushError::Configuration(
                    "VAPID public key does not match the private key".into(),
                ));
            }
        }

        Ok(identity)
    }

    /// Build the identity from loaded configuration.
    pub fn from_config(config: &PushConfig) -> Result<Self> {
        let private_key = config
            .vapid_private_key
            .as_deref()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| PushError::Configuration("VAPID private key is not set".into()))?;

        let public_key = config
            .vapid_public_key
            .as_deref()
            .filter(|key| !key.trim().is_empty());
        if public_key.is_none() {
            log::warn!("[WebPush] VAPID public key not configured; publishing the derived key");
        }

        Self::from_base64url(private_key, public_key, &config.contact_uri)
    }

    fn from_signing_key(signing_key: SigningKey, contact_uri: &str) -> Self {
        let point = signing_key.verifying_key().to_encoded_point(false);
        Self {
            public_key_b64: BASE64URL.encode(point.as_bytes()),
            signing_key,
            contact_uri: contact_uri.to_string(),
        }
    }

    /// Published key (base64url, 65 bytes decoded), the browser's `applicationServerKey`.
    pub fn public_key_base64url(&self) -> &str {
        &self.public_key_b64
    }

    /// Published key as raw uncompressed point bytes.
    pub fn public_key_bytes(&self) -> Vec<u8> {
        self.signing_key
            .verifying_key()
            .to_encoded_point(false)
            .as_bytes()
            .to_vec()
    }

    /// Private key as PKCS8 DER, base64url. This is the configuration format.
    pub fn private_key_pkcs8_base64url(&self) -> Result<String> {
        let secret: SecretKey = self.signing_key.clone().into();
        let der = secret
            .to_pkcs8_der()
            .map_err(|e| PushError::Crypto(format!("PKCS8 encoding failed: {e}")))?;
        Ok(BASE64URL.encode(der.as_bytes()))
    }

    /// Contact URI used as the token `sub` claim.
    pub fn contact_uri(&self) -> &str {
        &self.contact_uri
    }

    /// Key that verifies tokens issued by this identity.
    pub fn verifying_key(&self) -> &VerifyingKey {
        self.signing_key.verifying_key()
    }

    /// Issue a fresh token scoped to `endpoint`'s origin.
    pub fn issue_token(&self, endpoint: &str) -> Result<String> {
        issue_token(endpoint, &self.contact_uri, &self.signing_key)
    }

    /// `Authorization` header value: `vapid t=<token>, k=<public key>`.
    pub fn authorization_header(&self, endpoint: &str) -> Result<String> {
        Ok(format!(
            "vapid t={}, k={}",
            self.issue_token(endpoint)?,
            self.public_key_b64
        ))
    }
}

fn validate_contact(contact_uri: &str) -> Result<()> {
    if contact_uri.starts_with("mailto:") || contact_uri.starts_with("https://") {
        Ok(())
    } else {
        Err(PushError::Configuration(format!(
            "VAPID contact must be a mailto: or https: URI, got {contact_uri:?}"
        )))
    }
}

fn decode_private_key(bytes: &[u8]) -> Result<SigningKey> {
    if bytes.len() == 32 {
        return SigningKey::from_bytes(bytes.into())
            .map_err(|e| PushError::Configuration(format!("VAPID private key is not a valid P-256 scalar: {e}")));
    }

    if let Ok(secret) = SecretKey::from_pkcs8_der(bytes) {
        return Ok(SigningKey::from(secret));
    }

    let secret = SecretKey::from_sec1_der(bytes).map_err(|e| {
        PushError::Configuration(format!(
            "VAPID private key is not PKCS8 DER, SEC1 DER, or a raw scalar ({} bytes): {e}",
            bytes.len()
        ))
    })?;
    log::info!("[WebPush] Loaded VAPID private key from SEC1 DER; PKCS8 is preferred");
    Ok(SigningKey::from(secret))
}
