//! aes128gcm content encoding for Web Push (RFC 8188 + RFC 8291).
//!
//! A push message body is a single encryption record:
//!
//! ```text
//! +-----------+--------+-----------+------------------------+------------------+
//! | salt (16) | rs (4) | idlen (1) | keyid = as_public (65) | ciphertext + tag |
//! +-----------+--------+-----------+------------------------+------------------+
//! ```
//!
//! The content-encryption key and nonce come from an ECDH exchange between
//! a per-message ephemeral key and the subscriber's `p256dh` key, mixed with
//! the subscriber's `auth` secret through HKDF. Only the subscriber's browser
//! holds the matching private key, so the push service relays ciphertext it
//! cannot read.

// Rust guideline compliant 2026-02

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes128Gcm, Nonce,
};
use p256::ecdh::diffie_hellman;
use p256::elliptic_curve::rand_core::OsRng;
use p256::elliptic_curve::sec1::ToEncodedPoint;
use p256::{PublicKey, SecretKey};
use rand::RngCore;
use zeroize::Zeroizing;

use super::kdf;
use super::vapid::PUBLIC_KEY_LEN;
use crate::error::{PushError, Result};

/// Per-message salt length.
pub const SALT_LEN: usize = 16;

/// Declared record size. The whole body must fit in one record.
pub const RECORD_SIZE: u32 = 4096;

/// Subscriber `auth` secret length.
pub const AUTH_SECRET_LEN: usize = 16;

/// AES-GCM authentication tag length.
pub const TAG_LEN: usize = 16;

/// Encoded header length: salt, record size, key id length, key id.
pub const HEADER_LEN: usize = SALT_LEN + 4 + 1 + PUBLIC_KEY_LEN;

/// Largest plaintext that keeps the whole body within [`RECORD_SIZE`].
pub const MAX_PLAINTEXT_LEN: usize = RECORD_SIZE as usize - HEADER_LEN - TAG_LEN - 1;

const RS_OFFSET: usize = SALT_LEN;
const IDLEN_OFFSET: usize = RS_OFFSET + 4;
const KEY_ID_OFFSET: usize = IDLEN_OFFSET + 1;

/// Marks the last (and only) record.
const FINAL_RECORD_DELIMITER: u8 = 0x02;

/// Smallest record size RFC 8188 allows.
const MIN_RECORD_SIZE: u32 = 18;

const KEY_INFO_PREFIX: &[u8] = b"WebPush: info\0";
const CEK_INFO: &[u8] = b"Content-Encoding: aes128gcm\0";
const NONCE_INFO: &[u8] = b"Content-Encoding: nonce\0";

const IKM_LEN: usize = 32;
const CEK_LEN: usize = 16;
const NONCE_LEN: usize = 12;

/// The fixed 86-byte header that starts every encrypted record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecordHeader {
    /// Per-message HKDF salt.
    pub salt: [u8; SALT_LEN],
    /// Declared record size.
    pub record_size: u32,
    /// Sender's ephemeral public key (uncompressed point).
    pub key_id: [u8; PUBLIC_KEY_LEN],
}

impl RecordHeader {
    /// Write the header fields at their fixed offsets.
    pub fn to_bytes(&self) -> [u8; HEADER_LEN] {
        let mut buf = [0u8; HEADER_LEN];
        buf[..RS_OFFSET].copy_from_slice(&self.salt);
        buf[RS_OFFSET..IDLEN_OFFSET].copy_from_slice(&self.record_size.to_be_bytes());
        buf[IDLEN_OFFSET] = PUBLIC_KEY_LEN as u8;
        buf[KEY_ID_OFFSET..].copy_from_slice(&self.key_id);
        buf
    }

    /// Read the header from the front of an encrypted record.
    pub fn parse(record: &[u8]) -> Result<Self> {
        if record.len() < HEADER_LEN {
            return Err(PushError::Crypto(format!(
                "record of {} bytes is shorter than the {HEADER_LEN} byte header",
                record.len()
            )));
        }

        let key_id_len = usize::from(record[IDLEN_OFFSET]);
        if key_id_len != PUBLIC_KEY_LEN {
            return Err(PushError::Crypto(format!(
                "key id length must be {PUBLIC_KEY_LEN}, got {key_id_len}"
            )));
        }

        let mut salt = [0u8; SALT_LEN];
        salt.copy_from_slice(&record[..RS_OFFSET]);
        let mut rs = [0u8; 4];
        rs.copy_from_slice(&record[RS_OFFSET..IDLEN_OFFSET]);
        let record_size = u32::from_be_bytes(rs);
        if record_size < MIN_RECORD_SIZE {
            return Err(PushError::Crypto(format!("record size {record_size} is too small")));
        }
        let mut key_id = [0u8; PUBLIC_KEY_LEN];
        key_id.copy_from_slice(&record[KEY_ID_OFFSET..HEADER_LEN]);

        Ok(Self {
            salt,
            record_size,
            key_id,
        })
    }
}

/// Encrypt `plaintext` for one subscriber.
///
/// A fresh ephemeral key pair and salt are drawn on every call, so identical
/// inputs never produce the same record.
pub fn encrypt(plaintext: &[u8], subscriber_public_key: &[u8], auth_secret: &[u8]) -> Result<Vec<u8>> {
    let ephemeral = SecretKey::random(&mut OsRng);
    let mut salt = [0u8; SALT_LEN];
    rand::rng().fill_bytes(&mut salt);
    encrypt_with(plaintext, subscriber_public_key, auth_secret, &ephemeral, salt)
}

fn encrypt_with(
    plaintext: &[u8],
    subscriber_public_key: &[u8],
    auth_secret: &[u8],
    ephemeral: &SecretKey,
    salt: [u8; SALT_LEN],
) -> Result<Vec<u8>> {
    if plaintext.len() > MAX_PLAINTEXT_LEN {
        return Err(PushError::PayloadTooLarge {
            len: plaintext.len(),
            max: MAX_PLAINTEXT_LEN,
        });
    }
    check_auth_secret(auth_secret)?;
    let ua_public = import_public_key(subscriber_public_key)?;

    let as_public: [u8; PUBLIC_KEY_LEN] = ephemeral
        .public_key()
        .to_encoded_point(false)
        .as_bytes()
        .try_into()
        .map_err(|e| PushError::Crypto(format!("ephemeral key encoding: {e}")))?;

    let shared = diffie_hellman(ephemeral.to_nonzero_scalar(), ua_public.as_affine());
    let (cek, nonce) = derive_content_keys(
        shared.raw_secret_bytes().as_slice(),
        auth_secret,
        subscriber_public_key,
        &as_public,
        &salt,
    )?;

    let mut padded = Zeroizing::new(Vec::with_capacity(plaintext.len() + 1));
    padded.extend_from_slice(plaintext);
    padded.push(FINAL_RECORD_DELIMITER);

    let cipher = Aes128Gcm::new_from_slice(&cek)
        .map_err(|e| PushError::Crypto(format!("invalid content-encryption key: {e}")))?;
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), padded.as_slice())
        .map_err(|e| PushError::Crypto(format!("AES-GCM encryption failed: {e}")))?;

    let header = RecordHeader {
        salt,
        record_size: RECORD_SIZE,
        key_id: as_public,
    };

    let mut record = Vec::with_capacity(HEADER_LEN + ciphertext.len());
    record.extend_from_slice(&header.to_bytes());
    record.extend_from_slice(&ciphertext);
    Ok(record)
}

/// Decrypt a single-record body with the subscriber's private key.
///
/// Inverse of [`encrypt`]; returns the plaintext with the padding delimiter
/// stripped.
pub fn decrypt(record: &[u8], subscriber_private_key: &SecretKey, auth_secret: &[u8]) -> Result<Vec<u8>> {
    let header = RecordHeader::parse(record)?;
    check_auth_secret(auth_secret)?;

    let ciphertext = &record[HEADER_LEN..];
    if ciphertext.len() <= TAG_LEN {
        return Err(PushError::Crypto("record has no ciphertext".into()));
    }
    if ciphertext.len() > header.record_size as usize {
        return Err(PushError::Crypto(format!(
            "ciphertext of {} bytes spans more than one {} byte record",
            ciphertext.len(),
            header.record_size
        )));
    }

    let as_public = import_public_key(&header.key_id)?;
    let ua_public = subscriber_private_key.public_key().to_encoded_point(false);

    let shared = diffie_hellman(subscriber_private_key.to_nonzero_scalar(), as_public.as_affine());
    let (cek, nonce) = derive_content_keys(
        shared.raw_secret_bytes().as_slice(),
        auth_secret,
        ua_public.as_bytes(),
        &header.key_id,
        &header.salt,
    )?;

    let cipher = Aes128Gcm::new_from_slice(&cek)
        .map_err(|e| PushError::Crypto(format!("invalid content-encryption key: {e}")))?;
    let padded = Zeroizing::new(
        cipher
            .decrypt(Nonce::from_slice(&nonce), ciphertext)
            .map_err(|e| PushError::Crypto(format!("AES-GCM decryption failed: {e}")))?,
    );

    let end = padded
        .iter()
        .rposition(|&b| b != 0)
        .ok_or_else(|| PushError::Crypto("record has no padding delimiter".into()))?;
    if padded[end] != FINAL_RECORD_DELIMITER {
        return Err(PushError::Crypto(format!(
            "expected final record delimiter, found {:#04x}",
            padded[end]
        )));
    }

    Ok(padded[..end].to_vec())
}

/// IKM from the ECDH secret and auth secret, then CEK and nonce from the salt.
fn derive_content_keys(
    ecdh_secret: &[u8],
    auth_secret: &[u8],
    ua_public: &[u8],
    as_public: &[u8],
    salt: &[u8],
) -> Result<(Zeroizing<Vec<u8>>, Zeroizing<Vec<u8>>)> {
    let mut key_info = Vec::with_capacity(KEY_INFO_PREFIX.len() + 2 * PUBLIC_KEY_LEN);
    key_info.extend_from_slice(KEY_INFO_PREFIX);
    key_info.extend_from_slice(ua_public);
    key_info.extend_from_slice(as_public);

    let ikm = Zeroizing::new(kdf::derive(auth_secret, ecdh_secret, &key_info, IKM_LEN)?);
    let prk = Zeroizing::new(kdf::extract(salt, &ikm));
    let cek = Zeroizing::new(kdf::expand(&*prk, CEK_INFO, CEK_LEN)?);
    let nonce = Zeroizing::new(kdf::expand(&*prk, NONCE_INFO, NONCE_LEN)?);
    Ok((cek, nonce))
}

fn import_public_key(bytes: &[u8]) -> Result<PublicKey> {
    if bytes.len() != PUBLIC_KEY_LEN || bytes[0] != 0x04 {
        return Err(PushError::Crypto(format!(
            "p256dh must be a {PUBLIC_KEY_LEN}-byte uncompressed point, got {} bytes",
            bytes.len()
        )));
    }
    PublicKey::from_sec1_bytes(bytes)
        .map_err(|e| PushError::Crypto(format!("p256dh is not a valid P-256 point: {e}")))
}

fn check_auth_secret(auth_secret: &[u8]) -> Result<()> {
    if auth_secret.len() == AUTH_SECRET_LEN {
        Ok(())
    } else {
        Err(PushError::Crypto(format!(
            "auth secret must be {AUTH_SECRET_LEN} bytes, got {}",
            auth_secret.len()
        )))
    }
}
