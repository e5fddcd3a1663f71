//! HKDF (RFC 5869) over HMAC-SHA-256.
//!
//! The aes128gcm content encoding uses HKDF in two shapes: a full
//! extract+expand to mix the ECDH secret with the subscriber's auth secret,
//! and separate extract/expand steps to turn the per-message salt into a
//! content-encryption key and nonce. Both are exposed here.

// Rust guideline compliant 2026-02

use hkdf::Hkdf;
use sha2::Sha256;

use crate::error::{PushError, Result};

/// SHA-256 output length, and so the PRK length.
pub const HASH_LEN: usize = 32;

/// Largest output `expand` can produce (255 blocks).
pub const MAX_OUTPUT_LEN: usize = 255 * HASH_LEN;

/// HKDF-Extract: `PRK = HMAC(salt, ikm)`.
pub fn extract(salt: &[u8], ikm: &[u8]) -> [u8; HASH_LEN] {
    let (prk, _) = Hkdf::<Sha256>::extract(Some(salt), ikm);
    prk.into()
}

/// HKDF-Expand of `prk` with `info`, `len` bytes long.
pub fn expand(prk: &[u8], info: &[u8], len: usize) -> Result<Vec<u8>> {
    let hk = Hkdf::<Sha256>::from_prk(prk)
        .map_err(|e| PushError::Crypto(format!("HKDF PRK rejected: {e}")))?;
    let mut okm = vec![0u8; len];
    hk.expand(info, &mut okm).map_err(|e| {
        PushError::Crypto(format!(
            "HKDF output of {len} bytes exceeds {MAX_OUTPUT_LEN}: {e}"
        ))
    })?;
    Ok(okm)
}

/// Full HKDF: extract with `salt`, then expand with `info`.
pub fn derive(salt: &[u8], ikm: &[u8], info: &[u8], len: usize) -> Result<Vec<u8>> {
    expand(&extract(salt, ikm), info, len)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unhex(s: &str) -> Vec<u8> {
        (0..s.len())
            .step_by(2)
            .map(|i| u8::from_str_radix(&s[i..i + 2], 16).unwrap())
            .collect()
    }

    // RFC 5869, Appendix A.1
    #[test]
    fn test_rfc5869_case_1() {
        let ikm = [0x0b_u8; 22];
        let salt: Vec<u8> = (0x00..=0x0c).collect();
        let info: Vec<u8> = (0xf0..=0xf9).collect();

        let prk = extract(&salt, &ikm);
        assert_eq!(
            prk.to_vec(),
            unhex("077709362c2e32df0ddc3f0dc47bba6390b6c73bb50f9c3122ec844ad7c2b3e5")
        );

        let okm = expand(&prk, &info, 42).unwrap();
        assert_eq!(
            okm,
            unhex(
                "3cb25f25faacd57a90434f64d0362f2a2d2d0a90cf1a5a4c5db02d56ecc4c5bf34007208d5b887185865"
            )
        );
    }

    // RFC 5869, Appendix A.3: zero-length salt and info
    #[test]
    fn test_rfc5869_case_3() {
        let ikm = [0x0b_u8; 22];

        let prk = extract(&[], &ikm);
        assert_eq!(
            prk.to_vec(),
            unhex("19ef24a32c717b167f33a91d6f648bdf96596776afdb6377ac434c1c293ccb04")
        );

        let okm = derive(&[], &ikm, &[], 42).unwrap();
        assert_eq!(
            okm,
            unhex(
                "8da4e775a563c18f715f802a063c5a31b8a11f5c5ee1879ec3454e5f3c738d2d9d201395faa4b61a96c8"
            )
        );
    }

    #[test]
    fn test_expand_rejects_short_prk() {
        assert!(matches!(
            expand(&[1u8; 16], b"info", 16),
            Err(PushError::Crypto(_))
        ));
    }

    #[test]
    fn test_empty_salt_is_accepted() {
        let prk = extract(&[], b"ikm");
        assert_eq!(prk.len(), HASH_LEN);
    }

    #[test]
    fn test_expand_rejects_oversized_output() {
        let prk = [7u8; HASH_LEN];
        assert!(matches!(
            expand(&prk, b"info", MAX_OUTPUT_LEN + 1),
            Err(PushError::Crypto(_))
        ));
        assert_eq!(expand(&prk, b"info", MAX_OUTPUT_LEN).unwrap().len(), MAX_OUTPUT_LEN);
    }
}
