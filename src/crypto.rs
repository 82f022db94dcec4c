//! Scan-token generation and signing, plus secret hashing for API keys.
//!
//! A ticket's scan token is 32 random bytes (base64url, no padding) stored on the
//! ticket row. The payload printed into the QR code is `{token}.{signature}` where
//! the signature is HMAC-SHA256(signing_key, token) in lowercase hex. Check-in
//! rejects payloads whose signature does not verify before touching the database.

use base64::Engine;
use base64::engine::general_purpose::{STANDARD as BASE64, URL_SAFE_NO_PAD};
use hmac::{Hmac, Mac};
use rand::RngCore;
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::error::{AppError, Result};

type HmacSha256 = Hmac<Sha256>;

/// Signing key size (256 bits)
const SIGNING_KEY_SIZE: usize = 32;

/// Random bytes in a scan token
const SCAN_TOKEN_BYTES: usize = 32;

/// HMAC key used to sign and verify scan payloads.
#[derive(Clone)]
pub struct ScanTokenSigner {
    key: [u8; SIGNING_KEY_SIZE],
}

impl ScanTokenSigner {
    /// Create a signer from a base64-encoded string.
    /// The decoded key must be exactly 32 bytes.
    pub fn from_base64(encoded: &str) -> Result<Self> {
        let decoded = BASE64
            .decode(encoded.trim())
            .map_err(|e| AppError::Internal(format!("Invalid signing key encoding: {}", e)))?;

        if decoded.len() != SIGNING_KEY_SIZE {
            return Err(AppError::Internal(format!(
                "Signing key must be {} bytes, got {}",
                SIGNING_KEY_SIZE,
                decoded.len()
            )));
        }

        let mut key = [0u8; SIGNING_KEY_SIZE];
        key.copy_from_slice(&decoded);
        Ok(Self { key })
    }

    pub fn from_bytes(key: [u8; SIGNING_KEY_SIZE]) -> Self {
        Self { key }
    }

    /// Random key, for dev mode only.
    pub fn generate() -> Self {
        let mut key = [0u8; SIGNING_KEY_SIZE];
        OsRng.fill_bytes(&mut key);
        Self { key }
    }

    fn mac(&self) -> HmacSha256 {
        HmacSha256::new_from_slice(&self.key).expect("HMAC can take key of any size")
    }

    fn signature(&self, token: &str) -> String {
        let mut mac = self.mac();
        mac.update(token.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    /// Build the presentable payload for a ticket's scan token.
    pub fn sign(&self, token: &str) -> String {
        format!("{}.{}", token, self.signature(token))
    }

    /// Verify a scanned payload and return the embedded token.
    ///
    /// Returns `None` for malformed payloads or signatures that don't match.
    pub fn verify<'a>(&self, payload: &'a str) -> Option<&'a str> {
        let (token, provided) = payload.trim().rsplit_once('.')?;
        if token.is_empty() {
            return None;
        }

        let expected = self.signature(token);
        let expected_bytes = expected.as_bytes();
        let provided_bytes = provided.as_bytes();

        // Signature length is public (always 64 hex chars)
        if expected_bytes.len() != provided_bytes.len() {
            return None;
        }

        if bool::from(expected_bytes.ct_eq(provided_bytes)) {
            Some(token)
        } else {
            None
        }
    }
}

/// Generate a fresh, unguessable scan token.
pub fn generate_scan_token() -> String {
    let mut bytes = [0u8; SCAN_TOKEN_BYTES];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Generate a new API key. Shown once; only its hash is stored.
pub fn generate_api_key() -> String {
    let mut bytes = [0u8; 24];
    OsRng.fill_bytes(&mut bytes);
    format!("bx_{}", hex::encode(bytes))
}

/// Hash a secret for database lookups (API keys).
/// Uses SHA-256 with application salt, returns lowercase hex string.
pub fn hash_secret(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(b"boxoffice-v1:");
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}
