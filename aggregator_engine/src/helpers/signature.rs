//! HMAC-SHA256 signatures for webhook payloads and provider callbacks.
//!
//! The signature is the lowercase hex encoding of `HMAC-SHA256(secret, payload)`, computed over the exact payload
//! bytes that go on the wire.
use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, Error)]
#[error("Could not compute signature: {0}")]
pub struct SignatureError(String);

pub fn sign_payload(secret: &str, payload: &[u8]) -> Result<String, SignatureError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).map_err(|e| SignatureError(e.to_string()))?;
    mac.update(payload);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Checks `signature` (hex) against the payload in constant time.
pub fn verify_signature(secret: &str, payload: &[u8], signature: &str) -> bool {
    let Ok(expected) = hex::decode(signature.trim()) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(payload);
    mac.verify_slice(&expected).is_ok()
}
