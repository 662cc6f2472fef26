//! HMAC-SHA256 webhook signatures.
//!
//! The signature covers the exact request body bytes and is sent as
//! `X-Signature-256: sha256=<hex>`.

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::NotificationError;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "X-Signature-256";
pub const DELIVERY_ID_HEADER: &str = "X-Delivery-Id";
pub const EVENT_TYPE_HEADER: &str = "X-Event-Type";
pub const SIGNATURE_PREFIX: &str = "sha256=";

fn mac(secret: &str) -> Result<HmacSha256, NotificationError> {
    HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| NotificationError::Signing(e.to_string()))
}

/// Hex-encoded HMAC-SHA256 of `body` under `secret`.
pub fn sign_payload(body: &[u8], secret: &str) -> Result<String, NotificationError> {
    let mut mac = mac(secret)?;
    mac.update(body);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Value for the signature header.
pub fn signature_header(body: &[u8], secret: &str) -> Result<String, NotificationError> {
    Ok(format!("{SIGNATURE_PREFIX}{}", sign_payload(body, secret)?))
}

/// Check a received signature header against the body.
///
/// Accepts the value with or without the `sha256=` prefix. The comparison
/// is constant-time.
pub fn verify_signature(body: &[u8], secret: &str, signature: &str) -> bool {
    let signature = signature.trim();
    let hex_part = signature
        .strip_prefix(SIGNATURE_PREFIX)
        .unwrap_or(signature);
    let Ok(expected) = hex::decode(hex_part) else {
        return false;
    };
    let Ok(mut mac) = mac(secret) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}
