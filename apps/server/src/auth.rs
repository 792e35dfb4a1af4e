use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::collections::BTreeMap;

use crate::models::CustomerIdentity;

type HmacSha256 = Hmac<Sha256>;

/// Maximum age of a customer token before it's considered expired (24 hours).
const MAX_TOKEN_AGE_SECS: i64 = 86400;

/// Validates a customer token issued by the identity provider and extracts
/// the customer id.
///
/// Token format: form-urlencoded `customer_id=<id>&issued_at=<unix>&hash=<hex>`
/// where `hash` is HMAC-SHA256 over the sorted non-hash pairs, keyed with the
/// shared identity secret.
pub fn validate_customer_token(
    token: &str,
    identity_secret: &str,
    now_unix: i64,
) -> Option<CustomerIdentity> {
    let params: BTreeMap<String, String> = url::form_urlencoded::parse(token.as_bytes())
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

    let hash = params.get("hash")?;

    // Reject replayed tokens
    let issued_at: i64 = params.get("issued_at")?.parse().ok()?;
    if now_unix - issued_at > MAX_TOKEN_AGE_SECS {
        tracing::warn!("customer token expired: age={}s", now_unix - issued_at);
        return None;
    }

    // Data-check string: sorted key=value pairs, excluding hash
    let data_check_string: String = params
        .iter()
        .filter(|(k, _)| k.as_str() != "hash")
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("\n");

    let mut mac = HmacSha256::new_from_slice(identity_secret.as_bytes())
        .expect("HMAC can take key of any size");
    mac.update(data_check_string.as_bytes());
    let expected = hex::decode(hash).ok()?;
    if mac.verify_slice(&expected).is_err() {
        tracing::warn!("customer token hash mismatch");
        return None;
    }

    let customer_id: i64 = params.get("customer_id")?.parse().ok()?;
    Some(CustomerIdentity { customer_id })
}

/// Extract the customer identity from an Authorization header.
/// Header format: `Customer <token>`
pub fn extract_customer_from_header(
    auth_header: &str,
    identity_secret: &str,
    now_unix: i64,
) -> Option<CustomerIdentity> {
    let token = auth_header.strip_prefix("Customer ")?;
    validate_customer_token(token, identity_secret, now_unix)
}

/// Check the admin token header against the configured secret. Compared in
/// constant time via HMAC so the token is not recoverable by timing.
pub fn is_admin_token(presented: &str, admin_token: &str) -> bool {
    if admin_token.is_empty() {
        return false;
    }
    let mut mac = HmacSha256::new_from_slice(b"admin-token").expect("HMAC key");
    mac.update(admin_token.as_bytes());
    let expected = mac.finalize().into_bytes();

    let mut mac = HmacSha256::new_from_slice(b"admin-token").expect("HMAC key");
    mac.update(presented.as_bytes());
    mac.verify_slice(&expected).is_ok()
}
