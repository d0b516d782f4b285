//! HMAC-SHA256 body signing shared by the engine (sign) and the ingestion endpoint (verify).
//!
//! Header format: `sha256=<lowercase hex>`.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::time::Duration;

pub const SIGNATURE_HEADER: &str = "X-Bridge-Signature";
pub const TIMESTAMP_HEADER: &str = "X-Bridge-Timestamp";
const PREFIX: &str = "sha256=";

type HmacSha256 = Hmac<Sha256>;

/// Signature header value for `body`.
pub fn sign(secret: &str, body: &[u8]) -> String {
    // HMAC accepts keys of any length
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(m) => m,
        Err(_) => return String::new(),
    };
    mac.update(body);
    format!("{}{}", PREFIX, hex::encode(mac.finalize().into_bytes()))
}

/// Constant-time check of a `sha256=<hex>` header against `body`.
pub fn verify_signature(secret: &str, body: &[u8], header: &str) -> bool {
    let Some(digest_hex) = header.trim().strip_prefix(PREFIX) else {
        return false;
    };
    let Ok(expected) = hex::decode(digest_hex) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

/// Accepts RFC3339 or unix seconds within `skew` of `now`, in either direction.
pub fn verify_timestamp(header: &str, skew: Duration, now: DateTime<Utc>) -> bool {
    let raw = header.trim();
    let at = match DateTime::parse_from_rfc3339(raw) {
        Ok(t) => t.with_timezone(&Utc),
        Err(_) => match raw.parse::<i64>().ok().and_then(|s| DateTime::from_timestamp(s, 0)) {
            Some(t) => t,
            None => return false,
        },
    };
    let delta = (now - at).num_seconds().unsigned_abs();
    delta <= skew.as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_sign_then_verify() {
        let body = br#"{"event_type":"message"}"#;
        let sig = sign("s3cr3t", body);
        assert!(sig.starts_with("sha256="));
        assert_eq!(sig.len(), "sha256=".len() + 64);
        assert!(verify_signature("s3cr3t", body, &sig));
    }

    #[test]
    fn test_verify_rejects_tampering() {
        let body = br#"{"text":"hola"}"#;
        let sig = sign("s3cr3t", body);
        assert!(!verify_signature("s3cr3t", br#"{"text":"hola!"}"#, &sig));
        assert!(!verify_signature("other", body, &sig));
        assert!(!verify_signature("s3cr3t", body, sig.trim_start_matches("sha256=")));
        assert!(!verify_signature("s3cr3t", body, &sig.replace("sha256=", "sha1=")));
        assert!(!verify_signature("s3cr3t", body, "sha256=zz"));
        assert!(!verify_signature("s3cr3t", body, ""));
    }

    #[test]
    fn test_timestamp_skew() {
        let now = Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap();
        let skew = Duration::from_secs(300);
        assert!(verify_timestamp("2025-03-01T11:56:00Z", skew, now));
        assert!(verify_timestamp("2025-03-01T12:04:59Z", skew, now));
        assert!(!verify_timestamp("2025-03-01T11:50:00Z", skew, now));
        assert!(verify_timestamp(&now.timestamp().to_string(), skew, now));
        assert!(!verify_timestamp(&(now.timestamp() - 301).to_string(), skew, now));
        assert!(!verify_timestamp("yesterday", skew, now));
    }
}
