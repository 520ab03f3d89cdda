//! Exchange Authentication — HMAC-SHA256 Request Signing
//!
//! Signs every REST request per the BitMEX expiring-signature scheme:
//! `api-signature = hex(HMAC_SHA256(secret, verb + path + expires + body))`
//! with `api-expires` a unix timestamp shortly in the future.
//! Credentials come from environment variables (BITMEX_API_KEY,
//! BITMEX_API_SECRET), never from config files.

use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};

/// Seconds a signed request stays valid.
const EXPIRY_WINDOW_SECS: u64 = 60;

/// REST API authentication handler.
pub struct BitmexAuth {
    /// API key from BITMEX_API_KEY env var.
    api_key: String,
    /// API secret from BITMEX_API_SECRET env var (never sent in headers).
    api_secret: String,
}

impl BitmexAuth {
    /// Load credentials from environment variables.
    ///
    /// Required env vars: BITMEX_API_KEY, BITMEX_API_SECRET.
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("BITMEX_API_KEY")
            .context("BITMEX_API_KEY not set")?;
        let api_secret = std::env::var("BITMEX_API_SECRET")
            .context("BITMEX_API_SECRET not set")?;
        Ok(Self { api_key, api_secret })
    }

    /// Construct from explicit credentials (tests, paper accounts).
    pub fn new(api_key: impl Into<String>, api_secret: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            api_secret: api_secret.into(),
        }
    }

    /// The public API key sent in the `api-key` header.
    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    /// Expiry timestamp for a request signed now.
    pub fn expires() -> u64 {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        now + EXPIRY_WINDOW_SECS
    }

    /// Hex-encoded signature over `verb + path + expires + body`.
    ///
    /// `path` must include the API prefix and any query string, exactly
    /// as sent on the wire.
    pub fn sign(&self, verb: &str, path: &str, expires: u64, body: &str) -> String {
        let message = format!("{verb}{path}{expires}{body}");
        let digest = hmac_sha256::HMAC::mac(message.as_bytes(), self.api_secret.as_bytes());
        digest.iter().map(|b| format!("{b:02x}")).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signature_is_hex_sha256() {
        let auth = BitmexAuth::new("key", "secret");
        let sig = auth.sign("GET", "/api/v1/instrument", 1_700_000_000, "");
        assert_eq!(sig.len(), 64);
        assert!(sig.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_signature_deterministic() {
        let auth = BitmexAuth::new("key", "secret");
        let a = auth.sign("GET", "/api/v1/order", 1_700_000_000, "");
        let b = auth.sign("GET", "/api/v1/order", 1_700_000_000, "");
        assert_eq!(a, b);
    }

    #[test]
    fn test_signature_covers_all_inputs() {
        let auth = BitmexAuth::new("key", "secret");
        let base = auth.sign("POST", "/api/v1/order", 1_700_000_000, "{}");
        assert_ne!(base, auth.sign("PUT", "/api/v1/order", 1_700_000_000, "{}"));
        assert_ne!(base, auth.sign("POST", "/api/v1/order/bulk", 1_700_000_000, "{}"));
        assert_ne!(base, auth.sign("POST", "/api/v1/order", 1_700_000_001, "{}"));
        assert_ne!(base, auth.sign("POST", "/api/v1/order", 1_700_000_000, "[]"));
    }

    #[test]
    fn test_expires_is_in_the_future() {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs();
        assert!(BitmexAuth::expires() >= now + EXPIRY_WINDOW_SECS - 1);
    }
}
