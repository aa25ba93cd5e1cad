//! Policy check signatures: a content-addressed token tying a response to
//! the request that produced it, valid for 60 seconds.
//!
//! Entries are evicted by time, not count, so a long-running coordinator
//! never accumulates stale entries.

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Mutex;

pub const SIGNATURE_TTL_SECS: i64 = 60;

/// Deterministic hash of policy_type + context + timestamp, as described
/// in the policy check contract.
pub fn compute_signature(policy_type: &str, context: &serde_json::Value, timestamp: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(policy_type.as_bytes());
    hasher.update(context.to_string().as_bytes());
    hasher.update(timestamp.as_bytes());
    hex::encode(hasher.finalize())
}

/// Tracks outstanding signatures issued by this client so a later result
/// can be verified as both genuine and timely.
pub struct SignatureCache {
    issued: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl Default for SignatureCache {
    fn default() -> Self {
        Self::new()
    }
}

impl SignatureCache {
    pub fn new() -> Self {
        Self {
            issued: Mutex::new(HashMap::new()),
        }
    }

    pub fn issue(&self, signature: String, issued_at: DateTime<Utc>) {
        let mut map = self.issued.lock().unwrap();
        map.insert(signature, issued_at);
        Self::evict_expired(&mut map);
    }

    /// True iff `signature` was issued by this client and is still within
    /// the 60-second freshness window. A result older than 60s MUST be
    /// rejected even if otherwise well-formed.
    pub fn verify(&self, signature: &str, now: DateTime<Utc>) -> bool {
        let mut map = self.issued.lock().unwrap();
        Self::evict_expired(&mut map);
        match map.get(signature) {
            Some(issued_at) => (now - *issued_at).num_seconds() < SIGNATURE_TTL_SECS,
            None => false,
        }
    }

    /// Flush all outstanding signatures, called when the policy version
    /// changes.
    pub fn flush(&self) {
        self.issued.lock().unwrap().clear();
    }

    fn evict_expired(map: &mut HashMap<String, DateTime<Utc>>) {
        let now = Utc::now();
        map.retain(|_, issued_at| (now - *issued_at).num_seconds() < SIGNATURE_TTL_SECS);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn signature_is_deterministic_for_identical_inputs() {
        let ctx = serde_json::json!({"round": 1});
        let a = compute_signature("fl_server_control", &ctx, "2026-01-01T00:00:00Z");
        let b = compute_signature("fl_server_control", &ctx, "2026-01-01T00:00:00Z");
        assert_eq!(a, b);
    }

    #[test]
    fn signature_changes_with_any_input() {
        let ctx = serde_json::json!({"round": 1});
        let base = compute_signature("fl_server_control", &ctx, "2026-01-01T00:00:00Z");
        let different_ctx = compute_signature(
            "fl_server_control",
            &serde_json::json!({"round": 2}),
            "2026-01-01T00:00:00Z",
        );
        assert_ne!(base, different_ctx);
    }

    #[test]
    fn fresh_signature_verifies() {
        let cache = SignatureCache::new();
        let now = Utc::now();
        cache.issue("sig-1".to_string(), now);
        assert!(cache.verify("sig-1", now));
    }

    #[test]
    fn expired_signature_is_rejected() {
        let cache = SignatureCache::new();
        let issued = Utc::now() - Duration::seconds(61);
        cache.issue("sig-1".to_string(), issued);
        assert!(!cache.verify("sig-1", Utc::now()));
    }

    #[test]
    fn unknown_signature_is_rejected() {
        let cache = SignatureCache::new();
        assert!(!cache.verify("never-issued", Utc::now()));
    }

    #[test]
    fn flush_clears_all_outstanding_signatures() {
        let cache = SignatureCache::new();
        let now = Utc::now();
        cache.issue("sig-1".to_string(), now);
        cache.flush();
        assert!(!cache.verify("sig-1", now));
    }
}
