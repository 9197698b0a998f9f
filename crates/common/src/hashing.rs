//! Privacy-preserving identifier hashing.
//!
//! Session ids and peer addresses must never appear in plaintext in audit
//! records, rate-limiter keys, or logs. This module provides the one
//! transformation allowed for them: HMAC-SHA256 with a per-deployment secret,
//! truncated for correlation.
//!
//! Properties:
//! - Consistent correlation across records (same input = same hash)
//! - One-way without the secret key
//! - Resistant to rainbow tables (requires the deployment secret)
//! - `h:` prefix marks values that have been through this function

use ring::hmac;

/// Hash an identifier for correlation (HMAC-SHA256, first 16 hex chars).
///
/// Used for session ids and peer addresses that need correlation across
/// audit records but must not be stored in plaintext. Truncation to 8 bytes
/// keeps collisions negligible at gateway scale while limiting reversibility.
///
/// # Arguments
///
/// * `value` - The identifier to hash (session id, peer address)
/// * `secret` - The HMAC secret key (from `config.session_secret`)
pub fn hash_identifier(value: &str, secret: &[u8]) -> String {
    let key = hmac::Key::new(hmac::HMAC_SHA256, secret);
    let tag = hmac::sign(&key, value.as_bytes());
    // HMAC-SHA256 always produces 32 bytes, so .get(..8) always succeeds
    let tag_bytes = tag.as_ref();
    let prefix = tag_bytes.get(..8).unwrap_or(tag_bytes);
    format!("h:{}", hex::encode(prefix))
}

/// Returns true if `value` looks like an output of [`hash_identifier`].
///
/// Used by audit tests to assert that no raw identifier slipped through.
pub fn is_hashed(value: &str) -> bool {
    value
        .strip_prefix("h:")
        .is_some_and(|rest| rest.len() == 16 && rest.chars().all(|c| c.is_ascii_hexdigit()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_SECRET: &[u8] = &[0u8; 32];

    #[test]
    fn test_hash_identifier_consistency() {
        let value = "3f2a9c4d1e8b7a65";
        let hash1 = hash_identifier(value, TEST_SECRET);
        let hash2 = hash_identifier(value, TEST_SECRET);
        assert_eq!(hash1, hash2, "Same input should produce same hash");
    }

    #[test]
    fn test_hash_identifier_uniqueness() {
        let hash1 = hash_identifier("session-a", TEST_SECRET);
        let hash2 = hash_identifier("session-b", TEST_SECRET);
        assert_ne!(
            hash1, hash2,
            "Different inputs should produce different hashes"
        );
    }

    #[test]
    fn test_hash_identifier_shape() {
        let hash = hash_identifier("any-value", TEST_SECRET);
        // Length is 18: "h:" prefix (2) + 16 hex chars
        assert_eq!(hash.len(), 18);
        assert!(hash.starts_with("h:"));
        assert!(is_hashed(&hash));
    }

    #[test]
    fn test_hash_identifier_different_secrets() {
        let value = "session-id";
        let hash1 = hash_identifier(value, &[0u8; 32]);
        let hash2 = hash_identifier(value, &[1u8; 32]);
        assert_ne!(
            hash1, hash2,
            "Different secrets should produce different hashes"
        );
    }

    #[test]
    fn test_hash_identifier_does_not_leak_input() {
        let value = "patient-session-424242";
        let hash = hash_identifier(value, TEST_SECRET);
        assert!(!hash.contains("424242"));
        assert!(!hash.contains("patient"));
    }

    #[test]
    fn test_is_hashed_rejects_raw_values() {
        assert!(!is_hashed("3f2a9c4d1e8b7a65"));
        assert!(!is_hashed("h:short"));
        assert!(!is_hashed("h:nothexnothexnotx"));
        assert!(!is_hashed(""));
    }
}
