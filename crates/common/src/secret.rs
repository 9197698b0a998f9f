//! Secret types for protecting sensitive values from accidental logging.
//!
//! Re-exports from the [`secrecy`] crate with gateway-specific guidance. Use
//! these types for every sensitive value the gateway holds: the payload
//! encryption key, the token-signing secret, the identifier-hashing pepper,
//! and upstream LLM API keys.
//!
//! # Compile-Time Safety
//!
//! `SecretBox<T>` and `SecretString` implement `Debug` with redaction, so a
//! struct that derives `Debug` while containing a secret gets safe logging
//! behavior for free. Accessing the value requires an explicit
//! `.expose_secret()` call, which keeps exposure sites greppable.
//!
//! # Memory Safety
//!
//! Secrets are zeroized when dropped, so key material does not linger in
//! memory after use.
//!
//! # Example
//!
//! ```rust
//! use common::secret::SecretString;
//! use secrecy::ExposeSecret;
//!
//! #[derive(Debug)]
//! struct LlmProviderConfig {
//!     endpoint: String,
//!     api_key: SecretString, // Debug shows "[REDACTED]"
//! }
//!
//! let cfg = LlmProviderConfig {
//!     endpoint: "https://llm.example.com/v1".to_string(),
//!     api_key: SecretString::from("sk-test-000"),
//! };
//!
//! // Safe: the key is redacted
//! let rendered = format!("{cfg:?}");
//! assert!(!rendered.contains("sk-test-000"));
//!
//! // Explicit exposure required to use the value
//! let key: &str = cfg.api_key.expose_secret();
//! # let _ = key;
//! ```
//!
//! # Gateway Usage Guidelines
//!
//! Use `SecretString` for:
//! - LLM provider API keys
//! - Bearer tokens held in tests
//!
//! Use `SecretBox<Vec<u8>>` for:
//! - The AES-256-GCM payload encryption key
//! - The HS256 token-signing secret
//! - The identifier-hashing pepper

// Re-export the main types from secrecy
pub use secrecy::{ExposeSecret, SecretBox, SecretString};

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[test]
    fn test_debug_is_redacted() {
        let secret = SecretString::from("sk-live-do-not-log");
        let debug_str = format!("{secret:?}");

        assert!(debug_str.contains("REDACTED"));
        assert!(!debug_str.contains("sk-live-do-not-log"));
    }

    #[test]
    fn test_expose_secret_returns_inner_value() {
        let secret = SecretString::from("pepper-value");
        assert_eq!(secret.expose_secret(), "pepper-value");
    }

    #[test]
    fn test_struct_with_secret_is_safe() {
        #[allow(dead_code)]
        #[derive(Debug)]
        struct ProviderConfig {
            endpoint: String,
            api_key: SecretString,
        }

        let cfg = ProviderConfig {
            endpoint: "https://llm.example.com".to_string(),
            api_key: SecretString::from("super-secret"),
        };

        let debug_str = format!("{cfg:?}");

        // Endpoint should be visible
        assert!(debug_str.contains("llm.example.com"));
        // Key should be redacted
        assert!(debug_str.contains("REDACTED"));
        assert!(!debug_str.contains("super-secret"));
    }

    #[test]
    fn test_deserialize() {
        #[allow(dead_code)]
        #[derive(Debug, Deserialize)]
        struct Credentials {
            name: String,
            api_key: SecretString,
        }

        let json = r#"{"name": "primary", "api_key": "my-secret-value"}"#;
        let creds: Credentials = serde_json::from_str(json).expect("deserialize");

        assert_eq!(creds.api_key.expose_secret(), "my-secret-value");

        let debug = format!("{creds:?}");
        assert!(!debug.contains("my-secret-value"));
        assert!(debug.contains("REDACTED"));
    }

    #[test]
    fn test_secret_box_bytes() {
        let key = SecretBox::new(Box::new(vec![7u8; 32]));
        assert_eq!(key.expose_secret().len(), 32);

        let debug = format!("{key:?}");
        assert!(debug.contains("REDACTED"));
    }
}
