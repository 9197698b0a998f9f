//! Payload encryption and session tokens.
//!
//! Two capabilities share this module because they share key-handling rules:
//!
//! 1. **Payload crypto** - AES-256-GCM over opaque medical blobs, with a
//!    version prefix so keys can rotate without breaking old ciphertext.
//! 2. **Session tokens** - HS256 JWTs binding `{sid, exp, iat}`. Validation
//!    checks the signature first, then the embedded expiry.
//!
//! Both refuse to construct without their secret; `main` turns that into a
//! startup `ConfigurationError` and the process never serves a medical
//! endpoint in that state.

use base64::{engine::general_purpose, Engine as _};
use chrono::{DateTime, TimeZone, Utc};
use common::secret::{ExposeSecret, SecretBox};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM};
use ring::rand::{SecureRandom, SystemRandom};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Version prefix on every ciphertext this build produces.
const PAYLOAD_VERSION: &str = "v1";

/// Wire name of the payload algorithm.
const PAYLOAD_ALG: &str = "AES-256-GCM";

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Invalid key material: {0}")]
    InvalidKey(String),

    #[error("Encryption failed")]
    EncryptFailed,

    #[error("Decryption failed")]
    DecryptFailed,

    #[error("Unsupported ciphertext version: {0}")]
    UnsupportedVersion(String),

    #[error("Algorithm mismatch: {0}")]
    AlgorithmMismatch(String),

    #[error("Implausible ciphertext timestamp")]
    InvalidTimestamp,

    #[error("Token signing failed")]
    TokenSignFailed,

    #[error("Invalid token: {0}")]
    InvalidToken(String),

    #[error("Token expired")]
    TokenExpired,
}

/// An encrypted payload envelope.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct EncryptedPayload {
    /// `v1.<base64 nonce>.<base64 ciphertext+tag>`
    pub ciphertext: String,
    pub alg: String,
    /// Encryption time, epoch milliseconds.
    pub ts: i64,
}

/// Symmetric payload encryption over opaque medical blobs.
pub struct PayloadCrypto {
    key: SecretBox<Vec<u8>>,
    rng: SystemRandom,
}

impl PayloadCrypto {
    /// Requires exactly 32 bytes of key material.
    pub fn new(key: SecretBox<Vec<u8>>) -> Result<Self, CryptoError> {
        if key.expose_secret().len() != 32 {
            return Err(CryptoError::InvalidKey(format!(
                "Expected 32 bytes, got {}",
                key.expose_secret().len()
            )));
        }
        Ok(Self {
            key,
            rng: SystemRandom::new(),
        })
    }

    /// Encrypt `plaintext` under a fresh random 96-bit nonce.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<EncryptedPayload, CryptoError> {
        let mut nonce_bytes = [0u8; 12];
        self.rng.fill(&mut nonce_bytes).map_err(|e| {
            tracing::error!(target: "mg.crypto", error = ?e, "Nonce generation failed");
            CryptoError::EncryptFailed
        })?;
        let nonce = Nonce::assume_unique_for_key(nonce_bytes);

        let unbound = UnboundKey::new(&AES_256_GCM, self.key.expose_secret()).map_err(|e| {
            tracing::error!(target: "mg.crypto", error = ?e, "Cipher key creation failed");
            CryptoError::EncryptFailed
        })?;
        let sealing_key = LessSafeKey::new(unbound);

        let mut in_out = plaintext.to_vec();
        sealing_key
            .seal_in_place_append_tag(nonce, Aad::empty(), &mut in_out)
            .map_err(|e| {
                tracing::error!(target: "mg.crypto", error = ?e, "Encryption operation failed");
                CryptoError::EncryptFailed
            })?;

        Ok(EncryptedPayload {
            ciphertext: format!(
                "{PAYLOAD_VERSION}.{}.{}",
                general_purpose::STANDARD.encode(nonce_bytes),
                general_purpose::STANDARD.encode(&in_out)
            ),
            alg: PAYLOAD_ALG.to_string(),
            ts: Utc::now().timestamp_millis(),
        })
    }

    /// Decrypt an envelope, rejecting anything whose version, algorithm,
    /// timestamp, or MAC is inconsistent.
    pub fn decrypt(&self, payload: &EncryptedPayload) -> Result<Vec<u8>, CryptoError> {
        if payload.alg != PAYLOAD_ALG {
            return Err(CryptoError::AlgorithmMismatch(payload.alg.clone()));
        }
        if payload.ts <= 0 || payload.ts > Utc::now().timestamp_millis() + 60_000 {
            return Err(CryptoError::InvalidTimestamp);
        }

        let mut parts = payload.ciphertext.splitn(3, '.');
        let version = parts.next().unwrap_or_default();
        if version != PAYLOAD_VERSION {
            return Err(CryptoError::UnsupportedVersion(version.to_string()));
        }
        let nonce_b64 = parts.next().ok_or(CryptoError::DecryptFailed)?;
        let body_b64 = parts.next().ok_or(CryptoError::DecryptFailed)?;

        let nonce_bytes: [u8; 12] = general_purpose::STANDARD
            .decode(nonce_b64)
            .map_err(|_| CryptoError::DecryptFailed)?
            .try_into()
            .map_err(|_| CryptoError::DecryptFailed)?;
        let mut in_out = general_purpose::STANDARD
            .decode(body_b64)
            .map_err(|_| CryptoError::DecryptFailed)?;

        let unbound = UnboundKey::new(&AES_256_GCM, self.key.expose_secret())
            .map_err(|_| CryptoError::DecryptFailed)?;
        let opening_key = LessSafeKey::new(unbound);
        let nonce = Nonce::assume_unique_for_key(nonce_bytes);

        let plaintext = opening_key
            .open_in_place(nonce, Aad::empty(), &mut in_out)
            .map_err(|_| CryptoError::DecryptFailed)?;

        Ok(plaintext.to_vec())
    }
}

/// Claims bound into a session token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionClaims {
    /// Session id, hex-encoded.
    pub sid: String,
    /// Expiry, epoch seconds.
    pub exp: i64,
    /// Issued at, epoch seconds.
    pub iat: i64,
}

/// Signed opaque session tokens with TTL.
pub struct TokenService {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl TokenService {
    /// Requires at least 32 bytes of signing secret.
    pub fn new(secret: &SecretBox<Vec<u8>>) -> Result<Self, CryptoError> {
        let bytes = secret.expose_secret();
        if bytes.len() < 32 {
            return Err(CryptoError::InvalidKey(format!(
                "Expected at least 32 bytes, got {}",
                bytes.len()
            )));
        }
        Ok(Self {
            encoding: EncodingKey::from_secret(bytes),
            decoding: DecodingKey::from_secret(bytes),
        })
    }

    /// Issue a token binding `session_id` to an absolute expiry.
    pub fn issue(
        &self,
        session_id: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<String, CryptoError> {
        let claims = SessionClaims {
            sid: session_id.to_string(),
            exp: expires_at.timestamp(),
            iat: Utc::now().timestamp(),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding).map_err(|e| {
            tracing::error!(target: "mg.crypto", error = %e, "Token signing failed");
            CryptoError::TokenSignFailed
        })
    }

    /// Verify signature and expiry; returns the bound claims.
    ///
    /// Expiry is checked here against the same clock the session store uses,
    /// so a token whose embedded expiry has passed is rejected even when the
    /// signature is valid.
    pub fn validate(&self, token: &str) -> Result<SessionClaims, CryptoError> {
        let mut validation = Validation::new(Algorithm::HS256);
        // The store re-checks session liveness; the token check must be exact
        validation.leeway = 0;
        validation.validate_exp = false; // checked manually below for a typed error

        let data = decode::<SessionClaims>(token, &self.decoding, &validation)
            .map_err(|e| CryptoError::InvalidToken(e.to_string()))?;

        if data.claims.exp <= Utc::now().timestamp() {
            return Err(CryptoError::TokenExpired);
        }
        Ok(data.claims)
    }

    /// The expiry instant bound into `claims`.
    pub fn expiry(claims: &SessionClaims) -> DateTime<Utc> {
        Utc.timestamp_opt(claims.exp, 0)
            .single()
            .unwrap_or_else(Utc::now)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn test_key() -> SecretBox<Vec<u8>> {
        SecretBox::new(Box::new(vec![7u8; 32]))
    }

    #[test]
    fn test_payload_round_trip() {
        let crypto = PayloadCrypto::new(test_key()).unwrap();
        let plaintext = br#"{"condition":"hypertension"}"#;

        let envelope = crypto.encrypt(plaintext).unwrap();
        assert_eq!(envelope.alg, "AES-256-GCM");
        assert!(envelope.ciphertext.starts_with("v1."));

        let decrypted = crypto.decrypt(&envelope).unwrap();
        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn test_payload_rejects_wrong_key_length() {
        let short = SecretBox::new(Box::new(vec![0u8; 16]));
        assert!(matches!(
            PayloadCrypto::new(short),
            Err(CryptoError::InvalidKey(_))
        ));
    }

    #[test]
    fn test_decrypt_rejects_tampered_ciphertext() {
        let crypto = PayloadCrypto::new(test_key()).unwrap();
        let mut envelope = crypto.encrypt(b"sensitive").unwrap();

        // Flip a character inside the ciphertext body
        let tampered = envelope.ciphertext.replace(
            envelope.ciphertext.chars().last().unwrap(),
            if envelope.ciphertext.ends_with('A') {
                "B"
            } else {
                "A"
            },
        );
        envelope.ciphertext = tampered;

        assert!(crypto.decrypt(&envelope).is_err());
    }

    #[test]
    fn test_decrypt_rejects_wrong_alg() {
        let crypto = PayloadCrypto::new(test_key()).unwrap();
        let mut envelope = crypto.encrypt(b"data").unwrap();
        envelope.alg = "AES-128-CBC".to_string();
        assert!(matches!(
            crypto.decrypt(&envelope),
            Err(CryptoError::AlgorithmMismatch(_))
        ));
    }

    #[test]
    fn test_decrypt_rejects_unknown_version() {
        let crypto = PayloadCrypto::new(test_key()).unwrap();
        let mut envelope = crypto.encrypt(b"data").unwrap();
        envelope.ciphertext = format!("v9.{}", &envelope.ciphertext[3..]);
        assert!(matches!(
            crypto.decrypt(&envelope),
            Err(CryptoError::UnsupportedVersion(_))
        ));
    }

    #[test]
    fn test_decrypt_rejects_bad_timestamp() {
        let crypto = PayloadCrypto::new(test_key()).unwrap();
        let mut envelope = crypto.encrypt(b"data").unwrap();
        envelope.ts = -5;
        assert!(matches!(
            crypto.decrypt(&envelope),
            Err(CryptoError::InvalidTimestamp)
        ));
    }

    #[test]
    fn test_decrypt_rejects_wrong_key() {
        let crypto = PayloadCrypto::new(test_key()).unwrap();
        let envelope = crypto.encrypt(b"data").unwrap();

        let other = PayloadCrypto::new(SecretBox::new(Box::new(vec![9u8; 32]))).unwrap();
        assert!(matches!(
            other.decrypt(&envelope),
            Err(CryptoError::DecryptFailed)
        ));
    }

    #[test]
    fn test_token_round_trip_preserves_binding() {
        let service = TokenService::new(&test_key()).unwrap();
        let expires_at = Utc::now() + Duration::minutes(30);

        let token = service.issue("a1b2c3d4e5f60718", expires_at).unwrap();
        let claims = service.validate(&token).unwrap();

        assert_eq!(claims.sid, "a1b2c3d4e5f60718");
        assert_eq!(claims.exp, expires_at.timestamp());
    }

    #[test]
    fn test_token_rejects_expired() {
        let service = TokenService::new(&test_key()).unwrap();
        let token = service
            .issue("sid", Utc::now() - Duration::seconds(5))
            .unwrap();
        assert!(matches!(
            service.validate(&token),
            Err(CryptoError::TokenExpired)
        ));
    }

    #[test]
    fn test_token_rejects_tampered_signature() {
        let service = TokenService::new(&test_key()).unwrap();
        let token = service
            .issue("sid", Utc::now() + Duration::minutes(5))
            .unwrap();

        let other = TokenService::new(&SecretBox::new(Box::new(vec![3u8; 32]))).unwrap();
        assert!(matches!(
            other.validate(&token),
            Err(CryptoError::InvalidToken(_))
        ));
    }

    #[test]
    fn test_token_service_rejects_short_secret() {
        let short = SecretBox::new(Box::new(vec![0u8; 8]));
        assert!(matches!(
            TokenService::new(&short),
            Err(CryptoError::InvalidKey(_))
        ));
    }

    #[test]
    fn test_garbage_token_is_invalid() {
        let service = TokenService::new(&test_key()).unwrap();
        assert!(matches!(
            service.validate("not-a-jwt"),
            Err(CryptoError::InvalidToken(_))
        ));
    }
}
