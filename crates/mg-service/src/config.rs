//! Service configuration.
//!
//! All configuration enters through environment variables, loadable from a
//! plain map for tests. Secrets live in `SecretBox`/`SecretString` so Debug
//! output never carries key material. Absent required secrets fail startup;
//! the process refuses to serve any medical endpoint in that state.

use crate::llm::ModelPreference;
use crate::models::ToolName;
use base64::{engine::general_purpose, Engine as _};
use common::secret::{ExposeSecret, SecretBox, SecretString};
use std::collections::{BTreeMap, HashMap};
use std::env;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;
use tracing::warn;

/// Default bind port.
pub const DEFAULT_PORT: u16 = 8080;

/// Default session TTL in minutes.
pub const DEFAULT_SESSION_TTL_MINUTES: i64 = 30;

/// Default rate-limit window in milliseconds.
pub const DEFAULT_RATE_WINDOW_MS: u64 = 60_000;

/// Default general-endpoint cap per window.
pub const DEFAULT_RATE_GENERAL_MAX: u32 = 100;

/// Default medical-endpoint cap per window.
pub const DEFAULT_RATE_MEDICAL_MAX: u32 = 20;

/// Default session-issuance cap per window.
pub const DEFAULT_RATE_SESSION_MAX: u32 = 10;

/// Default upload ceiling in MiB.
pub const DEFAULT_MAX_IMAGE_MB: usize = 50;

/// Maximum configurable upload ceiling in MiB. Prevents a misconfigured
/// deployment from buffering arbitrarily large bodies.
pub const MAX_MAX_IMAGE_MB: usize = 500;

/// Default artifact TTL in seconds.
pub const DEFAULT_IMAGE_TTL_SECONDS: u64 = 900;

/// Default low-confidence alert threshold.
pub const DEFAULT_CONFIDENCE_THRESHOLD: f64 = 0.6;

/// Default per-call LLM deadline in seconds.
pub const DEFAULT_LLM_TIMEOUT_SECONDS: u64 = 30;

/// Default shutdown drain window in seconds.
pub const DEFAULT_DRAIN_SECONDS: u64 = 5;

/// Maximum configurable drain window. Anything longer just delays restarts
/// without letting more requests finish (the request timeout is 30 s).
pub const MAX_DRAIN_SECONDS: u64 = 60;

/// One upstream LLM endpoint.
pub struct LlmEndpoint {
    pub url: String,
    pub api_key: SecretString,
    pub model: String,
}

impl Clone for LlmEndpoint {
    fn clone(&self) -> Self {
        Self {
            url: self.url.clone(),
            api_key: SecretString::from(self.api_key.expose_secret()),
            model: self.model.clone(),
        }
    }
}

impl fmt::Debug for LlmEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LlmEndpoint")
            .field("url", &self.url)
            .field("api_key", &"[REDACTED]")
            .field("model", &self.model)
            .finish()
    }
}

/// Application configuration with secure handling of sensitive fields.
///
/// Sensitive fields (`encryption_key`, `jwt_secret`, `session_secret`, LLM
/// API keys) are wrapped in secret types:
/// - Automatic redaction in Debug output
/// - Explicit `.expose_secret()` required to access values
/// - Zeroization on drop
pub struct Config {
    pub bind_address: String,
    pub cors_origins: Vec<String>,
    /// AES-256-GCM key for payload encryption. Exactly 32 bytes.
    pub encryption_key: SecretBox<Vec<u8>>,
    /// HS256 signing secret for session tokens. At least 32 bytes.
    pub jwt_secret: SecretBox<Vec<u8>>,
    /// HMAC pepper for identifier hashing. At least 32 bytes.
    pub session_secret: SecretBox<Vec<u8>>,
    pub hipaa_audit_enabled: bool,
    pub audit_log_level: String,
    pub audit_log_dir: PathBuf,
    pub model_preference: ModelPreference,
    /// Overall-confidence floor below which a low-confidence alert fires.
    pub confidence_threshold: f64,
    pub require_disclaimer: bool,
    pub max_image_mb: usize,
    pub supported_formats: Vec<String>,
    pub image_scratch_dir: PathBuf,
    pub image_ttl_seconds: u64,
    pub rate_window_ms: u64,
    pub rate_general_max: u32,
    pub rate_medical_max: u32,
    pub rate_session_max: u32,
    pub session_ttl_minutes: i64,
    /// Launch path per configured tool provider.
    pub tool_paths: BTreeMap<ToolName, String>,
    /// Environment keys forwarded to each provider child.
    pub tool_env: BTreeMap<ToolName, Vec<String>>,
    pub llm_primary: Option<LlmEndpoint>,
    pub llm_fallback: Option<LlmEndpoint>,
    pub llm_timeout_seconds: u64,
    /// Seconds the listener stays open after a stop signal so cancelled
    /// in-flight requests can still deliver their responses.
    pub shutdown_drain_seconds: u64,
    /// Extra PHI key aliases added to the structured-scrub denylist.
    pub phi_key_aliases: Vec<String>,
}

impl Clone for Config {
    fn clone(&self) -> Self {
        Self {
            bind_address: self.bind_address.clone(),
            cors_origins: self.cors_origins.clone(),
            encryption_key: SecretBox::new(Box::new(self.encryption_key.expose_secret().clone())),
            jwt_secret: SecretBox::new(Box::new(self.jwt_secret.expose_secret().clone())),
            session_secret: SecretBox::new(Box::new(self.session_secret.expose_secret().clone())),
            hipaa_audit_enabled: self.hipaa_audit_enabled,
            audit_log_level: self.audit_log_level.clone(),
            audit_log_dir: self.audit_log_dir.clone(),
            model_preference: self.model_preference,
            confidence_threshold: self.confidence_threshold,
            require_disclaimer: self.require_disclaimer,
            max_image_mb: self.max_image_mb,
            supported_formats: self.supported_formats.clone(),
            image_scratch_dir: self.image_scratch_dir.clone(),
            image_ttl_seconds: self.image_ttl_seconds,
            rate_window_ms: self.rate_window_ms,
            rate_general_max: self.rate_general_max,
            rate_medical_max: self.rate_medical_max,
            rate_session_max: self.rate_session_max,
            session_ttl_minutes: self.session_ttl_minutes,
            tool_paths: self.tool_paths.clone(),
            tool_env: self.tool_env.clone(),
            llm_primary: self.llm_primary.clone(),
            llm_fallback: self.llm_fallback.clone(),
            llm_timeout_seconds: self.llm_timeout_seconds,
            shutdown_drain_seconds: self.shutdown_drain_seconds,
            phi_key_aliases: self.phi_key_aliases.clone(),
        }
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("bind_address", &self.bind_address)
            .field("cors_origins", &self.cors_origins)
            .field("encryption_key", &"[REDACTED]")
            .field("jwt_secret", &"[REDACTED]")
            .field("session_secret", &"[REDACTED]")
            .field("hipaa_audit_enabled", &self.hipaa_audit_enabled)
            .field("audit_log_level", &self.audit_log_level)
            .field("audit_log_dir", &self.audit_log_dir)
            .field("model_preference", &self.model_preference)
            .field("confidence_threshold", &self.confidence_threshold)
            .field("require_disclaimer", &self.require_disclaimer)
            .field("max_image_mb", &self.max_image_mb)
            .field("supported_formats", &self.supported_formats)
            .field("image_scratch_dir", &self.image_scratch_dir)
            .field("image_ttl_seconds", &self.image_ttl_seconds)
            .field("rate_window_ms", &self.rate_window_ms)
            .field("rate_general_max", &self.rate_general_max)
            .field("rate_medical_max", &self.rate_medical_max)
            .field("rate_session_max", &self.rate_session_max)
            .field("session_ttl_minutes", &self.session_ttl_minutes)
            .field("tool_paths", &self.tool_paths)
            .field("llm_primary", &self.llm_primary)
            .field("llm_fallback", &self.llm_fallback)
            .field("llm_timeout_seconds", &self.llm_timeout_seconds)
            .field("shutdown_drain_seconds", &self.shutdown_drain_seconds)
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid encryption key: {0}")]
    InvalidEncryptionKey(String),

    #[error("Invalid JWT secret: {0}")]
    InvalidJwtSecret(String),

    #[error("Invalid session secret: {0}")]
    InvalidSessionSecret(String),

    #[error("Base64 decode error: {0}")]
    Base64Error(#[from] base64::DecodeError),

    #[error("Invalid numeric value for {name}: {reason}")]
    InvalidNumber { name: String, reason: String },

    #[error("Invalid confidence threshold: {0}")]
    InvalidConfidenceThreshold(String),
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a map (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let host = vars
            .get("HOST")
            .cloned()
            .unwrap_or_else(|| "0.0.0.0".to_string());
        let port: u16 = parse_number(vars, "PORT", DEFAULT_PORT)?;
        let bind_address = format!("{host}:{port}");

        let cors_origins = vars
            .get("CORS_ORIGINS")
            .map(|list| split_list(list))
            .unwrap_or_default();

        // ENCRYPTION_KEY: base64, exactly 32 bytes
        let encryption_key_b64 = vars
            .get("ENCRYPTION_KEY")
            .ok_or_else(|| ConfigError::MissingEnvVar("ENCRYPTION_KEY".to_string()))?;
        let encryption_key = general_purpose::STANDARD
            .decode(encryption_key_b64)
            .map_err(ConfigError::Base64Error)?;
        if encryption_key.len() != 32 {
            return Err(ConfigError::InvalidEncryptionKey(format!(
                "Expected 32 bytes, got {}",
                encryption_key.len()
            )));
        }

        // JWT_SECRET: raw string, at least 32 bytes
        let jwt_secret = vars
            .get("JWT_SECRET")
            .ok_or_else(|| ConfigError::MissingEnvVar("JWT_SECRET".to_string()))?
            .clone()
            .into_bytes();
        if jwt_secret.len() < 32 {
            return Err(ConfigError::InvalidJwtSecret(format!(
                "Expected at least 32 bytes, got {}",
                jwt_secret.len()
            )));
        }

        // SESSION_SECRET: optional pepper for identifier hashing.
        // Default: 32 zero bytes for tests; production SHOULD set it.
        let session_secret = if let Some(raw) = vars.get("SESSION_SECRET") {
            let bytes = raw.clone().into_bytes();
            if bytes.len() < 32 {
                return Err(ConfigError::InvalidSessionSecret(format!(
                    "Expected at least 32 bytes, got {}",
                    bytes.len()
                )));
            }
            bytes
        } else {
            vec![0u8; 32]
        };

        let hipaa_audit_enabled = parse_bool(vars, "HIPAA_AUDIT_ENABLED", true);
        if !hipaa_audit_enabled {
            warn!(
                "HIPAA_AUDIT_ENABLED=false: audit records will be counted but not persisted. \
                 This is acceptable for local development only."
            );
        }
        let audit_log_level = vars
            .get("AUDIT_LOG_LEVEL")
            .cloned()
            .unwrap_or_else(|| "info".to_string());
        let audit_log_dir = vars
            .get("AUDIT_LOG_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("./audit-logs"));

        let model_preference = match vars.get("AI_MODEL_PREFERENCE").map(String::as_str) {
            Some("fallback") => ModelPreference::Fallback,
            Some("primary") | None => ModelPreference::Primary,
            Some(other) => {
                warn!(
                    preference = other,
                    "Unknown AI_MODEL_PREFERENCE, defaulting to primary"
                );
                ModelPreference::Primary
            }
        };

        let confidence_threshold = if let Some(raw) = vars.get("AI_CONFIDENCE_THRESHOLD") {
            let value: f64 = raw.parse().map_err(|e| {
                ConfigError::InvalidConfidenceThreshold(format!(
                    "AI_CONFIDENCE_THRESHOLD must be a number, got '{raw}': {e}"
                ))
            })?;
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::InvalidConfidenceThreshold(format!(
                    "AI_CONFIDENCE_THRESHOLD must be within [0, 1], got {value}"
                )));
            }
            value
        } else {
            DEFAULT_CONFIDENCE_THRESHOLD
        };

        let require_disclaimer = parse_bool(vars, "REQUIRE_MEDICAL_DISCLAIMER", true);

        let max_image_mb: usize = parse_number(vars, "MAX_IMAGE_SIZE_MB", DEFAULT_MAX_IMAGE_MB)?;
        if max_image_mb == 0 || max_image_mb > MAX_MAX_IMAGE_MB {
            return Err(ConfigError::InvalidNumber {
                name: "MAX_IMAGE_SIZE_MB".to_string(),
                reason: format!("must be within 1..={MAX_MAX_IMAGE_MB}, got {max_image_mb}"),
            });
        }

        let supported_formats = vars
            .get("SUPPORTED_IMAGE_FORMATS")
            .map(|list| {
                split_list(list)
                    .into_iter()
                    .map(|f| f.to_ascii_lowercase())
                    .collect()
            })
            .unwrap_or_else(crate::imaging::default_formats);

        let image_scratch_dir = vars
            .get("IMAGE_SCRATCH_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| env::temp_dir().join("mg-images"));
        let image_ttl_seconds: u64 =
            parse_number(vars, "IMAGE_TTL_SECONDS", DEFAULT_IMAGE_TTL_SECONDS)?;

        let rate_window_ms: u64 =
            parse_number(vars, "API_RATE_LIMIT_WINDOW_MS", DEFAULT_RATE_WINDOW_MS)?;
        if rate_window_ms == 0 {
            return Err(ConfigError::InvalidNumber {
                name: "API_RATE_LIMIT_WINDOW_MS".to_string(),
                reason: "must be positive".to_string(),
            });
        }
        let rate_general_max: u32 = parse_nonzero(
            vars,
            "API_RATE_LIMIT_MAX_REQUESTS",
            DEFAULT_RATE_GENERAL_MAX,
        )?;
        let rate_medical_max: u32 =
            parse_nonzero(vars, "MEDICAL_API_RATE_LIMIT_MAX", DEFAULT_RATE_MEDICAL_MAX)?;
        let rate_session_max: u32 =
            parse_nonzero(vars, "SESSION_RATE_LIMIT_MAX", DEFAULT_RATE_SESSION_MAX)?;

        let session_ttl_minutes: i64 =
            parse_number(vars, "SESSION_TTL_MINUTES", DEFAULT_SESSION_TTL_MINUTES)?;
        if session_ttl_minutes <= 0 {
            return Err(ConfigError::InvalidNumber {
                name: "SESSION_TTL_MINUTES".to_string(),
                reason: "must be positive".to_string(),
            });
        }

        let mut tool_paths = BTreeMap::new();
        let mut tool_env = BTreeMap::new();
        for tool in ToolName::ALL {
            let prefix = tool_env_prefix(tool);
            if let Some(path) = vars.get(&format!("{prefix}_TOOL_PATH")) {
                tool_paths.insert(tool, path.clone());
            }
            if let Some(keys) = vars.get(&format!("{prefix}_TOOL_ENV")) {
                tool_env.insert(tool, split_list(keys));
            }
        }

        let llm_primary = llm_endpoint(vars, "LLM_PRIMARY");
        let llm_fallback = llm_endpoint(vars, "LLM_FALLBACK");
        if llm_primary.is_none() {
            warn!(
                "No LLM_PRIMARY_URL configured: synthesis will rely on evidence sources only \
                 and degrade to safety responses when they fail."
            );
        }
        let llm_timeout_seconds: u64 =
            parse_number(vars, "LLM_TIMEOUT_SECONDS", DEFAULT_LLM_TIMEOUT_SECONDS)?;

        let shutdown_drain_seconds: u64 =
            parse_number(vars, "SHUTDOWN_DRAIN_SECONDS", DEFAULT_DRAIN_SECONDS)?;
        if shutdown_drain_seconds > MAX_DRAIN_SECONDS {
            return Err(ConfigError::InvalidNumber {
                name: "SHUTDOWN_DRAIN_SECONDS".to_string(),
                reason: format!(
                    "must not exceed {MAX_DRAIN_SECONDS}, got {shutdown_drain_seconds}"
                ),
            });
        }

        let phi_key_aliases = vars
            .get("PHI_KEY_ALIASES")
            .map(|list| split_list(list))
            .unwrap_or_default();

        Ok(Config {
            bind_address,
            cors_origins,
            encryption_key: SecretBox::new(Box::new(encryption_key)),
            jwt_secret: SecretBox::new(Box::new(jwt_secret)),
            session_secret: SecretBox::new(Box::new(session_secret)),
            hipaa_audit_enabled,
            audit_log_level,
            audit_log_dir,
            model_preference,
            confidence_threshold,
            require_disclaimer,
            max_image_mb,
            supported_formats,
            image_scratch_dir,
            image_ttl_seconds,
            rate_window_ms,
            rate_general_max,
            rate_medical_max,
            rate_session_max,
            session_ttl_minutes,
            tool_paths,
            tool_env,
            llm_primary,
            llm_fallback,
            llm_timeout_seconds,
            shutdown_drain_seconds,
            phi_key_aliases,
        })
    }

    /// Upload ceiling in bytes.
    pub fn max_image_bytes(&self) -> usize {
        self.max_image_mb * 1024 * 1024
    }

    /// The shutdown drain window. Zero disables draining entirely, which
    /// is the right setting for local development.
    pub fn drain_window(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.shutdown_drain_seconds)
    }

    /// Minimum audit severity written to disk, from `AUDIT_LOG_LEVEL`.
    /// Unknown values fall back to recording everything.
    pub fn audit_min_severity(&self) -> crate::models::AuditSeverity {
        use crate::models::AuditSeverity;
        match self.audit_log_level.as_str() {
            "warning" => AuditSeverity::Warning,
            "error" => AuditSeverity::Error,
            "critical" => AuditSeverity::Critical,
            _ => AuditSeverity::Info,
        }
    }
}

fn tool_env_prefix(tool: ToolName) -> &'static str {
    match tool {
        ToolName::LiteratureIndex => "LITERATURE_INDEX",
        ToolName::Citations => "CITATIONS",
        ToolName::ClinicalTrials => "CLINICAL_TRIALS",
        ToolName::KnowledgeBase => "KNOWLEDGE_BASE",
        ToolName::Imaging => "IMAGING",
    }
}

fn llm_endpoint(vars: &HashMap<String, String>, prefix: &str) -> Option<LlmEndpoint> {
    let url = vars.get(&format!("{prefix}_URL"))?.clone();
    let api_key = vars
        .get(&format!("{prefix}_API_KEY"))
        .cloned()
        .unwrap_or_default();
    let model = vars
        .get(&format!("{prefix}_MODEL"))
        .cloned()
        .unwrap_or_else(|| "default".to_string());
    Some(LlmEndpoint {
        url,
        api_key: SecretString::from(api_key),
        model,
    })
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_bool(vars: &HashMap<String, String>, name: &str, default: bool) -> bool {
    match vars.get(name).map(String::as_str) {
        Some("true") | Some("1") | Some("yes") => true,
        Some("false") | Some("0") | Some("no") => false,
        Some(other) => {
            warn!(name, value = other, "unparseable boolean, using default");
            default
        }
        None => default,
    }
}

fn parse_number<T: std::str::FromStr>(
    vars: &HashMap<String, String>,
    name: &str,
    default: T,
) -> Result<T, ConfigError>
where
    T::Err: fmt::Display,
{
    match vars.get(name) {
        Some(raw) => raw.parse().map_err(|e| ConfigError::InvalidNumber {
            name: name.to_string(),
            reason: format!("got '{raw}': {e}"),
        }),
        None => Ok(default),
    }
}

fn parse_nonzero(
    vars: &HashMap<String, String>,
    name: &str,
    default: u32,
) -> Result<u32, ConfigError> {
    let value: u32 = parse_number(vars, name, default)?;
    if value == 0 {
        return Err(ConfigError::InvalidNumber {
            name: name.to_string(),
            reason: "must be positive".to_string(),
        });
    }
    Ok(value)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;

    fn test_encryption_key() -> String {
        general_purpose::STANDARD.encode([0u8; 32])
    }

    fn test_jwt_secret() -> String {
        "0123456789abcdef0123456789abcdef".to_string()
    }

    fn base_vars() -> HashMap<String, String> {
        HashMap::from([
            ("ENCRYPTION_KEY".to_string(), test_encryption_key()),
            ("JWT_SECRET".to_string(), test_jwt_secret()),
        ])
    }

    #[test]
    fn test_from_vars_minimal_success() {
        let config = Config::from_vars(&base_vars()).expect("config should load");
        assert_eq!(config.bind_address, "0.0.0.0:8080");
        assert_eq!(config.encryption_key.expose_secret().len(), 32);
        assert!(config.hipaa_audit_enabled);
        assert!(config.require_disclaimer);
        assert_eq!(config.session_ttl_minutes, DEFAULT_SESSION_TTL_MINUTES);
        assert_eq!(config.rate_medical_max, DEFAULT_RATE_MEDICAL_MAX);
        assert!(config.tool_paths.is_empty());
        assert!(config.llm_primary.is_none());
    }

    #[test]
    fn test_missing_encryption_key() {
        let vars = HashMap::from([("JWT_SECRET".to_string(), test_jwt_secret())]);
        let result = Config::from_vars(&vars);
        assert!(matches!(result, Err(ConfigError::MissingEnvVar(v)) if v == "ENCRYPTION_KEY"));
    }

    #[test]
    fn test_missing_jwt_secret() {
        let vars = HashMap::from([("ENCRYPTION_KEY".to_string(), test_encryption_key())]);
        let result = Config::from_vars(&vars);
        assert!(matches!(result, Err(ConfigError::MissingEnvVar(v)) if v == "JWT_SECRET"));
    }

    #[test]
    fn test_encryption_key_wrong_length() {
        let mut vars = base_vars();
        vars.insert(
            "ENCRYPTION_KEY".to_string(),
            general_purpose::STANDARD.encode([0u8; 16]),
        );
        let result = Config::from_vars(&vars);
        assert!(
            matches!(result, Err(ConfigError::InvalidEncryptionKey(msg)) if msg.contains("Expected 32 bytes, got 16"))
        );
    }

    #[test]
    fn test_encryption_key_invalid_base64() {
        let mut vars = base_vars();
        vars.insert("ENCRYPTION_KEY".to_string(), "not-base64!@#$".to_string());
        assert!(matches!(
            Config::from_vars(&vars),
            Err(ConfigError::Base64Error(_))
        ));
    }

    #[test]
    fn test_jwt_secret_too_short() {
        let mut vars = base_vars();
        vars.insert("JWT_SECRET".to_string(), "short".to_string());
        assert!(matches!(
            Config::from_vars(&vars),
            Err(ConfigError::InvalidJwtSecret(_))
        ));
    }

    #[test]
    fn test_host_port_compose_bind_address() {
        let mut vars = base_vars();
        vars.insert("HOST".to_string(), "127.0.0.1".to_string());
        vars.insert("PORT".to_string(), "9999".to_string());
        let config = Config::from_vars(&vars).unwrap();
        assert_eq!(config.bind_address, "127.0.0.1:9999");
    }

    #[test]
    fn test_invalid_port_rejected() {
        let mut vars = base_vars();
        vars.insert("PORT".to_string(), "not-a-port".to_string());
        assert!(matches!(
            Config::from_vars(&vars),
            Err(ConfigError::InvalidNumber { name, .. }) if name == "PORT"
        ));
    }

    #[test]
    fn test_cors_origins_parsed() {
        let mut vars = base_vars();
        vars.insert(
            "CORS_ORIGINS".to_string(),
            "https://a.example, https://b.example".to_string(),
        );
        let config = Config::from_vars(&vars).unwrap();
        assert_eq!(
            config.cors_origins,
            vec!["https://a.example".to_string(), "https://b.example".to_string()]
        );
    }

    #[test]
    fn test_confidence_threshold_default_and_custom() {
        let config = Config::from_vars(&base_vars()).unwrap();
        assert!((config.confidence_threshold - DEFAULT_CONFIDENCE_THRESHOLD).abs() < f64::EPSILON);

        let mut vars = base_vars();
        vars.insert("AI_CONFIDENCE_THRESHOLD".to_string(), "0.75".to_string());
        let config = Config::from_vars(&vars).unwrap();
        assert!((config.confidence_threshold - 0.75).abs() < f64::EPSILON);
    }

    #[test]
    fn test_confidence_threshold_out_of_range() {
        let mut vars = base_vars();
        vars.insert("AI_CONFIDENCE_THRESHOLD".to_string(), "1.5".to_string());
        assert!(matches!(
            Config::from_vars(&vars),
            Err(ConfigError::InvalidConfidenceThreshold(_))
        ));
    }

    #[test]
    fn test_max_image_size_bounds() {
        let mut vars = base_vars();
        vars.insert("MAX_IMAGE_SIZE_MB".to_string(), "0".to_string());
        assert!(Config::from_vars(&vars).is_err());

        vars.insert("MAX_IMAGE_SIZE_MB".to_string(), "501".to_string());
        assert!(Config::from_vars(&vars).is_err());

        vars.insert("MAX_IMAGE_SIZE_MB".to_string(), "10".to_string());
        let config = Config::from_vars(&vars).unwrap();
        assert_eq!(config.max_image_bytes(), 10 * 1024 * 1024);
    }

    #[test]
    fn test_rate_limit_caps_reject_zero() {
        let mut vars = base_vars();
        vars.insert("MEDICAL_API_RATE_LIMIT_MAX".to_string(), "0".to_string());
        assert!(matches!(
            Config::from_vars(&vars),
            Err(ConfigError::InvalidNumber { name, .. }) if name == "MEDICAL_API_RATE_LIMIT_MAX"
        ));
    }

    #[test]
    fn test_session_ttl_rejects_non_positive() {
        let mut vars = base_vars();
        vars.insert("SESSION_TTL_MINUTES".to_string(), "-5".to_string());
        assert!(Config::from_vars(&vars).is_err());
    }

    #[test]
    fn test_tool_paths_collected() {
        let mut vars = base_vars();
        vars.insert(
            "LITERATURE_INDEX_TOOL_PATH".to_string(),
            "/opt/tools/literature".to_string(),
        );
        vars.insert(
            "KNOWLEDGE_BASE_TOOL_PATH".to_string(),
            "/opt/tools/kb".to_string(),
        );
        vars.insert(
            "KNOWLEDGE_BASE_TOOL_ENV".to_string(),
            "KB_API_KEY,KB_REGION".to_string(),
        );
        let config = Config::from_vars(&vars).unwrap();
        assert_eq!(config.tool_paths.len(), 2);
        assert_eq!(
            config.tool_paths[&ToolName::LiteratureIndex],
            "/opt/tools/literature"
        );
        assert_eq!(
            config.tool_env[&ToolName::KnowledgeBase],
            vec!["KB_API_KEY".to_string(), "KB_REGION".to_string()]
        );
    }

    #[test]
    fn test_llm_endpoints() {
        let mut vars = base_vars();
        vars.insert(
            "LLM_PRIMARY_URL".to_string(),
            "https://llm.example/v1".to_string(),
        );
        vars.insert("LLM_PRIMARY_API_KEY".to_string(), "sk-test".to_string());
        vars.insert("LLM_PRIMARY_MODEL".to_string(), "clinical-1".to_string());
        let config = Config::from_vars(&vars).unwrap();

        let primary = config.llm_primary.as_ref().unwrap();
        assert_eq!(primary.url, "https://llm.example/v1");
        assert_eq!(primary.model, "clinical-1");
        assert!(config.llm_fallback.is_none());
    }

    #[test]
    fn test_model_preference_parsing() {
        let mut vars = base_vars();
        vars.insert("AI_MODEL_PREFERENCE".to_string(), "fallback".to_string());
        let config = Config::from_vars(&vars).unwrap();
        assert_eq!(config.model_preference, ModelPreference::Fallback);

        vars.insert("AI_MODEL_PREFERENCE".to_string(), "bogus".to_string());
        let config = Config::from_vars(&vars).unwrap();
        assert_eq!(config.model_preference, ModelPreference::Primary);
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let mut vars = base_vars();
        vars.insert("LLM_PRIMARY_URL".to_string(), "https://x".to_string());
        vars.insert(
            "LLM_PRIMARY_API_KEY".to_string(),
            "sk-super-secret".to_string(),
        );
        let config = Config::from_vars(&vars).unwrap();
        let rendered = format!("{config:?}");
        assert!(rendered.contains("[REDACTED]"));
        assert!(!rendered.contains("sk-super-secret"));
        assert!(!rendered.contains(&test_jwt_secret()));
    }

    #[test]
    fn test_supported_formats_lowercased() {
        let mut vars = base_vars();
        vars.insert(
            "SUPPORTED_IMAGE_FORMATS".to_string(),
            "JPEG,Png, tiff".to_string(),
        );
        let config = Config::from_vars(&vars).unwrap();
        assert_eq!(
            config.supported_formats,
            vec!["jpeg".to_string(), "png".to_string(), "tiff".to_string()]
        );
    }

    #[test]
    fn test_hipaa_audit_flag() {
        let mut vars = base_vars();
        vars.insert("HIPAA_AUDIT_ENABLED".to_string(), "false".to_string());
        let config = Config::from_vars(&vars).unwrap();
        assert!(!config.hipaa_audit_enabled);
    }

    #[test]
    fn test_drain_window_default_and_bounds() {
        let config = Config::from_vars(&base_vars()).unwrap();
        assert_eq!(config.shutdown_drain_seconds, DEFAULT_DRAIN_SECONDS);

        let mut vars = base_vars();
        vars.insert("SHUTDOWN_DRAIN_SECONDS".to_string(), "0".to_string());
        let config = Config::from_vars(&vars).unwrap();
        assert!(config.drain_window().is_zero());

        vars.insert("SHUTDOWN_DRAIN_SECONDS".to_string(), "61".to_string());
        assert!(matches!(
            Config::from_vars(&vars),
            Err(ConfigError::InvalidNumber { name, .. }) if name == "SHUTDOWN_DRAIN_SECONDS"
        ));
    }

    #[test]
    fn test_clone_preserves_secrets() {
        let config = Config::from_vars(&base_vars()).unwrap();
        let cloned = config.clone();
        assert_eq!(
            cloned.encryption_key.expose_secret(),
            config.encryption_key.expose_secret()
        );
        assert_eq!(
            cloned.jwt_secret.expose_secret(),
            config.jwt_secret.expose_secret()
        );
    }
}
