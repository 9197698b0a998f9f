//! Test server harness.
//!
//! Spawns a fully wired gateway (real router, middleware, orchestrator,
//! subprocess tool clients) on an ephemeral port, with scripted mock
//! providers and mock LLMs swapped in at the component seams.

use crate::mock_tool::{write_mock_tool, MockToolBehavior};
use anyhow::Context;
use common::secret::ExposeSecret;
use mg_service::audit::{AuditConfig, AuditSink};
use mg_service::config::Config;
use mg_service::crypto::{PayloadCrypto, TokenService};
use mg_service::federation::{Orchestrator, DEFAULT_HISTORY_TAIL};
use mg_service::imaging::{ImagePreprocessor, ImagingConfig};
use mg_service::intent::IntentClassifier;
use mg_service::llm::{
    GenerationParams, LlmAdapter, LlmProvider, MockLlmProvider, ModelPreference,
};
use mg_service::models::ToolName;
use mg_service::phi::PhiScrubber;
use mg_service::ratelimit::{RateLimitConfig, RateLimiter};
use mg_service::routes::{self, AppState};
use mg_service::session::SessionStore;
use mg_service::tools::{ToolClientConfig, ToolPool};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// One Prometheus recorder per test process; later harnesses reuse it.
static METRICS_HANDLE: OnceLock<metrics_exporter_prometheus::PrometheusHandle> = OnceLock::new();

fn metrics_handle() -> metrics_exporter_prometheus::PrometheusHandle {
    METRICS_HANDLE
        .get_or_init(|| {
            // First harness in the process installs the global recorder;
            // later ones fall back to a detached handle.
            metrics_exporter_prometheus::PrometheusBuilder::new()
                .install_recorder()
                .unwrap_or_else(|_| {
                    metrics_exporter_prometheus::PrometheusBuilder::new()
                        .build_recorder()
                        .handle()
                })
        })
        .clone()
}

/// Builder for [`TestGateway`].
pub struct TestGatewayBuilder {
    tools: Vec<(ToolName, MockToolBehavior)>,
    llm_primary: Option<Arc<dyn LlmProvider>>,
    llm_fallback: Option<Arc<dyn LlmProvider>>,
    medical_rate_cap: u32,
    session_rate_cap: u32,
    confidence_threshold: f64,
    image_ttl: Duration,
}

impl Default for TestGatewayBuilder {
    fn default() -> Self {
        Self {
            tools: Vec::new(),
            llm_primary: None,
            llm_fallback: None,
            medical_rate_cap: 50,
            session_rate_cap: 50,
            confidence_threshold: 0.6,
            image_ttl: Duration::from_secs(60),
        }
    }
}

impl TestGatewayBuilder {
    /// Add a scripted tool provider.
    pub fn with_tool(mut self, name: ToolName, behavior: MockToolBehavior) -> Self {
        self.tools.push((name, behavior));
        self
    }

    /// Add every tool in the closed set with the given behavior.
    pub fn with_all_tools(mut self, behavior: MockToolBehavior) -> Self {
        for name in ToolName::ALL {
            self.tools.push((name, behavior));
        }
        self
    }

    pub fn with_llm(mut self, provider: Arc<dyn LlmProvider>) -> Self {
        self.llm_primary = Some(provider);
        self
    }

    pub fn with_fallback_llm(mut self, provider: Arc<dyn LlmProvider>) -> Self {
        self.llm_fallback = Some(provider);
        self
    }

    pub fn medical_rate_cap(mut self, cap: u32) -> Self {
        self.medical_rate_cap = cap;
        self
    }

    pub fn session_rate_cap(mut self, cap: u32) -> Self {
        self.session_rate_cap = cap;
        self
    }

    pub fn confidence_threshold(mut self, threshold: f64) -> Self {
        self.confidence_threshold = threshold;
        self
    }

    pub fn image_ttl(mut self, ttl: Duration) -> Self {
        self.image_ttl = ttl;
        self
    }

    /// Wire everything, connect the tool pool, and start serving.
    pub async fn spawn(self) -> anyhow::Result<TestGateway> {
        let scratch = tempfile::tempdir().context("scratch dir")?;
        let audit_dir = tempfile::tempdir().context("audit dir")?;
        let tool_dir = tempfile::tempdir().context("tool dir")?;

        // Base configuration through the real loader
        let vars = HashMap::from([
            (
                "ENCRYPTION_KEY".to_string(),
                {
                    use base64::Engine as _;
                    base64::engine::general_purpose::STANDARD.encode([9u8; 32])
                },
            ),
            (
                "JWT_SECRET".to_string(),
                "test-jwt-secret-test-jwt-secret-0000".to_string(),
            ),
            ("HOST".to_string(), "127.0.0.1".to_string()),
            ("PORT".to_string(), "0".to_string()),
        ]);
        let config = Arc::new(Config::from_vars(&vars).context("test config")?);

        let payload_crypto = Arc::new(PayloadCrypto::new(common::secret::SecretBox::new(
            Box::new(config.encryption_key.expose_secret().clone()),
        ))?);
        let token_service = Arc::new(TokenService::new(&config.jwt_secret)?);
        let scrubber = Arc::new(PhiScrubber::default());
        let (audit, _audit_writer) = AuditSink::spawn(
            AuditConfig::new(audit_dir.path(), true),
            scrubber.clone(),
        );

        let sessions = Arc::new(SessionStore::new(
            token_service,
            vec![0u8; 32],
            config.session_ttl_minutes,
        ));
        let limiter = Arc::new(RateLimiter::new(RateLimitConfig {
            window: Duration::from_secs(60),
            session_cap: self.session_rate_cap,
            general_cap: 200,
            medical_cap: self.medical_rate_cap,
        }));

        // Scripted subprocess providers
        let mut tool_configs = Vec::new();
        for (name, behavior) in &self.tools {
            let script = write_mock_tool(tool_dir.path(), name.as_str(), *behavior)?;
            let mut client_config =
                ToolClientConfig::new(*name, vec![script.to_string_lossy().into_owned()]);
            // Keep failure paths fast in tests
            client_config.connect_timeout = Duration::from_secs(2);
            client_config.max_reconnect_attempts = 1;
            tool_configs.push(client_config);
        }
        let pool = Arc::new(ToolPool::new(tool_configs));
        pool.connect_all().await;

        let primary = self
            .llm_primary
            .unwrap_or_else(|| Arc::new(MockLlmProvider::failing("primary")));
        let llm = Arc::new(LlmAdapter::new(
            primary,
            self.llm_fallback,
            ModelPreference::Primary,
            Duration::from_secs(5),
            GenerationParams::default(),
            Some(
                "This response supports clinical research and education. It is not a \
                 diagnosis; consult a qualified healthcare professional for medical decisions."
                    .to_string(),
            ),
        ));

        let imaging = Arc::new(
            ImagePreprocessor::new(ImagingConfig {
                max_bytes: config.max_image_bytes(),
                allowed_formats: config.supported_formats.clone(),
                scratch_dir: scratch.path().to_path_buf(),
                artifact_ttl: self.image_ttl,
            })
            .with_crypto(payload_crypto),
        );

        let orchestrator = Arc::new(Orchestrator::new(
            pool.clone(),
            llm.clone(),
            imaging,
            scrubber,
            audit.clone(),
            IntentClassifier::default(),
            DEFAULT_HISTORY_TAIL,
            self.confidence_threshold,
        ));

        let shutdown = CancellationToken::new();
        let state = Arc::new(AppState {
            config,
            sessions,
            limiter,
            audit: audit.clone(),
            pool: pool.clone(),
            orchestrator,
            metrics: metrics_handle(),
            started_at: std::time::Instant::now(),
            shutdown,
        });

        let app = routes::build_routes(state.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .context("bind test listener")?;
        let addr = listener.local_addr().context("local addr")?;

        let handle = tokio::spawn(async move {
            let make_service = app.into_make_service_with_connect_info::<SocketAddr>();
            if let Err(e) = axum::serve(listener, make_service).await {
                eprintln!("Test gateway error: {e}");
            }
        });

        Ok(TestGateway {
            addr,
            state,
            audit,
            pool,
            _scratch: scratch,
            audit_dir,
            _tool_dir: tool_dir,
            _handle: handle,
        })
    }
}

/// A running gateway instance for integration tests.
pub struct TestGateway {
    addr: SocketAddr,
    state: Arc<AppState>,
    audit: AuditSink,
    pool: Arc<ToolPool>,
    _scratch: tempfile::TempDir,
    audit_dir: tempfile::TempDir,
    _tool_dir: tempfile::TempDir,
    _handle: JoinHandle<()>,
}

impl TestGateway {
    pub fn builder() -> TestGatewayBuilder {
        TestGatewayBuilder::default()
    }

    /// Base URL of the running instance.
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Shared application state, for assertions on component internals.
    pub fn state(&self) -> &Arc<AppState> {
        &self.state
    }

    /// The tool pool backing this instance.
    pub fn pool(&self) -> &Arc<ToolPool> {
        &self.pool
    }

    /// Directory the audit streams are written into.
    pub fn audit_dir(&self) -> &Path {
        self.audit_dir.path()
    }

    /// Scratch directory for image artifacts.
    pub fn scratch_dir(&self) -> &Path {
        self._scratch.path()
    }

    /// Flush the audit queue, then read one stream file (empty string when
    /// the file does not exist yet).
    pub async fn audit_stream(&self, file: &str) -> String {
        self.audit.flush().await;
        tokio::fs::read_to_string(self.audit_dir.path().join(file))
            .await
            .unwrap_or_default()
    }

    /// Create a session over HTTP and return its bearer token.
    pub async fn session_token(&self) -> anyhow::Result<String> {
        let client = reqwest::Client::new();
        let response = client
            .post(format!("{}/api/session", self.url()))
            .send()
            .await
            .context("session request")?;
        anyhow::ensure!(
            response.status() == 200,
            "session creation failed: {}",
            response.status()
        );
        let body: serde_json::Value = response.json().await.context("session body")?;
        body.get("token")
            .and_then(serde_json::Value::as_str)
            .map(str::to_string)
            .context("token missing from session response")
    }

    /// Paths of artifact files currently in the scratch directory.
    pub fn artifact_files(&self) -> Vec<PathBuf> {
        std::fs::read_dir(self._scratch.path())
            .map(|entries| {
                entries
                    .filter_map(Result::ok)
                    .map(|entry| entry.path())
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl Drop for TestGateway {
    fn drop(&mut self) {
        self._handle.abort();
    }
}
