use mg_service::audit::{AuditConfig, AuditSink};
use mg_service::config::Config;
use mg_service::crypto::{PayloadCrypto, TokenService};
use mg_service::federation::{Orchestrator, DEFAULT_HISTORY_TAIL};
use mg_service::imaging::{ImagePreprocessor, ImagingConfig};
use mg_service::intent::IntentClassifier;
use mg_service::llm::{
    GenerationParams, HttpLlmProvider, HttpLlmProviderConfig, LlmAdapter, LlmProvider,
    MockLlmProvider,
};
use mg_service::phi::PhiScrubber;
use mg_service::ratelimit::{RateLimitConfig, RateLimiter};
use mg_service::routes::{self, AppState};
use mg_service::session::SessionStore;
use mg_service::tasks;
use mg_service::tools::{ToolClientConfig, ToolPool};

use common::secret::{ExposeSecret, SecretString};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mg_service=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Medical Research Gateway");

    // Metrics recorder must be installed before any metric is recorded
    let metrics_handle = mg_service::observability::init_metrics_recorder().map_err(|e| {
        error!("Failed to initialize metrics recorder: {}", e);
        e
    })?;
    info!("Prometheus metrics recorder initialized");

    // Load configuration; missing secrets refuse startup here
    let config = Arc::new(Config::from_env().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?);
    info!("Configuration loaded successfully");

    // Crypto services; these validate their key material
    let payload_crypto = Arc::new(PayloadCrypto::new(clone_secret(&config.encryption_key))?);
    let token_service = Arc::new(TokenService::new(&config.jwt_secret)?);

    // PHI scrubber and audit sink
    let scrubber = Arc::new(PhiScrubber::new(
        mg_service::phi::REDACTED,
        &config.phi_key_aliases,
    ));
    let (audit, audit_writer) = AuditSink::spawn(
        AuditConfig::new(&config.audit_log_dir, config.hipaa_audit_enabled)
            .with_min_severity(config.audit_min_severity()),
        scrubber.clone(),
    );

    // Session store and rate limiter
    let sessions = Arc::new(SessionStore::new(
        token_service,
        config.session_secret.expose_secret().clone(),
        config.session_ttl_minutes,
    ));
    let limiter = Arc::new(RateLimiter::new(RateLimitConfig {
        window: Duration::from_millis(config.rate_window_ms),
        session_cap: config.rate_session_max,
        general_cap: config.rate_general_max,
        medical_cap: config.rate_medical_max,
    }));

    // Tool pool from configured providers
    let tool_configs: Vec<ToolClientConfig> = config
        .tool_paths
        .iter()
        .map(|(name, path)| {
            let mut client_config = ToolClientConfig::new(*name, vec![path.clone()]);
            if let Some(env_keys) = config.tool_env.get(name) {
                client_config.env_passthrough = env_keys.clone();
            }
            client_config
        })
        .collect();
    let pool = Arc::new(ToolPool::new(tool_configs));
    info!(members = pool.len(), "Connecting tool pool");
    pool.connect_all().await;
    mg_service::observability::metrics::set_tool_clients_connected(pool.connected_count());

    // LLM adapter: primary/fallback from configuration
    let llm = Arc::new(build_llm_adapter(&config));

    // Image preprocessor with at-rest encryption
    let imaging = Arc::new(
        ImagePreprocessor::new(ImagingConfig {
            max_bytes: config.max_image_bytes(),
            allowed_formats: config.supported_formats.clone(),
            scratch_dir: config.image_scratch_dir.clone(),
            artifact_ttl: Duration::from_secs(config.image_ttl_seconds),
        })
        .with_crypto(payload_crypto.clone()),
    );

    // The orchestrator composes everything above
    let orchestrator = Arc::new(Orchestrator::new(
        pool.clone(),
        llm.clone(),
        imaging.clone(),
        scrubber.clone(),
        audit.clone(),
        IntentClassifier::default(),
        DEFAULT_HISTORY_TAIL,
        config.confidence_threshold,
    ));

    // Background tasks under one shutdown token
    let shutdown = CancellationToken::new();
    let session_sweeper = tokio::spawn(tasks::start_session_sweeper(
        sessions.clone(),
        limiter.clone(),
        audit.clone(),
        tasks::SESSION_SWEEP_INTERVAL,
        shutdown.child_token(),
    ));
    let artifact_sweeper = tokio::spawn(tasks::start_artifact_sweeper(
        imaging.clone(),
        tasks::ARTIFACT_SWEEP_INTERVAL,
        shutdown.child_token(),
    ));

    let bind_address = config.bind_address.clone();
    let drain_window = config.drain_window();
    let state = Arc::new(AppState {
        config,
        sessions,
        limiter,
        audit: audit.clone(),
        pool: pool.clone(),
        orchestrator,
        metrics: metrics_handle,
        started_at: std::time::Instant::now(),
        shutdown: shutdown.clone(),
    });

    let app = routes::build_routes(state);

    let addr: SocketAddr = bind_address.parse().map_err(|e| {
        error!("Invalid bind address: {}", e);
        e
    })?;
    info!("Medical Research Gateway listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(drain_on_stop_signal(shutdown.clone(), drain_window))
    .await?;

    // The stop signal already cancelled `shutdown`, so in-flight requests
    // and both sweepers are winding down; finish the ordered teardown:
    // sweepers first, then the tool pool's graceful close protocol, and the
    // audit trail last so every teardown step is still recorded.
    let _ = session_sweeper.await;
    let _ = artifact_sweeper.await;

    pool.close_all().await;
    audit.flush().await;
    drop(audit);
    let _ = audit_writer.await;

    info!("Medical Research Gateway shutdown complete");
    Ok(())
}

fn clone_secret(
    secret: &common::secret::SecretBox<Vec<u8>>,
) -> common::secret::SecretBox<Vec<u8>> {
    common::secret::SecretBox::new(Box::new(secret.expose_secret().clone()))
}

/// Build the adapter from configured endpoints. Without a primary endpoint
/// the adapter is backed by a provider that always fails, which degrades
/// every synthesis to evidence-only or safety responses instead of refusing
/// to start; the config loader has already warned loudly.
fn build_llm_adapter(config: &Config) -> LlmAdapter {
    let primary: Arc<dyn LlmProvider> = match &config.llm_primary {
        Some(endpoint) => Arc::new(HttpLlmProvider::new(HttpLlmProviderConfig {
            name: "primary".to_string(),
            base_url: endpoint.url.clone(),
            api_key: SecretString::from(endpoint.api_key.expose_secret()),
            model: endpoint.model.clone(),
        })),
        None => Arc::new(MockLlmProvider::failing("primary")),
    };
    let fallback: Option<Arc<dyn LlmProvider>> = config.llm_fallback.as_ref().map(|endpoint| {
        Arc::new(HttpLlmProvider::new(HttpLlmProviderConfig {
            name: "fallback".to_string(),
            base_url: endpoint.url.clone(),
            api_key: SecretString::from(endpoint.api_key.expose_secret()),
            model: endpoint.model.clone(),
        })) as Arc<dyn LlmProvider>
    });

    LlmAdapter::new(
        primary,
        fallback,
        config.model_preference,
        Duration::from_secs(config.llm_timeout_seconds),
        GenerationParams::default(),
        config.require_disclaimer.then(|| {
            "This response supports clinical research and education. It is not a diagnosis; \
             consult a qualified healthcare professional for medical decisions."
                .to_string()
        }),
    )
}

/// The graceful-shutdown future handed to axum.
///
/// When a stop signal arrives the process-wide token is cancelled at once:
/// the orchestrator converts every in-flight tool and LLM call into typed
/// unavailable results, so requests still in the pipeline resolve to
/// well-formed (degraded) responses instead of hanging. The listener is
/// then held open for the configured drain window to let those responses
/// reach their clients before axum stops accepting connections.
async fn drain_on_stop_signal(shutdown: CancellationToken, drain: Duration) {
    let signal_name = wait_for_stop_signal().await;
    info!(
        target: "mg.shutdown",
        signal = signal_name,
        drain_secs = drain.as_secs(),
        "stop signal received, cancelling in-flight work and draining"
    );

    shutdown.cancel();
    if !drain.is_zero() {
        tokio::time::sleep(drain).await;
        info!(target: "mg.shutdown", "drain window elapsed, closing listener");
    }
}

/// Resolves with the name of whichever stop signal fired first.
#[cfg(unix)]
async fn wait_for_stop_signal() -> &'static str {
    let mut terminate = match signal::unix::signal(signal::unix::SignalKind::terminate()) {
        Ok(stream) => Some(stream),
        Err(e) => {
            // Interrupt handling below still covers shutdown
            error!(target: "mg.shutdown", error = %e, "cannot watch for terminate signal");
            None
        }
    };
    let terminated = async {
        match terminate.as_mut() {
            Some(stream) => {
                stream.recv().await;
            }
            None => std::future::pending().await,
        }
    };

    tokio::select! {
        _ = signal::ctrl_c() => "interrupt",
        _ = terminated => "terminate",
    }
}

/// Interrupt is the only stop signal wired on non-unix targets.
#[cfg(not(unix))]
async fn wait_for_stop_signal() -> &'static str {
    let _ = signal::ctrl_c().await;
    "interrupt"
}
