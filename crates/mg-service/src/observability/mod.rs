//! Observability for the gateway.
//!
//! # Privacy by Default
//!
//! Instrumentation uses `#[instrument(skip_all)]` with explicit safe-field
//! allow-listing. Fields fall into three classes:
//! - **SAFE**: closed enums and counts, logged in plaintext
//! - **HASHED**: session ids and peer addresses, only ever logged as
//!   `common::hashing` outputs
//! - **NEVER**: query text, patient context, upstream payloads - these go
//!   through the PHI scrubber and the audit sink, not the log stream

pub mod metrics;

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Install the Prometheus recorder. Must run before any metric is recorded;
/// fails if a global recorder is already installed.
pub fn init_metrics_recorder() -> Result<PrometheusHandle, String> {
    PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| format!("failed to install metrics recorder: {e}"))
}
