//! Image artifact sweeper.
//!
//! Artifact deletion timers live in memory and do not survive restarts, so
//! the sweeper runs once immediately at startup (deleting anything stale a
//! previous process left behind) and then periodically as a backstop for
//! timers that were lost or raced.

use crate::imaging::ImagePreprocessor;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

/// Default sweep cadence (1 minute).
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Start the sweeper; the first sweep runs immediately. Returns when the
/// cancellation token fires.
#[instrument(skip_all, name = "mg.tasks.artifact_sweeper")]
pub async fn start_artifact_sweeper(
    imaging: Arc<ImagePreprocessor>,
    interval: Duration,
    cancel: CancellationToken,
) {
    info!(
        target: "mg.tasks.artifact_sweeper",
        interval_secs = interval.as_secs(),
        "starting artifact sweeper"
    );

    // Startup sweep: timers from a previous process are gone
    imaging.sweep_expired().await;

    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await; // consume the immediate tick; the sweep above covered it
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                imaging.sweep_expired().await;
            }
            _ = cancel.cancelled() => {
                info!(target: "mg.tasks.artifact_sweeper", "artifact sweeper stopping");
                break;
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::imaging::ImagingConfig;
    use chrono::Utc;

    #[tokio::test]
    async fn test_startup_sweep_runs_before_first_interval() {
        let dir = tempfile::tempdir().unwrap();
        let stale_ms = Utc::now().timestamp_millis() - 60_000;
        let stale = dir.path().join(format!("dead_{stale_ms}.jpg"));
        tokio::fs::write(&stale, b"x").await.unwrap();

        let imaging = Arc::new(ImagePreprocessor::new(ImagingConfig::new(dir.path())));
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(start_artifact_sweeper(
            imaging,
            Duration::from_secs(3600), // interval never fires in this test
            cancel.clone(),
        ));

        // The startup sweep should remove the stale file promptly
        for _ in 0..50 {
            if !stale.exists() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(!stale.exists(), "startup sweep must delete stale artifacts");

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("sweeper should stop after cancellation")
            .expect("sweeper task should not panic");
    }
}
