//! Session expiry sweeper.
//!
//! Periodically deactivates sessions past their absolute expiry and purges
//! records once their grace window has passed, emitting an audit record per
//! deactivation. Also prunes drained rate-limiter windows while it is awake.

use crate::audit::AuditSink;
use crate::observability::metrics::set_sessions_live;
use crate::ratelimit::RateLimiter;
use crate::session::SessionStore;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

/// Default sweep cadence (5 minutes).
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(300);

/// Start the sweeper. Returns when the cancellation token fires.
#[instrument(skip_all, name = "mg.tasks.session_sweeper")]
pub async fn start_session_sweeper(
    sessions: Arc<SessionStore>,
    limiter: Arc<RateLimiter>,
    audit: AuditSink,
    interval: Duration,
    cancel: CancellationToken,
) {
    info!(
        target: "mg.tasks.session_sweeper",
        interval_secs = interval.as_secs(),
        "starting session sweeper"
    );

    let mut ticker = tokio::time::interval(interval);
    // The immediate first tick is a no-op sweep on a fresh store
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                run_sweep(&sessions, &limiter, &audit).await;
            }
            _ = cancel.cancelled() => {
                info!(target: "mg.tasks.session_sweeper", "session sweeper stopping");
                break;
            }
        }
    }
}

/// One sweep iteration, separated for direct testing.
pub(crate) async fn run_sweep(
    sessions: &SessionStore,
    limiter: &RateLimiter,
    audit: &AuditSink,
) {
    let audits = sessions.sweep().await;
    let expired = audits.len();
    for record in audits {
        audit.emit(record);
    }

    limiter.prune();
    set_sessions_live(sessions.len().await);

    if expired > 0 {
        debug!(target: "mg.tasks.session_sweeper", expired, "sweep deactivated sessions");
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::audit::AuditConfig;
    use crate::crypto::TokenService;
    use crate::models::ClientFingerprint;
    use crate::phi::PhiScrubber;
    use crate::ratelimit::RateLimitConfig;
    use common::secret::SecretBox;

    fn fixtures(dir: &std::path::Path) -> (Arc<SessionStore>, Arc<RateLimiter>, AuditSink) {
        let tokens =
            Arc::new(TokenService::new(&SecretBox::new(Box::new(vec![5u8; 32]))).unwrap());
        let sessions = Arc::new(SessionStore::new(tokens, vec![0u8; 32], 30));
        let limiter = Arc::new(RateLimiter::new(RateLimitConfig::default()));
        let (audit, _task) = AuditSink::spawn(
            AuditConfig::new(dir, true),
            Arc::new(PhiScrubber::default()),
        );
        (sessions, limiter, audit)
    }

    #[tokio::test]
    async fn test_sweeper_stops_on_cancel() {
        let dir = tempfile::tempdir().unwrap();
        let (sessions, limiter, audit) = fixtures(dir.path());
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(start_session_sweeper(
            sessions,
            limiter,
            audit,
            Duration::from_millis(50),
            cancel.clone(),
        ));

        tokio::time::sleep(Duration::from_millis(120)).await;
        cancel.cancel();

        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("sweeper should stop after cancellation")
            .expect("sweeper task should not panic");
    }

    #[tokio::test]
    async fn test_sweep_leaves_live_sessions_valid() {
        // Expiry-path audit emission is covered by the session store tests;
        // this verifies the loop plumbing does not disturb live sessions.
        let dir = tempfile::tempdir().unwrap();
        let (sessions, limiter, audit) = fixtures(dir.path());

        let (token, _) = sessions
            .create(ClientFingerprint {
                user_agent_hash: "h:1111111111111111".to_string(),
                peer_hash: "h:2222222222222222".to_string(),
            })
            .await
            .unwrap();

        run_sweep(&sessions, &limiter, &audit).await;
        audit.flush().await;

        assert!(sessions.validate(Some(&token)).await.is_ok());
    }
}
