//! Append-only, PHI-scrubbed audit sink.
//!
//! `emit` never blocks a request path: it scrubs the record, then does a
//! bounded queue push. A dedicated writer task appends JSON-line records to
//! three per-severity streams (normal, security, error). When the queue is
//! full the record is shed and replaced by a small `audit-dropped` marker
//! that keeps the original severity.
//!
//! Ordering: per-writer FIFO only. The single consumer task preserves the
//! order each producer enqueued; no global order across producers is
//! promised.

use crate::models::{AuditKind, AuditRecord, AuditSeverity};
use crate::observability::metrics::{record_audit_dropped, record_audit_emitted};
use crate::phi::PhiScrubber;
use chrono::{DateTime, Duration as ChronoDuration, Timelike, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

/// Default bounded queue depth.
pub const DEFAULT_QUEUE_DEPTH: usize = 1024;

/// How long a record contributes to the windowed compliance counts.
const WINDOW_RETENTION_HOURS: i64 = 24;

/// Sink configuration, derived from the service [`crate::config::Config`].
#[derive(Debug, Clone)]
pub struct AuditConfig {
    /// Directory the three stream files live in.
    pub directory: PathBuf,
    /// When false, records are counted but never written to disk.
    pub write_enabled: bool,
    /// Bounded queue depth.
    pub queue_depth: usize,
    /// Records below this severity are counted but not written.
    pub min_severity: AuditSeverity,
}

impl AuditConfig {
    pub fn new(directory: impl Into<PathBuf>, write_enabled: bool) -> Self {
        Self {
            directory: directory.into(),
            write_enabled,
            queue_depth: DEFAULT_QUEUE_DEPTH,
            min_severity: AuditSeverity::Info,
        }
    }

    pub fn with_min_severity(mut self, min_severity: AuditSeverity) -> Self {
        self.min_severity = min_severity;
        self
    }
}

enum SinkCommand {
    Record(Box<AuditRecord>),
    Flush(oneshot::Sender<()>),
}

/// Aggregate counters backing the compliance report.
#[derive(Debug)]
struct Counters {
    by_kind: [AtomicU64; AuditKind::ALL.len()],
    by_severity: [AtomicU64; AuditSeverity::ALL.len()],
    dropped: AtomicU64,
    /// Hourly (bucket start, per-kind counts) pairs for the last 24 h.
    window: Mutex<Vec<(DateTime<Utc>, [u64; AuditKind::ALL.len()])>>,
}

impl Default for Counters {
    fn default() -> Self {
        Self {
            by_kind: std::array::from_fn(|_| AtomicU64::new(0)),
            by_severity: std::array::from_fn(|_| AtomicU64::new(0)),
            dropped: AtomicU64::new(0),
            window: Mutex::new(Vec::new()),
        }
    }
}

fn kind_index(kind: AuditKind) -> usize {
    AuditKind::ALL.iter().position(|k| *k == kind).unwrap_or(0)
}

fn severity_index(severity: AuditSeverity) -> usize {
    AuditSeverity::ALL
        .iter()
        .position(|s| *s == severity)
        .unwrap_or(0)
}

impl Counters {
    fn record(&self, kind: AuditKind, severity: AuditSeverity, now: DateTime<Utc>) {
        if let Some(counter) = self.by_kind.get(kind_index(kind)) {
            counter.fetch_add(1, Ordering::Relaxed);
        }
        if let Some(counter) = self.by_severity.get(severity_index(severity)) {
            counter.fetch_add(1, Ordering::Relaxed);
        }

        let hour = now
            .with_minute(0)
            .and_then(|t| t.with_second(0))
            .and_then(|t| t.with_nanosecond(0))
            .unwrap_or(now);

        if let Ok(mut window) = self.window.lock() {
            let cutoff = now - ChronoDuration::hours(WINDOW_RETENTION_HOURS);
            window.retain(|(start, _)| *start >= cutoff);
            let slot = kind_index(kind);
            match window.last_mut() {
                Some((start, counts)) if *start == hour => {
                    if let Some(count) = counts.get_mut(slot) {
                        *count += 1;
                    }
                }
                _ => {
                    let mut counts = [0u64; AuditKind::ALL.len()];
                    if let Some(count) = counts.get_mut(slot) {
                        *count = 1;
                    }
                    window.push((hour, counts));
                }
            }
        }
    }

    fn windowed_counts(&self, since: DateTime<Utc>) -> BTreeMap<String, u64> {
        let mut out: BTreeMap<String, u64> = BTreeMap::new();
        if let Ok(window) = self.window.lock() {
            for (start, counts) in window.iter() {
                if *start >= since {
                    for (kind, count) in AuditKind::ALL.iter().zip(counts.iter()) {
                        if *count > 0 {
                            *out.entry(kind.as_str().to_string()).or_insert(0) += count;
                        }
                    }
                }
            }
        }
        out
    }
}

/// Aggregate audit metrics served by the compliance endpoint.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComplianceReport {
    pub generated_at: DateTime<Utc>,
    pub timeframe: String,
    pub totals_by_kind: BTreeMap<String, u64>,
    pub totals_by_severity: BTreeMap<String, u64>,
    pub records_in_timeframe: BTreeMap<String, u64>,
    pub dropped_records: u64,
}

/// Handle to the audit sink. Cheap to clone.
#[derive(Clone)]
pub struct AuditSink {
    tx: mpsc::Sender<SinkCommand>,
    counters: Arc<Counters>,
    scrubber: Arc<PhiScrubber>,
}

impl AuditSink {
    /// Spawn the writer task and return the sink handle plus the task handle
    /// (held by `main` so shutdown can await the final flush).
    pub fn spawn(config: AuditConfig, scrubber: Arc<PhiScrubber>) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(config.queue_depth.max(2));
        let counters = Arc::new(Counters::default());
        let handle = tokio::spawn(writer_task(config, rx));
        (
            Self {
                tx,
                counters,
                scrubber,
            },
            handle,
        )
    }

    /// Enqueue a record. Never blocks longer than a bounded queue push; on a
    /// full queue the record is shed and a marker takes its place.
    pub fn emit(&self, record: AuditRecord) {
        let scrubbed = self.scrub(record);
        self.counters
            .record(scrubbed.kind, scrubbed.severity, scrubbed.timestamp);
        record_audit_emitted(scrubbed.kind.as_str(), scrubbed.severity.as_str());

        match self.tx.try_send(SinkCommand::Record(Box::new(scrubbed))) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(SinkCommand::Record(record))) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                record_audit_dropped();
                let marker = AuditRecord::dropped_marker(&record);
                // Best effort: the marker is small; if even it does not fit,
                // the drop counter is the only trace left.
                if self
                    .tx
                    .try_send(SinkCommand::Record(Box::new(marker)))
                    .is_err()
                {
                    debug!(target: "mg.audit", "audit queue full, marker also shed");
                }
            }
            Err(_) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                record_audit_dropped();
            }
        }
    }

    /// Wait until every record enqueued before this call has been written.
    pub async fn flush(&self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.tx.send(SinkCommand::Flush(ack_tx)).await.is_ok() {
            let _ = ack_rx.await;
        }
    }

    /// Aggregate metrics for the compliance endpoint.
    pub fn compliance_report(&self, timeframe: ChronoDuration, label: &str) -> ComplianceReport {
        let now = Utc::now();
        let mut totals_by_kind = BTreeMap::new();
        for (kind, counter) in AuditKind::ALL.iter().zip(self.counters.by_kind.iter()) {
            let count = counter.load(Ordering::Relaxed);
            if count > 0 {
                totals_by_kind.insert(kind.as_str().to_string(), count);
            }
        }
        let mut totals_by_severity = BTreeMap::new();
        for (severity, counter) in AuditSeverity::ALL
            .iter()
            .zip(self.counters.by_severity.iter())
        {
            let count = counter.load(Ordering::Relaxed);
            if count > 0 {
                totals_by_severity.insert(severity.as_str().to_string(), count);
            }
        }

        ComplianceReport {
            generated_at: now,
            timeframe: label.to_string(),
            totals_by_kind,
            totals_by_severity,
            records_in_timeframe: self.counters.windowed_counts(now - timeframe),
            dropped_records: self.counters.dropped.load(Ordering::Relaxed),
        }
    }

    /// Current queue headroom, surfaced by the detailed health endpoint.
    pub fn queue_capacity(&self) -> usize {
        self.tx.capacity()
    }

    /// Records shed so far.
    pub fn dropped_count(&self) -> u64 {
        self.counters.dropped.load(Ordering::Relaxed)
    }

    /// Scrub every free-text field. Fixed enums and the timestamp pass
    /// through; the session hash must already be hashed by the caller.
    fn scrub(&self, mut record: AuditRecord) -> AuditRecord {
        record.resource = self.scrubber.scrub_text(&record.resource).0;
        record.action = self.scrubber.scrub_text(&record.action).0;
        if let Some(hash) = &record.session_hash {
            if !common::hashing::is_hashed(hash) {
                warn!(target: "mg.audit", "unhashed session identifier reached the sink");
                record.session_hash = Some(self.scrubber.replacement().to_string());
            }
        }
        let details = serde_json::Value::Object(std::mem::take(&mut record.details));
        if let serde_json::Value::Object(map) = self.scrubber.scrub_value(&details) {
            record.details = map;
        }
        record
    }
}

/// Select the stream file for a record.
fn stream_file(record: &AuditRecord) -> &'static str {
    if record.kind == AuditKind::SecurityEvent {
        "audit-security.log"
    } else if matches!(
        record.severity,
        AuditSeverity::Error | AuditSeverity::Critical
    ) {
        "audit-error.log"
    } else {
        "audit.log"
    }
}

async fn append_line(directory: &Path, file: &str, line: &str) -> std::io::Result<()> {
    let mut handle = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(directory.join(file))
        .await?;
    handle.write_all(line.as_bytes()).await?;
    handle.write_all(b"\n").await?;
    Ok(())
}

async fn writer_task(config: AuditConfig, mut rx: mpsc::Receiver<SinkCommand>) {
    if config.write_enabled {
        if let Err(e) = tokio::fs::create_dir_all(&config.directory).await {
            error!(target: "mg.audit", error = %e, "failed to create audit directory");
        }
    }

    while let Some(command) = rx.recv().await {
        match command {
            SinkCommand::Record(record) => {
                if !config.write_enabled
                    || severity_index(record.severity) < severity_index(config.min_severity)
                {
                    continue;
                }
                match serde_json::to_string(&record) {
                    Ok(line) => {
                        let file = stream_file(&record);
                        if let Err(e) = append_line(&config.directory, file, &line).await {
                            error!(target: "mg.audit", error = %e, file, "audit write failed");
                        }
                    }
                    Err(e) => {
                        error!(target: "mg.audit", error = %e, "audit record serialization failed");
                    }
                }
            }
            SinkCommand::Flush(ack) => {
                // All prior records were written above; acknowledge.
                let _ = ack.send(());
            }
        }
    }

    debug!(target: "mg.audit", "audit writer stopped");
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::models::AuditOutcome;

    fn test_sink(dir: &Path) -> (AuditSink, JoinHandle<()>) {
        AuditSink::spawn(
            AuditConfig::new(dir, true),
            Arc::new(PhiScrubber::default()),
        )
    }

    fn record(kind: AuditKind, severity: AuditSeverity) -> AuditRecord {
        AuditRecord::new(kind, severity, "medical-chat", "federate")
            .with_session_hash("h:00112233aabbccdd")
            .with_outcome(AuditOutcome::Success)
    }

    #[tokio::test]
    async fn test_emit_writes_json_line() {
        let dir = tempfile::tempdir().unwrap();
        let (sink, _task) = test_sink(dir.path());

        sink.emit(record(AuditKind::MedicalQuery, AuditSeverity::Info));
        sink.flush().await;

        let content = tokio::fs::read_to_string(dir.path().join("audit.log"))
            .await
            .unwrap();
        let parsed: serde_json::Value = serde_json::from_str(content.trim()).unwrap();
        assert_eq!(parsed["kind"], "medical-query");
        assert_eq!(parsed["sessionHash"], "h:00112233aabbccdd");
    }

    #[tokio::test]
    async fn test_streams_are_separated() {
        let dir = tempfile::tempdir().unwrap();
        let (sink, _task) = test_sink(dir.path());

        sink.emit(record(AuditKind::SecurityEvent, AuditSeverity::Warning));
        sink.emit(record(AuditKind::Http, AuditSeverity::Error));
        sink.emit(record(AuditKind::Access, AuditSeverity::Info));
        sink.flush().await;

        assert!(dir.path().join("audit-security.log").exists());
        assert!(dir.path().join("audit-error.log").exists());
        assert!(dir.path().join("audit.log").exists());
    }

    #[tokio::test]
    async fn test_details_are_scrubbed_before_write() {
        let dir = tempfile::tempdir().unwrap();
        let (sink, _task) = test_sink(dir.path());

        let rec = record(AuditKind::MedicalQuery, AuditSeverity::Info)
            .with_detail("note", "patient ssn 123-45-6789 called from 555-123-4567")
            .with_detail("email", "jane@example.org");
        sink.emit(rec);
        sink.flush().await;

        let content = tokio::fs::read_to_string(dir.path().join("audit.log"))
            .await
            .unwrap();
        assert!(!content.contains("123-45-6789"));
        assert!(!content.contains("555-123-4567"));
        assert!(!content.contains("jane@example.org"));
        assert!(content.contains("[REDACTED]"));
    }

    #[tokio::test]
    async fn test_raw_session_id_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let (sink, _task) = test_sink(dir.path());

        let rec = AuditRecord::new(AuditKind::Access, AuditSeverity::Info, "session", "create")
            .with_session_hash("raw-session-id-should-not-appear");
        sink.emit(rec);
        sink.flush().await;

        let content = tokio::fs::read_to_string(dir.path().join("audit.log"))
            .await
            .unwrap();
        assert!(!content.contains("raw-session-id-should-not-appear"));
    }

    #[tokio::test]
    async fn test_disabled_sink_counts_without_writing() {
        let dir = tempfile::tempdir().unwrap();
        let (sink, _task) = AuditSink::spawn(
            AuditConfig::new(dir.path(), false),
            Arc::new(PhiScrubber::default()),
        );

        sink.emit(record(AuditKind::MedicalQuery, AuditSeverity::Info));
        sink.flush().await;

        assert!(!dir.path().join("audit.log").exists());
        let report = sink.compliance_report(ChronoDuration::hours(24), "24h");
        assert_eq!(report.totals_by_kind["medical-query"], 1);
    }

    #[tokio::test]
    async fn test_full_queue_sheds_with_marker() {
        // Writer task is deliberately not started: build the channel pieces
        // by hand so the queue stays full.
        let (tx, _rx) = mpsc::channel(2);
        let sink = AuditSink {
            tx,
            counters: Arc::new(Counters::default()),
            scrubber: Arc::new(PhiScrubber::default()),
        };

        for _ in 0..8 {
            sink.emit(record(AuditKind::Http, AuditSeverity::Info));
        }

        assert!(sink.dropped_count() > 0, "overflow must be counted");
    }

    #[tokio::test]
    async fn test_compliance_report_windowed_counts() {
        let dir = tempfile::tempdir().unwrap();
        let (sink, _task) = test_sink(dir.path());

        sink.emit(record(AuditKind::MedicalQuery, AuditSeverity::Info));
        sink.emit(record(AuditKind::Http, AuditSeverity::Info));
        sink.flush().await;

        let report = sink.compliance_report(ChronoDuration::hours(24), "24h");
        assert_eq!(report.records_in_timeframe["medical-query"], 1);
        assert_eq!(report.records_in_timeframe["http"], 1);
        assert_eq!(report.dropped_records, 0);
        assert_eq!(report.timeframe, "24h");
    }
}
