//! Progress reporting
//!
//! The pipeline hands [`ImportEvent`]s to a [`ProgressSink`]; the HTTP layer
//! turns them into SSE frames, the CLI logs them. Events are only produced
//! at stage changes and once per batch worth of rows, never per row.

use async_trait::async_trait;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::types::{FinalStats, ImportReport, ImportStage, RowError};

/// Highest percentage reported before the job has actually completed.
const MAX_IN_FLIGHT_PERCENTAGE: u8 = 99;

/// A snapshot of a running job
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    pub stage: ImportStage,
    pub current: u64,
    pub total: Option<u64>,
    pub percentage: u8,
    pub message: String,
    /// Most recent row errors since the previous event
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<RowError>,
}

/// Last event of every job
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalEvent {
    pub final_stats: FinalStats,
    pub success: bool,
    pub job_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub report: ImportReport,
}

impl From<ImportReport> for FinalEvent {
    fn from(report: ImportReport) -> Self {
        Self {
            final_stats: report.final_stats(),
            success: report.success(),
            job_id: report.job_id,
            error: report.failure.clone(),
            report,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ImportEvent {
    Progress(ProgressEvent),
    Final(Box<FinalEvent>),
}

impl ImportEvent {
    pub fn is_final(&self) -> bool {
        matches!(self, ImportEvent::Final(_))
    }
}

/// Where progress events go
#[async_trait]
pub trait ProgressSink: Send + Sync {
    async fn emit(&self, event: ImportEvent);
}

/// Discards everything
pub struct NullSink;

#[async_trait]
impl ProgressSink for NullSink {
    async fn emit(&self, _event: ImportEvent) {}
}

/// Logs each event through tracing
pub struct LogSink;

#[async_trait]
impl ProgressSink for LogSink {
    async fn emit(&self, event: ImportEvent) {
        match event {
            ImportEvent::Progress(p) => info!(
                stage = %p.stage,
                current = p.current,
                total = ?p.total,
                percentage = p.percentage,
                recent_errors = p.errors.len(),
                "{}",
                p.message
            ),
            ImportEvent::Final(f) => info!(
                job_id = %f.job_id,
                success = f.success,
                processed = f.final_stats.processed,
                created = f.final_stats.created,
                skipped = f.final_stats.skipped,
                total_errors = f.final_stats.total_errors,
                "Import finished"
            ),
        }
    }
}

/// Forwards events to a bounded channel read by the transport.
///
/// A full channel drops intermediate snapshots; the final event waits for
/// room. Once the receiver is gone the job keeps running and the sink goes
/// quiet after logging the disconnect once.
pub struct ChannelSink {
    tx: mpsc::Sender<ImportEvent>,
    disconnected: AtomicBool,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<ImportEvent>) -> Self {
        Self {
            tx,
            disconnected: AtomicBool::new(false),
        }
    }

    fn mark_disconnected(&self) {
        if !self.disconnected.swap(true, Ordering::Relaxed) {
            warn!("Progress receiver disconnected; import continues without live progress");
        }
    }
}

#[async_trait]
impl ProgressSink for ChannelSink {
    async fn emit(&self, event: ImportEvent) {
        if self.disconnected.load(Ordering::Relaxed) {
            return;
        }
        if event.is_final() {
            if self.tx.send(event).await.is_err() {
                self.mark_disconnected();
            }
            return;
        }
        match self.tx.try_send(event) {
            Ok(()) => {},
            Err(mpsc::error::TrySendError::Full(_)) => {
                debug!("Progress channel full, snapshot dropped");
            },
            Err(mpsc::error::TrySendError::Closed(_)) => self.mark_disconnected(),
        }
    }
}

/// Builds progress events for one job.
///
/// Keeps the percentage non-decreasing, holds back 100 for completion and
/// bounds the error payload of each event.
pub struct ProgressReporter<'a> {
    sink: &'a dyn ProgressSink,
    total_rows: Option<u64>,
    total_bytes: Option<u64>,
    recent: VecDeque<RowError>,
    recent_cap: usize,
    sample: Vec<RowError>,
    sample_cap: usize,
    total_errors: u64,
    last_percentage: u8,
}

impl<'a> ProgressReporter<'a> {
    pub fn new(sink: &'a dyn ProgressSink, recent_cap: usize, sample_cap: usize) -> Self {
        Self {
            sink,
            total_rows: None,
            total_bytes: None,
            recent: VecDeque::with_capacity(recent_cap),
            recent_cap,
            sample: Vec::with_capacity(sample_cap),
            sample_cap,
            total_errors: 0,
            last_percentage: 0,
        }
    }

    /// Known row count; takes precedence over the byte size
    pub fn with_total_rows(mut self, total: Option<u64>) -> Self {
        self.total_rows = total;
        self
    }

    /// File size used when the row count is unknown
    pub fn with_total_bytes(mut self, bytes: Option<u64>) -> Self {
        self.total_bytes = bytes;
        self
    }

    pub fn total_rows(&self) -> Option<u64> {
        self.total_rows
    }

    pub fn total_errors(&self) -> u64 {
        self.total_errors
    }

    pub fn last_percentage(&self) -> u8 {
        self.last_percentage
    }

    pub fn record_error(&mut self, error: RowError) {
        self.total_errors += 1;
        if self.sample.len() < self.sample_cap {
            self.sample.push(error.clone());
        }
        if self.recent_cap == 0 {
            return;
        }
        if self.recent.len() == self.recent_cap {
            self.recent.pop_front();
        }
        self.recent.push_back(error);
    }

    /// Bounded sample of the job's first errors
    pub fn error_sample(&self) -> Vec<RowError> {
        self.sample.clone()
    }

    /// `min(99, processed / total)` by rows, else by bytes; never below the previous value
    pub fn percentage(&mut self, processed: u64, bytes_read: u64) -> u8 {
        let raw = match (self.total_rows, self.total_bytes) {
            (Some(total), _) if total > 0 => processed.saturating_mul(100) / total,
            (None, Some(bytes)) if bytes > 0 => bytes_read.saturating_mul(100) / bytes,
            _ => 0,
        };
        let capped = raw.min(u64::from(MAX_IN_FLIGHT_PERCENTAGE)) as u8;
        self.last_percentage = self.last_percentage.max(capped);
        self.last_percentage
    }

    /// Emit an in-flight snapshot carrying the errors recorded since the last one
    pub async fn progress(
        &mut self,
        stage: ImportStage,
        processed: u64,
        bytes_read: u64,
        message: impl Into<String>,
    ) {
        let percentage = self.percentage(processed, bytes_read);
        let event = ProgressEvent {
            stage,
            current: processed,
            total: self.total_rows,
            percentage,
            message: message.into(),
            errors: self.recent.drain(..).collect(),
        };
        self.sink.emit(ImportEvent::Progress(event)).await;
    }

    /// Emit the terminal snapshot followed by the final report.
    ///
    /// Only a completed job reaches 100.
    pub async fn finish(&mut self, report: ImportReport, message: impl Into<String>) {
        if report.stage == ImportStage::Completed {
            self.last_percentage = 100;
        }
        let event = ProgressEvent {
            stage: report.stage,
            current: report.processed,
            total: self.total_rows,
            percentage: self.last_percentage,
            message: message.into(),
            errors: self.recent.drain(..).collect(),
        };
        self.sink.emit(ImportEvent::Progress(event)).await;
        self.sink
            .emit(ImportEvent::Final(Box::new(FinalEvent::from(report))))
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::types::RowErrorReason;

    fn err(row: u64) -> RowError {
        RowError::new(row, RowErrorReason::MissingRequiredField, "CompanyName is required")
    }

    #[test]
    fn test_percentage_capped_and_monotonic() {
        let sink = NullSink;
        let mut reporter = ProgressReporter::new(&sink, 5, 10).with_total_rows(Some(200));

        assert_eq!(reporter.percentage(50, 0), 25);
        assert_eq!(reporter.percentage(200, 0), 99);
        // a lower reading never moves the percentage back
        assert_eq!(reporter.percentage(10, 0), 99);
    }

    #[test]
    fn test_percentage_falls_back_to_bytes() {
        let sink = NullSink;
        let mut reporter = ProgressReporter::new(&sink, 5, 10).with_total_bytes(Some(1000));
        assert_eq!(reporter.percentage(3, 250), 25);

        let mut unknown = ProgressReporter::new(&sink, 5, 10);
        assert_eq!(unknown.percentage(1_000, 1_000), 0);
    }

    #[tokio::test]
    async fn test_recent_errors_drop_oldest() {
        let (tx, mut rx) = mpsc::channel(8);
        let sink = ChannelSink::new(tx);
        let mut reporter = ProgressReporter::new(&sink, 2, 10).with_total_rows(Some(10));
        for row in 1..=4 {
            reporter.record_error(err(row));
        }
        reporter.progress(ImportStage::Streaming, 4, 0, "Processed 4 rows").await;

        let ImportEvent::Progress(event) = rx.recv().await.unwrap() else {
            panic!("expected progress event");
        };
        let rows: Vec<u64> = event.errors.iter().map(|e| e.row).collect();
        assert_eq!(rows, vec![3, 4]);
        assert_eq!(reporter.total_errors(), 4);
        assert_eq!(reporter.error_sample().len(), 4);
    }

    #[tokio::test]
    async fn test_progress_event_json_omits_empty_errors() {
        let event = ProgressEvent {
            stage: ImportStage::Streaming,
            current: 500,
            total: Some(1000),
            percentage: 50,
            message: "Processed 500 rows".to_string(),
            errors: Vec::new(),
        };
        let json = serde_json::to_value(ImportEvent::Progress(event)).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "stage": "streaming",
                "current": 500,
                "total": 1000,
                "percentage": 50,
                "message": "Processed 500 rows"
            })
        );
    }

    #[tokio::test]
    async fn test_channel_sink_survives_disconnect() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let sink = ChannelSink::new(tx);
        let mut reporter = ProgressReporter::new(&sink, 5, 10);

        reporter.progress(ImportStage::Streaming, 1, 0, "still going").await;
        reporter.progress(ImportStage::Streaming, 2, 0, "still going").await;
        assert!(sink.disconnected.load(Ordering::Relaxed));
    }
}
