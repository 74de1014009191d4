//! Import job orchestration
//!
//! Drives parser, normalizer, duplicate detector and batch writer in lockstep
//! for one job:
//!
//! ```text
//! Initializing -> LoadingExistingKeys -> Streaming -> Completed
//!       \________________\__________________\-------> Failed
//! ```
//!
//! Memory use is bounded by one batch plus the preloaded key set, whatever
//! the file size. Row-level problems are counted and skipped; only a broken
//! stream or a failed setup step fails the job. Nothing is rolled back on
//! failure and nothing is retried.

use std::path::Path;
use std::sync::Arc;
use tokio::fs::File;
use tokio::io::AsyncRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::config::{ColumnNames, ImportConfig};
use super::dedup::{DuplicateKeySet, KeyStatus};
use super::error::{FileError, ImportError};
use super::normalize::Normalizer;
use super::parser::{count_rows, HeaderSchema, RowParser};
use super::progress::{ProgressReporter, ProgressSink};
use super::types::{ImportJob, ImportReport, ImportStage, RowError, SourceFile, ValidationReport};
use super::writer::BatchWriter;
use crate::store::CompanyStore;

/// Pipeline tunables taken from [`ImportConfig`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineSettings {
    pub batch_size: usize,
    pub recent_errors: usize,
    pub report_errors: usize,
    pub preview_rows: usize,
}

impl From<&ImportConfig> for PipelineSettings {
    fn from(config: &ImportConfig) -> Self {
        Self {
            batch_size: config.batch_size.max(1),
            recent_errors: config.recent_errors,
            report_errors: config.report_errors,
            preview_rows: config.preview_rows,
        }
    }
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self::from(&ImportConfig::default())
    }
}

/// An uploaded or local CSV whose header has been checked
pub struct PreparedFile {
    pub source: SourceFile,
    pub parser: RowParser<File>,
    /// Data rows, when counted up front
    pub total_rows: Option<u64>,
}

/// Open a CSV on disk, resolve its header and optionally count its rows.
///
/// Every problem here is a [`FileError`]: the job has not started yet.
pub async fn prepare_file(
    path: &Path,
    display_name: &str,
    columns: &ColumnNames,
    precount: bool,
) -> Result<PreparedFile, FileError> {
    let size_bytes = tokio::fs::metadata(path).await?.len();
    if size_bytes == 0 {
        return Err(FileError::Empty);
    }

    let parser = RowParser::open(File::open(path).await?, columns).await?;

    let total_rows = if precount {
        let rows = count_rows(File::open(path).await?)
            .await
            .map_err(|e| FileError::Unreadable(e.to_string()))?;
        debug!(file = display_name, rows, "Rows counted");
        Some(rows)
    } else {
        None
    };

    Ok(PreparedFile {
        source: SourceFile {
            name: display_name.to_string(),
            size_bytes,
        },
        parser,
        total_rows,
    })
}

pub struct ImportPipeline {
    store: Arc<dyn CompanyStore>,
    settings: PipelineSettings,
    clock: Option<fn() -> i64>,
    cancel: Option<CancellationToken>,
}

impl ImportPipeline {
    pub fn new(store: Arc<dyn CompanyStore>, settings: PipelineSettings) -> Self {
        Self {
            store,
            settings,
            clock: None,
            cancel: None,
        }
    }

    /// Fixed millisecond source for slugs
    pub fn with_clock(mut self, clock: fn() -> i64) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Stop streaming once `token` is cancelled; the job then ends `Failed`
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(CancellationToken::is_cancelled)
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    fn normalizer(&self, schema: HeaderSchema) -> Normalizer {
        let normalizer = Normalizer::new(schema);
        match self.clock {
            Some(clock) => normalizer.with_clock(clock),
            None => normalizer,
        }
    }

    /// Run one commit-mode job to a terminal stage.
    ///
    /// Always returns a report and always ends with a final event on `sink`,
    /// whether the job completed or failed.
    #[tracing::instrument(
        skip_all,
        fields(job_id = %job.id, file = %job.source.name, size_bytes = job.source.size_bytes)
    )]
    pub async fn run<R>(
        &self,
        mut job: ImportJob,
        mut parser: RowParser<R>,
        total_rows: Option<u64>,
        sink: &dyn ProgressSink,
    ) -> ImportReport
    where
        R: AsyncRead + Unpin + Send,
    {
        info!(total_rows = ?total_rows, batch_size = self.settings.batch_size, "Import job started");

        let total_bytes = Some(job.source.size_bytes).filter(|b| *b > 0);
        let mut reporter =
            ProgressReporter::new(sink, self.settings.recent_errors, self.settings.report_errors)
                .with_total_rows(total_rows)
                .with_total_bytes(total_bytes);

        let message = match self.drive(&mut job, &mut parser, &mut reporter).await {
            Ok(()) => match job.transition(ImportStage::Completed) {
                Ok(()) => format!("Import completed: {} rows processed", job.counters.rows_seen),
                Err(e) => {
                    job.fail(e.to_string());
                    format!("Import failed: {}", e)
                },
            },
            Err(e) => {
                error!(
                    error = %e,
                    stage = %job.stage,
                    rows_seen = job.counters.rows_seen,
                    "Import job failed"
                );
                job.fail(e.to_string());
                format!("Import failed: {}", e)
            },
        };

        if let Err(e) = self.store.save_job(&job).await {
            warn!(error = %e, "Failed to record final job state");
        }

        let report = ImportReport::new(&job, reporter.total_errors(), reporter.error_sample());
        info!(
            stage = %report.stage,
            processed = report.processed,
            created = report.created,
            skipped_validation = report.skipped_validation,
            skipped_duplicate = report.skipped_duplicate,
            errored = report.errored,
            elapsed_ms = report.elapsed_ms,
            "Import job finished"
        );
        if !job.counters.is_conserved() {
            error!(counters = ?job.counters, "Row counters do not add up");
        }

        reporter.finish(report.clone(), message).await;
        report
    }

    async fn drive<R>(
        &self,
        job: &mut ImportJob,
        parser: &mut RowParser<R>,
        reporter: &mut ProgressReporter<'_>,
    ) -> Result<(), ImportError>
    where
        R: AsyncRead + Unpin + Send,
    {
        self.store.save_job(job).await.map_err(ImportError::JobRecord)?;

        self.enter(job, ImportStage::LoadingExistingKeys).await?;
        reporter
            .progress(
                ImportStage::LoadingExistingKeys,
                0,
                0,
                "Loading existing company numbers",
            )
            .await;

        let mut keys = DuplicateKeySet::new();
        let loaded = keys
            .preload_stream(self.store.existing_keys())
            .await
            .map_err(ImportError::KeyPreload)?;
        info!(existing_keys = loaded, "Existing company numbers loaded");

        self.enter(job, ImportStage::Streaming).await?;
        reporter
            .progress(
                ImportStage::Streaming,
                0,
                parser.bytes_read(),
                format!("Loaded {} existing company numbers", loaded),
            )
            .await;

        let normalizer = self.normalizer(parser.schema().clone());
        let mut writer = BatchWriter::new(self.store.clone(), self.settings.batch_size);
        let mut since_event = 0usize;

        loop {
            if self.is_cancelled() {
                warn!(rows_seen = job.counters.rows_seen, "Import cancelled by shutdown");
                self.flush(job, &mut writer, reporter).await;
                return Err(ImportError::Interrupted {
                    last_row: job.counters.rows_seen,
                });
            }

            let next = match parser.next_row().await {
                Ok(next) => next,
                Err(e) => {
                    // rows read before the failure still get written
                    self.flush(job, &mut writer, reporter).await;
                    return Err(e.into());
                },
            };
            let Some(parsed) = next else { break };

            job.counters.rows_seen += 1;
            since_event += 1;

            let mut flushed = false;
            match parsed {
                Err(malformed) => {
                    debug!(row = malformed.row_number, error = %malformed, "Malformed row skipped");
                    job.counters.inc_skipped_validation();
                    reporter.record_error(malformed.into());
                },
                Ok(raw) => match normalizer.normalize(&raw) {
                    Err(invalid) => {
                        debug!(row = invalid.row, field = %invalid.field, "Invalid row skipped");
                        job.counters.inc_skipped_validation();
                        reporter.record_error(invalid.into());
                    },
                    Ok(row) => match keys.check_and_reserve(row.business_key()) {
                        KeyStatus::Duplicate => job.counters.inc_skipped_duplicate(),
                        KeyStatus::New => {
                            if writer.push(row) {
                                self.flush(job, &mut writer, reporter).await;
                                flushed = true;
                            }
                        },
                    },
                },
            }

            if flushed || since_event >= self.settings.batch_size {
                since_event = 0;
                reporter
                    .progress(
                        ImportStage::Streaming,
                        job.counters.rows_seen,
                        parser.bytes_read(),
                        progress_message(job.counters.rows_seen, reporter.total_rows()),
                    )
                    .await;
            }
        }

        if writer.pending() > 0 {
            self.flush(job, &mut writer, reporter).await;
        }
        Ok(())
    }

    async fn enter(&self, job: &mut ImportJob, stage: ImportStage) -> Result<(), ImportError> {
        job.transition(stage)?;
        info!(stage = %stage, "Import stage changed");
        if let Err(e) = self.store.save_job(job).await {
            warn!(stage = %stage, error = %e, "Failed to record job stage");
        }
        Ok(())
    }

    async fn flush(
        &self,
        job: &mut ImportJob,
        writer: &mut BatchWriter,
        reporter: &mut ProgressReporter<'_>,
    ) {
        let result = writer.flush().await;
        job.counters.created += result.created;
        for failure in result.errors {
            debug!(row = failure.row, error = %failure.message, "Row not persisted");
            job.counters.inc_errored();
            reporter.record_error(failure);
        }
        debug!(
            created_total = job.counters.created,
            errored_total = job.counters.errored,
            "Batch complete"
        );
    }

    /// Parse and validate everything without writing.
    ///
    /// Duplicates are checked against the store and within the file.
    #[tracing::instrument(skip_all)]
    pub async fn validate<R>(&self, mut parser: RowParser<R>) -> Result<ValidationReport, ImportError>
    where
        R: AsyncRead + Unpin + Send,
    {
        let mut keys = DuplicateKeySet::new();
        keys.preload_stream(self.store.existing_keys())
            .await
            .map_err(ImportError::KeyPreload)?;

        let normalizer = self.normalizer(parser.schema().clone());
        let mut report = ValidationReport {
            is_valid: true,
            total_rows: 0,
            valid_rows: 0,
            duplicates: 0,
            errors: Vec::new(),
            preview: Vec::new(),
        };
        let record_error = |report: &mut ValidationReport, error: RowError| {
            report.is_valid = false;
            if report.errors.len() < self.settings.report_errors {
                report.errors.push(error);
            }
        };

        while let Some(parsed) = parser.next_row().await? {
            report.total_rows += 1;
            let raw = match parsed {
                Ok(raw) => raw,
                Err(malformed) => {
                    record_error(&mut report, malformed.into());
                    continue;
                },
            };
            match normalizer.normalize(&raw) {
                Ok(row) => {
                    report.valid_rows += 1;
                    if keys.check_and_reserve(row.business_key()) == KeyStatus::Duplicate {
                        report.duplicates += 1;
                    }
                    if report.preview.len() < self.settings.preview_rows {
                        report.preview.push(row.record);
                    }
                },
                Err(invalid) => record_error(&mut report, invalid.into()),
            }
        }

        info!(
            total_rows = report.total_rows,
            valid_rows = report.valid_rows,
            duplicates = report.duplicates,
            is_valid = report.is_valid,
            "Validation finished"
        );
        Ok(report)
    }
}

fn progress_message(processed: u64, total: Option<u64>) -> String {
    match total {
        Some(total) => format!("Processed {} of {} rows", processed, total),
        None => format!("Processed {} rows", processed),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::progress::NullSink;
    use crate::store::MemoryCompanyStore;
    use std::io::Write;

    fn pipeline(store: Arc<MemoryCompanyStore>, batch_size: usize) -> ImportPipeline {
        ImportPipeline::new(
            store,
            PipelineSettings {
                batch_size,
                ..Default::default()
            },
        )
        .with_clock(|| 1_700_000_000_000)
    }

    async fn parser(csv: &'static str) -> RowParser<&'static [u8]> {
        RowParser::open(csv.as_bytes(), &ColumnNames::default()).await.unwrap()
    }

    fn job(csv: &str) -> ImportJob {
        ImportJob::new(SourceFile {
            name: "companies.csv".to_string(),
            size_bytes: csv.len() as u64,
        })
    }

    #[tokio::test]
    async fn test_run_counts_every_row_once() {
        let csv = "CompanyNumber,CompanyName\n\
                   00000001,Acme Ltd\n\
                   00000001,Acme Again Ltd\n\
                   00000002,\n\
                   00000003,Beta Ltd,extra\n\
                   00000004,Gamma Ltd\n";
        let store = Arc::new(MemoryCompanyStore::new());
        let report = pipeline(store.clone(), 2)
            .run(job(csv), parser(csv).await, Some(5), &NullSink)
            .await;

        assert!(report.success());
        assert_eq!(report.processed, 5);
        assert_eq!(report.created, 2);
        assert_eq!(report.skipped_duplicate, 1);
        assert_eq!(report.skipped_validation, 2);
        assert_eq!(report.errored, 0);
        assert_eq!(report.total_errors, 2);
        assert_eq!(store.company_count(), 2);

        let saved = store.get_job(report.job_id).await.unwrap().unwrap();
        assert_eq!(saved.stage, ImportStage::Completed);
        assert!(saved.counters.is_conserved());
    }

    #[tokio::test]
    async fn test_store_outage_fails_job_before_streaming() {
        let csv = "CompanyNumber,CompanyName\n00000001,Acme Ltd\n";
        let store = Arc::new(MemoryCompanyStore::new());
        store.set_unavailable(Some("database restarting"));

        let report = pipeline(store.clone(), 10)
            .run(job(csv), parser(csv).await, None, &NullSink)
            .await;
        assert_eq!(report.stage, ImportStage::Failed);
        assert!(report.failure.unwrap().contains("database restarting"));
        assert_eq!(report.processed, 0);
    }

    #[tokio::test]
    async fn test_validate_does_not_write() {
        let csv = "CompanyNumber,CompanyName,RegAddress.PostTown\n\
                   00000001,Acme Ltd,LONDON\n\
                   00000002,,LEEDS\n\
                   00000003,Beta Ltd,\n\
                   00000003,Beta Again Ltd,\n";
        let store = Arc::new(MemoryCompanyStore::new());
        let report = pipeline(store.clone(), 10).validate(parser(csv).await).await.unwrap();

        assert!(!report.is_valid);
        assert_eq!(report.total_rows, 4);
        assert_eq!(report.valid_rows, 3);
        assert_eq!(report.duplicates, 1);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].row, 2);
        assert_eq!(report.preview.len(), 3);
        assert_eq!(report.preview[0].field("reg_address_post_town"), Some("LONDON"));
        assert_eq!(store.company_count(), 0);
    }

    #[tokio::test]
    async fn test_prepare_file_counts_rows_and_checks_header() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "CompanyNumber,CompanyName\n1,A\n2,\"B\nC\"\n").unwrap();

        let prepared = prepare_file(file.path(), "upload.csv", &ColumnNames::default(), true)
            .await
            .unwrap();
        assert_eq!(prepared.total_rows, Some(2));
        assert_eq!(prepared.source.name, "upload.csv");

        let mut bad = tempfile::NamedTempFile::new().unwrap();
        write!(bad, "Number,Name\n1,A\n").unwrap();
        let err = prepare_file(bad.path(), "bad.csv", &ColumnNames::default(), true)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, FileError::MissingColumn(ref c) if c == "CompanyNumber"));
    }

    #[tokio::test]
    async fn test_prepare_file_rejects_empty_file() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let err = prepare_file(file.path(), "empty.csv", &ColumnNames::default(), false)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, FileError::Empty));
    }
}
