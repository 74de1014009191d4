//! Core types for the company import pipeline

use bizreg_common::CompanyRecord;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Import job stage
///
/// `Initializing → LoadingExistingKeys → Streaming → Completed`, or `Failed`
/// from any non-terminal stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportStage {
    Initializing,
    LoadingExistingKeys,
    Streaming,
    Completed,
    Failed,
}

impl ImportStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImportStage::Initializing => "initializing",
            ImportStage::LoadingExistingKeys => "loading_existing_keys",
            ImportStage::Streaming => "streaming",
            ImportStage::Completed => "completed",
            ImportStage::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ImportStage::Completed | ImportStage::Failed)
    }

    pub fn can_transition_to(&self, next: ImportStage) -> bool {
        use ImportStage::*;
        match (self, next) {
            (Completed, _) | (Failed, _) => false,
            (_, Failed) => true,
            (Initializing, LoadingExistingKeys) => true,
            (LoadingExistingKeys, Streaming) => true,
            (Streaming, Completed) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for ImportStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown import stage '{0}'")]
pub struct UnknownStage(pub String);

impl std::str::FromStr for ImportStage {
    type Err = UnknownStage;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "initializing" => Ok(ImportStage::Initializing),
            "loading_existing_keys" => Ok(ImportStage::LoadingExistingKeys),
            "streaming" => Ok(ImportStage::Streaming),
            "completed" => Ok(ImportStage::Completed),
            "failed" => Ok(ImportStage::Failed),
            other => Err(UnknownStage(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid import stage transition: {from} -> {to}")]
pub struct InvalidTransition {
    pub from: ImportStage,
    pub to: ImportStage,
}

/// The uploaded file an import reads from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceFile {
    pub name: String,
    pub size_bytes: u64,
}

/// Cumulative row counters for one job
///
/// Every row read from the file lands in exactly one bucket, so
/// `rows_seen == created + skipped_validation + skipped_duplicate + errored`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportCounters {
    pub rows_seen: u64,
    pub created: u64,
    pub skipped_validation: u64,
    pub skipped_duplicate: u64,
    pub errored: u64,
}

impl ImportCounters {
    pub fn inc_created(&mut self) {
        self.created += 1;
    }

    pub fn inc_skipped_validation(&mut self) {
        self.skipped_validation += 1;
    }

    pub fn inc_skipped_duplicate(&mut self) {
        self.skipped_duplicate += 1;
    }

    pub fn inc_errored(&mut self) {
        self.errored += 1;
    }

    pub fn skipped(&self) -> u64 {
        self.skipped_validation + self.skipped_duplicate
    }

    /// Rows that reached a final classification
    pub fn classified(&self) -> u64 {
        self.created + self.skipped() + self.errored
    }

    pub fn is_conserved(&self) -> bool {
        self.rows_seen == self.classified()
    }
}

/// One ingestion run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportJob {
    pub id: Uuid,
    pub source: SourceFile,
    pub stage: ImportStage,
    pub counters: ImportCounters,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
}

impl ImportJob {
    pub fn new(source: SourceFile) -> Self {
        Self {
            id: Uuid::new_v4(),
            source,
            stage: ImportStage::Initializing,
            counters: ImportCounters::default(),
            started_at: Utc::now(),
            finished_at: None,
            failure: None,
        }
    }

    pub fn transition(&mut self, next: ImportStage) -> Result<(), InvalidTransition> {
        if !self.stage.can_transition_to(next) {
            return Err(InvalidTransition {
                from: self.stage,
                to: next,
            });
        }
        self.stage = next;
        if next.is_terminal() {
            self.finished_at = Some(Utc::now());
        }
        Ok(())
    }

    /// Move to `Failed` and remember why. No-op once terminal.
    pub fn fail(&mut self, reason: impl Into<String>) {
        if self.transition(ImportStage::Failed).is_ok() {
            self.failure = Some(reason.into());
        }
    }

    pub fn elapsed_ms(&self) -> i64 {
        let end = self.finished_at.unwrap_or_else(Utc::now);
        (end - self.started_at).num_milliseconds().max(0)
    }
}

/// A validated row ready for the batch writer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedRow {
    /// 1-based data row number (the header is not counted)
    pub row_number: u64,
    pub record: CompanyRecord,
}

impl NormalizedRow {
    pub fn business_key(&self) -> &str {
        &self.record.company_number
    }
}

/// Why a single row was rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RowErrorReason {
    MissingRequiredField,
    MalformedRow,
    PersistenceFailed,
}

impl RowErrorReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RowErrorReason::MissingRequiredField => "missing_required_field",
            RowErrorReason::MalformedRow => "malformed_row",
            RowErrorReason::PersistenceFailed => "persistence_failed",
        }
    }
}

impl std::fmt::Display for RowErrorReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A row-level failure; recorded and skipped, never fatal to the job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RowError {
    pub row: u64,
    pub reason: RowErrorReason,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub business_key: Option<String>,
}

impl RowError {
    pub fn new(row: u64, reason: RowErrorReason, message: impl Into<String>) -> Self {
        Self {
            row,
            reason,
            message: message.into(),
            business_key: None,
        }
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.business_key = Some(key.into());
        self
    }
}

impl std::fmt::Display for RowError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "row {}: {} ({})", self.row, self.message, self.reason)
    }
}

/// Headline numbers of a finished job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalStats {
    pub processed: u64,
    pub created: u64,
    pub skipped: u64,
    pub total_errors: u64,
}

/// Summary of a commit-mode run, produced once the job is terminal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportReport {
    pub job_id: Uuid,
    pub stage: ImportStage,
    pub processed: u64,
    pub created: u64,
    pub skipped_validation: u64,
    pub skipped_duplicate: u64,
    pub errored: u64,
    /// Row errors recorded over the whole job
    pub total_errors: u64,
    pub elapsed_ms: i64,
    /// First row errors of the job, bounded
    pub errors: Vec<RowError>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
}

impl ImportReport {
    pub fn new(job: &ImportJob, total_errors: u64, errors: Vec<RowError>) -> Self {
        let c = job.counters;
        Self {
            job_id: job.id,
            stage: job.stage,
            processed: c.rows_seen,
            created: c.created,
            skipped_validation: c.skipped_validation,
            skipped_duplicate: c.skipped_duplicate,
            errored: c.errored,
            total_errors,
            elapsed_ms: job.elapsed_ms(),
            errors,
            failure: job.failure.clone(),
        }
    }

    pub fn success(&self) -> bool {
        self.stage == ImportStage::Completed
    }

    pub fn final_stats(&self) -> FinalStats {
        FinalStats {
            processed: self.processed,
            created: self.created,
            skipped: self.skipped_validation + self.skipped_duplicate,
            total_errors: self.total_errors,
        }
    }
}

/// Result of a validate-only run; nothing is persisted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationReport {
    pub is_valid: bool,
    pub total_rows: u64,
    pub valid_rows: u64,
    pub duplicates: u64,
    pub errors: Vec<RowError>,
    pub preview: Vec<CompanyRecord>,
}
