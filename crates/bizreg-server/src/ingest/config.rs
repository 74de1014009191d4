//! Import configuration
//!
//! Settings for the CSV import pipeline, read from `IMPORT_*` environment variables.

use bizreg_common::{BizregError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Default number of validated rows persisted per batch.
pub const DEFAULT_BATCH_SIZE: usize = 500;

/// Default upload limit (500 MiB).
pub const DEFAULT_MAX_UPLOAD_BYTES: u64 = 500 * 1024 * 1024;

/// Default number of recent row errors attached to each progress event.
pub const DEFAULT_RECENT_ERRORS: usize = 5;

/// Default number of row errors kept in final and validation reports.
pub const DEFAULT_REPORT_ERRORS: usize = 10;

/// Default number of preview rows in a validation report.
pub const DEFAULT_PREVIEW_ROWS: usize = 5;

/// Registry extract column holding the company number.
pub const DEFAULT_KEY_COLUMN: &str = "CompanyNumber";

/// Registry extract column holding the company name.
pub const DEFAULT_NAME_COLUMN: &str = "CompanyName";

/// Which persistence backend the server uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Postgres,
    /// Process-local store, for development without a database
    Memory,
}

impl std::str::FromStr for StoreBackend {
    type Err = BizregError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(StoreBackend::Postgres),
            "memory" => Ok(StoreBackend::Memory),
            other => Err(BizregError::config(format!(
                "Invalid IMPORT_STORE: {}. Must be 'postgres' or 'memory'",
                other
            ))),
        }
    }
}

/// Import pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportConfig {
    pub batch_size: usize,
    pub max_upload_bytes: u64,
    /// Where uploads are spooled while a job runs
    pub upload_dir: PathBuf,
    pub recent_errors: usize,
    pub report_errors: usize,
    pub preview_rows: usize,
    /// Count rows in a first pass so progress has a known total
    pub precount_rows: bool,
    pub columns: ColumnNames,
    pub store: StoreBackend,
}

/// Header names of the two mandatory columns
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnNames {
    pub business_key: String,
    pub display_name: String,
}

impl Default for ColumnNames {
    fn default() -> Self {
        Self {
            business_key: DEFAULT_KEY_COLUMN.to_string(),
            display_name: DEFAULT_NAME_COLUMN.to_string(),
        }
    }
}

impl ImportConfig {
    /// Load import configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let config = Self {
            batch_size: env_or("IMPORT_BATCH_SIZE", defaults.batch_size),
            max_upload_bytes: env_or("IMPORT_MAX_UPLOAD_BYTES", defaults.max_upload_bytes),
            upload_dir: std::env::var("IMPORT_UPLOAD_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.upload_dir),
            recent_errors: env_or("IMPORT_RECENT_ERRORS", defaults.recent_errors),
            report_errors: env_or("IMPORT_REPORT_ERRORS", defaults.report_errors),
            preview_rows: env_or("IMPORT_PREVIEW_ROWS", defaults.preview_rows),
            precount_rows: env_or("IMPORT_PRECOUNT_ROWS", defaults.precount_rows),
            columns: ColumnNames {
                business_key: std::env::var("IMPORT_KEY_COLUMN")
                    .unwrap_or(defaults.columns.business_key),
                display_name: std::env::var("IMPORT_NAME_COLUMN")
                    .unwrap_or(defaults.columns.display_name),
            },
            store: match std::env::var("IMPORT_STORE") {
                Ok(value) => value.parse()?,
                Err(_) => defaults.store,
            },
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(BizregError::config("IMPORT_BATCH_SIZE must be greater than 0"));
        }
        if self.max_upload_bytes == 0 {
            return Err(BizregError::config("IMPORT_MAX_UPLOAD_BYTES must be greater than 0"));
        }
        if self.recent_errors == 0 || self.report_errors == 0 {
            return Err(BizregError::config(
                "IMPORT_RECENT_ERRORS and IMPORT_REPORT_ERRORS must be greater than 0",
            ));
        }
        if self.columns.business_key.trim().is_empty() || self.columns.display_name.trim().is_empty()
        {
            return Err(BizregError::config(
                "IMPORT_KEY_COLUMN and IMPORT_NAME_COLUMN cannot be empty",
            ));
        }
        Ok(())
    }
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            upload_dir: std::env::temp_dir(),
            recent_errors: DEFAULT_RECENT_ERRORS,
            report_errors: DEFAULT_REPORT_ERRORS,
            preview_rows: DEFAULT_PREVIEW_ROWS,
            precount_rows: true,
            columns: ColumnNames::default(),
            store: StoreBackend::default(),
        }
    }
}

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}
