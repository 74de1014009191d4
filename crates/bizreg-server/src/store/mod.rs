//! Company persistence
//!
//! The pipeline only talks to storage through [`CompanyStore`]. The store is
//! the one resource shared between concurrent jobs and is the final authority
//! on business-key uniqueness; the in-memory duplicate detector merely avoids
//! sending rows it already knows are duplicates.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use futures::stream::BoxStream;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use crate::db::{DbConfig, DbResult};
use crate::ingest::config::StoreBackend;
use crate::ingest::types::{ImportJob, NormalizedRow};

pub use memory::MemoryCompanyStore;
pub use postgres::PgCompanyStore;

/// Maximum number of jobs returned by [`CompanyStore::list_jobs`].
pub const MAX_JOB_LIST: u32 = 100;

#[derive(Debug, Error)]
pub enum StoreError {
    /// The business key is already stored
    #[error("Company number '{key}' already exists")]
    UniqueViolation { key: String },

    #[error("Slug '{slug}' already exists")]
    SlugTaken { slug: String },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Stored job record is invalid: {0}")]
    Corrupt(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    pub fn is_unique_violation(&self) -> bool {
        matches!(self, StoreError::UniqueViolation { .. } | StoreError::SlugTaken { .. })
    }
}

/// Outcome of one row inside a batch
pub type RowOutcome = Result<(), StoreError>;

#[async_trait]
pub trait CompanyStore: Send + Sync {
    /// Short backend name for logs and health output
    fn backend(&self) -> &'static str;

    /// Stream every stored business key, once, for duplicate preloading
    fn existing_keys(&self) -> BoxStream<'_, Result<String, StoreError>>;

    /// Persist a batch in one call.
    ///
    /// The inner results line up with `rows`; a failing row never prevents the
    /// others from being written. The outer `Err` means nothing in the batch
    /// could be attempted.
    async fn insert_batch(&self, rows: &[NormalizedRow]) -> Result<Vec<RowOutcome>, StoreError>;

    /// Insert or update a job record
    async fn save_job(&self, job: &ImportJob) -> Result<(), StoreError>;

    async fn get_job(&self, id: Uuid) -> Result<Option<ImportJob>, StoreError>;

    /// Most recent jobs first
    async fn list_jobs(&self, limit: u32) -> Result<Vec<ImportJob>, StoreError>;

    async fn health_check(&self) -> Result<(), StoreError>;
}

/// Open the configured backend; PostgreSQL gets its pool and pending migrations.
pub async fn open(backend: StoreBackend, db: &DbConfig) -> DbResult<Arc<dyn CompanyStore>> {
    match backend {
        StoreBackend::Postgres => {
            let pool = crate::db::create_pool(db).await?;
            crate::db::run_migrations(&pool).await?;
            Ok(Arc::new(PgCompanyStore::new(pool)))
        },
        StoreBackend::Memory => {
            tracing::warn!("Using in-memory company store; imported data is lost on exit");
            Ok(Arc::new(MemoryCompanyStore::new()))
        },
    }
}
