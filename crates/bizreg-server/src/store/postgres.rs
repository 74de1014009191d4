//! PostgreSQL company store
//!
//! Each batch runs in one transaction with a savepoint per row, so a row that
//! violates a constraint is rolled back alone and the rest of the batch is
//! still committed.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::{BoxStream, StreamExt};
use sqlx::{PgPool, Postgres, Transaction};
use tracing::{debug, error};
use uuid::Uuid;

use super::{CompanyStore, RowOutcome, StoreError, MAX_JOB_LIST};
use crate::ingest::types::{ImportCounters, ImportJob, ImportStage, NormalizedRow, SourceFile};

/// Unique constraint on `companies.slug`, see migrations
const SLUG_CONSTRAINT: &str = "companies_slug_key";

#[derive(Clone)]
pub struct PgCompanyStore {
    pool: PgPool,
}

impl PgCompanyStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn insert_row_tx(
        tx: &mut Transaction<'_, Postgres>,
        row: &NormalizedRow,
    ) -> Result<(), StoreError> {
        let record = &row.record;
        let metadata = record
            .metadata_json()
            .map_err(|e| StoreError::Corrupt(e.to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO companies (company_number, name, slug, metadata)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(&record.company_number)
        .bind(&record.name)
        .bind(&record.slug)
        .bind(metadata)
        .execute(&mut **tx)
        .await
        .map_err(|e| classify(e, row))?;

        Ok(())
    }
}

/// Map unique violations to the specific store error
fn classify(err: sqlx::Error, row: &NormalizedRow) -> StoreError {
    if let sqlx::Error::Database(db) = &err {
        if db.is_unique_violation() {
            return match db.constraint() {
                Some(SLUG_CONSTRAINT) => StoreError::SlugTaken {
                    slug: row.record.slug.clone(),
                },
                _ => StoreError::UniqueViolation {
                    key: row.record.company_number.clone(),
                },
            };
        }
    }
    StoreError::Database(err)
}

#[async_trait]
impl CompanyStore for PgCompanyStore {
    fn backend(&self) -> &'static str {
        "postgres"
    }

    fn existing_keys(&self) -> BoxStream<'_, Result<String, StoreError>> {
        sqlx::query_scalar::<_, String>("SELECT company_number FROM companies")
            .fetch(&self.pool)
            .map(|key| key.map_err(StoreError::from))
            .boxed()
    }

    async fn insert_batch(&self, rows: &[NormalizedRow]) -> Result<Vec<RowOutcome>, StoreError> {
        let mut tx = self.pool.begin().await?;
        let mut outcomes = Vec::with_capacity(rows.len());

        for row in rows {
            sqlx::query("SAVEPOINT company_row").execute(&mut *tx).await?;

            match Self::insert_row_tx(&mut tx, row).await {
                Ok(()) => {
                    sqlx::query("RELEASE SAVEPOINT company_row")
                        .execute(&mut *tx)
                        .await?;
                    outcomes.push(Ok(()));
                },
                Err(e) => {
                    if let Err(rollback_err) = sqlx::query("ROLLBACK TO SAVEPOINT company_row")
                        .execute(&mut *tx)
                        .await
                    {
                        error!(
                            row = row.row_number,
                            rollback_error = %rollback_err,
                            "Failed to roll back row savepoint, aborting batch"
                        );
                        return Err(rollback_err.into());
                    }
                    debug!(
                        row = row.row_number,
                        company_number = %row.business_key(),
                        error = %e,
                        "Row insert failed (isolated with savepoint)"
                    );
                    outcomes.push(Err(e));
                },
            }
        }

        tx.commit().await?;
        Ok(outcomes)
    }

    async fn save_job(&self, job: &ImportJob) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO import_jobs (
                id, file_name, file_size, stage, rows_seen, created,
                skipped_validation, skipped_duplicate, errored, failure,
                started_at, finished_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            ON CONFLICT (id) DO UPDATE SET
                stage = EXCLUDED.stage,
                rows_seen = EXCLUDED.rows_seen,
                created = EXCLUDED.created,
                skipped_validation = EXCLUDED.skipped_validation,
                skipped_duplicate = EXCLUDED.skipped_duplicate,
                errored = EXCLUDED.errored,
                failure = EXCLUDED.failure,
                finished_at = EXCLUDED.finished_at
            "#,
        )
        .bind(job.id)
        .bind(&job.source.name)
        .bind(job.source.size_bytes as i64)
        .bind(job.stage.as_str())
        .bind(job.counters.rows_seen as i64)
        .bind(job.counters.created as i64)
        .bind(job.counters.skipped_validation as i64)
        .bind(job.counters.skipped_duplicate as i64)
        .bind(job.counters.errored as i64)
        .bind(job.failure.as_deref())
        .bind(job.started_at)
        .bind(job.finished_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_job(&self, id: Uuid) -> Result<Option<ImportJob>, StoreError> {
        let row = sqlx::query_as::<_, JobRow>(&format!("{} WHERE id = $1", SELECT_JOB))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(ImportJob::try_from).transpose()
    }

    async fn list_jobs(&self, limit: u32) -> Result<Vec<ImportJob>, StoreError> {
        let rows = sqlx::query_as::<_, JobRow>(&format!(
            "{} ORDER BY started_at DESC LIMIT $1",
            SELECT_JOB
        ))
        .bind(i64::from(limit.min(MAX_JOB_LIST)))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(ImportJob::try_from).collect()
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

const SELECT_JOB: &str = r#"
    SELECT id, file_name, file_size, stage, rows_seen, created,
           skipped_validation, skipped_duplicate, errored, failure,
           started_at, finished_at
    FROM import_jobs
"#;

#[derive(Debug, sqlx::FromRow)]
struct JobRow {
    id: Uuid,
    file_name: String,
    file_size: i64,
    stage: String,
    rows_seen: i64,
    created: i64,
    skipped_validation: i64,
    skipped_duplicate: i64,
    errored: i64,
    failure: Option<String>,
    started_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
}

impl TryFrom<JobRow> for ImportJob {
    type Error = StoreError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        let count = |name: &str, value: i64| {
            u64::try_from(value)
                .map_err(|_| StoreError::Corrupt(format!("negative {} for job {}", name, row.id)))
        };

        Ok(ImportJob {
            id: row.id,
            source: SourceFile {
                name: row.file_name.clone(),
                size_bytes: count("file_size", row.file_size)?,
            },
            stage: row
                .stage
                .parse::<ImportStage>()
                .map_err(|e| StoreError::Corrupt(format!("{} for job {}", e, row.id)))?,
            counters: ImportCounters {
                rows_seen: count("rows_seen", row.rows_seen)?,
                created: count("created", row.created)?,
                skipped_validation: count("skipped_validation", row.skipped_validation)?,
                skipped_duplicate: count("skipped_duplicate", row.skipped_duplicate)?,
                errored: count("errored", row.errored)?,
            },
            started_at: row.started_at,
            finished_at: row.finished_at,
            failure: row.failure,
        })
    }
}
