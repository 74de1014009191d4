//! Process-local company store
//!
//! Enforces the same uniqueness rules as the database schema. Used when
//! `IMPORT_STORE=memory` and throughout the test suite.

use async_trait::async_trait;
use bizreg_common::CompanyRecord;
use futures::stream::{self, BoxStream, StreamExt};
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use super::{CompanyStore, RowOutcome, StoreError, MAX_JOB_LIST};
use crate::ingest::types::{ImportJob, NormalizedRow};

#[derive(Default)]
struct MemoryState {
    /// Insertion order
    companies: Vec<CompanyRecord>,
    keys: HashSet<String>,
    slugs: HashSet<String>,
    jobs: HashMap<Uuid, ImportJob>,
    unavailable: Option<String>,
}

#[derive(Default)]
pub struct MemoryCompanyStore {
    state: Mutex<MemoryState>,
}

impl MemoryCompanyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store seeded with existing companies
    pub fn with_companies(records: impl IntoIterator<Item = CompanyRecord>) -> Self {
        let store = Self::new();
        {
            let mut state = store.state();
            for record in records {
                state.keys.insert(record.company_number.clone());
                state.slugs.insert(record.slug.clone());
                state.companies.push(record);
            }
        }
        store
    }

    /// Snapshot of every stored company, in insertion order
    pub fn companies(&self) -> Vec<CompanyRecord> {
        self.state().companies.clone()
    }

    pub fn company_count(&self) -> usize {
        self.state().companies.len()
    }

    /// Make every subsequent call fail with `Unavailable(reason)`; `None` restores service.
    pub fn set_unavailable(&self, reason: Option<&str>) {
        self.state().unavailable = reason.map(str::to_string);
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn check_available(state: &MemoryState) -> Result<(), StoreError> {
        match &state.unavailable {
            Some(reason) => Err(StoreError::Unavailable(reason.clone())),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl CompanyStore for MemoryCompanyStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    fn existing_keys(&self) -> BoxStream<'_, Result<String, StoreError>> {
        let state = self.state();
        if let Err(e) = Self::check_available(&state) {
            return stream::once(async move { Err(e) }).boxed();
        }
        let keys: Vec<String> = state.companies.iter().map(|c| c.company_number.clone()).collect();
        stream::iter(keys.into_iter().map(Ok)).boxed()
    }

    async fn insert_batch(&self, rows: &[NormalizedRow]) -> Result<Vec<RowOutcome>, StoreError> {
        let mut state = self.state();
        Self::check_available(&state)?;

        let outcomes = rows
            .iter()
            .map(|row| {
                let record = &row.record;
                if state.keys.contains(&record.company_number) {
                    return Err(StoreError::UniqueViolation {
                        key: record.company_number.clone(),
                    });
                }
                if state.slugs.contains(&record.slug) {
                    return Err(StoreError::SlugTaken {
                        slug: record.slug.clone(),
                    });
                }
                state.keys.insert(record.company_number.clone());
                state.slugs.insert(record.slug.clone());
                state.companies.push(record.clone());
                Ok(())
            })
            .collect();

        Ok(outcomes)
    }

    async fn save_job(&self, job: &ImportJob) -> Result<(), StoreError> {
        let mut state = self.state();
        Self::check_available(&state)?;
        state.jobs.insert(job.id, job.clone());
        Ok(())
    }

    async fn get_job(&self, id: Uuid) -> Result<Option<ImportJob>, StoreError> {
        let state = self.state();
        Self::check_available(&state)?;
        Ok(state.jobs.get(&id).cloned())
    }

    async fn list_jobs(&self, limit: u32) -> Result<Vec<ImportJob>, StoreError> {
        let state = self.state();
        Self::check_available(&state)?;
        let mut jobs: Vec<ImportJob> = state.jobs.values().cloned().collect();
        jobs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        jobs.truncate(limit.min(MAX_JOB_LIST) as usize);
        Ok(jobs)
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        Self::check_available(&self.state())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::types::SourceFile;
    use futures::TryStreamExt;
    use std::collections::BTreeMap;

    fn row(n: u64, key: &str, slug: &str) -> NormalizedRow {
        NormalizedRow {
            row_number: n,
            record: CompanyRecord {
                company_number: key.to_string(),
                name: format!("Company {}", key),
                slug: slug.to_string(),
                metadata: BTreeMap::new(),
            },
        }
    }

    #[tokio::test]
    async fn test_insert_batch_isolates_failing_rows() {
        let store = MemoryCompanyStore::new();
        let outcomes = store
            .insert_batch(&[row(1, "A1", "a"), row(2, "A1", "b"), row(3, "B2", "a"), row(4, "C3", "c")])
            .await
            .unwrap();

        assert!(outcomes[0].is_ok());
        assert!(matches!(outcomes[1], Err(StoreError::UniqueViolation { ref key }) if key == "A1"));
        assert!(matches!(outcomes[2], Err(StoreError::SlugTaken { .. })));
        assert!(outcomes[3].is_ok());
        assert_eq!(store.company_count(), 2);
    }

    #[tokio::test]
    async fn test_existing_keys_streams_every_key() {
        let store = MemoryCompanyStore::new();
        store.insert_batch(&[row(1, "A1", "a"), row(2, "B2", "b")]).await.unwrap();

        let keys: Vec<String> = store.existing_keys().try_collect().await.unwrap();
        assert_eq!(keys, vec!["A1".to_string(), "B2".to_string()]);
    }

    #[tokio::test]
    async fn test_unavailable_store_fails_whole_batch() {
        let store = MemoryCompanyStore::new();
        store.set_unavailable(Some("connection reset"));
        assert!(matches!(
            store.insert_batch(&[row(1, "A1", "a")]).await,
            Err(StoreError::Unavailable(_))
        ));
        assert!(store.health_check().await.is_err());

        store.set_unavailable(None);
        assert!(store.health_check().await.is_ok());
    }

    #[tokio::test]
    async fn test_jobs_listed_most_recent_first() {
        let store = MemoryCompanyStore::new();
        let source = SourceFile {
            name: "a.csv".to_string(),
            size_bytes: 10,
        };
        let mut older = ImportJob::new(source.clone());
        older.started_at -= chrono::Duration::seconds(60);
        let newer = ImportJob::new(source);
        store.save_job(&older).await.unwrap();
        store.save_job(&newer).await.unwrap();

        let jobs = store.list_jobs(10).await.unwrap();
        assert_eq!(jobs[0].id, newer.id);
        assert_eq!(jobs[1].id, older.id);
        assert_eq!(store.list_jobs(1).await.unwrap().len(), 1);
        assert_eq!(store.get_job(older.id).await.unwrap(), Some(older));
    }
}
