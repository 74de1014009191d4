//! List import jobs query

use serde::Deserialize;
use std::sync::Arc;

use crate::ingest::ImportJob;
use crate::store::{CompanyStore, StoreError, MAX_JOB_LIST};

const DEFAULT_LIMIT: u32 = 20;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListJobsQuery {
    pub limit: Option<u32>,
}

impl ListJobsQuery {
    /// Requested limit clamped to `1..=100`
    pub fn limit(&self) -> u32 {
        self.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_JOB_LIST)
    }
}

pub async fn handle(
    store: Arc<dyn CompanyStore>,
    query: ListJobsQuery,
) -> Result<Vec<ImportJob>, StoreError> {
    store.list_jobs(query.limit()).await
}
