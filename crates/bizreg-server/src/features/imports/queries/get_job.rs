//! Get import job query

use std::sync::Arc;
use uuid::Uuid;

use crate::ingest::ImportJob;
use crate::store::{CompanyStore, StoreError};

#[derive(Debug, Clone)]
pub struct GetJobQuery {
    pub job_id: Uuid,
}

#[derive(Debug, thiserror::Error)]
pub enum GetJobError {
    #[error("Import job not found")]
    NotFound,
    #[error(transparent)]
    Store(#[from] StoreError),
}

pub async fn handle(store: Arc<dyn CompanyStore>, query: GetJobQuery) -> Result<ImportJob, GetJobError> {
    store
        .get_job(query.job_id)
        .await?
        .ok_or(GetJobError::NotFound)
}
