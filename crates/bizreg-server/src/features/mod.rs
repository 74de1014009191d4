//! Feature modules implementing the bizreg API
//!
//! Each feature is a vertical slice with its own `commands/`, `queries/` and
//! `routes.rs`.
//!
//! - **imports**: CSV company imports and import job status

pub mod imports;

use axum::{extract::DefaultBodyLimit, Router};
use std::sync::Arc;

use crate::ingest::ImportConfig;
use crate::store::CompanyStore;

/// Multipart framing allowance on top of the file size limit
const MULTIPART_OVERHEAD_BYTES: u64 = 64 * 1024;

/// Shared state for all feature routes
#[derive(Clone)]
pub struct FeatureState {
    pub store: Arc<dyn CompanyStore>,
    pub import: Arc<ImportConfig>,
    pub tasks: imports::ImportTasks,
}

/// Creates the API router with all feature routes mounted
///
/// - `/imports` - company imports and job status
pub fn router(state: FeatureState) -> Router<()> {
    let body_limit = state
        .import
        .max_upload_bytes
        .saturating_add(MULTIPART_OVERHEAD_BYTES)
        .try_into()
        .unwrap_or(usize::MAX);

    let imports_state = imports::ImportsState {
        store: state.store.clone(),
        config: state.import.clone(),
        tasks: state.tasks.clone(),
    };

    Router::new().nest(
        "/imports",
        imports::imports_routes()
            .layer(DefaultBodyLimit::max(body_limit))
            .with_state(imports_state),
    )
}
