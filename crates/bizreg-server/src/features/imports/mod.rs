//! Company imports feature
//!
//! Upload a registry CSV either to validate it or to import it with live
//! progress, and inspect past import jobs.

pub mod commands;
pub mod queries;
pub mod routes;
pub mod tasks;
pub mod upload;

use std::sync::Arc;

use crate::ingest::ImportConfig;
use crate::store::CompanyStore;

pub use routes::imports_routes;
pub use tasks::ImportTasks;

#[derive(Clone)]
pub struct ImportsState {
    pub store: Arc<dyn CompanyStore>,
    pub config: Arc<ImportConfig>,
    pub tasks: ImportTasks,
}
