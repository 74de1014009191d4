//! bizreg server library
//!
//! HTTP server and CLI importer for bulk company-registry CSV imports.
//!
//! # Overview
//!
//! - **Ingestion pipeline** (`ingest`): streams a CSV row by row, validates and
//!   normalizes each row, skips company numbers already known, writes in
//!   batches and reports bounded progress
//! - **Persistence** (`store`): `CompanyStore` trait with PostgreSQL and
//!   in-memory backends
//! - **HTTP API** (`api`, `features`): upload endpoint with validate-only and
//!   commit (SSE) modes, import job queries, health
//! - **Configuration** (`config`): environment-based, `.env` aware
//!
//! # Architecture
//!
//! Features are vertical slices of commands (writes) and queries (reads), each
//! with its own routes. The pipeline never talks to the database directly; it
//! goes through the store trait, which also holds the unique constraint on
//! company numbers.
//!
//! # Example
//!
//! ```no_run
//! use bizreg_server::{api, config::Config, db::DbConfig, features::imports::ImportTasks, store};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load()?;
//!     let store = store::open(config.import.store, &DbConfig::from(&config.database)).await?;
//!     let app = api::create_router(store, &config, ImportTasks::new());
//!     let listener = tokio::net::TcpListener::bind("127.0.0.1:8000").await?;
//!     axum::serve(listener, app).await?;
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod features;
pub mod ingest;
pub mod middleware;
pub mod store;

// Re-export commonly used types
pub use error::{ApiResult, AppError};
