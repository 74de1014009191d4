//! Bizreg Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared types, logging setup and error handling for the Bizreg workspace.
//!
//! # Overview
//!
//! - **Error Handling**: `BizregError` and the `Result` alias
//! - **Logging**: centralized `tracing` subscriber configuration
//! - **Types**: the persisted company record shape shared by the server and CLI
//!
//! # Example
//!
//! ```no_run
//! use bizreg_common::logging::{init_logging, LogConfig};
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = LogConfig::from_env()?;
//!     init_logging(&config)?;
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod logging;
pub mod types;

// Re-export commonly used types
pub use error::{BizregError, Result};
pub use types::CompanyRecord;
