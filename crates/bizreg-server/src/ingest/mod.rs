//! Bulk company import
//!
//! Streams registry CSV extracts into the company store:
//!
//! - `parser`: pull-based CSV reader, one row at a time
//! - `normalize`: required fields, trimming, slugs
//! - `dedup`: job-scoped set of known company numbers
//! - `writer`: batched persistence with per-row isolation
//! - `progress`: bounded progress events and sinks
//! - `pipeline`: the job state machine tying them together

pub mod config;
pub mod dedup;
pub mod error;
pub mod normalize;
pub mod parser;
pub mod pipeline;
pub mod progress;
pub mod types;
pub mod writer;

pub use config::ImportConfig;
pub use error::{FileError, ImportError, StreamError};
pub use pipeline::{prepare_file, ImportPipeline, PipelineSettings, PreparedFile};
pub use progress::{ChannelSink, ImportEvent, LogSink, NullSink, ProgressSink};
pub use types::{ImportJob, ImportReport, ImportStage, RowError, RowErrorReason, ValidationReport};
