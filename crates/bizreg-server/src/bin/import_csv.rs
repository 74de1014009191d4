//! Import a registry CSV from local disk
//!
//! Runs the same pipeline as the upload endpoint and prints the final
//! report as JSON.
//!
//! Usage:
//!   import_csv BasicCompanyData.csv
//!   import_csv BasicCompanyData.csv --validate-only
//!   import_csv BasicCompanyData.csv --batch-size 1000 --no-precount

use anyhow::{Context, Result};
use bizreg_common::logging::{init_logging, LogConfig, LogLevel, LogOutput};
use clap::Parser;
use std::path::PathBuf;
use std::process;
use tracing::{error, info};

use bizreg_server::{
    db::DbConfig,
    ingest::config::StoreBackend,
    ingest::{prepare_file, ImportConfig, ImportJob, ImportPipeline, LogSink, PipelineSettings},
    store,
};

#[derive(Debug, Parser)]
#[command(name = "import_csv", version, about = "Import a company registry CSV")]
struct Args {
    /// CSV file with a header row
    path: PathBuf,

    /// Parse and validate only; nothing is written
    #[arg(long)]
    validate_only: bool,

    /// Rows persisted per batch
    #[arg(long, env = "IMPORT_BATCH_SIZE")]
    batch_size: Option<usize>,

    /// Skip the row-counting pass; progress is then estimated from bytes read
    #[arg(long)]
    no_precount: bool,

    /// Log at debug level
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let log_config = LogConfig::builder()
        .level(if args.verbose { LogLevel::Debug } else { LogLevel::Info })
        .output(LogOutput::Console)
        .log_file_prefix("import-csv")
        .build();
    let log_config = log_config.clone().merge_env().unwrap_or(log_config);
    let _log_guard = init_logging(&log_config);

    match run(args).await {
        Ok(success) => {
            if !success {
                process::exit(1);
            }
        },
        Err(e) => {
            error!(error = %e, "Import failed");
            eprintln!("Error: {:#}", e);
            process::exit(2);
        },
    }
}

/// Returns whether the file imported (or validated) cleanly
async fn run(args: Args) -> Result<bool> {
    dotenvy::dotenv().ok();

    let mut config = ImportConfig::from_env()?;
    if let Some(batch_size) = args.batch_size {
        config.batch_size = batch_size;
    }
    if args.no_precount {
        config.precount_rows = false;
    }
    config.validate()?;

    let display_name = args
        .path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| args.path.display().to_string());

    let prepared = prepare_file(
        &args.path,
        &display_name,
        &config.columns,
        config.precount_rows && !args.validate_only,
    )
    .await
    .with_context(|| format!("Cannot import {}", args.path.display()))?;

    let db_config = match config.store {
        StoreBackend::Postgres => DbConfig::from_env()?,
        StoreBackend::Memory => DbConfig::default(),
    };
    let store = store::open(config.store, &db_config).await?;
    let pipeline = ImportPipeline::new(store, PipelineSettings::from(&config));

    if args.validate_only {
        let report = pipeline.validate(prepared.parser).await?;
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(report.is_valid);
    }

    let job = ImportJob::new(prepared.source);
    info!(job_id = %job.id, file = %display_name, "Import starting");
    let report = pipeline
        .run(job, prepared.parser, prepared.total_rows, &LogSink)
        .await;

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(report.success())
}
