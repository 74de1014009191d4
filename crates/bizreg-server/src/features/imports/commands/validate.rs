//! Validate-only import
//!
//! Parses and validates a spooled upload without writing anything.

use std::sync::Arc;

use crate::error::AppError;
use crate::features::imports::upload::SpooledUpload;
use crate::ingest::{prepare_file, ImportConfig, ImportPipeline, PipelineSettings, ValidationReport};
use crate::store::CompanyStore;

#[derive(Debug)]
pub struct ValidateImportCommand {
    pub upload: SpooledUpload,
}

#[tracing::instrument(skip_all, fields(file = %command.upload.file_name))]
pub async fn handle(
    store: Arc<dyn CompanyStore>,
    config: &ImportConfig,
    command: ValidateImportCommand,
) -> Result<ValidationReport, AppError> {
    let prepared = prepare_file(
        command.upload.path(),
        &command.upload.file_name,
        &config.columns,
        false,
    )
    .await?;

    let pipeline = ImportPipeline::new(store, PipelineSettings::from(config));
    let report = pipeline.validate(prepared.parser).await?;
    Ok(report)
}
