//! Commit-mode import
//!
//! Checks the header synchronously, then runs the job on a tracked task and
//! hands back the receiving end of its progress channel. The job is not tied
//! to the receiver: if the client goes away the import still runs to the end.
//! Only server shutdown cuts it short.

use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::features::imports::tasks::ImportTasks;
use crate::features::imports::upload::SpooledUpload;
use crate::ingest::{
    prepare_file, ChannelSink, FileError, ImportConfig, ImportEvent, ImportJob, ImportPipeline,
    PipelineSettings, PreparedFile,
};
use crate::store::CompanyStore;

/// Events buffered between the job and a slow client
pub const PROGRESS_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug)]
pub struct CommitImportCommand {
    pub upload: SpooledUpload,
}

pub struct StartedImport {
    pub job_id: Uuid,
    pub events: mpsc::Receiver<ImportEvent>,
}

#[tracing::instrument(skip_all, fields(file = %command.upload.file_name))]
pub async fn handle(
    store: Arc<dyn CompanyStore>,
    config: &ImportConfig,
    tasks: &ImportTasks,
    command: CommitImportCommand,
) -> Result<StartedImport, FileError> {
    let upload = command.upload;
    let PreparedFile {
        source,
        parser,
        total_rows,
    } = prepare_file(
        upload.path(),
        &upload.file_name,
        &config.columns,
        config.precount_rows,
    )
    .await?;

    let job = ImportJob::new(source);
    let job_id = job.id;
    let pipeline = ImportPipeline::new(store, PipelineSettings::from(config))
        .with_cancellation(tasks.cancellation());
    let (tx, events) = mpsc::channel(PROGRESS_CHANNEL_CAPACITY);

    tasks.spawn(async move {
        let sink = ChannelSink::new(tx);
        pipeline
            .run(job, parser, total_rows, &sink)
            .await;
        // spooled file lives until the job is done
        drop(upload);
    });

    Ok(StartedImport { job_id, events })
}
