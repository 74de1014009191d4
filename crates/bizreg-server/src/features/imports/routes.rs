//! Import routes
//!
//! - `POST /companies?mode=validate|commit`: multipart upload, field `file`
//! - `GET /jobs`: recent import jobs
//! - `GET /jobs/:job_id`: one import job

use axum::{
    extract::{Multipart, Path, Query, State},
    http::{HeaderName, HeaderValue},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Router,
};
use futures::stream::{self, Stream, StreamExt};
use serde::Deserialize;
use serde_json::json;
use std::convert::Infallible;
use std::time::Duration;
use tokio_stream::wrappers::ReceiverStream;
use uuid::Uuid;

use super::commands::{self, CommitImportCommand, ValidateImportCommand};
use super::queries::{self, get_job::GetJobError, GetJobQuery, ListJobsQuery};
use super::upload::spool_upload;
use super::ImportsState;
use crate::api::response::ApiResponse;
use crate::error::{ApiResult, AppError};
use crate::ingest::ImportEvent;

/// Response header carrying the id of a started job
pub const JOB_ID_HEADER: &str = "x-import-job-id";

/// Data of the event sent after the final report
pub const STREAM_DONE: &str = "[DONE]";

const KEEP_ALIVE_SECS: u64 = 15;

pub fn imports_routes() -> Router<ImportsState> {
    Router::new()
        .route("/companies", post(import_companies))
        .route("/jobs", get(list_jobs))
        .route("/jobs/:job_id", get(get_job))
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImportMode {
    Validate,
    #[default]
    Commit,
}

#[derive(Debug, Default, Deserialize)]
pub struct ImportParams {
    #[serde(default)]
    pub mode: ImportMode,
}

#[tracing::instrument(skip(state, multipart), fields(mode = ?params.mode))]
async fn import_companies(
    State(state): State<ImportsState>,
    Query(params): Query<ImportParams>,
    mut multipart: Multipart,
) -> ApiResult<Response> {
    let upload = spool_upload(&mut multipart, &state.config).await?;

    match params.mode {
        ImportMode::Validate => {
            let command = ValidateImportCommand { upload };
            let report =
                commands::validate::handle(state.store.clone(), &state.config, command).await?;
            Ok(ApiResponse::success(report).into_response())
        },
        ImportMode::Commit => {
            let command = CommitImportCommand { upload };
            let started = commands::commit::handle(
                state.store.clone(),
                &state.config,
                &state.tasks,
                command,
            )
            .await?;
            tracing::info!(job_id = %started.job_id, "Import job accepted");

            let mut response = Sse::new(event_stream(started.events))
                .keep_alive(KeepAlive::new().interval(Duration::from_secs(KEEP_ALIVE_SECS)))
                .into_response();
            if let Ok(value) = HeaderValue::from_str(&started.job_id.to_string()) {
                response
                    .headers_mut()
                    .insert(HeaderName::from_static(JOB_ID_HEADER), value);
            }
            Ok(response)
        },
    }
}

/// One SSE frame per event, then `done` once the channel closes
fn event_stream(
    events: tokio::sync::mpsc::Receiver<ImportEvent>,
) -> impl Stream<Item = Result<Event, Infallible>> {
    ReceiverStream::new(events)
        .filter_map(|event| async move {
            let name = if event.is_final() { "complete" } else { "progress" };
            match serde_json::to_string(&event) {
                Ok(data) => Some(Ok(Event::default().event(name).data(data))),
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to serialize import event");
                    None
                },
            }
        })
        .chain(stream::once(async {
            Ok(Event::default().event("done").data(STREAM_DONE))
        }))
}

/// GET /jobs?limit=20
async fn list_jobs(
    State(state): State<ImportsState>,
    Query(query): Query<ListJobsQuery>,
) -> ApiResult<Response> {
    let limit = query.limit();
    let jobs = queries::list_jobs::handle(state.store.clone(), query).await?;
    Ok(ApiResponse::success_with_meta(jobs, json!({ "limit": limit })).into_response())
}

/// GET /jobs/:job_id
async fn get_job(
    State(state): State<ImportsState>,
    Path(job_id): Path<Uuid>,
) -> ApiResult<Response> {
    match queries::get_job::handle(state.store.clone(), GetJobQuery { job_id }).await {
        Ok(job) => Ok(ApiResponse::success(job).into_response()),
        Err(GetJobError::NotFound) => {
            Err(AppError::NotFound(format!("Import job '{}' not found", job_id)))
        },
        Err(GetJobError::Store(e)) => Err(e.into()),
    }
}
