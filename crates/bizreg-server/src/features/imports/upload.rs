//! Multipart upload spooling
//!
//! The `file` field is copied chunk by chunk into a temporary file under the
//! configured upload directory; the request body is never held in memory.
//! The temporary file is removed when the [`SpooledUpload`] is dropped.

use axum::extract::multipart::{Field, MultipartError};
use axum::extract::Multipart;
use axum::http::StatusCode;
use std::path::Path;
use tempfile::NamedTempFile;
use tokio::io::AsyncWriteExt;

use crate::ingest::config::ImportConfig;
use crate::ingest::error::FileError;

/// Multipart field carrying the CSV
pub const FILE_FIELD: &str = "file";

const CSV_CONTENT_TYPES: &[&str] = &["text/csv", "application/csv", "application/vnd.ms-excel"];

/// An upload on local disk
#[derive(Debug)]
pub struct SpooledUpload {
    file: NamedTempFile,
    pub file_name: String,
    pub size_bytes: u64,
}

impl SpooledUpload {
    pub fn path(&self) -> &Path {
        self.file.path()
    }
}

/// Accept `text/csv`, `application/csv`, Excel's CSV type, or a `.csv` name
pub fn is_csv(content_type: Option<&str>, file_name: Option<&str>) -> bool {
    let by_type = content_type
        .map(|ct| ct.split(';').next().unwrap_or("").trim().to_ascii_lowercase())
        .is_some_and(|ct| CSV_CONTENT_TYPES.contains(&ct.as_str()));
    let by_name = file_name.is_some_and(|name| name.to_ascii_lowercase().ends_with(".csv"));
    by_type || by_name
}

/// Spool the first `file` field of a multipart body to disk
#[tracing::instrument(skip_all)]
pub async fn spool_upload(
    multipart: &mut Multipart,
    config: &ImportConfig,
) -> Result<SpooledUpload, FileError> {
    while let Some(field) = multipart.next_field().await.map_err(multipart_error(config))? {
        if field.name() != Some(FILE_FIELD) {
            continue;
        }

        let content_type = field.content_type().map(str::to_string);
        let file_name = field.file_name().map(str::to_string);
        if !is_csv(content_type.as_deref(), file_name.as_deref()) {
            return Err(FileError::UnsupportedContentType(
                content_type.unwrap_or_else(|| "unknown".to_string()),
            ));
        }

        let upload = write_field(field, file_name, config).await?;
        tracing::info!(
            file = %upload.file_name,
            size_bytes = upload.size_bytes,
            "Upload spooled"
        );
        return Ok(upload);
    }

    Err(FileError::MissingFile)
}

async fn write_field(
    mut field: Field<'_>,
    file_name: Option<String>,
    config: &ImportConfig,
) -> Result<SpooledUpload, FileError> {
    tokio::fs::create_dir_all(&config.upload_dir).await?;
    let spool = tempfile::Builder::new()
        .prefix("bizreg-upload-")
        .suffix(".csv")
        .tempfile_in(&config.upload_dir)?;
    let mut out = tokio::fs::File::from_std(spool.as_file().try_clone()?);

    let mut size_bytes = 0u64;
    while let Some(chunk) = field.chunk().await.map_err(multipart_error(config))? {
        size_bytes += chunk.len() as u64;
        if size_bytes > config.max_upload_bytes {
            return Err(FileError::TooLarge {
                max_bytes: config.max_upload_bytes,
            });
        }
        out.write_all(&chunk).await?;
    }
    out.flush().await?;

    if size_bytes == 0 {
        return Err(FileError::Empty);
    }

    Ok(SpooledUpload {
        file: spool,
        file_name: file_name.unwrap_or_else(|| "upload.csv".to_string()),
        size_bytes,
    })
}

fn multipart_error(config: &ImportConfig) -> impl Fn(MultipartError) -> FileError + '_ {
    move |e| {
        if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
            FileError::TooLarge {
                max_bytes: config.max_upload_bytes,
            }
        } else {
            FileError::Unreadable(e.body_text())
        }
    }
}
