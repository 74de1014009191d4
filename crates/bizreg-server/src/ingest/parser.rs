//! Streaming CSV row parser
//!
//! Pulls one record at a time from any `AsyncRead`, so memory stays bounded by
//! the reader buffer plus the current row no matter how large the file is.
//! Quoted fields may contain delimiters and embedded newlines.
//!
//! [`RowParser::next_row`] distinguishes three outcomes:
//! - `Ok(Some(Ok(row)))`: a structurally sound row
//! - `Ok(Some(Err(parse_error)))`: a malformed row; parsing continues
//! - `Err(stream_error)`: the stream itself broke; the sequence is over

use csv_async::{AsyncReader, AsyncReaderBuilder, ByteRecord, ErrorKind, StringRecord};
use tokio::io::AsyncRead;

use super::config::ColumnNames;
use super::error::{FileError, StreamError};
use super::types::{RowError, RowErrorReason};

/// Internal read buffer; rows larger than this still parse, they just grow the record.
const READ_BUFFER_BYTES: usize = 64 * 1024;

/// Column layout resolved once from the header row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderSchema {
    pub key_index: usize,
    pub name_index: usize,
    pub key_column: String,
    pub name_column: String,
    /// Remaining columns as (index, snake_case field name)
    pub metadata: Vec<(usize, String)>,
    pub width: usize,
}

impl HeaderSchema {
    /// Locate the mandatory columns and name every other column.
    ///
    /// Header cells are trimmed and a leading byte-order mark is dropped;
    /// the mandatory columns match case-insensitively.
    pub fn resolve<'a, I>(headers: I, columns: &ColumnNames) -> Result<Self, FileError>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let cleaned: Vec<String> = headers
            .into_iter()
            .map(|h| h.trim_start_matches('\u{feff}').trim().to_string())
            .collect();

        if cleaned.iter().all(|h| h.is_empty()) {
            return Err(FileError::Empty);
        }

        let find = |wanted: &str| {
            cleaned
                .iter()
                .position(|h| h.eq_ignore_ascii_case(wanted.trim()))
                .ok_or_else(|| FileError::MissingColumn(wanted.trim().to_string()))
        };
        let key_index = find(&columns.business_key)?;
        let name_index = find(&columns.display_name)?;

        let mut metadata: Vec<(usize, String)> = Vec::new();
        for (index, header) in cleaned.iter().enumerate() {
            if index == key_index || index == name_index {
                continue;
            }
            let base = match snake_case(header) {
                name if name.is_empty() => format!("column_{}", index + 1),
                name => name,
            };
            let mut name = base.clone();
            let mut n = 2;
            while metadata.iter().any(|(_, existing)| *existing == name) {
                name = format!("{}_{}", base, n);
                n += 1;
            }
            metadata.push((index, name));
        }

        Ok(Self {
            key_index,
            name_index,
            key_column: cleaned[key_index].clone(),
            name_column: cleaned[name_index].clone(),
            metadata,
            width: cleaned.len(),
        })
    }
}

/// Convert a registry header such as `RegAddress.PostTown` or `SICCode.SicText_1`
/// into `reg_address_post_town` / `sic_code_sic_text_1`.
pub fn snake_case(header: &str) -> String {
    let chars: Vec<char> = header.chars().collect();
    let mut out = String::with_capacity(header.len() + 4);

    for (i, &c) in chars.iter().enumerate() {
        if !c.is_alphanumeric() {
            if !out.ends_with('_') {
                out.push('_');
            }
            continue;
        }
        if c.is_uppercase() && i > 0 {
            let prev = chars[i - 1];
            let next_is_lower = chars.get(i + 1).is_some_and(|n| n.is_lowercase());
            let boundary = prev.is_lowercase()
                || prev.is_ascii_digit()
                || (prev.is_uppercase() && next_is_lower);
            if boundary && !out.ends_with('_') {
                out.push('_');
            }
        }
        out.extend(c.to_lowercase());
    }

    out.trim_matches('_').to_string()
}

/// One structurally valid data row
#[derive(Debug, Clone)]
pub struct RawRow {
    /// 1-based data row number
    pub row_number: u64,
    fields: StringRecord,
}

impl RawRow {
    pub fn get(&self, index: usize) -> Option<&str> {
        self.fields.get(index)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// A single malformed row
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("row {row_number} (line {line}): {message}")]
pub struct ParseError {
    pub row_number: u64,
    pub line: u64,
    pub message: String,
}

impl From<ParseError> for RowError {
    fn from(err: ParseError) -> Self {
        RowError::new(err.row_number, RowErrorReason::MalformedRow, err.message)
    }
}

/// Pull-based reader over a CSV stream
pub struct RowParser<R> {
    reader: AsyncReader<R>,
    schema: HeaderSchema,
    rows_read: u64,
    finished: bool,
}

impl<R> RowParser<R>
where
    R: AsyncRead + Unpin + Send,
{
    /// Read and resolve the header row.
    pub async fn open(source: R, columns: &ColumnNames) -> Result<Self, FileError> {
        let mut reader = builder().create_reader(source);

        let headers = reader.headers().await.map_err(|e| match e.kind() {
            ErrorKind::Io(io) => FileError::Unreadable(io.to_string()),
            _ => FileError::Unreadable(e.to_string()),
        })?;
        if headers.is_empty() {
            return Err(FileError::Empty);
        }
        let schema = HeaderSchema::resolve(headers.iter(), columns)?;

        tracing::debug!(
            columns = schema.width,
            key_column = %schema.key_column,
            name_column = %schema.name_column,
            metadata_columns = schema.metadata.len(),
            "CSV header resolved"
        );

        Ok(Self {
            reader,
            schema,
            rows_read: 0,
            finished: false,
        })
    }

    pub fn schema(&self) -> &HeaderSchema {
        &self.schema
    }

    /// Data rows read so far, malformed ones included
    pub fn rows_read(&self) -> u64 {
        self.rows_read
    }

    /// Bytes of the underlying stream consumed so far
    pub fn bytes_read(&self) -> u64 {
        self.reader.position().byte()
    }

    /// Read the next row.
    ///
    /// Returns `Ok(None)` at end of stream. After an `Err` the parser is
    /// finished and keeps returning `Ok(None)`.
    pub async fn next_row(&mut self) -> Result<Option<Result<RawRow, ParseError>>, StreamError> {
        if self.finished {
            return Ok(None);
        }

        let mut record = StringRecord::new();
        match self.reader.read_record(&mut record).await {
            Ok(false) => {
                self.finished = true;
                Ok(None)
            },
            Ok(true) => {
                self.rows_read += 1;
                if record.len() != self.schema.width {
                    return Ok(Some(Err(ParseError {
                        row_number: self.rows_read,
                        line: record.position().map_or(0, |p| p.line()),
                        message: format!(
                            "expected {} fields, found {}",
                            self.schema.width,
                            record.len()
                        ),
                    })));
                }
                Ok(Some(Ok(RawRow {
                    row_number: self.rows_read,
                    fields: record,
                })))
            },
            Err(e) => match e.kind() {
                ErrorKind::Utf8 { .. } | ErrorKind::UnequalLengths { .. } => {
                    self.rows_read += 1;
                    Ok(Some(Err(ParseError {
                        row_number: self.rows_read,
                        line: self.reader.position().line(),
                        message: e.to_string(),
                    })))
                },
                _ => {
                    self.finished = true;
                    tracing::error!(
                        error = %e,
                        last_row = self.rows_read,
                        "CSV stream failed"
                    );
                    Err(StreamError {
                        last_row: self.rows_read,
                        message: e.to_string(),
                    })
                },
            },
        }
    }
}

/// Count data rows without decoding them, for progress totals.
pub async fn count_rows<R>(source: R) -> Result<u64, StreamError>
where
    R: AsyncRead + Unpin + Send,
{
    let mut reader = builder().create_reader(source);
    let mut record = ByteRecord::new();
    let mut rows = 0u64;

    loop {
        match reader.read_byte_record(&mut record).await {
            Ok(true) => rows += 1,
            Ok(false) => return Ok(rows),
            Err(e) => {
                if let ErrorKind::Io(_) = e.kind() {
                    return Err(StreamError {
                        last_row: rows,
                        message: e.to_string(),
                    });
                }
                rows += 1;
            },
        }
    }
}

fn builder() -> AsyncReaderBuilder {
    let mut builder = AsyncReaderBuilder::new();
    builder
        .has_headers(true)
        .flexible(true)
        .buffer_capacity(READ_BUFFER_BYTES);
    builder
}
