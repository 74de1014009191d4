//! Batch writer
//!
//! Buffers normalized rows and persists them one batch per store call.

use std::sync::Arc;
use tracing::{debug, warn};

use super::types::{NormalizedRow, RowError, RowErrorReason};
use crate::store::CompanyStore;

const MISSING_OUTCOME_MESSAGE: &str = "Store reported no outcome for this row";

/// What one flush did
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BatchResult {
    pub created: u64,
    /// One entry per row that could not be persisted
    pub errors: Vec<RowError>,
}

impl BatchResult {
    pub fn errored(&self) -> u64 {
        self.errors.len() as u64
    }

    pub fn attempted(&self) -> u64 {
        self.created + self.errored()
    }
}

pub struct BatchWriter {
    store: Arc<dyn CompanyStore>,
    batch_size: usize,
    buffer: Vec<NormalizedRow>,
}

impl BatchWriter {
    pub fn new(store: Arc<dyn CompanyStore>, batch_size: usize) -> Self {
        let batch_size = batch_size.max(1);
        Self {
            store,
            batch_size,
            buffer: Vec::with_capacity(batch_size),
        }
    }

    /// Buffer a row; returns `true` once the batch is full and should be flushed.
    pub fn push(&mut self, row: NormalizedRow) -> bool {
        self.buffer.push(row);
        self.is_full()
    }

    pub fn is_full(&self) -> bool {
        self.buffer.len() >= self.batch_size
    }

    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Persist everything buffered.
    ///
    /// Rows are written independently. If the store cannot take the batch at
    /// all, every buffered row is reported as a persistence failure.
    pub async fn flush(&mut self) -> BatchResult {
        if self.buffer.is_empty() {
            return BatchResult::default();
        }
        let rows = std::mem::take(&mut self.buffer);
        self.buffer.reserve(self.batch_size);

        let mut result = BatchResult::default();
        match self.store.insert_batch(&rows).await {
            Ok(outcomes) => {
                if outcomes.len() != rows.len() {
                    warn!(
                        rows = rows.len(),
                        outcomes = outcomes.len(),
                        "Store returned a mismatched outcome count"
                    );
                }
                let mut outcomes = outcomes.into_iter();
                for row in &rows {
                    match outcomes.next() {
                        Some(Ok(())) => result.created += 1,
                        Some(Err(e)) => result.errors.push(persistence_error(row, &e.to_string())),
                        None => result
                            .errors
                            .push(persistence_error(row, MISSING_OUTCOME_MESSAGE)),
                    }
                }
            },
            Err(e) => {
                warn!(
                    rows = rows.len(),
                    first_row = rows.first().map(|r| r.row_number),
                    error = %e,
                    "Batch could not be written"
                );
                let message = e.to_string();
                result.errors = rows.iter().map(|row| persistence_error(row, &message)).collect();
            },
        }

        debug!(
            created = result.created,
            errored = result.errored(),
            "Batch flushed"
        );
        result
    }
}

fn persistence_error(row: &NormalizedRow, message: &str) -> RowError {
    RowError::new(row.row_number, RowErrorReason::PersistenceFailed, message)
        .with_key(row.business_key())
}
