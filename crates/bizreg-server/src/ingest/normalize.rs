//! Row validation and normalization
//!
//! Turns a [`RawRow`] into a [`NormalizedRow`]: trims every field, enforces the
//! two mandatory columns, drops blank optional fields and generates the slug.

use bizreg_common::CompanyRecord;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

use super::parser::{HeaderSchema, RawRow};
use super::types::{NormalizedRow, RowError, RowErrorReason};

/// Base slug used when a name has no ASCII letters or digits at all.
const FALLBACK_SLUG: &str = "company";

/// How many trailing characters of the company number go into the slug.
const KEY_SUFFIX_CHARS: usize = 8;

/// Bytes of the key digest appended when the suffix alone is ambiguous.
const KEY_DIGEST_BYTES: usize = 4;

/// A row rejected by validation
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("row {row}: required field '{field}' is empty")]
pub struct ValidationError {
    pub row: u64,
    pub reason: RowErrorReason,
    pub field: String,
}

impl From<ValidationError> for RowError {
    fn from(err: ValidationError) -> Self {
        let message = format!("{} is required", err.field);
        RowError::new(err.row, err.reason, message)
    }
}

/// Validates rows against a resolved header
pub struct Normalizer {
    schema: HeaderSchema,
    clock: fn() -> i64,
}

impl Normalizer {
    pub fn new(schema: HeaderSchema) -> Self {
        Self {
            schema,
            clock: || chrono::Utc::now().timestamp_millis(),
        }
    }

    /// Use a fixed millisecond source for slug suffixes
    pub fn with_clock(mut self, clock: fn() -> i64) -> Self {
        self.clock = clock;
        self
    }

    pub fn normalize(&self, row: &RawRow) -> Result<NormalizedRow, ValidationError> {
        let field = |index: usize| row.get(index).map(str::trim).unwrap_or("");

        let business_key = field(self.schema.key_index);
        if business_key.is_empty() {
            return Err(self.missing(row, &self.schema.key_column));
        }
        let name = field(self.schema.name_index);
        if name.is_empty() {
            return Err(self.missing(row, &self.schema.name_column));
        }

        let metadata: BTreeMap<String, String> = self
            .schema
            .metadata
            .iter()
            .filter_map(|(index, column)| {
                let value = field(*index);
                (!value.is_empty()).then(|| (column.clone(), value.to_string()))
            })
            .collect();

        Ok(NormalizedRow {
            row_number: row.row_number,
            record: CompanyRecord {
                company_number: business_key.to_string(),
                name: name.to_string(),
                slug: generate_slug(name, business_key, (self.clock)()),
                metadata,
            },
        })
    }

    fn missing(&self, row: &RawRow, column: &str) -> ValidationError {
        ValidationError {
            row: row.row_number,
            reason: RowErrorReason::MissingRequiredField,
            field: column.to_string(),
        }
    }
}

/// Lowercase, hyphen-separated form of `name` using ASCII alphanumerics only
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.is_empty() && !slug.ends_with('-') {
            slug.push('-');
        }
    }
    while slug.ends_with('-') {
        slug.pop();
    }
    slug
}

/// `slugify(name)-<key part>-<last 6 digits of millis>`, all lowercase.
///
/// The key part is the last 8 characters of the company number. When that
/// does not identify the key on its own (longer key, or slugify changed it)
/// a short SHA-256 digest of the full key follows, so distinct keys never
/// share a key part. The timestamp part separates regenerations of the
/// same key.
pub fn generate_slug(name: &str, business_key: &str, millis: i64) -> String {
    let base = match slugify(name) {
        s if s.is_empty() => FALLBACK_SLUG.to_string(),
        s => s,
    };

    format!(
        "{}-{}-{:06}",
        base,
        key_part(business_key),
        millis.rem_euclid(1_000_000)
    )
}

fn key_part(business_key: &str) -> String {
    let key_chars: Vec<char> = business_key.chars().collect();
    let tail: String = key_chars[key_chars.len().saturating_sub(KEY_SUFFIX_CHARS)..]
        .iter()
        .collect();
    let slug_tail = slugify(&tail);

    if key_chars.len() <= KEY_SUFFIX_CHARS && !slug_tail.is_empty() && slug_tail == tail {
        return slug_tail;
    }

    let digest = Sha256::digest(business_key.as_bytes());
    let short: String = digest[..KEY_DIGEST_BYTES]
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect();
    match slug_tail {
        t if t.is_empty() => format!("x-{}", short),
        t => format!("{}-{}", t, short),
    }
}
