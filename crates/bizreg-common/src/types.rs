//! Domain types shared between the server and the command-line importer

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A company as persisted by the import pipeline.
///
/// `company_number` is the registry identifier and is unique across the whole
/// store. Optional registry columns (address lines, incorporation date, SIC
/// codes, ...) live in `metadata` keyed by their snake_case column name; blank
/// values are never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompanyRecord {
    pub company_number: String,
    pub name: String,
    pub slug: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

impl CompanyRecord {
    /// Look up an optional metadata field
    pub fn field(&self, name: &str) -> Option<&str> {
        self.metadata.get(name).map(String::as_str)
    }

    /// Metadata as a JSON object, the shape stored in the `metadata` column
    pub fn metadata_json(&self) -> crate::Result<serde_json::Value> {
        Ok(serde_json::to_value(&self.metadata)?)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn sample() -> CompanyRecord {
        let mut metadata = BTreeMap::new();
        metadata.insert("reg_address_post_town".to_string(), "LEEDS".to_string());
        CompanyRecord {
            company_number: "09876543".to_string(),
            name: "Acme Widgets Ltd".to_string(),
            slug: "acme-widgets-ltd-09876543-123456".to_string(),
            metadata,
        }
    }

    #[test]
    fn test_field_lookup() {
        let record = sample();
        assert_eq!(record.field("reg_address_post_town"), Some("LEEDS"));
        assert_eq!(record.field("sic_code_1"), None);
    }

    #[test]
    fn test_serializes_camel_case_and_skips_empty_metadata() {
        let mut record = sample();
        record.metadata.clear();
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["companyNumber"], "09876543");
        assert!(json.get("metadata").is_none());
    }

    #[test]
    fn test_metadata_json_object() {
        let json = sample().metadata_json().unwrap();
        assert_eq!(json["reg_address_post_town"], "LEEDS");
    }
}
