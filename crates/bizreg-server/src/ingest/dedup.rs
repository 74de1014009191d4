//! Job-scoped duplicate detection
//!
//! One [`DuplicateKeySet`] is built per job and passed through the pipeline;
//! it is dropped when the job ends. Concurrent jobs each hold their own set
//! and do not see each other's new keys, the store's unique constraint
//! catches what slips through.

use futures::stream::{BoxStream, StreamExt};
use std::collections::HashSet;

use crate::store::StoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyStatus {
    /// Key was absent and is now reserved for this row
    New,
    Duplicate,
}

#[derive(Debug, Default)]
pub struct DuplicateKeySet {
    keys: HashSet<String>,
}

impl DuplicateKeySet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed from already known keys
    pub fn preload<I>(&mut self, existing: I)
    where
        I: IntoIterator<Item = String>,
    {
        self.keys.extend(existing);
    }

    /// Seed from the store's key stream, in one pass.
    ///
    /// Returns the number of keys read.
    pub async fn preload_stream(
        &mut self,
        mut existing: BoxStream<'_, Result<String, StoreError>>,
    ) -> Result<u64, StoreError> {
        let mut read = 0u64;
        while let Some(key) = existing.next().await {
            self.keys.insert(key?);
            read += 1;
        }
        Ok(read)
    }

    /// Check membership and reserve the key in one step.
    ///
    /// A duplicate leaves the set unchanged.
    pub fn check_and_reserve(&mut self, key: &str) -> KeyStatus {
        if self.keys.contains(key) {
            KeyStatus::Duplicate
        } else {
            self.keys.insert(key.to_string());
            KeyStatus::New
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.keys.contains(key)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    #[test]
    fn test_check_and_reserve() {
        let mut keys = DuplicateKeySet::new();
        keys.preload(vec!["00000001".to_string()]);

        assert_eq!(keys.check_and_reserve("00000001"), KeyStatus::Duplicate);
        assert_eq!(keys.check_and_reserve("00000002"), KeyStatus::New);
        // intra-file repeat
        assert_eq!(keys.check_and_reserve("00000002"), KeyStatus::Duplicate);
        assert_eq!(keys.len(), 2);
    }

    #[tokio::test]
    async fn test_preload_stream() {
        let mut keys = DuplicateKeySet::new();
        let source = stream::iter(vec![Ok("A".to_string()), Ok("B".to_string()), Ok("A".to_string())]);
        let read = keys.preload_stream(source.boxed()).await.unwrap();

        assert_eq!(read, 3);
        assert_eq!(keys.len(), 2);
        assert!(keys.contains("B"));
    }

    #[tokio::test]
    async fn test_preload_stream_error_stops() {
        let mut keys = DuplicateKeySet::new();
        let source = stream::iter(vec![
            Ok("A".to_string()),
            Err(StoreError::Unavailable("gone".to_string())),
            Ok("B".to_string()),
        ]);
        assert!(keys.preload_stream(source.boxed()).await.is_err());
        assert!(!keys.contains("B"));
    }
}
