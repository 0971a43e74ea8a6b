//! In-process audit store for local runs and tests.

use std::collections::hash_map::Entry;
use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{AuditError, AuditRecord, AuditStore};

/// Keeps records in a map. Create-if-absent like the real document store.
#[derive(Debug, Default)]
pub struct MemoryAuditStore {
    records: Mutex<HashMap<String, AuditRecord>>,
}

impl MemoryAuditStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, key: &str) -> Option<AuditRecord> {
        self.records.lock().await.get(key).cloned()
    }

    pub async fn len(&self) -> usize {
        self.records.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.lock().await.is_empty()
    }
}

#[async_trait]
impl AuditStore for MemoryAuditStore {
    async fn create(&self, record: &AuditRecord) -> Result<(), AuditError> {
        match self.records.lock().await.entry(record.key()) {
            Entry::Occupied(entry) => Err(AuditError::AlreadyExists {
                key: entry.key().clone(),
            }),
            Entry::Vacant(entry) => {
                entry.insert(record.clone());
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{Map, Value};

    use super::*;
    use crate::fingerprint::Fingerprint;

    #[tokio::test]
    async fn test_second_create_keeps_first_record() {
        let store = MemoryAuditStore::new();
        let mut first = Map::new();
        first.insert("method".into(), Value::from("eth_sendRawTransaction"));
        let mut second = Map::new();
        second.insert("method".into(), Value::from("eth_sendTransaction"));

        store
            .create(&AuditRecord::open(Fingerprint::from(5), first.clone()))
            .await
            .unwrap();
        let err = store
            .create(&AuditRecord::open(Fingerprint::from(5), second))
            .await
            .unwrap_err();

        assert!(matches!(err, AuditError::AlreadyExists { .. }));
        assert_eq!(store.get("5").await.unwrap().payload(), &first);
        assert_eq!(store.len().await, 1);
    }
}
