use crate::models::StoredFileRecord;
use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::Mutex;

/// Persists metadata of uploads that passed every defense stage
#[async_trait]
pub trait FileRecordSink: Send + Sync {
    /// Returns the record with its assigned id
    async fn persist(&self, record: StoredFileRecord) -> Result<StoredFileRecord>;
}

/// Sink that keeps records in memory and assigns sequential ids
#[derive(Default)]
pub struct InMemoryFileRecords {
    records: Mutex<Vec<StoredFileRecord>>,
}

impl InMemoryFileRecords {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn records(&self) -> Vec<StoredFileRecord> {
        self.records.lock().await.clone()
    }
}

#[async_trait]
impl FileRecordSink for InMemoryFileRecords {
    async fn persist(&self, mut record: StoredFileRecord) -> Result<StoredFileRecord> {
        let mut records = self.records.lock().await;
        record.id = Some(records.len() as i64 + 1);
        records.push(record.clone());
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::path::PathBuf;

    fn record(name: &str) -> StoredFileRecord {
        StoredFileRecord {
            id: None,
            workspace_id: 1,
            original_name: name.to_string(),
            stored_name: format!("{}.txt", uuid::Uuid::new_v4()),
            extension: "txt".to_string(),
            byte_size: 3,
            mime_type: "text/plain".to_string(),
            storage_path: PathBuf::from("/tmp/x"),
            content_hash: "00".to_string(),
            uploaded_by: 9,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_in_memory_sink_assigns_ids() {
        let sink = InMemoryFileRecords::new();
        let first = sink.persist(record("a.txt")).await.unwrap();
        let second = sink.persist(record("b.txt")).await.unwrap();
        assert_eq!(first.id, Some(1));
        assert_eq!(second.id, Some(2));
        assert_eq!(sink.records().await.len(), 2);
    }
}
