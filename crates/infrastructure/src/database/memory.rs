use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use event_worker_core::{models::StoredRecord, traits::RecordStore, WorkerError, WorkerResult};
use tokio::sync::RwLock;
use tracing::debug;

/// 内存记录存储，用于 `memory://` 和测试
#[derive(Default)]
pub struct InMemoryRecordStore {
    records: RwLock<Vec<(String, String, StoredRecord)>>,
    closed: AtomicBool,
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 集合中的记录，按写入顺序
    pub async fn records(&self, collection: &str) -> Vec<StoredRecord> {
        self.records
            .read()
            .await
            .iter()
            .filter(|(_, c, _)| c == collection)
            .map(|(_, _, record)| record.clone())
            .collect()
    }

    pub async fn get(&self, id: &str) -> Option<StoredRecord> {
        self.records
            .read()
            .await
            .iter()
            .find(|(record_id, _, _)| record_id == id)
            .map(|(_, _, record)| record.clone())
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn insert(&self, collection: &str, record: &StoredRecord) -> WorkerResult<String> {
        if self.is_closed() {
            return Err(WorkerError::Persistence("存储已关闭".to_string()));
        }

        let id = uuid::Uuid::new_v4().to_string();
        self.records
            .write()
            .await
            .push((id.clone(), collection.to_string(), record.clone()));

        debug!(collection = %collection, record_id = %id, "Record inserted");
        Ok(id)
    }

    async fn health_check(&self) -> WorkerResult<()> {
        if self.is_closed() {
            return Err(WorkerError::Persistence("存储已关闭".to_string()));
        }
        Ok(())
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}
