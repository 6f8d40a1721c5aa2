use async_trait::async_trait;
use event_worker_core::{models::StoredRecord, traits::RecordStore, WorkerError, WorkerResult};
use sqlx::{Row, SqlitePool};
use tracing::{debug, info};

pub struct SqliteRecordStore {
    pool: SqlitePool,
}

impl SqliteRecordStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn ensure_schema(&self) -> WorkerResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS event_records (
                id TEXT PRIMARY KEY,
                collection TEXT NOT NULL,
                recorded_at TEXT NOT NULL,
                document TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(WorkerError::Database)?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_event_records_collection ON event_records (collection, recorded_at)",
        )
        .execute(&self.pool)
        .await
        .map_err(WorkerError::Database)?;

        debug!("event_records 表已就绪");
        Ok(())
    }

    /// 按写入顺序读取集合中的全部记录
    pub async fn find_by_collection(&self, collection: &str) -> WorkerResult<Vec<StoredRecord>> {
        let rows = sqlx::query(
            "SELECT document FROM event_records WHERE collection = $1 ORDER BY rowid",
        )
        .bind(collection)
        .fetch_all(&self.pool)
        .await
        .map_err(WorkerError::Database)?;

        rows.iter()
            .map(|row| -> WorkerResult<StoredRecord> {
                let document: String = row.try_get("document")?;
                Ok(serde_json::from_str(&document)?)
            })
            .collect()
    }

    pub async fn count(&self, collection: &str) -> WorkerResult<i64> {
        let row = sqlx::query("SELECT COUNT(*) as count FROM event_records WHERE collection = $1")
            .bind(collection)
            .fetch_one(&self.pool)
            .await
            .map_err(WorkerError::Database)?;
        Ok(row.try_get::<i64, _>("count")?)
    }
}

#[async_trait]
impl RecordStore for SqliteRecordStore {
    async fn insert(&self, collection: &str, record: &StoredRecord) -> WorkerResult<String> {
        let id = uuid::Uuid::new_v4().to_string();
        let document = serde_json::to_string(record)?;

        sqlx::query(
            "INSERT INTO event_records (id, collection, recorded_at, document) VALUES ($1, $2, $3, $4)",
        )
        .bind(&id)
        .bind(collection)
        .bind(record.timestamp.to_rfc3339())
        .bind(document)
        .execute(&self.pool)
        .await
        .map_err(|e| WorkerError::Persistence(format!("写入集合 {collection} 失败: {e}")))?;

        debug!(collection = %collection, record_id = %id, "Record inserted");
        Ok(id)
    }

    async fn health_check(&self) -> WorkerResult<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(WorkerError::Database)?;
        Ok(())
    }

    async fn close(&self) {
        self.pool.close().await;
        info!("SQLite连接池已关闭");
    }
}
