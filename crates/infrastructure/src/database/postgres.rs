use async_trait::async_trait;
use event_worker_core::{models::StoredRecord, traits::RecordStore, WorkerError, WorkerResult};
use sqlx::PgPool;
use tracing::{debug, info};

pub struct PostgresRecordStore {
    pool: PgPool,
}

impl PostgresRecordStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn ensure_schema(&self) -> WorkerResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS event_records (
                id TEXT PRIMARY KEY,
                collection TEXT NOT NULL,
                recorded_at TIMESTAMPTZ NOT NULL,
                document JSONB NOT NULL
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
}

#[async_trait]
impl RecordStore for PostgresRecordStore {
    async fn insert(&self, collection: &str, record: &StoredRecord) -> WorkerResult<String> {
        let id = uuid::Uuid::new_v4().to_string();
        let document = serde_json::to_value(record)?;

        sqlx::query(
            "INSERT INTO event_records (id, collection, recorded_at, document) VALUES ($1, $2, $3, $4)",
        )
        .bind(&id)
        .bind(collection)
        .bind(record.timestamp)
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
        info!("PostgreSQL连接池已关闭");
    }
}
