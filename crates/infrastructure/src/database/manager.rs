use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use event_worker_core::{
    config::DatabaseConfig, traits::RecordStore, WorkerError, WorkerResult,
};
use sqlx::sqlite::SqliteConnectOptions;
use tracing::info;

use super::{InMemoryRecordStore, PostgresRecordStore, SqliteRecordStore};

/// 只追加的记录表
pub const RECORDS_TABLE: &str = "event_records";

/// Database type detection
#[derive(Debug, Clone, PartialEq)]
pub enum DatabaseType {
    PostgreSQL,
    SQLite,
    Memory,
}

impl DatabaseType {
    pub fn from_url(url: &str) -> Self {
        if url.starts_with("postgres://") || url.starts_with("postgresql://") {
            DatabaseType::PostgreSQL
        } else if url.starts_with("memory://") {
            DatabaseType::Memory
        } else {
            DatabaseType::SQLite
        }
    }
}

/// Database connection pool enum
pub enum DatabasePool {
    PostgreSQL(sqlx::PgPool),
    SQLite(sqlx::SqlitePool),
    Memory,
}

impl DatabasePool {
    /// Create pool from URL with automatic type detection
    pub async fn new(config: &DatabaseConfig) -> WorkerResult<Self> {
        let timeout = Duration::from_secs(config.connection_timeout_seconds);

        match DatabaseType::from_url(&config.url) {
            DatabaseType::PostgreSQL => {
                let pool = sqlx::postgres::PgPoolOptions::new()
                    .max_connections(config.max_connections)
                    .acquire_timeout(timeout)
                    .connect(&config.url)
                    .await
                    .map_err(WorkerError::Database)?;
                Ok(DatabasePool::PostgreSQL(pool))
            }
            DatabaseType::SQLite => {
                let options = SqliteConnectOptions::from_str(&config.url)
                    .map_err(WorkerError::Database)?
                    .create_if_missing(true);
                let pool = sqlx::sqlite::SqlitePoolOptions::new()
                    .max_connections(config.max_connections)
                    .acquire_timeout(timeout)
                    .connect_with(options)
                    .await
                    .map_err(WorkerError::Database)?;
                Ok(DatabasePool::SQLite(pool))
            }
            DatabaseType::Memory => Ok(DatabasePool::Memory),
        }
    }

    pub fn database_type(&self) -> DatabaseType {
        match self {
            DatabasePool::PostgreSQL(_) => DatabaseType::PostgreSQL,
            DatabasePool::SQLite(_) => DatabaseType::SQLite,
            DatabasePool::Memory => DatabaseType::Memory,
        }
    }
}

/// 数据库管理器
///
/// 进程启动时连接一次，创建的记录存储由所有处理器共享。
pub struct DatabaseManager {
    database_type: DatabaseType,
    store: Arc<dyn RecordStore>,
}

impl DatabaseManager {
    /// 连接数据库并确保记录表存在
    pub async fn connect(config: &DatabaseConfig) -> WorkerResult<Self> {
        let pool = DatabasePool::new(config).await?;
        let database_type = pool.database_type();

        let store: Arc<dyn RecordStore> = match pool {
            DatabasePool::PostgreSQL(pool) => {
                let store = PostgresRecordStore::new(pool);
                store.ensure_schema().await?;
                Arc::new(store)
            }
            DatabasePool::SQLite(pool) => {
                let store = SqliteRecordStore::new(pool);
                store.ensure_schema().await?;
                Arc::new(store)
            }
            DatabasePool::Memory => Arc::new(InMemoryRecordStore::new()),
        };

        store.health_check().await?;
        info!(database_type = ?database_type, "Database connected");

        Ok(Self {
            database_type,
            store,
        })
    }

    pub fn database_type(&self) -> DatabaseType {
        self.database_type.clone()
    }

    /// 共享的记录存储句柄
    pub fn record_store(&self) -> Arc<dyn RecordStore> {
        Arc::clone(&self.store)
    }

    pub async fn health_check(&self) -> WorkerResult<()> {
        self.store.health_check().await
    }

    pub async fn close(&self) {
        self.store.close().await
    }
}
