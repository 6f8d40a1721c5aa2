use async_trait::async_trait;

use crate::{models::StoredRecord, WorkerResult};

/// 只追加的文档存储
///
/// 进程启动时打开一次，由所有处理器共享。
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// 向指定集合插入一条记录，返回记录ID
    async fn insert(&self, collection: &str, record: &StoredRecord) -> WorkerResult<String>;

    async fn health_check(&self) -> WorkerResult<()>;

    /// 释放底层连接
    async fn close(&self);
}
