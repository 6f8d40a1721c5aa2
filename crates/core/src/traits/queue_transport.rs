use std::time::Duration;

use async_trait::async_trait;

use crate::{
    models::{Envelope, ReceiptToken},
    WorkerResult,
};

/// 队列传输抽象接口
///
/// 每个实例绑定一个队列。需要的语义是按分组的FIFO顺序和按去重令牌去重，
/// 具体协议由实现决定。
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait QueueTransport: Send + Sync {
    /// 最多等待 `wait` 拉取不超过 `max_messages` 条消息，超时返回空列表
    async fn receive(&self, max_messages: usize, wait: Duration) -> WorkerResult<Vec<Envelope>>;

    /// 确认并从队列移除消息
    async fn acknowledge(&self, receipt: &ReceiptToken) -> WorkerResult<()>;

    /// 原样发送消息体，返回传输层分配的消息ID
    async fn send(&self, body: &[u8], group_key: &str, dedup_token: &str) -> WorkerResult<String>;
}
