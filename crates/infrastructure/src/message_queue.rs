use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use event_worker_core::{
    config::MessageQueueConfig,
    models::{Envelope, ReceiptToken},
    traits::QueueTransport,
    WorkerError, WorkerResult,
};
use lapin::{
    message::Delivery,
    options::*,
    types::{AMQPValue, FieldTable, LongString, ShortString},
    BasicProperties, Channel, Connection, ConnectionProperties,
};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::dedup::DedupWindow;

/// 携带分组键的消息头
pub const GROUP_ID_HEADER: &str = "x-group-id";

/// 队列为空时两次 basic_get 之间的间隔
const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// 建立RabbitMQ连接，源队列和死信队列共用
pub async fn connect_rabbitmq(config: &MessageQueueConfig) -> WorkerResult<Arc<Connection>> {
    let connection = open_connection(
        &config.url,
        Duration::from_secs(config.connection_timeout_seconds),
    )
    .await?;
    info!("成功连接到RabbitMQ: {}", config.url);
    Ok(Arc::new(connection))
}

async fn open_connection(url: &str, timeout: Duration) -> WorkerResult<Connection> {
    tokio::time::timeout(
        timeout,
        Connection::connect(url, ConnectionProperties::default()),
    )
    .await
    .map_err(|_| WorkerError::Transport(format!("连接RabbitMQ超时: {url}")))?
    .map_err(|e| WorkerError::Transport(format!("连接RabbitMQ失败: {e}")))
}

/// 反复调用 `fetch` 凑满一批消息
///
/// 队列为空时轮询直到 `deadline`。批次中途拉取失败时返回已拿到的消息，
/// 一条都没拿到才返回错误。
async fn collect_batch<T, F, Fut>(
    max_messages: usize,
    deadline: Instant,
    mut fetch: F,
) -> WorkerResult<Vec<T>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = WorkerResult<Option<T>>>,
{
    let mut batch = Vec::new();

    while batch.len() < max_messages {
        match fetch().await {
            Ok(Some(item)) => batch.push(item),
            Ok(None) => {
                let now = Instant::now();
                if !batch.is_empty() || now >= deadline {
                    break;
                }
                tokio::time::sleep(POLL_INTERVAL.min(deadline - now)).await;
            }
            Err(e) if !batch.is_empty() => {
                warn!(count = batch.len(), error = %e, "Fetch failed mid-batch, returning messages received so far");
                break;
            }
            Err(e) => return Err(e),
        }
    }

    Ok(batch)
}

/// RabbitMQ队列传输实现
///
/// 每个实例独占一个通道并绑定一个持久化队列。拉取通过反复 `basic_get` 完成，
/// 回执即投递标签，确认使用 `basic_ack`。
///
/// 通道或连接断开后，下一次操作会重新建立连接和通道。旧通道上的投递标签随之失效，
/// 未确认的消息由broker重新投递。
pub struct RabbitMqTransport {
    url: String,
    connection_timeout: Duration,
    connection: Mutex<Arc<Connection>>,
    channel: Mutex<Channel>,
    queue: String,
    dedup_window: Duration,
    /// 本进程内已发布的去重令牌，发布期间持有锁
    sent_tokens: Mutex<DedupWindow>,
}

impl RabbitMqTransport {
    /// 创建通道并声明队列
    pub async fn new(
        connection: Arc<Connection>,
        config: &MessageQueueConfig,
        queue: impl Into<String>,
    ) -> WorkerResult<Self> {
        let queue = queue.into();
        let channel = Self::open_channel(&connection, &queue).await?;

        Ok(Self {
            url: config.url.clone(),
            connection_timeout: Duration::from_secs(config.connection_timeout_seconds),
            connection: Mutex::new(connection),
            channel: Mutex::new(channel),
            queue,
            dedup_window: Duration::from_secs(config.dedup_window_seconds.max(1)),
            sent_tokens: Mutex::new(DedupWindow::default()),
        })
    }

    async fn open_channel(connection: &Connection, queue: &str) -> WorkerResult<Channel> {
        let channel = connection
            .create_channel()
            .await
            .map_err(|e| WorkerError::Transport(format!("创建通道失败: {e}")))?;

        channel
            .queue_declare(
                queue,
                QueueDeclareOptions {
                    durable: true,
                    exclusive: false,
                    auto_delete: false,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| WorkerError::Transport(format!("声明队列 {queue} 失败: {e}")))?;

        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await
            .map_err(|e| WorkerError::Transport(format!("开启发布确认失败: {e}")))?;

        debug!("队列 {} 声明成功", queue);
        Ok(channel)
    }

    /// 返回可用的通道，断开时重建
    async fn channel(&self) -> WorkerResult<Channel> {
        let mut channel = self.channel.lock().await;
        if channel.status().connected() {
            return Ok(channel.clone());
        }

        warn!(queue = %self.queue, "Channel closed, reopening");
        let mut connection = self.connection.lock().await;
        if !connection.status().connected() {
            let reconnected = open_connection(&self.url, self.connection_timeout)
                .await
                .map_err(|e| WorkerError::TransportTransient(e.to_string()))?;
            *connection = Arc::new(reconnected);
            info!(queue = %self.queue, "Reconnected to RabbitMQ");
        }

        let reopened = Self::open_channel(&connection, &self.queue)
            .await
            .map_err(|e| WorkerError::TransportTransient(e.to_string()))?;
        *channel = reopened.clone();
        Ok(reopened)
    }

    fn to_envelope(&self, delivery: &Delivery) -> Envelope {
        let properties = &delivery.properties;
        let delivery_tag = delivery.delivery_tag;
        let id = properties
            .message_id()
            .as_ref()
            .map(|id| id.as_str().to_string())
            .unwrap_or_else(|| format!("{}-{}", self.queue, delivery_tag));

        let group_id = properties.headers().as_ref().and_then(|headers| {
            headers
                .inner()
                .get(GROUP_ID_HEADER)
                .and_then(|value| match value {
                    AMQPValue::LongString(s) => {
                        Some(String::from_utf8_lossy(s.as_bytes()).into_owned())
                    }
                    AMQPValue::ShortString(s) => Some(s.as_str().to_string()),
                    _ => None,
                })
        });

        let mut envelope = Envelope::new(
            id,
            delivery.data.clone(),
            ReceiptToken::new(delivery_tag.to_string()),
        )
        .with_attribute("queue", self.queue.clone())
        .with_attribute("redelivered", delivery.redelivered.to_string());
        if let Some(group_id) = group_id {
            envelope = envelope.with_group_id(group_id);
        }
        envelope
    }
}

#[async_trait]
impl QueueTransport for RabbitMqTransport {
    async fn receive(&self, max_messages: usize, wait: Duration) -> WorkerResult<Vec<Envelope>> {
        let channel = self.channel().await?;
        let deadline = Instant::now() + wait;

        let deliveries = collect_batch(max_messages.max(1), deadline, || {
            let channel = channel.clone();
            async move {
                channel
                    .basic_get(&self.queue, BasicGetOptions { no_ack: false })
                    .await
                    .map(|message| message.map(|message| message.delivery))
                    .map_err(|e| {
                        WorkerError::TransportTransient(format!(
                            "从队列 {} 获取消息失败: {e}",
                            self.queue
                        ))
                    })
            }
        })
        .await?;

        let envelopes: Vec<Envelope> = deliveries
            .into_iter()
            .map(|delivery| self.to_envelope(&delivery))
            .collect();

        if !envelopes.is_empty() {
            debug!(queue = %self.queue, count = envelopes.len(), "Received messages");
        }
        Ok(envelopes)
    }

    async fn acknowledge(&self, receipt: &ReceiptToken) -> WorkerResult<()> {
        let delivery_tag: u64 = receipt
            .as_str()
            .parse()
            .map_err(|_| WorkerError::Transport(format!("无效的投递标签: {receipt}")))?;

        let channel = self.channel.lock().await.clone();
        channel
            .basic_ack(delivery_tag, BasicAckOptions::default())
            .await
            .map_err(|e| WorkerError::Transport(format!("确认消息失败: {e}")))?;

        debug!(queue = %self.queue, receipt = %receipt, "Message acknowledged");
        Ok(())
    }

    async fn send(&self, body: &[u8], group_key: &str, dedup_token: &str) -> WorkerResult<String> {
        let mut sent_tokens = self.sent_tokens.lock().await;
        if let Some(message_id) = sent_tokens.check(dedup_token, self.dedup_window, Instant::now()) {
            debug!(
                queue = %self.queue,
                dedup_token = %dedup_token,
                "Duplicate dedup token, message not published"
            );
            return Ok(message_id);
        }

        let mut headers = FieldTable::default();
        headers.insert(
            ShortString::from(GROUP_ID_HEADER),
            AMQPValue::LongString(LongString::from(group_key.to_string())),
        );

        let properties = BasicProperties::default()
            .with_delivery_mode(2) // 2 = persistent
            .with_content_type(ShortString::from("application/json"))
            .with_message_id(ShortString::from(dedup_token.to_string()))
            .with_headers(headers);

        let channel = self.channel().await?;
        let confirm = channel
            .basic_publish(
                "",
                &self.queue,
                BasicPublishOptions::default(),
                body,
                properties,
            )
            .await
            .map_err(|e| {
                WorkerError::Transport(format!("发布消息到队列 {} 失败: {e}", self.queue))
            })?;

        let confirmation = confirm
            .await
            .map_err(|e| WorkerError::Transport(format!("消息发布确认失败: {e}")))?;
        if confirmation.is_nack() {
            warn!(queue = %self.queue, "Broker rejected published message");
            return Err(WorkerError::Transport(format!(
                "队列 {} 拒绝了发布的消息",
                self.queue
            )));
        }

        sent_tokens.record(dedup_token, dedup_token, Instant::now());

        debug!(queue = %self.queue, message_id = %dedup_token, "Message published");
        Ok(dedup_token.to_string())
    }
}
