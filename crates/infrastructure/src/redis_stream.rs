use std::time::Duration;

use async_trait::async_trait;
use event_worker_core::{
    config::MessageQueueConfig,
    models::{Envelope, ReceiptToken},
    traits::QueueTransport,
    WorkerError, WorkerResult,
};
use redis::{
    aio::{ConnectionManager, MultiplexedConnection},
    streams::{StreamId, StreamReadOptions, StreamReadReply},
    AsyncCommands, Client,
};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

const BODY_FIELD: &str = "body";
const GROUP_FIELD: &str = "group_id";
const DEDUP_FIELD: &str = "dedup_token";

/// Redis Stream队列传输实现
///
/// 拉取使用 `XREADGROUP`，确认使用 `XACK` + `XDEL`。发送前先以 `SET NX EX`
/// 占用去重令牌，令牌已存在时直接返回之前的消息ID。
///
/// 启动后先读完本消费者已投递未确认的历史消息，再读取新消息。
/// 读取连接出错后会被丢弃，下一次拉取重新建立连接并再次读取历史消息。
pub struct RedisStreamTransport {
    client: Client,
    connection_timeout: Duration,
    stream: String,
    group: String,
    consumer: String,
    dedup_window_seconds: u64,
    commands: ConnectionManager,
    /// 阻塞读取独占一条连接，避免阻塞其他命令；断开后为 `None`
    reader: Mutex<Option<MultiplexedConnection>>,
    /// 历史消息读取位置，读完后为 `None`
    pending_cursor: Mutex<Option<String>>,
}

impl RedisStreamTransport {
    pub async fn connect(
        config: &MessageQueueConfig,
        stream: impl Into<String>,
        consumer: impl Into<String>,
    ) -> WorkerResult<Self> {
        let stream = stream.into();
        let client = Client::open(config.url.as_str())
            .map_err(|e| WorkerError::Transport(format!("创建Redis客户端失败: {e}")))?;

        let timeout = Duration::from_secs(config.connection_timeout_seconds);
        let commands = tokio::time::timeout(timeout, ConnectionManager::new(client.clone()))
            .await
            .map_err(|_| WorkerError::Transport(format!("连接Redis超时: {}", config.url)))?
            .map_err(|e| WorkerError::Transport(format!("连接Redis失败: {e}")))?;
        let reader = open_reader(&client, timeout).await?;

        let transport = Self {
            client,
            connection_timeout: timeout,
            stream,
            group: config.consumer_group.clone(),
            consumer: consumer.into(),
            dedup_window_seconds: config.dedup_window_seconds.max(1),
            commands,
            reader: Mutex::new(Some(reader)),
            pending_cursor: Mutex::new(Some("0".to_string())),
        };
        transport.ensure_consumer_group().await?;

        info!(
            stream = %transport.stream,
            group = %transport.group,
            consumer = %transport.consumer,
            "Connected to Redis stream"
        );
        Ok(transport)
    }

    async fn ensure_consumer_group(&self) -> WorkerResult<()> {
        let mut conn = self.commands.clone();
        let result: redis::RedisResult<String> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(&self.stream)
            .arg(&self.group)
            .arg("0")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;

        match result {
            Ok(_) => {
                debug!("Successfully created consumer group: {}", self.group);
                Ok(())
            }
            Err(e) if e.to_string().contains("BUSYGROUP") => {
                debug!("Consumer group {} already exists", self.group);
                Ok(())
            }
            Err(e) => Err(WorkerError::Transport(format!(
                "创建消费组 {} 失败: {e}",
                self.group
            ))),
        }
    }

    fn dedup_key(&self, dedup_token: &str) -> String {
        format!("{}:dedup:{}", self.stream, dedup_token)
    }

}

async fn open_reader(client: &Client, timeout: Duration) -> WorkerResult<MultiplexedConnection> {
    tokio::time::timeout(timeout, client.get_multiplexed_async_connection())
        .await
        .map_err(|_| WorkerError::Transport("连接Redis超时".to_string()))?
        .map_err(|e| WorkerError::Transport(format!("连接Redis失败: {e}")))
}

/// 把Stream条目转换为消息，消息体按原始字节读取
fn entry_to_envelope(stream: &str, entry: &StreamId) -> Envelope {
    let body: Vec<u8> = match entry.get(BODY_FIELD) {
        Some(body) => body,
        None => {
            warn!(stream = %stream, entry_id = %entry.id, "Stream entry has no body field");
            Vec::new()
        }
    };
    let mut envelope = Envelope::new(entry.id.clone(), body, ReceiptToken::new(entry.id.clone()))
        .with_attribute("stream", stream.to_string());

    if let Some(group_id) = entry.get::<String>(GROUP_FIELD) {
        envelope = envelope.with_group_id(group_id);
    }
    if let Some(token) = entry.get::<String>(DEDUP_FIELD) {
        envelope = envelope.with_attribute(DEDUP_FIELD, token);
    }
    envelope
}

#[async_trait]
impl QueueTransport for RedisStreamTransport {
    async fn receive(&self, max_messages: usize, wait: Duration) -> WorkerResult<Vec<Envelope>> {
        let mut cursor = self.pending_cursor.lock().await;
        let mut reader = self.reader.lock().await;

        if reader.is_none() {
            let reconnected = open_reader(&self.client, self.connection_timeout)
                .await
                .map_err(|e| WorkerError::TransportTransient(e.to_string()))?;
            info!(stream = %self.stream, "Reconnected Redis stream reader");
            *reader = Some(reconnected);
            // 断开前读到的消息仍在待确认列表中
            *cursor = Some("0".to_string());
        }
        let replaying = cursor.is_some();

        let mut options = StreamReadOptions::default()
            .group(&self.group, &self.consumer)
            .count(max_messages.max(1));
        // BLOCK 0 表示无限等待；读取历史消息时不阻塞
        if !replaying && !wait.is_zero() {
            options = options.block(wait.as_millis() as usize);
        }
        let start_id = cursor.clone().unwrap_or_else(|| ">".to_string());

        let Some(conn) = reader.as_mut() else {
            return Err(WorkerError::TransportTransient(format!(
                "Stream {} 的读取连接不可用",
                self.stream
            )));
        };
        let result: redis::RedisResult<StreamReadReply> = conn
            .xread_options(&[&self.stream], &[start_id.as_str()], &options)
            .await;
        let reply = match result {
            Ok(reply) => reply,
            Err(e) => {
                *reader = None;
                return Err(WorkerError::TransportTransient(format!(
                    "读取Stream {} 失败: {e}",
                    self.stream
                )));
            }
        };
        drop(reader);

        let envelopes: Vec<Envelope> = reply
            .keys
            .iter()
            .flat_map(|key| key.ids.iter())
            .map(|entry| entry_to_envelope(&self.stream, entry))
            .collect();

        if replaying {
            match envelopes.last() {
                Some(last) => {
                    info!(stream = %self.stream, count = envelopes.len(), "Redelivering unacknowledged messages");
                    *cursor = Some(last.id.clone());
                }
                None => {
                    debug!(stream = %self.stream, "No unacknowledged messages left, reading new entries");
                    *cursor = None;
                }
            }
        }
        drop(cursor);

        if !envelopes.is_empty() {
            debug!(stream = %self.stream, count = envelopes.len(), "Received messages");
        }
        Ok(envelopes)
    }

    async fn acknowledge(&self, receipt: &ReceiptToken) -> WorkerResult<()> {
        let mut conn = self.commands.clone();
        let acked: i64 = conn
            .xack(&self.stream, &self.group, &[receipt.as_str()])
            .await
            .map_err(|e| WorkerError::Transport(format!("确认消息 {receipt} 失败: {e}")))?;

        if acked == 0 {
            return Err(WorkerError::Transport(format!(
                "消息 {receipt} 不在待确认列表中"
            )));
        }

        let _: i64 = conn
            .xdel(&self.stream, &[receipt.as_str()])
            .await
            .map_err(|e| WorkerError::Transport(format!("删除消息 {receipt} 失败: {e}")))?;

        debug!(stream = %self.stream, receipt = %receipt, "Message acknowledged");
        Ok(())
    }

    async fn send(&self, body: &[u8], group_key: &str, dedup_token: &str) -> WorkerResult<String> {
        let mut conn = self.commands.clone();
        let dedup_key = self.dedup_key(dedup_token);

        let claimed: Option<String> = redis::cmd("SET")
            .arg(&dedup_key)
            .arg("pending")
            .arg("NX")
            .arg("EX")
            .arg(self.dedup_window_seconds)
            .query_async(&mut conn)
            .await
            .map_err(|e| WorkerError::Transport(format!("写入去重令牌失败: {e}")))?;

        if claimed.is_none() {
            let existing: Option<String> = conn
                .get(&dedup_key)
                .await
                .map_err(|e| WorkerError::Transport(format!("读取去重令牌失败: {e}")))?;
            let message_id = existing.unwrap_or_default();
            debug!(
                stream = %self.stream,
                dedup_token = %dedup_token,
                message_id = %message_id,
                "Duplicate dedup token, message not enqueued"
            );
            return Ok(message_id);
        }

        let added: redis::RedisResult<String> = conn
            .xadd(
                &self.stream,
                "*",
                &[
                    (BODY_FIELD, body),
                    (GROUP_FIELD, group_key.as_bytes()),
                    (DEDUP_FIELD, dedup_token.as_bytes()),
                ],
            )
            .await;

        let message_id = match added {
            Ok(id) => id,
            Err(e) => {
                // 释放令牌以便重试
                let released: redis::RedisResult<i64> = conn.del(&dedup_key).await;
                if let Err(del_err) = released {
                    warn!(dedup_key = %dedup_key, error = %del_err, "Failed to release dedup token");
                }
                return Err(WorkerError::Transport(format!(
                    "写入Stream {} 失败: {e}",
                    self.stream
                )));
            }
        };

        let stored: redis::RedisResult<()> = conn
            .set_ex(&dedup_key, &message_id, self.dedup_window_seconds)
            .await;
        if let Err(e) = stored {
            warn!(dedup_key = %dedup_key, error = %e, "Failed to record message id for dedup token");
        }

        debug!(stream = %self.stream, message_id = %message_id, group_id = %group_key, "Message added");
        Ok(message_id)
    }
}
