use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use event_worker_core::{
    models::{Envelope, ReceiptToken},
    traits::QueueTransport,
    WorkerError, WorkerResult,
};
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::dedup::DedupWindow;

/// 未确认消息重新可见前的默认时间
pub const DEFAULT_VISIBILITY_TIMEOUT: Duration = Duration::from_secs(30);

/// 默认去重窗口
pub const DEFAULT_DEDUP_WINDOW: Duration = Duration::from_secs(300);

/// 内存FIFO队列实现
///
/// 语义对齐分组FIFO队列：
/// - 同一分组内按发送顺序投递，分组有未确认消息时该分组的后续消息不会被投递；
/// - 去重窗口内重复的去重令牌不会再次入队；
/// - 超过可见性超时仍未确认的消息重新回到队列。
///
/// 克隆出的实例共享同一个队列。
#[derive(Clone)]
pub struct InMemoryQueue {
    name: String,
    visibility_timeout: Duration,
    dedup_window: Duration,
    inner: Arc<Inner>,
}

struct Inner {
    state: Mutex<QueueState>,
    notify: Notify,
}

#[derive(Default)]
struct QueueState {
    next_seq: u64,
    ready: VecDeque<QueuedMessage>,
    in_flight: HashMap<String, InFlight>,
    dedup: DedupWindow,
    acknowledged: u64,
}

#[derive(Debug, Clone)]
struct QueuedMessage {
    seq: u64,
    id: String,
    body: Vec<u8>,
    group_id: String,
    receive_count: u32,
}

struct InFlight {
    message: QueuedMessage,
    visible_at: Instant,
}

impl InMemoryQueue {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            visibility_timeout: DEFAULT_VISIBILITY_TIMEOUT,
            dedup_window: DEFAULT_DEDUP_WINDOW,
            inner: Arc::new(Inner {
                state: Mutex::new(QueueState::default()),
                notify: Notify::new(),
            }),
        }
    }

    pub fn with_visibility_timeout(mut self, timeout: Duration) -> Self {
        self.visibility_timeout = timeout;
        self
    }

    pub fn with_dedup_window(mut self, window: Duration) -> Self {
        self.dedup_window = window;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// 可投递的消息数
    pub async fn len(&self) -> usize {
        self.inner.state.lock().await.ready.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// 已投递但未确认的消息数
    pub async fn in_flight_len(&self) -> usize {
        self.inner.state.lock().await.in_flight.len()
    }

    /// 累计确认的消息数
    pub async fn acknowledged_count(&self) -> u64 {
        self.inner.state.lock().await.acknowledged
    }

    /// 按顺序返回可投递消息的 (分组, 消息体) 快照
    pub async fn pending_messages(&self) -> Vec<(String, Vec<u8>)> {
        self.inner
            .state
            .lock()
            .await
            .ready
            .iter()
            .map(|m| (m.group_id.clone(), m.body.clone()))
            .collect()
    }

    fn to_envelope(&self, message: &QueuedMessage, receipt: &str) -> Envelope {
        Envelope::new(
            message.id.clone(),
            message.body.clone(),
            ReceiptToken::new(receipt),
        )
        .with_group_id(message.group_id.clone())
        .with_attribute("queue", self.name.clone())
        .with_attribute("receive_count", message.receive_count.to_string())
    }

    /// 在锁内取出当前可投递的消息
    fn take_ready(&self, state: &mut QueueState, max_messages: usize, now: Instant) -> Vec<Envelope> {
        self.requeue_expired(state, now);

        let blocked: HashSet<String> = state
            .in_flight
            .values()
            .map(|f| f.message.group_id.clone())
            .collect();

        let mut taken = Vec::new();
        let mut kept = VecDeque::with_capacity(state.ready.len());
        while let Some(mut message) = state.ready.pop_front() {
            if taken.len() >= max_messages || blocked.contains(&message.group_id) {
                kept.push_back(message);
                continue;
            }
            message.receive_count += 1;
            taken.push(message);
        }
        state.ready = kept;

        taken
            .into_iter()
            .map(|message| {
                let receipt = uuid::Uuid::new_v4().to_string();
                let envelope = self.to_envelope(&message, &receipt);
                state.in_flight.insert(
                    receipt,
                    InFlight {
                        message,
                        visible_at: now + self.visibility_timeout,
                    },
                );
                envelope
            })
            .collect()
    }

    fn requeue_expired(&self, state: &mut QueueState, now: Instant) {
        let expired: Vec<String> = state
            .in_flight
            .iter()
            .filter(|(_, f)| f.visible_at <= now)
            .map(|(receipt, _)| receipt.clone())
            .collect();

        if expired.is_empty() {
            return;
        }

        for receipt in expired {
            if let Some(flight) = state.in_flight.remove(&receipt) {
                debug!(
                    queue = %self.name,
                    message_id = %flight.message.id,
                    "Visibility timeout expired, message is visible again"
                );
                state.ready.push_back(flight.message);
            }
        }
        state.ready.make_contiguous().sort_by_key(|m| m.seq);
    }

    fn next_visibility_deadline(state: &QueueState) -> Option<Instant> {
        state.in_flight.values().map(|f| f.visible_at).min()
    }
}

#[async_trait]
impl QueueTransport for InMemoryQueue {
    async fn receive(&self, max_messages: usize, wait: Duration) -> WorkerResult<Vec<Envelope>> {
        let deadline = Instant::now() + wait;

        loop {
            // 在检查状态之前注册，避免错过检查后到达的通知
            let notified = self.inner.notify.notified();

            let next_visible = {
                let mut state = self.inner.state.lock().await;
                let envelopes = self.take_ready(&mut state, max_messages.max(1), Instant::now());
                if !envelopes.is_empty() {
                    debug!(queue = %self.name, count = envelopes.len(), "Received messages");
                    return Ok(envelopes);
                }
                Self::next_visibility_deadline(&state)
            };

            let now = Instant::now();
            if now >= deadline {
                return Ok(Vec::new());
            }

            let wake_at = next_visible.map_or(deadline, |at| at.min(deadline));
            let _ = tokio::time::timeout_at(wake_at, notified).await;
        }
    }

    async fn acknowledge(&self, receipt: &ReceiptToken) -> WorkerResult<()> {
        let mut state = self.inner.state.lock().await;
        match state.in_flight.remove(receipt.as_str()) {
            Some(flight) => {
                state.acknowledged += 1;
                debug!(queue = %self.name, message_id = %flight.message.id, "Message acknowledged");
                drop(state);
                // 分组解除阻塞，唤醒等待中的消费者
                self.inner.notify.notify_waiters();
                Ok(())
            }
            None => {
                warn!(queue = %self.name, receipt = %receipt, "Unknown or expired receipt");
                Err(WorkerError::Transport(format!(
                    "队列 {} 中不存在回执 {receipt}，可能已过期",
                    self.name
                )))
            }
        }
    }

    async fn send(&self, body: &[u8], group_key: &str, dedup_token: &str) -> WorkerResult<String> {
        let now = Instant::now();
        let mut state = self.inner.state.lock().await;

        if let Some(message_id) = state.dedup.check(dedup_token, self.dedup_window, now) {
            debug!(
                queue = %self.name,
                dedup_token = %dedup_token,
                message_id = %message_id,
                "Duplicate dedup token, message not enqueued"
            );
            return Ok(message_id);
        }

        let message_id = uuid::Uuid::new_v4().to_string();
        let seq = state.next_seq;
        state.next_seq += 1;
        state.ready.push_back(QueuedMessage {
            seq,
            id: message_id.clone(),
            body: body.to_vec(),
            group_id: group_key.to_string(),
            receive_count: 0,
        });
        state.dedup.record(dedup_token, &message_id, now);
        drop(state);

        self.inner.notify.notify_waiters();
        debug!(queue = %self.name, message_id = %message_id, group_id = %group_key, "Message enqueued");
        Ok(message_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NO_WAIT: Duration = Duration::from_millis(0);

    #[tokio::test]
    async fn test_receive_returns_messages_in_send_order() {
        let queue = InMemoryQueue::new("events");
        queue.send(b"a", "g1", "t1").await.unwrap();
        queue.send(b"b", "g2", "t2").await.unwrap();
        queue.send(b"c", "g1", "t3").await.unwrap();

        let batch = queue.receive(10, NO_WAIT).await.unwrap();
        let bodies: Vec<_> = batch.iter().map(|e| e.body.as_slice()).collect();
        assert_eq!(bodies, vec![&b"a"[..], &b"b"[..], &b"c"[..]]);
        assert_eq!(batch[0].group_id.as_deref(), Some("g1"));
        assert_eq!(queue.in_flight_len().await, 3);
    }

    #[tokio::test]
    async fn test_receive_respects_batch_size() {
        let queue = InMemoryQueue::new("events");
        for i in 0..5 {
            queue.send(format!("m{i}").as_bytes(), &format!("g{i}"), &format!("t{i}")).await.unwrap();
        }

        assert_eq!(queue.receive(2, NO_WAIT).await.unwrap().len(), 2);
        assert_eq!(queue.len().await, 3);
    }

    #[tokio::test]
    async fn test_empty_receive_times_out_with_empty_batch() {
        let queue = InMemoryQueue::new("events");
        let started = std::time::Instant::now();
        let batch = queue.receive(10, Duration::from_millis(50)).await.unwrap();

        assert!(batch.is_empty());
        assert!(started.elapsed() >= Duration::from_millis(40));
    }

    #[tokio::test]
    async fn test_waiting_receive_wakes_on_send() {
        let queue = InMemoryQueue::new("events");
        let producer = queue.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            producer.send(b"late", "g", "t").await.unwrap();
        });

        let batch = queue.receive(10, Duration::from_secs(5)).await.unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].body, b"late");
    }

    #[tokio::test]
    async fn test_group_with_in_flight_message_is_blocked() {
        let queue = InMemoryQueue::new("events");
        queue.send(b"first", "g1", "t1").await.unwrap();
        let first = queue.receive(10, NO_WAIT).await.unwrap();

        queue.send(b"second", "g1", "t2").await.unwrap();
        queue.send(b"other", "g2", "t3").await.unwrap();

        let batch = queue.receive(10, NO_WAIT).await.unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].body, b"other");

        queue.acknowledge(&first[0].receipt).await.unwrap();
        let batch = queue.receive(10, NO_WAIT).await.unwrap();
        assert_eq!(batch[0].body, b"second");
    }

    #[tokio::test]
    async fn test_binary_body_is_delivered_unchanged() {
        let queue = InMemoryQueue::new("events");
        let raw = [b'{', 0xff, 0xfe, b'}'];
        queue.send(&raw, "g", "t").await.unwrap();

        assert_eq!(queue.pending_messages().await, vec![("g".to_string(), raw.to_vec())]);
        let batch = queue.receive(1, NO_WAIT).await.unwrap();
        assert_eq!(batch[0].body, raw);
    }

    #[tokio::test]
    async fn test_acknowledge_removes_message() {
        let queue = InMemoryQueue::new("events");
        queue.send(b"a", "g", "t").await.unwrap();
        let batch = queue.receive(1, NO_WAIT).await.unwrap();

        queue.acknowledge(&batch[0].receipt).await.unwrap();
        assert_eq!(queue.in_flight_len().await, 0);
        assert_eq!(queue.acknowledged_count().await, 1);
        assert!(queue.receive(1, NO_WAIT).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_acknowledge_unknown_receipt_fails() {
        let queue = InMemoryQueue::new("events");
        let err = queue
            .acknowledge(&ReceiptToken::new("missing"))
            .await
            .unwrap_err();
        assert!(matches!(err, WorkerError::Transport(_)));
    }

    #[tokio::test]
    async fn test_duplicate_dedup_token_is_not_enqueued() {
        let queue = InMemoryQueue::new("dlq");
        let first = queue.send(b"a", "g", "same").await.unwrap();
        let second = queue.send(b"a", "g", "same").await.unwrap();

        assert_eq!(first, second);
        assert_eq!(queue.len().await, 1);
    }

    #[tokio::test]
    async fn test_dedup_token_expires_after_window() {
        let queue = InMemoryQueue::new("dlq").with_dedup_window(Duration::from_millis(10));
        queue.send(b"a", "g", "same").await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        queue.send(b"a", "g", "same").await.unwrap();

        assert_eq!(queue.len().await, 2);
    }

    #[tokio::test]
    async fn test_unacknowledged_message_is_redelivered() {
        let queue =
            InMemoryQueue::new("events").with_visibility_timeout(Duration::from_millis(20));
        queue.send(b"a", "g", "t").await.unwrap();

        let first = queue.receive(1, NO_WAIT).await.unwrap();
        let again = queue.receive(1, Duration::from_secs(2)).await.unwrap();

        assert_eq!(again.len(), 1);
        assert_eq!(again[0].id, first[0].id);
        assert_ne!(again[0].receipt, first[0].receipt);
        assert_eq!(again[0].attributes.get("receive_count").map(String::as_str), Some("2"));

        // 旧回执已失效
        assert!(queue.acknowledge(&first[0].receipt).await.is_err());
        queue.acknowledge(&again[0].receipt).await.unwrap();
    }
}
