use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use event_worker_core::{
    config::WorkerConfig,
    models::{Envelope, EventMessage},
    traits::{process, ProcessedEvent, QueueTransport},
    EventRegistry, WorkerResult,
};
use futures::{stream, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::dead_letter::{CorrelationAttributes, DeadLetterDelivery, DeadLetterRouter};

/// 分发循环参数
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchSettings {
    pub batch_size: usize,
    pub wait_time: Duration,
    pub receive_backoff: Duration,
    /// 批内并行处理的分组数上限，1 为顺序处理
    pub max_parallel_groups: usize,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self::from(&WorkerConfig::default())
    }
}

impl From<&WorkerConfig> for DispatchSettings {
    fn from(config: &WorkerConfig) -> Self {
        Self {
            batch_size: config.batch_size,
            wait_time: Duration::from_secs(config.wait_time_seconds),
            receive_backoff: Duration::from_secs(config.receive_backoff_seconds),
            max_parallel_groups: config.max_parallel_groups,
        }
    }
}

/// 单条消息的处理结果
#[derive(Debug, Clone, PartialEq)]
pub enum MessageOutcome {
    Processed {
        record_id: String,
    },
    DeadLettered {
        error_kind: &'static str,
        error: String,
        /// 死信投递失败时为空
        delivery: Option<DeadLetterDelivery>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct MessageReport {
    pub message_id: String,
    pub request_id: Option<String>,
    pub outcome: MessageOutcome,
    pub acknowledged: bool,
}

impl MessageReport {
    pub fn is_processed(&self) -> bool {
        matches!(self.outcome, MessageOutcome::Processed { .. })
    }
}

/// 一次拉取-处理周期的结果
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchReport {
    pub received: usize,
    pub messages: Vec<MessageReport>,
    /// 拉取失败时的错误描述
    pub receive_error: Option<String>,
}

impl BatchReport {
    pub fn processed(&self) -> usize {
        self.messages.iter().filter(|m| m.is_processed()).count()
    }

    pub fn dead_lettered(&self) -> usize {
        self.messages.len() - self.processed()
    }

    pub fn dead_letter_failures(&self) -> usize {
        self.messages
            .iter()
            .filter(|m| {
                matches!(
                    m.outcome,
                    MessageOutcome::DeadLettered { delivery: None, .. }
                )
            })
            .count()
    }

    pub fn ack_failures(&self) -> usize {
        self.messages.iter().filter(|m| !m.acknowledged).count()
    }
}

/// 循环运行期间的累计统计
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DispatchStats {
    pub batches: u64,
    pub received: u64,
    pub processed: u64,
    pub dead_lettered: u64,
    pub dead_letter_failures: u64,
    pub ack_failures: u64,
    pub receive_errors: u64,
}

impl DispatchStats {
    pub fn record(&mut self, report: &BatchReport) {
        if report.receive_error.is_some() {
            self.receive_errors += 1;
            return;
        }
        if report.received == 0 {
            return;
        }
        self.batches += 1;
        self.received += report.received as u64;
        self.processed += report.processed() as u64;
        self.dead_lettered += report.dead_lettered() as u64;
        self.dead_letter_failures += report.dead_letter_failures() as u64;
        self.ack_failures += report.ack_failures() as u64;
    }
}

/// 分发循环构建器
pub struct DispatchLoopBuilder {
    source: Arc<dyn QueueTransport>,
    registry: Arc<EventRegistry>,
    dead_letter: DeadLetterRouter,
    settings: DispatchSettings,
}

impl DispatchLoopBuilder {
    pub fn settings(mut self, settings: DispatchSettings) -> Self {
        self.settings = settings;
        self
    }

    /// 设置每批最多拉取的消息数
    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.settings.batch_size = batch_size.max(1);
        self
    }

    /// 设置拉取等待时间
    pub fn wait_time(mut self, wait_time: Duration) -> Self {
        self.settings.wait_time = wait_time;
        self
    }

    /// 设置拉取失败后的退避时间
    pub fn receive_backoff(mut self, receive_backoff: Duration) -> Self {
        self.settings.receive_backoff = receive_backoff;
        self
    }

    /// 设置批内并行分组数
    pub fn max_parallel_groups(mut self, max_parallel_groups: usize) -> Self {
        self.settings.max_parallel_groups = max_parallel_groups.max(1);
        self
    }

    pub fn build(self) -> DispatchLoop {
        DispatchLoop {
            source: self.source,
            registry: self.registry,
            dead_letter: self.dead_letter,
            settings: self.settings,
        }
    }
}

/// 消费-分发-确认循环
///
/// 每条消息的结局只有两种：处理成功后确认，或转入死信后确认。
/// 单条消息的任何错误都不会中断循环或影响同批其他消息。
pub struct DispatchLoop {
    source: Arc<dyn QueueTransport>,
    registry: Arc<EventRegistry>,
    dead_letter: DeadLetterRouter,
    settings: DispatchSettings,
}

impl DispatchLoop {
    pub fn builder(
        source: Arc<dyn QueueTransport>,
        registry: Arc<EventRegistry>,
        dead_letter: DeadLetterRouter,
    ) -> DispatchLoopBuilder {
        DispatchLoopBuilder {
            source,
            registry,
            dead_letter,
            settings: DispatchSettings::default(),
        }
    }

    pub fn settings(&self) -> &DispatchSettings {
        &self.settings
    }

    /// 运行直到取消，返回累计统计
    ///
    /// 取消只打断拉取等待和退避等待，已收到的批次总会处理完毕。
    pub async fn run(&self, cancel: CancellationToken) -> DispatchStats {
        info!(
            batch_size = self.settings.batch_size,
            wait_time_secs = self.settings.wait_time.as_secs(),
            max_parallel_groups = self.settings.max_parallel_groups,
            events = ?self.registry.list_events(),
            "Starting dispatch loop"
        );

        let mut stats = DispatchStats::default();
        loop {
            let received = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!("Received shutdown signal, stopping dispatch loop");
                    break;
                }
                received = self.receive() => received,
            };

            let report = self.complete_batch(received).await;
            stats.record(&report);

            if report.receive_error.is_some() {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        info!("Received shutdown signal during backoff, stopping dispatch loop");
                        break;
                    }
                    _ = tokio::time::sleep(self.settings.receive_backoff) => {}
                }
            }
        }

        info!(
            batches = stats.batches,
            received = stats.received,
            processed = stats.processed,
            dead_lettered = stats.dead_lettered,
            ack_failures = stats.ack_failures,
            receive_errors = stats.receive_errors,
            "Dispatch loop stopped"
        );
        stats
    }

    /// 执行一次拉取和处理
    ///
    /// 拉取失败时不退避，错误记录在返回的报告中。
    pub async fn poll_once(&self) -> BatchReport {
        let received = self.receive().await;
        self.complete_batch(received).await
    }

    async fn receive(&self) -> WorkerResult<Vec<Envelope>> {
        debug!(
            batch_size = self.settings.batch_size,
            wait_time_secs = self.settings.wait_time.as_secs(),
            "Polling source queue"
        );
        self.source
            .receive(self.settings.batch_size, self.settings.wait_time)
            .await
    }

    async fn complete_batch(&self, received: WorkerResult<Vec<Envelope>>) -> BatchReport {
        match received {
            Ok(envelopes) if envelopes.is_empty() => {
                debug!("No messages received");
                BatchReport::default()
            }
            Ok(envelopes) => {
                let received = envelopes.len();
                debug!(message_count = received, "Received message batch");
                let messages = self.process_batch(envelopes).await;
                BatchReport {
                    received,
                    messages,
                    receive_error: None,
                }
            }
            Err(e) => {
                let backoff_secs = self.settings.receive_backoff.as_secs();
                if e.is_transient() {
                    warn!(error = %e, backoff_secs, "Error receiving messages, retrying after backoff");
                } else {
                    error!(error_kind = e.kind(), error = %e, backoff_secs, "Error receiving messages, retrying after backoff");
                }
                BatchReport {
                    receive_error: Some(e.to_string()),
                    ..Default::default()
                }
            }
        }
    }

    /// 处理一批消息，报告按接收顺序返回
    ///
    /// 同一分组内的消息始终按接收顺序逐条处理；不同分组在
    /// `max_parallel_groups` 大于1时并发处理。
    pub async fn process_batch(&self, envelopes: Vec<Envelope>) -> Vec<MessageReport> {
        if self.settings.max_parallel_groups <= 1 || envelopes.len() <= 1 {
            let mut reports = Vec::with_capacity(envelopes.len());
            for envelope in &envelopes {
                reports.push(self.handle_message(envelope).await);
            }
            return reports;
        }

        let total = envelopes.len();
        let groups = partition_by_group(envelopes);
        debug!(
            message_count = total,
            group_count = groups.len(),
            "Processing batch by message group"
        );

        let mut indexed: Vec<(usize, MessageReport)> = stream::iter(groups)
            .map(|group| async move {
                let mut reports = Vec::with_capacity(group.len());
                for (index, envelope) in group {
                    reports.push((index, self.handle_message(&envelope).await));
                }
                reports
            })
            .buffer_unordered(self.settings.max_parallel_groups)
            .collect::<Vec<_>>()
            .await
            .into_iter()
            .flatten()
            .collect();

        indexed.sort_by_key(|(index, _)| *index);
        indexed.into_iter().map(|(_, report)| report).collect()
    }

    /// 处理单条消息：解码、查找处理器、执行并持久化，然后确认或转入死信后确认
    pub async fn handle_message(&self, envelope: &Envelope) -> MessageReport {
        let started = Instant::now();
        info!(
            message_id = %envelope.id,
            group_id = envelope.group_id.as_deref().unwrap_or_default(),
            "Processing message"
        );

        let mut request_id = None;
        let outcome = match self.dispatch(envelope, &mut request_id).await {
            Ok(processed) => {
                info!(
                    message_id = %envelope.id,
                    request_id = request_id.as_deref().unwrap_or_default(),
                    record_id = %processed.record_id,
                    duration_ms = started.elapsed().as_millis() as u64,
                    "Event processed successfully"
                );
                MessageOutcome::Processed {
                    record_id: processed.record_id,
                }
            }
            Err(e) => {
                error!(
                    message_id = %envelope.id,
                    request_id = request_id.as_deref().unwrap_or_default(),
                    error_kind = e.kind(),
                    error = %e,
                    "Handler failed for message, routing to dead-letter queue"
                );
                let attributes = CorrelationAttributes::from_envelope(envelope)
                    .with_request_id(request_id.clone())
                    .with_reason(e.kind());
                let delivery = self.dead_letter.route(&envelope.body, &attributes).await;
                MessageOutcome::DeadLettered {
                    error_kind: e.kind(),
                    error: e.to_string(),
                    delivery,
                }
            }
        };

        let acknowledged = self.acknowledge(envelope, request_id.as_deref()).await;

        MessageReport {
            message_id: envelope.id.clone(),
            request_id,
            outcome,
            acknowledged,
        }
    }

    async fn dispatch(
        &self,
        envelope: &Envelope,
        request_id: &mut Option<String>,
    ) -> WorkerResult<ProcessedEvent> {
        let message = EventMessage::decode(&envelope.body)?;
        *request_id = message.request_id().map(str::to_string);

        info!(
            message_id = %envelope.id,
            event_name = %message.event_name,
            request_id = request_id.as_deref().unwrap_or_default(),
            "Received event"
        );
        debug!(message_id = %envelope.id, event_data = ?message.event_data, "Event data");

        let handler = self.registry.create_handler(&message.event_name)?;
        process(handler.as_ref(), &message.event_data).await
    }

    /// 确认失败只记录日志，由队列的重新投递机制兜底
    async fn acknowledge(&self, envelope: &Envelope, request_id: Option<&str>) -> bool {
        match self.source.acknowledge(&envelope.receipt).await {
            Ok(()) => {
                info!(
                    message_id = %envelope.id,
                    request_id = request_id.unwrap_or_default(),
                    "Deleted message"
                );
                true
            }
            Err(e) => {
                warn!(
                    message_id = %envelope.id,
                    request_id = request_id.unwrap_or_default(),
                    receipt = %envelope.receipt,
                    error_kind = e.kind(),
                    error = %e,
                    "Failed to delete message, relying on queue redelivery"
                );
                false
            }
        }
    }
}

/// 按分组键拆分批次，分组按首次出现的顺序排列，组内保持接收顺序
///
/// 没有分组键的消息共用一个隐式分组。
fn partition_by_group(envelopes: Vec<Envelope>) -> Vec<Vec<(usize, Envelope)>> {
    let mut positions: HashMap<Option<String>, usize> = HashMap::new();
    let mut groups: Vec<Vec<(usize, Envelope)>> = Vec::new();

    for (index, envelope) in envelopes.into_iter().enumerate() {
        let slot = *positions
            .entry(envelope.group_id.clone())
            .or_insert_with(|| {
                groups.push(Vec::new());
                groups.len() - 1
            });
        groups[slot].push((index, envelope));
    }

    groups
}
