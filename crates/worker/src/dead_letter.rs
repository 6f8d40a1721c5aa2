use std::sync::Arc;

use event_worker_core::{models::Envelope, traits::QueueTransport, WorkerError, WorkerResult};
use tracing::{error, info};

/// 原消息没有分组键时使用的默认分组
pub const DEFAULT_DEAD_LETTER_GROUP: &str = "dlq-group";

/// 随死信一起记录的关联信息
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CorrelationAttributes {
    pub message_id: Option<String>,
    pub group_id: Option<String>,
    pub request_id: Option<String>,
    /// 失败原因类别，对应 `WorkerError::kind`
    pub reason: Option<String>,
}

impl CorrelationAttributes {
    pub fn from_envelope(envelope: &Envelope) -> Self {
        Self {
            message_id: Some(envelope.id.clone()),
            group_id: envelope.group_id.clone(),
            ..Default::default()
        }
    }

    pub fn with_request_id(mut self, request_id: Option<String>) -> Self {
        self.request_id = request_id;
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

/// 一次成功的死信投递
#[derive(Debug, Clone, PartialEq)]
pub struct DeadLetterDelivery {
    pub dedup_token: String,
    pub message_id: String,
    pub group_id: String,
}

/// 死信路由器
///
/// 把原始消息体原样发送到死信队列，每次投递使用新的去重令牌。
pub struct DeadLetterRouter {
    transport: Arc<dyn QueueTransport>,
    default_group: String,
}

impl DeadLetterRouter {
    pub fn new(transport: Arc<dyn QueueTransport>) -> Self {
        Self::with_default_group(transport, DEFAULT_DEAD_LETTER_GROUP)
    }

    pub fn with_default_group(
        transport: Arc<dyn QueueTransport>,
        default_group: impl Into<String>,
    ) -> Self {
        Self {
            transport,
            default_group: default_group.into(),
        }
    }

    pub fn default_group(&self) -> &str {
        &self.default_group
    }

    /// 发送到死信队列，失败只记录日志
    ///
    /// 返回 `None` 表示投递失败，调用方仍需确认原消息。
    pub async fn route(
        &self,
        body: &[u8],
        attributes: &CorrelationAttributes,
    ) -> Option<DeadLetterDelivery> {
        match self.try_route(body, attributes).await {
            Ok(delivery) => Some(delivery),
            Err(e) => {
                error!(
                    message_id = attributes.message_id.as_deref().unwrap_or_default(),
                    request_id = attributes.request_id.as_deref().unwrap_or_default(),
                    error = %e,
                    "Failed to send message to dead-letter queue"
                );
                None
            }
        }
    }

    /// 发送到死信队列，失败时返回 `DeadLetterRouting`
    pub async fn try_route(
        &self,
        body: &[u8],
        attributes: &CorrelationAttributes,
    ) -> WorkerResult<DeadLetterDelivery> {
        let group_id = attributes
            .group_id
            .as_deref()
            .filter(|group| !group.is_empty())
            .unwrap_or(self.default_group.as_str())
            .to_string();
        let dedup_token = uuid::Uuid::new_v4().to_string();

        let message_id = self
            .transport
            .send(body, &group_id, &dedup_token)
            .await
            .map_err(|e| WorkerError::DeadLetterRouting(e.to_string()))?;

        info!(
            message_id = attributes.message_id.as_deref().unwrap_or_default(),
            request_id = attributes.request_id.as_deref().unwrap_or_default(),
            reason = attributes.reason.as_deref().unwrap_or_default(),
            dead_letter_message_id = %message_id,
            dedup_token = %dedup_token,
            group_id = %group_id,
            "Sent message to dead-letter queue"
        );

        Ok(DeadLetterDelivery {
            dedup_token,
            message_id,
            group_id,
        })
    }
}
