use std::sync::Arc;
use std::time::Duration;

use event_worker_core::{
    config::{MessageQueueConfig, MessageQueueType},
    traits::QueueTransport,
    WorkerError, WorkerResult,
};
use tracing::{debug, info};

use crate::{connect_rabbitmq, InMemoryQueue, RabbitMqTransport, RedisStreamTransport};

/// 源队列与死信队列
#[derive(Clone)]
pub struct QueuePair {
    pub source: Arc<dyn QueueTransport>,
    pub dead_letter: Arc<dyn QueueTransport>,
}

pub struct MessageQueueFactory;

impl MessageQueueFactory {
    /// 按配置创建源队列和死信队列的传输实例
    pub async fn create(config: &MessageQueueConfig) -> WorkerResult<QueuePair> {
        Self::validate_config(config)?;
        debug!("Creating message queue with type: {:?}", config.r#type);

        match config.r#type {
            MessageQueueType::Rabbitmq => {
                info!("Initializing RabbitMQ message queue");
                let connection = connect_rabbitmq(config).await?;
                let source =
                    RabbitMqTransport::new(connection.clone(), config, &config.source_queue)
                        .await?;
                let dead_letter =
                    RabbitMqTransport::new(connection, config, &config.dead_letter_queue).await?;
                Ok(QueuePair {
                    source: Arc::new(source),
                    dead_letter: Arc::new(dead_letter),
                })
            }
            MessageQueueType::RedisStream => {
                info!("Initializing Redis Stream message queue");
                let consumer = Self::consumer_name(config);
                let source =
                    RedisStreamTransport::connect(config, &config.source_queue, &consumer).await?;
                let dead_letter =
                    RedisStreamTransport::connect(config, &config.dead_letter_queue, &consumer)
                        .await?;
                Ok(QueuePair {
                    source: Arc::new(source),
                    dead_letter: Arc::new(dead_letter),
                })
            }
            MessageQueueType::InMemory => {
                info!("Initializing in-memory message queue");
                let window = Duration::from_secs(config.dedup_window_seconds);
                Ok(QueuePair {
                    source: Arc::new(
                        InMemoryQueue::new(&config.source_queue).with_dedup_window(window),
                    ),
                    dead_letter: Arc::new(
                        InMemoryQueue::new(&config.dead_letter_queue).with_dedup_window(window),
                    ),
                })
            }
        }
    }

    /// 未配置消费者名称时使用主机名
    pub fn consumer_name(config: &MessageQueueConfig) -> String {
        if !config.consumer_name.is_empty() {
            return config.consumer_name.clone();
        }
        hostname::get()
            .ok()
            .and_then(|name| name.into_string().ok())
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| "event-worker".to_string())
    }

    pub fn validate_config(config: &MessageQueueConfig) -> WorkerResult<()> {
        config
            .validate()
            .map_err(|e| WorkerError::Configuration(e.to_string()))
    }

    pub fn get_type_string(queue_type: &MessageQueueType) -> &'static str {
        queue_type.as_str()
    }

    pub fn parse_type_string(type_str: &str) -> WorkerResult<MessageQueueType> {
        match type_str.to_lowercase().as_str() {
            "rabbitmq" => Ok(MessageQueueType::Rabbitmq),
            "redis_stream" => Ok(MessageQueueType::RedisStream),
            "in_memory" => Ok(MessageQueueType::InMemory),
            _ => Err(WorkerError::Configuration(format!(
                "不支持的消息队列类型: {type_str}，支持的类型: rabbitmq, redis_stream, in_memory"
            ))),
        }
    }
}
