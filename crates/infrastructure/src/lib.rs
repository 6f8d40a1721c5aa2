pub mod database;
mod dedup;
pub mod in_memory_queue;
pub mod message_queue;
pub mod message_queue_factory;
pub mod prediction_client;
pub mod redis_stream;

pub use database::*;
pub use in_memory_queue::InMemoryQueue;
pub use message_queue::{connect_rabbitmq, RabbitMqTransport, GROUP_ID_HEADER};
pub use message_queue_factory::{MessageQueueFactory, QueuePair};
pub use prediction_client::HttpWastePredictor;
pub use redis_stream::RedisStreamTransport;
