pub mod app_config;
pub mod database;
pub mod message_queue;
pub mod observability;
pub mod predictor;
pub mod worker;

pub use app_config::AppConfig;
pub use database::DatabaseConfig;
pub use message_queue::{MessageQueueConfig, MessageQueueType};
pub use observability::ObservabilityConfig;
pub use predictor::PredictorConfig;
pub use worker::{WorkerConfig, MAX_WAIT_TIME_SECONDS};
