pub mod config;
pub mod errors;
pub mod event_registry;
pub mod models;
pub mod traits;

pub use crate::config::{AppConfig, MessageQueueType};
pub use errors::{ValidationError, WorkerError, WorkerResult};
pub use event_registry::{EventRegistry, HandlerFactory};
pub use models::*;
pub use traits::*;
