pub mod event_handler;
pub mod predictor;
pub mod queue_transport;
pub mod record_store;

pub use event_handler::*;
pub use predictor::*;
pub use queue_transport::*;
pub use record_store::*;
