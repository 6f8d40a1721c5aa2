pub mod dead_letter;
pub mod dispatch_loop;
pub mod handlers;

pub use dead_letter::{
    CorrelationAttributes, DeadLetterDelivery, DeadLetterRouter, DEFAULT_DEAD_LETTER_GROUP,
};
pub use dispatch_loop::{
    BatchReport, DispatchLoop, DispatchLoopBuilder, DispatchSettings, DispatchStats,
    MessageOutcome, MessageReport,
};
pub use handlers::{
    build_default_registry, register_default_handlers, WastePredictionHandler,
    PROCESSOR_VERSION, WASTE_PREDICTIONS_COLLECTION, WASTE_PREDICTION_EVENT,
};
