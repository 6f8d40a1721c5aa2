pub mod envelope;
pub mod event;
pub mod prediction;
pub mod record;

pub use envelope::{Envelope, ReceiptToken};
pub use event::{request_id_of, EventData, EventMessage};
pub use prediction::{
    PredictionInput, PredictionRequest, PredictionResult, PREDICTION_FIELDS, TOTAL_WASTE_FIELD,
};
pub use record::{RecordMetadata, StoredRecord};
