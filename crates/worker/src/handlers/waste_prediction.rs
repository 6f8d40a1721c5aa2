use std::sync::Arc;

use async_trait::async_trait;
use event_worker_core::{
    models::{
        request_id_of, EventData, PredictionRequest, RecordMetadata, StoredRecord,
        TOTAL_WASTE_FIELD,
    },
    traits::{EventHandler, HandlerContext, HandlerOutput, RecordStore, WastePredictor},
    ValidationError, WorkerError, WorkerResult,
};
use serde_json::Value;
use tracing::{info, warn};

use super::WASTE_PREDICTION_EVENT;

/// 预测结果写入的集合
pub const WASTE_PREDICTIONS_COLLECTION: &str = "waste_predictions";

/// 写入记录元数据的处理器版本
pub const PROCESSOR_VERSION: &str = "1.0.0";

/// 废弃量预测处理器
///
/// execute 校验六个输入参数和 `metadata.request_id` 后调用预测能力；
/// persist 把原始输入、预测结果和元数据写成一条记录。
pub struct WastePredictionHandler {
    store: Arc<dyn RecordStore>,
    predictor: Arc<dyn WastePredictor>,
}

impl WastePredictionHandler {
    pub fn new(context: &HandlerContext) -> Self {
        Self {
            store: Arc::clone(&context.store),
            predictor: Arc::clone(&context.predictor),
        }
    }
}

#[async_trait]
impl EventHandler for WastePredictionHandler {
    fn name(&self) -> &'static str {
        "waste_prediction"
    }

    async fn execute(&self, event_data: &EventData) -> WorkerResult<HandlerOutput> {
        let request = PredictionRequest::from_event_data(event_data).map_err(|e| {
            warn!(
                request_id = request_id_of(event_data).unwrap_or_default(),
                missing = ?e.missing,
                invalid = ?e.invalid,
                "Prediction request failed validation"
            );
            WorkerError::Validation(e)
        })?;

        info!(request_id = %request.request_id, "Running waste prediction");
        let result = self.predictor.predict(&request.input).await?;

        match result.get(TOTAL_WASTE_FIELD).and_then(Value::as_f64) {
            Some(total) if total.is_finite() && total >= 0.0 => {
                info!(
                    request_id = %request.request_id,
                    total_waste_kg = total,
                    "Waste prediction completed"
                );
                Ok(result)
            }
            Some(total) => Err(WorkerError::Execution(format!(
                "预测结果 {TOTAL_WASTE_FIELD} 取值非法: {total}"
            ))),
            None => Err(WorkerError::Execution(format!(
                "预测结果缺少数值字段 {TOTAL_WASTE_FIELD}"
            ))),
        }
    }

    async fn persist(&self, event_data: &EventData, output: &HandlerOutput) -> WorkerResult<String> {
        let request_id = request_id_of(event_data).ok_or_else(|| {
            let mut err = ValidationError::new();
            err.missing("metadata.request_id");
            WorkerError::Validation(err)
        })?;

        let record = StoredRecord::new(
            PredictionRequest::raw_input_parameters(event_data),
            output.clone(),
            RecordMetadata {
                event_type: WASTE_PREDICTION_EVENT.to_string(),
                processor_version: PROCESSOR_VERSION.to_string(),
                request_id: request_id.to_string(),
            },
        );

        let record_id = self
            .store
            .insert(WASTE_PREDICTIONS_COLLECTION, &record)
            .await
            .map_err(|e| match e {
                WorkerError::Persistence(_) => e,
                other => WorkerError::Persistence(other.to_string()),
            })?;

        info!(
            request_id = %request_id,
            record_id = %record_id,
            collection = WASTE_PREDICTIONS_COLLECTION,
            "Prediction stored"
        );
        Ok(record_id)
    }
}
