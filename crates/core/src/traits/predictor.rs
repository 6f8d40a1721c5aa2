use async_trait::async_trait;

use crate::{
    models::{PredictionInput, PredictionResult},
    WorkerResult,
};

/// 废弃量预测能力，视为无副作用的黑盒
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait WastePredictor: Send + Sync {
    async fn predict(&self, input: &PredictionInput) -> WorkerResult<PredictionResult>;
}
