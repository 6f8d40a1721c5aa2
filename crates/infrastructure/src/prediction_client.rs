use std::time::Duration;

use async_trait::async_trait;
use event_worker_core::{
    config::PredictorConfig,
    models::{PredictionInput, PredictionResult},
    traits::WastePredictor,
    WorkerError, WorkerResult,
};
use serde_json::Value;
use tracing::debug;

/// 通过HTTP调用外部模型服务的预测器
///
/// 以JSON POST发送六个输入参数，响应体必须是JSON对象。
#[derive(Clone)]
pub struct HttpWastePredictor {
    endpoint: String,
    client: reqwest::Client,
}

impl HttpWastePredictor {
    pub fn new(config: &PredictorConfig) -> WorkerResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| WorkerError::Configuration(format!("创建HTTP客户端失败: {e}")))?;

        Ok(Self {
            endpoint: config.endpoint.clone(),
            client,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl WastePredictor for HttpWastePredictor {
    async fn predict(&self, input: &PredictionInput) -> WorkerResult<PredictionResult> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(input)
            .send()
            .await
            .map_err(|e| WorkerError::Execution(format!("预测服务请求失败: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(WorkerError::Execution(format!(
                "预测服务返回错误 ({status}): {body}"
            )));
        }

        let value: Value = response
            .json()
            .await
            .map_err(|e| WorkerError::Execution(format!("预测服务响应无法解析: {e}")))?;

        match value {
            Value::Object(result) => {
                debug!(endpoint = %self.endpoint, fields = result.len(), "Prediction received");
                Ok(result)
            }
            other => Err(WorkerError::Execution(format!(
                "预测服务响应不是JSON对象: {other}"
            ))),
        }
    }
}
