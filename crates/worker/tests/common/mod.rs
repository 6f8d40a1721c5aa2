#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use event_worker_core::{
    models::{PredictionInput, PredictionResult},
    traits::{HandlerContext, QueueTransport, RecordStore, WastePredictor},
    WorkerResult,
};
use event_worker_infrastructure::{InMemoryQueue, InMemoryRecordStore};
use event_worker_worker::{build_default_registry, DeadLetterRouter, DispatchLoop};
use serde_json::{json, Value};
use tokio::sync::Mutex;

pub const NO_WAIT: Duration = Duration::from_millis(0);

/// 返回固定结果并记录每次调用参数的预测器
pub struct FixedPredictor {
    total: f64,
    delay: Duration,
    calls: Mutex<Vec<PredictionInput>>,
}

impl FixedPredictor {
    pub fn new(total: f64) -> Self {
        Self {
            total,
            delay: Duration::ZERO,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub async fn calls(&self) -> Vec<PredictionInput> {
        self.calls.lock().await.clone()
    }
}

#[async_trait]
impl WastePredictor for FixedPredictor {
    async fn predict(&self, input: &PredictionInput) -> WorkerResult<PredictionResult> {
        self.calls.lock().await.push(input.clone());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let mut result = PredictionResult::new();
        result.insert("Total_Waste_kg".to_string(), json!(self.total));
        result.insert("model_version".to_string(), json!("stub"));
        Ok(result)
    }
}

pub struct Harness {
    pub source: InMemoryQueue,
    pub dead_letter: InMemoryQueue,
    pub store: Arc<InMemoryRecordStore>,
    pub predictor: Arc<FixedPredictor>,
    pub dispatch: DispatchLoop,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_options(1, FixedPredictor::new(1234.5), NO_WAIT)
    }

    /// 拉取会真实等待的版本，用于运行循环的测试
    pub fn waiting(wait_time: Duration) -> Self {
        Self::with_options(1, FixedPredictor::new(1234.5), wait_time)
    }

    pub fn with_options(
        max_parallel_groups: usize,
        predictor: FixedPredictor,
        wait_time: Duration,
    ) -> Self {
        let source = InMemoryQueue::new("events.fifo");
        let dead_letter = InMemoryQueue::new("events-dlq.fifo");
        let store = Arc::new(InMemoryRecordStore::new());
        let predictor = Arc::new(predictor);

        let context = HandlerContext::new(
            store.clone() as Arc<dyn RecordStore>,
            predictor.clone() as Arc<dyn WastePredictor>,
        );
        let registry = Arc::new(build_default_registry(context));
        let router = DeadLetterRouter::new(Arc::new(dead_letter.clone()));

        let dispatch = DispatchLoop::builder(
            Arc::new(source.clone()) as Arc<dyn QueueTransport>,
            registry,
            router,
        )
        .batch_size(10)
        .wait_time(wait_time)
        .receive_backoff(Duration::from_millis(10))
        .max_parallel_groups(max_parallel_groups)
        .build();

        Self {
            source,
            dead_letter,
            store,
            predictor,
            dispatch,
        }
    }

    pub async fn enqueue(&self, body: &str, group: &str) -> String {
        self.enqueue_raw(body.as_bytes(), group).await
    }

    pub async fn enqueue_raw(&self, body: &[u8], group: &str) -> String {
        self.source
            .send(body, group, &uuid::Uuid::new_v4().to_string())
            .await
            .unwrap()
    }
}

pub fn prediction_data(request_id: &str) -> Value {
    json!({
        "production_volume": 50000,
        "rain_sum": 200,
        "temperature_mean": 28,
        "humidity_mean": 85,
        "wind_speed_mean": 15,
        "month": 6,
        "metadata": {"request_id": request_id}
    })
}

pub fn event_body(event_name: &str, event_data: Value) -> String {
    json!({"eventName": event_name, "eventData": event_data}).to_string()
}

pub fn prediction_body(request_id: &str) -> String {
    event_body("WASTE/PREDICTION", prediction_data(request_id))
}
