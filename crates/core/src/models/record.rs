use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// 持久化记录的元数据
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordMetadata {
    pub event_type: String,
    pub processor_version: String,
    pub request_id: String,
}

/// 每个成功执行的事件写入一条，只追加，不修改不删除
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRecord {
    pub timestamp: DateTime<Utc>,
    pub input_parameters: Map<String, Value>,
    pub prediction_result: Map<String, Value>,
    pub metadata: RecordMetadata,
}

impl StoredRecord {
    pub fn new(
        input_parameters: Map<String, Value>,
        prediction_result: Map<String, Value>,
        metadata: RecordMetadata,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            input_parameters,
            prediction_result,
            metadata,
        }
    }
}
