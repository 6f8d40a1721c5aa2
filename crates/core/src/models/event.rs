use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::{WorkerError, WorkerResult};

/// 事件负载
pub type EventData = Map<String, Value>;

/// 从消息体解码出的事件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventMessage {
    pub event_name: String,
    pub event_data: EventData,
}

impl EventMessage {
    pub fn new(event_name: impl Into<String>, event_data: EventData) -> Self {
        Self {
            event_name: event_name.into(),
            event_data,
        }
    }

    /// 解码消息体
    ///
    /// 消息体必须是UTF-8编码的JSON对象，`eventName` 必须是非空字符串，
    /// `eventData` 必须是非空对象，否则返回 `Decode` 错误而不是panic。
    pub fn decode(body: impl AsRef<[u8]>) -> WorkerResult<Self> {
        let text = std::str::from_utf8(body.as_ref())
            .map_err(|e| WorkerError::Decode(format!("消息体不是合法UTF-8: {e}")))?;
        let value: Value = serde_json::from_str(text)
            .map_err(|e| WorkerError::Decode(format!("消息体不是合法JSON: {e}")))?;

        let mut object = match value {
            Value::Object(object) => object,
            other => {
                return Err(WorkerError::Decode(format!(
                    "消息体必须是JSON对象，实际为: {}",
                    json_type_name(&other)
                )))
            }
        };

        let event_name = match object.remove("eventName") {
            Some(Value::String(name)) if !name.trim().is_empty() => name,
            Some(Value::Null) | None => {
                return Err(WorkerError::Decode("缺少 'eventName'".to_string()))
            }
            Some(Value::String(_)) => {
                return Err(WorkerError::Decode("'eventName' 不能为空".to_string()))
            }
            Some(other) => {
                return Err(WorkerError::Decode(format!(
                    "'eventName' 必须是字符串，实际为: {}",
                    json_type_name(&other)
                )))
            }
        };

        let event_data = match object.remove("eventData") {
            Some(Value::Object(data)) if !data.is_empty() => data,
            Some(Value::Null) | None => {
                return Err(WorkerError::Decode("缺少 'eventData'".to_string()))
            }
            Some(Value::Object(_)) => {
                return Err(WorkerError::Decode("'eventData' 不能为空".to_string()))
            }
            Some(other) => {
                return Err(WorkerError::Decode(format!(
                    "'eventData' 必须是JSON对象，实际为: {}",
                    json_type_name(&other)
                )))
            }
        };

        Ok(Self {
            event_name,
            event_data,
        })
    }

    /// 编码为消息体
    pub fn encode(&self) -> WorkerResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// 尽力提取调用方提供的关联ID
    pub fn request_id(&self) -> Option<&str> {
        request_id_of(&self.event_data)
    }
}

/// 从事件负载中读取 `metadata.request_id`
pub fn request_id_of(event_data: &EventData) -> Option<&str> {
    event_data
        .get("metadata")
        .and_then(Value::as_object)
        .and_then(|metadata| metadata.get("request_id"))
        .and_then(Value::as_str)
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
