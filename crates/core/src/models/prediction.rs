use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::ValidationError;
use crate::models::event::EventData;

/// 预测结果中总废弃量字段
pub const TOTAL_WASTE_FIELD: &str = "Total_Waste_kg";

/// 预测所需的六个输入字段，按校验顺序排列
pub const PREDICTION_FIELDS: [&str; 6] = [
    "production_volume",
    "rain_sum",
    "temperature_mean",
    "humidity_mean",
    "wind_speed_mean",
    "month",
];

/// 预测模型返回的不透明结果
pub type PredictionResult = Map<String, Value>;

/// 传给预测模型的六个参数
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionInput {
    pub production_volume: f64,
    pub rain_sum: f64,
    pub temperature_mean: f64,
    pub humidity_mean: f64,
    pub wind_speed_mean: f64,
    pub month: u32,
}

/// 经过校验的废弃量预测请求
#[derive(Debug, Clone, PartialEq)]
pub struct PredictionRequest {
    pub input: PredictionInput,
    pub request_id: String,
}

impl PredictionRequest {
    /// 从事件负载中解析请求
    ///
    /// 全部字段检查完毕后才返回错误，错误中包含每一个缺失或非法的字段名。
    pub fn from_event_data(data: &EventData) -> Result<Self, ValidationError> {
        let mut errors = ValidationError::new();

        let production_volume = read_number(data, "production_volume", &mut errors, |v| v >= 0.0);
        let rain_sum = read_number(data, "rain_sum", &mut errors, |v| v >= 0.0);
        let temperature_mean = read_number(data, "temperature_mean", &mut errors, |_| true);
        let humidity_mean = read_number(data, "humidity_mean", &mut errors, |v| {
            (0.0..=100.0).contains(&v)
        });
        let wind_speed_mean = read_number(data, "wind_speed_mean", &mut errors, |v| v >= 0.0);
        let month = read_month(data, &mut errors);
        let request_id = read_request_id(data, &mut errors);

        errors.into_result()?;

        // into_result 通过时所有字段都已解析成功
        match (
            production_volume,
            rain_sum,
            temperature_mean,
            humidity_mean,
            wind_speed_mean,
            month,
            request_id,
        ) {
            (
                Some(production_volume),
                Some(rain_sum),
                Some(temperature_mean),
                Some(humidity_mean),
                Some(wind_speed_mean),
                Some(month),
                Some(request_id),
            ) => Ok(Self {
                input: PredictionInput {
                    production_volume,
                    rain_sum,
                    temperature_mean,
                    humidity_mean,
                    wind_speed_mean,
                    month,
                },
                request_id,
            }),
            _ => Err(ValidationError::default()),
        }
    }

    /// 原样拷贝六个输入字段，用于持久化
    pub fn raw_input_parameters(data: &EventData) -> Map<String, Value> {
        PREDICTION_FIELDS
            .iter()
            .map(|field| {
                (
                    field.to_string(),
                    data.get(*field).cloned().unwrap_or(Value::Null),
                )
            })
            .collect()
    }
}

/// 数值字段可以是JSON数字，也可以是能解析为数字的字符串
fn coerce_number(value: &Value) -> Option<f64> {
    let number = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    number.filter(|v| v.is_finite())
}

fn read_number(
    data: &EventData,
    field: &str,
    errors: &mut ValidationError,
    in_range: impl Fn(f64) -> bool,
) -> Option<f64> {
    match data.get(field) {
        None | Some(Value::Null) => {
            errors.missing(field);
            None
        }
        Some(value) => match coerce_number(value) {
            Some(v) if in_range(v) => Some(v),
            _ => {
                errors.invalid(field);
                None
            }
        },
    }
}

fn read_month(data: &EventData, errors: &mut ValidationError) -> Option<u32> {
    match data.get("month") {
        None | Some(Value::Null) => {
            errors.missing("month");
            None
        }
        Some(value) => match coerce_number(value) {
            Some(v) if v.fract() == 0.0 && (1.0..=12.0).contains(&v) => Some(v as u32),
            _ => {
                errors.invalid("month");
                None
            }
        },
    }
}

fn read_request_id(data: &EventData, errors: &mut ValidationError) -> Option<String> {
    let metadata = match data.get("metadata") {
        None | Some(Value::Null) => {
            errors.missing("metadata.request_id");
            return None;
        }
        Some(Value::Object(metadata)) => metadata,
        Some(_) => {
            errors.invalid("metadata");
            return None;
        }
    };

    match metadata.get("request_id") {
        None | Some(Value::Null) => {
            errors.missing("metadata.request_id");
            None
        }
        Some(Value::String(id)) if !id.trim().is_empty() => Some(id.clone()),
        Some(_) => {
            errors.invalid("metadata.request_id");
            None
        }
    }
}
