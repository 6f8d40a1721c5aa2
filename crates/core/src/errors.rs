use std::fmt;

use thiserror::Error;

/// Worker错误类型定义
///
/// 除 `TransportTransient` 外，所有按消息产生的错误都只终结当前消息（转入死信），
/// 不会终止消费循环。
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("消息队列暂时不可用: {0}")]
    TransportTransient(String),

    #[error("消息队列错误: {0}")]
    Transport(String),

    #[error("消息解码失败: {0}")]
    Decode(String),

    #[error("参数校验失败: {0}")]
    Validation(ValidationError),

    #[error("未找到事件 '{event_name}' 的处理器，已注册事件: {}", .available.join(", "))]
    UnknownEvent {
        event_name: String,
        available: Vec<String>,
    },

    #[error("事件执行失败: {0}")]
    Execution(String),

    #[error("持久化失败: {0}")]
    Persistence(String),

    #[error("死信投递失败: {0}")]
    DeadLetterRouting(String),

    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    #[error("配置错误: {0}")]
    Configuration(String),

    #[error("序列化错误: {0}")]
    Serialization(String),
}

impl WorkerError {
    /// 稳定的错误类别标识，用于结构化日志
    pub fn kind(&self) -> &'static str {
        match self {
            WorkerError::TransportTransient(_) => "transport_transient",
            WorkerError::Transport(_) => "transport",
            WorkerError::Decode(_) => "decode",
            WorkerError::Validation(_) => "validation",
            WorkerError::UnknownEvent { .. } => "unknown_event",
            WorkerError::Execution(_) => "execution",
            WorkerError::Persistence(_) => "persistence",
            WorkerError::DeadLetterRouting(_) => "dead_letter_routing",
            WorkerError::Database(_) => "database",
            WorkerError::Configuration(_) => "configuration",
            WorkerError::Serialization(_) => "serialization",
        }
    }

    /// 是否可以通过退避重试恢复
    pub fn is_transient(&self) -> bool {
        matches!(self, WorkerError::TransportTransient(_))
    }
}

impl From<ValidationError> for WorkerError {
    fn from(err: ValidationError) -> Self {
        WorkerError::Validation(err)
    }
}

impl From<serde_json::Error> for WorkerError {
    fn from(err: serde_json::Error) -> Self {
        WorkerError::Serialization(err.to_string())
    }
}

/// 字段校验结果
///
/// 收集全部缺失字段和全部非法字段后一次性报告。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationError {
    pub missing: Vec<String>,
    pub invalid: Vec<String>,
}

impl ValidationError {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn missing(&mut self, field: impl Into<String>) {
        self.missing.push(field.into());
    }

    pub fn invalid(&mut self, field: impl Into<String>) {
        self.invalid.push(field.into());
    }

    pub fn is_empty(&self) -> bool {
        self.missing.is_empty() && self.invalid.is_empty()
    }

    /// 没有任何问题时返回Ok
    pub fn into_result(self) -> Result<(), ValidationError> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }

    /// 字段名是否出现在缺失或非法列表中
    pub fn mentions(&self, field: &str) -> bool {
        self.missing.iter().chain(self.invalid.iter()).any(|f| f == field)
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if !self.missing.is_empty() {
            parts.push(format!("缺少必填字段: {}", self.missing.join(", ")));
        }
        if !self.invalid.is_empty() {
            parts.push(format!("字段取值非法: {}", self.invalid.join(", ")));
        }
        if parts.is_empty() {
            return write!(f, "未知校验错误");
        }
        write!(f, "{}", parts.join("; "))
    }
}

impl std::error::Error for ValidationError {}

/// 统一的Result类型
pub type WorkerResult<T> = std::result::Result<T, WorkerError>;
