use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::{debug, error};

use crate::{
    models::EventData,
    traits::{RecordStore, WastePredictor},
    WorkerResult,
};

/// 处理器执行结果
pub type HandlerOutput = Map<String, Value>;

/// 构造处理器时注入的共享依赖
///
/// 存储句柄在进程启动时创建一次，所有处理器实例共用。
#[derive(Clone)]
pub struct HandlerContext {
    pub store: Arc<dyn RecordStore>,
    pub predictor: Arc<dyn WastePredictor>,
}

impl HandlerContext {
    pub fn new(store: Arc<dyn RecordStore>, predictor: Arc<dyn WastePredictor>) -> Self {
        Self { store, predictor }
    }
}

/// 事件处理器接口，每种事件类型一个实现
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// 处理器名称，用于日志
    fn name(&self) -> &'static str;

    /// 校验并执行领域计算，失败时不得写入任何持久化数据
    async fn execute(&self, event_data: &EventData) -> WorkerResult<HandlerOutput>;

    /// 写入且仅写入一条持久化记录，返回记录ID
    async fn persist(&self, event_data: &EventData, output: &HandlerOutput) -> WorkerResult<String>;
}

/// 一次成功处理的结果
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessedEvent {
    pub output: HandlerOutput,
    pub record_id: String,
}

/// 依次执行 execute 和 persist
///
/// 任一步骤失败时错误原样返回；persist 仅在 execute 成功后调用。
/// persist 失败时结果视为丢失，调用方必须按失败处理该消息。
pub async fn process(handler: &dyn EventHandler, event_data: &EventData) -> WorkerResult<ProcessedEvent> {
    debug!(handler = handler.name(), "Executing event handler");

    let output = handler.execute(event_data).await.map_err(|e| {
        error!(handler = handler.name(), error_kind = e.kind(), error = %e, "Event execution failed");
        e
    })?;

    let record_id = handler.persist(event_data, &output).await.map_err(|e| {
        error!(handler = handler.name(), error_kind = e.kind(), error = %e, "Failed to persist event result");
        e
    })?;

    debug!(handler = handler.name(), record_id = %record_id, "Event result persisted");
    Ok(ProcessedEvent { output, record_id })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::WorkerError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingHandler {
        fail_execute: bool,
        fail_persist: bool,
        persisted: AtomicUsize,
    }

    impl CountingHandler {
        fn new(fail_execute: bool, fail_persist: bool) -> Self {
            Self {
                fail_execute,
                fail_persist,
                persisted: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl EventHandler for CountingHandler {
        fn name(&self) -> &'static str {
            "counting"
        }

        async fn execute(&self, event_data: &EventData) -> WorkerResult<HandlerOutput> {
            if self.fail_execute {
                return Err(WorkerError::Execution("boom".to_string()));
            }
            Ok(event_data.clone())
        }

        async fn persist(&self, _event_data: &EventData, _output: &HandlerOutput) -> WorkerResult<String> {
            if self.fail_persist {
                return Err(WorkerError::Persistence("disk full".to_string()));
            }
            let n = self.persisted.fetch_add(1, Ordering::SeqCst);
            Ok(format!("record-{n}"))
        }
    }

    fn data() -> EventData {
        let mut data = EventData::new();
        data.insert("k".to_string(), Value::from(1));
        data
    }

    #[tokio::test]
    async fn test_process_runs_execute_then_persist() {
        let handler = CountingHandler::new(false, false);
        let processed = process(&handler, &data()).await.unwrap();

        assert_eq!(processed.record_id, "record-0");
        assert_eq!(processed.output, data());
        assert_eq!(handler.persisted.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_execute_failure_skips_persist() {
        let handler = CountingHandler::new(true, false);
        let err = process(&handler, &data()).await.unwrap_err();

        assert!(matches!(err, WorkerError::Execution(_)));
        assert_eq!(handler.persisted.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_persist_failure_propagates_unchanged() {
        let handler = CountingHandler::new(false, true);
        let err = process(&handler, &data()).await.unwrap_err();

        assert!(matches!(err, WorkerError::Persistence(ref m) if m == "disk full"));
    }
}
