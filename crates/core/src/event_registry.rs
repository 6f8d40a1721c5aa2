use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use tracing::{debug, error, info};

use crate::{
    traits::{EventHandler, HandlerContext},
    WorkerError, WorkerResult,
};

/// 处理器工厂：每次分发都用共享上下文构造一个新的处理器实例
pub type HandlerFactory = Arc<dyn Fn(&HandlerContext) -> Box<dyn EventHandler> + Send + Sync>;

/// 事件名到处理器工厂的映射
///
/// 启动阶段通过 `register` 填充（需要 `&mut`），之后包在 `Arc` 中供分发循环只读使用。
pub struct EventRegistry {
    context: HandlerContext,
    factories: HashMap<String, HandlerFactory>,
}

impl EventRegistry {
    pub fn new(context: HandlerContext) -> Self {
        Self {
            context,
            factories: HashMap::new(),
        }
    }

    /// 注册或覆盖事件处理器
    pub fn register(&mut self, event_name: impl Into<String>, factory: HandlerFactory) {
        let event_name = event_name.into();
        if self.factories.insert(event_name.clone(), factory).is_some() {
            info!(event_name = %event_name, "Replaced event handler registration");
        } else {
            info!(event_name = %event_name, "Registered event handler");
        }
    }

    /// 以闭包形式注册处理器
    pub fn register_fn<F>(&mut self, event_name: impl Into<String>, factory: F)
    where
        F: Fn(&HandlerContext) -> Box<dyn EventHandler> + Send + Sync + 'static,
    {
        self.register(event_name, Arc::new(factory));
    }

    /// 查找事件对应的工厂
    ///
    /// 未注册时返回 `UnknownEvent`，错误中列出当前全部已注册事件名。
    pub fn resolve(&self, event_name: &str) -> WorkerResult<HandlerFactory> {
        match self.factories.get(event_name) {
            Some(factory) => Ok(Arc::clone(factory)),
            None => {
                let available: Vec<String> = self.list_events().into_iter().collect();
                error!(
                    event_name = %event_name,
                    available = %available.join(", "),
                    "No handler registered for event"
                );
                Err(WorkerError::UnknownEvent {
                    event_name: event_name.to_string(),
                    available,
                })
            }
        }
    }

    /// 查找并构造处理器实例
    pub fn create_handler(&self, event_name: &str) -> WorkerResult<Box<dyn EventHandler>> {
        let factory = self.resolve(event_name)?;
        let handler = factory(&self.context);
        debug!(event_name = %event_name, handler = handler.name(), "Created event handler");
        Ok(handler)
    }

    /// 已注册的事件名
    pub fn list_events(&self) -> BTreeSet<String> {
        self.factories.keys().cloned().collect()
    }

    pub fn contains(&self, event_name: &str) -> bool {
        self.factories.contains_key(event_name)
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }

    pub fn context(&self) -> &HandlerContext {
        &self.context
    }
}
