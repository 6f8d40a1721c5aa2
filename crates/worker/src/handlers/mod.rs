//! 事件处理器及默认注册表

pub mod waste_prediction;

use event_worker_core::{traits::HandlerContext, EventRegistry};

pub use waste_prediction::{
    WastePredictionHandler, PROCESSOR_VERSION, WASTE_PREDICTIONS_COLLECTION,
};

/// 废弃量预测事件名
pub const WASTE_PREDICTION_EVENT: &str = "WASTE/PREDICTION";

/// 注册内置的全部事件处理器
pub fn register_default_handlers(registry: &mut EventRegistry) {
    registry.register_fn(WASTE_PREDICTION_EVENT, |ctx| {
        Box::new(WastePredictionHandler::new(ctx))
    });
}

/// 用共享上下文创建包含内置处理器的注册表
pub fn build_default_registry(context: HandlerContext) -> EventRegistry {
    let mut registry = EventRegistry::new(context);
    register_default_handlers(&mut registry);
    registry
}
