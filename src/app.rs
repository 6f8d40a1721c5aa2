use std::sync::Arc;

use anyhow::{Context, Result};
use event_worker_core::{
    traits::{HandlerContext, RecordStore, WastePredictor},
    AppConfig, EventRegistry,
};
use event_worker_infrastructure::{
    DatabaseManager, HttpWastePredictor, MessageQueueFactory, QueuePair,
};
use event_worker_worker::{
    build_default_registry, DeadLetterRouter, DispatchLoop, DispatchSettings, DispatchStats,
};
use tokio_util::sync::CancellationToken;
use tracing::info;

/// 主应用程序
///
/// 持有进程内共享的记录存储、事件注册表和队列传输。
pub struct Application {
    config: AppConfig,
    queues: QueuePair,
    store: Arc<dyn RecordStore>,
    registry: Arc<EventRegistry>,
}

impl Application {
    /// 按配置创建应用实例
    ///
    /// 依次连接数据库、构建事件注册表、创建队列传输，任何一步失败都终止启动。
    pub async fn new(config: AppConfig) -> Result<Self> {
        info!(
            queue_type = config.message_queue.r#type.as_str(),
            source_queue = %config.message_queue.source_queue,
            dead_letter_queue = %config.message_queue.dead_letter_queue,
            "初始化应用程序"
        );

        let database = DatabaseManager::connect(&config.database)
            .await
            .context("连接数据库失败")?;
        let predictor =
            HttpWastePredictor::new(&config.predictor).context("创建预测服务客户端失败")?;
        let store = database.record_store();
        let registry = build_registry(Arc::clone(&store), Arc::new(predictor))?;

        let queues = MessageQueueFactory::create(&config.message_queue)
            .await
            .context("创建消息队列失败")?;

        Ok(Self {
            config,
            queues,
            store,
            registry,
        })
    }

    /// 使用外部提供的组件创建应用实例
    pub fn with_components(
        config: AppConfig,
        queues: QueuePair,
        store: Arc<dyn RecordStore>,
        predictor: Arc<dyn WastePredictor>,
    ) -> Result<Self> {
        let registry = build_registry(Arc::clone(&store), predictor)?;
        Ok(Self {
            config,
            queues,
            store,
            registry,
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn queues(&self) -> &QueuePair {
        &self.queues
    }

    pub fn registry(&self) -> &EventRegistry {
        &self.registry
    }

    /// 按Worker配置构建分发循环
    pub fn dispatch_loop(&self) -> DispatchLoop {
        let router = DeadLetterRouter::with_default_group(
            Arc::clone(&self.queues.dead_letter),
            self.config.worker.dead_letter_group.clone(),
        );

        DispatchLoop::builder(
            Arc::clone(&self.queues.source),
            Arc::clone(&self.registry),
            router,
        )
        .settings(DispatchSettings::from(&self.config.worker))
        .build()
    }

    /// 运行分发循环直到取消
    pub async fn run(&self, cancel: CancellationToken) -> DispatchStats {
        info!(
            events = ?self.registry.list_events(),
            batch_size = self.config.worker.batch_size,
            "启动事件消费Worker"
        );
        self.dispatch_loop().run(cancel).await
    }

    /// 释放记录存储
    pub async fn shutdown(&self) {
        self.store.close().await;
        info!("记录存储已关闭");
    }
}

fn build_registry(
    store: Arc<dyn RecordStore>,
    predictor: Arc<dyn WastePredictor>,
) -> Result<Arc<EventRegistry>> {
    let registry = build_default_registry(HandlerContext::new(store, predictor));
    if registry.is_empty() {
        return Err(anyhow::anyhow!("事件注册表为空，没有可用的事件处理器"));
    }

    info!(events = ?registry.list_events(), "Event registry initialized");
    Ok(Arc::new(registry))
}
