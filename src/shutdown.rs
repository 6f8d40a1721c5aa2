use std::time::Duration;

use anyhow::{Context, Result};
use tokio::{
    signal,
    task::{JoinError, JoinHandle},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// 优雅关闭管理器
///
/// 持有根取消令牌，分发循环通过 `token()` 拿到的副本感知关闭。
#[derive(Debug, Clone, Default)]
pub struct ShutdownManager {
    token: CancellationToken,
}

impl ShutdownManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// 订阅关闭信号
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// 触发关闭，重复调用无副作用
    pub fn shutdown(&self) {
        if self.token.is_cancelled() {
            debug!("关闭管理器已经触发过关闭");
            return;
        }
        info!("触发Worker关闭");
        self.token.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.token.is_cancelled()
    }

    /// 等待关闭被触发
    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }

    /// 在超时内等待任务结束
    ///
    /// 超时后中止任务并等待它真正退出再返回 `None`，
    /// 此后调用方可以安全释放任务使用的共享资源。
    pub async fn join_with_timeout<T>(
        &self,
        timeout: Duration,
        mut handle: JoinHandle<T>,
    ) -> Option<Result<T, JoinError>> {
        match tokio::time::timeout(timeout, &mut handle).await {
            Ok(result) => Some(result),
            Err(_) => {
                warn!(timeout_secs = timeout.as_secs(), "等待关闭完成超时，中止任务");
                handle.abort();
                if let Err(e) = handle.await {
                    debug!("任务已中止: {e}");
                }
                None
            }
        }
    }
}

/// 等待 SIGINT 或 SIGTERM
pub async fn wait_for_shutdown_signal() -> Result<()> {
    let ctrl_c = async { signal::ctrl_c().await.context("安装Ctrl+C信号处理器失败") };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .context("安装SIGTERM信号处理器失败")?
            .recv()
            .await;
        Ok::<(), anyhow::Error>(())
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<Result<()>>();

    tokio::select! {
        result = ctrl_c => {
            result?;
            info!("收到Ctrl+C信号");
        },
        result = terminate => {
            result?;
            info!("收到SIGTERM信号");
        },
    }

    Ok(())
}
