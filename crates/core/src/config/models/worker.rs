use serde::{Deserialize, Serialize};

/// 单次拉取等待时间上限（秒），与长轮询队列的限制保持一致
pub const MAX_WAIT_TIME_SECONDS: u64 = 20;

/// Worker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// 每批最多拉取的消息数
    pub batch_size: usize,
    /// 拉取的最长等待时间（秒）
    pub wait_time_seconds: u64,
    /// 拉取失败后的固定退避时间（秒）
    pub receive_backoff_seconds: u64,
    /// 批内最多并行处理的消息分组数，1 表示顺序处理
    pub max_parallel_groups: usize,
    /// 原消息没有分组键时死信使用的分组
    pub dead_letter_group: String,
    /// 关闭时等待在途消息处理完成的时间（秒）
    pub shutdown_timeout_seconds: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            wait_time_seconds: 20,
            receive_backoff_seconds: 5,
            max_parallel_groups: 1,
            dead_letter_group: "dlq-group".to_string(),
            shutdown_timeout_seconds: 30,
        }
    }
}

impl WorkerConfig {
    /// Validate worker configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.batch_size == 0 {
            return Err(anyhow::anyhow!("批量拉取数量必须大于0"));
        }

        if self.wait_time_seconds > MAX_WAIT_TIME_SECONDS {
            return Err(anyhow::anyhow!(
                "拉取等待时间不能超过{}秒",
                MAX_WAIT_TIME_SECONDS
            ));
        }

        if self.max_parallel_groups == 0 {
            return Err(anyhow::anyhow!("并行分组数必须大于0"));
        }

        if self.dead_letter_group.is_empty() {
            return Err(anyhow::anyhow!("死信默认分组不能为空"));
        }

        Ok(())
    }
}
