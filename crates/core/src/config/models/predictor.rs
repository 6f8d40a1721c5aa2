use serde::{Deserialize, Serialize};

/// 预测模型服务配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictorConfig {
    pub endpoint: String,
    pub timeout_seconds: u64,
}

impl Default for PredictorConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:8000/predict".to_string(),
            timeout_seconds: 30,
        }
    }
}

impl PredictorConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        let url = url::Url::parse(&self.endpoint)
            .map_err(|e| anyhow::anyhow!("无效的预测服务地址 {}: {e}", self.endpoint))?;

        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(anyhow::anyhow!("预测服务地址必须是http或https"));
        }

        if self.timeout_seconds == 0 {
            return Err(anyhow::anyhow!("预测服务超时时间必须大于0"));
        }

        Ok(())
    }
}
