use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use event_worker_core::{traits::QueueTransport, AppConfig, MessageQueueType};
use event_worker_infrastructure::MessageQueueFactory;
use event_worker_worker::WASTE_PREDICTION_EVENT;
use serde_json::{json, Value};

#[tokio::main]
async fn main() -> Result<()> {
    // 初始化简单的日志系统
    tracing_subscriber::fmt::init();

    let cli = CliApp::parse();
    cli.run().await
}

/// CLI应用程序主结构
#[derive(Parser, Debug)]
#[command(name = "event-worker-cli")]
#[command(version = "1.0.0")]
#[command(about = "事件消费Worker - 命令行工具")]
#[command(long_about = "向源队列发送测试事件、查看和校验配置")]
struct CliApp {
    #[command(subcommand)]
    command: Commands,

    /// 配置文件路径
    #[arg(short, long)]
    config: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// 发送测试用的废弃物预测事件
    Send {
        /// 测试场景 (1-3)
        #[arg(short, long, default_value = "1", value_parser = clap::value_parser!(u8).range(1..=3))]
        scenario: u8,
        /// 消息分组ID
        #[arg(short, long, default_value = "waste-predictions")]
        group: String,
        /// 请求ID，未指定时自动生成
        #[arg(short, long)]
        request_id: Option<String>,
        /// 发送所有测试场景
        #[arg(long)]
        all: bool,
    },
    /// 列出测试场景
    Scenarios,
    /// 配置管理
    Config {
        #[command(subcommand)]
        action: ConfigActions,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigActions {
    /// 显示生效的配置
    Show,
    /// 验证配置
    Validate,
}

/// 测试场景：描述和事件数据
struct Scenario {
    description: &'static str,
    data: Value,
}

fn scenarios() -> Vec<Scenario> {
    vec![
        Scenario {
            description: "High production, summer conditions",
            data: json!({
                "production_volume": 50000,
                "rain_sum": 200,
                "temperature_mean": 28,
                "humidity_mean": 85,
                "wind_speed_mean": 15,
                "month": 6
            }),
        },
        Scenario {
            description: "Medium production, rainy winter",
            data: json!({
                "production_volume": 30000,
                "rain_sum": 350,
                "temperature_mean": 15,
                "humidity_mean": 75,
                "wind_speed_mean": 20,
                "month": 11
            }),
        },
        Scenario {
            description: "High production, dry hot conditions",
            data: json!({
                "production_volume": 75000,
                "rain_sum": 100,
                "temperature_mean": 32,
                "humidity_mean": 60,
                "wind_speed_mean": 10,
                "month": 3
            }),
        },
    ]
}

/// 构造事件消息体
fn event_payload(data: &Value, request_id: &str) -> Value {
    let mut event_data = data.clone();
    if let Some(object) = event_data.as_object_mut() {
        object.insert("metadata".to_string(), json!({ "request_id": request_id }));
    }
    json!({
        "eventName": WASTE_PREDICTION_EVENT,
        "eventData": event_data,
    })
}

impl CliApp {
    async fn run(self) -> Result<()> {
        match self.command {
            Commands::Send {
                scenario,
                ref group,
                ref request_id,
                all,
            } => {
                let config = self.load_config()?;
                let selected: Vec<usize> = if all {
                    (1..=scenarios().len()).collect()
                } else {
                    vec![scenario as usize]
                };
                send_scenarios(&config, &selected, group, request_id.as_deref()).await
            }
            Commands::Scenarios => {
                for (index, scenario) in scenarios().iter().enumerate() {
                    println!("{}. {}", index + 1, scenario.description);
                    println!("{}", serde_json::to_string_pretty(&scenario.data)?);
                }
                Ok(())
            }
            Commands::Config { ref action } => {
                let config = self.load_config()?;
                match action {
                    ConfigActions::Show => {
                        println!("{}", config.to_toml()?);
                    }
                    ConfigActions::Validate => {
                        config.validate()?;
                        println!("✅ 配置有效");
                    }
                }
                Ok(())
            }
        }
    }

    fn load_config(&self) -> Result<AppConfig> {
        AppConfig::load(self.config.as_deref()).context("加载配置失败")
    }
}

async fn send_scenarios(
    config: &AppConfig,
    selected: &[usize],
    group: &str,
    request_id: Option<&str>,
) -> Result<()> {
    if config.message_queue.r#type == MessageQueueType::InMemory {
        return Err(anyhow::anyhow!(
            "内存队列只在进程内可见，请配置 rabbitmq 或 redis_stream"
        ));
    }

    let queues = MessageQueueFactory::create(&config.message_queue)
        .await
        .context("连接消息队列失败")?;
    let all_scenarios = scenarios();

    for &number in selected {
        let scenario = &all_scenarios[number - 1];
        let request_id = request_id
            .map(str::to_string)
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let payload = event_payload(&scenario.data, &request_id);
        let dedup_token = uuid::Uuid::new_v4().to_string();

        let message_id = queues
            .source
            .send(payload.to_string().as_bytes(), group, &dedup_token)
            .await
            .with_context(|| format!("发送场景 {number} 失败"))?;

        println!("场景 {number}: {}", scenario.description);
        println!("✅ 消息发送成功");
        println!("消息ID: {message_id}");
        println!("请求ID: {request_id}");
        println!("{}", serde_json::to_string_pretty(&payload)?);
        println!("{}", "-".repeat(80));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_payload_carries_request_id() {
        let payload = event_payload(&scenarios()[1].data, "req-7");

        assert_eq!(payload["eventName"], json!(WASTE_PREDICTION_EVENT));
        assert_eq!(payload["eventData"]["month"], json!(11));
        assert_eq!(payload["eventData"]["metadata"]["request_id"], json!("req-7"));
    }

    #[test]
    fn test_cli_parses_send_command() {
        let cli = CliApp::parse_from(["event-worker-cli", "send", "--scenario", "3", "-g", "g1"]);
        match cli.command {
            Commands::Send { scenario, group, all, .. } => {
                assert_eq!(scenario, 3);
                assert_eq!(group, "g1");
                assert!(!all);
            }
            other => panic!("unexpected command {other:?}"),
        }

        assert!(CliApp::try_parse_from(["event-worker-cli", "send", "--scenario", "4"]).is_err());
    }
}
