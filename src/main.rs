use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::{Arg, ArgMatches, Command};
use event_worker::{
    init_logging, load_config, wait_for_shutdown_signal, Application, ShutdownManager,
    StartupConfig,
};
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let matches = cli().get_matches();

    // 未指定子命令时默认运行Worker
    let startup_config = match matches.subcommand() {
        Some(("run", sub_matches)) => startup_config(sub_matches),
        _ => startup_config(&matches),
    };

    run(startup_config).await
}

fn cli() -> Command {
    Command::new("event-worker")
        .version("1.0.0")
        .about("事件消费Worker：从FIFO队列拉取事件并分发处理")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("配置文件路径，未指定时按默认路径查找")
                .global(true),
        )
        .arg(
            Arg::new("log-level")
                .short('l')
                .long("log-level")
                .value_name("LEVEL")
                .help("日志级别，覆盖配置文件")
                .value_parser(["trace", "debug", "info", "warn", "error"])
                .global(true),
        )
        .arg(
            Arg::new("log-format")
                .long("log-format")
                .value_name("FORMAT")
                .help("日志格式，覆盖配置文件")
                .value_parser(["json", "pretty"])
                .global(true),
        )
        .subcommand(Command::new("run").about("运行事件消费循环（默认）"))
}

fn startup_config(matches: &ArgMatches) -> StartupConfig {
    StartupConfig {
        config_path: matches.get_one::<String>("config").cloned(),
        log_level: matches.get_one::<String>("log-level").cloned(),
        log_format: matches.get_one::<String>("log-format").cloned(),
    }
}

async fn run(startup_config: StartupConfig) -> Result<()> {
    // 加载配置
    let config = load_config(&startup_config)?;

    // 初始化日志系统
    init_logging(
        &config.observability.log_level,
        &config.observability.log_format,
    )?;

    info!(
        config_path = startup_config.config_path.as_deref().unwrap_or("<default>"),
        "启动事件消费Worker"
    );

    let shutdown_timeout = Duration::from_secs(config.worker.shutdown_timeout_seconds);

    // 数据库、注册表、队列依次初始化，失败即退出
    let app = Arc::new(Application::new(config).await?);

    let shutdown_manager = ShutdownManager::new();

    let mut app_handle = {
        let app = Arc::clone(&app);
        let token = shutdown_manager.token();
        tokio::spawn(async move { app.run(token).await })
    };

    // 等待关闭信号，循环提前退出时不再等待
    let finished = tokio::select! {
        result = wait_for_shutdown_signal() => {
            if let Err(e) = result {
                error!("等待关闭信号失败: {e:#}");
            }
            None
        }
        result = &mut app_handle => Some(result),
    };

    info!("开始优雅关闭...");
    shutdown_manager.shutdown();

    let result = match finished {
        Some(result) => Some(result),
        None => {
            shutdown_manager
                .join_with_timeout(shutdown_timeout, app_handle)
                .await
        }
    };

    match result {
        Some(Ok(stats)) => {
            info!(
                received = stats.received,
                processed = stats.processed,
                dead_lettered = stats.dead_lettered,
                ack_failures = stats.ack_failures,
                "Worker已优雅关闭"
            );
        }
        Some(Err(e)) => {
            error!("Worker任务异常退出: {e}");
        }
        None => {
            warn!("在途消息未在关闭超时内处理完成，已中止，未确认的消息将被重新投递");
        }
    }

    app.shutdown().await;

    info!("事件消费Worker已退出");
    Ok(())
}
