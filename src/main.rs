use anyhow::{Context, Result};
use clap::{Arg, Command};
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use jobstore::{Application, ShutdownManager};
use jobstore_config::AppConfig;

#[tokio::main]
async fn main() -> Result<()> {
    let matches = Command::new("jobstore")
        .version(env!("CARGO_PKG_VERSION"))
        .about("分布式作业执行服务")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("配置文件路径"),
        )
        .arg(
            Arg::new("log-level")
                .short('l')
                .long("log-level")
                .value_name("LEVEL")
                .help("日志级别")
                .value_parser(["trace", "debug", "info", "warn", "error"])
                .default_value("info"),
        )
        .arg(
            Arg::new("log-format")
                .long("log-format")
                .value_name("FORMAT")
                .help("日志格式")
                .value_parser(["json", "pretty"])
                .default_value("pretty"),
        )
        .get_matches();

    let config_path = matches.get_one::<String>("config").map(String::as_str);
    let log_level = matches
        .get_one::<String>("log-level")
        .map(String::as_str)
        .unwrap_or("info");
    let log_format = matches
        .get_one::<String>("log-format")
        .map(String::as_str)
        .unwrap_or("pretty");

    init_logging(log_level, log_format)?;

    info!("启动分布式作业执行服务");
    let config = AppConfig::load(config_path).context("加载配置失败")?;

    let shutdown = ShutdownManager::new();
    let signal_shutdown = shutdown.clone();
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("收到退出信号");
        signal_shutdown.shutdown().await;
    });

    let application = Application::new(config);
    let context = application.init().await?;
    if let Err(e) = application.run(context, shutdown).await {
        error!("应用运行失败: {}", e);
        return Err(e);
    }
    Ok(())
}

fn init_logging(level: &str, format: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("jobstore={level},info")));

    match format {
        "json" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().json())
                .try_init()
                .context("初始化日志失败")?;
        }
        _ => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer())
                .try_init()
                .context("初始化日志失败")?;
        }
    }
    Ok(())
}

async fn wait_for_signal() {
    #[cfg(unix)]
    {
        let mut sigterm = match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(sigterm) => sigterm,
            Err(e) => {
                error!("注册 SIGTERM 处理失败: {}", e);
                let _ = signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = signal::ctrl_c().await;
    }
}
