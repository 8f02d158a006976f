use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Arg, Command};
use kagami_core::AppConfig;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod app;
mod shutdown;

use app::Application;
use shutdown::{wait_for_shutdown_signal, wait_for_task, ShutdownManager, ShutdownOutcome};

/// 收到关闭信号后等待当前渲染完成的最长时间
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<()> {
    // 解析命令行参数
    let matches = Command::new("kagami-render")
        .version(env!("CARGO_PKG_VERSION"))
        .about("小镜 Bot 渲染服务器")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("配置文件路径，不指定时依次查找默认位置"),
        )
        .arg(
            Arg::new("log-level")
                .short('l')
                .long("log-level")
                .value_name("LEVEL")
                .help("日志级别，覆盖配置文件")
                .value_parser(["trace", "debug", "info", "warn", "error"]),
        )
        .arg(
            Arg::new("log-format")
                .long("log-format")
                .value_name("FORMAT")
                .help("日志格式，覆盖配置文件")
                .value_parser(["json", "pretty"]),
        )
        .get_matches();

    let config_path = matches.get_one::<String>("config").map(String::as_str);

    // 加载配置
    let config = AppConfig::load(config_path).with_context(|| match config_path {
        Some(path) => format!("加载配置文件失败: {path}"),
        None => "加载配置失败".to_string(),
    })?;

    // 初始化日志系统
    let log_level = matches
        .get_one::<String>("log-level")
        .unwrap_or(&config.observability.log_level);
    let log_format = matches
        .get_one::<String>("log-format")
        .unwrap_or(&config.observability.log_format);
    init_logging(log_level, log_format)?;

    info!("启动渲染服务器");
    info!("RabbitMQ: {}", config.broker.display_address());

    init_metrics(&config)?;

    // 第一个渲染器启动失败直接退出
    let app = Application::new(config).await?;

    let shutdown_manager = ShutdownManager::new();
    let shutdown_rx = shutdown_manager.subscribe().await;
    let mut app_handle = tokio::spawn(app.run(shutdown_rx));

    tokio::select! {
        _ = wait_for_shutdown_signal() => {
            info!("收到关闭信号，开始优雅关闭...");
            shutdown_manager.shutdown().await;

            match wait_for_task(&mut app_handle, SHUTDOWN_TIMEOUT).await {
                ShutdownOutcome::Finished(Ok(())) => info!("渲染服务器已优雅关闭"),
                ShutdownOutcome::Finished(Err(e)) => error!("渲染服务器关闭时发生错误: {e:#}"),
                ShutdownOutcome::Panicked(e) => error!("渲染服务器任务异常退出: {e}"),
                ShutdownOutcome::TimedOut => {
                    // 渲染线程无法中止，直接结束进程
                    warn!("渲染服务器关闭超时，强制退出");
                    std::process::exit(1);
                }
            }
        }
        result = &mut app_handle => {
            let result = result.context("渲染服务器任务异常退出")?;
            if let Err(e) = &result {
                error!("渲染服务器运行失败: {e:#}");
            }
            return result;
        }
    }

    info!("渲染服务器已退出");
    Ok(())
}

/// 初始化日志系统
fn init_logging(log_level: &str, log_format: &str) -> Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let registry = tracing_subscriber::registry().with(env_filter);

    match log_format {
        "json" => {
            registry
                .with(tracing_subscriber::fmt::layer().json())
                .try_init()
                .context("初始化JSON日志格式失败")?;
        }
        "pretty" => {
            registry
                .with(tracing_subscriber::fmt::layer().pretty())
                .try_init()
                .context("初始化Pretty日志格式失败")?;
        }
        _ => {
            return Err(anyhow::anyhow!("不支持的日志格式: {log_format}"));
        }
    }

    Ok(())
}

/// 配置了监听地址时启动 Prometheus 指标导出
fn init_metrics(config: &AppConfig) -> Result<()> {
    let Some(addr) = config.observability.metrics_socket_addr()? else {
        return Ok(());
    };

    let (recorder, exporter) = metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .build()
        .map_err(|e| anyhow::anyhow!("创建Prometheus导出器失败: {e}"))?;

    metrics::set_global_recorder(recorder)
        .map_err(|e| anyhow::anyhow!("安装指标记录器失败: {e}"))?;
    tokio::spawn(async move {
        if let Err(e) = exporter.await {
            error!("Prometheus导出器退出: {e:?}");
        }
    });

    info!("Prometheus指标导出已启动: {addr}");
    Ok(())
}
