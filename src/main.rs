use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Arg, ArgMatches, Command};
use jobservice_core::{logging::init_logging, AppConfig};
use tokio::signal;
use tracing::{error, info, warn};

mod app;
mod shutdown;

use app::{load_job_file, AppMode, Application};
use shutdown::ShutdownManager;

#[tokio::main]
async fn main() -> Result<()> {
    let matches = Command::new("jobservice")
        .version("1.0.0")
        .about("分布式作业编排服务 - 作业跟踪与任务发布")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("配置文件路径"),
        )
        .arg(
            Arg::new("mode")
                .short('m')
                .long("mode")
                .value_name("MODE")
                .help("运行模式")
                .value_parser(["tracker", "submit"])
                .default_value("tracker"),
        )
        .arg(
            Arg::new("job")
                .long("job")
                .value_name("FILE")
                .help("作业定义JSON文件 (仅在submit模式下使用)")
                .required_if_eq("mode", "submit"),
        )
        .arg(
            Arg::new("partition")
                .long("partition")
                .value_name("PARTITION_ID")
                .help("作业所属分区")
                .default_value("default"),
        )
        .arg(
            Arg::new("job-id")
                .long("job-id")
                .value_name("JOB_ID")
                .help("作业ID (仅在submit模式下使用)")
                .required_if_eq("mode", "submit"),
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
    let mut config = AppConfig::load(config_path)
        .with_context(|| format!("加载配置失败: {}", config_path.unwrap_or("默认路径")))?;

    if let Some(level) = matches.get_one::<String>("log-level") {
        config.observability.log_level = level.clone();
    }
    if let Some(format) = matches.get_one::<String>("log-format") {
        config.observability.log_format = format.clone();
    }

    init_logging(
        &config.observability.log_level,
        &config.observability.log_format,
    )?;

    if config.observability.metrics_enabled {
        init_metrics(&config.observability.metrics_bind_address)?;
    }

    let mode = parse_app_mode(&matches)?;
    info!("启动作业服务，运行模式: {:?}", mode);

    let app = Arc::new(Application::new(config).await?);

    let result = match mode {
        AppMode::Tracker => run_tracker(Arc::clone(&app)).await,
        AppMode::Submit {
            job_file,
            partition_id,
            job_id,
        } => {
            let job = load_job_file(&job_file)?;
            app.submit(&partition_id, &job_id, &job).await.map(|outcome| {
                info!("作业 {}:{} 提交完成: {:?}", partition_id, job_id, outcome);
            })
        }
    };

    app.close().await;
    info!("作业服务已退出");
    result
}

async fn run_tracker(app: Arc<Application>) -> Result<()> {
    let shutdown_manager = ShutdownManager::new();

    let app_handle = {
        let shutdown_rx = shutdown_manager.subscribe().await;
        let app = Arc::clone(&app);

        tokio::spawn(async move {
            if let Err(e) = app.run_tracker(shutdown_rx).await {
                error!("跟踪Worker池运行失败: {e}");
            }
        })
    };

    wait_for_shutdown_signal().await;

    info!("收到关闭信号，开始优雅关闭...");
    shutdown_manager.shutdown().await;

    match tokio::time::timeout(Duration::from_secs(30), app_handle).await {
        Ok(Ok(())) => info!("跟踪Worker池已优雅关闭"),
        Ok(Err(e)) => error!("跟踪Worker池关闭时发生错误: {e}"),
        Err(_) => warn!("跟踪Worker池关闭超时，强制退出"),
    }

    Ok(())
}

fn parse_app_mode(matches: &ArgMatches) -> Result<AppMode> {
    let mode = matches
        .get_one::<String>("mode")
        .map(String::as_str)
        .unwrap_or("tracker");

    match mode {
        "tracker" => Ok(AppMode::Tracker),
        "submit" => {
            let required = |name: &str| {
                matches
                    .get_one::<String>(name)
                    .cloned()
                    .ok_or_else(|| anyhow::anyhow!("submit模式需要参数 --{name}"))
            };
            Ok(AppMode::Submit {
                job_file: required("job")?,
                partition_id: required("partition")?,
                job_id: required("job-id")?,
            })
        }
        _ => Err(anyhow::anyhow!("不支持的运行模式: {mode}")),
    }
}

/// 安装Prometheus指标导出器
fn init_metrics(bind_address: &str) -> Result<()> {
    let address: SocketAddr = bind_address
        .parse()
        .with_context(|| format!("无效的指标监听地址: {bind_address}"))?;

    let (recorder, exporter) = metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(address)
        .build()
        .map_err(|e| anyhow::anyhow!("创建Prometheus导出器失败: {e}"))?;

    metrics::set_global_recorder(recorder)
        .map_err(|e| anyhow::anyhow!("安装指标记录器失败: {e}"))?;

    tokio::spawn(async move {
        if let Err(e) = exporter.await {
            error!("Prometheus导出器退出: {e:?}");
        }
    });

    info!("Prometheus指标导出器监听于 {}", address);
    Ok(())
}

async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("安装Ctrl+C信号处理器失败: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("安装SIGTERM信号处理器失败: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("收到Ctrl+C信号");
        },
        _ = terminate => {
            info!("收到SIGTERM信号");
        },
    }
}
