use std::sync::Arc;

use anyhow::Result;
use clap::{Arg, Command};
use tracing::{error, info, warn};

use fleet_scheduler::app::Application;
use fleet_scheduler::common::{
    init_logging, install_metrics_exporter, load_config, parse_app_mode, wait_for_shutdown_signal,
};
use fleet_scheduler::shutdown::ShutdownManager;

#[tokio::main]
async fn main() -> Result<()> {
    // 解析命令行参数
    let matches = Command::new("fleet-scheduler")
        .version(env!("CARGO_PKG_VERSION"))
        .about("GPU算力节点集群的任务调度系统")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("配置文件路径，未指定时搜索默认路径"),
        )
        .arg(
            Arg::new("mode")
                .short('m')
                .long("mode")
                .value_name("MODE")
                .help("运行模式")
                .value_parser(["dispatcher", "node", "all"])
                .default_value("all"),
        )
        .arg(
            Arg::new("node-name")
                .long("node-name")
                .value_name("NAME")
                .help("节点名称 (覆盖配置中的 node.name)"),
        )
        .arg(
            Arg::new("log-level")
                .short('l')
                .long("log-level")
                .value_name("LEVEL")
                .help("日志级别，未指定时使用配置值")
                .value_parser(["trace", "debug", "info", "warn", "error"]),
        )
        .arg(
            Arg::new("log-format")
                .long("log-format")
                .value_name("FORMAT")
                .help("日志格式，未指定时使用配置值")
                .value_parser(["json", "pretty"]),
        )
        .get_matches();

    let config_path = matches.get_one::<String>("config").map(String::as_str);
    let mode_str = matches
        .get_one::<String>("mode")
        .map(String::as_str)
        .unwrap_or("all");
    let node_name = matches.get_one::<String>("node-name").map(String::as_str);

    // 日志级别和格式依赖配置，所以先加载配置
    let config = load_config(config_path, node_name)?;

    let log_level = matches
        .get_one::<String>("log-level")
        .unwrap_or(&config.observability.log_level);
    let log_format = matches
        .get_one::<String>("log-format")
        .unwrap_or(&config.observability.log_format);
    init_logging(log_level, log_format)?;

    info!("启动GPU算力调度系统");
    info!("配置文件: {}", config_path.unwrap_or("<默认搜索路径>"));
    info!("运行模式: {mode_str}");

    let app_mode = parse_app_mode(mode_str, &config)?;
    install_metrics_exporter(&config.observability)?;

    let app = Arc::new(Application::new(config, app_mode));
    let shutdown_timeout = app.shutdown_timeout();
    let shutdown_manager = ShutdownManager::new();

    let mut app_handle = {
        let shutdown_rx = shutdown_manager.subscribe().await;
        let app = Arc::clone(&app);
        tokio::spawn(async move { app.run(shutdown_rx).await })
    };

    // 应用提前退出（例如端口被占用）时不再等待信号
    tokio::select! {
        _ = wait_for_shutdown_signal() => {}
        result = &mut app_handle => {
            return match result {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => {
                    error!("应用运行失败: {e:#}");
                    Err(e)
                }
                Err(e) => Err(anyhow::anyhow!("应用任务异常结束: {e}")),
            };
        }
    }

    info!("收到关闭信号，开始优雅关闭...");
    shutdown_manager.shutdown().await;

    match tokio::time::timeout(shutdown_timeout, app_handle).await {
        Ok(Ok(Ok(()))) => info!("应用已优雅关闭"),
        Ok(Ok(Err(e))) => error!("应用关闭时发生错误: {e:#}"),
        Ok(Err(e)) => error!("应用任务异常结束: {e}"),
        Err(_) => warn!("应用关闭超时，强制退出"),
    }

    info!("GPU算力调度系统已退出");
    Ok(())
}
