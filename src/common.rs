use std::net::SocketAddr;

use anyhow::{Context, Result};
use fleet_core::{config::ObservabilityConfig, FleetConfig};
use metrics_exporter_prometheus::PrometheusBuilder;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::app::AppMode;

/// 初始化日志系统，`RUST_LOG` 优先于传入的级别
pub fn init_logging(log_level: &str, log_format: &str) -> Result<()> {
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

/// 加载配置并应用命令行覆盖项
pub fn load_config(config_path: Option<&str>, node_name: Option<&str>) -> Result<FleetConfig> {
    let mut config = FleetConfig::load(config_path).with_context(|| match config_path {
        Some(path) => format!("加载配置文件失败: {path}"),
        None => "加载默认配置失败".to_string(),
    })?;

    if let Some(name) = node_name {
        config.node.name = name.to_string();
        config.node.validate()?;
    }

    Ok(config)
}

/// 启用指标时安装 Prometheus 导出器
pub fn install_metrics_exporter(config: &ObservabilityConfig) -> Result<()> {
    if !config.metrics_enabled {
        return Ok(());
    }

    let addr: SocketAddr = config
        .metrics_bind_address
        .parse()
        .with_context(|| format!("无效的指标监听地址: {}", config.metrics_bind_address))?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .context("安装Prometheus指标导出器失败")?;

    info!("Prometheus 指标导出在 http://{addr}/metrics");
    Ok(())
}

/// 解析应用运行模式
pub fn parse_app_mode(mode_str: &str, config: &FleetConfig) -> Result<AppMode> {
    match mode_str {
        "dispatcher" => {
            if !config.dispatcher.enabled {
                return Err(anyhow::anyhow!("Dispatcher模式被禁用，请检查配置"));
            }
            Ok(AppMode::Dispatcher)
        }
        "node" => {
            if !config.node.enabled {
                return Err(anyhow::anyhow!("Node模式被禁用，请检查配置"));
            }
            Ok(AppMode::Node)
        }
        "all" => Ok(AppMode::All),
        _ => Err(anyhow::anyhow!("不支持的运行模式: {mode_str}")),
    }
}

/// 等待关闭信号
pub async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.unwrap_or_else(|e| {
            error!("安装Ctrl+C信号处理器失败: {}", e);
            std::process::exit(1);
        })
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("安装SIGTERM信号处理器失败: {}", e);
                std::process::exit(1);
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_app_mode_respects_enabled_flags() {
        let mut config = FleetConfig::default();

        assert_eq!(parse_app_mode("all", &config).unwrap(), AppMode::All);
        assert_eq!(
            parse_app_mode("dispatcher", &config).unwrap(),
            AppMode::Dispatcher
        );
        assert!(parse_app_mode("node", &config).is_err());

        config.node.enabled = true;
        assert_eq!(parse_app_mode("node", &config).unwrap(), AppMode::Node);

        config.dispatcher.enabled = false;
        assert!(parse_app_mode("dispatcher", &config).is_err());
        assert!(parse_app_mode("worker", &config).is_err());
    }

    #[test]
    fn test_metrics_exporter_skipped_when_disabled() {
        let config = ObservabilityConfig {
            metrics_bind_address: "not-an-address".to_string(),
            ..Default::default()
        };
        assert!(install_metrics_exporter(&config).is_ok());
    }

    #[test]
    fn test_metrics_exporter_rejects_bad_address() {
        let config = ObservabilityConfig {
            metrics_enabled: true,
            metrics_bind_address: "not-an-address".to_string(),
            ..Default::default()
        };
        assert!(install_metrics_exporter(&config).is_err());
    }
}
