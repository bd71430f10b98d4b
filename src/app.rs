use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use fleet_api::{dispatcher_routes, node_routes, with_middleware};
use fleet_core::FleetConfig;
use fleet_dispatcher::{
    AssignmentNotifier, ChannelAssignmentNotifier, DispatcherService, HttpAssignmentNotifier,
    LocalLedgerGateway,
};
use fleet_node::{HttpLedgerClient, NodeService, ShutdownReport};

/// 应用运行模式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppMode {
    /// 只运行调度器
    Dispatcher,
    /// 只运行算力节点，通过 HTTP 连接远端调度器
    Node,
    /// 在同一进程内运行调度器和一个节点
    All,
}

/// 应用程序
pub struct Application {
    config: FleetConfig,
    mode: AppMode,
}

impl Application {
    pub fn new(config: FleetConfig, mode: AppMode) -> Self {
        Self { config, mode }
    }

    pub fn mode(&self) -> AppMode {
        self.mode
    }

    /// 运行应用直到收到关闭信号
    pub async fn run(&self, shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        info!("启动应用，模式: {:?}", self.mode);

        match self.mode {
            AppMode::Dispatcher => self.run_dispatcher(shutdown_rx).await,
            AppMode::Node => self.run_node(shutdown_rx).await,
            AppMode::All => self.run_all(shutdown_rx).await,
        }
    }

    /// 整体关闭超时：节点排空截止时间再留出上报余量
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(
            self.config.node.drain_deadline_seconds + self.config.node.report_timeout_seconds + 5,
        )
    }

    async fn run_dispatcher(&self, mut shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        let notifier = HttpAssignmentNotifier::new(Duration::from_secs(
            self.config.dispatcher.notify_timeout_seconds,
        ))
        .context("创建分配通知客户端失败")?;
        let (dispatcher, service_tx) = self.start_dispatcher(Arc::new(notifier)).await?;

        let server = spawn_server(
            "调度器",
            self.dispatcher_router(&dispatcher),
            &self.config.dispatcher.bind_address,
            shutdown_rx.resubscribe(),
        )
        .await;
        let server = match server {
            Ok(server) => server,
            Err(e) => {
                stop_dispatcher(&dispatcher, &service_tx).await;
                return Err(e);
            }
        };

        let _ = shutdown_rx.recv().await;
        info!("调度器收到关闭信号");

        stop_dispatcher(&dispatcher, &service_tx).await;
        join_server(server).await;
        Ok(())
    }

    async fn run_node(&self, mut shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        let ledger = HttpLedgerClient::new(
            &self.config.node.dispatcher_url,
            Duration::from_secs(self.config.node.report_timeout_seconds),
        )
        .context("创建调度器客户端失败")?;
        let node = Arc::new(NodeService::from_config(&self.config, Arc::new(ledger)));

        // 先监听再注册，注册成功后调度器可能立即推送分配
        let server = spawn_server(
            "节点",
            self.node_router(&node),
            &self.config.node.bind_address,
            shutdown_rx.resubscribe(),
        )
        .await?;

        let node_id = match node.start().await {
            Ok(node_id) => node_id,
            Err(e) => {
                server.abort();
                return Err(e).context("节点服务启动失败");
            }
        };
        info!("节点 {} 已注册，ID: {}", self.config.node.name, node_id);

        let _ = shutdown_rx.recv().await;
        info!("节点收到关闭信号");

        let report = node.stop().await.context("节点服务停止失败")?;
        log_shutdown_report(&report);
        join_server(server).await;
        Ok(())
    }

    async fn run_all(&self, mut shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        let (intake_tx, intake_rx) = mpsc::unbounded_channel();
        let notifier = ChannelAssignmentNotifier::new(intake_tx.clone());
        let (dispatcher, service_tx) = self.start_dispatcher(Arc::new(notifier)).await?;

        let node = Arc::new(
            NodeService::from_config(
                &self.config,
                Arc::new(LocalLedgerGateway::new(Arc::clone(&dispatcher))),
            )
            .with_intake_channel(intake_tx, intake_rx),
        );

        let mut servers = Vec::new();
        let bound = async {
            servers.push(
                spawn_server(
                    "调度器",
                    self.dispatcher_router(&dispatcher),
                    &self.config.dispatcher.bind_address,
                    shutdown_rx.resubscribe(),
                )
                .await?,
            );
            servers.push(
                spawn_server(
                    "节点",
                    self.node_router(&node),
                    &self.config.node.bind_address,
                    shutdown_rx.resubscribe(),
                )
                .await?,
            );
            node.start().await.context("节点服务启动失败")
        }
        .await;

        if let Err(e) = bound {
            for server in &servers {
                server.abort();
            }
            stop_dispatcher(&dispatcher, &service_tx).await;
            return Err(e);
        }

        let _ = shutdown_rx.recv().await;
        info!("收到关闭信号，先排空节点再停止调度器");

        match node.stop().await {
            Ok(report) => log_shutdown_report(&report),
            Err(e) => error!("节点服务停止失败: {}", e),
        }
        stop_dispatcher(&dispatcher, &service_tx).await;
        for server in servers {
            join_server(server).await;
        }
        Ok(())
    }

    async fn start_dispatcher(
        &self,
        notifier: Arc<dyn AssignmentNotifier>,
    ) -> Result<(Arc<DispatcherService>, broadcast::Sender<()>)> {
        let dispatcher = Arc::new(DispatcherService::new(&self.config.dispatcher, notifier));
        let (service_tx, _) = broadcast::channel(1);
        dispatcher
            .start(&service_tx)
            .await
            .context("调度器服务启动失败")?;
        Ok((dispatcher, service_tx))
    }

    fn dispatcher_router(&self, dispatcher: &Arc<DispatcherService>) -> Router {
        with_middleware(
            dispatcher_routes(Arc::clone(dispatcher)),
            self.config.dispatcher.cors_enabled,
        )
    }

    fn node_router(&self, node: &Arc<NodeService>) -> Router {
        with_middleware(node_routes(Arc::clone(node)), false)
    }
}

async fn spawn_server(
    name: &'static str,
    router: Router,
    bind_address: &str,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<JoinHandle<()>> {
    let listener = TcpListener::bind(bind_address)
        .await
        .with_context(|| format!("{name} 绑定地址失败: {bind_address}"))?;
    match listener.local_addr() {
        Ok(addr) => info!("{name} HTTP 服务启动在 http://{addr}"),
        Err(_) => info!("{name} HTTP 服务启动在 http://{bind_address}"),
    }

    Ok(tokio::spawn(async move {
        let shutdown = async move {
            let _ = shutdown_rx.recv().await;
        };
        if let Err(e) = axum::serve(listener, router)
            .with_graceful_shutdown(shutdown)
            .await
        {
            error!("{name} HTTP 服务运行失败: {}", e);
        }
    }))
}

async fn join_server(server: JoinHandle<()>) {
    if let Err(e) = server.await {
        warn!("HTTP 服务任务异常结束: {}", e);
    }
}

async fn stop_dispatcher(dispatcher: &DispatcherService, service_tx: &broadcast::Sender<()>) {
    let _ = service_tx.send(());
    dispatcher.stop().await;
}

fn log_shutdown_report(report: &ShutdownReport) {
    if report.abandoned.is_empty() {
        info!("节点已停止，取消任务 {} 个", report.cancelled.len());
    } else {
        warn!(
            "节点已停止，取消任务 {} 个，放弃任务 {} 个: {:?}",
            report.cancelled.len(),
            report.abandoned.len(),
            report.abandoned
        );
    }
}
