use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use kagami_core::AppConfig;
use kagami_dispatcher::{Dispatcher, ServerLoop};
use kagami_infrastructure::{ConnectionManager, RabbitMQConnector};
use kagami_worker::{backend_factory_from_config, RendererProvider};
use tokio::sync::broadcast;
use tracing::info;

/// 主应用程序
pub struct Application {
    server: ServerLoop,
}

impl Application {
    /// 启动第一个渲染器并组装服务器主循环
    ///
    /// 第一个渲染器启动失败时直接返回错误，此时尚未连接 broker。
    pub async fn new(config: AppConfig) -> Result<Self> {
        info!(backend = %config.renderer.backend, "初始化渲染器");
        let factory = backend_factory_from_config(&config.renderer)?;
        let provider = RendererProvider::new(factory);
        let dispatcher = Dispatcher::start(provider)
            .await
            .context("启动渲染器失败")?;
        if let Some(renderer) = dispatcher.renderer() {
            info!(renderer = %renderer, "渲染器已就绪");
        }

        let connector = RabbitMQConnector::new(config.broker.clone(), config.queues.clone());
        info!(
            consumer_tag = connector.consumer_tag(),
            work_queue = %config.queues.work_queue,
            "RabbitMQ消费者已配置"
        );

        let retry_delay = Duration::from_secs(config.broker.retry_delay_seconds);
        let connections = ConnectionManager::new(Arc::new(connector), retry_delay);

        Ok(Self {
            server: ServerLoop::new(connections, dispatcher),
        })
    }

    /// 运行直到收到关闭信号或遇到致命错误
    pub async fn run(mut self, shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        self.server
            .run(shutdown_rx)
            .await
            .context("渲染服务器异常终止")
    }
}
