
use kagami_core::{BrokerSession, RenderServerError, RenderServerResult};
use kagami_infrastructure::ConnectionManager;
use metrics::counter;
use tokio::sync::broadcast;
use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::dispatcher::Dispatcher;

/// 服务器主循环的状态
enum LoopState {
    /// 正在（重新）连接并声明队列
    Connecting,
    /// 已连接，正在消费工作队列
    Consuming(Box<dyn BrokerSession>),
    /// 连接中断，等待后重连
    Backoff,
    /// 收到关闭信号
    Stopping(Option<Box<dyn BrokerSession>>),
    /// 出现无法归类为断线的错误，服务器终止
    Failed(RenderServerError, Box<dyn BrokerSession>),
}

/// 消费循环退出的原因
enum ConsumeExit {
    Shutdown,
    Error(RenderServerError),
}

/// 服务器主循环
///
/// 断线类错误（网络中断、broker 关闭连接）会在等待后重连；其他错误视为程序
/// 状态异常，记录后终止服务器。
pub struct ServerLoop {
    connections: ConnectionManager,
    dispatcher: Dispatcher,
}

impl ServerLoop {
    /// 断线后的等待时间与连接管理器的重试间隔一致
    pub fn new(connections: ConnectionManager, dispatcher: Dispatcher) -> Self {
        Self {
            connections,
            dispatcher,
        }
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// 运行直到收到关闭信号（返回 Ok）或遇到致命错误（返回该错误）
    ///
    /// 两种情况下渲染器都会在返回前被显式退出。
    pub async fn run(&mut self, mut shutdown: broadcast::Receiver<()>) -> RenderServerResult<()> {
        let mut state = LoopState::Connecting;

        loop {
            state = match state {
                LoopState::Connecting => {
                    info!(broker = %self.connections.describe(), "正在连接RabbitMQ");
                    tokio::select! {
                        session = self.connections.connect() => LoopState::Consuming(session),
                        _ = shutdown.recv() => LoopState::Stopping(None),
                    }
                }
                LoopState::Consuming(mut session) => {
                    info!(" [x] Awaiting RPC requests...");
                    match self.consume(session.as_mut(), &mut shutdown).await {
                        ConsumeExit::Shutdown => LoopState::Stopping(Some(session)),
                        ConsumeExit::Error(e) if e.is_reconnectable() => {
                            warn!(
                                error = %e,
                                "与RabbitMQ的连接中断，{}秒后重连",
                                self.connections.retry_delay().as_secs_f64()
                            );
                            counter!("kagami_broker_reconnects_total").increment(1);
                            drop(session);
                            LoopState::Backoff
                        }
                        ConsumeExit::Error(e) => {
                            error!(error = %e, "服务器遇到无法恢复的错误，即将退出");
                            LoopState::Failed(e, session)
                        }
                    }
                }
                LoopState::Backoff => {
                    tokio::select! {
                        _ = sleep(self.connections.retry_delay()) => LoopState::Connecting,
                        _ = shutdown.recv() => LoopState::Stopping(None),
                    }
                }
                LoopState::Stopping(session) => {
                    info!("收到关闭信号，停止消费");
                    self.dispatcher.shutdown_renderer().await;
                    if let Some(mut session) = session {
                        if let Err(e) = session.close().await {
                            warn!(error = %e, "关闭RabbitMQ连接失败");
                        }
                    }
                    return Ok(());
                }
                LoopState::Failed(err, mut session) => {
                    self.dispatcher.shutdown_renderer().await;
                    if let Err(e) = session.close().await {
                        warn!(error = %e, "关闭RabbitMQ连接失败");
                    }
                    return Err(err);
                }
            };
        }
    }

    /// 逐条消费投递，直到会话出错或收到关闭信号
    ///
    /// 关闭信号只在两条投递之间生效，正在进行的渲染不会被打断。
    async fn consume(
        &mut self,
        session: &mut dyn BrokerSession,
        shutdown: &mut broadcast::Receiver<()>,
    ) -> ConsumeExit {
        loop {
            let next = tokio::select! {
                next = session.next_delivery() => next,
                _ = shutdown.recv() => return ConsumeExit::Shutdown,
            };

            let delivery = match next {
                Some(Ok(delivery)) => delivery,
                Some(Err(e)) => return ConsumeExit::Error(e),
                None => {
                    return ConsumeExit::Error(RenderServerError::ConnectionLost(
                        "消费者已被关闭".to_string(),
                    ))
                }
            };

            if let Err(e) = self
                .dispatcher
                .handle_delivery(session.channel(), delivery)
                .await
            {
                return ConsumeExit::Error(e);
            }
        }
    }
}
