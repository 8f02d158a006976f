//! 单条消息的调度回调
//!
//! 每条投递的处理流程：
//!
//! 1. 把消息体解码为链接（UTF-8），失败时拒绝并重新入队，不调用渲染器
//! 2. 调用渲染器渲染
//! 3. 成功：确认消息，再把图片发布到 `reply_to`，携带原 `correlation_id`
//! 4. 失败：拒绝并重新入队，然后检查渲染器是否健康，不健康则重建
//!
//! 失败时不发送任何回复。重新入队的消息会被再次投递，工作队列上的 TTL
//! 保证一直失败的消息最终进入死信队列。

use kagami_core::{AckChannel, InboundDelivery, RenderServerError, RenderServerResult};
use kagami_worker::{RendererHandle, RendererId, RendererProvider};
use metrics::counter;
use tracing::{error, info, warn};

/// 一条投递的处理结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// 已确认并回复
    Replied,
    /// 已确认，但消息没有 reply_to，回复被跳过
    AckedWithoutReply,
    /// 已拒绝并重新入队
    Requeued { renderer_replaced: bool },
}

pub struct Dispatcher {
    provider: RendererProvider,
    renderer: Option<RendererHandle>,
}

impl Dispatcher {
    pub fn new(provider: RendererProvider, renderer: RendererHandle) -> Self {
        Self {
            provider,
            renderer: Some(renderer),
        }
    }

    /// 创建并启动第一个渲染器；启动失败直接返回错误
    pub async fn start(provider: RendererProvider) -> RenderServerResult<Self> {
        let launcher = provider.clone();
        let renderer = tokio::task::spawn_blocking(move || launcher.launch())
            .await
            .map_err(|e| RenderServerError::Internal(format!("渲染器启动线程异常退出: {e}")))??;
        Ok(Self::new(provider, renderer))
    }

    pub fn renderer(&self) -> Option<&RendererHandle> {
        self.renderer.as_ref()
    }

    pub fn renderer_id(&self) -> Option<RendererId> {
        self.renderer.as_ref().map(RendererHandle::id)
    }

    /// 处理一条投递
    ///
    /// 渲染错误在这里消化，只有 broker 操作（ack/nack/回复）失败才会返回错误。
    pub async fn handle_delivery(
        &mut self,
        channel: &dyn AckChannel,
        delivery: InboundDelivery,
    ) -> RenderServerResult<DispatchOutcome> {
        let delivery_tag = delivery.delivery_tag;
        info!(
            delivery_tag,
            correlation_id = ?delivery.correlation_id,
            redelivered = delivery.redelivered,
            "收到渲染请求"
        );

        let job = match delivery.decode() {
            Ok(job) => job,
            Err(e) => {
                warn!(delivery_tag, error = %e, "无法解码渲染请求，重新入队");
                channel.nack(delivery_tag, true).await?;
                counter!("kagami_render_jobs_total", "outcome" => "invalid").increment(1);
                return Ok(DispatchOutcome::Requeued {
                    renderer_replaced: false,
                });
            }
        };

        match self.render(&job.link).await {
            Ok(image) => {
                channel.ack(delivery_tag).await?;
                counter!("kagami_render_jobs_total", "outcome" => "rendered").increment(1);

                match job.reply(image) {
                    Some(reply) => {
                        channel.publish_reply(&reply).await?;
                        info!(
                            delivery_tag,
                            correlation_id = ?reply.correlation_id,
                            reply_to = %reply.routing_key,
                            "已发送渲染结果"
                        );
                        Ok(DispatchOutcome::Replied)
                    }
                    None => {
                        warn!(delivery_tag, link = %job.link, "渲染请求没有 reply_to，跳过回复");
                        Ok(DispatchOutcome::AckedWithoutReply)
                    }
                }
            }
            Err(e) => {
                error!(delivery_tag, link = %job.link, error = %e, "渲染失败，消息重新入队");
                channel.nack(delivery_tag, true).await?;
                counter!("kagami_render_jobs_total", "outcome" => "failed").increment(1);

                let renderer_replaced = self.ensure_healthy_renderer().await;
                Ok(DispatchOutcome::Requeued { renderer_replaced })
            }
        }
    }

    /// 在阻塞线程池中渲染，渲染期间渲染器的所有权转移到该线程
    async fn render(&mut self, link: &str) -> RenderServerResult<Vec<u8>> {
        let mut renderer = self
            .renderer
            .take()
            .ok_or_else(|| RenderServerError::RenderFatal("当前没有可用的渲染器".to_string()))?;

        let link = link.to_string();
        let joined = tokio::task::spawn_blocking(move || {
            let result = renderer.render(&link);
            (renderer, result)
        })
        .await;

        match joined {
            Ok((renderer, result)) => {
                self.renderer = Some(renderer);
                result
            }
            // 渲染线程 panic 时渲染器已随之被回收
            Err(e) => Err(RenderServerError::RenderFatal(format!(
                "渲染线程异常退出: {e}"
            ))),
        }
    }

    /// 渲染失败后检查渲染器，不健康时重建；返回是否换上了新的渲染器
    async fn ensure_healthy_renderer(&mut self) -> bool {
        let current = match self.renderer.take() {
            Some(renderer) if renderer.ok() => {
                self.renderer = Some(renderer);
                return false;
            }
            other => other,
        };

        let provider = self.provider.clone();
        let rebuilt = tokio::task::spawn_blocking(move || match current {
            Some(old) => provider.replace(old),
            None => provider.create().map(|mut renderer| {
                if let Err(e) = renderer.initialize() {
                    error!(renderer = %renderer, error = %e, "新渲染器启动失败");
                }
                renderer
            }),
        })
        .await;

        match rebuilt {
            Ok(Ok(renderer)) => {
                info!(renderer = %renderer, "渲染器已重建");
                self.renderer = Some(renderer);
                true
            }
            Ok(Err(e)) => {
                error!(error = %e, "创建新渲染器失败，将在下次失败后重试");
                false
            }
            Err(e) => {
                error!(error = %e, "渲染器重建线程异常退出");
                false
            }
        }
    }

    /// 显式退出当前渲染器
    pub async fn shutdown_renderer(&mut self) {
        if let Some(mut renderer) = self.renderer.take() {
            if let Err(e) = tokio::task::spawn_blocking(move || renderer.shutdown()).await {
                error!(error = %e, "渲染器退出线程异常退出");
            }
        }
    }
}
