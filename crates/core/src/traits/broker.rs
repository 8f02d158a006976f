use async_trait::async_trait;

use crate::{
    models::{InboundDelivery, RenderReply},
    RenderServerResult,
};

/// 消息确认与回复通道
///
/// 对应 broker 上的一个 channel。调度器只通过这里 ack/nack 投递并发布回复。
#[async_trait]
pub trait AckChannel: Send + Sync {
    /// 确认消息处理完成
    async fn ack(&self, delivery_tag: u64) -> RenderServerResult<()>;

    /// 拒绝消息，`requeue` 为 true 时重新入队
    async fn nack(&self, delivery_tag: u64, requeue: bool) -> RenderServerResult<()>;

    /// 通过默认交换机把回复发布到 `reply.routing_key`
    async fn publish_reply(&self, reply: &RenderReply) -> RenderServerResult<()>;
}

/// 一次已建立的 broker 会话：连接、通道、以及工作队列上的消费者
#[async_trait]
pub trait BrokerSession: Send {
    fn channel(&self) -> &dyn AckChannel;

    /// 等待下一条投递
    ///
    /// 返回 `None` 表示消费者流已经结束（通道或连接被关闭）。
    async fn next_delivery(&mut self) -> Option<RenderServerResult<InboundDelivery>>;

    /// 主动关闭会话
    async fn close(&mut self) -> RenderServerResult<()>;
}

/// 建立 broker 会话（连接 + 队列声明 + 开始消费），每次调用只尝试一次
#[async_trait]
pub trait BrokerConnector: Send + Sync {
    async fn connect(&self) -> RenderServerResult<Box<dyn BrokerSession>>;

    /// 日志中展示的连接目标（不含凭据）
    fn describe(&self) -> String;
}
