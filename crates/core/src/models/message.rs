use crate::errors::{RenderServerError, RenderServerResult};

/// 从 broker 收到的原始投递
///
/// 只保留调度需要的字段：投递标签（用于 ack/nack）、消息体以及 RPC 相关属性。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundDelivery {
    pub delivery_tag: u64,
    pub body: Vec<u8>,
    pub correlation_id: Option<String>,
    pub reply_to: Option<String>,
    pub redelivered: bool,
}

impl InboundDelivery {
    pub fn new(delivery_tag: u64, body: impl Into<Vec<u8>>) -> Self {
        Self {
            delivery_tag,
            body: body.into(),
            correlation_id: None,
            reply_to: None,
            redelivered: false,
        }
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    pub fn with_reply_to(mut self, reply_to: impl Into<String>) -> Self {
        self.reply_to = Some(reply_to.into());
        self
    }

    pub fn redelivered(mut self) -> Self {
        self.redelivered = true;
        self
    }

    /// 将消息体解码为渲染任务
    pub fn decode(&self) -> RenderServerResult<RenderJob> {
        let link = std::str::from_utf8(&self.body).map_err(|e| {
            RenderServerError::InvalidPayload(format!("消息体不是合法的UTF-8文本: {e}"))
        })?;

        Ok(RenderJob {
            link: link.to_string(),
            correlation_id: self.correlation_id.clone(),
            reply_to: self.reply_to.clone(),
        })
    }
}

/// 一次渲染请求，生命周期为一个调度周期
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderJob {
    pub link: String,
    pub correlation_id: Option<String>,
    pub reply_to: Option<String>,
}

/// 回复给任务生产者的消息
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderReply {
    pub routing_key: String,
    pub correlation_id: Option<String>,
    pub body: Vec<u8>,
}

impl RenderJob {
    /// 用渲染结果构造回复；没有 reply_to 时返回 None
    pub fn reply(&self, image: Vec<u8>) -> Option<RenderReply> {
        let routing_key = self.reply_to.as_ref().filter(|r| !r.is_empty())?;
        Some(RenderReply {
            routing_key: routing_key.clone(),
            correlation_id: self.correlation_id.clone(),
            body: image,
        })
    }
}
