//! # 数据模型
//!
//! 渲染服务器在 broker 与渲染器之间传递的数据结构。
//!
//! ```text
//! InboundDelivery --decode--> RenderJob --render--> RenderReply
//! ```
//!
//! - [`InboundDelivery`]: broker 投递的原始消息，消息体是待渲染的链接
//! - [`RenderJob`]: 解码后的渲染任务，只在一次调度周期内存在
//! - [`RenderReply`]: 发往 `reply_to` 的回复，携带原样返回的 `correlation_id`

pub mod message;

pub use message::*;
