use thiserror::Error;

/// 渲染服务器错误类型定义
#[derive(Debug, Error)]
pub enum RenderServerError {
    /// 可挽回的渲染错误，渲染器仍可继续服务后续任务
    #[error("渲染警告: {0}")]
    RenderWarning(String),

    /// 渲染器后端已不可用
    #[error("渲染器故障: {0}")]
    RenderFatal(String),

    #[error("渲染器启动失败: {0}")]
    RendererInit(String),

    #[error("无效的消息内容: {0}")]
    InvalidPayload(String),

    #[error("与消息队列的连接已断开: {0}")]
    ConnectionLost(String),

    #[error("消息队列错误: {0}")]
    MessageQueue(String),

    #[error("配置错误: {0}")]
    Configuration(String),

    #[error("内部错误: {0}")]
    Internal(String),
}

impl RenderServerError {
    /// 是否属于网络或 broker 造成的瞬时错误，应当重连而不是退出
    pub fn is_reconnectable(&self) -> bool {
        matches!(self, RenderServerError::ConnectionLost(_))
    }
}

/// 统一的Result类型
pub type RenderServerResult<T> = std::result::Result<T, RenderServerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_connection_lost_is_reconnectable() {
        assert!(RenderServerError::ConnectionLost("reset".into()).is_reconnectable());
        assert!(!RenderServerError::MessageQueue("PRECONDITION_FAILED".into()).is_reconnectable());
        assert!(!RenderServerError::Internal("bug".into()).is_reconnectable());
        assert!(!RenderServerError::RenderFatal("crash".into()).is_reconnectable());
    }
}
