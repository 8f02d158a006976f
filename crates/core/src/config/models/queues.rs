use serde::{Deserialize, Serialize};

/// 队列拓扑配置
///
/// 工作队列带有死信交换机与消息 TTL，过期或被拒绝且不重新入队的消息
/// 经死信交换机路由到死信队列。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct QueueTopologyConfig {
    pub work_queue: String,
    pub dead_letter_exchange: String,
    pub dead_letter_queue: String,
    pub message_ttl_ms: u32,
    pub prefetch_count: u16,
}

impl Default for QueueTopologyConfig {
    fn default() -> Self {
        Self {
            work_queue: "render".to_string(),
            dead_letter_exchange: "dlx".to_string(),
            dead_letter_queue: "render_dlx".to_string(),
            message_ttl_ms: 60_000,
            prefetch_count: 1,
        }
    }
}

impl QueueTopologyConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.work_queue.is_empty() {
            return Err(anyhow::anyhow!("工作队列名称不能为空"));
        }

        if self.dead_letter_exchange.is_empty() {
            return Err(anyhow::anyhow!("死信交换机名称不能为空"));
        }

        if self.dead_letter_queue.is_empty() {
            return Err(anyhow::anyhow!("死信队列名称不能为空"));
        }

        if self.work_queue == self.dead_letter_queue {
            return Err(anyhow::anyhow!("死信队列不能与工作队列同名"));
        }

        if self.message_ttl_ms == 0 {
            return Err(anyhow::anyhow!("消息TTL必须大于0"));
        }

        if self.prefetch_count == 0 {
            return Err(anyhow::anyhow!("预取数量必须大于0"));
        }

        Ok(())
    }
}
