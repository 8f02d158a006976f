use serde::{Deserialize, Serialize};
use url::Url;

/// RabbitMQ 连接配置
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    pub host: String,
    pub port: u16,
    pub account: String,
    pub password: String,
    pub vhost: String,
    /// 连接失败或断线后再次尝试前的固定等待时间
    pub retry_delay_seconds: u64,
    pub consumer_tag_prefix: String,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5672,
            account: "guest".to_string(),
            password: "guest".to_string(),
            vhost: "/".to_string(),
            retry_delay_seconds: 5,
            consumer_tag_prefix: "kagami-render".to_string(),
        }
    }
}

impl std::fmt::Debug for BrokerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrokerConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("account", &self.account)
            .field("password", &"***")
            .field("vhost", &self.vhost)
            .field("retry_delay_seconds", &self.retry_delay_seconds)
            .field("consumer_tag_prefix", &self.consumer_tag_prefix)
            .finish()
    }
}

impl BrokerConfig {
    /// Validate broker configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.host.is_empty() {
            return Err(anyhow::anyhow!("RabbitMQ主机地址不能为空"));
        }

        if self.port == 0 {
            return Err(anyhow::anyhow!("RabbitMQ端口必须大于0"));
        }

        if self.vhost.is_empty() {
            return Err(anyhow::anyhow!("RabbitMQ虚拟主机不能为空"));
        }

        if self.retry_delay_seconds == 0 {
            return Err(anyhow::anyhow!("重连延迟时间必须大于0"));
        }

        if self.consumer_tag_prefix.is_empty() {
            return Err(anyhow::anyhow!("消费者标签前缀不能为空"));
        }

        Ok(())
    }

    /// 不含凭据的连接地址，虚拟主机作为单个路径段做百分号编码（`/` 编码为 `%2F`）
    fn base_url(&self) -> anyhow::Result<Url> {
        let mut url = Url::parse("amqp://localhost")?;
        url.set_host(Some(&self.host))
            .map_err(|e| anyhow::anyhow!("无效的RabbitMQ主机地址 {}: {e}", self.host))?;
        url.set_port(Some(self.port))
            .map_err(|_| anyhow::anyhow!("无法设置RabbitMQ端口"))?;
        url.path_segments_mut()
            .map_err(|_| anyhow::anyhow!("无法设置RabbitMQ虚拟主机"))?
            .clear()
            .push(&self.vhost);
        Ok(url)
    }

    /// 构建 AMQP 连接 URI
    pub fn amqp_uri(&self) -> anyhow::Result<String> {
        let mut url = self.base_url()?;
        url.set_username(&self.account)
            .map_err(|_| anyhow::anyhow!("无法设置RabbitMQ账号"))?;
        url.set_password(Some(&self.password))
            .map_err(|_| anyhow::anyhow!("无法设置RabbitMQ密码"))?;
        Ok(url.to_string())
    }

    /// 日志中使用的连接地址，不包含密码
    pub fn display_address(&self) -> String {
        match self.base_url() {
            Ok(mut url) => {
                let _ = url.set_username(&self.account);
                url.to_string()
            }
            Err(_) => format!("amqp://{}@{}:{}", self.account, self.host, self.port),
        }
    }
}
