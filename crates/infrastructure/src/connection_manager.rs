use std::sync::Arc;
use std::time::Duration;

use kagami_core::{BrokerConnector, BrokerSession};
use metrics::counter;
use tokio::time::sleep;
use tracing::{info, warn};

/// 连接管理器
///
/// 反复尝试建立 broker 会话，直到成功为止。每次失败都会记录原因，
/// 然后固定等待 `retry_delay` 再试，没有最大重试次数。
pub struct ConnectionManager {
    connector: Arc<dyn BrokerConnector>,
    retry_delay: Duration,
}

impl ConnectionManager {
    pub fn new(connector: Arc<dyn BrokerConnector>, retry_delay: Duration) -> Self {
        Self {
            connector,
            retry_delay,
        }
    }

    pub fn retry_delay(&self) -> Duration {
        self.retry_delay
    }

    pub fn describe(&self) -> String {
        self.connector.describe()
    }

    /// 只在连接成功时返回
    pub async fn connect(&self) -> Box<dyn BrokerSession> {
        let mut attempt: u64 = 0;
        loop {
            attempt += 1;
            match self.connector.connect().await {
                Ok(session) => {
                    if attempt > 1 {
                        info!(
                            broker = %self.connector.describe(),
                            attempt,
                            "经过多次尝试后成功连接到RabbitMQ"
                        );
                    }
                    return session;
                }
                Err(e) => {
                    counter!("kagami_broker_connect_failures_total").increment(1);
                    warn!(
                        broker = %self.connector.describe(),
                        attempt,
                        error = %e,
                        "连接RabbitMQ失败，{}秒后重试",
                        self.retry_delay.as_secs_f64()
                    );
                    sleep(self.retry_delay).await;
                }
            }
        }
    }
}
