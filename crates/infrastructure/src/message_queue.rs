use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use kagami_core::{
    AckChannel, BrokerConfig, BrokerConnector, BrokerSession, InboundDelivery,
    QueueTopologyConfig, RenderReply, RenderServerError, RenderServerResult,
};
use lapin::{
    message::Delivery,
    options::*,
    types::{AMQPValue, FieldTable},
    BasicProperties, Channel, Connection, ConnectionProperties, Consumer, ExchangeKind,
};
use tracing::{debug, info};

/// 工作队列的声明参数：死信交换机与消息 TTL
pub fn work_queue_arguments(queues: &QueueTopologyConfig) -> FieldTable {
    let mut args = FieldTable::default();
    args.insert(
        "x-dead-letter-exchange".into(),
        AMQPValue::LongString(queues.dead_letter_exchange.clone().into()),
    );
    args.insert(
        "x-message-ttl".into(),
        AMQPValue::LongLongInt(i64::from(queues.message_ttl_ms)),
    );
    args
}

/// 根据当前连接状态区分断线与其他 broker 错误
fn classify_error(connection: &Connection, context: &str, err: lapin::Error) -> RenderServerError {
    if connection.status().connected() {
        RenderServerError::MessageQueue(format!("{context}: {err}"))
    } else {
        RenderServerError::ConnectionLost(format!("{context}: {err}"))
    }
}

/// RabbitMQ连接器
///
/// 每次 `connect` 都会新建连接与通道，幂等地声明队列拓扑，然后在工作队列上开始消费。
pub struct RabbitMQConnector {
    broker: BrokerConfig,
    queues: QueueTopologyConfig,
    consumer_tag: String,
}

impl RabbitMQConnector {
    pub fn new(broker: BrokerConfig, queues: QueueTopologyConfig) -> Self {
        let host = hostname::get()
            .unwrap_or_else(|_| "unknown".into())
            .to_string_lossy()
            .to_string();
        let consumer_tag = format!(
            "{}-{}-{}",
            broker.consumer_tag_prefix,
            host,
            std::process::id()
        );

        Self {
            broker,
            queues,
            consumer_tag,
        }
    }

    pub fn consumer_tag(&self) -> &str {
        &self.consumer_tag
    }

    /// 声明死信交换机、死信队列与工作队列
    async fn declare_topology(&self, connection: &Connection, channel: &Channel) -> RenderServerResult<()> {
        channel
            .exchange_declare(
                &self.queues.dead_letter_exchange,
                ExchangeKind::Fanout,
                ExchangeDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| {
                classify_error(
                    connection,
                    &format!("声明死信交换机 {} 失败", self.queues.dead_letter_exchange),
                    e,
                )
            })?;

        channel
            .queue_declare(
                &self.queues.dead_letter_queue,
                QueueDeclareOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| {
                classify_error(
                    connection,
                    &format!("声明队列 {} 失败", self.queues.dead_letter_queue),
                    e,
                )
            })?;

        channel
            .queue_bind(
                &self.queues.dead_letter_queue,
                &self.queues.dead_letter_exchange,
                "",
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| {
                classify_error(
                    connection,
                    &format!("绑定队列 {} 到死信交换机失败", self.queues.dead_letter_queue),
                    e,
                )
            })?;

        channel
            .queue_declare(
                &self.queues.work_queue,
                QueueDeclareOptions::default(),
                work_queue_arguments(&self.queues),
            )
            .await
            .map_err(|e| {
                classify_error(
                    connection,
                    &format!("声明队列 {} 失败", self.queues.work_queue),
                    e,
                )
            })?;

        debug!(
            work_queue = %self.queues.work_queue,
            dead_letter_queue = %self.queues.dead_letter_queue,
            "队列拓扑声明完成"
        );
        Ok(())
    }
}

#[async_trait]
impl BrokerConnector for RabbitMQConnector {
    async fn connect(&self) -> RenderServerResult<Box<dyn BrokerSession>> {
        let uri = self
            .broker
            .amqp_uri()
            .map_err(|e| RenderServerError::Configuration(e.to_string()))?;

        let connection = Connection::connect(&uri, ConnectionProperties::default())
            .await
            .map_err(|e| RenderServerError::ConnectionLost(format!("连接RabbitMQ失败: {e}")))?;
        let connection = Arc::new(connection);

        let channel = connection
            .create_channel()
            .await
            .map_err(|e| classify_error(&connection, "创建通道失败", e))?;

        channel
            .basic_qos(self.queues.prefetch_count, BasicQosOptions::default())
            .await
            .map_err(|e| classify_error(&connection, "设置预取数量失败", e))?;

        self.declare_topology(&connection, &channel).await?;

        let consumer = channel
            .basic_consume(
                &self.queues.work_queue,
                &self.consumer_tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| classify_error(&connection, "创建消费者失败", e))?;

        info!(
            broker = %self.describe(),
            queue = %self.queues.work_queue,
            consumer_tag = %self.consumer_tag,
            "成功连接到RabbitMQ并开始消费"
        );

        Ok(Box::new(RabbitMQSession {
            channel: RabbitMQAckChannel {
                connection: Arc::clone(&connection),
                channel,
            },
            connection,
            consumer,
        }))
    }

    fn describe(&self) -> String {
        self.broker.display_address()
    }
}

/// 基于 lapin 通道的确认与回复实现
pub struct RabbitMQAckChannel {
    connection: Arc<Connection>,
    channel: Channel,
}

#[async_trait]
impl AckChannel for RabbitMQAckChannel {
    async fn ack(&self, delivery_tag: u64) -> RenderServerResult<()> {
        self.channel
            .basic_ack(delivery_tag, BasicAckOptions::default())
            .await
            .map_err(|e| classify_error(&self.connection, "确认消息失败", e))
    }

    async fn nack(&self, delivery_tag: u64, requeue: bool) -> RenderServerResult<()> {
        self.channel
            .basic_nack(
                delivery_tag,
                BasicNackOptions {
                    multiple: false,
                    requeue,
                },
            )
            .await
            .map_err(|e| classify_error(&self.connection, "拒绝消息失败", e))
    }

    async fn publish_reply(&self, reply: &RenderReply) -> RenderServerResult<()> {
        let mut properties = BasicProperties::default();
        if let Some(correlation_id) = &reply.correlation_id {
            properties = properties.with_correlation_id(correlation_id.clone().into());
        }

        let confirm = self
            .channel
            .basic_publish(
                "",
                &reply.routing_key,
                BasicPublishOptions::default(),
                &reply.body,
                properties,
            )
            .await
            .map_err(|e| {
                classify_error(
                    &self.connection,
                    &format!("发布回复到队列 {} 失败", reply.routing_key),
                    e,
                )
            })?;

        confirm
            .await
            .map_err(|e| classify_error(&self.connection, "回复发布确认失败", e))?;

        debug!(routing_key = %reply.routing_key, "回复已发布");
        Ok(())
    }
}

/// 一条 RabbitMQ 连接上的消费会话
pub struct RabbitMQSession {
    connection: Arc<Connection>,
    channel: RabbitMQAckChannel,
    consumer: Consumer,
}

impl RabbitMQSession {
    fn to_inbound(delivery: Delivery) -> InboundDelivery {
        let correlation_id = delivery
            .properties
            .correlation_id()
            .as_ref()
            .map(|id| id.as_str().to_string());
        let reply_to = delivery
            .properties
            .reply_to()
            .as_ref()
            .map(|queue| queue.as_str().to_string());

        InboundDelivery {
            delivery_tag: delivery.delivery_tag,
            body: delivery.data,
            correlation_id,
            reply_to,
            redelivered: delivery.redelivered,
        }
    }
}

#[async_trait]
impl BrokerSession for RabbitMQSession {
    fn channel(&self) -> &dyn AckChannel {
        &self.channel
    }

    async fn next_delivery(&mut self) -> Option<RenderServerResult<InboundDelivery>> {
        match self.consumer.next().await? {
            Ok(delivery) => Some(Ok(Self::to_inbound(delivery))),
            Err(e) => Some(Err(classify_error(&self.connection, "接收消息失败", e))),
        }
    }

    async fn close(&mut self) -> RenderServerResult<()> {
        if !self.connection.status().connected() {
            debug!("RabbitMQ连接已经断开，无需关闭");
            return Ok(());
        }

        self.connection
            .close(200, "正常关闭")
            .await
            .map_err(|e| RenderServerError::MessageQueue(format!("关闭连接失败: {e}")))?;

        info!("RabbitMQ连接已关闭");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lapin::types::ShortString;

    #[test]
    fn test_work_queue_arguments() {
        let args = work_queue_arguments(&QueueTopologyConfig::default());
        let inner = args.inner();

        assert_eq!(
            inner.get(&ShortString::from("x-dead-letter-exchange")),
            Some(&AMQPValue::LongString("dlx".into()))
        );
        assert_eq!(
            inner.get(&ShortString::from("x-message-ttl")),
            Some(&AMQPValue::LongLongInt(60_000))
        );
        assert_eq!(inner.len(), 2);
    }

    #[test]
    fn test_consumer_tag_uses_prefix() {
        let connector =
            RabbitMQConnector::new(BrokerConfig::default(), QueueTopologyConfig::default());
        assert!(connector.consumer_tag().starts_with("kagami-render-"));
    }

    #[test]
    fn test_describe_hides_password() {
        let broker = BrokerConfig {
            password: "secret".to_string(),
            ..Default::default()
        };
        let connector = RabbitMQConnector::new(broker, QueueTopologyConfig::default());
        assert!(!connector.describe().contains("secret"));
    }
}
