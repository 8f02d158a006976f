//! 需要 Docker，默认忽略：`cargo test -p kagami-infrastructure -- --ignored`

use anyhow::Result;
use futures::StreamExt;
use kagami_core::{BrokerConfig, BrokerConnector, QueueTopologyConfig, RenderServerError};
use kagami_infrastructure::RabbitMQConnector;
use lapin::{
    options::*, types::FieldTable, BasicProperties, Channel, Connection, ConnectionProperties,
    ExchangeKind,
};
use testcontainers::{core::ExecCommand, runners::AsyncRunner, ContainerAsync, ImageExt};
use testcontainers_modules::rabbitmq::RabbitMq;
use tokio::time::{sleep, timeout, Duration};

struct RabbitMqSetup {
    container: ContainerAsync<RabbitMq>,
    broker: BrokerConfig,
}

impl RabbitMqSetup {
    async fn new() -> Result<Self> {
        let container = RabbitMq::default()
            .with_tag("3.12-management-alpine")
            .start()
            .await?;
        let port = container.get_host_port_ipv4(5672).await?;
        sleep(Duration::from_secs(5)).await;

        let broker = BrokerConfig {
            host: "127.0.0.1".to_string(),
            port,
            ..BrokerConfig::default()
        };
        Ok(Self { container, broker })
    }

    fn connector(&self) -> RabbitMQConnector {
        RabbitMQConnector::new(self.broker.clone(), QueueTopologyConfig::default())
    }

    /// 模拟发送渲染请求的客户端
    async fn client(&self) -> Result<(Connection, Channel)> {
        let connection =
            Connection::connect(&self.broker.amqp_uri()?, ConnectionProperties::default()).await?;
        let channel = connection.create_channel().await?;
        Ok((connection, channel))
    }
}

async fn publish_request(
    channel: &Channel,
    link: &str,
    reply_to: &str,
    correlation_id: &str,
) -> Result<()> {
    channel
        .basic_publish(
            "",
            "render",
            BasicPublishOptions::default(),
            link.as_bytes(),
            BasicProperties::default()
                .with_reply_to(reply_to.into())
                .with_correlation_id(correlation_id.into()),
        )
        .await?
        .await?;
    Ok(())
}

#[tokio::test]
#[ignore]
async fn test_render_request_round_trip() -> Result<()> {
    let setup = RabbitMqSetup::new().await?;
    let mut session = setup.connector().connect().await?;
    let (_client_connection, client) = setup.client().await?;

    let reply_queue = client
        .queue_declare(
            "",
            QueueDeclareOptions {
                exclusive: true,
                ..Default::default()
            },
            FieldTable::default(),
        )
        .await?;
    publish_request(&client, "https://example.com", reply_queue.name().as_str(), "abc").await?;

    let delivery = timeout(Duration::from_secs(10), session.next_delivery())
        .await?
        .expect("消费者意外结束")?;
    let job = delivery.decode()?;
    assert_eq!(job.link, "https://example.com");
    assert_eq!(job.correlation_id.as_deref(), Some("abc"));
    assert!(!delivery.redelivered);

    let reply = job.reply(b"png".to_vec()).expect("缺少 reply_to");
    session.channel().ack(delivery.delivery_tag).await?;
    session.channel().publish_reply(&reply).await?;

    let mut replies = client
        .basic_consume(
            reply_queue.name().as_str(),
            "client",
            BasicConsumeOptions {
                no_ack: true,
                ..Default::default()
            },
            FieldTable::default(),
        )
        .await?;
    let received = timeout(Duration::from_secs(10), replies.next())
        .await?
        .expect("回复队列意外结束")?;
    assert_eq!(received.data, b"png".to_vec());
    assert_eq!(
        received
            .properties
            .correlation_id()
            .as_ref()
            .map(|id| id.as_str()),
        Some("abc")
    );

    session.close().await?;
    Ok(())
}

#[tokio::test]
#[ignore]
async fn test_nacked_request_is_redelivered() -> Result<()> {
    let setup = RabbitMqSetup::new().await?;
    let mut session = setup.connector().connect().await?;
    let (_client_connection, client) = setup.client().await?;

    publish_request(&client, "https://example.com", "client_q", "abc").await?;

    let first = timeout(Duration::from_secs(10), session.next_delivery())
        .await?
        .expect("消费者意外结束")?;
    session.channel().nack(first.delivery_tag, true).await?;

    let second = timeout(Duration::from_secs(10), session.next_delivery())
        .await?
        .expect("消费者意外结束")?;
    assert!(second.redelivered);
    assert_eq!(second.body, first.body);
    session.channel().ack(second.delivery_tag).await?;

    session.close().await?;
    Ok(())
}

#[tokio::test]
#[ignore]
async fn test_topology_declares_dead_letter_queue() -> Result<()> {
    let setup = RabbitMqSetup::new().await?;
    let mut session = setup.connector().connect().await?;
    let (_client_connection, client) = setup.client().await?;

    client
        .queue_declare(
            "render_dlx",
            QueueDeclareOptions {
                passive: true,
                ..Default::default()
            },
            FieldTable::default(),
        )
        .await?;
    client
        .exchange_declare(
            "dlx",
            ExchangeKind::Fanout,
            ExchangeDeclareOptions {
                passive: true,
                ..Default::default()
            },
            FieldTable::default(),
        )
        .await?;

    // 再次连接时重复声明同样的拓扑不会失败
    let mut second = setup.connector().connect().await?;
    second.close().await?;
    session.close().await?;
    Ok(())
}

#[tokio::test]
#[ignore]
async fn test_requeued_poison_message_expires_into_dead_letter_queue() -> Result<()> {
    let setup = RabbitMqSetup::new().await?;
    let queues = QueueTopologyConfig {
        work_queue: "render_short".to_string(),
        dead_letter_exchange: "dlx_short".to_string(),
        dead_letter_queue: "render_short_dlx".to_string(),
        message_ttl_ms: 2_000,
        ..QueueTopologyConfig::default()
    };
    let connector = RabbitMQConnector::new(setup.broker.clone(), queues);
    let mut session = connector.connect().await?;
    let (_client_connection, client) = setup.client().await?;

    client
        .basic_publish(
            "",
            "render_short",
            BasicPublishOptions::default(),
            b"https://example.com/broken",
            BasicProperties::default()
                .with_reply_to("client_q".into())
                .with_correlation_id("abc".into()),
        )
        .await?
        .await?;

    // 渲染一直失败：每次投递都拒绝并重新入队，直到消息过期
    let mut redelivered = false;
    while let Ok(Some(delivery)) =
        timeout(Duration::from_secs(3), session.next_delivery()).await
    {
        let delivery = delivery?;
        redelivered |= delivery.redelivered;
        session.channel().nack(delivery.delivery_tag, true).await?;
        sleep(Duration::from_millis(200)).await;
    }
    session.close().await?;
    assert!(redelivered);

    sleep(Duration::from_secs(1)).await;
    let dead = client
        .basic_get("render_short_dlx", BasicGetOptions { no_ack: true })
        .await?
        .expect("消息没有进入死信队列");
    assert_eq!(dead.delivery.data, b"https://example.com/broken".to_vec());
    assert!(client
        .basic_get("render_short", BasicGetOptions { no_ack: true })
        .await?
        .is_none());
    Ok(())
}

#[tokio::test]
#[ignore]
async fn test_broker_closing_connection_is_reconnectable() -> Result<()> {
    let setup = RabbitMqSetup::new().await?;
    let connector = setup.connector();
    let mut session = connector.connect().await?;

    // broker 主动断开所有客户端连接，相当于 broker 重启或网络中断
    setup
        .container
        .exec(ExecCommand::new([
            "rabbitmqctl",
            "close_all_connections",
            "kagami test",
        ]))
        .await?;

    match timeout(Duration::from_secs(15), session.next_delivery()).await? {
        None => {}
        Some(Ok(delivery)) => panic!("断线后不应收到消息: {}", delivery.delivery_tag),
        Some(Err(e)) => {
            assert!(!matches!(e, RenderServerError::MessageQueue(_)), "{e}");
            assert!(e.is_reconnectable(), "{e}");
        }
    }

    let err = match session.channel().ack(1).await {
        Ok(()) => panic!("连接已断开，确认不应成功"),
        Err(e) => e,
    };
    assert!(err.is_reconnectable(), "{err}");

    // 重连后可以继续消费
    let (_client_connection, client) = setup.client().await?;
    let mut reconnected = connector.connect().await?;
    publish_request(&client, "https://example.com", "client_q", "abc").await?;
    let delivery = timeout(Duration::from_secs(10), reconnected.next_delivery())
        .await?
        .expect("消费者意外结束")?;
    reconnected.channel().ack(delivery.delivery_tag).await?;
    reconnected.close().await?;
    Ok(())
}

#[tokio::test]
async fn test_connect_to_unreachable_broker_is_reconnectable() {
    let broker = BrokerConfig {
        host: "127.0.0.1".to_string(),
        port: 1,
        ..BrokerConfig::default()
    };
    let connector = RabbitMQConnector::new(broker, QueueTopologyConfig::default());

    let err = match connector.connect().await {
        Ok(_) => panic!("不应连接成功"),
        Err(e) => e,
    };
    assert!(err.is_reconnectable());
}
