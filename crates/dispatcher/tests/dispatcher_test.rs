use std::sync::Arc;

use kagami_core::InboundDelivery;
use kagami_dispatcher::{DispatchOutcome, Dispatcher};
use kagami_testing_utils::{
    fake_png, render_request, ChannelEvent, MockBackendFactory, RecordingAckChannel,
    RenderBehavior,
};
use kagami_worker::RendererProvider;

async fn start_dispatcher(factory: &MockBackendFactory) -> Dispatcher {
    let provider = RendererProvider::new(Arc::new(factory.clone()));
    Dispatcher::start(provider).await.unwrap()
}

#[tokio::test]
async fn test_successful_render_acks_then_replies() {
    let factory = MockBackendFactory::succeeding(&fake_png());
    let mut dispatcher = start_dispatcher(&factory).await;
    let channel = RecordingAckChannel::new();

    let outcome = dispatcher
        .handle_delivery(&channel, render_request(1, "https://example.com", "abc"))
        .await
        .unwrap();

    assert_eq!(outcome, DispatchOutcome::Replied);
    let events = channel.events();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0], ChannelEvent::Ack(1));
    match &events[1] {
        ChannelEvent::Reply(reply) => {
            assert_eq!(reply.routing_key, "client_q");
            assert_eq!(reply.correlation_id.as_deref(), Some("abc"));
            assert_eq!(reply.body, fake_png());
        }
        other => panic!("期望回复，实际为 {other:?}"),
    }
    assert!(channel.nacks().is_empty());
    assert_eq!(factory.recorders()[0].render_links(), vec!["https://example.com"]);
}

#[tokio::test]
async fn test_success_without_reply_to_only_acks() {
    let factory = MockBackendFactory::succeeding(&fake_png());
    let mut dispatcher = start_dispatcher(&factory).await;
    let channel = RecordingAckChannel::new();

    let delivery = InboundDelivery::new(3, "https://example.com").with_correlation_id("abc");
    let outcome = dispatcher.handle_delivery(&channel, delivery).await.unwrap();

    assert_eq!(outcome, DispatchOutcome::AckedWithoutReply);
    assert_eq!(channel.events(), vec![ChannelEvent::Ack(3)]);
}

#[tokio::test]
async fn test_recoverable_failure_requeues_and_keeps_renderer() {
    let factory = MockBackendFactory::new(RenderBehavior::FailRecoverable);
    let mut dispatcher = start_dispatcher(&factory).await;
    let channel = RecordingAckChannel::new();
    let before = dispatcher.renderer_id();

    let outcome = dispatcher
        .handle_delivery(&channel, render_request(5, "https://example.com/404", "abc"))
        .await
        .unwrap();

    assert_eq!(
        outcome,
        DispatchOutcome::Requeued {
            renderer_replaced: false
        }
    );
    assert_eq!(channel.nacks(), vec![(5, true)]);
    assert!(channel.acks().is_empty());
    assert!(channel.replies().is_empty());
    assert_eq!(dispatcher.renderer_id(), before);
    assert_eq!(factory.created_count(), 1);
    assert_eq!(factory.recorders()[0].shutdown_calls(), 0);
}

#[tokio::test]
async fn test_fatal_failure_replaces_renderer() {
    let factory = MockBackendFactory::new(RenderBehavior::FailFatal);
    let mut dispatcher = start_dispatcher(&factory).await;
    let channel = RecordingAckChannel::new();
    let before = dispatcher.renderer_id().unwrap();

    let outcome = dispatcher
        .handle_delivery(&channel, render_request(8, "https://example.com", "abc"))
        .await
        .unwrap();

    assert_eq!(
        outcome,
        DispatchOutcome::Requeued {
            renderer_replaced: true
        }
    );
    assert_eq!(channel.nacks(), vec![(8, true)]);
    assert!(channel.replies().is_empty());

    let after = dispatcher.renderer_id().unwrap();
    assert_ne!(after, before);

    let recorders = factory.recorders();
    assert_eq!(recorders.len(), 2);
    assert_eq!(recorders[0].shutdown_calls(), 1);
    assert_eq!(recorders[1].initialize_calls(), 1);
    assert_eq!(recorders[1].shutdown_calls(), 0);
}

#[tokio::test]
async fn test_invalid_payload_requeues_without_rendering() {
    let factory = MockBackendFactory::succeeding(&fake_png());
    let mut dispatcher = start_dispatcher(&factory).await;
    let channel = RecordingAckChannel::new();

    let delivery = InboundDelivery::new(2, vec![0xc3u8, 0x28])
        .with_correlation_id("abc")
        .with_reply_to("client_q");
    let outcome = dispatcher.handle_delivery(&channel, delivery).await.unwrap();

    assert_eq!(
        outcome,
        DispatchOutcome::Requeued {
            renderer_replaced: false
        }
    );
    assert_eq!(channel.nacks(), vec![(2, true)]);
    assert!(factory.recorders()[0].render_links().is_empty());
}

#[tokio::test]
async fn test_panicking_renderer_is_recreated() {
    let factory = MockBackendFactory::succeeding(&fake_png())
        .with_first_backend_script(vec![RenderBehavior::Panic]);
    let mut dispatcher = start_dispatcher(&factory).await;
    let channel = RecordingAckChannel::new();
    let before = dispatcher.renderer_id().unwrap();

    let outcome = dispatcher
        .handle_delivery(&channel, render_request(1, "https://example.com", "abc"))
        .await
        .unwrap();

    assert_eq!(
        outcome,
        DispatchOutcome::Requeued {
            renderer_replaced: true
        }
    );
    assert_eq!(channel.nacks(), vec![(1, true)]);
    assert_ne!(dispatcher.renderer_id().unwrap(), before);
    // 旧渲染器在 panic 展开时被自动回收
    assert_eq!(factory.recorders()[0].shutdown_calls(), 1);
    assert_eq!(factory.recorders()[1].initialize_calls(), 1);

    let outcome = dispatcher
        .handle_delivery(
            &channel,
            render_request(2, "https://example.com", "abc").redelivered(),
        )
        .await
        .unwrap();
    assert_eq!(outcome, DispatchOutcome::Replied);
}

#[tokio::test]
async fn test_redelivered_job_succeeds_after_recreation() {
    let factory = MockBackendFactory::succeeding(&fake_png())
        .with_first_backend_script(vec![RenderBehavior::FailFatal]);
    let mut dispatcher = start_dispatcher(&factory).await;
    let channel = RecordingAckChannel::new();

    let first = dispatcher
        .handle_delivery(&channel, render_request(1, "https://example.com", "abc"))
        .await
        .unwrap();
    assert_eq!(
        first,
        DispatchOutcome::Requeued {
            renderer_replaced: true
        }
    );

    let outcome = dispatcher
        .handle_delivery(
            &channel,
            render_request(2, "https://example.com", "abc").redelivered(),
        )
        .await
        .unwrap();

    assert_eq!(outcome, DispatchOutcome::Replied);
    assert_eq!(channel.nacks(), vec![(1, true)]);
    assert_eq!(channel.acks(), vec![2]);
    assert_eq!(channel.replies().len(), 1);
    assert_eq!(factory.created_count(), 2);
    assert_eq!(
        factory.recorders()[1].render_links(),
        vec!["https://example.com"]
    );
}

#[tokio::test]
async fn test_failed_rebuild_is_not_reported_as_replacement() {
    let factory = MockBackendFactory::new(RenderBehavior::FailFatal);
    let first = RendererProvider::new(Arc::new(factory.clone())).launch().unwrap();
    let provider = RendererProvider::new(Arc::new(factory.clone().failing_create()));
    let mut dispatcher = Dispatcher::new(provider, first);
    let channel = RecordingAckChannel::new();

    let outcome = dispatcher
        .handle_delivery(&channel, render_request(1, "https://example.com", "abc"))
        .await
        .unwrap();

    assert_eq!(
        outcome,
        DispatchOutcome::Requeued {
            renderer_replaced: false
        }
    );
    assert!(dispatcher.renderer().is_none());
    assert_eq!(factory.recorders()[0].shutdown_calls(), 1);

    // 没有渲染器时任务直接失败并重新入队，再次尝试重建
    let outcome = dispatcher
        .handle_delivery(&channel, render_request(2, "https://example.com", "abc"))
        .await
        .unwrap();
    assert_eq!(
        outcome,
        DispatchOutcome::Requeued {
            renderer_replaced: false
        }
    );
    assert_eq!(channel.nacks(), vec![(1, true), (2, true)]);
    assert!(channel.replies().is_empty());
}

#[tokio::test]
async fn test_replacement_that_fails_to_start_is_replaced_again() {
    let factory = MockBackendFactory::new(RenderBehavior::FailFatal);
    let provider = RendererProvider::new(Arc::new(factory.clone().failing_initialize()));
    // 第一个渲染器从正常的工厂启动
    let first = RendererProvider::new(Arc::new(factory.clone())).launch().unwrap();
    let mut dispatcher = Dispatcher::new(provider, first);
    let channel = RecordingAckChannel::new();

    dispatcher
        .handle_delivery(&channel, render_request(1, "https://example.com", "abc"))
        .await
        .unwrap();
    let replacement = dispatcher.renderer().unwrap();
    assert!(replacement.started());
    assert!(!replacement.ok());

    let outcome = dispatcher
        .handle_delivery(&channel, render_request(2, "https://example.com", "abc"))
        .await
        .unwrap();
    assert_eq!(
        outcome,
        DispatchOutcome::Requeued {
            renderer_replaced: true
        }
    );
}

#[tokio::test]
async fn test_broker_error_escapes_dispatcher() {
    let factory = MockBackendFactory::succeeding(&fake_png());
    let mut dispatcher = start_dispatcher(&factory).await;
    let channel = RecordingAckChannel::new();
    channel.disconnect();

    let result = dispatcher
        .handle_delivery(&channel, render_request(1, "https://example.com", "abc"))
        .await;

    assert!(result.unwrap_err().is_reconnectable());
}

#[tokio::test]
async fn test_start_fails_when_first_renderer_cannot_start() {
    let factory = MockBackendFactory::succeeding(&fake_png()).failing_initialize();
    let provider = RendererProvider::new(Arc::new(factory.clone()));

    assert!(Dispatcher::start(provider).await.is_err());
    assert_eq!(factory.recorders()[0].shutdown_calls(), 1);
}

#[tokio::test]
async fn test_shutdown_renderer_exits_current_handle() {
    let factory = MockBackendFactory::succeeding(&fake_png());
    let mut dispatcher = start_dispatcher(&factory).await;

    dispatcher.shutdown_renderer().await;

    assert!(dispatcher.renderer().is_none());
    assert_eq!(factory.recorders()[0].shutdown_calls(), 1);
}
