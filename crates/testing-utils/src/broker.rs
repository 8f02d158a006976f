//! In-memory broker doubles: recording ack channel, scripted sessions and connector

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use kagami_core::{
    AckChannel, BrokerConnector, BrokerSession, InboundDelivery, RenderReply, RenderServerError,
    RenderServerResult,
};
use tokio::time::Instant;

/// One operation observed on a [`RecordingAckChannel`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    Ack(u64),
    Nack { delivery_tag: u64, requeue: bool },
    Reply(RenderReply),
}

/// Ack channel that records every operation in order
#[derive(Debug, Default)]
pub struct RecordingAckChannel {
    events: Mutex<Vec<ChannelEvent>>,
    disconnected: AtomicBool,
}

impl RecordingAckChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// After this call every operation fails with a connection-lost error
    pub fn disconnect(&self) {
        self.disconnected.store(true, Ordering::SeqCst);
    }

    pub fn events(&self) -> Vec<ChannelEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn acks(&self) -> Vec<u64> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                ChannelEvent::Ack(tag) => Some(tag),
                _ => None,
            })
            .collect()
    }

    pub fn nacks(&self) -> Vec<(u64, bool)> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                ChannelEvent::Nack {
                    delivery_tag,
                    requeue,
                } => Some((delivery_tag, requeue)),
                _ => None,
            })
            .collect()
    }

    pub fn replies(&self) -> Vec<RenderReply> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                ChannelEvent::Reply(reply) => Some(reply),
                _ => None,
            })
            .collect()
    }

    fn record(&self, event: ChannelEvent) -> RenderServerResult<()> {
        if self.disconnected.load(Ordering::SeqCst) {
            return Err(RenderServerError::ConnectionLost(
                "mock channel disconnected".into(),
            ));
        }
        self.events.lock().unwrap().push(event);
        Ok(())
    }
}

#[async_trait]
impl AckChannel for RecordingAckChannel {
    async fn ack(&self, delivery_tag: u64) -> RenderServerResult<()> {
        self.record(ChannelEvent::Ack(delivery_tag))
    }

    async fn nack(&self, delivery_tag: u64, requeue: bool) -> RenderServerResult<()> {
        self.record(ChannelEvent::Nack {
            delivery_tag,
            requeue,
        })
    }

    async fn publish_reply(&self, reply: &RenderReply) -> RenderServerResult<()> {
        self.record(ChannelEvent::Reply(reply.clone()))
    }
}

/// What a scripted session yields next
pub enum SessionStep {
    Deliver(InboundDelivery),
    Fail(RenderServerError),
    /// Consumer stream ends, as when the broker closes the channel
    End,
}

/// Broker session replaying a fixed script of deliveries and errors.
///
/// Once the script is drained the session stays idle forever, like a
/// consumer on an empty queue.
pub struct ScriptedSession {
    steps: VecDeque<SessionStep>,
    channel: Arc<RecordingAckChannel>,
    closed: Arc<AtomicBool>,
}

impl ScriptedSession {
    pub fn new(channel: Arc<RecordingAckChannel>, steps: Vec<SessionStep>) -> Self {
        Self {
            steps: steps.into(),
            channel,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Flag flipped when the server closes this session
    pub fn closed_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.closed)
    }
}

#[async_trait]
impl BrokerSession for ScriptedSession {
    fn channel(&self) -> &dyn AckChannel {
        self.channel.as_ref()
    }

    async fn next_delivery(&mut self) -> Option<RenderServerResult<InboundDelivery>> {
        match self.steps.pop_front() {
            Some(SessionStep::Deliver(delivery)) => Some(Ok(delivery)),
            Some(SessionStep::Fail(err)) => Some(Err(err)),
            Some(SessionStep::End) => None,
            None => std::future::pending().await,
        }
    }

    async fn close(&mut self) -> RenderServerResult<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Result of one scripted connect attempt
pub enum ConnectStep {
    Refuse(String),
    Accept(ScriptedSession),
}

/// Connector replaying scripted connect outcomes and recording attempt times.
///
/// When the script is exhausted every further attempt is refused.
#[derive(Default)]
pub struct ScriptedConnector {
    steps: Mutex<VecDeque<ConnectStep>>,
    attempts: Mutex<Vec<Instant>>,
}

impl ScriptedConnector {
    pub fn new(steps: Vec<ConnectStep>) -> Self {
        Self {
            steps: Mutex::new(steps.into()),
            attempts: Mutex::new(Vec::new()),
        }
    }

    pub fn attempts(&self) -> Vec<Instant> {
        self.attempts.lock().unwrap().clone()
    }

    pub fn attempt_count(&self) -> usize {
        self.attempts.lock().unwrap().len()
    }
}

#[async_trait]
impl BrokerConnector for ScriptedConnector {
    async fn connect(&self) -> RenderServerResult<Box<dyn BrokerSession>> {
        self.attempts.lock().unwrap().push(Instant::now());
        let step = self.steps.lock().unwrap().pop_front();
        match step {
            Some(ConnectStep::Accept(session)) => Ok(Box::new(session)),
            Some(ConnectStep::Refuse(reason)) => Err(RenderServerError::ConnectionLost(reason)),
            None => Err(RenderServerError::ConnectionLost(
                "connection refused".into(),
            )),
        }
    }

    fn describe(&self) -> String {
        "amqp://scripted".to_string()
    }
}
