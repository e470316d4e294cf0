//! Broker integration
//!
//! The bridge consumes the domain event topic and hands each body to the
//! connection registry. Broker access sits behind the [`Broker`] and
//! [`BrokerChannel`] traits; [`amqp`] implements them on RabbitMQ.

pub mod amqp;
pub mod bridge;

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;

pub use amqp::{AmqpBroker, AmqpPublisher};
pub use bridge::BrokerBridge;

/// Stream of raw message bodies from a consumer
pub type Deliveries = BoxStream<'static, Result<Vec<u8>, BrokerError>>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BrokerError {
    #[error("Broker connection failed: {0}")]
    Connect(String),
    #[error("Failed to open broker channel: {0}")]
    ChannelOpen(String),
    #[error("Failed to declare exchange: {0}")]
    ExchangeDeclare(String),
    #[error("Failed to declare queue: {0}")]
    QueueDeclare(String),
    #[error("Failed to bind queue: {0}")]
    QueueBind(String),
    #[error("Failed to start consumer: {0}")]
    Consume(String),
    #[error("Delivery failed: {0}")]
    Delivery(String),
    #[error("Publish failed: {0}")]
    Publish(String),
}

impl BrokerError {
    /// Whether the error happened while setting up a subscription
    pub fn is_setup_failure(&self) -> bool {
        matches!(
            self,
            BrokerError::Connect(_)
                | BrokerError::ChannelOpen(_)
                | BrokerError::ExchangeDeclare(_)
                | BrokerError::QueueDeclare(_)
                | BrokerError::QueueBind(_)
                | BrokerError::Consume(_)
        )
    }
}

/// A broker connection able to open channels
#[async_trait]
pub trait Broker: Send + Sync {
    async fn open_channel(&self) -> Result<Box<dyn BrokerChannel>, BrokerError>;
}

/// One channel on a broker connection
#[async_trait]
pub trait BrokerChannel: Send + Sync {
    /// Declare `exchange` as a durable topic exchange
    async fn declare_topic_exchange(&self, exchange: &str) -> Result<(), BrokerError>;

    /// Declare an exclusive, auto-deleting, server-named queue and return its name
    async fn declare_exclusive_queue(&self) -> Result<String, BrokerError>;

    /// Bind `queue` to `exchange` under `binding_key`
    async fn bind_queue(
        &self,
        queue: &str,
        exchange: &str,
        binding_key: &str,
    ) -> Result<(), BrokerError>;

    /// Consume `queue` with automatic acknowledgement
    async fn consume(&self, queue: &str) -> Result<Deliveries, BrokerError>;

    /// Close the channel
    async fn close(&self) {}
}

/// Make sure the event exchange exists before anyone binds to it.
///
/// A failed declaration is only logged: the exchange may already exist with
/// other arguments. Binding the bridge queue is what decides whether realtime
/// delivery can start.
pub async fn ensure_exchange(broker: &dyn Broker, exchange: &str) -> Result<(), BrokerError> {
    let channel = broker.open_channel().await?;

    match channel.declare_topic_exchange(exchange).await {
        Ok(()) => {
            tracing::debug!(exchange = %exchange, "Exchange declared");
            channel.close().await;
        }
        Err(e) => {
            tracing::warn!(exchange = %exchange, error = %e, "Failed to declare exchange");
        }
    }

    Ok(())
}

/// Lifecycle of the broker bridge task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum BridgeState {
    /// Broker unreachable at startup; no bridge was started
    Disabled = 0,
    Starting = 1,
    Running = 2,
    /// Setup failed or the consumer stream ended
    Stopped = 3,
}

impl fmt::Display for BridgeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BridgeState::Disabled => "disabled",
            BridgeState::Starting => "starting",
            BridgeState::Running => "running",
            BridgeState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Shared view of the bridge state, readable from health checks
#[derive(Debug, Clone)]
pub struct BridgeStatus(Arc<AtomicU8>);

impl BridgeStatus {
    pub fn new() -> Self {
        Self(Arc::new(AtomicU8::new(BridgeState::Disabled as u8)))
    }

    pub fn get(&self) -> BridgeState {
        match self.0.load(Ordering::Acquire) {
            1 => BridgeState::Starting,
            2 => BridgeState::Running,
            3 => BridgeState::Stopped,
            _ => BridgeState::Disabled,
        }
    }

    pub fn set(&self, state: BridgeState) {
        self.0.store(state as u8, Ordering::Release);
    }
}

impl Default for BridgeStatus {
    fn default() -> Self {
        Self::new()
    }
}
