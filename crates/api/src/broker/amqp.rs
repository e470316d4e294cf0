//! RabbitMQ implementation of the broker traits

use async_trait::async_trait;
use futures::StreamExt;
use lapin::{
    options::{
        BasicConsumeOptions, BasicPublishOptions, ExchangeDeclareOptions, QueueBindOptions,
        QueueDeclareOptions,
    },
    types::FieldTable,
    BasicProperties, Channel, Connection, ConnectionProperties, ExchangeKind,
};

use helpdesk_shared::EventEnvelope;

use super::{ensure_exchange, Broker, BrokerChannel, BrokerError, Deliveries};

const CONSUMER_TAG: &str = "helpdesk-realtime-bridge";

/// Connection to a RabbitMQ server
pub struct AmqpBroker {
    connection: Connection,
}

impl AmqpBroker {
    /// Connect to `uri` and try to declare `exchange` as a durable topic exchange.
    pub async fn connect(uri: &str, exchange: &str) -> Result<Self, BrokerError> {
        let connection = Connection::connect(uri, ConnectionProperties::default())
            .await
            .map_err(|e| BrokerError::Connect(e.to_string()))?;

        let broker = Self { connection };
        ensure_exchange(&broker, exchange).await?;

        tracing::info!(exchange = %exchange, "Connected to RabbitMQ");
        Ok(broker)
    }

    async fn create_channel(&self) -> Result<Channel, BrokerError> {
        self.connection
            .create_channel()
            .await
            .map_err(|e| BrokerError::ChannelOpen(e.to_string()))
    }
}

#[async_trait]
impl Broker for AmqpBroker {
    async fn open_channel(&self) -> Result<Box<dyn BrokerChannel>, BrokerError> {
        let channel = self.create_channel().await?;
        Ok(Box::new(AmqpChannel { channel }))
    }
}

struct AmqpChannel {
    channel: Channel,
}

#[async_trait]
impl BrokerChannel for AmqpChannel {
    async fn declare_topic_exchange(&self, exchange: &str) -> Result<(), BrokerError> {
        self.channel
            .exchange_declare(
                exchange,
                ExchangeKind::Topic,
                ExchangeDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| BrokerError::ExchangeDeclare(e.to_string()))
    }

    async fn declare_exclusive_queue(&self) -> Result<String, BrokerError> {
        let queue = self
            .channel
            .queue_declare(
                "",
                QueueDeclareOptions {
                    exclusive: true,
                    auto_delete: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| BrokerError::QueueDeclare(e.to_string()))?;

        Ok(queue.name().as_str().to_string())
    }

    async fn bind_queue(
        &self,
        queue: &str,
        exchange: &str,
        binding_key: &str,
    ) -> Result<(), BrokerError> {
        self.channel
            .queue_bind(
                queue,
                exchange,
                binding_key,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| BrokerError::QueueBind(e.to_string()))
    }

    async fn consume(&self, queue: &str) -> Result<Deliveries, BrokerError> {
        let consumer = self
            .channel
            .basic_consume(
                queue,
                CONSUMER_TAG,
                BasicConsumeOptions {
                    no_ack: true,
                    exclusive: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| BrokerError::Consume(e.to_string()))?;

        Ok(consumer
            .map(|delivery| {
                delivery
                    .map(|d| d.data)
                    .map_err(|e| BrokerError::Delivery(e.to_string()))
            })
            .boxed())
    }

    async fn close(&self) {
        if let Err(e) = self.channel.close(200, "OK").await {
            tracing::debug!(error = %e, "Failed to close channel");
        }
    }
}

/// Publishes domain events to the topic exchange
pub struct AmqpPublisher {
    channel: Channel,
    exchange: String,
}

impl AmqpPublisher {
    pub async fn new(broker: &AmqpBroker, exchange: impl Into<String>) -> Result<Self, BrokerError> {
        Ok(Self {
            channel: broker.create_channel().await?,
            exchange: exchange.into(),
        })
    }

    /// Publish raw bytes under `routing_key`
    pub async fn publish_raw(&self, routing_key: &str, body: &[u8]) -> Result<(), BrokerError> {
        self.channel
            .basic_publish(
                &self.exchange,
                routing_key,
                BasicPublishOptions::default(),
                body,
                BasicProperties::default().with_content_type("application/json".into()),
            )
            .await
            .map_err(|e| BrokerError::Publish(e.to_string()))?
            .await
            .map_err(|e| BrokerError::Publish(e.to_string()))?;

        tracing::debug!(
            exchange = %self.exchange,
            routing_key = %routing_key,
            bytes = body.len(),
            "Published event"
        );
        Ok(())
    }

    /// Publish an envelope, routed by its event type
    pub async fn publish(&self, envelope: &EventEnvelope) -> Result<(), BrokerError> {
        let body = envelope
            .to_bytes()
            .map_err(|e| BrokerError::Publish(e.to_string()))?;
        self.publish_raw(&envelope.event_type, &body).await
    }
}
