//! Broker bridge
//!
//! Background task moving domain events from the broker topic into the
//! connection registry. Runs for the life of the process, independent of any
//! client connection. Delivery is at-most-once: messages are auto-acked on
//! receipt, and a failed setup is never retried.

use std::sync::Arc;

use futures::StreamExt;
use tokio::task::JoinHandle;

use helpdesk_shared::{EventScope, TenantId, ALL_ROUTING_KEYS, CONVERSATION_EVENTS_EXCHANGE};

use super::{BridgeState, BridgeStatus, Broker, BrokerError};
use crate::config::{Config, UnscopedPolicy};
use crate::websocket::{BroadcastReport, ConnectionRegistry};

/// Consumes the event topic and fans bodies out through the registry
pub struct BrokerBridge {
    registry: Arc<ConnectionRegistry>,
    status: BridgeStatus,
    exchange: String,
    binding_key: String,
    unscoped_policy: UnscopedPolicy,
}

impl BrokerBridge {
    pub fn new(registry: Arc<ConnectionRegistry>, status: BridgeStatus) -> Self {
        Self {
            registry,
            status,
            exchange: CONVERSATION_EVENTS_EXCHANGE.to_string(),
            binding_key: ALL_ROUTING_KEYS.to_string(),
            unscoped_policy: UnscopedPolicy::Broadcast,
        }
    }

    pub fn from_config(
        config: &Config,
        registry: Arc<ConnectionRegistry>,
        status: BridgeStatus,
    ) -> Self {
        Self {
            exchange: config.realtime_exchange.clone(),
            binding_key: config.realtime_binding_key.clone(),
            unscoped_policy: config.unscoped_policy,
            ..Self::new(registry, status)
        }
    }

    pub fn with_unscoped_policy(mut self, policy: UnscopedPolicy) -> Self {
        self.unscoped_policy = policy;
        self
    }

    /// Run the bridge on its own task.
    ///
    /// The task logs and ends on any failure; it never panics the process.
    pub fn spawn(self, broker: Arc<dyn Broker>) -> JoinHandle<()> {
        tokio::spawn(async move {
            match self.run(broker.as_ref()).await {
                Ok(()) => {
                    tracing::warn!(
                        exchange = %self.exchange,
                        "Broker consumer stream ended; realtime delivery stopped"
                    );
                }
                Err(e) if e.is_setup_failure() => {
                    tracing::error!(
                        exchange = %self.exchange,
                        error = %e,
                        "Broker bridge setup failed; realtime delivery disabled"
                    );
                }
                Err(e) => {
                    tracing::error!(
                        exchange = %self.exchange,
                        error = %e,
                        "Broker bridge failed; realtime delivery stopped"
                    );
                }
            }
        })
    }

    /// Subscribe and forward deliveries until the consumer stream ends.
    pub async fn run(&self, broker: &dyn Broker) -> Result<(), BrokerError> {
        self.status.set(BridgeState::Starting);
        let result = self.consume(broker).await;
        self.status.set(BridgeState::Stopped);
        result
    }

    async fn consume(&self, broker: &dyn Broker) -> Result<(), BrokerError> {
        let channel = broker.open_channel().await?;
        let queue = channel.declare_exclusive_queue().await?;
        channel
            .bind_queue(&queue, &self.exchange, &self.binding_key)
            .await?;
        let mut deliveries = channel.consume(&queue).await?;

        self.status.set(BridgeState::Running);
        tracing::info!(
            exchange = %self.exchange,
            binding_key = %self.binding_key,
            queue = %queue,
            "Broker bridge consuming"
        );

        while let Some(delivery) = deliveries.next().await {
            let body = delivery?;
            self.handle_delivery(&body).await;
        }

        Ok(())
    }

    /// Route one message body to its tenant.
    ///
    /// Returns `None` when the body was dropped by the unscoped policy.
    pub async fn handle_delivery(&self, body: &[u8]) -> Option<BroadcastReport> {
        let tenant = match EventScope::from_payload(body) {
            EventScope::Tenant(tenant) => tenant,
            EventScope::Unscoped(reason) => match self.unscoped_policy {
                UnscopedPolicy::Broadcast => {
                    tracing::warn!(
                        reason = reason.as_str(),
                        bytes = body.len(),
                        "Event has no usable tenant_id; broadcasting to all tenants"
                    );
                    TenantId::unscoped()
                }
                UnscopedPolicy::Drop => {
                    tracing::warn!(
                        reason = reason.as_str(),
                        bytes = body.len(),
                        "Event has no usable tenant_id; dropped"
                    );
                    return None;
                }
            },
        };

        Some(self.registry.broadcast(body, &tenant).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Identity;
    use crate::broker::{BrokerChannel, Deliveries};
    use crate::websocket::RegistryConfig;
    use async_trait::async_trait;
    use axum::extract::ws::Message;
    use futures::channel::mpsc as fmpsc;
    use helpdesk_shared::UserRole;
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Clone, Copy, PartialEq)]
    enum FailAt {
        Nothing,
        ChannelOpen,
        ExchangeDeclare,
        QueueDeclare,
        QueueBind,
        Consume,
    }

    type Bodies = Arc<Mutex<Option<Vec<Result<Vec<u8>, BrokerError>>>>>;

    struct MockBroker {
        fail_at: FailAt,
        bodies: Bodies,
        bindings: Arc<Mutex<Vec<(String, String, String)>>>,
    }

    impl MockBroker {
        fn new(fail_at: FailAt, bodies: Vec<Result<Vec<u8>, BrokerError>>) -> Self {
            Self {
                fail_at,
                bodies: Arc::new(Mutex::new(Some(bodies))),
                bindings: Arc::new(Mutex::new(Vec::new())),
            }
        }
    }

    struct MockChannel {
        fail_at: FailAt,
        bodies: Bodies,
        bindings: Arc<Mutex<Vec<(String, String, String)>>>,
    }

    #[async_trait]
    impl Broker for MockBroker {
        async fn open_channel(&self) -> Result<Box<dyn BrokerChannel>, BrokerError> {
            if self.fail_at == FailAt::ChannelOpen {
                return Err(BrokerError::ChannelOpen("refused".into()));
            }
            Ok(Box::new(MockChannel {
                fail_at: self.fail_at,
                bodies: Arc::clone(&self.bodies),
                bindings: Arc::clone(&self.bindings),
            }))
        }
    }

    #[async_trait]
    impl BrokerChannel for MockChannel {
        async fn declare_topic_exchange(&self, _exchange: &str) -> Result<(), BrokerError> {
            if self.fail_at == FailAt::ExchangeDeclare {
                return Err(BrokerError::ExchangeDeclare("precondition failed".into()));
            }
            Ok(())
        }

        async fn declare_exclusive_queue(&self) -> Result<String, BrokerError> {
            if self.fail_at == FailAt::QueueDeclare {
                return Err(BrokerError::QueueDeclare("access refused".into()));
            }
            Ok("amq.gen-test".to_string())
        }

        async fn bind_queue(
            &self,
            queue: &str,
            exchange: &str,
            binding_key: &str,
        ) -> Result<(), BrokerError> {
            if self.fail_at == FailAt::QueueBind {
                return Err(BrokerError::QueueBind("no exchange".into()));
            }
            self.bindings.lock().unwrap().push((
                queue.to_string(),
                exchange.to_string(),
                binding_key.to_string(),
            ));
            Ok(())
        }

        async fn consume(&self, _queue: &str) -> Result<Deliveries, BrokerError> {
            if self.fail_at == FailAt::Consume {
                return Err(BrokerError::Consume("channel closed".into()));
            }
            let bodies = self.bodies.lock().unwrap().take().unwrap_or_default();
            Ok(futures::stream::iter(bodies).boxed())
        }
    }

    fn registry() -> Arc<ConnectionRegistry> {
        Arc::new(ConnectionRegistry::new(RegistryConfig {
            write_timeout: Duration::from_millis(200),
            outbound_buffer: 16,
        }))
    }

    async fn connect(
        registry: &Arc<ConnectionRegistry>,
        tenant: &str,
    ) -> fmpsc::UnboundedReceiver<Message> {
        let (sink, client) = fmpsc::unbounded();
        let identity = Identity {
            user_id: format!("agent-{}", tenant),
            tenant_id: TenantId::from(tenant),
            role: UserRole::Agent,
        };
        registry.register(identity, sink).await;
        client
    }

    async fn next_text(client: &mut fmpsc::UnboundedReceiver<Message>) -> Option<String> {
        match tokio::time::timeout(Duration::from_secs(1), client.next()).await {
            Ok(Some(Message::Text(text))) => Some(text),
            _ => None,
        }
    }

    async fn assert_silent(client: &mut fmpsc::UnboundedReceiver<Message>) {
        let got = tokio::time::timeout(Duration::from_millis(100), client.next()).await;
        assert!(got.is_err(), "expected no frame, got {:?}", got);
    }

    #[tokio::test]
    async fn test_tenant_tagged_event_is_scoped() {
        let registry = registry();
        let mut t1 = connect(&registry, "t1").await;
        let mut t2 = connect(&registry, "t2").await;
        let bridge = BrokerBridge::new(Arc::clone(&registry), BridgeStatus::new());

        let body = br#"{"tenant_id": "t1", "x": 1}"#;
        let report = bridge.handle_delivery(body).await.unwrap();
        assert_eq!(report.targeted, 1);

        assert_eq!(next_text(&mut t1).await.as_deref(), Some(r#"{"tenant_id": "t1", "x": 1}"#));
        assert_silent(&mut t2).await;
    }

    #[tokio::test]
    async fn test_untagged_and_malformed_events_reach_everyone() {
        let registry = registry();
        let mut t1 = connect(&registry, "t1").await;
        let mut t2 = connect(&registry, "t2").await;
        let bridge = BrokerBridge::new(Arc::clone(&registry), BridgeStatus::new());

        for body in [&br#"{"x":1}"#[..], &b"definitely not json"[..]] {
            let report = bridge.handle_delivery(body).await.unwrap();
            assert_eq!(report.targeted, 2);

            let expected = std::str::from_utf8(body).unwrap();
            assert_eq!(next_text(&mut t1).await.as_deref(), Some(expected));
            assert_eq!(next_text(&mut t2).await.as_deref(), Some(expected));
        }
    }

    #[tokio::test]
    async fn test_drop_policy_discards_untagged_events() {
        let registry = registry();
        let mut t1 = connect(&registry, "t1").await;
        let bridge = BrokerBridge::new(Arc::clone(&registry), BridgeStatus::new())
            .with_unscoped_policy(UnscopedPolicy::Drop);

        assert!(bridge.handle_delivery(br#"{"x":1}"#).await.is_none());
        assert_silent(&mut t1).await;

        // Tagged events are unaffected by the policy
        assert!(bridge.handle_delivery(br#"{"tenant_id":"t1"}"#).await.is_some());
        assert_eq!(next_text(&mut t1).await.as_deref(), Some(r#"{"tenant_id":"t1"}"#));
    }

    #[tokio::test]
    async fn test_run_forwards_deliveries_then_stops() {
        let registry = registry();
        let mut acme = connect(&registry, "acme").await;
        let status = BridgeStatus::new();
        let bridge = BrokerBridge::new(Arc::clone(&registry), status.clone());

        let broker = MockBroker::new(
            FailAt::Nothing,
            vec![
                Ok(br#"{"tenant_id":"acme","type":"message.received"}"#.to_vec()),
                Ok(br#"{"tenant_id":"other","type":"message.received"}"#.to_vec()),
                Ok(br#"{"type":"conversation.closed"}"#.to_vec()),
            ],
        );

        bridge.run(&broker).await.unwrap();
        assert_eq!(status.get(), BridgeState::Stopped);

        let bindings = broker.bindings.lock().unwrap().clone();
        assert_eq!(
            bindings,
            vec![(
                "amq.gen-test".to_string(),
                "conversation.events".to_string(),
                "#".to_string()
            )]
        );

        assert_eq!(
            next_text(&mut acme).await.as_deref(),
            Some(r#"{"tenant_id":"acme","type":"message.received"}"#)
        );
        assert_eq!(
            next_text(&mut acme).await.as_deref(),
            Some(r#"{"type":"conversation.closed"}"#)
        );
        assert_silent(&mut acme).await;
    }

    #[tokio::test]
    async fn test_exchange_declare_failure_does_not_block_bridge() {
        let registry = registry();
        let mut acme = connect(&registry, "acme").await;
        let status = BridgeStatus::new();
        let bridge = BrokerBridge::new(Arc::clone(&registry), status.clone());

        let broker = MockBroker::new(
            FailAt::ExchangeDeclare,
            vec![Ok(br#"{"tenant_id":"acme"}"#.to_vec())],
        );

        assert!(crate::broker::ensure_exchange(&broker, "conversation.events")
            .await
            .is_ok());

        bridge.run(&broker).await.unwrap();
        assert_eq!(broker.bindings.lock().unwrap().len(), 1);
        assert_eq!(next_text(&mut acme).await.as_deref(), Some(r#"{"tenant_id":"acme"}"#));
    }

    #[tokio::test]
    async fn test_ensure_exchange_fails_without_channel() {
        let broker = MockBroker::new(FailAt::ChannelOpen, Vec::new());
        let err = crate::broker::ensure_exchange(&broker, "conversation.events")
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::ChannelOpen(_)));
    }

    #[tokio::test]
    async fn test_delivery_error_ends_run() {
        let registry = registry();
        let bridge = BrokerBridge::new(Arc::clone(&registry), BridgeStatus::new());
        let broker = MockBroker::new(
            FailAt::Nothing,
            vec![Err(BrokerError::Delivery("connection reset".into()))],
        );

        let err = bridge.run(&broker).await.unwrap_err();
        assert!(!err.is_setup_failure());
    }

    #[tokio::test]
    async fn test_setup_failures_end_bridge_without_panicking() {
        for fail_at in [
            FailAt::ChannelOpen,
            FailAt::QueueDeclare,
            FailAt::QueueBind,
            FailAt::Consume,
        ] {
            let registry = registry();
            let status = BridgeStatus::new();
            let bridge = BrokerBridge::new(Arc::clone(&registry), status.clone());
            let broker: Arc<dyn Broker> = Arc::new(MockBroker::new(fail_at, Vec::new()));

            let handle = bridge.spawn(broker);
            assert!(handle.await.is_ok(), "bridge task must not panic");
            assert_eq!(status.get(), BridgeState::Stopped);

            // Registry keeps working for direct broadcasts
            let mut client = connect(&registry, "acme").await;
            let report = registry.broadcast(b"manual", &TenantId::from("acme")).await;
            assert_eq!(report.queued, 1);
            assert_eq!(next_text(&mut client).await.as_deref(), Some("manual"));
        }
    }
}
