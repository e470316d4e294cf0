//! Broker event contract
//!
//! Producers publish one JSON envelope per mutating action onto the
//! `conversation.events` topic exchange. The realtime bridge interprets a
//! single field of that envelope, the top-level string `tenant_id`; the rest
//! of the body is forwarded to clients verbatim.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::EnvelopeError;
use crate::types::TenantId;

/// Topic exchange carrying conversation and ticket domain events
pub const CONVERSATION_EVENTS_EXCHANGE: &str = "conversation.events";

/// Binding key matching every routing key on a topic exchange
pub const ALL_ROUTING_KEYS: &str = "#";

/// Envelope field naming the owning tenant
pub const TENANT_FIELD: &str = "tenant_id";

/// Envelope field naming the event type
pub const TYPE_FIELD: &str = "type";

/// Routing keys used by the helpdesk domain layer
pub mod routing_keys {
    pub const MESSAGE_RECEIVED: &str = "message.received";
    pub const MESSAGE_SENT: &str = "message.sent";
    pub const CONVERSATION_ASSIGNED: &str = "conversation.assigned";
    pub const CONVERSATION_CLOSED: &str = "conversation.closed";
    pub const TICKET_CREATED: &str = "ticket.created";
    pub const TICKET_ESCALATED: &str = "ticket.escalated";

    pub const ALL: &[&str] = &[
        MESSAGE_RECEIVED,
        MESSAGE_SENT,
        CONVERSATION_ASSIGNED,
        CONVERSATION_CLOSED,
        TICKET_CREATED,
        TICKET_ESCALATED,
    ];

    /// Whether `key` is a routing key the domain layer publishes
    pub fn is_known(key: &str) -> bool {
        ALL.contains(&key)
    }
}

// =============================================================================
// Tenant extraction
// =============================================================================

/// Why an inbound event could not be attributed to a tenant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnscopedReason {
    /// Body is not a JSON object
    NotJsonObject,
    /// Object has no `tenant_id` field
    MissingTenant,
    /// `tenant_id` is present but not a string
    TenantNotString,
    /// `tenant_id` is the empty string
    EmptyTenant,
}

impl UnscopedReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            UnscopedReason::NotJsonObject => "not_json_object",
            UnscopedReason::MissingTenant => "missing_tenant_id",
            UnscopedReason::TenantNotString => "tenant_id_not_string",
            UnscopedReason::EmptyTenant => "empty_tenant_id",
        }
    }
}

/// Delivery scope resolved from an inbound event body
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventScope {
    /// Deliver only to connections of this tenant
    Tenant(TenantId),
    /// No usable tenant tag
    Unscoped(UnscopedReason),
}

impl EventScope {
    /// Resolve the delivery scope of a raw broker body.
    pub fn from_payload(body: &[u8]) -> Self {
        let object = match serde_json::from_slice::<Value>(body) {
            Ok(Value::Object(object)) => object,
            _ => return EventScope::Unscoped(UnscopedReason::NotJsonObject),
        };

        match object.get(TENANT_FIELD) {
            None => EventScope::Unscoped(UnscopedReason::MissingTenant),
            Some(Value::String(tenant)) if tenant.is_empty() => {
                EventScope::Unscoped(UnscopedReason::EmptyTenant)
            }
            Some(Value::String(tenant)) => EventScope::Tenant(TenantId(tenant.clone())),
            Some(_) => EventScope::Unscoped(UnscopedReason::TenantNotString),
        }
    }

    /// Tenant tag to broadcast under; unscoped resolves to the empty tag.
    pub fn tenant(&self) -> TenantId {
        match self {
            EventScope::Tenant(tenant) => tenant.clone(),
            EventScope::Unscoped(_) => TenantId::unscoped(),
        }
    }
}

// =============================================================================
// Envelope
// =============================================================================

/// JSON envelope published by producers
///
/// Serializes flat: `{"type": ..., "tenant_id": ..., <payload fields>}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Event type, equal to the routing key it is published under
    #[serde(rename = "type")]
    pub event_type: String,

    /// Owning tenant
    pub tenant_id: TenantId,

    /// Event-specific fields
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

impl EventEnvelope {
    /// Build an envelope from an arbitrary serializable payload.
    ///
    /// The payload must serialize to a JSON object that does not itself set
    /// `type` or `tenant_id`.
    pub fn new<T: Serialize>(
        event_type: &str,
        tenant_id: impl Into<TenantId>,
        payload: &T,
    ) -> Result<Self, EnvelopeError> {
        let payload = match serde_json::to_value(payload)? {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            _ => return Err(EnvelopeError::PayloadNotObject),
        };

        for reserved in [TYPE_FIELD, TENANT_FIELD] {
            if payload.contains_key(reserved) {
                return Err(EnvelopeError::ReservedField(reserved));
            }
        }

        Ok(Self {
            event_type: event_type.to_string(),
            tenant_id: tenant_id.into(),
            payload,
        })
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, EnvelopeError> {
        Ok(serde_json::to_vec(self)?)
    }
}
