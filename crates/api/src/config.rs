//! Application configuration

use std::env;
use std::time::Duration;

use helpdesk_shared::{ALL_ROUTING_KEYS, CONVERSATION_EVENTS_EXCHANGE};

/// What the bridge does with an event that carries no usable tenant tag
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnscopedPolicy {
    /// Deliver to every connected client of every tenant
    Broadcast,
    /// Drop the event
    Drop,
}

impl UnscopedPolicy {
    fn parse(value: &str) -> Result<Self, ConfigError> {
        match value.trim().to_ascii_lowercase().as_str() {
            "broadcast" | "" => Ok(UnscopedPolicy::Broadcast),
            "drop" => Ok(UnscopedPolicy::Drop),
            _ => Err(ConfigError::Invalid(
                "REALTIME_UNSCOPED_POLICY must be 'broadcast' or 'drop'",
            )),
        }
    }
}

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    // Server
    pub bind_address: String,

    // Authentication
    pub jwt_secret: String,
    pub jwt_expiry_hours: i64,

    // Broker
    pub rabbitmq_url: String,
    pub realtime_exchange: String,
    pub realtime_binding_key: String,
    pub unscoped_policy: UnscopedPolicy,

    // WebSocket delivery
    pub ws_write_timeout_ms: u64,
    pub ws_outbound_buffer: usize,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            // Server
            bind_address: env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:8080".to_string()),

            // Authentication
            jwt_secret: {
                let secret =
                    env::var("JWT_SECRET").map_err(|_| ConfigError::Missing("JWT_SECRET"))?;
                if secret.len() < 32 {
                    return Err(ConfigError::WeakSecret(
                        "JWT_SECRET must be at least 32 characters",
                    ));
                }
                secret
            },
            jwt_expiry_hours: env::var("JWT_EXPIRY_HOURS")
                .unwrap_or_else(|_| "24".to_string())
                .parse()
                .unwrap_or(24),

            // Broker
            rabbitmq_url: env::var("RABBITMQ_URL").unwrap_or_else(|_| {
                format!(
                    "amqp://{}:{}@{}:{}/%2f",
                    env::var("RABBITMQ_USER").unwrap_or_else(|_| "guest".to_string()),
                    env::var("RABBITMQ_PASSWORD").unwrap_or_else(|_| "guest".to_string()),
                    env::var("RABBITMQ_HOST").unwrap_or_else(|_| "localhost".to_string()),
                    env::var("RABBITMQ_PORT").unwrap_or_else(|_| "5672".to_string()),
                )
            }),
            realtime_exchange: env::var("REALTIME_EXCHANGE")
                .unwrap_or_else(|_| CONVERSATION_EVENTS_EXCHANGE.to_string()),
            realtime_binding_key: env::var("REALTIME_BINDING_KEY")
                .unwrap_or_else(|_| ALL_ROUTING_KEYS.to_string()),
            unscoped_policy: UnscopedPolicy::parse(
                &env::var("REALTIME_UNSCOPED_POLICY").unwrap_or_default(),
            )?,

            // WebSocket delivery
            ws_write_timeout_ms: env::var("WS_WRITE_TIMEOUT_MS")
                .unwrap_or_else(|_| "10000".to_string())
                .parse()
                .ok()
                .filter(|n| *n > 0)
                .unwrap_or(10000),
            ws_outbound_buffer: env::var("WS_OUTBOUND_BUFFER")
                .unwrap_or_else(|_| "256".to_string())
                .parse()
                .ok()
                .filter(|n| *n > 0)
                .unwrap_or(256),
        })
    }

    pub fn ws_write_timeout(&self) -> Duration {
        Duration::from_millis(self.ws_write_timeout_ms)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),
    #[error("Weak secret: {0}")]
    WeakSecret(&'static str),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}
