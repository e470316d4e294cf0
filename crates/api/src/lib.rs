//! Helpdesk API Library
//!
//! Realtime fan-out for the helpdesk: authenticated WebSocket clients receive
//! the domain events of their own tenant, consumed from RabbitMQ.

pub mod auth;
pub mod broker;
pub mod config;
pub mod error;
pub mod routes;
pub mod state;
pub mod websocket;

pub use broker::{AmqpBroker, AmqpPublisher, BrokerBridge};
pub use config::Config;
pub use error::{ApiError, ApiResult};
pub use routes::create_router;
pub use state::AppState;
pub use websocket::ConnectionRegistry;
