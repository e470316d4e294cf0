//! WebSocket support for real-time agent dashboards
//!
//! Delivers domain events from the broker bridge to connected agents, scoped
//! by tenant.
//!
//! # Architecture
//!
//! - **Connection**: an authenticated client session with a single writer task
//! - **Registry**: tenant-tagged set of live connections, owns add/remove/broadcast
//! - **Lifecycle**: phase tracking for one connection attempt
//! - **Handler**: Axum WebSocket route handler

pub mod connection;
pub mod handler;
pub mod lifecycle;
pub mod registry;

pub use connection::{Connection, ConnectionState, DeliveryError};
pub use handler::ws_handler;
pub use registry::{BroadcastReport, ConnectionRegistry, RegistryConfig, RegistryStats};
