//! Connection registry
//!
//! Process-wide set of live connections, each tagged with its tenant. The
//! registry is constructed once at startup and shared by `Arc` with the
//! upgrade handler and the broker bridge.
//!
//! Mutation and broadcast snapshots take the same lock. Frames are queued
//! outside of it, so a slow client never stalls registration or another
//! broadcast.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::Message;
use futures::Sink;
use tokio::sync::RwLock;
use uuid::Uuid;

use helpdesk_shared::TenantId;

use super::connection::{frame_for, write_loop, Connection, WriterExit};
use crate::auth::Identity;
use crate::config::Config;

/// Delivery tuning for registered connections
#[derive(Debug, Clone, Copy)]
pub struct RegistryConfig {
    /// Deadline for a single frame write
    pub write_timeout: Duration,
    /// Frames a connection may have queued before it is considered dead
    pub outbound_buffer: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            write_timeout: Duration::from_secs(10),
            outbound_buffer: 256,
        }
    }
}

impl From<&Config> for RegistryConfig {
    fn from(config: &Config) -> Self {
        Self {
            write_timeout: config.ws_write_timeout(),
            outbound_buffer: config.ws_outbound_buffer,
        }
    }
}

/// Result of one broadcast call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Connections selected by the tenant filter
    pub targeted: usize,
    /// Frames queued for writing
    pub queued: usize,
    /// Connections removed because the frame could not be queued
    pub evicted: usize,
}

/// Statistics about the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryStats {
    /// Number of active connections
    pub active_connections: usize,
    /// Number of distinct tenants with at least one connection
    pub active_tenants: usize,
}

/// Live connections indexed by session ID
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<Uuid, Arc<Connection>>>,
    config: RegistryConfig,
}

impl ConnectionRegistry {
    /// Create a new registry
    pub fn new(config: RegistryConfig) -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            config,
        }
    }

    pub fn config(&self) -> RegistryConfig {
        self.config
    }

    /// Register a connection for `identity` writing into `sink`.
    ///
    /// Spawns the connection's writer task. When a write fails or misses its
    /// deadline the writer removes the connection through [`Self::remove`].
    pub async fn register<S>(self: &Arc<Self>, identity: Identity, sink: S) -> Arc<Connection>
    where
        S: Sink<Message> + Unpin + Send + 'static,
        S::Error: std::fmt::Display,
    {
        let (conn, outbound) = Connection::new(identity, self.config.outbound_buffer);
        let conn = Arc::new(conn);

        {
            let mut connections = self.connections.write().await;
            let previous = connections.insert(conn.session_id, Arc::clone(&conn));
            debug_assert!(previous.is_none(), "session IDs are unique");

            tracing::info!(
                session_id = %conn.session_id,
                user_id = %conn.user_id,
                tenant_id = %conn.tenant_id,
                total_connections = connections.len(),
                "WebSocket connection registered"
            );
        }

        let registry = Arc::clone(self);
        let writer_conn = Arc::clone(&conn);
        let write_timeout = self.config.write_timeout;
        tokio::spawn(async move {
            let exit = write_loop(&writer_conn, sink, outbound, write_timeout).await;
            if exit == WriterExit::Dead {
                registry.remove(&writer_conn.session_id).await;
            }
        });

        conn
    }

    /// Remove a connection and close its transport.
    ///
    /// Safe to call any number of times; returns `true` only for the call
    /// that actually removed the entry.
    pub async fn remove(&self, session_id: &Uuid) -> bool {
        let removed = {
            let mut connections = self.connections.write().await;
            connections
                .remove(session_id)
                .map(|conn| (conn, connections.len()))
        };

        match removed {
            Some((conn, remaining)) => {
                conn.begin_close();
                tracing::info!(
                    session_id = %session_id,
                    user_id = %conn.user_id,
                    tenant_id = %conn.tenant_id,
                    remaining_connections = remaining,
                    "WebSocket connection removed"
                );
                true
            }
            None => false,
        }
    }

    /// Deliver `payload` to every connection tagged `tenant`.
    ///
    /// An unscoped (empty) tenant delivers to every connection. Connections
    /// whose frame cannot be queued are removed; the rest still receive it.
    pub async fn broadcast(&self, payload: &[u8], tenant: &TenantId) -> BroadcastReport {
        let targets: Vec<Arc<Connection>> = {
            let connections = self.connections.read().await;
            connections
                .values()
                .filter(|c| tenant.is_unscoped() || c.tenant_id == *tenant)
                .cloned()
                .collect()
        };

        let mut report = BroadcastReport {
            targeted: targets.len(),
            ..Default::default()
        };
        if targets.is_empty() {
            tracing::debug!(tenant_id = %tenant, "No connections for broadcast");
            return report;
        }

        let frame = frame_for(payload);
        let mut dead = Vec::new();
        for conn in &targets {
            match conn.deliver(frame.clone()) {
                Ok(()) => report.queued += 1,
                Err(e) => {
                    tracing::warn!(
                        session_id = %conn.session_id,
                        error = %e,
                        "Dropping connection after failed delivery"
                    );
                    dead.push(conn.session_id);
                }
            }
        }

        for session_id in &dead {
            if self.remove(session_id).await {
                report.evicted += 1;
            }
        }

        tracing::debug!(
            tenant_id = %tenant,
            bytes = payload.len(),
            recipients = report.queued,
            evicted = report.evicted,
            "Broadcast event"
        );

        report
    }

    /// Get a connection by session ID
    pub async fn get_connection(&self, session_id: &Uuid) -> Option<Arc<Connection>> {
        let connections = self.connections.read().await;
        connections.get(session_id).cloned()
    }

    /// Get total number of active connections
    pub async fn connection_count(&self) -> usize {
        let connections = self.connections.read().await;
        connections.len()
    }

    /// Get statistics about the registry
    pub async fn get_stats(&self) -> RegistryStats {
        let connections = self.connections.read().await;
        let tenants: HashSet<&TenantId> = connections.values().map(|c| &c.tenant_id).collect();

        RegistryStats {
            active_connections: connections.len(),
            active_tenants: tenants.len(),
        }
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new(RegistryConfig::default())
    }
}
