//! Shared application state

use std::sync::Arc;

use crate::auth::{AuthGate, JwtManager};
use crate::broker::BridgeStatus;
use crate::config::Config;
use crate::websocket::{ConnectionRegistry, RegistryConfig};

/// State handed to every handler
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub auth_gate: AuthGate,
    pub registry: Arc<ConnectionRegistry>,
    pub bridge_status: BridgeStatus,
}

impl AppState {
    /// Build state with a fresh registry sized from `config`
    pub fn new(config: Config) -> Self {
        let registry = Arc::new(ConnectionRegistry::new(RegistryConfig::from(&config)));
        Self::with_registry(config, registry)
    }

    pub fn with_registry(config: Config, registry: Arc<ConnectionRegistry>) -> Self {
        let jwt = JwtManager::new(&config.jwt_secret, config.jwt_expiry_hours);

        Self {
            config: Arc::new(config),
            auth_gate: AuthGate::new(jwt),
            registry,
            bridge_status: BridgeStatus::new(),
        }
    }
}
