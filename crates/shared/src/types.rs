//! Common types used across the helpdesk realtime stack

use serde::{Deserialize, Serialize};
use std::fmt;

// =============================================================================
// Tenant
// =============================================================================

/// Tenant identifier wrapper
///
/// An empty tenant means "unscoped": a connection carrying it only receives
/// unscoped broadcasts, and a broadcast addressed to it reaches everyone.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantId(pub String);

impl TenantId {
    /// The unscoped tenant tag
    pub fn unscoped() -> Self {
        Self(String::new())
    }

    pub fn is_unscoped(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for TenantId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for TenantId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// =============================================================================
// Roles
// =============================================================================

/// Role carried in identity claims
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    Admin,
    Agent,
    /// Any role string this service does not interpret
    #[serde(untagged)]
    Other(String),
}

impl UserRole {
    pub fn as_str(&self) -> &str {
        match self {
            UserRole::Admin => "admin",
            UserRole::Agent => "agent",
            UserRole::Other(role) => role,
        }
    }
}

impl fmt::Display for UserRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
