//! Authentication gate for the WebSocket upgrade
//!
//! Runs before the upgrade is accepted. A rejected handshake never reaches
//! the connection registry, so nothing has to be cleaned up on failure.

use axum::http::{header, HeaderMap};

use helpdesk_shared::{TenantId, UserRole};

use super::jwt::{JwtError, JwtManager};

/// Identity extracted from a verified credential
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: String,
    pub tenant_id: TenantId,
    pub role: UserRole,
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("token required")]
    Unauthenticated,
    #[error("invalid token")]
    InvalidCredential(#[source] JwtError),
}

/// Pick the bearer credential for an upgrade request.
///
/// The `token` query parameter wins; the `Authorization: Bearer` header is
/// the fallback. Empty values count as absent.
pub fn extract_credential(query_token: Option<&str>, headers: &HeaderMap) -> Option<String> {
    if let Some(token) = query_token.map(str::trim).filter(|t| !t.is_empty()) {
        return Some(token.to_string());
    }

    headers
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
}

/// Verifies credentials presented at connection time
#[derive(Clone)]
pub struct AuthGate {
    jwt: JwtManager,
}

impl AuthGate {
    pub fn new(jwt: JwtManager) -> Self {
        Self { jwt }
    }

    /// Verify a credential and decode the identity it carries.
    pub fn authenticate(&self, credential: Option<&str>) -> Result<Identity, AuthError> {
        let token = credential.ok_or(AuthError::Unauthenticated)?;

        let claims = self
            .jwt
            .validate_token(token)
            .map_err(AuthError::InvalidCredential)?;

        Ok(Identity {
            user_id: claims.user_id,
            tenant_id: claims.tenant_id,
            role: claims.role,
        })
    }
}
