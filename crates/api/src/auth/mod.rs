//! Authentication for realtime connections

pub mod gate;
pub mod jwt;

pub use gate::{extract_credential, AuthError, AuthGate, Identity};
pub use jwt::{Claims, JwtError, JwtManager};
