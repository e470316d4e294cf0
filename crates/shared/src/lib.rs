//! Helpdesk Shared Types
//!
//! Types shared between the realtime fan-out service and the producers that
//! publish domain events onto the broker topic.

pub mod error;
pub mod events;
pub mod types;

pub use error::*;
pub use events::*;
pub use types::*;
