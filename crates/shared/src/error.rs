//! Error types for the shared envelope contract

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("Envelope payload must be a JSON object")]
    PayloadNotObject,

    #[error("Envelope payload uses reserved field: {0}")]
    ReservedField(&'static str),

    #[error("Envelope serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}
