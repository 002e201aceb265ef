//! Envelope decoding errors.

use thiserror::Error;

/// Why an inbound text frame could not be turned into a [`crate::ClientMessage`].
///
/// Every variant is recoverable: the session logs it and keeps reading.
#[derive(Debug, Error)]
pub enum EnvelopeError {
    /// Not valid JSON, not an object, or a field of the wrong shape.
    #[error("invalid envelope JSON: {0}")]
    Json(#[from] serde_json::Error),
    /// Valid JSON object without a `type` discriminator.
    #[error("envelope is missing the `type` field")]
    MissingType,
}
