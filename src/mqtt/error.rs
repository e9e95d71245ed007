//! Error definitions for the message bus transport

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    /// The broker could not be reached or refused the session
    #[error("Connection failed: {0}")]
    Connect(String),

    /// A single publish could not be queued
    #[error("Publish to {topic} failed: {reason}")]
    Publish { topic: String, reason: String },

    #[error("Subscribe to {filter} failed: {reason}")]
    Subscribe { filter: String, reason: String },

    /// The connection is gone for good
    #[error("Connection closed: {0}")]
    Closed(String),

    #[error("Payload serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl TransportError {
    /// Whether the shared connection itself is lost.
    pub fn is_fatal(&self) -> bool {
        matches!(self, TransportError::Connect(_) | TransportError::Closed(_))
    }
}
