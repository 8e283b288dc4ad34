//! Error types for event delivery

use thiserror::Error;

/// Failure of a single delivery attempt to one subscriber
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    /// Network hiccup, timeout or overloaded edge; worth another attempt
    #[error("Transient delivery failure: {0}")]
    Transient(String),

    /// Subscriber refused the event; retrying will not help
    #[error("Delivery rejected: {0}")]
    Rejected(String),

    /// Subscriber was dropped or shut down
    #[error("Subscriber gone: {0}")]
    SubscriberGone(String),
}

impl DeliveryError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, DeliveryError::Transient(_))
    }
}
