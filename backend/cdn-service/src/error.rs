use distribution_events::DeliveryError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, CdnError>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CdnError {
    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Delivery error: {0}")]
    Delivery(#[from] DeliveryError),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl CdnError {
    /// Only transient delivery problems are worth another attempt
    pub fn is_retryable(&self) -> bool {
        match self {
            CdnError::Delivery(e) => e.is_retryable(),
            _ => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CdnError::ValidationError(_) => "validation",
            CdnError::NotFound(_) => "not_found",
            CdnError::Delivery(_) => "delivery",
            CdnError::Config(_) => "config",
        }
    }
}
