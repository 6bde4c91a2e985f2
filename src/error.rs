//! Broker error types

/// Error type for broker operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrokerError {
    /// The broker has shut down and no longer accepts requests
    Closed,
}

impl std::fmt::Display for BrokerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BrokerError::Closed => write!(f, "Broker is closed"),
        }
    }
}

impl std::error::Error for BrokerError {}

/// Result alias for broker operations
pub type Result<T> = std::result::Result<T, BrokerError>;
