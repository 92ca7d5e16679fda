use thiserror::Error;

#[derive(Error, Debug)]
pub enum SignalError {
    #[error("Configuration invalid: {0}")]
    ConfigInvalid(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Unknown symbol: {0}")]
    SymbolUnknown(String),

    #[error("No data: {0}")]
    Empty(String),

    #[error("Invalid series: {0}")]
    InvalidSeries(String),

    #[error("Insufficient history: {0}")]
    InsufficientHistory(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Cancelled: {0}")]
    Cancelled(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl SignalError {
    /// Stable machine-readable kind, used in scanner skip reasons and health output.
    pub fn kind(&self) -> &'static str {
        match self {
            SignalError::ConfigInvalid(_) => "CONFIG_INVALID",
            SignalError::Network(_) => "NETWORK",
            SignalError::RateLimited(_) => "RATE_LIMITED",
            SignalError::SymbolUnknown(_) => "SYMBOL_UNKNOWN",
            SignalError::Empty(_) => "EMPTY",
            SignalError::InvalidSeries(_) => "INVALID_SERIES",
            SignalError::InsufficientHistory(_) => "INSUFFICIENT_HISTORY",
            SignalError::Database(_) => "DATABASE",
            SignalError::Cancelled(_) => "RATE_CANCELLED",
            SignalError::Internal(_) => "INTERNAL",
        }
    }

    /// Recoverable errors may be retried or skipped by callers; the rest
    /// should propagate.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            SignalError::Network(_)
                | SignalError::RateLimited(_)
                | SignalError::SymbolUnknown(_)
                | SignalError::Empty(_)
        )
    }
}
