//! Error types for the tariff model

use thiserror::Error;

/// Result type for tariff operations
pub type TariffResult<T> = Result<T, TariffError>;

/// Error types for tariff construction, validation and loading
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TariffError {
    /// Period constructor validation failure
    #[error("Invalid period: {0}")]
    InvalidPeriod(String),

    /// Any violation of tariff validity, including malformed wire data
    #[error("Invalid tariff: {0}")]
    InvalidTariff(String),
}

impl TariffError {
    /// Shorthand for an [`TariffError::InvalidPeriod`] with a formatted cause
    pub fn invalid_period(cause: impl Into<String>) -> Self {
        TariffError::InvalidPeriod(cause.into())
    }

    /// Shorthand for an [`TariffError::InvalidTariff`] with a formatted cause
    pub fn invalid_tariff(cause: impl Into<String>) -> Self {
        TariffError::InvalidTariff(cause.into())
    }
}
