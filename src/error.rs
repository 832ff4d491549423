//! Error taxonomy.
//!
//! Classification is total and never returns these. Only descriptor
//! construction, feed loading, payment and the scan lifecycle do.

use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DescriptorError {
    #[error("Invalid SHA-256 digest: {0:?}")]
    InvalidHash(String),
}

#[derive(Error, Debug)]
pub enum FeedError {
    #[error("Feed I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Feed has no header row")]
    MissingHeader,
}

/// Failures talking to a payment provider.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PaymentError {
    #[error("Payment provider timed out after {0:?}")]
    Timeout(Duration),

    #[error("Payment provider unreachable: {0}")]
    Unreachable(String),

    #[error("Payment provider error: {0}")]
    Provider(String),
}

impl PaymentError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, PaymentError::Timeout(_) | PaymentError::Unreachable(_))
    }
}

/// Lifecycle errors surfaced to callers.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScanError {
    #[error("Not found: {id}")]
    NotFound { id: String },

    #[error("Payment incomplete: {reason}")]
    PaymentIncomplete { reason: String, retryable: bool },
}

impl ScanError {
    pub fn not_found(id: impl ToString) -> Self {
        ScanError::NotFound { id: id.to_string() }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ScanError::NotFound { .. } => "NOT_FOUND",
            ScanError::PaymentIncomplete { .. } => "PAYMENT_INCOMPLETE",
        }
    }

    pub fn status_code(&self) -> u16 {
        match self {
            ScanError::NotFound { .. } => 404,
            ScanError::PaymentIncomplete { .. } => 402,
        }
    }
}

impl From<PaymentError> for ScanError {
    fn from(err: PaymentError) -> Self {
        ScanError::PaymentIncomplete {
            retryable: err.is_retryable(),
            reason: err.to_string(),
        }
    }
}

pub type ScanResult<T> = Result<T, ScanError>;
