//! Canonical fault taxonomy
//!
//! Every failure an adapter operation can surface maps to exactly one of
//! these variants. Vendor error strings are classified once, right after the
//! transport call returns; nothing downstream re-interprets them.

use thiserror::Error;

/// Result alias used throughout the adapter.
pub type Result<T> = std::result::Result<T, ExchangeError>;

#[derive(Error, Debug)]
pub enum ExchangeError {
    /// Venue throttling (HTTP 418/429).
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// Missing or invalid credentials, including a missing TOTP secret.
    #[error("authentication error: {0}")]
    Authentication(String),

    /// The caller omitted or supplied an unusable parameter.
    #[error("invalid argument: {0}")]
    Argument(String),

    #[error("insufficient funds: {0}")]
    InsufficientFunds(String),

    #[error("invalid order: {0}")]
    InvalidOrder(String),

    #[error("order not found: {0}")]
    OrderNotFound(String),

    /// Vendor error that matched no entry in the classification table.
    /// Carries the raw response body for diagnostics.
    #[error("exchange error: {0}")]
    Exchange(String),

    /// Propagated opaquely from the transport collaborator.
    #[error("transport error: {0}")]
    Transport(String),

    /// Decimal-string arithmetic was asked to divide by zero.
    #[error("division by zero")]
    DivisionByZero,

    /// An operand handed to the decimal-string arithmetic did not parse.
    #[error("invalid decimal literal: {0}")]
    InvalidDecimal(String),
}

impl From<reqwest::Error> for ExchangeError {
    fn from(err: reqwest::Error) -> Self {
        ExchangeError::Transport(err.to_string())
    }
}
