//! Error types for the payment engine

use thiserror::Error;

/// Result type alias for engine operations
pub type KaspaPayResult<T> = std::result::Result<T, KaspaPayError>;

/// Errors surfaced by the engine.
///
/// Wallet rejections are not errors at this level: they move the session back
/// to the picker and are reported through [`crate::WalletOutcome`].
#[derive(Debug, Error)]
pub enum KaspaPayError {
    /// Address is missing or lacks the network prefix
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    /// Amount could not be used for a payment request
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    /// HTTP transport failure talking to the ledger read API
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The ledger read API answered with a non-success status
    #[error("Ledger API returned {status} for {url}")]
    ApiStatus { status: u16, url: String },

    /// The ledger read API answered with a body we could not interpret
    #[error("Unexpected ledger API response: {0}")]
    ApiResponse(String),

    /// JSON decoding error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid engine configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// The operation needs a live session
    #[error("No active payment session")]
    SessionNotActive,
}
