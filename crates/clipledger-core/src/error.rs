//! Error types for clipledger.

use crate::ids::IdError;

/// Result type for clipledger operations.
pub type Result<T> = std::result::Result<T, LedgerError>;

/// Domain errors raised by ledger, job and code operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    /// The account cannot cover the requested amount.
    #[error("insufficient credits: balance={balance}, required={required}")]
    InsufficientCredit {
        /// Balance observed when the reservation was refused.
        balance: i64,
        /// Amount that was requested.
        required: i64,
    },

    /// No redemption code with this value exists.
    #[error("redemption code not found")]
    CodeNotFound,

    /// The redemption code was already claimed.
    #[error("redemption code already redeemed")]
    CodeAlreadyRedeemed,

    /// Job not found (or not visible to the caller).
    #[error("job not found: {job_id}")]
    JobNotFound {
        /// The job ID that was not found.
        job_id: String,
    },

    /// Payment transaction not found.
    #[error("transaction not found: {transaction_id}")]
    TransactionNotFound {
        /// The transaction ID that was not found.
        transaction_id: String,
    },

    /// Invalid amount.
    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    /// Invalid identifier.
    #[error("invalid identifier: {0}")]
    InvalidId(#[from] IdError),
}
