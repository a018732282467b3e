//! Outbound payment-provider API.

mod creem;

pub use creem::CreemClient;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Error type for payment provider operations.
#[derive(Debug, thiserror::Error)]
pub enum PaymentError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The provider returned an error response.
    #[error("payment provider error (status {status}): {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Provider message.
        message: String,
    },

    /// The provider's answer could not be decoded.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Metadata attached to a checkout and echoed back in webhook events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutMetadata {
    /// Buying account.
    pub user_id: String,
    /// Idempotency key of the pending transaction.
    pub transaction_id: String,
    /// Credit pack name.
    pub pack: String,
    /// Credits the pack grants.
    pub credits: i64,
}

/// A checkout to create at the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckoutRequest {
    /// Provider product id.
    pub product_id: String,
    /// Where the provider redirects after payment.
    pub success_url: String,
    /// Metadata echoed in webhook events.
    pub metadata: CheckoutMetadata,
}

/// A checkout created at the provider.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CheckoutSession {
    /// Provider checkout id.
    pub id: String,
    /// Hosted checkout page.
    pub checkout_url: String,
}

/// Creates hosted checkouts at a payment provider.
#[async_trait]
pub trait PaymentProvider: Send + Sync {
    /// Create a checkout for `request`.
    async fn create_checkout(&self, request: &CheckoutRequest)
        -> Result<CheckoutSession, PaymentError>;
}
