//! Payment transaction log types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::{TransactionId, UserId};

/// Status of a payment transaction. `Succeeded` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    /// Created before checkout; waiting for the provider's confirmation.
    Pending,
    /// Confirmed by the provider; credits applied.
    Succeeded,
    /// Checkout could not be created.
    Failed,
}

impl TransactionStatus {
    /// The stored string form.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "succeeded" => Ok(Self::Succeeded),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown transaction status: {other}")),
        }
    }
}

/// A payment attempt, keyed by an id we generate before checkout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentTransaction {
    /// Idempotency key, echoed back in provider metadata.
    pub id: TransactionId,

    /// Account to credit.
    pub user_id: UserId,

    /// Price in cents.
    pub amount_cents: i64,

    /// Credits applied on success.
    pub credits: i64,

    /// Credit pack name.
    pub pack: String,

    /// Current status.
    pub status: TransactionStatus,

    /// Provider reference (checkout or order id).
    pub external_ref: Option<String>,

    /// When the transaction was created.
    pub created_at: DateTime<Utc>,

    /// When the transaction was last updated.
    pub updated_at: DateTime<Utc>,
}

impl PaymentTransaction {
    /// Create a new pending transaction with a fresh id.
    #[must_use]
    pub fn pending(user_id: UserId, amount_cents: i64, credits: i64, pack: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: TransactionId::generate(),
            user_id,
            amount_cents,
            credits,
            pack: pack.into(),
            status: TransactionStatus::Pending,
            external_ref: None,
            created_at: now,
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_transaction() {
        let tx = PaymentTransaction::pending(UserId::new("u1").unwrap(), 1999, 50, "pro");
        assert_eq!(tx.status, TransactionStatus::Pending);
        assert_eq!(tx.credits, 50);
        assert!(tx.external_ref.is_none());
    }

    #[test]
    fn status_strings() {
        for status in [
            TransactionStatus::Pending,
            TransactionStatus::Succeeded,
            TransactionStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<TransactionStatus>().unwrap(), status);
        }
    }
}
