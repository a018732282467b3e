//! Account types for clipledger.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::UserId;

/// Credits granted to an account the first time it is touched.
pub const DEFAULT_STARTING_BALANCE: i64 = 3;

/// Largest amount a single grant or redemption code may carry.
pub const MAX_CREDIT_AMOUNT: i64 = 1_000_000;

/// A credit account for a user.
///
/// Accounts are created lazily with the starting grant and are never deleted.
/// The balance only moves through guarded store operations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// The user ID (identity token subject).
    pub user_id: UserId,

    /// Current credit balance. Never negative.
    pub balance: i64,

    /// Customer reference at the payment provider, once known.
    pub payment_customer_id: Option<String>,

    /// When the account was created.
    pub created_at: DateTime<Utc>,

    /// When the account was last updated.
    pub updated_at: DateTime<Utc>,
}

impl Account {
    /// Create a new account with the given opening balance.
    #[must_use]
    pub fn new(user_id: UserId, balance: i64) -> Self {
        let now = Utc::now();
        Self {
            user_id,
            balance,
            payment_customer_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Check if the account can cover a deduction.
    #[must_use]
    pub fn has_sufficient_credits(&self, amount: i64) -> bool {
        self.balance >= amount
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_account_uses_opening_balance() {
        let user = UserId::new("user_1").unwrap();
        let account = Account::new(user.clone(), DEFAULT_STARTING_BALANCE);
        assert_eq!(account.user_id, user);
        assert_eq!(account.balance, 3);
        assert!(account.payment_customer_id.is_none());
        assert_eq!(account.created_at, account.updated_at);
    }

    #[test]
    fn sufficiency_is_inclusive() {
        let account = Account::new(UserId::new("user_1").unwrap(), 2);
        assert!(account.has_sufficient_credits(2));
        assert!(!account.has_sufficient_credits(3));
    }
}
