//! Single-use redemption codes.

use std::sync::Arc;

use clipledger_core::{
    generate_code, normalize_code, LedgerError, RedemptionCode, UserId, MAX_CREDIT_AMOUNT,
};
use clipledger_store::{ClaimOutcome, CodeFilter, Page, Store};

use crate::error::{Result, ServiceError};
use crate::ledger::LedgerService;

/// Most codes one generate call may create.
pub const MAX_CODES_PER_BATCH: u32 = 500;

/// Longest accepted code prefix.
pub const MAX_PREFIX_LEN: usize = 16;

/// Fresh candidates tried per requested code before giving up.
const CANDIDATES_PER_CODE: u32 = 8;

/// A successful claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Redemption {
    /// Credits the code was worth.
    pub credits: i64,
    /// Claimant's balance afterwards.
    pub balance: i64,
}

/// Claims and mints redemption codes.
#[derive(Clone)]
pub struct CodeRegistry {
    store: Arc<dyn Store>,
    ledger: LedgerService,
}

impl CodeRegistry {
    /// Create the registry.
    pub fn new(store: Arc<dyn Store>, ledger: LedgerService) -> Self {
        Self { store, ledger }
    }

    /// Claim `raw_code` for `user_id` and credit its value, atomically.
    pub async fn claim(&self, raw_code: &str, user_id: &UserId) -> Result<Redemption> {
        let code = normalize_code(raw_code);
        if code.is_empty() {
            return Err(LedgerError::CodeNotFound.into());
        }

        self.ledger.ensure_account(user_id).await?;

        match self.store.claim_code(&code, user_id).await? {
            ClaimOutcome::Claimed { credits, balance } => {
                tracing::info!(code = %code, user_id = %user_id, credits, balance, "Code redeemed");
                Ok(Redemption { credits, balance })
            }
            ClaimOutcome::AlreadyClaimed => {
                tracing::info!(code = %code, user_id = %user_id, "Code already redeemed");
                Err(LedgerError::CodeAlreadyRedeemed.into())
            }
            ClaimOutcome::Missing => {
                tracing::debug!(code = %code, "Unknown code");
                Err(LedgerError::CodeNotFound.into())
            }
        }
    }

    /// Mint `count` new codes worth `credits` each.
    ///
    /// Candidates that collide with an existing code are discarded and
    /// regenerated; the insert itself is insert-if-absent.
    pub async fn generate(
        &self,
        prefix: Option<&str>,
        count: u32,
        credits: i64,
    ) -> Result<Vec<RedemptionCode>> {
        if credits <= 0 || credits > MAX_CREDIT_AMOUNT {
            return Err(LedgerError::InvalidAmount(format!(
                "credits must be between 1 and {MAX_CREDIT_AMOUNT}"
            ))
            .into());
        }
        if count == 0 || count > MAX_CODES_PER_BATCH {
            return Err(ServiceError::InvalidInput(format!(
                "count must be between 1 and {MAX_CODES_PER_BATCH}"
            )));
        }
        if let Some(prefix) = prefix {
            let valid = prefix.trim().len() <= MAX_PREFIX_LEN
                && prefix
                    .trim()
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
            if !valid {
                return Err(ServiceError::InvalidInput(format!(
                    "prefix must be at most {MAX_PREFIX_LEN} letters, digits, '-' or '_'"
                )));
            }
        }

        let mut minted = Vec::with_capacity(count as usize);
        let mut budget = count * CANDIDATES_PER_CODE;

        while minted.len() < count as usize {
            if budget == 0 {
                tracing::error!(
                    minted = minted.len(),
                    requested = count,
                    "Code space exhausted while generating"
                );
                return Err(ServiceError::InvalidInput(
                    "could not find unused codes, try a different prefix".into(),
                ));
            }
            budget -= 1;

            let candidate = generate_code(prefix);
            if self.store.get_code(&candidate).await?.is_some() {
                tracing::debug!(code = %candidate, "Generated code collides, retrying");
                continue;
            }

            let code = RedemptionCode::new(&candidate, credits);
            if self.store.insert_code(&code).await? {
                minted.push(code);
            } else {
                tracing::debug!(code = %candidate, "Code inserted concurrently, retrying");
            }
        }

        tracing::info!(count, credits, prefix = ?prefix, "Redemption codes generated");
        Ok(minted)
    }

    /// List codes matching `filter`, newest first.
    pub async fn list(
        &self,
        filter: &CodeFilter,
        limit: usize,
        offset: usize,
    ) -> Result<Page<RedemptionCode>> {
        Ok(self.store.list_codes(filter, limit, offset).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clipledger_core::CODE_LENGTH;
    use clipledger_store::MemoryStore;

    fn registry() -> (CodeRegistry, LedgerService, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let ledger = LedgerService::new(store.clone(), 0);
        (CodeRegistry::new(store.clone(), ledger.clone()), ledger, store)
    }

    #[tokio::test]
    async fn claim_credits_once() {
        let (registry, ledger, store) = registry();
        store
            .insert_code(&RedemptionCode::new("WELCOME10", 10))
            .await
            .unwrap();
        let alice = UserId::new("alice").unwrap();
        let bob = UserId::new("bob").unwrap();

        let redemption = registry.claim("  welcome10 ", &alice).await.unwrap();
        assert_eq!(
            redemption,
            Redemption {
                credits: 10,
                balance: 10
            }
        );

        let err = registry.claim("WELCOME10", &bob).await.unwrap_err();
        assert!(matches!(
            err,
            ServiceError::Ledger(LedgerError::CodeAlreadyRedeemed)
        ));
        assert_eq!(ledger.balance(&bob).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn unknown_and_blank_codes_are_not_found() {
        let (registry, _, _) = registry();
        let user = UserId::new("alice").unwrap();
        for raw in ["NOPE1234", "   "] {
            let err = registry.claim(raw, &user).await.unwrap_err();
            assert!(matches!(err, ServiceError::Ledger(LedgerError::CodeNotFound)));
        }
    }

    #[tokio::test]
    async fn generates_distinct_prefixed_codes() {
        let (registry, _, store) = registry();
        let codes = registry.generate(Some("tb-"), 20, 5).await.unwrap();

        assert_eq!(codes.len(), 20);
        let mut seen: Vec<_> = codes.iter().map(|c| c.code.clone()).collect();
        seen.sort();
        seen.dedup();
        assert_eq!(seen.len(), 20);

        for code in &codes {
            assert!(code.code.starts_with("TB-"));
            assert_eq!(code.code.len(), 3 + CODE_LENGTH);
            assert_eq!(code.credits, 5);
            assert!(store.get_code(&code.code).await.unwrap().is_some());
        }
    }

    #[tokio::test]
    async fn validates_generate_arguments() {
        let (registry, _, _) = registry();
        assert!(registry.generate(None, 0, 5).await.is_err());
        assert!(registry.generate(None, MAX_CODES_PER_BATCH + 1, 5).await.is_err());
        assert!(registry.generate(None, 1, 0).await.is_err());
        assert!(registry.generate(None, 1, MAX_CREDIT_AMOUNT + 1).await.is_err());
        assert!(registry.generate(Some("bad prefix!"), 1, 5).await.is_err());
    }
}
