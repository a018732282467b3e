//! Credit purchases: pending transactions, checkouts and webhook ingest.
//!
//! A purchase starts as a `pending` transaction whose id travels to the
//! provider in checkout metadata. The provider's signed webhook carries the
//! id back, and the guarded `pending -> succeeded` flip decides whether this
//! delivery is the one that applies the credits. Duplicates, replays and
//! events for unknown transactions are acknowledged without effect.

use std::sync::Arc;

use serde::Deserialize;

use clipledger_core::{
    CreditPack, PaymentTransaction, TransactionId, TransactionStatus, UserId,
};
use clipledger_store::{SettleOutcome, Store};

use crate::config::ProductIds;
use crate::crypto::verify_signature;
use crate::error::{Result, ServiceError};
use crate::ledger::LedgerService;
use crate::payments::{CheckoutMetadata, CheckoutRequest, PaymentProvider};

/// Header carrying the webhook signature.
pub const SIGNATURE_HEADER: &str = "creem-signature";

/// Provider events we understand. Everything else decodes as `Unhandled`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "eventType")]
pub enum ProviderEvent {
    /// A hosted checkout finished and was paid.
    #[serde(rename = "checkout.completed")]
    CheckoutCompleted {
        /// Checkout object.
        object: EventObject,
    },
    /// An order was paid.
    #[serde(rename = "order.paid")]
    OrderPaid {
        /// Order object.
        object: EventObject,
    },
    /// Any other event type.
    #[serde(other)]
    Unhandled,
}

/// The `object` of a payment event.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EventObject {
    /// Provider id of the checkout or order.
    #[serde(default)]
    pub id: Option<String>,
    /// Metadata echoed from checkout creation.
    #[serde(default)]
    pub metadata: Option<EventMetadata>,
    /// Paying customer.
    #[serde(default)]
    pub customer: Option<CustomerRef>,
}

/// Checkout metadata as echoed by the provider.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EventMetadata {
    /// Idempotency key.
    #[serde(default)]
    pub transaction_id: Option<String>,
    /// Buying account, informational.
    #[serde(default)]
    pub user_id: Option<String>,
    /// Credits, sent as a number or a string.
    #[serde(default)]
    pub credits: Option<LooseInt>,
}

/// An integer that may arrive as a JSON number or string.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum LooseInt {
    /// A JSON number.
    Int(i64),
    /// A numeric string.
    Text(String),
}

impl LooseInt {
    /// The integer value, if it parses.
    #[must_use]
    pub fn value(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            Self::Text(s) => s.trim().parse().ok(),
        }
    }
}

/// A customer given either as a bare id or as an object.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum CustomerRef {
    /// Bare customer id.
    Id(String),
    /// Expanded customer object.
    Object {
        /// Customer id.
        id: String,
    },
}

impl CustomerRef {
    /// The customer id.
    #[must_use]
    pub fn id(&self) -> &str {
        match self {
            Self::Id(id) | Self::Object { id } => id,
        }
    }
}

/// What applying an event did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventOutcome {
    /// This delivery applied the transaction's credits.
    Credited {
        /// Credited account.
        user_id: UserId,
        /// Credits applied.
        credits: i64,
        /// Balance afterwards.
        balance: i64,
    },
    /// The transaction was already final; nothing changed.
    Duplicate {
        /// Status found.
        status: TransactionStatus,
    },
    /// No matching transaction; the event was dropped.
    UnknownTransaction,
    /// Event type not handled.
    Ignored,
}

/// A created checkout.
#[derive(Debug, Clone)]
pub struct Checkout {
    /// The pending transaction backing the checkout.
    pub transaction: PaymentTransaction,
    /// Hosted checkout page.
    pub checkout_url: String,
    /// Provider checkout id.
    pub session_id: String,
}

/// Webhook verification and checkout settings.
#[derive(Debug, Clone, Default)]
pub struct PaymentSettings {
    /// HMAC secret for webhook signatures.
    pub webhook_secret: Option<String>,
    /// Accept unsigned webhooks while no secret is configured.
    pub allow_unsigned: bool,
    /// Frontend base URL for redirects.
    pub frontend_url: String,
    /// Provider product per credit pack.
    pub products: ProductIds,
}

/// Transaction log and webhook ingest.
#[derive(Clone)]
pub struct WebhookIngest {
    store: Arc<dyn Store>,
    ledger: LedgerService,
    provider: Option<Arc<dyn PaymentProvider>>,
    settings: Arc<PaymentSettings>,
}

impl WebhookIngest {
    /// Create the ingest.
    pub fn new(
        store: Arc<dyn Store>,
        ledger: LedgerService,
        provider: Option<Arc<dyn PaymentProvider>>,
        settings: PaymentSettings,
    ) -> Self {
        Self {
            store,
            ledger,
            provider,
            settings: Arc::new(settings),
        }
    }

    /// Record a pending purchase of `pack` with a fresh transaction id.
    pub async fn initiate_transaction(
        &self,
        user_id: &UserId,
        pack: CreditPack,
    ) -> Result<PaymentTransaction> {
        self.ledger.ensure_account(user_id).await?;

        let transaction = PaymentTransaction::pending(
            user_id.clone(),
            pack.price_cents(),
            pack.credits(),
            pack.name(),
        );
        self.store.insert_transaction(&transaction).await?;

        tracing::info!(
            transaction_id = %transaction.id,
            user_id = %user_id,
            pack = %pack,
            credits = transaction.credits,
            "Transaction initiated"
        );
        Ok(transaction)
    }

    /// Create a pending transaction and a hosted checkout for it.
    ///
    /// If the provider refuses, the transaction is marked failed.
    pub async fn checkout(&self, user_id: &UserId, pack: CreditPack) -> Result<Checkout> {
        let provider = self
            .provider
            .as_ref()
            .ok_or(ServiceError::NotConfigured("payment provider"))?;
        let product_id = self
            .settings
            .products
            .get(pack)
            .ok_or(ServiceError::NotConfigured("credit pack product"))?
            .to_string();

        let transaction = self.initiate_transaction(user_id, pack).await?;

        let request = CheckoutRequest {
            product_id,
            success_url: format!(
                "{}/en/dashboard?payment=success&credits={}",
                self.settings.frontend_url.trim_end_matches('/'),
                pack.credits()
            ),
            metadata: CheckoutMetadata {
                user_id: user_id.to_string(),
                transaction_id: transaction.id.to_string(),
                pack: pack.name().to_string(),
                credits: pack.credits(),
            },
        };

        match provider.create_checkout(&request).await {
            Ok(session) => {
                tracing::info!(
                    transaction_id = %transaction.id,
                    session_id = %session.id,
                    "Checkout created"
                );
                Ok(Checkout {
                    transaction,
                    checkout_url: session.checkout_url,
                    session_id: session.id,
                })
            }
            Err(e) => {
                tracing::warn!(
                    transaction_id = %transaction.id,
                    error = %e,
                    "Checkout creation failed"
                );
                self.store.fail_transaction(&transaction.id).await?;
                Err(e.into())
            }
        }
    }

    /// Check the signature over the raw body.
    pub fn verify(&self, body: &[u8], signature: Option<&str>) -> Result<()> {
        match &self.settings.webhook_secret {
            Some(secret) => {
                let signature = signature.ok_or_else(|| {
                    tracing::warn!("Webhook without signature refused");
                    ServiceError::WebhookUnverified
                })?;
                if verify_signature(secret, body, signature) {
                    Ok(())
                } else {
                    tracing::warn!("Webhook with invalid signature refused");
                    Err(ServiceError::WebhookUnverified)
                }
            }
            None if self.settings.allow_unsigned => {
                tracing::warn!("Webhook secret not configured, accepting unsigned event");
                Ok(())
            }
            None => {
                tracing::error!("Webhook secret not configured, refusing event");
                Err(ServiceError::WebhookUnverified)
            }
        }
    }

    /// Verify, decode and apply one webhook delivery.
    pub async fn apply_event(&self, body: &[u8], signature: Option<&str>) -> Result<EventOutcome> {
        self.verify(body, signature)?;

        let event: ProviderEvent =
            serde_json::from_slice(body).map_err(|e| ServiceError::MalformedEvent(e.to_string()))?;

        match event {
            ProviderEvent::CheckoutCompleted { object } => {
                tracing::info!(event_type = "checkout.completed", "Payment event received");
                self.settle(object).await
            }
            ProviderEvent::OrderPaid { object } => {
                tracing::info!(event_type = "order.paid", "Payment event received");
                self.settle(object).await
            }
            ProviderEvent::Unhandled => {
                tracing::debug!("Unhandled payment event");
                Ok(EventOutcome::Ignored)
            }
        }
    }

    async fn settle(&self, object: EventObject) -> Result<EventOutcome> {
        let metadata = object.metadata.unwrap_or_default();

        let Some(transaction_id) = metadata
            .transaction_id
            .as_deref()
            .and_then(|raw| raw.parse::<TransactionId>().ok())
        else {
            tracing::warn!(
                raw = ?metadata.transaction_id,
                object_id = ?object.id,
                "Payment event without a usable transaction id, dropped"
            );
            return Ok(EventOutcome::UnknownTransaction);
        };

        let Some(transaction) = self.store.get_transaction(&transaction_id).await? else {
            tracing::warn!(transaction_id = %transaction_id, "Payment event for unknown transaction, dropped");
            return Ok(EventOutcome::UnknownTransaction);
        };

        if transaction.status != TransactionStatus::Pending {
            tracing::info!(
                transaction_id = %transaction_id,
                status = %transaction.status,
                "Duplicate payment event ignored"
            );
            return Ok(EventOutcome::Duplicate {
                status: transaction.status,
            });
        }

        if let Some(claimed) = metadata.credits.as_ref().and_then(LooseInt::value) {
            if claimed != transaction.credits {
                tracing::warn!(
                    transaction_id = %transaction_id,
                    event_credits = claimed,
                    recorded_credits = transaction.credits,
                    "Event credits differ from recorded transaction, using recorded value"
                );
            }
        }

        self.ledger.ensure_account(&transaction.user_id).await?;

        match self
            .store
            .settle_transaction(&transaction_id, object.id.as_deref())
            .await?
        {
            SettleOutcome::Applied {
                user_id,
                credits,
                balance,
            } => {
                tracing::info!(
                    transaction_id = %transaction_id,
                    user_id = %user_id,
                    credits,
                    balance,
                    "Purchase credited"
                );
                if let Some(customer) = &object.customer {
                    if let Err(e) = self
                        .store
                        .set_payment_customer(&user_id, customer.id())
                        .await
                    {
                        tracing::warn!(user_id = %user_id, error = %e, "Failed to link payment customer");
                    }
                }
                Ok(EventOutcome::Credited {
                    user_id,
                    credits,
                    balance,
                })
            }
            SettleOutcome::AlreadyFinal { status } => {
                tracing::info!(transaction_id = %transaction_id, status = %status, "Settlement lost race, duplicate ignored");
                Ok(EventOutcome::Duplicate { status })
            }
            SettleOutcome::Missing => Ok(EventOutcome::UnknownTransaction),
        }
    }
}
