//! Application state.

use std::sync::Arc;
use std::time::Duration;

use clipledger_store::Store;

use crate::auth::JwksVerifier;
use crate::config::ServiceConfig;
use crate::dispatch::{Dispatcher, RunPodDispatcher};
use crate::ingest::{PaymentSettings, WebhookIngest};
use crate::ledger::LedgerService;
use crate::lifecycle::JobService;
use crate::objects::{FsObjectStore, HttpObjectStore, ObjectStore};
use crate::payments::{CreemClient, PaymentProvider};
use crate::reconciler::Reconciler;
use crate::registry::CodeRegistry;
use crate::sweeper::Sweeper;

/// External collaborators, built from configuration or injected by tests.
#[derive(Clone)]
pub struct Collaborators {
    /// Worker dispatcher (optional).
    pub dispatcher: Option<Arc<dyn Dispatcher>>,
    /// Object storage for uploads and outputs.
    pub objects: Arc<dyn ObjectStore>,
    /// Payment provider for checkouts (optional).
    pub payments: Option<Arc<dyn PaymentProvider>>,
}

impl Collaborators {
    /// Build collaborators from configuration, logging which integrations are enabled.
    #[must_use]
    pub fn from_config(config: &ServiceConfig) -> Self {
        let timeout = Duration::from_secs(config.dispatch_timeout_seconds);

        let dispatcher = config
            .runpod_endpoint_id
            .as_ref()
            .zip(config.runpod_api_key.as_ref())
            .and_then(|(endpoint, key)| {
                match RunPodDispatcher::new(&config.runpod_base_url, endpoint, key.clone(), timeout)
                {
                    Ok(client) => {
                        tracing::info!(endpoint_id = %endpoint, "RunPod dispatch enabled");
                        Some(Arc::new(client) as Arc<dyn Dispatcher>)
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Failed to create RunPod client");
                        None
                    }
                }
            });

        if dispatcher.is_none() {
            tracing::warn!("RunPod not configured - jobs will stay pending until their output appears");
        }

        let objects: Arc<dyn ObjectStore> = match config.object_store_url.as_ref().map(|url| {
            HttpObjectStore::new(
                url.clone(),
                config.object_store_token.clone(),
                config.public_url_base.clone(),
                timeout,
            )
        }) {
            Some(Ok(store)) => {
                tracing::info!("HTTP object store enabled");
                Arc::new(store)
            }
            Some(Err(e)) => {
                tracing::error!(error = %e, "Failed to create HTTP object store, using local files");
                Arc::new(FsObjectStore::new(
                    &config.object_store_root,
                    config.public_url_base.clone(),
                ))
            }
            None => {
                tracing::info!(root = %config.object_store_root, "Local object store enabled");
                Arc::new(FsObjectStore::new(
                    &config.object_store_root,
                    config.public_url_base.clone(),
                ))
            }
        };

        let payments = config.creem_api_key.as_ref().and_then(|key| {
            match CreemClient::new(key.clone(), config.creem_api_base.clone()) {
                Ok(client) => {
                    tracing::info!(
                        test_mode = config.creem_test_mode(),
                        base_url = %client.base_url(),
                        "Creem integration enabled"
                    );
                    Some(Arc::new(client) as Arc<dyn PaymentProvider>)
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to create Creem client");
                    None
                }
            }
        });

        if payments.is_none() {
            tracing::warn!("Creem not configured - checkouts will not be available");
        }
        if config.creem_webhook_secret.is_none() {
            if config.allow_unsigned_webhooks {
                tracing::warn!("Webhook secret not configured - accepting unsigned payment events");
            } else {
                tracing::warn!("Webhook secret not configured - payment events will be refused");
            }
        }

        Self {
            dispatcher,
            objects,
            payments,
        }
    }
}

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    /// The storage backend.
    pub store: Arc<dyn Store>,

    /// Service configuration.
    pub config: ServiceConfig,

    /// User token verifier.
    pub jwks: Arc<JwksVerifier>,

    /// Object storage for uploads and outputs.
    pub objects: Arc<dyn ObjectStore>,

    /// Balance operations.
    pub ledger: LedgerService,

    /// Job lifecycle.
    pub jobs: JobService,

    /// Redemption codes.
    pub codes: CodeRegistry,

    /// Purchases and payment webhooks.
    pub ingest: WebhookIngest,

    /// Output polling.
    pub reconciler: Reconciler,
}

impl AppState {
    /// Create a new application state with collaborators built from `config`.
    #[must_use]
    pub fn new(store: Arc<dyn Store>, config: ServiceConfig) -> Self {
        let collaborators = Collaborators::from_config(&config);
        Self::from_parts(store, config, collaborators)
    }

    /// Create a new application state with the given collaborators.
    #[must_use]
    pub fn from_parts(
        store: Arc<dyn Store>,
        config: ServiceConfig,
        collaborators: Collaborators,
    ) -> Self {
        let Collaborators {
            dispatcher,
            objects,
            payments,
        } = collaborators;

        let jwks = Arc::new(JwksVerifier::new(
            config.jwks_url(),
            config.auth_base_url.clone(),
            config.auth_audience.clone(),
        ));

        let ledger = LedgerService::new(store.clone(), config.starting_balance);
        let reconciler = Reconciler::new(store.clone(), objects.clone());
        let jobs = JobService::new(
            store.clone(),
            ledger.clone(),
            reconciler.clone(),
            dispatcher,
            config.max_dispatch_attempts,
        );
        let codes = CodeRegistry::new(store.clone(), ledger.clone());
        let ingest = WebhookIngest::new(
            store.clone(),
            ledger.clone(),
            payments,
            PaymentSettings {
                webhook_secret: config.creem_webhook_secret.clone(),
                allow_unsigned: config.allow_unsigned_webhooks,
                frontend_url: config.frontend_url.clone(),
                products: config.products.clone(),
            },
        );

        Self {
            store,
            config,
            jwks,
            objects,
            ledger,
            jobs,
            codes,
            ingest,
            reconciler,
        }
    }

    /// The background sweeper, or `None` if sweeping is disabled.
    #[must_use]
    pub fn sweeper(&self) -> Option<Sweeper> {
        if self.config.sweep_interval_seconds == 0 {
            return None;
        }
        Some(Sweeper::new(
            self.store.clone(),
            self.jobs.clone(),
            self.reconciler.clone(),
            Duration::from_secs(self.config.sweep_interval_seconds),
            Duration::from_secs(self.config.dispatch_retry_delay_seconds),
        ))
    }

    /// Check if worker dispatch is configured.
    #[must_use]
    pub fn has_dispatcher(&self) -> bool {
        self.jobs.can_dispatch()
    }
}
