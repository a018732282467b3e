//! Service configuration.

use std::str::FromStr;

use clipledger_core::{CreditPack, DEFAULT_STARTING_BALANCE};

/// Which storage backend the service runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    /// Process-local store; state is lost on restart.
    Memory,
    /// PostgreSQL at `database_url`.
    Postgres,
    /// `RocksDB` under `data_dir` (feature `rocksdb-backend`).
    Rocks,
}

impl FromStr for StoreBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "postgres" | "postgresql" => Ok(Self::Postgres),
            "rocks" | "rocksdb" => Ok(Self::Rocks),
            other => Err(format!("unknown store backend: {other}")),
        }
    }
}

/// Payment-provider product ids, one per credit pack.
#[derive(Debug, Clone, Default)]
pub struct ProductIds {
    /// Product sold as the starter pack.
    pub starter: Option<String>,
    /// Product sold as the pro pack.
    pub pro: Option<String>,
    /// Product sold as the business pack.
    pub business: Option<String>,
}

impl ProductIds {
    /// Product id configured for `pack`.
    #[must_use]
    pub fn get(&self, pack: CreditPack) -> Option<&str> {
        match pack {
            CreditPack::Starter => self.starter.as_deref(),
            CreditPack::Pro => self.pro.as_deref(),
            CreditPack::Business => self.business.as_deref(),
        }
    }
}

/// Service configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Address to listen on (default: "0.0.0.0:8080").
    pub listen_addr: String,

    /// Storage backend (default: postgres when `DATABASE_URL` is set, memory otherwise).
    pub store_backend: StoreBackend,

    /// PostgreSQL connection string.
    pub database_url: Option<String>,

    /// Maximum PostgreSQL pool size.
    pub database_max_connections: u32,

    /// Path to `RocksDB` data directory (default: "/data/clipledger").
    pub data_dir: String,

    /// JWT issuer (default: `<https://clerk.clipledger.dev>`).
    pub auth_base_url: String,

    /// Expected JWT audience (default: "clipledger").
    pub auth_audience: String,

    /// JWKS location; derived from `auth_base_url` when unset.
    pub jwks_url: Option<String>,

    /// Service API key for worker reports.
    pub service_api_key: Option<String>,

    /// RunPod API base URL.
    pub runpod_base_url: String,

    /// RunPod serverless endpoint id.
    pub runpod_endpoint_id: Option<String>,

    /// RunPod API key.
    pub runpod_api_key: Option<String>,

    /// Dispatch request timeout in seconds.
    pub dispatch_timeout_seconds: u64,

    /// Root directory of the filesystem object store.
    pub object_store_root: String,

    /// Base URL of an HTTP object store; overrides the filesystem store.
    pub object_store_url: Option<String>,

    /// Bearer token for the HTTP object store.
    pub object_store_token: Option<String>,

    /// Public URL prefix for stored objects.
    pub public_url_base: String,

    /// Creem API key (optional). `creem_test_` keys select test mode.
    pub creem_api_key: Option<String>,

    /// Creem API base URL override.
    pub creem_api_base: Option<String>,

    /// Creem webhook signing secret.
    pub creem_webhook_secret: Option<String>,

    /// Product ids per credit pack.
    pub products: ProductIds,

    /// Accept unsigned webhooks when no secret is configured. Development only.
    pub allow_unsigned_webhooks: bool,

    /// Frontend URL for checkout redirects.
    pub frontend_url: String,

    /// CORS allowed origins.
    pub cors_origins: Vec<String>,

    /// Maximum request body size in bytes.
    pub max_body_bytes: usize,

    /// Maximum upload size in bytes.
    pub max_upload_bytes: usize,

    /// Request timeout in seconds.
    pub request_timeout_seconds: u64,

    /// Balance granted to a new account.
    pub starting_balance: i64,

    /// Dispatch attempts before a pending job is failed and refunded.
    pub max_dispatch_attempts: u32,

    /// Seconds between sweeps; 0 disables the sweeper.
    pub sweep_interval_seconds: u64,

    /// Seconds a pending job must sit untouched before it is retried.
    pub dispatch_retry_delay_seconds: u64,
}

impl ServiceConfig {
    /// Load configuration from environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let database_url = env_opt("DATABASE_URL");

        let store_backend = env_opt("STORE_BACKEND")
            .and_then(|s| match s.parse() {
                Ok(backend) => Some(backend),
                Err(e) => {
                    tracing::warn!(error = %e, "Ignoring STORE_BACKEND");
                    None
                }
            })
            .unwrap_or(if database_url.is_some() {
                StoreBackend::Postgres
            } else {
                StoreBackend::Memory
            });

        Self {
            listen_addr: env_or("LISTEN_ADDR", defaults.listen_addr),
            store_backend,
            database_url,
            database_max_connections: env_parse(
                "DATABASE_MAX_CONNECTIONS",
                defaults.database_max_connections,
            ),
            data_dir: env_or("DATA_DIR", defaults.data_dir),
            auth_base_url: env_or("AUTH_BASE_URL", defaults.auth_base_url),
            auth_audience: env_or("AUTH_AUDIENCE", defaults.auth_audience),
            jwks_url: env_opt("JWKS_URL"),
            service_api_key: env_opt("SERVICE_API_KEY"),
            runpod_base_url: env_or("RUNPOD_BASE_URL", defaults.runpod_base_url),
            runpod_endpoint_id: env_opt("RUNPOD_ENDPOINT_ID"),
            runpod_api_key: env_opt("RUNPOD_API_KEY"),
            dispatch_timeout_seconds: env_parse(
                "DISPATCH_TIMEOUT_SECONDS",
                defaults.dispatch_timeout_seconds,
            ),
            object_store_root: env_or("OBJECT_STORE_ROOT", defaults.object_store_root),
            object_store_url: env_opt("OBJECT_STORE_URL"),
            object_store_token: env_opt("OBJECT_STORE_TOKEN"),
            public_url_base: env_or("PUBLIC_URL_BASE", defaults.public_url_base),
            creem_api_key: env_opt("CREEM_API_KEY"),
            creem_api_base: env_opt("CREEM_API_BASE"),
            creem_webhook_secret: env_opt("CREEM_WEBHOOK_SECRET").map(|s| s.trim().to_string()),
            products: ProductIds {
                starter: env_opt("CREEM_PRODUCT_STARTER"),
                pro: env_opt("CREEM_PRODUCT_PRO"),
                business: env_opt("CREEM_PRODUCT_BUSINESS"),
            },
            allow_unsigned_webhooks: env_parse("ALLOW_UNSIGNED_WEBHOOKS", false),
            frontend_url: env_or("FRONTEND_URL", defaults.frontend_url),
            cors_origins: env_or("CORS_ORIGINS", "*".into())
                .split(',')
                .map(|s| s.trim().to_string())
                .collect(),
            max_body_bytes: env_parse("MAX_BODY_BYTES", defaults.max_body_bytes),
            max_upload_bytes: env_parse("MAX_UPLOAD_BYTES", defaults.max_upload_bytes),
            request_timeout_seconds: env_parse(
                "REQUEST_TIMEOUT_SECONDS",
                defaults.request_timeout_seconds,
            ),
            starting_balance: env_parse("STARTING_BALANCE", defaults.starting_balance),
            max_dispatch_attempts: env_parse(
                "MAX_DISPATCH_ATTEMPTS",
                defaults.max_dispatch_attempts,
            ),
            sweep_interval_seconds: env_parse(
                "SWEEP_INTERVAL_SECONDS",
                defaults.sweep_interval_seconds,
            ),
            dispatch_retry_delay_seconds: env_parse(
                "DISPATCH_RETRY_DELAY_SECONDS",
                defaults.dispatch_retry_delay_seconds,
            ),
        }
    }

    /// JWKS endpoint used to verify user tokens.
    #[must_use]
    pub fn jwks_url(&self) -> String {
        self.jwks_url.clone().unwrap_or_else(|| {
            format!(
                "{}/.well-known/jwks.json",
                self.auth_base_url.trim_end_matches('/')
            )
        })
    }

    /// Whether the configured Creem key is a test-mode key.
    #[must_use]
    pub fn creem_test_mode(&self) -> bool {
        self.creem_api_key
            .as_deref()
            .is_some_and(|k| k.starts_with("creem_test_"))
    }
}

fn env_opt(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn env_or(name: &str, default: String) -> String {
    env_opt(name).unwrap_or(default)
}

fn env_parse<T: FromStr>(name: &str, default: T) -> T {
    env_opt(name)
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".into(),
            store_backend: StoreBackend::Memory,
            database_url: None,
            database_max_connections: 10,
            data_dir: "/data/clipledger".into(),
            auth_base_url: "https://clerk.clipledger.dev".into(),
            auth_audience: "clipledger".into(),
            jwks_url: None,
            service_api_key: None,
            runpod_base_url: "https://api.runpod.ai".into(),
            runpod_endpoint_id: None,
            runpod_api_key: None,
            dispatch_timeout_seconds: 15,
            object_store_root: "/data/clipledger/objects".into(),
            object_store_url: None,
            object_store_token: None,
            public_url_base: "http://localhost:8080/objects".into(),
            creem_api_key: None,
            creem_api_base: None,
            creem_webhook_secret: None,
            products: ProductIds::default(),
            allow_unsigned_webhooks: false,
            frontend_url: "http://localhost:3000".into(),
            cors_origins: vec!["*".into()],
            max_body_bytes: 1024 * 1024,
            max_upload_bytes: 512 * 1024 * 1024,
            request_timeout_seconds: 30,
            starting_balance: DEFAULT_STARTING_BALANCE,
            max_dispatch_attempts: 3,
            sweep_interval_seconds: 30,
            dispatch_retry_delay_seconds: 60,
        }
    }
}
