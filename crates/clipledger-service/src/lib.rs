//! clipledger HTTP API service.
//!
//! This crate provides the HTTP API and the services behind it:
//!
//! - Credit balance, reservation and refund ([`ledger`])
//! - Video jobs from creation to completion ([`lifecycle`], [`reconciler`], [`sweeper`])
//! - Single-use redemption codes ([`registry`])
//! - Credit-pack checkouts and payment webhooks ([`ingest`])
//!
//! # Authentication
//!
//! 1. **JWT bearer tokens** - For end users; the `admin` role unlocks `/v1/admin`
//! 2. **Service API key** - For workers reporting job outcomes

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
// Allow some pedantic lints that are noisy for Axum handler functions
#![allow(clippy::missing_errors_doc)] // Axum handlers all return Result
#![allow(clippy::unused_async)] // Some handlers need async only for the router

pub mod auth;
pub mod config;
pub mod crypto;
pub mod dispatch;
pub mod error;
pub mod handlers;
pub mod ingest;
pub mod ledger;
pub mod lifecycle;
pub mod objects;
pub mod payments;
pub mod reconciler;
pub mod registry;
pub mod routes;
pub mod state;
pub mod sweeper;

pub use config::{ServiceConfig, StoreBackend};
pub use error::{ApiError, ServiceError};
pub use ingest::{EventOutcome, WebhookIngest};
pub use ledger::LedgerService;
pub use lifecycle::{JobService, WorkerReport};
pub use registry::CodeRegistry;
pub use routes::create_router;
pub use state::{AppState, Collaborators};
pub use sweeper::Sweeper;
