//! Core types and utilities for clipledger.
//!
//! This crate provides the foundational types shared by the store and the
//! service:
//!
//! - **Identifiers**: `UserId`, `JobId`, `TransactionId`
//! - **Accounts**: `Account` and the default starting grant
//! - **Jobs**: `Job`, `JobStatus`, `Quality`
//! - **Payments**: `PaymentTransaction`, `TransactionStatus`, `CreditPack`
//! - **Codes**: `RedemptionCode`, normalization and generation
//!
//! # Credits
//!
//! Credits are whole units stored as `i64`. A `lama` job costs 1 credit and an
//! `e2fgvi_hq` job costs 2. A balance never goes below zero.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod account;
pub mod code;
pub mod error;
pub mod ids;
pub mod job;
pub mod pack;
pub mod payment;

pub use account::{Account, DEFAULT_STARTING_BALANCE, MAX_CREDIT_AMOUNT};
pub use code::{generate_code, normalize_code, RedemptionCode, CODE_ALPHABET, CODE_LENGTH};
pub use error::{LedgerError, Result};
pub use ids::{IdError, JobId, TransactionId, UserId};
pub use job::{output_key_for, Job, JobStatus, Quality};
pub use pack::CreditPack;
pub use payment::{PaymentTransaction, TransactionStatus};
