//! Single-use redemption codes.
//!
//! Codes are stored uppercase and matched case-insensitively. A code moves
//! from unclaimed to claimed exactly once.

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::UserId;

/// Characters a generated code is drawn from.
pub const CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Length of the random part of a generated code.
pub const CODE_LENGTH: usize = 8;

/// A redemption code worth a fixed number of credits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedemptionCode {
    /// Normalized code string (unique).
    pub code: String,

    /// Credits granted on redemption.
    pub credits: i64,

    /// Account that claimed the code.
    pub claimed_by: Option<UserId>,

    /// When the code was claimed.
    pub claimed_at: Option<DateTime<Utc>>,

    /// When the code was created.
    pub created_at: DateTime<Utc>,
}

impl RedemptionCode {
    /// Create an unclaimed code. The code string is normalized.
    #[must_use]
    pub fn new(code: &str, credits: i64) -> Self {
        Self {
            code: normalize_code(code),
            credits,
            claimed_by: None,
            claimed_at: None,
            created_at: Utc::now(),
        }
    }

    /// Whether the code has been claimed.
    #[must_use]
    pub const fn is_claimed(&self) -> bool {
        self.claimed_by.is_some()
    }
}

/// Trim and uppercase a user-supplied code.
#[must_use]
pub fn normalize_code(raw: &str) -> String {
    raw.trim().to_ascii_uppercase()
}

/// Generate a random code, optionally prefixed.
///
/// The prefix is normalized like any other code input. Uniqueness is not
/// guaranteed here; callers insert with insert-if-absent and retry.
#[must_use]
pub fn generate_code(prefix: Option<&str>) -> String {
    let mut rng = rand::rng();
    let random: String = (0..CODE_LENGTH)
        .map(|_| char::from(CODE_ALPHABET[rng.random_range(0..CODE_ALPHABET.len())]))
        .collect();

    match prefix.map(normalize_code).filter(|p| !p.is_empty()) {
        Some(prefix) => format!("{prefix}{random}"),
        None => random,
    }
}
