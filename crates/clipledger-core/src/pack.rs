//! Credit pack catalog.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A purchasable bundle of credits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CreditPack {
    /// 10 credits.
    Starter,
    /// 50 credits.
    Pro,
    /// 200 credits.
    Business,
}

impl CreditPack {
    /// Every pack on sale.
    pub const ALL: [Self; 3] = [Self::Starter, Self::Pro, Self::Business];

    /// Credits the pack adds.
    #[must_use]
    pub const fn credits(self) -> i64 {
        match self {
            Self::Starter => 10,
            Self::Pro => 50,
            Self::Business => 200,
        }
    }

    /// Price in cents.
    #[must_use]
    pub const fn price_cents(self) -> i64 {
        match self {
            Self::Starter => 499,
            Self::Pro => 1999,
            Self::Business => 5999,
        }
    }

    /// Catalog name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Starter => "starter",
            Self::Pro => "pro",
            Self::Business => "business",
        }
    }
}

impl fmt::Display for CreditPack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for CreditPack {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|pack| pack.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown credit pack: {s}"))
    }
}
