// This file is part of conviction-oracle.
// SPDX-License-Identifier: Apache-2.0

pub mod amount;
pub mod api_key;
pub mod balance_change;
pub mod cache;
pub mod date;
pub mod k_calculator;
pub mod pub_sub;
pub mod queue;
pub mod snapshot;
pub mod storage;
pub mod sync_state;
pub mod transaction;
pub mod wallet;
pub mod webhook;

pub use amount::*;
pub use api_key::*;
pub use balance_change::*;
pub use date::*;
pub use k_calculator::*;
pub use pub_sub::*;
pub use queue::*;
pub use snapshot::*;
pub use sync_state::*;
pub use transaction::*;
pub use wallet::*;
pub use webhook::*;

use derive_more::{Display, From};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A Solana base58 address: a wallet, a mint, or a program ID. Addresses are opaque strings as
/// far as the core is concerned; only the [`Amount`] domain cares about numeric semantics.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Display, From, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Address(pub String);

impl Address {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Address {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// The upstream chain's strictly-monotone ordering token. Used as the ingest watermark and as
/// the freshness token for K_wallet snapshots.
pub type Slot = u64;

/// Unix epoch seconds.
pub type Timestamp = i64;

/// Tiers determine rate-limit ceilings and WebSocket broadcast filtering. Ordinal order matters:
/// `public < free < standard < premium < internal`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Public,
    Free,
    Standard,
    Premium,
    Internal,
}

impl Tier {
    pub fn per_minute_limit(self) -> Option<u32> {
        match self {
            Tier::Public => Some(100),
            Tier::Free => Some(500),
            Tier::Standard => Some(1_000),
            Tier::Premium => Some(5_000),
            Tier::Internal => None,
        }
    }

    pub fn per_day_limit(self) -> Option<u32> {
        match self {
            Tier::Public => Some(10_000),
            Tier::Free => Some(50_000),
            Tier::Standard => Some(100_000),
            Tier::Premium => Some(500_000),
            Tier::Internal => None,
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Tier::Public => "public",
            Tier::Free => "free",
            Tier::Standard => "standard",
            Tier::Premium => "premium",
            Tier::Internal => "internal",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for Tier {
    type Err = InvalidTier;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "public" => Ok(Tier::Public),
            "free" => Ok(Tier::Free),
            "standard" => Ok(Tier::Standard),
            "premium" => Ok(Tier::Premium),
            "internal" => Ok(Tier::Internal),
            other => Err(InvalidTier(other.to_owned())),
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("invalid tier: {0}")]
pub struct InvalidTier(pub String);

/// Holder classification by retention (`currentBalance / firstBuyAmount`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    Accumulator,
    Holder,
    Reducer,
    Extractor,
}

impl Classification {
    pub fn from_retention(retention: f64) -> Self {
        if retention >= 1.5 {
            Classification::Accumulator
        } else if retention >= 1.0 {
            Classification::Holder
        } else if retention >= 0.5 {
            Classification::Reducer
        } else {
            Classification::Extractor
        }
    }

    pub fn counts_towards_k(self) -> bool {
        matches!(self, Classification::Accumulator | Classification::Holder)
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Classification::Accumulator => "accumulator",
            Classification::Holder => "holder",
            Classification::Reducer => "reducer",
            Classification::Extractor => "extractor",
        };
        f.write_str(s)
    }
}

/// A transient (retryable) vs. fatal (must propagate) failure, as mandated by the Store's
/// failure semantics (see the operation contracts in each domain module).
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("transient storage error")]
    Transient(#[source] anyhow::Error),

    #[error("fatal storage error")]
    Fatal(#[source] anyhow::Error),
}

impl From<sqlx::Error> for StoreError {
    fn from(error: sqlx::Error) -> Self {
        match &error {
            sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => {
                StoreError::Transient(error.into())
            }
            sqlx::Error::Database(db_error) if db_error.is_unique_violation() => {
                StoreError::Transient(error.into())
            }
            _ => StoreError::Fatal(error.into()),
        }
    }
}
