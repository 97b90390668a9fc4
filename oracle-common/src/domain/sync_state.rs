// This file is part of conviction-oracle.
// SPDX-License-Identifier: Apache-2.0

//! A small key-value map for sync bookkeeping. Keys are free-form; well-known ones are named
//! here as constants so call sites don't retype string literals.

/// Timestamp (unix seconds) of the last full holder re-sync.
pub const LAST_FULL_SYNC: &str = "last_full_sync";

/// Minimum raw balance (as an encoded [`crate::domain::Amount`]) equivalent to the configured
/// USD minimum, refreshed whenever the token price is refreshed.
pub const ONE_USD_THRESHOLD: &str = "one_usd_threshold";

/// Last observed price of the primary token, as a decimal string.
pub const TOKEN_PRICE: &str = "token_price";
