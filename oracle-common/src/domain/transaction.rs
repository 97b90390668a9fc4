// This file is part of conviction-oracle.
// SPDX-License-Identifier: Apache-2.0

use crate::domain::{Address, SignedAmount, Slot, Timestamp};
use serde::{Deserialize, Serialize};

/// A persisted, deduplicated balance change. Insertion is idempotent on `signature`; see
/// [`crate::domain::storage::Storage::record_transaction`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub signature: String,
    pub slot: Slot,
    pub block_time: Timestamp,
    pub wallet: Address,
    pub amount: SignedAmount,
}
