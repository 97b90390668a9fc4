// This file is part of conviction-oracle.
// SPDX-License-Identifier: Apache-2.0

use crate::domain::{Address, SignedAmount, Slot, Timestamp};
use serde::{Deserialize, Serialize};

/// An ephemeral record flowing through the ingest pipeline: one balance-affecting event for one
/// wallet in one transaction. For a given `(signature, wallet)` pair, only one `BalanceChange` is
/// ever durably applied (see [`crate::domain::storage::Storage::record_transaction`]).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceChange {
    pub mint: Address,
    pub wallet: Address,
    pub slot: Slot,
    pub block_time: Timestamp,
    pub amount: SignedAmount,
    pub signature: String,
}

/// A batch of balance changes produced by either ingest path (push or pull), not yet sorted.
pub type BalanceChangeBatch = Vec<BalanceChange>;

/// Sort a batch by slot ascending, per the ordering contract: "Before applying any change, sort
/// the incoming batch by slot ascending."
pub fn sort_by_slot(batch: &mut [BalanceChange]) {
    batch.sort_by_key(|change| change.slot);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn change(slot: Slot, sig: &str) -> BalanceChange {
        BalanceChange {
            mint: Address::from("mint"),
            wallet: Address::from("wallet"),
            slot,
            block_time: 0,
            amount: "100".parse().unwrap(),
            signature: sig.to_owned(),
        }
    }

    #[test]
    fn sort_by_slot_is_ascending() {
        let mut batch = vec![change(300, "c"), change(100, "a"), change(200, "b")];
        sort_by_slot(&mut batch);
        let slots: Vec<_> = batch.iter().map(|c| c.slot).collect();
        assert_eq!(slots, vec![100, 200, 300]);
    }
}
