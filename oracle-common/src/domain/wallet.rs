// This file is part of conviction-oracle.
// SPDX-License-Identifier: Apache-2.0

use crate::domain::{Address, Amount, Slot, Timestamp};
use serde::{Deserialize, Serialize};

/// A wallet's cost-basis and conviction record for the primary token. Invariants (enforced by
/// [`crate::domain::storage::Storage::upsert_wallet`], never by callers):
///
/// - `first_buy_amount` is write-once: set on the first-ever positive delta, never mutated after.
/// - `peak_balance >= current_balance` holds at all times and `peak_balance` never decreases.
/// - All amounts have full chain precision; none are silently truncated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Wallet {
    pub address: Address,
    pub first_buy_ts: Option<Timestamp>,
    pub first_buy_amount: Option<Amount>,
    pub total_received: Amount,
    pub total_sent: Amount,
    pub current_balance: Amount,
    pub peak_balance: Amount,
    pub last_tx_signature: Option<String>,
    pub last_slot: Slot,
    pub k_wallet: Option<u8>,
    pub k_wallet_tokens_analyzed: Option<u32>,
    pub k_wallet_updated_at: Option<Timestamp>,
    pub k_wallet_slot: Option<Slot>,
}

impl Wallet {
    pub fn new(address: Address) -> Self {
        Wallet {
            address,
            first_buy_ts: None,
            first_buy_amount: None,
            total_received: Amount::ZERO,
            total_sent: Amount::ZERO,
            current_balance: Amount::ZERO,
            peak_balance: Amount::ZERO,
            last_tx_signature: None,
            last_slot: 0,
            k_wallet: None,
            k_wallet_tokens_analyzed: None,
            k_wallet_updated_at: None,
            k_wallet_slot: None,
        }
    }

    /// Retention = currentBalance / firstBuyAmount, or 1.0 when there is no recorded first buy
    /// (per the K Calculator's rule for `firstBuyAmount == 0`).
    pub fn retention(&self) -> f64 {
        match &self.first_buy_amount {
            Some(first_buy) if !first_buy.is_zero() => {
                self.current_balance.to_f64_lossy() / first_buy.to_f64_lossy()
            }
            _ => 1.0,
        }
    }

    /// Applies a new observed balance at `slot`/`block_time`, enforcing the write-once and
    /// peak-monotonicity invariants. Returns the holder-state transition, if any.
    pub fn apply(
        &mut self,
        slot: Slot,
        block_time: Timestamp,
        new_balance: Amount,
        is_positive_delta: bool,
        received: &Amount,
        sent: &Amount,
        signature: &str,
    ) -> HolderTransition {
        let was_zero = self.current_balance.is_zero();

        if self.first_buy_amount.is_none() && is_positive_delta {
            self.first_buy_ts = Some(block_time);
            self.first_buy_amount = Some(new_balance.clone());
        }

        self.total_received = self.total_received.clone() + received.clone();
        self.total_sent = self.total_sent.clone() + sent.clone();
        self.current_balance = new_balance;
        if self.current_balance > self.peak_balance {
            self.peak_balance = self.current_balance.clone();
        }
        self.last_tx_signature = Some(signature.to_owned());
        self.last_slot = slot;

        let is_zero_now = self.current_balance.is_zero();
        match (was_zero, is_zero_now) {
            (true, false) => HolderTransition::New,
            (false, true) => HolderTransition::Exit,
            _ => HolderTransition::None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HolderTransition {
    New,
    Exit,
    None,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_buy_is_write_once() {
        let mut wallet = Wallet::new(Address::from("w"));
        wallet.apply(1, 100, Amount::from_u64(1000), true, &Amount::from_u64(1000), &Amount::ZERO, "s1");
        assert_eq!(wallet.first_buy_amount, Some(Amount::from_u64(1000)));

        wallet.apply(2, 200, Amount::from_u64(3000), true, &Amount::from_u64(2000), &Amount::ZERO, "s2");
        assert_eq!(wallet.first_buy_amount, Some(Amount::from_u64(1000)));
        assert_eq!(wallet.first_buy_ts, Some(100));
    }

    #[test]
    fn peak_balance_never_decreases() {
        let mut wallet = Wallet::new(Address::from("w"));
        wallet.apply(1, 100, Amount::from_u64(1000), true, &Amount::from_u64(1000), &Amount::ZERO, "s1");
        wallet.apply(2, 200, Amount::from_u64(400), false, &Amount::ZERO, &Amount::from_u64(600), "s2");
        assert_eq!(wallet.peak_balance, Amount::from_u64(1000));
        assert_eq!(wallet.current_balance, Amount::from_u64(400));
        assert!(wallet.peak_balance >= wallet.current_balance);
    }

    #[test]
    fn retention_defaults_to_one_without_first_buy() {
        let wallet = Wallet::new(Address::from("w"));
        assert_eq!(wallet.retention(), 1.0);
    }

    #[test]
    fn holder_transitions_detected() {
        let mut wallet = Wallet::new(Address::from("w"));
        let t = wallet.apply(1, 100, Amount::from_u64(1000), true, &Amount::from_u64(1000), &Amount::ZERO, "s1");
        assert_eq!(t, HolderTransition::New);

        let t = wallet.apply(2, 200, Amount::ZERO, false, &Amount::ZERO, &Amount::from_u64(1000), "s2");
        assert_eq!(t, HolderTransition::Exit);
    }
}
