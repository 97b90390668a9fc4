// This file is part of conviction-oracle.
// SPDX-License-Identifier: Apache-2.0

//! The Chain Adapter's public API: a thin, stateless translator between the upstream chain's
//! RPC/webhook formats and [`BalanceChange`]. No component but `chain-adapter` itself knows the
//! upstream wire shapes.

use oracle_common::domain::{Address, Amount, BalanceChange, SignedAmount, Slot, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Holder {
    pub owner: Address,
    pub balance: Amount,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenInfo {
    pub supply: Option<Amount>,
    pub price_usd: Option<f64>,
    pub price_native: Option<f64>,
    pub liquidity: Option<f64>,
    pub mcap: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureAtSlot {
    pub signature: String,
    pub slot: Slot,
}

/// A single wallet's observed position in one mint, as reconstructed by walking transfer history
/// backwards in time. "First buy" is the *earliest* positive delta: the implementer walks
/// backwards and overwrites `first_buy_amount` on each receive, so earlier receives win.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CrossTokenPosition {
    pub first_buy_amount: Option<Amount>,
    pub total_bought: Amount,
    pub total_sold: Amount,
    pub current: Amount,
    pub tx_count: u32,
    pub last_tx_ts: Option<Timestamp>,
}

impl CrossTokenPosition {
    /// Mirrors `Wallet::retention`: currentBalance / firstBuyAmount, or 1.0 with no recorded
    /// first buy in this mint.
    pub fn retention(&self) -> f64 {
        match &self.first_buy_amount {
            Some(first_buy) if !first_buy.is_zero() => {
                self.current.to_f64_lossy() / first_buy.to_f64_lossy()
            }
            _ => 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressClassification {
    pub is_pool: bool,
    pub program: Option<&'static str>,
}

/// One parsed token-transfer leg from an upstream transaction, mint-scoped.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenTransfer {
    pub mint: Address,
    pub from_user_account: Option<Address>,
    pub to_user_account: Option<Address>,
    pub token_amount: String, // decimal string, arbitrary precision
}

/// The subset of an upstream transaction/webhook event this adapter cares about.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RawTransactionEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    pub slot: Slot,
    pub signature: String,
    pub timestamp: Timestamp,
    pub token_transfers: Vec<TokenTransfer>,
}

/// Diffs the token-transfer legs of one upstream event for `mint`, producing one [`BalanceChange`]
/// per affected owner. Shared by the inbound webhook handler (push path) and by `FetchTransaction`
/// + `Parse` (pull path), so both ingestion paths agree on exactly how an event becomes changes.
///
/// Events whose `type` isn't a transfer, or that touch no leg of `mint`, produce no changes.
pub fn parse_balance_changes(event: &RawTransactionEvent, mint: &Address) -> Vec<BalanceChange> {
    if event.event_type != "TRANSFER" {
        return vec![];
    }

    let mut deltas: HashMap<Address, SignedAmount> = HashMap::new();

    for transfer in &event.token_transfers {
        if &transfer.mint != mint {
            continue;
        }

        let Ok(amount) = transfer.token_amount.parse::<Amount>() else {
            continue;
        };
        let signed = SignedAmount::from_amount(&amount);

        if let Some(from) = &transfer.from_user_account {
            let entry = deltas.entry(from.clone()).or_insert_with(SignedAmount::zero);
            *entry = entry.clone() - signed.clone();
        }
        if let Some(to) = &transfer.to_user_account {
            let entry = deltas.entry(to.clone()).or_insert_with(SignedAmount::zero);
            *entry = entry.clone() + signed.clone();
        }
    }

    deltas
        .into_iter()
        .filter(|(_, amount)| !amount.is_zero())
        .map(|(wallet, amount)| BalanceChange {
            mint: mint.clone(),
            wallet,
            slot: event.slot,
            block_time: event.timestamp,
            amount,
            signature: event.signature.clone(),
        })
        .collect()
}

#[trait_variant::make(Send)]
pub trait ChainAdapter
where
    Self: Clone + Send + Sync + 'static,
{
    async fn fetch_holders(&self, mint: &Address) -> Result<Vec<Holder>, ChainAdapterError>;
    async fn fetch_token_info(&self, mint: &Address) -> Result<TokenInfo, ChainAdapterError>;
    async fn signatures_since(
        &self,
        mint: &Address,
        limit: u32,
    ) -> Result<Vec<SignatureAtSlot>, ChainAdapterError>;
    async fn fetch_transaction(
        &self,
        signature: &str,
    ) -> Result<RawTransactionEvent, ChainAdapterError>;
    async fn cross_token_history(
        &self,
        wallet: &Address,
        max_pages: u32,
    ) -> Result<HashMap<Address, CrossTokenPosition>, ChainAdapterError>;
    async fn classify_addresses(
        &self,
        addresses: &[Address],
    ) -> Result<HashMap<Address, AddressClassification>, ChainAdapterError>;
}

#[derive(Debug, Error)]
pub enum ChainAdapterError {
    #[error("transient upstream error")]
    Transient(#[source] anyhow::Error),

    #[error("upstream rejected the request")]
    Fatal(#[source] anyhow::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transfer(mint: &str, from: Option<&str>, to: Option<&str>, amount: &str) -> TokenTransfer {
        TokenTransfer {
            mint: Address::from(mint),
            from_user_account: from.map(Address::from),
            to_user_account: to.map(Address::from),
            token_amount: amount.to_owned(),
        }
    }

    #[test]
    fn parse_skips_non_transfer_events() {
        let event = RawTransactionEvent {
            event_type: "SWAP".into(),
            slot: 1,
            signature: "s".into(),
            timestamp: 0,
            token_transfers: vec![transfer("mint", Some("a"), Some("b"), "100")],
        };
        assert!(parse_balance_changes(&event, &Address::from("mint")).is_empty());
    }

    #[test]
    fn parse_skips_other_mints() {
        let event = RawTransactionEvent {
            event_type: "TRANSFER".into(),
            slot: 1,
            signature: "s".into(),
            timestamp: 0,
            token_transfers: vec![transfer("other-mint", Some("a"), Some("b"), "100")],
        };
        assert!(parse_balance_changes(&event, &Address::from("mint")).is_empty());
    }

    #[test]
    fn parse_produces_one_change_per_owner() {
        let event = RawTransactionEvent {
            event_type: "TRANSFER".into(),
            slot: 42,
            signature: "s".into(),
            timestamp: 1_000,
            token_transfers: vec![transfer("mint", Some("a"), Some("b"), "100")],
        };
        let mut changes = parse_balance_changes(&event, &Address::from("mint"));
        changes.sort_by(|a, b| a.wallet.as_str().cmp(b.wallet.as_str()));

        assert_eq!(changes.len(), 2);
        assert_eq!(changes[0].wallet, Address::from("a"));
        assert!(changes[0].amount.is_negative());
        assert_eq!(changes[1].wallet, Address::from("b"));
        assert!(changes[1].amount.is_positive());
    }
}
