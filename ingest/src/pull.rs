// This file is part of conviction-oracle.
// SPDX-License-Identifier: Apache-2.0

//! The polling ingest path: periodically ask the Chain Adapter for signatures newer than the
//! watermark, fetch each transaction (bounded concurrency), and parse into balance changes.

use chain_adapter::domain::{ChainAdapter, ChainAdapterError, parse_balance_changes};
use fastrace::trace;
use futures::{StreamExt, stream};
use oracle_common::domain::{Address, BalanceChangeBatch};
use std::num::NonZeroUsize;

/// Fetches and parses everything newer than `last_processed_slot`, up to `limit` signatures,
/// fetching transaction bodies with concurrency bounded by `batch_concurrency`. A transaction
/// fetch that fails is dropped from this pass; the pull ticker will pick it up again next period
/// since the watermark only advances once `RecordTransaction` durably applies a change.
#[trace]
pub async fn run_once<C>(
    chain_adapter: &C,
    mint: &Address,
    last_processed_slot: u64,
    limit: u32,
    batch_concurrency: NonZeroUsize,
) -> Result<BalanceChangeBatch, ChainAdapterError>
where
    C: ChainAdapter,
{
    let signatures = chain_adapter
        .signatures_since(mint, limit)
        .await?
        .into_iter()
        .filter(|s| s.slot > last_processed_slot)
        .collect::<Vec<_>>();

    let changes = stream::iter(signatures)
        .map(|s| async move { chain_adapter.fetch_transaction(&s.signature).await })
        .buffer_unordered(batch_concurrency.get())
        .filter_map(|result| async move { result.ok() })
        .map(|event| parse_balance_changes(&event, mint))
        .collect::<Vec<_>>()
        .await
        .into_iter()
        .flatten()
        .collect();

    Ok(changes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chain_adapter::domain::{
        AddressClassification, CrossTokenPosition, Holder, RawTransactionEvent, SignatureAtSlot,
        TokenInfo,
    };
    use std::{
        collections::HashMap,
        sync::{Arc, Mutex},
    };

    #[derive(Clone, Default)]
    struct FakeChainAdapter {
        signatures: Vec<SignatureAtSlot>,
        transactions: Arc<Mutex<HashMap<String, RawTransactionEvent>>>,
    }

    impl ChainAdapter for FakeChainAdapter {
        async fn fetch_holders(&self, _: &Address) -> Result<Vec<Holder>, ChainAdapterError> {
            Ok(vec![])
        }

        async fn fetch_token_info(&self, _: &Address) -> Result<TokenInfo, ChainAdapterError> {
            Ok(TokenInfo::default())
        }

        async fn signatures_since(
            &self,
            _: &Address,
            _: u32,
        ) -> Result<Vec<SignatureAtSlot>, ChainAdapterError> {
            Ok(self.signatures.clone())
        }

        async fn fetch_transaction(
            &self,
            signature: &str,
        ) -> Result<RawTransactionEvent, ChainAdapterError> {
            self.transactions
                .lock()
                .unwrap()
                .get(signature)
                .cloned()
                .ok_or_else(|| ChainAdapterError::Fatal(anyhow::anyhow!("unknown signature")))
        }

        async fn cross_token_history(
            &self,
            _: &Address,
            _: u32,
        ) -> Result<HashMap<Address, CrossTokenPosition>, ChainAdapterError> {
            Ok(HashMap::new())
        }

        async fn classify_addresses(
            &self,
            _: &[Address],
        ) -> Result<HashMap<Address, AddressClassification>, ChainAdapterError> {
            Ok(HashMap::new())
        }
    }

    fn event(signature: &str, slot: u64) -> RawTransactionEvent {
        RawTransactionEvent {
            event_type: "TRANSFER".into(),
            slot,
            signature: signature.into(),
            timestamp: 1_000,
            token_transfers: vec![chain_adapter::domain::TokenTransfer {
                mint: Address::from("mint"),
                from_user_account: Some(Address::from("a")),
                to_user_account: Some(Address::from("b")),
                token_amount: "100".into(),
            }],
        }
    }

    #[tokio::test]
    async fn filters_out_signatures_at_or_before_watermark() {
        let mut transactions = HashMap::new();
        transactions.insert("new".to_owned(), event("new", 20));
        // Deliberately no entry for "old": if it were fetched, the test would fail with an error.

        let adapter = FakeChainAdapter {
            signatures: vec![
                SignatureAtSlot { signature: "old".into(), slot: 5 },
                SignatureAtSlot { signature: "new".into(), slot: 20 },
            ],
            transactions: Arc::new(Mutex::new(transactions)),
        };

        let changes = run_once(&adapter, &Address::from("mint"), 10, 100, NonZeroUsize::new(4).unwrap())
            .await
            .unwrap();

        assert_eq!(changes.len(), 2);
        assert!(changes.iter().all(|c| c.signature == "new"));
    }
}
