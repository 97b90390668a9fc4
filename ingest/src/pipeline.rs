// This file is part of conviction-oracle.
// SPDX-License-Identifier: Apache-2.0

//! The merge point for both ingest paths. Push (webhook) and pull (signature scan) both resolve
//! to a `BalanceChangeBatch`; from here on both sources are indistinguishable.

use fastrace::trace;
use log::{debug, warn};
use oracle_common::domain::{
    Address, Amount, BalanceChangeBatch, Direction, HolderExit, HolderNew, HolderTransition,
    KCalculatorConfig, KChange, KResult, OracleEvent, Publisher, QueueName, StoreError, Timestamp,
    Transaction, TxApplied, ONE_USD_THRESHOLD, PRIORITY_TX_TRIGGERED, calculate_k,
    sort_by_slot, storage::Storage,
};
use thiserror::Error;

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// The primary token this Ingest Pipeline instance tracks.
    pub mint: Address,
    pub k_calculator: KCalculatorConfig,
    /// Fallback minimum raw balance used when no USD-derived threshold has been computed yet.
    pub static_min_balance: Amount,
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("store error")]
    Store(#[from] StoreError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Applies balance changes to the Store and drives the K Calculator; shared by the push and pull
/// ingest paths so neither duplicates the ordering/dedup/eventing contract.
#[derive(Clone)]
pub struct Pipeline<S, P> {
    store: S,
    publisher: P,
    config: PipelineConfig,
}

impl<S, P> Pipeline<S, P>
where
    S: Storage,
    P: Publisher,
{
    pub fn new(store: S, publisher: P, config: PipelineConfig) -> Self {
        Pipeline { store, publisher, config }
    }

    pub fn mint(&self) -> &Address {
        &self.config.mint
    }

    pub async fn last_processed_slot(&self) -> Result<u64, IngestError> {
        self.store.last_processed_slot().await.map_err(IngestError::from)
    }

    /// Sorts the batch by slot, applies each change (skipping ones already durably recorded),
    /// and recalculates K if anything changed. Returns the number of changes actually applied.
    #[trace]
    pub async fn apply_batch(
        &self,
        mut batch: BalanceChangeBatch,
        now: Timestamp,
    ) -> Result<usize, IngestError> {
        sort_by_slot(&mut batch);

        let mut applied = 0usize;

        for change in &batch {
            let transaction = Transaction {
                signature: change.signature.clone(),
                slot: change.slot,
                block_time: change.block_time,
                wallet: change.wallet.clone(),
                amount: change.amount.clone(),
            };

            let inserted = self.store.record_transaction(&transaction).await?;
            if !inserted {
                // Cross-path race: push already delivered what pull later re-fetched (or vice
                // versa). The idempotent insert is the dedup guard; no change is applied twice.
                debug!(signature:% = change.signature, wallet:% = change.wallet; "duplicate transaction, skipping");
                continue;
            }

            let previous_balance = self
                .store
                .get_wallet(&change.wallet)
                .await?
                .map(|wallet| wallet.current_balance)
                .unwrap_or(Amount::ZERO);

            let transition = self.store.upsert_wallet(change).await?;
            applied += 1;

            self.publisher
                .publish(OracleEvent::Tx(TxApplied {
                    wallet: change.wallet.clone(),
                    signature: change.signature.clone(),
                    slot: change.slot,
                }))
                .await;

            match transition {
                HolderTransition::New => {
                    let new_balance = previous_balance.saturating_add_signed(&change.amount);
                    self.publisher
                        .publish(OracleEvent::HolderNew(HolderNew {
                            address: change.wallet.clone(),
                            balance: new_balance.to_string(),
                            tx_signature: change.signature.clone(),
                        }))
                        .await;
                }
                HolderTransition::Exit => {
                    self.publisher
                        .publish(OracleEvent::HolderExit(HolderExit {
                            address: change.wallet.clone(),
                            previous_balance: previous_balance.to_string(),
                            tx_signature: change.signature.clone(),
                        }))
                        .await;
                }
                HolderTransition::None => {}
            }

            self.store
                .enqueue(QueueName::KWallet, change.wallet.as_str(), PRIORITY_TX_TRIGGERED)
                .await?;
        }

        if applied > 0 {
            self.recalculate_k(now).await?;
        }

        Ok(applied)
    }

    /// Public entry point for the daily-snapshot ticker: forces a `calculateAndSave` even when no
    /// batch was just applied, so a quiet token still gets at least one snapshot per day.
    pub async fn calculate_and_save(&self, now: Timestamp) -> Result<(), IngestError> {
        self.recalculate_k(now).await
    }

    /// Reads the qualifying-wallet set, recomputes K, persists a snapshot, and publishes
    /// `k_change` when the score moved by at least one percentage point from the last snapshot.
    #[trace]
    async fn recalculate_k(&self, now: Timestamp) -> Result<(), IngestError> {
        let threshold = self.qualifying_threshold().await?;
        let wallets = self.store.get_wallets_min_balance(&threshold).await?;
        let previous = self.store.get_latest_snapshot().await?;

        let result: KResult = calculate_k(&wallets, self.config.k_calculator, now);
        let holders = result.holders;
        let new_k = result.k;

        self.store.save_snapshot(&result.into_snapshot(now)).await?;

        let should_notify = match &previous {
            Some(previous) => new_k.abs_diff(previous.k) >= 1,
            // No prior snapshot: the first-ever computation is itself a change worth announcing.
            None => true,
        };

        if should_notify {
            let previous_k = previous.map(|s| s.k).unwrap_or(0);
            self.publisher
                .publish(OracleEvent::KChange(KChange {
                    previous_k,
                    new_k,
                    delta: new_k as i16 - previous_k as i16,
                    holders,
                    direction: if new_k >= previous_k { Direction::Up } else { Direction::Down },
                }))
                .await;
        }

        Ok(())
    }

    async fn qualifying_threshold(&self) -> Result<Amount, IngestError> {
        match self.store.get_sync_state(ONE_USD_THRESHOLD).await? {
            Some(encoded) => Amount::decode(&encoded).map_err(|error| {
                warn!(error:%; "stored USD threshold is not a valid encoded amount, falling back to static minimum");
                IngestError::Other(error.into())
            }).or_else(|_| Ok(self.config.static_min_balance.clone())),
            None => Ok(self.config.static_min_balance.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use oracle_common::{
        domain::{InMemoryPubSub, SignedAmount},
        infra::{migrations, pool, storage::SqliteStorage},
    };

    async fn test_storage() -> SqliteStorage {
        let dir = tempfile::tempdir().unwrap();
        let cnn_url = dir.path().join("test.sqlite").display().to_string();
        let pool = pool::SqlitePool::new(pool::Config { cnn_url, ..Default::default() })
            .await
            .unwrap();
        migrations::run(&pool).await.unwrap();
        std::mem::forget(dir);
        SqliteStorage::new(pool)
    }

    fn change(wallet: &str, slot: u64, amount: i64, sig: &str) -> oracle_common::domain::BalanceChange {
        oracle_common::domain::BalanceChange {
            mint: Address::from("mint"),
            wallet: Address::from(wallet),
            slot,
            block_time: slot as Timestamp,
            amount: SignedAmount::from(amount),
            signature: sig.to_owned(),
        }
    }

    fn pipeline(store: SqliteStorage) -> Pipeline<SqliteStorage, InMemoryPubSub> {
        Pipeline::new(
            store,
            InMemoryPubSub::new(),
            PipelineConfig {
                mint: Address::from("mint"),
                k_calculator: KCalculatorConfig {
                    launch_ts: 0,
                    og_early_window_secs: 86_400,
                    og_hold_threshold_secs: 86_400,
                },
                static_min_balance: Amount::ZERO,
            },
        )
    }

    #[tokio::test]
    async fn duplicate_signature_across_batches_is_not_reapplied() {
        let pipeline = pipeline(test_storage().await);

        let applied = pipeline.apply_batch(vec![change("w1", 1, 100, "s1")], 1_000).await.unwrap();
        assert_eq!(applied, 1);

        let applied = pipeline.apply_batch(vec![change("w1", 1, 100, "s1")], 1_000).await.unwrap();
        assert_eq!(applied, 0);
    }

    #[tokio::test]
    async fn batch_is_applied_in_slot_order_regardless_of_input_order() {
        let pipeline = pipeline(test_storage().await);

        let applied = pipeline
            .apply_batch(
                vec![change("w1", 2, -50, "s2"), change("w1", 1, 100, "s1")],
                1_000,
            )
            .await
            .unwrap();
        assert_eq!(applied, 2);
    }
}
