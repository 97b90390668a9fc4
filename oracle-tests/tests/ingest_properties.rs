// This file is part of conviction-oracle.
// SPDX-License-Identifier: Apache-2.0

//! Ingest idempotence, slot monotonicity, the peak invariant and first-buy write-once, driven
//! through the full `Pipeline` (not just the `Storage` layer its unit tests already cover), so a
//! reapplied batch exercises the dedup guard, the K Calculator trigger and the event bus together.

mod support;

use ingest::pipeline::{Pipeline, PipelineConfig};
use oracle_common::domain::{Address, Amount, InMemoryPubSub};

fn pipeline(
    mint: &str,
    store: oracle_common::infra::storage::SqliteStorage,
) -> Pipeline<oracle_common::infra::storage::SqliteStorage, InMemoryPubSub> {
    let config = PipelineConfig {
        mint: Address::from(mint),
        k_calculator: support::k_calculator_config(),
        static_min_balance: Amount::ZERO,
    };
    Pipeline::new(store, InMemoryPubSub::new(), config)
}

#[tokio::test]
async fn reapplying_the_same_batch_is_a_no_op() {
    let store = support::sqlite_storage().await;
    let pipeline = pipeline("mint", store.clone());

    let batch = vec![support::change("mint", "w1", 10, "100", "s1")];

    let applied_first = pipeline.apply_batch(batch.clone(), 100).await.unwrap();
    assert_eq!(applied_first, 1);

    let slot_after_first = pipeline.last_processed_slot().await.unwrap();

    let applied_second = pipeline.apply_batch(batch, 200).await.unwrap();
    assert_eq!(applied_second, 0, "duplicate signature must not be applied twice");

    let slot_after_second = pipeline.last_processed_slot().await.unwrap();
    assert!(slot_after_second >= slot_after_first, "last processed slot must not go backwards");

    let wallet = store.get_wallet(&Address::from("w1")).await.unwrap().unwrap();
    assert_eq!(wallet.current_balance, Amount::from_u64(100));
}

#[tokio::test]
async fn an_older_slot_reapplication_does_not_mutate_wallet_state() {
    let store = support::sqlite_storage().await;
    let pipeline = pipeline("mint", store.clone());

    pipeline.apply_batch(vec![support::change("mint", "w1", 20, "100", "new-sig")], 100).await.unwrap();
    let after_new = store.get_wallet(&Address::from("w1")).await.unwrap().unwrap();

    // A different signature at an older slot than what's already recorded.
    pipeline.apply_batch(vec![support::change("mint", "w1", 5, "9999", "old-sig")], 200).await.unwrap();
    let after_old = store.get_wallet(&Address::from("w1")).await.unwrap().unwrap();

    assert_eq!(after_old.current_balance, after_new.current_balance);
    assert_eq!(after_old.peak_balance, after_new.peak_balance);
    assert_eq!(after_old.first_buy_amount, after_new.first_buy_amount);
    assert_eq!(after_old.last_tx_signature, after_new.last_tx_signature);
    assert_eq!(after_old.last_slot, after_new.last_slot);
}

#[tokio::test]
async fn peak_balance_is_non_decreasing_across_a_buy_sell_buy_cycle() {
    let store = support::sqlite_storage().await;
    let pipeline = pipeline("mint", store.clone());

    pipeline.apply_batch(vec![support::change("mint", "w1", 1, "100", "s1")], 10).await.unwrap();
    pipeline.apply_batch(vec![support::change("mint", "w1", 2, "-40", "s2")], 20).await.unwrap();
    pipeline.apply_batch(vec![support::change("mint", "w1", 3, "10", "s3")], 30).await.unwrap();

    let wallet = store.get_wallet(&Address::from("w1")).await.unwrap().unwrap();
    assert_eq!(wallet.current_balance, Amount::from_u64(70));
    assert_eq!(wallet.peak_balance, Amount::from_u64(100), "peak must survive the intermediate sell");
    assert!(wallet.peak_balance >= wallet.current_balance);
}

#[tokio::test]
async fn first_buy_is_written_once() {
    let store = support::sqlite_storage().await;
    let pipeline = pipeline("mint", store.clone());

    pipeline.apply_batch(vec![support::change("mint", "w1", 1, "50", "s1")], 10).await.unwrap();
    let after_first = store.get_wallet(&Address::from("w1")).await.unwrap().unwrap();
    assert_eq!(after_first.first_buy_amount, Some(Amount::from_u64(50)));

    pipeline.apply_batch(vec![support::change("mint", "w1", 2, "200", "s2")], 20).await.unwrap();
    let after_second = store.get_wallet(&Address::from("w1")).await.unwrap().unwrap();
    assert_eq!(
        after_second.first_buy_amount,
        Some(Amount::from_u64(50)),
        "first buy must not be overwritten by a later receive"
    );
}
