// This file is part of conviction-oracle.
// SPDX-License-Identifier: Apache-2.0

//! The classification total law (`accumulators + maintained + partialSellers + majorSellers =
//! holders`) and the single-authoritative K formula, driven through `Pipeline::calculate_and_save`
//! over three wallets with known retention ratios.

mod support;

use ingest::pipeline::{Pipeline, PipelineConfig};
use oracle_common::domain::{Address, Amount, InMemoryPubSub};

#[tokio::test]
async fn three_wallet_mix_classifies_to_k_sixty_seven() {
    let store = support::sqlite_storage().await;
    let config = PipelineConfig {
        mint: Address::from("mint"),
        k_calculator: support::k_calculator_config(),
        static_min_balance: Amount::ZERO,
    };
    let pipeline = Pipeline::new(store.clone(), InMemoryPubSub::new(), config);

    // Accumulator: bought 100, bought another 100 -> retention 2.0.
    pipeline.apply_batch(vec![support::change("mint", "accumulator", 1, "100", "a1")], 10).await.unwrap();
    pipeline.apply_batch(vec![support::change("mint", "accumulator", 2, "100", "a2")], 20).await.unwrap();

    // Holder: bought 100, never touched again -> retention 1.0.
    pipeline.apply_batch(vec![support::change("mint", "holder", 1, "100", "h1")], 10).await.unwrap();

    // Extractor: bought 100, sold 80 -> retention 0.2.
    pipeline.apply_batch(vec![support::change("mint", "extractor", 1, "100", "e1")], 10).await.unwrap();
    pipeline.apply_batch(vec![support::change("mint", "extractor", 2, "-80", "e2")], 20).await.unwrap();

    pipeline.calculate_and_save(1_000).await.unwrap();

    let snapshot = store.get_latest_snapshot().await.unwrap().unwrap();
    assert_eq!(snapshot.holders, 3);
    assert_eq!(snapshot.accumulators_count, 1);
    assert_eq!(snapshot.maintained_count, 1);
    assert_eq!(snapshot.reducers_count, 0);
    assert_eq!(snapshot.extractors_count, 1);
    assert_eq!(
        snapshot.accumulators_count + snapshot.maintained_count + snapshot.reducers_count + snapshot.extractors_count,
        snapshot.holders,
        "every qualifying wallet must fall into exactly one classification bucket"
    );
    assert_eq!(snapshot.k, 67);
}
