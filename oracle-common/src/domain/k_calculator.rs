// This file is part of conviction-oracle.
// SPDX-License-Identifier: Apache-2.0

//! K Calculator: a pure function of wallet state. It never writes to wallets, only (optionally)
//! to the `snapshots` table, and is cached in front of reads with a 30s TTL by callers.

use crate::domain::{Classification, Snapshot, Timestamp, Wallet};

/// Inputs the calculator needs beyond the raw wallet rows.
#[derive(Debug, Clone, Copy)]
pub struct KCalculatorConfig {
    pub launch_ts: Timestamp,
    pub og_early_window_secs: i64,
    pub og_hold_threshold_secs: i64,
}

/// The full breakdown produced by one calculation pass.
#[derive(Debug, Clone, PartialEq)]
pub struct KResult {
    pub k: u8,
    pub holders: u32,
    pub never_sold: u32,
    pub accumulators: u32,
    pub maintained: u32,
    pub partial_sellers: u32,
    pub major_sellers: u32,
    pub avg_hold_days: f64,
    pub og: u32,
}

impl KResult {
    pub fn into_snapshot(self, now: Timestamp) -> Snapshot {
        Snapshot {
            k: self.k,
            holders: self.holders,
            maintained_count: self.maintained,
            accumulators_count: self.accumulators,
            reducers_count: self.partial_sellers,
            extractors_count: self.major_sellers,
            avg_hold_days: self.avg_hold_days,
            og_count: self.og,
            never_sold_count: self.never_sold,
            created_at: now,
        }
    }
}

/// Classifies and aggregates the given qualifying wallets (already filtered to the USD/static
/// minimum by the caller) into a [`KResult`].
///
/// `K := round(100 * (accumulators + maintained) / total)`. Per the single-authoritative-formula
/// decision recorded in DESIGN.md, `maintained` here always means `accumulators + holder`-bucket
/// (the `holder` classification, i.e. retention in `[1.0, 1.5)`), never just one of the two.
pub fn calculate_k(wallets: &[Wallet], config: KCalculatorConfig, now: Timestamp) -> KResult {
    let total = wallets.len() as u32;

    if total == 0 {
        return KResult {
            k: 0,
            holders: 0,
            never_sold: 0,
            accumulators: 0,
            maintained: 0,
            partial_sellers: 0,
            major_sellers: 0,
            avg_hold_days: 0.0,
            og: 0,
        };
    }

    let mut accumulators = 0u32;
    let mut maintained = 0u32;
    let mut partial_sellers = 0u32;
    let mut major_sellers = 0u32;
    let mut never_sold = 0u32;
    let mut og = 0u32;
    let mut hold_days_sum = 0.0f64;

    for wallet in wallets {
        let retention = wallet.retention();
        match Classification::from_retention(retention) {
            Classification::Accumulator => accumulators += 1,
            Classification::Holder => maintained += 1,
            Classification::Reducer => partial_sellers += 1,
            Classification::Extractor => major_sellers += 1,
        }

        if wallet.total_sent.is_zero() {
            never_sold += 1;
        }

        if let Some(first_buy_ts) = wallet.first_buy_ts {
            let hold_secs = (now - first_buy_ts).max(0);
            hold_days_sum += hold_secs as f64 / 86_400.0;

            let is_early = first_buy_ts >= config.launch_ts
                && first_buy_ts <= config.launch_ts + config.og_early_window_secs;
            let has_held_long_enough = hold_secs >= config.og_hold_threshold_secs;
            if is_early && has_held_long_enough {
                og += 1;
            }
        }
    }

    let k = (100.0 * (accumulators + maintained) as f64 / total as f64).round() as u8;

    KResult {
        k,
        holders: total,
        never_sold,
        accumulators,
        maintained,
        partial_sellers,
        major_sellers,
        avg_hold_days: hold_days_sum / total as f64,
        og,
    }
}

/// The Token Scorer's lighter-weight cousin of [`calculate_k`]: it only needs `{k, holders}` for
/// an arbitrary (non-primary) mint, not the full breakdown, and has no wallet rows to read
/// `total_sent`/`first_buy_ts` from — only the bare retention ratios sampled from cross-token
/// history.
pub fn classify_and_score(retentions: &[f64]) -> (u8, u32) {
    let total = retentions.len() as u32;
    if total == 0 {
        return (0, 0);
    }

    let qualifying = retentions
        .iter()
        .filter(|&&retention| Classification::from_retention(retention).counts_towards_k())
        .count() as u32;

    let k = (100.0 * qualifying as f64 / total as f64).round() as u8;
    (k, total)
}
