// This file is part of conviction-oracle.
// SPDX-License-Identifier: Apache-2.0

use crate::domain::Timestamp;
use serde::{Deserialize, Serialize};

/// An append-only record of a K computation. Produced by the K Calculator's `calculateAndSave`
/// path, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub k: u8,
    pub holders: u32,
    pub maintained_count: u32,
    pub accumulators_count: u32,
    pub reducers_count: u32,
    pub extractors_count: u32,
    pub avg_hold_days: f64,
    pub og_count: u32,
    pub never_sold_count: u32,
    pub created_at: Timestamp,
}
