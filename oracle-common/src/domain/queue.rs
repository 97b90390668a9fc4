// This file is part of conviction-oracle.
// SPDX-License-Identifier: Apache-2.0

use crate::domain::Timestamp;
use serde::{Deserialize, Serialize};

/// A lease-protected work-queue row, shared shape for both the K_wallet queue (keyed by wallet
/// address) and the token queue (keyed by mint). At most one worker may hold a key at a time;
/// mutual exclusion is enforced by `locked_until > now` (see
/// [`crate::domain::storage::Storage::dequeue`]).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub key: String,
    pub priority: i32,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub created_at: Timestamp,
    pub locked_until: Option<Timestamp>,
}

/// Priority used when a new transaction affects a wallet: tx-triggered work preempts background
/// staleness refreshes via `ORDER BY locked_until, priority DESC`.
pub const PRIORITY_TX_TRIGGERED: i32 = 10;

/// Priority used by the periodic staleness scanner.
pub const PRIORITY_STALENESS_REFRESH: i32 = 0;

/// Entries whose attempt count reaches this ceiling are dropped by the background cleaner.
pub const MAX_QUEUE_ATTEMPTS: u32 = 5;

/// Which named queue a [`QueueEntry`] belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueName {
    KWallet,
    Token,
}

impl QueueName {
    pub fn table_name(self) -> &'static str {
        match self {
            QueueName::KWallet => "k_wallet_queue",
            QueueName::Token => "token_queue",
        }
    }
}

/// Aggregate counts for the admin/dashboard queue-status views.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct QueueDepth {
    pub pending: u32,
    pub leased: u32,
}
