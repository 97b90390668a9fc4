// This file is part of conviction-oracle.
// SPDX-License-Identifier: Apache-2.0

//! The Store's public API. Durable, process-local, single-writer/many-reader: all mutation goes
//! through these methods, all other components treat the Store as a black box. See the data
//! model's per-entity invariants (crate::domain::{wallet, webhook, queue, ...}) for what each
//! implementation must uphold.

use crate::domain::{
    Address, Amount, ApiKey, BalanceChange, Classification, HolderTransition, QueueDepth,
    QueueEntry, QueueName, Snapshot, StoreError, Tier, Timestamp, Transaction, UsageDaily, Wallet,
    WebhookDelivery, WebhookEventType, WebhookSubscription,
};
use uuid::Uuid;

/// Filter for `GET /k-metric/holders`.
#[derive(Debug, Clone, Default)]
pub struct HoldersFilter {
    pub k_min: Option<u8>,
    pub classification: Option<Classification>,
    pub exclude_pools: bool,
    pub limit: u32,
}

/// Parameters accepted by [`Storage::create_api_key`]; the plaintext secret is generated inside
/// the Store implementation and returned exactly once.
#[derive(Debug, Clone)]
pub struct NewApiKey {
    pub name: String,
    pub tier: Tier,
    pub per_minute_limit: Option<u32>,
    pub per_day_limit: Option<u32>,
    pub expires_at: Option<Timestamp>,
}

#[derive(Debug, Clone)]
pub struct NewWebhookSubscription {
    pub owner_api_key_id: Uuid,
    pub url: String,
    pub event_set: Vec<WebhookEventType>,
    pub secret: String,
}

/// The Store abstraction. All methods may fail with [`StoreError::Transient`] (callers should
/// retry with backoff for background work) or [`StoreError::Fatal`] (propagate to the caller).
#[trait_variant::make(Send)]
pub trait Storage
where
    Self: Clone + Send + Sync + 'static,
{
    // -- Wallets ----------------------------------------------------------------------------

    /// Applies a change to the wallet's cost basis. A no-op if the wallet's persisted
    /// `last_slot` is already `>= change.slot` (the per-wallet slot-monotonicity guard).
    async fn upsert_wallet(&self, change: &BalanceChange) -> Result<HolderTransition, StoreError>;

    async fn get_wallet(&self, address: &Address) -> Result<Option<Wallet>, StoreError>;

    /// Deterministic ordering: descending current balance, ties broken by address.
    async fn get_wallets_min_balance(&self, min_balance: &Amount) -> Result<Vec<Wallet>, StoreError>;

    /// Returns the filtered/paginated holder list plus the total matching count (pre-limit).
    async fn get_holders_filtered(
        &self,
        filter: &HoldersFilter,
    ) -> Result<(Vec<Wallet>, u32), StoreError>;

    async fn update_wallet_k_wallet(
        &self,
        address: &Address,
        k_wallet: u8,
        tokens_analyzed: u32,
        slot: u64,
        now: Timestamp,
    ) -> Result<(), StoreError>;

    /// Wallets whose `k_wallet_updated_at` is older than `now - staleness_secs` (or was never
    /// computed), for the periodic low-priority refresh scanner.
    async fn get_stale_wallets(
        &self,
        staleness_secs: i64,
        now: Timestamp,
        limit: u32,
    ) -> Result<Vec<Address>, StoreError>;

    // -- Transactions -------------------------------------------------------------------------

    /// Idempotent on `signature`. Returns whether a new row was inserted.
    async fn record_transaction(&self, transaction: &Transaction) -> Result<bool, StoreError>;

    /// `max(slot)` across transactions; monotonic; the ingest watermark.
    async fn last_processed_slot(&self) -> Result<u64, StoreError>;

    // -- Snapshots ------------------------------------------------------------------------------

    async fn save_snapshot(&self, snapshot: &Snapshot) -> Result<(), StoreError>;

    async fn get_latest_snapshot(&self) -> Result<Option<Snapshot>, StoreError>;

    async fn get_snapshot_history(&self, since: Timestamp) -> Result<Vec<Snapshot>, StoreError>;

    // -- Sync state -----------------------------------------------------------------------------

    async fn get_sync_state(&self, key: &str) -> Result<Option<String>, StoreError>;

    async fn set_sync_state(&self, key: &str, value: &str) -> Result<(), StoreError>;

    // -- Queues (K_wallet / Token) ----------------------------------------------------------------

    /// Idempotent; a duplicate enqueue coalesces by raising `priority` to the max of old and new.
    async fn enqueue(&self, queue: QueueName, key: &str, priority: i32) -> Result<(), StoreError>;

    /// Atomic "select oldest with `locked_until` expired, set `locked_until := now + lease`".
    async fn dequeue(
        &self,
        queue: QueueName,
        lease_secs: i64,
        now: Timestamp,
    ) -> Result<Option<QueueEntry>, StoreError>;

    async fn complete(&self, queue: QueueName, key: &str) -> Result<(), StoreError>;

    async fn fail(&self, queue: QueueName, key: &str, error: &str) -> Result<(), StoreError>;

    /// Removes entries with `attempts >= max_attempts`; returns the number removed.
    async fn cleanup_queue(&self, queue: QueueName, max_attempts: u32) -> Result<u64, StoreError>;

    /// Pending (lease expired or never held) vs. leased (locked by a worker) counts, for the
    /// admin queue-status view.
    async fn queue_depth(&self, queue: QueueName, now: Timestamp) -> Result<QueueDepth, StoreError>;

    // -- API keys ---------------------------------------------------------------------------------

    /// Returns the record and the plaintext key (shown exactly once).
    async fn create_api_key(&self, new_key: NewApiKey) -> Result<(ApiKey, String), StoreError>;

    async fn validate_api_key(&self, plaintext: &str) -> Result<Option<ApiKey>, StoreError>;

    async fn touch_api_key_last_used(&self, id: Uuid, now: Timestamp) -> Result<(), StoreError>;

    async fn list_api_keys(&self) -> Result<Vec<ApiKey>, StoreError>;

    async fn revoke_api_key(&self, id: Uuid) -> Result<bool, StoreError>;

    // -- Usage ------------------------------------------------------------------------------------

    async fn increment_usage(&self, key_id: Uuid, date: &str) -> Result<(), StoreError>;

    async fn get_usage(&self, key_id: Uuid, date: &str) -> Result<UsageDaily, StoreError>;

    // -- Webhook subscriptions ----------------------------------------------------------------------

    async fn create_webhook_subscription(
        &self,
        new_subscription: NewWebhookSubscription,
    ) -> Result<WebhookSubscription, StoreError>;

    async fn get_webhook_subscription(
        &self,
        id: Uuid,
    ) -> Result<Option<WebhookSubscription>, StoreError>;

    async fn list_webhook_subscriptions(
        &self,
        owner_api_key_id: Option<Uuid>,
    ) -> Result<Vec<WebhookSubscription>, StoreError>;

    async fn active_subscriptions_for_event(
        &self,
        event: WebhookEventType,
    ) -> Result<Vec<WebhookSubscription>, StoreError>;

    async fn update_webhook_subscription(
        &self,
        subscription: &WebhookSubscription,
    ) -> Result<(), StoreError>;

    async fn delete_webhook_subscription(&self, id: Uuid) -> Result<bool, StoreError>;

    // -- Webhook deliveries -------------------------------------------------------------------------

    async fn create_delivery(
        &self,
        subscription_id: Uuid,
        event_type: WebhookEventType,
        payload_json: String,
        now: Timestamp,
    ) -> Result<WebhookDelivery, StoreError>;

    /// Deliveries with `status = pending`, `attempts < max_attempts`, `next_retry_at <= now`.
    async fn claim_pending_deliveries(
        &self,
        limit: u32,
        now: Timestamp,
    ) -> Result<Vec<WebhookDelivery>, StoreError>;

    async fn update_delivery(&self, delivery: &WebhookDelivery) -> Result<(), StoreError>;

    async fn list_deliveries(
        &self,
        subscription_id: Uuid,
        limit: u32,
    ) -> Result<Vec<WebhookDelivery>, StoreError>;

    // -- Maintenance ----------------------------------------------------------------------------

    /// Writes a consistent snapshot of the whole database to `dest_path`, for the scheduled (and
    /// admin-triggered) backup ticker.
    async fn backup(&self, dest_path: &str) -> Result<(), StoreError>;
}
