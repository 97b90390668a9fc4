// This file is part of conviction-oracle.
// SPDX-License-Identifier: Apache-2.0

//! SQLite-backed [`Storage`] implementation. Conviction-oracle is single-process and embeds its
//! whole data model in one database file, so there is no cloud/standalone split here the way the
//! upstream indexer has one.

use crate::{
    domain::{
        Address, Amount, ApiKey, BalanceChange, Classification, HolderTransition, QueueDepth,
        QueueEntry, QueueName, Snapshot, StoreError, Tier, Timestamp, Transaction, UsageDaily,
        Wallet, WebhookDelivery, WebhookEventType, WebhookSubscription,
        api_key::{generate_api_key, hash_api_key},
        storage::{HoldersFilter, NewApiKey, NewWebhookSubscription, Storage},
        webhook::DeliveryStatus,
    },
    infra::pool::SqlitePool,
};
use fastrace::trace;
use indoc::indoc;
use sqlx::{Row, sqlite::SqliteRow};
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn wallet_from_row(row: &SqliteRow) -> Result<Wallet, sqlx::Error> {
    let decode_amount = |s: String| -> Result<Amount, sqlx::Error> {
        Amount::decode(&s).map_err(|error| sqlx::Error::Decode(error.into()))
    };

    Ok(Wallet {
        address: Address(row.try_get("address")?),
        first_buy_ts: row.try_get("first_buy_ts")?,
        first_buy_amount: row
            .try_get::<Option<String>, _>("first_buy_amount")?
            .map(decode_amount)
            .transpose()?,
        total_received: decode_amount(row.try_get("total_received")?)?,
        total_sent: decode_amount(row.try_get("total_sent")?)?,
        current_balance: decode_amount(row.try_get("current_balance")?)?,
        peak_balance: decode_amount(row.try_get("peak_balance")?)?,
        last_tx_signature: row.try_get("last_tx_signature")?,
        last_slot: row.try_get::<i64, _>("last_slot")? as u64,
        k_wallet: row
            .try_get::<Option<i64>, _>("k_wallet")?
            .map(|v| v as u8),
        k_wallet_tokens_analyzed: row
            .try_get::<Option<i64>, _>("k_wallet_tokens_analyzed")?
            .map(|v| v as u32),
        k_wallet_updated_at: row.try_get("k_wallet_updated_at")?,
        k_wallet_slot: row
            .try_get::<Option<i64>, _>("k_wallet_slot")?
            .map(|v| v as u64),
    })
}

fn api_key_from_row(row: &SqliteRow) -> Result<ApiKey, sqlx::Error> {
    let tier: String = row.try_get("tier")?;
    Ok(ApiKey {
        id: Uuid::parse_str(&row.try_get::<String, _>("id")?)
            .map_err(|error| sqlx::Error::Decode(error.into()))?,
        key_hash: row.try_get("key_hash")?,
        name: row.try_get("name")?,
        tier: Tier::from_str(&tier).map_err(|error| sqlx::Error::Decode(error.into()))?,
        per_minute_limit: row
            .try_get::<Option<i64>, _>("per_minute_limit")?
            .map(|v| v as u32),
        per_day_limit: row
            .try_get::<Option<i64>, _>("per_day_limit")?
            .map(|v| v as u32),
        is_active: row.try_get("is_active")?,
        created_at: row.try_get("created_at")?,
        expires_at: row.try_get("expires_at")?,
        last_used_at: row.try_get("last_used_at")?,
    })
}

fn webhook_subscription_from_row(row: &SqliteRow) -> Result<WebhookSubscription, sqlx::Error> {
    let event_set: String = row.try_get("event_set")?;
    let event_set = event_set
        .split(',')
        .filter(|s| !s.is_empty())
        .map(WebhookEventType::from_str)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|error| sqlx::Error::Decode(error.into()))?;

    Ok(WebhookSubscription {
        id: Uuid::parse_str(&row.try_get::<String, _>("id")?)
            .map_err(|error| sqlx::Error::Decode(error.into()))?,
        owner_api_key_id: Uuid::parse_str(&row.try_get::<String, _>("owner_api_key_id")?)
            .map_err(|error| sqlx::Error::Decode(error.into()))?,
        url: row.try_get("url")?,
        event_set,
        secret: row.try_get("secret")?,
        is_active: row.try_get("is_active")?,
        failure_count: row.try_get::<i64, _>("failure_count")? as u32,
        last_triggered_at: row.try_get("last_triggered_at")?,
    })
}

fn webhook_delivery_from_row(row: &SqliteRow) -> Result<WebhookDelivery, sqlx::Error> {
    let status: String = row.try_get("status")?;
    let event_type: String = row.try_get("event_type")?;

    Ok(WebhookDelivery {
        id: Uuid::parse_str(&row.try_get::<String, _>("id")?)
            .map_err(|error| sqlx::Error::Decode(error.into()))?,
        subscription_id: Uuid::parse_str(&row.try_get::<String, _>("subscription_id")?)
            .map_err(|error| sqlx::Error::Decode(error.into()))?,
        event_type: WebhookEventType::from_str(&event_type)
            .map_err(|error| sqlx::Error::Decode(error.into()))?,
        payload_json: row.try_get("payload_json")?,
        status: DeliveryStatus::from_str(&status)
            .map_err(|error| sqlx::Error::Decode(error.into()))?,
        attempts: row.try_get::<i64, _>("attempts")? as u32,
        response_code: row
            .try_get::<Option<i64>, _>("response_code")?
            .map(|v| v as u16),
        response_body: row.try_get("response_body")?,
        next_retry_at: row.try_get("next_retry_at")?,
        created_at: row.try_get("created_at")?,
        completed_at: row.try_get("completed_at")?,
    })
}

impl Storage for SqliteStorage {
    #[trace]
    async fn upsert_wallet(&self, change: &BalanceChange) -> Result<HolderTransition, StoreError> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query("SELECT * FROM wallets WHERE address = ?1")
            .bind(change.wallet.as_str())
            .fetch_optional(&mut *tx)
            .await?;

        let existed = row.is_some();
        let mut wallet = match row {
            Some(row) => wallet_from_row(&row)?,
            None => Wallet::new(change.wallet.clone()),
        };

        // Per-wallet slot monotonicity: a change for a slot we've already applied is a no-op.
        if existed && change.slot <= wallet.last_slot {
            return Ok(HolderTransition::None);
        }

        let is_positive = change.amount.is_positive();
        let new_balance = wallet.current_balance.saturating_add_signed(&change.amount);
        let (received, sent) = if is_positive {
            (change.amount.abs(), Amount::ZERO)
        } else {
            (Amount::ZERO, change.amount.abs())
        };

        let transition = wallet.apply(
            change.slot,
            change.block_time,
            new_balance,
            is_positive,
            &received,
            &sent,
            &change.signature,
        );

        let query = indoc! {"
            INSERT INTO wallets (
                address, first_buy_ts, first_buy_amount, total_received, total_sent,
                current_balance, peak_balance, last_tx_signature, last_slot,
                k_wallet, k_wallet_tokens_analyzed, k_wallet_updated_at, k_wallet_slot
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
            ON CONFLICT (address) DO UPDATE SET
                first_buy_ts = excluded.first_buy_ts,
                first_buy_amount = excluded.first_buy_amount,
                total_received = excluded.total_received,
                total_sent = excluded.total_sent,
                current_balance = excluded.current_balance,
                peak_balance = excluded.peak_balance,
                last_tx_signature = excluded.last_tx_signature,
                last_slot = excluded.last_slot
        "};

        sqlx::query(query)
            .bind(wallet.address.as_str())
            .bind(wallet.first_buy_ts)
            .bind(wallet.first_buy_amount.as_ref().map(Amount::encode))
            .bind(wallet.total_received.encode())
            .bind(wallet.total_sent.encode())
            .bind(wallet.current_balance.encode())
            .bind(wallet.peak_balance.encode())
            .bind(&wallet.last_tx_signature)
            .bind(wallet.last_slot as i64)
            .bind(wallet.k_wallet.map(|v| v as i64))
            .bind(wallet.k_wallet_tokens_analyzed.map(|v| v as i64))
            .bind(wallet.k_wallet_updated_at)
            .bind(wallet.k_wallet_slot.map(|v| v as i64))
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(transition)
    }

    #[trace]
    async fn get_wallet(&self, address: &Address) -> Result<Option<Wallet>, StoreError> {
        let row = sqlx::query("SELECT * FROM wallets WHERE address = ?1")
            .bind(address.as_str())
            .fetch_optional(&*self.pool)
            .await?;
        row.as_ref().map(wallet_from_row).transpose().map_err(StoreError::from)
    }

    #[trace]
    async fn get_wallets_min_balance(&self, min_balance: &Amount) -> Result<Vec<Wallet>, StoreError> {
        let query = indoc! {"
            SELECT * FROM wallets
            WHERE current_balance >= ?1
            ORDER BY current_balance DESC, address ASC
        "};

        let rows = sqlx::query(query)
            .bind(min_balance.encode())
            .fetch_all(&*self.pool)
            .await?;

        rows.iter()
            .map(wallet_from_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(StoreError::from)
    }

    #[trace]
    async fn get_holders_filtered(
        &self,
        filter: &HoldersFilter,
    ) -> Result<(Vec<Wallet>, u32), StoreError> {
        // `filter.exclude_pools` is not enforced here: pool/authority classification is
        // chain-adapter's job and the Store has no such column to filter on yet.
        let query = indoc! {"
            SELECT * FROM wallets
            WHERE current_balance != ?1
            ORDER BY current_balance DESC, address ASC
        "};

        let rows = sqlx::query(query)
            .bind(Amount::ZERO.encode())
            .fetch_all(&*self.pool)
            .await?;

        let mut wallets = rows
            .iter()
            .map(wallet_from_row)
            .collect::<Result<Vec<_>, _>>()?;

        wallets.retain(|wallet| {
            let classification_ok = filter
                .classification
                .is_none_or(|want| Classification::from_retention(wallet.retention()) == want);
            let k_min_ok = filter
                .k_min
                .is_none_or(|k_min| wallet.k_wallet.is_some_and(|k| k >= k_min));
            classification_ok && k_min_ok
        });

        let total = wallets.len() as u32;
        wallets.truncate(filter.limit.max(1) as usize);

        Ok((wallets, total))
    }

    #[trace]
    async fn update_wallet_k_wallet(
        &self,
        address: &Address,
        k_wallet: u8,
        tokens_analyzed: u32,
        slot: u64,
        now: Timestamp,
    ) -> Result<(), StoreError> {
        let query = indoc! {"
            UPDATE wallets
            SET k_wallet = ?1, k_wallet_tokens_analyzed = ?2, k_wallet_updated_at = ?3, k_wallet_slot = ?4
            WHERE address = ?5
        "};

        sqlx::query(query)
            .bind(k_wallet as i64)
            .bind(tokens_analyzed as i64)
            .bind(now)
            .bind(slot as i64)
            .bind(address.as_str())
            .execute(&*self.pool)
            .await?;

        Ok(())
    }

    #[trace]
    async fn get_stale_wallets(
        &self,
        staleness_secs: i64,
        now: Timestamp,
        limit: u32,
    ) -> Result<Vec<Address>, StoreError> {
        let query = indoc! {"
            SELECT address FROM wallets
            WHERE k_wallet_updated_at IS NULL OR k_wallet_updated_at < ?1
            ORDER BY k_wallet_updated_at ASC NULLS FIRST
            LIMIT ?2
        "};

        let rows = sqlx::query(query)
            .bind(now - staleness_secs)
            .bind(limit as i64)
            .fetch_all(&*self.pool)
            .await?;

        rows.into_iter()
            .map(|row| row.try_get("address").map(Address))
            .collect::<Result<Vec<_>, _>>()
            .map_err(StoreError::from)
    }

    #[trace]
    async fn record_transaction(&self, transaction: &Transaction) -> Result<bool, StoreError> {
        let query = indoc! {"
            INSERT INTO transactions (signature, slot, block_time, wallet, amount)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT (signature) DO NOTHING
        "};

        let result = sqlx::query(query)
            .bind(&transaction.signature)
            .bind(transaction.slot as i64)
            .bind(transaction.block_time)
            .bind(transaction.wallet.as_str())
            .bind(transaction.amount.to_string())
            .execute(&*self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    #[trace]
    async fn last_processed_slot(&self) -> Result<u64, StoreError> {
        let row = sqlx::query("SELECT COALESCE(MAX(slot), 0) AS slot FROM transactions")
            .fetch_one(&*self.pool)
            .await?;
        Ok(row.try_get::<i64, _>("slot")? as u64)
    }

    #[trace]
    async fn save_snapshot(&self, snapshot: &Snapshot) -> Result<(), StoreError> {
        let query = indoc! {"
            INSERT INTO snapshots (
                k, holders, maintained_count, accumulators_count, reducers_count,
                extractors_count, avg_hold_days, og_count, never_sold_count, created_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
        "};

        sqlx::query(query)
            .bind(snapshot.k as i64)
            .bind(snapshot.holders as i64)
            .bind(snapshot.maintained_count as i64)
            .bind(snapshot.accumulators_count as i64)
            .bind(snapshot.reducers_count as i64)
            .bind(snapshot.extractors_count as i64)
            .bind(snapshot.avg_hold_days)
            .bind(snapshot.og_count as i64)
            .bind(snapshot.never_sold_count as i64)
            .bind(snapshot.created_at)
            .execute(&*self.pool)
            .await?;

        Ok(())
    }

    #[trace]
    async fn get_latest_snapshot(&self) -> Result<Option<Snapshot>, StoreError> {
        let query = indoc! {"
            SELECT * FROM snapshots ORDER BY created_at DESC LIMIT 1
        "};

        sqlx::query_as::<_, SnapshotRow>(query)
            .fetch_optional(&*self.pool)
            .await
            .map(|row| row.map(SnapshotRow::into_snapshot))
            .map_err(StoreError::from)
    }

    #[trace]
    async fn get_snapshot_history(&self, since: Timestamp) -> Result<Vec<Snapshot>, StoreError> {
        let query = indoc! {"
            SELECT * FROM snapshots WHERE created_at >= ?1 ORDER BY created_at ASC
        "};

        let rows = sqlx::query_as::<_, SnapshotRow>(query)
            .bind(since)
            .fetch_all(&*self.pool)
            .await?;

        Ok(rows.into_iter().map(SnapshotRow::into_snapshot).collect())
    }

    #[trace]
    async fn get_sync_state(&self, key: &str) -> Result<Option<String>, StoreError> {
        let row = sqlx::query("SELECT value FROM sync_state WHERE key = ?1")
            .bind(key)
            .fetch_optional(&*self.pool)
            .await?;
        row.map(|row| row.try_get("value")).transpose().map_err(StoreError::from)
    }

    #[trace]
    async fn set_sync_state(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let query = indoc! {"
            INSERT INTO sync_state (key, value) VALUES (?1, ?2)
            ON CONFLICT (key) DO UPDATE SET value = excluded.value
        "};

        sqlx::query(query)
            .bind(key)
            .bind(value)
            .execute(&*self.pool)
            .await?;

        Ok(())
    }

    #[trace]
    async fn enqueue(&self, queue: QueueName, key: &str, priority: i32) -> Result<(), StoreError> {
        let query = format!(
            "INSERT INTO {table} (key, priority, attempts, created_at) VALUES (?1, ?2, 0, ?3)
             ON CONFLICT (key) DO UPDATE SET priority = MAX({table}.priority, excluded.priority)",
            table = queue.table_name(),
        );

        sqlx::query(&query)
            .bind(key)
            .bind(priority)
            .bind(now_unix())
            .execute(&*self.pool)
            .await?;

        Ok(())
    }

    #[trace]
    async fn dequeue(
        &self,
        queue: QueueName,
        lease_secs: i64,
        now: Timestamp,
    ) -> Result<Option<QueueEntry>, StoreError> {
        let query = format!(
            "UPDATE {table}
             SET locked_until = ?2
             WHERE key = (
                 SELECT key FROM {table}
                 WHERE locked_until IS NULL OR locked_until <= ?1
                 ORDER BY priority DESC, created_at ASC
                 LIMIT 1
             )
             RETURNING key, priority, attempts, last_error, created_at, locked_until",
            table = queue.table_name(),
        );

        let row = sqlx::query(&query)
            .bind(now)
            .bind(now + lease_secs)
            .fetch_optional(&*self.pool)
            .await?;

        row.map(|row| {
            Ok(QueueEntry {
                key: row.try_get("key")?,
                priority: row.try_get("priority")?,
                attempts: row.try_get::<i64, _>("attempts")? as u32,
                last_error: row.try_get("last_error")?,
                created_at: row.try_get("created_at")?,
                locked_until: row.try_get("locked_until")?,
            })
        })
        .transpose()
        .map_err(StoreError::from)
    }

    #[trace]
    async fn complete(&self, queue: QueueName, key: &str) -> Result<(), StoreError> {
        let query = format!("DELETE FROM {} WHERE key = ?1", queue.table_name());
        sqlx::query(&query).bind(key).execute(&*self.pool).await?;
        Ok(())
    }

    #[trace]
    async fn fail(&self, queue: QueueName, key: &str, error: &str) -> Result<(), StoreError> {
        let query = format!(
            "UPDATE {} SET attempts = attempts + 1, last_error = ?1, locked_until = NULL WHERE key = ?2",
            queue.table_name(),
        );
        sqlx::query(&query)
            .bind(error)
            .bind(key)
            .execute(&*self.pool)
            .await?;
        Ok(())
    }

    #[trace]
    async fn cleanup_queue(&self, queue: QueueName, max_attempts: u32) -> Result<u64, StoreError> {
        let query = format!("DELETE FROM {} WHERE attempts >= ?1", queue.table_name());
        let result = sqlx::query(&query)
            .bind(max_attempts as i64)
            .execute(&*self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    #[trace]
    async fn queue_depth(&self, queue: QueueName, now: Timestamp) -> Result<QueueDepth, StoreError> {
        let query = format!(
            "SELECT
                 SUM(CASE WHEN locked_until IS NULL OR locked_until <= ?1 THEN 1 ELSE 0 END) AS pending,
                 SUM(CASE WHEN locked_until IS NOT NULL AND locked_until > ?1 THEN 1 ELSE 0 END) AS leased
             FROM {table}",
            table = queue.table_name(),
        );
        let row = sqlx::query(&query).bind(now).fetch_one(&*self.pool).await?;
        Ok(QueueDepth {
            pending: row.try_get::<Option<i64>, _>("pending")?.unwrap_or(0) as u32,
            leased: row.try_get::<Option<i64>, _>("leased")?.unwrap_or(0) as u32,
        })
    }

    #[trace]
    async fn create_api_key(&self, new_key: NewApiKey) -> Result<(ApiKey, String), StoreError> {
        let plaintext = generate_api_key();
        let api_key = ApiKey {
            id: Uuid::new_v4(),
            key_hash: hash_api_key(&plaintext),
            name: new_key.name,
            tier: new_key.tier,
            per_minute_limit: new_key.per_minute_limit,
            per_day_limit: new_key.per_day_limit,
            is_active: true,
            created_at: now_unix(),
            expires_at: new_key.expires_at,
            last_used_at: None,
        };

        let query = indoc! {"
            INSERT INTO api_keys (
                id, key_hash, name, tier, per_minute_limit, per_day_limit,
                is_active, created_at, expires_at, last_used_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
        "};

        sqlx::query(query)
            .bind(api_key.id.to_string())
            .bind(&api_key.key_hash)
            .bind(&api_key.name)
            .bind(api_key.tier.to_string())
            .bind(api_key.per_minute_limit.map(|v| v as i64))
            .bind(api_key.per_day_limit.map(|v| v as i64))
            .bind(api_key.is_active)
            .bind(api_key.created_at)
            .bind(api_key.expires_at)
            .bind(api_key.last_used_at)
            .execute(&*self.pool)
            .await?;

        Ok((api_key, plaintext))
    }

    #[trace]
    async fn validate_api_key(&self, plaintext: &str) -> Result<Option<ApiKey>, StoreError> {
        let hash = hash_api_key(plaintext);
        let row = sqlx::query("SELECT * FROM api_keys WHERE key_hash = ?1")
            .bind(hash)
            .fetch_optional(&*self.pool)
            .await?;
        row.as_ref().map(api_key_from_row).transpose().map_err(StoreError::from)
    }

    #[trace]
    async fn touch_api_key_last_used(&self, id: Uuid, now: Timestamp) -> Result<(), StoreError> {
        sqlx::query("UPDATE api_keys SET last_used_at = ?1 WHERE id = ?2")
            .bind(now)
            .bind(id.to_string())
            .execute(&*self.pool)
            .await?;
        Ok(())
    }

    #[trace]
    async fn list_api_keys(&self) -> Result<Vec<ApiKey>, StoreError> {
        let rows = sqlx::query("SELECT * FROM api_keys ORDER BY created_at DESC")
            .fetch_all(&*self.pool)
            .await?;
        rows.iter()
            .map(api_key_from_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(StoreError::from)
    }

    #[trace]
    async fn revoke_api_key(&self, id: Uuid) -> Result<bool, StoreError> {
        let result = sqlx::query("UPDATE api_keys SET is_active = 0 WHERE id = ?1")
            .bind(id.to_string())
            .execute(&*self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    #[trace]
    async fn increment_usage(&self, key_id: Uuid, date: &str) -> Result<(), StoreError> {
        let query = indoc! {"
            INSERT INTO usage_daily (key_id, date, requests) VALUES (?1, ?2, 1)
            ON CONFLICT (key_id, date) DO UPDATE SET requests = requests + 1
        "};

        sqlx::query(query)
            .bind(key_id.to_string())
            .bind(date)
            .execute(&*self.pool)
            .await?;

        Ok(())
    }

    #[trace]
    async fn get_usage(&self, key_id: Uuid, date: &str) -> Result<UsageDaily, StoreError> {
        let row = sqlx::query("SELECT requests FROM usage_daily WHERE key_id = ?1 AND date = ?2")
            .bind(key_id.to_string())
            .bind(date)
            .fetch_optional(&*self.pool)
            .await?;

        Ok(UsageDaily {
            key_id,
            date: date.to_owned(),
            requests: row.map(|row| row.get::<i64, _>("requests") as u64).unwrap_or(0),
        })
    }

    #[trace]
    async fn create_webhook_subscription(
        &self,
        new_subscription: NewWebhookSubscription,
    ) -> Result<WebhookSubscription, StoreError> {
        let subscription = WebhookSubscription {
            id: Uuid::new_v4(),
            owner_api_key_id: new_subscription.owner_api_key_id,
            url: new_subscription.url,
            event_set: new_subscription.event_set,
            secret: new_subscription.secret,
            is_active: true,
            failure_count: 0,
            last_triggered_at: None,
        };

        let query = indoc! {"
            INSERT INTO webhook_subscriptions (
                id, owner_api_key_id, url, event_set, secret, is_active, failure_count, last_triggered_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
        "};

        sqlx::query(query)
            .bind(subscription.id.to_string())
            .bind(subscription.owner_api_key_id.to_string())
            .bind(&subscription.url)
            .bind(event_set_to_string(&subscription.event_set))
            .bind(&subscription.secret)
            .bind(subscription.is_active)
            .bind(subscription.failure_count as i64)
            .bind(subscription.last_triggered_at)
            .execute(&*self.pool)
            .await?;

        Ok(subscription)
    }

    #[trace]
    async fn get_webhook_subscription(
        &self,
        id: Uuid,
    ) -> Result<Option<WebhookSubscription>, StoreError> {
        let row = sqlx::query("SELECT * FROM webhook_subscriptions WHERE id = ?1")
            .bind(id.to_string())
            .fetch_optional(&*self.pool)
            .await?;
        row.as_ref()
            .map(webhook_subscription_from_row)
            .transpose()
            .map_err(StoreError::from)
    }

    #[trace]
    async fn list_webhook_subscriptions(
        &self,
        owner_api_key_id: Option<Uuid>,
    ) -> Result<Vec<WebhookSubscription>, StoreError> {
        let rows = match owner_api_key_id {
            Some(owner) => {
                sqlx::query("SELECT * FROM webhook_subscriptions WHERE owner_api_key_id = ?1")
                    .bind(owner.to_string())
                    .fetch_all(&*self.pool)
                    .await?
            }
            None => {
                sqlx::query("SELECT * FROM webhook_subscriptions")
                    .fetch_all(&*self.pool)
                    .await?
            }
        };

        rows.iter()
            .map(webhook_subscription_from_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(StoreError::from)
    }

    #[trace]
    async fn active_subscriptions_for_event(
        &self,
        event: WebhookEventType,
    ) -> Result<Vec<WebhookSubscription>, StoreError> {
        let query = indoc! {"
            SELECT * FROM webhook_subscriptions
            WHERE is_active = 1 AND (',' || event_set || ',') LIKE ?1
        "};

        let rows = sqlx::query(query)
            .bind(format!("%,{event},%"))
            .fetch_all(&*self.pool)
            .await?;

        rows.iter()
            .map(webhook_subscription_from_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(StoreError::from)
    }

    #[trace]
    async fn update_webhook_subscription(
        &self,
        subscription: &WebhookSubscription,
    ) -> Result<(), StoreError> {
        let query = indoc! {"
            UPDATE webhook_subscriptions
            SET url = ?1, event_set = ?2, secret = ?3, is_active = ?4,
                failure_count = ?5, last_triggered_at = ?6
            WHERE id = ?7
        "};

        sqlx::query(query)
            .bind(&subscription.url)
            .bind(event_set_to_string(&subscription.event_set))
            .bind(&subscription.secret)
            .bind(subscription.is_active)
            .bind(subscription.failure_count as i64)
            .bind(subscription.last_triggered_at)
            .bind(subscription.id.to_string())
            .execute(&*self.pool)
            .await?;

        Ok(())
    }

    #[trace]
    async fn delete_webhook_subscription(&self, id: Uuid) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM webhook_subscriptions WHERE id = ?1")
            .bind(id.to_string())
            .execute(&*self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    #[trace]
    async fn create_delivery(
        &self,
        subscription_id: Uuid,
        event_type: WebhookEventType,
        payload_json: String,
        now: Timestamp,
    ) -> Result<WebhookDelivery, StoreError> {
        let delivery = WebhookDelivery {
            id: Uuid::new_v4(),
            subscription_id,
            event_type,
            payload_json,
            status: DeliveryStatus::Pending,
            attempts: 0,
            response_code: None,
            response_body: None,
            next_retry_at: Some(now),
            created_at: now,
            completed_at: None,
        };

        let query = indoc! {"
            INSERT INTO webhook_deliveries (
                id, subscription_id, event_type, payload_json, status, attempts,
                response_code, response_body, next_retry_at, created_at, completed_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
        "};

        sqlx::query(query)
            .bind(delivery.id.to_string())
            .bind(delivery.subscription_id.to_string())
            .bind(delivery.event_type.to_string())
            .bind(&delivery.payload_json)
            .bind(delivery.status.to_string())
            .bind(delivery.attempts as i64)
            .bind(delivery.response_code.map(|v| v as i64))
            .bind(&delivery.response_body)
            .bind(delivery.next_retry_at)
            .bind(delivery.created_at)
            .bind(delivery.completed_at)
            .execute(&*self.pool)
            .await?;

        Ok(delivery)
    }

    #[trace]
    async fn claim_pending_deliveries(
        &self,
        limit: u32,
        now: Timestamp,
    ) -> Result<Vec<WebhookDelivery>, StoreError> {
        let query = indoc! {"
            SELECT * FROM webhook_deliveries
            WHERE status = 'pending' AND next_retry_at <= ?1
            ORDER BY next_retry_at ASC
            LIMIT ?2
        "};

        let rows = sqlx::query(query)
            .bind(now)
            .bind(limit as i64)
            .fetch_all(&*self.pool)
            .await?;

        rows.iter()
            .map(webhook_delivery_from_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(StoreError::from)
    }

    #[trace]
    async fn update_delivery(&self, delivery: &WebhookDelivery) -> Result<(), StoreError> {
        let query = indoc! {"
            UPDATE webhook_deliveries
            SET status = ?1, attempts = ?2, response_code = ?3, response_body = ?4,
                next_retry_at = ?5, completed_at = ?6
            WHERE id = ?7
        "};

        sqlx::query(query)
            .bind(delivery.status.to_string())
            .bind(delivery.attempts as i64)
            .bind(delivery.response_code.map(|v| v as i64))
            .bind(&delivery.response_body)
            .bind(delivery.next_retry_at)
            .bind(delivery.completed_at)
            .bind(delivery.id.to_string())
            .execute(&*self.pool)
            .await?;

        Ok(())
    }

    #[trace]
    async fn list_deliveries(
        &self,
        subscription_id: Uuid,
        limit: u32,
    ) -> Result<Vec<WebhookDelivery>, StoreError> {
        let query = indoc! {"
            SELECT * FROM webhook_deliveries
            WHERE subscription_id = ?1
            ORDER BY created_at DESC
            LIMIT ?2
        "};

        let rows = sqlx::query(query)
            .bind(subscription_id.to_string())
            .bind(limit as i64)
            .fetch_all(&*self.pool)
            .await?;

        rows.iter()
            .map(webhook_delivery_from_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(StoreError::from)
    }

    #[trace]
    async fn backup(&self, dest_path: &str) -> Result<(), StoreError> {
        sqlx::query("VACUUM INTO ?1").bind(dest_path).execute(&*self.pool).await?;
        Ok(())
    }
}

fn event_set_to_string(event_set: &[WebhookEventType]) -> String {
    event_set
        .iter()
        .map(WebhookEventType::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

fn now_unix() -> Timestamp {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as Timestamp)
        .unwrap_or(0)
}

#[derive(sqlx::FromRow)]
struct SnapshotRow {
    k: i64,
    holders: i64,
    maintained_count: i64,
    accumulators_count: i64,
    reducers_count: i64,
    extractors_count: i64,
    avg_hold_days: f64,
    og_count: i64,
    never_sold_count: i64,
    created_at: Timestamp,
}

impl SnapshotRow {
    fn into_snapshot(self) -> Snapshot {
        Snapshot {
            k: self.k as u8,
            holders: self.holders as u32,
            maintained_count: self.maintained_count as u32,
            accumulators_count: self.accumulators_count as u32,
            reducers_count: self.reducers_count as u32,
            extractors_count: self.extractors_count as u32,
            avg_hold_days: self.avg_hold_days,
            og_count: self.og_count as u32,
            never_sold_count: self.never_sold_count as u32,
            created_at: self.created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::{migrations, pool};

    async fn storage() -> SqliteStorage {
        let dir = tempfile::tempdir().unwrap();
        let cnn_url = dir.path().join("test.sqlite").display().to_string();
        let pool = pool::SqlitePool::new(pool::Config {
            cnn_url,
            ..Default::default()
        })
        .await
        .unwrap();
        migrations::run(&pool).await.unwrap();
        // Leak the tempdir so the file survives for the pool's lifetime within the test.
        std::mem::forget(dir);
        SqliteStorage::new(pool)
    }

    fn change(wallet: &str, slot: u64, amount: &str, sig: &str) -> BalanceChange {
        BalanceChange {
            mint: Address::from("mint"),
            wallet: Address::from(wallet),
            slot,
            block_time: slot as i64 * 10,
            amount: amount.parse().unwrap(),
            signature: sig.to_owned(),
        }
    }

    #[tokio::test]
    async fn upsert_wallet_is_slot_monotonic() {
        let storage = storage().await;
        storage.upsert_wallet(&change("w1", 2, "100", "s2")).await.unwrap();
        storage.upsert_wallet(&change("w1", 1, "50", "s1")).await.unwrap();

        let wallet = storage.get_wallet(&Address::from("w1")).await.unwrap().unwrap();
        assert_eq!(wallet.current_balance, Amount::from_u64(100));
    }

    #[tokio::test]
    async fn enqueue_dequeue_complete_round_trip() {
        let storage = storage().await;
        storage.enqueue(QueueName::KWallet, "w1", 10).await.unwrap();

        let entry = storage
            .dequeue(QueueName::KWallet, 60, 1_000)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(entry.key, "w1");

        assert!(storage.dequeue(QueueName::KWallet, 60, 1_000).await.unwrap().is_none());

        storage.complete(QueueName::KWallet, "w1").await.unwrap();
        storage.enqueue(QueueName::KWallet, "w1", 10).await.unwrap();
        assert!(storage.dequeue(QueueName::KWallet, 60, 1_000).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn api_key_create_and_validate() {
        let storage = storage().await;
        let (api_key, plaintext) = storage
            .create_api_key(NewApiKey {
                name: "test".into(),
                tier: Tier::Free,
                per_minute_limit: Some(500),
                per_day_limit: Some(50_000),
                expires_at: None,
            })
            .await
            .unwrap();

        let validated = storage.validate_api_key(&plaintext).await.unwrap().unwrap();
        assert_eq!(validated.id, api_key.id);
        assert!(storage.validate_api_key("wrong").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn webhook_subscription_event_filter_round_trips() {
        let storage = storage().await;
        let (api_key, _) = storage
            .create_api_key(NewApiKey {
                name: "owner".into(),
                tier: Tier::Internal,
                per_minute_limit: None,
                per_day_limit: None,
                expires_at: None,
            })
            .await
            .unwrap();

        storage
            .create_webhook_subscription(NewWebhookSubscription {
                owner_api_key_id: api_key.id,
                url: "https://example.com/hook".into(),
                event_set: vec![WebhookEventType::KChange],
                secret: "s".into(),
            })
            .await
            .unwrap();

        let matches = storage
            .active_subscriptions_for_event(WebhookEventType::KChange)
            .await
            .unwrap();
        assert_eq!(matches.len(), 1);

        let no_match = storage
            .active_subscriptions_for_event(WebhookEventType::HolderNew)
            .await
            .unwrap();
        assert!(no_match.is_empty());
    }
}
