// This file is part of conviction-oracle.
// SPDX-License-Identifier: Apache-2.0

//! Helius-shaped REST client: the Chain Adapter's only concrete implementation. Every outbound
//! call passes through a [`TokenBucket`]; transient upstream errors (timeouts, 5xx) are the
//! caller's to retry, 4xx-class errors propagate as [`ChainAdapterError::Fatal`].

use crate::domain::{
    AddressClassification, ChainAdapter, ChainAdapterError, CrossTokenPosition, Holder,
    RawTransactionEvent, SignatureAtSlot, TokenInfo,
};
use crate::infra::rate_limit::TokenBucket;
use fastrace::trace;
use oracle_common::domain::{Address, Amount, cache::TtlCache};
use serde::Deserialize;
use std::{collections::HashMap, sync::Arc, time::Duration};

/// Programs recognized as AMM/DEX pools or their authorities. Addresses owned by one of these
/// count as pools for `ClassifyAddresses` and for the holders endpoint's `exclude_pools` filter.
const POOL_PROGRAMS: &[(&str, &str)] = &[
    ("675kPX9MHTjS2zt1qfr1NYHuzeLXfQM9H24wFSUt1Mp8", "raydium-amm-v4"),
    ("CAMMCzo5YL8w4VFF8KVHrK22GGUsp5VTaW7grrKgrWqK", "raydium-clmm"),
    ("whirLbMiicVdio4qvUfM5KAg6Ct8VwpYzGff3uctyCc", "orca-whirlpool"),
    ("PhoeNiXZ8ByJGLkxNfZRnkUfjvmuYqLR89jjFHGqdXY", "phoenix"),
    ("LBUZKhRxPF3XUpBCjp4YzTKgLccjZhTSDM9YuVaPwxo", "meteora-dlmm"),
];

#[derive(Debug, Clone, serde::Deserialize)]
pub struct Config {
    pub base_url: String,
    pub api_key: String,

    #[serde(default = "default_rate_limit_capacity")]
    pub rate_limit_capacity: u32,

    #[serde(with = "humantime_serde", default = "default_rate_limit_period")]
    pub rate_limit_period: Duration,

    #[serde(with = "humantime_serde", default = "default_timeout")]
    pub timeout: Duration,
}

fn default_rate_limit_capacity() -> u32 {
    10
}

fn default_rate_limit_period() -> Duration {
    Duration::from_secs(1)
}

fn default_timeout() -> Duration {
    Duration::from_secs(10)
}

#[derive(Debug, Clone)]
pub struct HeliusAdapter {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    bucket: Arc<TokenBucket>,
    classification_cache: Arc<TtlCache<Address, AddressClassification>>,
}

impl HeliusAdapter {
    pub fn new(config: Config) -> Result<Self, ChainAdapterError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|error| ChainAdapterError::Fatal(error.into()))?;

        Ok(Self {
            client,
            base_url: config.base_url,
            api_key: config.api_key,
            bucket: Arc::new(TokenBucket::new(
                config.rate_limit_capacity,
                config.rate_limit_period,
            )),
            classification_cache: Arc::new(TtlCache::new(Duration::from_secs(3_600), 10_000)),
        })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, ChainAdapterError> {
        self.bucket.acquire().await;

        let request = self
            .client
            .get(format!("{}{}", self.base_url, path))
            .query(&[("api-key", self.api_key.clone())])
            .query(query);

        let response = request.send().await.map_err(transient)?;
        let status = response.status();

        if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(ChainAdapterError::Transient(anyhow::anyhow!(
                "upstream returned {status}"
            )));
        }
        if !status.is_success() {
            return Err(ChainAdapterError::Fatal(anyhow::anyhow!(
                "upstream returned {status}"
            )));
        }

        response.json::<T>().await.map_err(|error| {
            ChainAdapterError::Fatal(anyhow::Error::from(error).context("decode upstream response"))
        })
    }
}

fn transient(error: reqwest::Error) -> ChainAdapterError {
    ChainAdapterError::Transient(error.into())
}

#[derive(Debug, Deserialize)]
struct HeliusHolder {
    owner: String,
    amount: String,
}

#[derive(Debug, Deserialize)]
struct HeliusTokenMetadata {
    supply: Option<String>,
    price_usd: Option<f64>,
    price_native: Option<f64>,
    liquidity: Option<f64>,
    market_cap: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct HeliusSignature {
    signature: String,
    slot: u64,
}

#[derive(Debug, Deserialize)]
struct HeliusAccountOwner {
    address: String,
    owner_program: Option<String>,
}

impl ChainAdapter for HeliusAdapter {
    #[trace]
    async fn fetch_holders(&self, mint: &Address) -> Result<Vec<Holder>, ChainAdapterError> {
        let holders: Vec<HeliusHolder> = self
            .get_json("/v0/token-accounts", &[("mint".into(), mint.as_str().to_owned())])
            .await?;

        holders
            .into_iter()
            .map(|h| {
                h.amount.parse::<Amount>().map(|balance| Holder {
                    owner: Address::from(h.owner.as_str()),
                    balance,
                })
            })
            .collect::<Result<Vec<_>, _>>()
            .map_err(|error| ChainAdapterError::Fatal(error.into()))
    }

    #[trace]
    async fn fetch_token_info(&self, mint: &Address) -> Result<TokenInfo, ChainAdapterError> {
        let metadata: HeliusTokenMetadata = self
            .get_json("/v0/token-metadata", &[("mint".into(), mint.as_str().to_owned())])
            .await?;

        Ok(TokenInfo {
            supply: metadata.supply.and_then(|s| s.parse().ok()),
            price_usd: metadata.price_usd,
            price_native: metadata.price_native,
            liquidity: metadata.liquidity,
            mcap: metadata.market_cap,
        })
    }

    #[trace]
    async fn signatures_since(
        &self,
        mint: &Address,
        limit: u32,
    ) -> Result<Vec<SignatureAtSlot>, ChainAdapterError> {
        let signatures: Vec<HeliusSignature> = self
            .get_json(
                "/v0/addresses/signatures",
                &[
                    ("address".into(), mint.as_str().to_owned()),
                    ("limit".into(), limit.to_string()),
                ],
            )
            .await?;

        Ok(signatures
            .into_iter()
            .map(|s| SignatureAtSlot {
                signature: s.signature,
                slot: s.slot,
            })
            .collect())
    }

    #[trace]
    async fn fetch_transaction(
        &self,
        signature: &str,
    ) -> Result<RawTransactionEvent, ChainAdapterError> {
        self.get_json(
            "/v0/transactions",
            &[("signature".into(), signature.to_owned())],
        )
        .await
    }

    #[trace]
    async fn cross_token_history(
        &self,
        wallet: &Address,
        max_pages: u32,
    ) -> Result<HashMap<Address, CrossTokenPosition>, ChainAdapterError> {
        let mut positions: HashMap<Address, CrossTokenPosition> = HashMap::new();
        let mut before: Option<String> = None;

        // Walk pages newest-to-oldest. Within a page, events also arrive newest-first, so
        // iterating each page's events in reverse visits the wallet's history oldest-first,
        // letting each receive unconditionally overwrite first_buy_amount — the earliest
        // positive delta wins, per the Chain Adapter's "first buy" contract.
        for _ in 0..max_pages {
            let mut query = vec![("address".into(), wallet.as_str().to_owned())];
            if let Some(before) = &before {
                query.push(("before".into(), before.clone()));
            }

            let events: Vec<RawTransactionEvent> =
                self.get_json("/v0/addresses/transactions", &query).await?;
            if events.is_empty() {
                break;
            }

            before = events.last().map(|e| e.signature.clone());

            for event in events.iter().rev() {
                for transfer in &event.token_transfers {
                    let Ok(amount) = transfer.token_amount.parse::<Amount>() else {
                        continue;
                    };

                    if transfer.to_user_account.as_ref() == Some(wallet) {
                        let position = positions.entry(transfer.mint.clone()).or_default();
                        position.first_buy_amount = Some(amount.clone());
                        position.total_bought = position.total_bought.clone() + amount.clone();
                        position.current = position.current.clone() + amount;
                        position.tx_count += 1;
                        position.last_tx_ts = Some(event.timestamp);
                    }
                    if transfer.from_user_account.as_ref() == Some(wallet) {
                        let position = positions.entry(transfer.mint.clone()).or_default();
                        position.total_sold = position.total_sold.clone() + amount.clone();
                        position.current = position.current.clone() - amount;
                        position.tx_count += 1;
                        position.last_tx_ts = Some(event.timestamp);
                    }
                }
            }
        }

        Ok(positions)
    }

    #[trace]
    async fn classify_addresses(
        &self,
        addresses: &[Address],
    ) -> Result<HashMap<Address, AddressClassification>, ChainAdapterError> {
        let mut result = HashMap::with_capacity(addresses.len());
        let mut uncached = Vec::new();

        for address in addresses {
            match self.classification_cache.get(address) {
                Some(classification) => {
                    result.insert(address.clone(), classification);
                }
                None => uncached.push(address.clone()),
            }
        }

        if uncached.is_empty() {
            return Ok(result);
        }

        let owners: Vec<HeliusAccountOwner> = self
            .get_json(
                "/v0/addresses/owners",
                &[("addresses".into(), uncached.iter().map(Address::as_str).collect::<Vec<_>>().join(","))],
            )
            .await?;

        let owner_by_address: HashMap<String, Option<String>> = owners
            .into_iter()
            .map(|o| (o.address, o.owner_program))
            .collect();

        for address in uncached {
            let owner_program = owner_by_address.get(address.as_str()).cloned().flatten();
            let classification = classify_owner(owner_program.as_deref());
            self.classification_cache.insert(address.clone(), classification);
            result.insert(address, classification);
        }

        Ok(result)
    }
}

fn classify_owner(owner_program: Option<&str>) -> AddressClassification {
    match owner_program.and_then(|program| {
        POOL_PROGRAMS
            .iter()
            .find(|(id, _)| *id == program)
            .map(|(_, name)| *name)
    }) {
        Some(name) => AddressClassification {
            is_pool: true,
            program: Some(name),
        },
        None => AddressClassification {
            is_pool: false,
            program: None,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use oracle_common::domain::Address;
    use wiremock::{
        Mock, MockServer, ResponseTemplate,
        matchers::{method, path},
    };

    async fn adapter(server: &MockServer) -> HeliusAdapter {
        HeliusAdapter::new(Config {
            base_url: server.uri(),
            api_key: "test-key".into(),
            rate_limit_capacity: 100,
            rate_limit_period: Duration::from_secs(1),
            timeout: Duration::from_secs(5),
        })
        .unwrap()
    }

    #[tokio::test]
    async fn fetch_holders_decodes_balances() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v0/token-accounts"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                {"owner": "w1", "amount": "1000"},
                {"owner": "w2", "amount": "2000"},
            ])))
            .mount(&server)
            .await;

        let adapter = adapter(&server).await;
        let holders = adapter.fetch_holders(&Address::from("mint")).await.unwrap();
        assert_eq!(holders.len(), 2);
        assert_eq!(holders[0].balance, Amount::from_u64(1000));
    }

    #[tokio::test]
    async fn server_error_is_transient() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v0/token-accounts"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let adapter = adapter(&server).await;
        let error = adapter.fetch_holders(&Address::from("mint")).await.unwrap_err();
        assert!(matches!(error, ChainAdapterError::Transient(_)));
    }

    #[tokio::test]
    async fn client_error_is_fatal() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v0/token-accounts"))
            .respond_with(ResponseTemplate::new(400))
            .mount(&server)
            .await;

        let adapter = adapter(&server).await;
        let error = adapter.fetch_holders(&Address::from("mint")).await.unwrap_err();
        assert!(matches!(error, ChainAdapterError::Fatal(_)));
    }

    #[test]
    fn classify_owner_recognizes_known_pool_programs() {
        let classification = classify_owner(Some("whirLbMiicVdio4qvUfM5KAg6Ct8VwpYzGff3uctyCc"));
        assert!(classification.is_pool);
        assert_eq!(classification.program, Some("orca-whirlpool"));

        let classification = classify_owner(Some("11111111111111111111111111111111"));
        assert!(!classification.is_pool);
    }
}
