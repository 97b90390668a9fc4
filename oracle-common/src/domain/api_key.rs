// This file is part of conviction-oracle.
// SPDX-License-Identifier: Apache-2.0

use crate::domain::{Tier, Timestamp};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// A persisted API key. The plaintext secret is returned exactly once, at creation, and is never
/// stored; only `key_hash` (a one-way hash) lives in the Store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiKey {
    pub id: Uuid,
    pub key_hash: String,
    pub name: String,
    pub tier: Tier,
    pub per_minute_limit: Option<u32>,
    pub per_day_limit: Option<u32>,
    pub is_active: bool,
    pub created_at: Timestamp,
    pub expires_at: Option<Timestamp>,
    pub last_used_at: Option<Timestamp>,
}

impl ApiKey {
    pub fn is_usable_at(&self, now: Timestamp) -> bool {
        self.is_active && self.expires_at.is_none_or(|exp| exp > now)
    }
}

/// Hash a plaintext API key for storage/lookup. SHA-256 is sufficient here: API keys are
/// high-entropy random tokens, not user-chosen passwords, so a fast one-way hash with no salt
/// needed is appropriate (unlike password hashing).
pub fn hash_api_key(plaintext: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(plaintext.as_bytes());
    hex::encode(hasher.finalize())
}

/// Generate a new random plaintext API key, prefixed so keys are recognizable in logs/configs
/// without revealing which hash they map to.
pub fn generate_api_key() -> String {
    format!("oracle_{}", Uuid::new_v4().simple())
}

/// A daily usage counter for an API key, aggregated by UTC date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageDaily {
    pub key_id: Uuid,
    pub date: String, // YYYYMMDD
    pub requests: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_deterministic_and_one_way() {
        let key = generate_api_key();
        let h1 = hash_api_key(&key);
        let h2 = hash_api_key(&key);
        assert_eq!(h1, h2);
        assert_ne!(h1, key);
    }

    #[test]
    fn expiry_gates_usability() {
        let mut api_key = ApiKey {
            id: Uuid::new_v4(),
            key_hash: "h".into(),
            name: "n".into(),
            tier: Tier::Free,
            per_minute_limit: Some(500),
            per_day_limit: Some(50_000),
            is_active: true,
            created_at: 0,
            expires_at: Some(100),
            last_used_at: None,
        };
        assert!(api_key.is_usable_at(50));
        assert!(!api_key.is_usable_at(150));
        api_key.is_active = false;
        assert!(!api_key.is_usable_at(50));
    }
}
