// This file is part of conviction-oracle.
// SPDX-License-Identifier: Apache-2.0

use crate::domain::Timestamp;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::{fmt, str::FromStr};
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

/// Auto-disabled once `failure_count >= AUTO_DISABLE_THRESHOLD`.
pub const AUTO_DISABLE_THRESHOLD: u32 = 5;

/// Deliveries are marked `failed` after this many attempts.
pub const MAX_DELIVERY_ATTEMPTS: u32 = 3;

/// Backoff schedule indexed by `attempts - 1`.
pub const RETRY_BACKOFF_SECS: [i64; 3] = [60, 300, 900];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookSubscription {
    pub id: Uuid,
    pub owner_api_key_id: Uuid,
    pub url: String,
    pub event_set: Vec<WebhookEventType>,
    pub secret: String,
    pub is_active: bool,
    pub failure_count: u32,
    pub last_triggered_at: Option<Timestamp>,
}

impl WebhookSubscription {
    pub fn subscribes_to(&self, event: WebhookEventType) -> bool {
        self.is_active && self.event_set.contains(&event)
    }

    pub fn record_success(&mut self, now: Timestamp) {
        self.failure_count = 0;
        self.last_triggered_at = Some(now);
    }

    /// Returns whether this subscription just crossed the auto-disable threshold.
    pub fn record_failure(&mut self) -> bool {
        self.failure_count += 1;
        if self.failure_count >= AUTO_DISABLE_THRESHOLD {
            self.is_active = false;
            true
        } else {
            false
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookEventType {
    KChange,
    HolderNew,
    HolderExit,
    ThresholdAlert,
}

impl WebhookEventType {
    pub fn as_str(self) -> &'static str {
        match self {
            WebhookEventType::KChange => "k_change",
            WebhookEventType::HolderNew => "holder_new",
            WebhookEventType::HolderExit => "holder_exit",
            WebhookEventType::ThresholdAlert => "threshold_alert",
        }
    }
}

impl fmt::Display for WebhookEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WebhookEventType {
    type Err = InvalidWebhookEventType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "k_change" => Ok(WebhookEventType::KChange),
            "holder_new" => Ok(WebhookEventType::HolderNew),
            "holder_exit" => Ok(WebhookEventType::HolderExit),
            "threshold_alert" => Ok(WebhookEventType::ThresholdAlert),
            other => Err(InvalidWebhookEventType(other.to_owned())),
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("invalid webhook event type: {0}")]
pub struct InvalidWebhookEventType(pub String);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Pending,
    Success,
    Failed,
}

impl DeliveryStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            DeliveryStatus::Pending => "pending",
            DeliveryStatus::Success => "success",
            DeliveryStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeliveryStatus {
    type Err = InvalidWebhookEventType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(DeliveryStatus::Pending),
            "success" => Ok(DeliveryStatus::Success),
            "failed" => Ok(DeliveryStatus::Failed),
            other => Err(InvalidWebhookEventType(other.to_owned())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookDelivery {
    pub id: Uuid,
    pub subscription_id: Uuid,
    pub event_type: WebhookEventType,
    pub payload_json: String,
    pub status: DeliveryStatus,
    pub attempts: u32,
    pub response_code: Option<u16>,
    pub response_body: Option<String>,
    pub next_retry_at: Option<Timestamp>,
    pub created_at: Timestamp,
    pub completed_at: Option<Timestamp>,
}

impl WebhookDelivery {
    /// Applies a failed delivery attempt, marking it terminal once attempts reach the ceiling.
    /// Returns `true` if this was the attempt that marked the delivery `failed` (i.e. the
    /// subscription's failure counter should be incremented).
    pub fn record_attempt_failure(&mut self, now: Timestamp, code: Option<u16>, body: Option<String>) -> bool {
        self.attempts += 1;
        self.response_code = code;
        self.response_body = body;

        if self.attempts >= MAX_DELIVERY_ATTEMPTS {
            self.status = DeliveryStatus::Failed;
            self.next_retry_at = None;
            self.completed_at = Some(now);
            true
        } else {
            let backoff = RETRY_BACKOFF_SECS[(self.attempts - 1) as usize];
            self.next_retry_at = Some(now + backoff);
            false
        }
    }

    pub fn record_success(&mut self, now: Timestamp, code: u16) {
        self.status = DeliveryStatus::Success;
        self.response_code = Some(code);
        self.next_retry_at = None;
        self.completed_at = Some(now);
    }
}

/// Computes the hex-encoded HMAC-SHA256 of `body` keyed by `secret`, used both for verifying
/// inbound webhooks and for signing outbound ones.
pub fn hmac_sha256_hex(secret: &str, body: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

/// Constant-time signature verification, per the spec's HMAC comparison requirement.
pub fn verify_hmac_sha256_hex(secret: &str, body: &[u8], signature_hex: &str) -> bool {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(body);
    let Ok(signature) = hex::decode(signature_hex) else {
        return false;
    };
    mac.verify_slice(&signature).is_ok()
}

/// The envelope every outbound webhook POST body uses: `{event, timestamp, data}`.
#[derive(Debug, Clone, Serialize)]
pub struct WebhookEnvelope<T> {
    pub event: &'static str,
    pub timestamp: Timestamp,
    pub data: T,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hmac_round_trips() {
        let secret = "shh";
        let body = br#"{"event":"k_change"}"#;
        let sig = hmac_sha256_hex(secret, body);
        assert!(verify_hmac_sha256_hex(secret, body, &sig));
    }

    #[test]
    fn hmac_tamper_detected() {
        let secret = "shh";
        let body = br#"{"event":"k_change"}"#;
        let mut sig = hmac_sha256_hex(secret, body);
        sig.replace_range(0..1, if sig.starts_with('a') { "b" } else { "a" });
        assert!(!verify_hmac_sha256_hex(secret, body, &sig));
    }

    #[test]
    fn delivery_marks_failed_after_max_attempts() {
        let mut delivery = WebhookDelivery {
            id: Uuid::new_v4(),
            subscription_id: Uuid::new_v4(),
            event_type: WebhookEventType::KChange,
            payload_json: "{}".into(),
            status: DeliveryStatus::Pending,
            attempts: 0,
            response_code: None,
            response_body: None,
            next_retry_at: None,
            created_at: 0,
            completed_at: None,
        };

        assert!(!delivery.record_attempt_failure(0, Some(500), None));
        assert_eq!(delivery.status, DeliveryStatus::Pending);
        assert!(!delivery.record_attempt_failure(0, Some(500), None));
        assert!(delivery.record_attempt_failure(0, Some(500), None));
        assert_eq!(delivery.status, DeliveryStatus::Failed);
        assert_eq!(delivery.next_retry_at, None);
    }

    #[test]
    fn subscription_auto_disables_at_threshold() {
        let mut sub = WebhookSubscription {
            id: Uuid::new_v4(),
            owner_api_key_id: Uuid::new_v4(),
            url: "https://example.com".into(),
            event_set: vec![WebhookEventType::KChange],
            secret: "s".into(),
            is_active: true,
            failure_count: 4,
            last_triggered_at: None,
        };
        assert!(sub.record_failure());
        assert!(!sub.is_active);
    }
}
