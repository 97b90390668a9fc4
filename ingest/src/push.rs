// This file is part of conviction-oracle.
// SPDX-License-Identifier: Apache-2.0

//! The webhook ingest path. The Gateway hands us the raw request body and the
//! `X-Oracle-Signature` header verbatim; HMAC verification happens here, against the *raw*
//! bytes, before any JSON parsing — so a byte-for-byte reserialization mismatch can never mask a
//! forged payload.

use chain_adapter::domain::{RawTransactionEvent, parse_balance_changes};
use oracle_common::domain::{Address, BalanceChangeBatch, verify_hmac_sha256_hex};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PushError {
    #[error("missing signature header")]
    MissingSignature,

    #[error("signature verification failed")]
    InvalidSignature,

    #[error("malformed webhook payload")]
    MalformedPayload(#[source] serde_json::Error),
}

/// Verifies `signature_hex` against `body` using `secret`, then parses `body` as a JSON array of
/// [`RawTransactionEvent`]s and diffs each into [`BalanceChange`](oracle_common::domain::BalanceChange)s
/// for `mint`.
pub fn handle_webhook_body(
    body: &[u8],
    signature_hex: Option<&str>,
    secret: &str,
    mint: &Address,
) -> Result<BalanceChangeBatch, PushError> {
    let signature_hex = signature_hex.ok_or(PushError::MissingSignature)?;
    if !verify_hmac_sha256_hex(secret, body, signature_hex) {
        return Err(PushError::InvalidSignature);
    }

    let events: Vec<RawTransactionEvent> =
        serde_json::from_slice(body).map_err(PushError::MalformedPayload)?;

    Ok(events
        .iter()
        .flat_map(|event| parse_balance_changes(event, mint))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use oracle_common::domain::hmac_sha256_hex;

    fn body() -> Vec<u8> {
        serde_json::to_vec(&serde_json::json!([{
            "type": "TRANSFER",
            "slot": 10,
            "signature": "s1",
            "timestamp": 1_000,
            "tokenTransfers": [{
                "mint": "mint",
                "fromUserAccount": "a",
                "toUserAccount": "b",
                "tokenAmount": "100",
            }],
        }]))
        .unwrap()
    }

    #[test]
    fn rejects_missing_signature() {
        let body = body();
        let result = handle_webhook_body(&body, None, "secret", &Address::from("mint"));
        assert!(matches!(result, Err(PushError::MissingSignature)));
    }

    #[test]
    fn rejects_wrong_signature() {
        let body = body();
        let result = handle_webhook_body(&body, Some("deadbeef"), "secret", &Address::from("mint"));
        assert!(matches!(result, Err(PushError::InvalidSignature)));
    }

    #[test]
    fn accepts_correctly_signed_payload() {
        let body = body();
        let signature = hmac_sha256_hex("secret", &body);
        let changes =
            handle_webhook_body(&body, Some(&signature), "secret", &Address::from("mint")).unwrap();
        assert_eq!(changes.len(), 2);
    }
}
