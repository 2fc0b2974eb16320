use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::hmac;

/// Response from the facilitator's `/verify` endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationResult {
    #[serde(rename = "isValid", alias = "valid", alias = "result")]
    pub valid: bool,
    #[serde(
        rename = "invalidReason",
        alias = "reason",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payer: Option<String>,
}

/// Response from the facilitator's `/settle` endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementResult {
    #[serde(rename = "success", alias = "settled", alias = "result")]
    pub settled: bool,
    /// Transaction hash or signature, if settlement succeeded.
    #[serde(
        rename = "transaction",
        alias = "transactionRef",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub transaction_ref: Option<String>,
    #[serde(
        rename = "errorReason",
        alias = "reason",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payer: Option<String>,
}

/// Proof of a captured payment, handed to the protected handler and echoed
/// back to the client in `PAYMENT-RESPONSE`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettlementReceipt {
    pub identifier: String,
    pub payer: String,
    pub network: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction: Option<String>,
}

impl SettlementReceipt {
    /// Value for the `PAYMENT-RESPONSE` header: base64 JSON, with
    /// `.{hmac_hex}` appended when a shared secret is configured.
    pub fn header_value(&self, hmac_secret: Option<&[u8]>) -> Result<String, serde_json::Error> {
        let json = serde_json::to_vec(self)?;
        let encoded = base64::engine::general_purpose::STANDARD.encode(json);
        Ok(match hmac_secret {
            Some(secret) => {
                let mac = hmac::sign(secret, encoded.as_bytes());
                format!("{encoded}.{mac}")
            }
            None => encoded,
        })
    }
}
