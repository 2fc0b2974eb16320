use serde::{Deserialize, Serialize};

use crate::amount::Amount;

/// A client's evidence of payment, decoded from the payment header.
///
/// Lives for one request. The only thing that outlives it is the replay
/// record keyed by [`identifier`](Self::identifier).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentProof {
    pub x402_version: u32,
    pub payer: String,
    pub amount: Amount,
    pub asset: String,
    pub network: String,
    /// Destination the payer signed for. Optional on the wire; checked when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient: Option<String>,
    /// Unique per authorization; the replay key.
    #[serde(alias = "nonce")]
    pub identifier: String,
    pub signature: String,
    /// Unix seconds after which the authorization is no longer valid.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry: Option<u64>,
}

impl PaymentProof {
    pub fn is_expired(&self, now_unix: u64) -> bool {
        self.expiry.is_some_and(|expiry| expiry <= now_unix)
    }

    /// Short identifier prefix for log lines.
    pub fn identifier_prefix(&self) -> &str {
        let end = self
            .identifier
            .char_indices()
            .nth(8)
            .map_or(self.identifier.len(), |(i, _)| i);
        &self.identifier[..end]
    }
}
