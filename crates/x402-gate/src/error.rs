use serde::Serialize;
use thiserror::Error;

use crate::requirement::PaymentRequirement;
use crate::X402_VERSION;

/// Why the gate refused a request.
///
/// Every variant is terminal for the request. Only
/// [`FacilitatorUnavailable`](Self::FacilitatorUnavailable) is retried, once,
/// inside the gate.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GateError {
    #[error("payment required")]
    MissingProof,

    #[error("malformed proof: {0}")]
    MalformedProof(String),

    #[error("requirement mismatch: {0}")]
    RequirementMismatch(String),

    #[error("proof expired")]
    ExpiredProof,

    #[error("proof already used")]
    ReplayedProof,

    #[error("facilitator unavailable: {0}")]
    FacilitatorUnavailable(String),

    #[error("verification rejected: {0}")]
    VerificationRejected(String),

    #[error("settlement failed: {0}")]
    SettlementFailed(String),
}

/// What an automated payer should do after a rejection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryHint {
    /// Build and sign a new proof.
    FreshProof,
    /// The same proof may succeed later; nothing was captured.
    SameProof,
}

impl GateError {
    pub fn status_code(&self) -> u16 {
        match self {
            GateError::MalformedProof(_) => 400,
            GateError::FacilitatorUnavailable(_) => 503,
            GateError::SettlementFailed(_) => 502,
            GateError::MissingProof
            | GateError::RequirementMismatch(_)
            | GateError::ExpiredProof
            | GateError::ReplayedProof
            | GateError::VerificationRejected(_) => 402,
        }
    }

    /// Machine-readable reason code.
    pub fn code(&self) -> &'static str {
        match self {
            GateError::MissingProof => "missing_proof",
            GateError::MalformedProof(_) => "malformed_proof",
            GateError::RequirementMismatch(_) => "requirement_mismatch",
            GateError::ExpiredProof => "expired_proof",
            GateError::ReplayedProof => "replayed_proof",
            GateError::FacilitatorUnavailable(_) => "facilitator_unavailable",
            GateError::VerificationRejected(_) => "verification_rejected",
            GateError::SettlementFailed(_) => "settlement_failed",
        }
    }

    pub fn retry_hint(&self) -> RetryHint {
        match self {
            GateError::FacilitatorUnavailable(_) | GateError::SettlementFailed(_) => {
                RetryHint::SameProof
            }
            _ => RetryHint::FreshProof,
        }
    }

    /// Client-facing message. Facilitator details never appear verbatim:
    /// a verification reason is passed through only when it is a short
    /// `snake_case` code.
    pub fn public_message(&self) -> String {
        match self {
            GateError::MissingProof => "payment required".to_string(),
            GateError::MalformedProof(_) => "malformed proof".to_string(),
            GateError::RequirementMismatch(detail) => format!("requirement mismatch: {detail}"),
            GateError::ExpiredProof => "proof expired".to_string(),
            GateError::ReplayedProof => "proof already used".to_string(),
            GateError::FacilitatorUnavailable(_) => "facilitator unavailable".to_string(),
            GateError::VerificationRejected(reason) if is_reason_code(reason) => reason.clone(),
            GateError::VerificationRejected(_) => "verification rejected".to_string(),
            GateError::SettlementFailed(_) => "settlement failed".to_string(),
        }
    }
}

fn is_reason_code(reason: &str) -> bool {
    !reason.is_empty()
        && reason.len() <= 64
        && reason
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_')
}

/// JSON body of every gate rejection, including the 402 challenge.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RejectionBody {
    pub x402_version: u32,
    pub error: &'static str,
    pub message: String,
    pub retry: RetryHint,
    /// Present on 402 responses so the client can (re)build a proof.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accepts: Option<Vec<PaymentRequirement>>,
}

/// A rejection ready to be written as an HTTP response.
#[derive(Debug, Clone)]
pub struct Rejection {
    pub status: u16,
    pub error: GateError,
    pub body: RejectionBody,
}

impl Rejection {
    pub fn new(error: GateError, requirement: &PaymentRequirement) -> Self {
        let status = error.status_code();
        let body = RejectionBody {
            x402_version: X402_VERSION,
            error: error.code(),
            message: error.public_message(),
            retry: error.retry_hint(),
            accepts: (status == 402).then(|| vec![requirement.clone()]),
        };
        Self {
            status,
            error,
            body,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn requirement() -> PaymentRequirement {
        PaymentRequirement::new(
            "/paid",
            "0.01".parse().unwrap(),
            "USDC",
            "R",
            "example-net",
            "https://facilitator.example",
        )
    }

    #[test]
    fn test_status_codes_follow_taxonomy() {
        assert_eq!(GateError::MissingProof.status_code(), 402);
        assert_eq!(GateError::MalformedProof("x".into()).status_code(), 400);
        assert_eq!(GateError::ReplayedProof.status_code(), 402);
        assert_eq!(
            GateError::FacilitatorUnavailable("timeout".into()).status_code(),
            503
        );
        assert_eq!(GateError::SettlementFailed("x".into()).status_code(), 502);
    }

    #[test]
    fn test_challenge_body_carries_requirement() {
        let rejection = Rejection::new(GateError::MissingProof, &requirement());
        let body = serde_json::to_value(&rejection.body).unwrap();
        assert_eq!(rejection.status, 402);
        assert_eq!(body["error"], "missing_proof");
        assert_eq!(body["retry"], "fresh_proof");
        assert_eq!(body["accepts"][0]["price"], "0.01");
        assert_eq!(body["accepts"][0]["recipient"], "R");
    }

    #[test]
    fn test_non_402_rejections_omit_accepts() {
        let rejection = Rejection::new(
            GateError::FacilitatorUnavailable("connect refused 10.0.0.3".into()),
            &requirement(),
        );
        let body = serde_json::to_value(&rejection.body).unwrap();
        assert_eq!(rejection.status, 503);
        assert!(body.get("accepts").is_none());
        assert_eq!(body["retry"], "same_proof");
        assert_eq!(body["message"], "facilitator unavailable");
    }

    #[test]
    fn test_facilitator_reason_is_sanitized() {
        let code = GateError::VerificationRejected("insufficient_funds".into());
        assert_eq!(code.public_message(), "insufficient_funds");

        let prose = GateError::VerificationRejected(
            "RPC error: node 10.1.2.3 returned -32000 execution reverted".into(),
        );
        assert_eq!(prose.public_message(), "verification rejected");
    }
}
