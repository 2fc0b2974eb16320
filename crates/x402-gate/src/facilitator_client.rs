//! Client side of the facilitator contract: `POST {facilitatorUrl}/verify`
//! and `POST {facilitatorUrl}/settle`.
//!
//! Clients never retry. A timeout is reported as
//! [`FacilitatorError::Timeout`] so the gate can tell "the facilitator is
//! down" apart from "the facilitator says the proof is bad".

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

use crate::hmac;
use crate::proof::PaymentProof;
use crate::requirement::PaymentRequirement;
use crate::response::{SettlementResult, VerificationResult};
use crate::X402_VERSION;

pub const DEFAULT_FACILITATOR_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FacilitatorError {
    #[error("facilitator timed out after {0:?}")]
    Timeout(Duration),

    #[error("facilitator transport error: {0}")]
    Transport(String),

    #[error("facilitator authentication failed")]
    Unauthorized,

    #[error("facilitator returned HTTP {0}")]
    Status(u16),

    /// A 4xx without a readable body: the facilitator refused the request itself.
    #[error("facilitator refused the request with HTTP {0}")]
    Rejected(u16),

    #[error("facilitator response unreadable: {0}")]
    InvalidResponse(String),
}

impl FacilitatorError {
    /// Network-level failures that may clear up on a second attempt.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            FacilitatorError::Timeout(_) | FacilitatorError::Transport(_)
        )
    }
}

/// The external verification and settlement service.
pub trait FacilitatorClient: Send + Sync {
    /// Check a proof against a requirement without capturing funds.
    fn verify(
        &self,
        proof: &PaymentProof,
        requirement: &PaymentRequirement,
    ) -> impl Future<Output = Result<VerificationResult, FacilitatorError>> + Send;

    /// Capture the payment on the underlying network.
    fn settle(
        &self,
        proof: &PaymentProof,
        requirement: &PaymentRequirement,
    ) -> impl Future<Output = Result<SettlementResult, FacilitatorError>> + Send;
}

impl<T: FacilitatorClient> FacilitatorClient for Arc<T> {
    fn verify(
        &self,
        proof: &PaymentProof,
        requirement: &PaymentRequirement,
    ) -> impl Future<Output = Result<VerificationResult, FacilitatorError>> + Send {
        (**self).verify(proof, requirement)
    }

    fn settle(
        &self,
        proof: &PaymentProof,
        requirement: &PaymentRequirement,
    ) -> impl Future<Output = Result<SettlementResult, FacilitatorError>> + Send {
        (**self).settle(proof, requirement)
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct FacilitatorRequest<'a> {
    x402_version: u32,
    payment_payload: &'a PaymentProof,
    payment_requirements: &'a PaymentRequirement,
}

/// [`FacilitatorClient`] over HTTP, addressed by each requirement's
/// `facilitatorUrl`.
pub struct HttpFacilitatorClient {
    http: reqwest::Client,
    timeout: Duration,
    hmac_secret: Option<Vec<u8>>,
}

impl HttpFacilitatorClient {
    pub fn new(timeout: Duration) -> Result<Self, FacilitatorError> {
        let http = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| FacilitatorError::Transport(format!("client setup failed: {e}")))?;
        Ok(Self::with_http_client(http, timeout))
    }

    pub fn with_http_client(http: reqwest::Client, timeout: Duration) -> Self {
        Self {
            http,
            timeout,
            hmac_secret: None,
        }
    }

    /// Sign every request body with the facilitator's shared secret.
    pub fn with_hmac_secret(mut self, secret: Vec<u8>) -> Self {
        self.hmac_secret = Some(secret);
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn post<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        proof: &PaymentProof,
        requirement: &PaymentRequirement,
    ) -> Result<T, FacilitatorError> {
        let url = format!(
            "{}/{endpoint}",
            requirement.facilitator_url.trim_end_matches('/')
        );
        let body = serde_json::to_vec(&FacilitatorRequest {
            x402_version: X402_VERSION,
            payment_payload: proof,
            payment_requirements: requirement,
        })
        .map_err(|e| FacilitatorError::Transport(format!("serialization failed: {e}")))?;

        let mut request = self
            .http
            .post(&url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .timeout(self.timeout);
        if let Some(secret) = &self.hmac_secret {
            request = request.header(hmac::FACILITATOR_AUTH_HEADER, hmac::sign(secret, &body));
        }

        tracing::debug!(url = %url, identifier = proof.identifier_prefix(), "facilitator call");

        let resp = request
            .body(body)
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        let status = resp.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(FacilitatorError::Unauthorized);
        }
        if status.is_server_error() {
            return Err(FacilitatorError::Status(status.as_u16()));
        }

        let bytes = resp.bytes().await.map_err(|e| self.classify(e))?;
        // Facilitators answer semantic rejections with 4xx and a normal body.
        serde_json::from_slice(&bytes).map_err(|e| {
            if status.is_success() {
                FacilitatorError::InvalidResponse(e.to_string())
            } else {
                status_error(status)
            }
        })
    }

    fn classify(&self, e: reqwest::Error) -> FacilitatorError {
        if e.is_timeout() {
            FacilitatorError::Timeout(self.timeout)
        } else {
            FacilitatorError::Transport(e.to_string())
        }
    }
}

/// 408 and 429 say "not now" and count as an outage; any other non-2xx the
/// facilitator did not explain is a refusal of this proof.
fn status_error(status: reqwest::StatusCode) -> FacilitatorError {
    match status {
        reqwest::StatusCode::REQUEST_TIMEOUT | reqwest::StatusCode::TOO_MANY_REQUESTS => {
            FacilitatorError::Status(status.as_u16())
        }
        s if s.is_client_error() => FacilitatorError::Rejected(s.as_u16()),
        s => FacilitatorError::Status(s.as_u16()),
    }
}

impl FacilitatorClient for HttpFacilitatorClient {
    async fn verify(
        &self,
        proof: &PaymentProof,
        requirement: &PaymentRequirement,
    ) -> Result<VerificationResult, FacilitatorError> {
        self.post("verify", proof, requirement).await
    }

    async fn settle(
        &self,
        proof: &PaymentProof,
        requirement: &PaymentRequirement,
    ) -> Result<SettlementResult, FacilitatorError> {
        self.post("settle", proof, requirement).await
    }
}
