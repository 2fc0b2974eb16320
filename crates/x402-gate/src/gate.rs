//! The request-level payment decision.
//!
//! Order of checks: proof present, proof well-formed, proof matches the
//! requirement, proof not expired, identifier reserved, facilitator verify,
//! facilitator settle. The identifier is reserved before any facilitator
//! call, so two requests carrying the same proof can never both settle. The
//! reservation is renewed after verify; if its lease lapsed and another
//! request took it over, this request stops before settle.

use std::sync::Arc;
use std::time::Duration;

use crate::codec;
use crate::error::{GateError, Rejection};
use crate::facilitator_client::{FacilitatorClient, FacilitatorError};
use crate::proof::PaymentProof;
use crate::replay_guard::{ReplayGuard, Reservation, DEFAULT_RETENTION};
use crate::requirement::PaymentRequirement;
use crate::response::{SettlementReceipt, VerificationResult};

/// Tunables for [`PaymentGate`].
#[derive(Debug, Clone)]
pub struct GateSettings {
    /// How long a consumed identifier is remembered when the proof carries no expiry.
    pub retention: Duration,
    /// Retry `verify` once when the facilitator fails at the network level.
    pub retry_transient_verify: bool,
}

impl Default for GateSettings {
    fn default() -> Self {
        Self {
            retention: DEFAULT_RETENTION,
            retry_transient_verify: true,
        }
    }
}

/// Outcome of [`PaymentGate::handle`].
#[derive(Debug)]
pub enum GateDecision {
    /// Payment captured; forward the request along with the receipt.
    Approved(SettlementReceipt),
    /// Do not forward; answer with this status and body.
    Rejected(Rejection),
}

impl GateDecision {
    pub fn is_approved(&self) -> bool {
        matches!(self, GateDecision::Approved(_))
    }
}

/// Payment verification gate.
///
/// Generic over the facilitator transport; the replay store is a trait
/// object so in-memory and shared backends are interchangeable at runtime.
pub struct PaymentGate<F> {
    facilitator: F,
    replay_guard: Arc<dyn ReplayGuard>,
    settings: GateSettings,
}

impl<F: FacilitatorClient> PaymentGate<F> {
    pub fn new(facilitator: F, replay_guard: Arc<dyn ReplayGuard>) -> Self {
        Self {
            facilitator,
            replay_guard,
            settings: GateSettings::default(),
        }
    }

    pub fn with_settings(mut self, settings: GateSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn facilitator(&self) -> &F {
        &self.facilitator
    }

    pub fn replay_guard(&self) -> &Arc<dyn ReplayGuard> {
        &self.replay_guard
    }

    /// Decide whether a request carrying `proof_header` may pass `requirement`.
    pub async fn handle(
        &self,
        proof_header: Option<&str>,
        requirement: &PaymentRequirement,
    ) -> GateDecision {
        match self.admit(proof_header, requirement).await {
            Ok(receipt) => GateDecision::Approved(receipt),
            Err(error) => {
                match &error {
                    GateError::MissingProof => {
                        tracing::debug!(path = %requirement.path, "no payment proof, sending challenge")
                    }
                    GateError::FacilitatorUnavailable(_) | GateError::SettlementFailed(_) => {
                        tracing::error!(path = %requirement.path, error = %error, "payment not captured")
                    }
                    _ => tracing::warn!(path = %requirement.path, error = %error, "payment rejected"),
                }
                GateDecision::Rejected(Rejection::new(error, requirement))
            }
        }
    }

    async fn admit(
        &self,
        proof_header: Option<&str>,
        requirement: &PaymentRequirement,
    ) -> Result<SettlementReceipt, GateError> {
        let header = proof_header
            .filter(|h| !h.trim().is_empty())
            .ok_or(GateError::MissingProof)?;
        let proof =
            codec::decode(header).map_err(|e| GateError::MalformedProof(e.to_string()))?;

        tracing::info!(
            payer = %proof.payer,
            identifier = proof.identifier_prefix(),
            amount = %proof.amount,
            "payment attempt"
        );

        check_requirement(&proof, requirement)?;

        let now = unix_now();
        if proof.is_expired(now) {
            return Err(GateError::ExpiredProof);
        }

        // Dropping the reservation on any early return below releases it.
        let guard = Arc::clone(&self.replay_guard);
        let identifier = proof.identifier.clone();
        let reservation = blocking(move || Reservation::acquire(guard, &identifier))
            .await
            .flatten()
            .ok_or(GateError::ReplayedProof)?;

        let verification = self.verify(&proof, requirement).await?;
        if !verification.valid {
            return Err(GateError::VerificationRejected(
                verification
                    .reason
                    .unwrap_or_else(|| "invalid_proof".to_string()),
            ));
        }

        // A lease that lapsed during verify may now belong to another request.
        let reservation = blocking(move || reservation.renew().then_some(reservation))
            .await
            .flatten()
            .ok_or_else(|| {
                tracing::warn!(
                    identifier = proof.identifier_prefix(),
                    "reservation lost during verification, not settling"
                );
                GateError::ReplayedProof
            })?;

        let settlement = self
            .facilitator
            .settle(&proof, requirement)
            .await
            .map_err(|e| GateError::SettlementFailed(e.to_string()))?;
        if !settlement.settled {
            return Err(GateError::SettlementFailed(
                settlement
                    .reason
                    .unwrap_or_else(|| "facilitator reported failure".to_string()),
            ));
        }

        let retention = self.retention_for(&proof, now);
        let held = blocking(move || reservation.confirm(retention))
            .await
            .unwrap_or(false);
        if !held {
            tracing::error!(
                identifier = proof.identifier_prefix(),
                "settled payment whose reservation was taken over"
            );
        }

        tracing::info!(
            payer = %proof.payer,
            identifier = proof.identifier_prefix(),
            transaction = settlement.transaction_ref.as_deref().unwrap_or("-"),
            "payment settled"
        );

        Ok(SettlementReceipt {
            payer: settlement
                .payer
                .or(verification.payer)
                .unwrap_or_else(|| proof.payer.clone()),
            network: requirement.network.clone(),
            transaction: settlement.transaction_ref,
            identifier: proof.identifier,
        })
    }

    async fn verify(
        &self,
        proof: &PaymentProof,
        requirement: &PaymentRequirement,
    ) -> Result<VerificationResult, GateError> {
        match self.facilitator.verify(proof, requirement).await {
            Ok(result) => Ok(result),
            Err(e) if e.is_transient() && self.settings.retry_transient_verify => {
                tracing::warn!(error = %e, "facilitator verify failed, retrying once");
                self.facilitator
                    .verify(proof, requirement)
                    .await
                    .map_err(verify_error)
            }
            Err(e) => Err(verify_error(e)),
        }
    }

    fn retention_for(&self, proof: &PaymentProof, now: u64) -> Duration {
        match proof.expiry {
            Some(expiry) => Duration::from_secs(expiry.saturating_sub(now).max(1)),
            None => self.settings.retention,
        }
    }

    /// Spawn a task that evicts expired replay records every `interval`.
    pub fn start_replay_cleanup(&self, interval: Duration) -> tokio::task::JoinHandle<()> {
        let guard = Arc::clone(&self.replay_guard);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let purged = guard.purge_expired();
                if purged > 0 {
                    tracing::info!(purged, "purged expired replay records");
                }
            }
        })
    }
}

/// Exact match on asset, network and (when named) recipient; amount at
/// least the price. No conversion between assets.
fn check_requirement(
    proof: &PaymentProof,
    requirement: &PaymentRequirement,
) -> Result<(), GateError> {
    if proof.asset != requirement.asset {
        return Err(GateError::RequirementMismatch("asset".to_string()));
    }
    if proof.network != requirement.network {
        return Err(GateError::RequirementMismatch("network".to_string()));
    }
    if proof
        .recipient
        .as_ref()
        .is_some_and(|recipient| *recipient != requirement.recipient)
    {
        return Err(GateError::RequirementMismatch("recipient".to_string()));
    }
    if proof.amount < requirement.price {
        return Err(GateError::RequirementMismatch(
            "amount below price".to_string(),
        ));
    }
    Ok(())
}

fn verify_error(e: FacilitatorError) -> GateError {
    match e {
        FacilitatorError::Rejected(status) => GateError::VerificationRejected(format!(
            "facilitator refused the proof (HTTP {status})"
        )),
        e => GateError::FacilitatorUnavailable(e.to_string()),
    }
}

/// Run a replay store call on the blocking pool. `None` if it panicked.
async fn blocking<T, C>(call: C) -> Option<T>
where
    C: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    match tokio::task::spawn_blocking(call).await {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::error!(error = %e, "replay store call failed");
            None
        }
    }
}

fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
