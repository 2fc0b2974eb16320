//! x402 payment verification gate.
//!
//! Puts HTTP 402 pay-per-request in front of an endpoint. A request without
//! a payment proof gets a 402 challenge describing what to pay; a request
//! with one is checked locally, reserved against replay, then verified and
//! settled through an external facilitator before it is let through.
//!
//! The gate is transport-agnostic: it takes the raw proof header and the
//! endpoint's [`PaymentRequirement`] and returns a [`GateDecision`].
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use x402_gate::{
//!     GateDecision, HttpFacilitatorClient, InMemoryReplayGuard, PaymentGate,
//!     PaymentRequirement, DEFAULT_FACILITATOR_TIMEOUT,
//! };
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let client = HttpFacilitatorClient::new(DEFAULT_FACILITATOR_TIMEOUT)?;
//! let gate = PaymentGate::new(client, Arc::new(InMemoryReplayGuard::new()));
//!
//! let requirement = PaymentRequirement::new(
//!     "/api/data",
//!     "0.01".parse()?,
//!     "USDC",
//!     "RecipientAddress",
//!     "solana-devnet",
//!     "https://facilitator.payai.network",
//! );
//!
//! match gate.handle(None, &requirement).await {
//!     GateDecision::Approved(receipt) => println!("paid by {}", receipt.payer),
//!     GateDecision::Rejected(rejection) => println!("{}", rejection.status),
//! }
//! # Ok(())
//! # }
//! ```

pub mod amount;
pub mod codec;
pub mod error;
pub mod hmac;
pub mod proof;
pub mod requirement;
pub mod response;

// Stateful pieces
pub mod facilitator_client;
pub mod gate;
pub mod replay_guard;

/// Protocol version written to and required from every message.
pub const X402_VERSION: u32 = 1;

pub use amount::{Amount, AmountError};
pub use codec::{DecodeError, PAYMENT_HEADER, PAYMENT_RESPONSE_HEADER, PAYMENT_SIGNATURE_HEADER};
pub use error::{GateError, Rejection, RejectionBody, RetryHint};
pub use facilitator_client::{
    FacilitatorClient, FacilitatorError, HttpFacilitatorClient, DEFAULT_FACILITATOR_TIMEOUT,
};
pub use gate::{GateDecision, GateSettings, PaymentGate};
pub use proof::PaymentProof;
pub use replay_guard::{
    lease_for_timeout, InMemoryReplayGuard, ReplayGuard, Reservation, SqliteReplayGuard,
};
pub use requirement::{PaymentRequirement, RequirementError};
pub use response::{SettlementReceipt, SettlementResult, VerificationResult};
