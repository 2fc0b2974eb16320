//! Wire codec for the payment header.
//!
//! The header value is standard base64 of a JSON [`PaymentProof`]. Decoding
//! rejects anything structurally wrong before the gate spends a facilitator
//! round-trip on it.

use base64::Engine;

use crate::proof::PaymentProof;
use crate::X402_VERSION;

/// Header carrying the proof (x402 v1 naming). Read first.
pub const PAYMENT_HEADER: &str = "X-PAYMENT";

/// Alternate header carrying the proof.
pub const PAYMENT_SIGNATURE_HEADER: &str = "PAYMENT-SIGNATURE";

/// Header the gate sets on approved responses.
pub const PAYMENT_RESPONSE_HEADER: &str = "PAYMENT-RESPONSE";

pub const MAX_HEADER_LEN: usize = 8 * 1024;
pub const MAX_IDENTIFIER_LEN: usize = 128;
const MAX_SIGNATURE_LEN: usize = 1024;

const BASE58_ALPHABET: &str = "123456789ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("header exceeds 8192 bytes")]
    TooLarge,

    #[error("invalid base64: {0}")]
    InvalidBase64(String),

    #[error("invalid JSON payload: {0}")]
    InvalidJson(String),

    #[error("unsupported x402 version {0}")]
    UnsupportedVersion(u32),

    #[error("field '{0}' must not be empty")]
    EmptyField(&'static str),

    #[error("invalid identifier: {0}")]
    InvalidIdentifier(&'static str),

    #[error("invalid signature encoding: {0}")]
    InvalidSignature(&'static str),
}

/// Decode and structurally validate a payment header value.
pub fn decode(header_value: &str) -> Result<PaymentProof, DecodeError> {
    let header_value = header_value.trim();
    if header_value.len() > MAX_HEADER_LEN {
        return Err(DecodeError::TooLarge);
    }

    let bytes = base64::engine::general_purpose::STANDARD
        .decode(header_value)
        .map_err(|e| DecodeError::InvalidBase64(e.to_string()))?;
    let proof: PaymentProof =
        serde_json::from_slice(&bytes).map_err(|e| DecodeError::InvalidJson(e.to_string()))?;

    if proof.x402_version != X402_VERSION {
        return Err(DecodeError::UnsupportedVersion(proof.x402_version));
    }
    for (name, value) in [
        ("payer", &proof.payer),
        ("asset", &proof.asset),
        ("network", &proof.network),
    ] {
        if value.trim().is_empty() {
            return Err(DecodeError::EmptyField(name));
        }
    }
    check_identifier(&proof.identifier)?;
    check_signature(&proof.signature)?;

    Ok(proof)
}

/// Encode a proof for the payment header. Used by paying clients and tests.
pub fn encode(proof: &PaymentProof) -> Result<String, serde_json::Error> {
    let json = serde_json::to_vec(proof)?;
    Ok(base64::engine::general_purpose::STANDARD.encode(json))
}

fn check_identifier(identifier: &str) -> Result<(), DecodeError> {
    if identifier.is_empty() {
        return Err(DecodeError::EmptyField("identifier"));
    }
    if identifier.len() > MAX_IDENTIFIER_LEN {
        return Err(DecodeError::InvalidIdentifier("too long"));
    }
    if !identifier.bytes().all(|b| b.is_ascii_graphic()) {
        return Err(DecodeError::InvalidIdentifier("must be printable ASCII"));
    }
    Ok(())
}

/// Signatures are opaque to the gate, but must be in one of the encodings
/// facilitators accept: `0x`-prefixed hex (EVM) or base58 (Solana).
fn check_signature(signature: &str) -> Result<(), DecodeError> {
    if signature.is_empty() {
        return Err(DecodeError::EmptyField("signature"));
    }
    if signature.len() > MAX_SIGNATURE_LEN {
        return Err(DecodeError::InvalidSignature("too long"));
    }
    match signature.strip_prefix("0x") {
        Some(hex) => {
            if hex.is_empty() || hex.len() % 2 != 0 {
                return Err(DecodeError::InvalidSignature("empty or odd-length hex"));
            }
            if !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
                return Err(DecodeError::InvalidSignature("non-hex character"));
            }
        }
        None => {
            if !signature.chars().all(|c| BASE58_ALPHABET.contains(c)) {
                return Err(DecodeError::InvalidSignature("not hex or base58"));
            }
        }
    }
    Ok(())
}
