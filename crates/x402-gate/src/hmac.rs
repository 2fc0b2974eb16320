//! HMAC-SHA256 over request bodies and receipt headers.
//!
//! The facilitator authenticates gate traffic with a shared secret sent as a
//! hex MAC in `X-Facilitator-Auth`. The same scheme signs `PAYMENT-RESPONSE`.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the body MAC on facilitator requests.
pub const FACILITATOR_AUTH_HEADER: &str = "X-Facilitator-Auth";

fn keyed(secret: &[u8]) -> HmacSha256 {
    HmacSha256::new_from_slice(secret).expect("HMAC accepts any key length")
}

/// Hex-encoded HMAC-SHA256 of `body`.
pub fn sign(secret: &[u8], body: &[u8]) -> String {
    let mut mac = keyed(secret);
    mac.update(body);
    to_hex(&mac.finalize().into_bytes())
}

/// Constant-time check of a hex MAC produced by [`sign`].
pub fn verify(secret: &[u8], body: &[u8], signature: &str) -> bool {
    let Some(expected) = from_hex(signature) else {
        return false;
    };
    let mut mac = keyed(secret);
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

fn to_hex(bytes: &[u8]) -> String {
    const DIGITS: &[u8; 16] = b"0123456789abcdef";
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push(DIGITS[(b >> 4) as usize] as char);
        out.push(DIGITS[(b & 0x0f) as usize] as char);
    }
    out
}

fn from_hex(s: &str) -> Option<Vec<u8>> {
    if s.len() % 2 != 0 || !s.is_ascii() {
        return None;
    }
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&s[i..i + 2], 16).ok())
        .collect()
}
