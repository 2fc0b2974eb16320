use std::sync::Arc;

use actix_web::body::{BoxBody, MessageBody};
use actix_web::dev::{ServiceRequest, ServiceResponse};
use actix_web::http::header::{HeaderName, HeaderValue};
use actix_web::http::StatusCode;
use actix_web::middleware::Next;
use actix_web::{HttpMessage, HttpRequest, HttpResponse};
use futures::future::LocalBoxFuture;
use x402_gate::{
    FacilitatorClient, GateDecision, PaymentGate, PaymentRequirement, Rejection,
    SettlementReceipt, PAYMENT_HEADER, PAYMENT_RESPONSE_HEADER, PAYMENT_SIGNATURE_HEADER,
};

use crate::metrics;

/// Raw proof header, `X-PAYMENT` first, then `PAYMENT-SIGNATURE`.
pub fn proof_header(req: &HttpRequest) -> Option<&str> {
    [PAYMENT_HEADER, PAYMENT_SIGNATURE_HEADER]
        .iter()
        .find_map(|name| req.headers().get(*name))
        .and_then(|v| v.to_str().ok())
}

/// Turn a gate rejection into the JSON response sent to the client.
pub fn rejection_response(rejection: &Rejection) -> HttpResponse {
    let status = StatusCode::from_u16(rejection.status).unwrap_or(StatusCode::PAYMENT_REQUIRED);
    HttpResponse::build(status).json(&rejection.body)
}

// Matched route pattern, not the raw path, to keep label cardinality bounded.
fn endpoint_label(req: &HttpRequest) -> String {
    req.match_pattern().unwrap_or_else(|| "unknown".to_string())
}

/// Run the gate for one request.
///
/// Returns the settlement receipt if the request may proceed, or the
/// response to send instead.
pub async fn require_payment<F: FacilitatorClient>(
    req: &HttpRequest,
    gate: &PaymentGate<F>,
    requirement: &PaymentRequirement,
) -> Result<SettlementReceipt, HttpResponse> {
    match gate.handle(proof_header(req), requirement).await {
        GateDecision::Approved(receipt) => {
            metrics::record_decision("approved");
            Ok(receipt)
        }
        GateDecision::Rejected(rejection) => {
            metrics::record_decision(rejection.error.code());
            metrics::record_request(&endpoint_label(req), rejection.status);
            Err(rejection_response(&rejection))
        }
    }
}

/// Middleware for `actix_web::middleware::from_fn` that puts `requirement`
/// in front of the wrapped service.
///
/// On approval the [`SettlementReceipt`] is stored in the request extensions
/// (extract it with `web::ReqData<SettlementReceipt>`) and echoed in the
/// `PAYMENT-RESPONSE` header, HMAC-signed when `receipt_secret` is set.
/// The handler's body passes through untouched.
pub fn paywall<F, B>(
    gate: Arc<PaymentGate<F>>,
    requirement: PaymentRequirement,
    receipt_secret: Option<Arc<[u8]>>,
) -> impl Fn(ServiceRequest, Next<B>) -> LocalBoxFuture<'static, Result<ServiceResponse<BoxBody>, actix_web::Error>>
where
    F: FacilitatorClient + 'static,
    B: MessageBody + 'static,
{
    let requirement = Arc::new(requirement);
    move |req: ServiceRequest, next: Next<B>| {
        let gate = Arc::clone(&gate);
        let requirement = Arc::clone(&requirement);
        let receipt_secret = receipt_secret.clone();
        Box::pin(async move {
            let outcome = require_payment(req.request(), &gate, &requirement).await;
            let receipt = match outcome {
                Ok(receipt) => receipt,
                Err(response) => return Ok(req.into_response(response)),
            };

            let endpoint = endpoint_label(req.request());
            let receipt_header = receipt.header_value(receipt_secret.as_deref());
            req.extensions_mut().insert(receipt);

            let mut res = next.call(req).await?.map_into_boxed_body();
            match receipt_header {
                Ok(value) => match (
                    HeaderName::from_bytes(PAYMENT_RESPONSE_HEADER.as_bytes()),
                    HeaderValue::from_str(&value),
                ) {
                    (Ok(name), Ok(value)) => {
                        res.headers_mut().insert(name, value);
                    }
                    _ => tracing::warn!("payment receipt is not a valid header value"),
                },
                Err(e) => tracing::warn!(error = %e, "could not encode payment receipt"),
            }
            metrics::record_request(&endpoint, res.status().as_u16());
            Ok(res)
        })
    }
}
