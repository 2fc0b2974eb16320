use actix_web::{get, web, HttpRequest, HttpResponse};
use subtle::ConstantTimeEq;
use x402_gate::SettlementReceipt;

use crate::config::GateConfig;
use crate::metrics;

pub const INITIATE_PAYMENT_PATH: &str = "/api/payment/initiate";

#[get("/health")]
pub async fn health(config: web::Data<GateConfig>) -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "healthy",
        "service": "x402-gate-server",
        "network": config.network,
        "recipient": config.masked_recipient(),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

#[get("/metrics")]
pub async fn metrics_endpoint(req: HttpRequest, config: web::Data<GateConfig>) -> HttpResponse {
    match &config.metrics_token {
        Some(expected) => {
            let authorized = req
                .headers()
                .get("authorization")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.strip_prefix("Bearer "))
                .map(|token| bool::from(token.as_bytes().ct_eq(expected.as_bytes())))
                .unwrap_or(false);

            if !authorized {
                return HttpResponse::Unauthorized().json(serde_json::json!({
                    "error": "unauthorized",
                    "message": "Valid Bearer token required for /metrics"
                }));
            }
        }
        None => {
            if !config.public_metrics {
                return HttpResponse::Forbidden().json(serde_json::json!({
                    "error": "forbidden",
                    "message": "Set METRICS_TOKEN or X402_PUBLIC_METRICS=true to access /metrics"
                }));
            }
        }
    }

    HttpResponse::Ok()
        .content_type("text/plain; version=0.0.4")
        .body(metrics::metrics_output())
}

/// Paid endpoint. Only reachable through the paywall, which leaves the
/// receipt in the request extensions.
pub async fn initiate_payment(receipt: web::ReqData<SettlementReceipt>) -> HttpResponse {
    tracing::info!(
        payer = %receipt.payer,
        transaction = receipt.transaction.as_deref().unwrap_or("-"),
        "payment initiated"
    );
    HttpResponse::Ok().json(serde_json::json!({
        "status": "success",
        "message": "Payment received successfully",
        "redirect": "/home/content"
    }))
}

pub async fn not_found() -> HttpResponse {
    HttpResponse::NotFound().json(serde_json::json!({ "error": "Not Found" }))
}
