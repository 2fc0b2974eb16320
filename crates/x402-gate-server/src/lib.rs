//! HTTP service around [`x402_gate`].
//!
//! Serves `GET /api/payment/initiate` behind the payment gate, plus
//! `/health` and `/metrics`.
//!
//! # Modules
//!
//! - [`config`]: environment configuration ([`GateConfig`](config::GateConfig))
//! - [`middleware`]: the paywall ([`paywall`](middleware::paywall), [`require_payment`](middleware::require_payment))
//! - [`routes`]: HTTP handlers
//! - [`metrics`]: Prometheus counters for requests and gate decisions

use std::sync::Arc;

use actix_web::body::BoxBody;
use actix_web::middleware::from_fn;
use actix_web::web;
use x402_gate::{
    lease_for_timeout, FacilitatorClient, InMemoryReplayGuard, PaymentGate, ReplayGuard,
    SqliteReplayGuard,
};

pub mod config;
pub mod metrics;
pub mod middleware;
pub mod routes;

pub use config::{ConfigError, GateConfig};
pub use middleware::{paywall, proof_header, rejection_response, require_payment};

/// Register every route on an app or scope.
pub fn configure<F>(cfg: &mut web::ServiceConfig, gate: Arc<PaymentGate<F>>, config: &GateConfig)
where
    F: FacilitatorClient + 'static,
{
    let requirement = config
        .requirement(routes::INITIATE_PAYMENT_PATH)
        .with_description("Initiate payment");
    let receipt_secret: Option<Arc<[u8]>> = config.hmac_secret.as_deref().map(Arc::from);

    cfg.app_data(web::Data::new(config.clone()))
        .service(routes::health)
        .service(routes::metrics_endpoint)
        .service(
            web::resource(routes::INITIATE_PAYMENT_PATH)
                .wrap(from_fn(paywall::<F, BoxBody>(
                    gate,
                    requirement,
                    receipt_secret,
                )))
                .route(web::get().to(routes::initiate_payment)),
        );
}

/// SQLite when `REPLAY_DB_PATH` is set, otherwise in-memory. The reservation
/// lease is sized from `FACILITATOR_TIMEOUT_SECS`.
pub fn open_replay_guard(config: &GateConfig) -> std::io::Result<Arc<dyn ReplayGuard>> {
    let lease = lease_for_timeout(config.facilitator_timeout);
    match &config.replay_db_path {
        Some(path) => {
            let guard =
                SqliteReplayGuard::open_with_lease(path, lease).map_err(std::io::Error::other)?;
            tracing::info!(path = %path, lease_secs = lease.as_secs(), "replay store: sqlite");
            Ok(Arc::new(guard))
        }
        None => {
            tracing::warn!(
                "REPLAY_DB_PATH not set, replay protection only covers this process"
            );
            Ok(Arc::new(InMemoryReplayGuard::with_lease(lease)))
        }
    }
}
