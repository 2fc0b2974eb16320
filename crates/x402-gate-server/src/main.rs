use actix_cors::Cors;
use actix_governor::{Governor, GovernorConfigBuilder};
use actix_web::{web, App, HttpServer};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use x402_gate::{GateSettings, HttpFacilitatorClient, PaymentGate};
use x402_gate_server::{config::GateConfig, routes};

const REPLAY_CLEANUP_INTERVAL: Duration = Duration::from_secs(60);

fn build_cors(origins: &[String]) -> Cors {
    if origins.is_empty() {
        Cors::default()
            .allowed_origin_fn(|origin, _| {
                origin
                    .to_str()
                    .map(|o| o == "http://localhost" || o.starts_with("http://localhost:"))
                    .unwrap_or(false)
            })
            .allow_any_method()
            .allow_any_header()
            .expose_headers(["payment-response"])
            .max_age(3600)
    } else {
        let mut cors = Cors::default();
        for origin in origins {
            cors = cors.allowed_origin(origin);
        }
        cors.allow_any_method()
            .allow_any_header()
            .expose_headers(["payment-response"])
            .max_age(3600)
    }
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = match GateConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "invalid configuration");
            std::process::exit(1);
        }
    };
    tracing::info!(?config, "configuration loaded");

    let mut facilitator =
        HttpFacilitatorClient::new(config.facilitator_timeout).map_err(std::io::Error::other)?;
    if let Some(secret) = &config.hmac_secret {
        facilitator = facilitator.with_hmac_secret(secret.clone());
    }

    let replay_guard = x402_gate_server::open_replay_guard(&config)?;
    let gate = Arc::new(
        PaymentGate::new(facilitator, replay_guard).with_settings(GateSettings {
            retention: config.replay_retention,
            ..GateSettings::default()
        }),
    );
    let _cleanup = gate.start_replay_cleanup(REPLAY_CLEANUP_INTERVAL);

    let governor_conf = GovernorConfigBuilder::default()
        .requests_per_minute(config.rate_limit_rpm)
        .finish()
        .ok_or_else(|| std::io::Error::other("invalid rate limit configuration"))?;

    let port = config.port;
    tracing::info!("x402 gate listening at http://0.0.0.0:{port}");
    tracing::info!(
        "Endpoints: GET {} (price {} {}), GET /health, GET /metrics",
        routes::INITIATE_PAYMENT_PATH,
        config.price,
        config.asset
    );
    tracing::info!("Rate limit: {} req/min per IP", config.rate_limit_rpm);

    HttpServer::new(move || {
        App::new()
            .wrap(build_cors(&config.allowed_origins))
            .wrap(Governor::new(&governor_conf))
            .app_data(web::JsonConfig::default().limit(65_536))
            .configure(|cfg| x402_gate_server::configure(cfg, gate.clone(), &config))
            .default_service(web::to(routes::not_found))
    })
    .bind(("0.0.0.0", port))?
    .run()
    .await
}
