//! `HttpFacilitatorClient` against an in-process facilitator.

use std::time::Duration;

use actix_web::{web, App, HttpRequest, HttpResponse, HttpServer};
use x402_gate::hmac::{self, FACILITATOR_AUTH_HEADER};
use x402_gate::{FacilitatorClient, FacilitatorError, HttpFacilitatorClient, PaymentProof, PaymentRequirement};

const SECRET: &[u8] = b"facilitator-test-secret-0123456789";

async fn verify_ok() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({ "isValid": true, "payer": "P" }))
}

async fn settle_ok() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({
        "success": true,
        "transaction": "0xabc",
        "network": "example-net"
    }))
}

async fn verify_rejected() -> HttpResponse {
    HttpResponse::BadRequest().json(serde_json::json!({
        "isValid": false,
        "invalidReason": "insufficient_funds"
    }))
}

async fn slow() -> HttpResponse {
    tokio::time::sleep(Duration::from_secs(2)).await;
    HttpResponse::Ok().json(serde_json::json!({ "isValid": true }))
}

async fn unauthorized() -> HttpResponse {
    HttpResponse::Unauthorized().finish()
}

async fn broken() -> HttpResponse {
    HttpResponse::InternalServerError().body("database on fire")
}

async fn garbage() -> HttpResponse {
    HttpResponse::Ok().body("<html>not json</html>")
}

async fn refused() -> HttpResponse {
    HttpResponse::BadRequest().body("bad request")
}

async fn echo_body(body: web::Bytes) -> HttpResponse {
    let parsed: serde_json::Value = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(_) => return HttpResponse::BadRequest().finish(),
    };
    let shaped = parsed["x402Version"] == 1
        && parsed["paymentPayload"]["identifier"] == "abc"
        && parsed["paymentRequirements"]["recipient"] == "R";
    HttpResponse::Ok().json(serde_json::json!({ "isValid": shaped }))
}

async fn hmac_checked(req: HttpRequest, body: web::Bytes) -> HttpResponse {
    let signed = req
        .headers()
        .get(FACILITATOR_AUTH_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|sig| hmac::verify(SECRET, &body, sig))
        .unwrap_or(false);
    if signed {
        HttpResponse::Ok().json(serde_json::json!({ "isValid": true }))
    } else {
        HttpResponse::Unauthorized().finish()
    }
}

/// Start the stub facilitator and return its base URL.
fn spawn_facilitator() -> String {
    let server = HttpServer::new(|| {
        App::new()
            .route("/ok/verify", web::post().to(verify_ok))
            .route("/ok/settle", web::post().to(settle_ok))
            .route("/reject/verify", web::post().to(verify_rejected))
            .route("/slow/verify", web::post().to(slow))
            .route("/unauthorized/verify", web::post().to(unauthorized))
            .route("/broken/verify", web::post().to(broken))
            .route("/garbage/verify", web::post().to(garbage))
            .route("/refused/verify", web::post().to(refused))
            .route("/echo/verify", web::post().to(echo_body))
            .route("/hmac/verify", web::post().to(hmac_checked))
    })
    .workers(1)
    .bind(("127.0.0.1", 0))
    .unwrap();
    let addr = server.addrs()[0];
    actix_rt::spawn(server.run());
    format!("http://{addr}")
}

fn requirement(facilitator_url: String) -> PaymentRequirement {
    PaymentRequirement::new(
        "/paid",
        "0.01".parse().unwrap(),
        "USDC",
        "R",
        "example-net",
        facilitator_url,
    )
}

fn proof() -> PaymentProof {
    PaymentProof {
        x402_version: 1,
        payer: "P".to_string(),
        amount: "0.01".parse().unwrap(),
        asset: "USDC".to_string(),
        network: "example-net".to_string(),
        recipient: None,
        identifier: "abc".to_string(),
        signature: "0xdeadbeef".to_string(),
        expiry: None,
    }
}

fn client() -> HttpFacilitatorClient {
    HttpFacilitatorClient::new(Duration::from_millis(300)).unwrap()
}

#[actix_rt::test]
async fn test_verify_and_settle_success() {
    let base = spawn_facilitator();
    let requirement = requirement(format!("{base}/ok"));

    let verification = client().verify(&proof(), &requirement).await.unwrap();
    assert!(verification.valid);
    assert_eq!(verification.payer.as_deref(), Some("P"));

    let settlement = client().settle(&proof(), &requirement).await.unwrap();
    assert!(settlement.settled);
    assert_eq!(settlement.transaction_ref.as_deref(), Some("0xabc"));
}

#[actix_rt::test]
async fn test_request_body_reaches_facilitator() {
    let base = spawn_facilitator();
    // Trailing slash on the configured URL must not produce `//verify`.
    let requirement = requirement(format!("{base}/echo/"));
    let verification = client().verify(&proof(), &requirement).await.unwrap();
    assert!(verification.valid);
}

#[actix_rt::test]
async fn test_semantic_rejection_is_a_result() {
    let base = spawn_facilitator();
    let verification = client()
        .verify(&proof(), &requirement(format!("{base}/reject")))
        .await
        .unwrap();
    assert!(!verification.valid);
    assert_eq!(verification.reason.as_deref(), Some("insufficient_funds"));
}

#[actix_rt::test]
async fn test_timeout_is_distinct() {
    let base = spawn_facilitator();
    let err = client()
        .verify(&proof(), &requirement(format!("{base}/slow")))
        .await
        .unwrap_err();
    assert_eq!(err, FacilitatorError::Timeout(Duration::from_millis(300)));
    assert!(err.is_transient());
}

#[actix_rt::test]
async fn test_error_statuses() {
    let base = spawn_facilitator();

    let err = client()
        .verify(&proof(), &requirement(format!("{base}/unauthorized")))
        .await
        .unwrap_err();
    assert_eq!(err, FacilitatorError::Unauthorized);

    let err = client()
        .verify(&proof(), &requirement(format!("{base}/broken")))
        .await
        .unwrap_err();
    assert_eq!(err, FacilitatorError::Status(500));

    let err = client()
        .verify(&proof(), &requirement(format!("{base}/garbage")))
        .await
        .unwrap_err();
    assert!(matches!(err, FacilitatorError::InvalidResponse(_)));

    let err = client()
        .verify(&proof(), &requirement(format!("{base}/refused")))
        .await
        .unwrap_err();
    assert_eq!(err, FacilitatorError::Rejected(400));
    assert!(!err.is_transient());
}

#[actix_rt::test]
async fn test_connection_refused_is_transport() {
    // Bind then drop to get a port nothing listens on.
    let port = std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port();
    let err = client()
        .verify(&proof(), &requirement(format!("http://127.0.0.1:{port}")))
        .await
        .unwrap_err();
    assert!(matches!(err, FacilitatorError::Transport(_)));
}

#[actix_rt::test]
async fn test_hmac_header_signs_body() {
    let base = spawn_facilitator();
    let requirement = requirement(format!("{base}/hmac"));

    let err = client().verify(&proof(), &requirement).await.unwrap_err();
    assert_eq!(err, FacilitatorError::Unauthorized);

    let signed = client().with_hmac_secret(SECRET.to_vec());
    assert!(signed.verify(&proof(), &requirement).await.unwrap().valid);
}
