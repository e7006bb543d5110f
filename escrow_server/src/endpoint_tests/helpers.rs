use std::{
    sync::atomic::{AtomicU32, Ordering},
    time::Duration,
};

use actix_http::Request;
use actix_web::{
    body::MessageBody,
    dev::{Service, ServiceResponse},
    http::{header::ContentType, StatusCode},
    test,
    test::TestRequest,
};
use chrono::Utc;
use escrow_common::Secret;
use escrow_engine::{
    events::EventProducers,
    helpers::RetryPolicy,
    test_utils::{prepare_test_env, random_db_path},
    traits::PaymentProvider,
    LedgerManagement,
    SqliteDatabase,
};
use log::debug;
use provider_tools::signature::{sign_payload, SIGNATURE_HEADER};
use serde_json::{json, Value};

use crate::{config::ServerConfig, server::AppState};

// Only ever used to sign test deliveries.
pub const WEBHOOK_SECRET: &str = "whsec_endpoint_tests_only";

pub fn test_config() -> ServerConfig {
    let mut config = ServerConfig::default();
    config.provider.webhook_secret = Secret::new(WEBHOOK_SECRET.to_string());
    config.retry_policy = RetryPolicy::new(3, Duration::from_millis(5));
    config
}

/// A fresh database and the app state the server would build around it.
pub async fn new_state<P>(provider: P, config: ServerConfig) -> AppState<SqliteDatabase, P>
where P: PaymentProvider + 'static {
    let db_path = random_db_path();
    prepare_test_env(&db_path).await;
    let db = SqliteDatabase::new_with_url(&db_path, 10).await.expect("Error creating connection to database");
    let escrow = db.escrow_wallet(&config.ledger_policy.currency).await.expect("Error fetching escrow wallet");
    debug!("Test database is at {db_path}");
    AppState { config, db, provider, escrow, producers: EventProducers::default() }
}

/// Sends the request and returns the status and body, whether the response came from a handler or a middleware.
pub async fn send<S, B>(app: &S, req: Request) -> (StatusCode, String)
where
    S: Service<Request, Response = ServiceResponse<B>, Error = actix_web::Error>,
    B: MessageBody,
{
    match test::try_call_service(app, req).await {
        Ok(res) => {
            let status = res.status();
            let body = test::read_body(res).await;
            (status, String::from_utf8_lossy(&body).into_owned())
        },
        Err(e) => {
            let res = e.error_response();
            let status = res.status();
            let body = res.into_body().try_into_bytes().map(|b| String::from_utf8_lossy(&b).into_owned());
            (status, body.unwrap_or_default())
        },
    }
}

pub fn json_body(body: &str) -> Value {
    serde_json::from_str(body).unwrap_or_else(|e| panic!("Response is not JSON ({e}): {body}"))
}

pub fn get(user: &str, path: &str) -> Request {
    with_actor(TestRequest::get().uri(path), user).to_request()
}

pub fn post(user: &str, path: &str, body: Value) -> Request {
    with_actor(TestRequest::post().uri(path), user).set_json(body).to_request()
}

/// A POST without a body, for transitions that take no input.
pub fn post_empty(user: &str, path: &str) -> Request {
    with_actor(TestRequest::post().uri(path), user).to_request()
}

fn with_actor(req: TestRequest, user: &str) -> TestRequest {
    if user.is_empty() {
        req
    } else {
        req.insert_header(("X-Actor-Id", user))
    }
}

/// A provider delivery to the webhook endpoint, signed with [`WEBHOOK_SECRET`].
pub fn signed_webhook(payload: &str) -> TestRequest {
    let header = sign_payload(WEBHOOK_SECRET, Utc::now().timestamp(), payload.as_bytes()).expect("Error signing");
    TestRequest::post()
        .uri("/webhooks/provider")
        .insert_header(ContentType::json())
        .insert_header((SIGNATURE_HEADER, header))
        .set_payload(payload.to_string())
}

pub fn payment_intent_event(event_id: &str, event_type: &str, intent_id: &str, amount: i64, metadata: Value) -> String {
    let status = if event_type == "payment_intent.succeeded" { "succeeded" } else { "requires_payment_method" };
    json!({
        "id": event_id,
        "type": event_type,
        "created": Utc::now().timestamp(),
        "data": { "object": {
            "id": intent_id,
            "amount": amount,
            "currency": "eur",
            "status": status,
            "metadata": metadata,
        }}
    })
    .to_string()
}

/// Registers a travel for `traveler` and a package for `owner` through the internal catalog routes, and books one onto
/// the other. Returns the new booking's id.
pub async fn book<S, B>(app: &S, owner: &str, traveler: &str, amount: i64) -> i64
where
    S: Service<Request, Response = ServiceResponse<B>, Error = actix_web::Error>,
    B: MessageBody,
{
    let n = rand_suffix();
    let travel = format!("travel-{n}");
    let package = format!("package-{n}");
    let (status, _) = send(app, post("", "/internal/travels", json!({ "id": travel, "user_id": traveler }))).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = send(app, post("", "/internal/packages", json!({ "id": package, "user_id": owner }))).await;
    assert_eq!(status, StatusCode::OK);
    let request = json!({ "travel_id": travel, "package_id": package, "amount": amount });
    let (status, body) = send(app, post(owner, "/api/bookings", request)).await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    json_body(&body)["id"].as_i64().expect("booking id")
}

/// Deposits `amount` for `user` and settles it with a signed webhook, the way the provider would.
pub async fn fund_wallet<S, B>(app: &S, user: &str, amount: i64)
where
    S: Service<Request, Response = ServiceResponse<B>, Error = actix_web::Error>,
    B: MessageBody,
{
    let (status, body) = send(app, post(user, "/api/wallet/deposit", json!({ "amount": amount }))).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    let intent = json_body(&body);
    let tx_id = intent["transaction"]["id"].as_i64().expect("transaction id");
    let intent_id = intent["payment_intent_id"].as_str().expect("payment intent id");
    let metadata = json!({ "purpose": "deposit", "wallet_tx_id": tx_id.to_string() });
    let event_id = format!("evt_deposit_{tx_id}_{}", rand_suffix());
    let payload = payment_intent_event(&event_id, "payment_intent.succeeded", intent_id, amount, metadata);
    let (status, body) = send(app, signed_webhook(&payload).to_request()).await;
    assert_eq!(status, StatusCode::OK);
    assert!(json_body(&body)["success"].as_bool().unwrap_or(false), "{body}");
}

pub async fn balance<S, B>(app: &S, user: &str) -> i64
where
    S: Service<Request, Response = ServiceResponse<B>, Error = actix_web::Error>,
    B: MessageBody,
{
    let (status, body) = send(app, get(user, "/api/wallet")).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    json_body(&body)["balance"].as_i64().expect("balance")
}

fn rand_suffix() -> u32 {
    static COUNTER: AtomicU32 = AtomicU32::new(1);
    COUNTER.fetch_add(1, Ordering::Relaxed)
}
