use std::net::SocketAddr;

use actix_web::{
    http::{header::ContentType, StatusCode},
    test,
    test::TestRequest,
    App,
};
use chrono::Utc;
use escrow_engine::test_utils::FakePaymentProvider;
use provider_tools::signature::{sign_payload, SIGNATURE_HEADER};
use serde_json::json;

use super::helpers::{
    get,
    json_body,
    new_state,
    payment_intent_event,
    send,
    signed_webhook,
    test_config,
    WEBHOOK_SECRET,
};

#[actix_web::test]
async fn unsigned_deliveries_are_refused() {
    let state = new_state(FakePaymentProvider::new(), test_config()).await;
    let app = test::init_service(App::new().configure(|cfg| state.configure(cfg))).await;
    let payload =
        json!({ "id": "evt_1", "type": "customer.created", "data": { "object": { "id": "cus_1" } } }).to_string();

    let req = TestRequest::post()
        .uri("/webhooks/provider")
        .insert_header(ContentType::json())
        .set_payload(payload.clone())
        .to_request();
    let (status, _) = send(&app, req).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let forged = sign_payload("not_the_secret", Utc::now().timestamp(), payload.as_bytes()).unwrap();
    let req = TestRequest::post()
        .uri("/webhooks/provider")
        .insert_header(ContentType::json())
        .insert_header((SIGNATURE_HEADER, forged))
        .set_payload(payload.clone())
        .to_request();
    let (status, _) = send(&app, req).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    // A valid signature from an hour ago
    let stale = sign_payload(WEBHOOK_SECRET, Utc::now().timestamp() - 3600, payload.as_bytes()).unwrap();
    let req = TestRequest::post()
        .uri("/webhooks/provider")
        .insert_header(ContentType::json())
        .insert_header((SIGNATURE_HEADER, stale))
        .set_payload(payload)
        .to_request();
    let (status, _) = send(&app, req).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[actix_web::test]
async fn signature_checks_can_be_disabled() {
    let mut config = test_config();
    config.webhook_signature_checks = false;
    let state = new_state(FakePaymentProvider::new(), config).await;
    let app = test::init_service(App::new().configure(|cfg| state.configure(cfg))).await;
    let payload = json!({ "id": "evt_1", "type": "customer.created", "data": { "object": { "id": "cus_1" } } });
    let req = TestRequest::post().uri("/webhooks/provider").set_json(payload).to_request();
    let (status, body) = send(&app, req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json_body(&body)["success"], true);
}

#[actix_web::test]
async fn undeliverable_events_are_acknowledged() {
    let state = new_state(FakePaymentProvider::new(), test_config()).await;
    let app = test::init_service(App::new().configure(|cfg| state.configure(cfg))).await;

    // Not an event at all. Retrying will not fix it, so the provider gets a 200.
    let (status, body) = send(&app, signed_webhook("{\"hello\": \"world\"}").to_request()).await;
    assert_eq!(status, StatusCode::OK);
    let res = json_body(&body);
    assert_eq!(res["success"], false);
    assert!(res["message"].as_str().unwrap().starts_with("Not a provider event"));

    // An event whose payload does not match its type
    let payload = json!({ "id": "evt_2", "type": "payout.failed", "data": { "object": { "id": "po_1" } } }).to_string();
    let (status, body) = send(&app, signed_webhook(&payload).to_request()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json_body(&body)["success"], false);

    // A charge for a booking that does not exist
    let metadata = json!({ "purpose": "booking", "booking_id": "9999" });
    let payload = payment_intent_event("evt_3", "payment_intent.succeeded", "pi_unknown", 1000, metadata);
    let (status, body) = send(&app, signed_webhook(&payload).to_request()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json_body(&body)["success"], false, "{body}");

    // Somebody else's charge
    let payload = payment_intent_event("evt_4", "payment_intent.succeeded", "pi_foreign", 1000, json!({}));
    let (status, body) = send(&app, signed_webhook(&payload).to_request()).await;
    assert_eq!(status, StatusCode::OK);
    let res = json_body(&body);
    assert_eq!(res["success"], true);
    assert!(res["message"].as_str().unwrap().contains("not one of ours"), "{}", res["message"]);
}

#[actix_web::test]
async fn informational_events() {
    let state = new_state(FakePaymentProvider::new(), test_config()).await;
    let app = test::init_service(App::new().configure(|cfg| state.configure(cfg))).await;
    let payload = json!({
        "id": "evt_10",
        "type": "payment_method.attached",
        "data": { "object": { "id": "pm_1", "customer": "cus_1", "type": "card" } }
    })
    .to_string();
    let (status, body) = send(&app, signed_webhook(&payload).to_request()).await;
    assert_eq!(status, StatusCode::OK);
    let res = json_body(&body);
    assert_eq!(res["success"], true);
    assert_eq!(res["message"], "ignored: payment_method.attached events are not acted on");

    let (_, body) = send(&app, signed_webhook(&payload).to_request()).await;
    assert_eq!(json_body(&body)["message"], "Event evt_10 was already processed.");
}

#[actix_web::test]
async fn payouts_we_never_made_are_retried() {
    let state = new_state(FakePaymentProvider::new(), test_config()).await;
    let app = test::init_service(App::new().configure(|cfg| state.configure(cfg))).await;
    let payload = json!({
        "id": "evt_20",
        "type": "payout.paid",
        "data": { "object": { "id": "po_from_the_future", "amount": 1000, "currency": "eur", "status": "paid" } }
    })
    .to_string();
    let (status, body) = send(&app, signed_webhook(&payload).to_request()).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE, "{body}");
    assert_eq!(json_body(&body)["success"], false);
}

#[actix_web::test]
async fn internal_routes_are_whitelisted() {
    let mut config = test_config();
    config.internal_whitelist = Some(vec!["10.0.0.7".parse().unwrap()]);
    let state = new_state(FakePaymentProvider::new(), config).await;
    let app = test::init_service(App::new().configure(|cfg| state.configure(cfg))).await;
    let travel = json!({ "id": "travel-1", "user_id": "tomas" });

    let stranger: SocketAddr = "192.168.1.20:40000".parse().unwrap();
    let req = TestRequest::post().uri("/internal/travels").peer_addr(stranger).set_json(travel.clone()).to_request();
    let (status, _) = send(&app, req).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let listing_service: SocketAddr = "10.0.0.7:40000".parse().unwrap();
    let req = TestRequest::post().uri("/internal/travels").peer_addr(listing_service).set_json(travel).to_request();
    let (status, body) = send(&app, req).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(json_body(&body)["user_id"], "tomas");

    // No peer address at all
    let (status, _) = send(&app, get("", "/internal/audit")).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}
