use actix_web::{http::StatusCode, test, App};
use escrow_engine::{test_utils::FakePaymentProvider, traits::ProviderError};
use serde_json::json;

use super::{
    helpers::{
        balance,
        fund_wallet,
        get,
        json_body,
        new_state,
        payment_intent_event,
        post,
        send,
        signed_webhook,
        test_config,
    },
    mocks::unreachable_provider,
};

#[actix_web::test]
async fn wallet_requires_an_actor() {
    let state = new_state(FakePaymentProvider::new(), test_config()).await;
    let app = test::init_service(App::new().configure(|cfg| state.configure(cfg))).await;
    let (status, body) = send(&app, get("", "/api/wallet")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(body.contains("No authenticated user"), "{body}");
}

#[actix_web::test]
async fn wallet_is_created_on_first_use() {
    let state = new_state(FakePaymentProvider::new(), test_config()).await;
    let app = test::init_service(App::new().configure(|cfg| state.configure(cfg))).await;
    let (status, body) = send(&app, get("alice", "/api/wallet")).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    let wallet = json_body(&body);
    assert_eq!(wallet["owner_id"], "alice");
    assert_eq!(wallet["balance"], 0);
    assert_eq!(wallet["role"], "user");

    // Asking again returns the same wallet
    let (_, body) = send(&app, get("alice", "/api/wallet")).await;
    assert_eq!(json_body(&body)["id"], wallet["id"]);
}

#[actix_web::test]
async fn deposit_is_credited_by_the_webhook_once() {
    let state = new_state(FakePaymentProvider::new(), test_config()).await;
    let app = test::init_service(App::new().configure(|cfg| state.configure(cfg))).await;

    let (status, body) = send(&app, post("alice", "/api/wallet/deposit", json!({ "amount": 2500 }))).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    let intent = json_body(&body);
    assert_eq!(intent["transaction"]["status"], "PENDING");
    assert_eq!(intent["transaction"]["tx_type"], "DEPOSIT");
    assert!(intent["client_secret"].as_str().unwrap().ends_with("_secret"));
    // Nothing is credited until the provider says so
    assert_eq!(balance(&app, "alice").await, 0);

    let tx_id = intent["transaction"]["id"].as_i64().unwrap();
    let intent_id = intent["payment_intent_id"].as_str().unwrap();
    let metadata = json!({ "purpose": "deposit", "wallet_tx_id": tx_id.to_string() });
    let payload = payment_intent_event("evt_100", "payment_intent.succeeded", intent_id, 2500, metadata);
    let (status, body) = send(&app, signed_webhook(&payload).to_request()).await;
    assert_eq!(status, StatusCode::OK);
    let res = json_body(&body);
    assert_eq!(res["success"], true, "{body}");
    assert_eq!(balance(&app, "alice").await, 2500);

    // The provider retries a delivery it thinks was lost
    let (status, body) = send(&app, signed_webhook(&payload).to_request()).await;
    assert_eq!(status, StatusCode::OK);
    let res = json_body(&body);
    assert_eq!(res["success"], true);
    assert_eq!(res["message"], "Event evt_100 was already processed.");
    assert_eq!(balance(&app, "alice").await, 2500);

    let (status, body) = send(&app, get("alice", "/api/wallet/transactions")).await;
    assert_eq!(status, StatusCode::OK);
    let statement = json_body(&body);
    let txs = statement["transactions"].as_array().unwrap();
    assert_eq!(txs.len(), 1);
    assert_eq!(txs[0]["status"], "COMPLETED");
    assert_eq!(statement["wallet"]["balance"], 2500);
}

#[actix_web::test]
async fn failed_deposit_charge() {
    let state = new_state(FakePaymentProvider::new(), test_config()).await;
    let app = test::init_service(App::new().configure(|cfg| state.configure(cfg))).await;
    let (_, body) = send(&app, post("alice", "/api/wallet/deposit", json!({ "amount": 800 }))).await;
    let intent = json_body(&body);
    let tx_id = intent["transaction"]["id"].as_i64().unwrap();
    let intent_id = intent["payment_intent_id"].as_str().unwrap();
    let metadata = json!({ "purpose": "deposit", "wallet_tx_id": tx_id.to_string() });
    let payload = payment_intent_event("evt_101", "payment_intent.payment_failed", intent_id, 800, metadata);
    let (status, body) = send(&app, signed_webhook(&payload).to_request()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json_body(&body)["success"], true, "{body}");
    assert_eq!(balance(&app, "alice").await, 0);
    let (_, body) = send(&app, get("alice", "/api/wallet/transactions")).await;
    assert_eq!(json_body(&body)["transactions"][0]["status"], "FAILED");
}

#[actix_web::test]
async fn deposit_limits() {
    let state = new_state(FakePaymentProvider::new(), test_config()).await;
    let app = test::init_service(App::new().configure(|cfg| state.configure(cfg))).await;
    let (status, body) = send(&app, post("alice", "/api/wallet/deposit", json!({ "amount": 0 }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST, "{body}");
    let (status, body) = send(&app, post("alice", "/api/wallet/deposit", json!({ "amount": 499 }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST, "{body}");
    let (status, _) = send(&app, post("alice", "/api/wallet/deposit", json!({ "amount": "lots" }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[actix_web::test]
async fn deposit_with_the_provider_down() {
    let state = new_state(unreachable_provider(), test_config()).await;
    let app = test::init_service(App::new().configure(|cfg| state.configure(cfg))).await;
    let (status, body) = send(&app, post("alice", "/api/wallet/deposit", json!({ "amount": 1500 }))).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY, "{body}");
    assert!(body.contains("connection reset by peer"), "{body}");
    let (_, body) = send(&app, get("alice", "/api/wallet/transactions")).await;
    let statement = json_body(&body);
    assert_eq!(statement["transactions"][0]["status"], "FAILED");
    assert_eq!(statement["wallet"]["balance"], 0);
}

#[actix_web::test]
async fn withdrawals() {
    let provider = FakePaymentProvider::new();
    let state = new_state(provider.clone(), test_config()).await;
    let app = test::init_service(App::new().configure(|cfg| state.configure(cfg))).await;

    // No wallet yet
    let request = json!({ "amount": 1000, "destination": "acct_bob" });
    let (status, _) = send(&app, post("bob", "/api/wallet/withdraw", request.clone())).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    fund_wallet(&app, "bob", 3000).await;
    let too_small = json!({ "amount": 999, "destination": "acct_bob" });
    let (status, body) = send(&app, post("bob", "/api/wallet/withdraw", too_small)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST, "{body}");
    let too_much = json!({ "amount": 5000, "destination": "acct_bob" });
    let (status, body) = send(&app, post("bob", "/api/wallet/withdraw", too_much)).await;
    assert_eq!(status, StatusCode::PAYMENT_REQUIRED, "{body}");
    assert_eq!(balance(&app, "bob").await, 3000);

    let (status, body) = send(&app, post("bob", "/api/wallet/withdraw", request.clone())).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    let tx = json_body(&body);
    assert_eq!(tx["tx_type"], "WITHDRAW");
    assert_eq!(tx["provider_ref"], "po_0002");
    assert_eq!(balance(&app, "bob").await, 2000);
    assert_eq!(provider.payouts().len(), 1);

    // A refused payout leaves the balance untouched
    provider.fail_payouts_with(Some(ProviderError::Rejected("destination account closed".into())));
    let (status, body) = send(&app, post("bob", "/api/wallet/withdraw", request)).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY, "{body}");
    assert!(body.contains("destination account closed"), "{body}");
    assert_eq!(balance(&app, "bob").await, 2000);
}

#[actix_web::test]
async fn ledger_audit_is_consistent() {
    let state = new_state(FakePaymentProvider::new(), test_config()).await;
    let app = test::init_service(App::new().configure(|cfg| state.configure(cfg))).await;
    fund_wallet(&app, "alice", 1200).await;
    fund_wallet(&app, "bob", 700).await;
    let (status, body) = send(&app, get("", "/internal/audit")).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(json_body(&body)["consistent"], true);
}
