use actix_web::{http::StatusCode, test, App};
use chrono::Duration;
use escrow_engine::{test_utils::FakePaymentProvider, traits::ChargeStatus};
use serde_json::{json, Value};

use super::helpers::{
    balance,
    book,
    fund_wallet,
    get,
    json_body,
    new_state,
    payment_intent_event,
    post,
    post_empty,
    send,
    signed_webhook,
    test_config,
};

fn pick_up_proof() -> Value {
    json!({ "photo": "pickup.jpg", "sender_signature": "sender.png", "traveler_signature": "traveler.png" })
}

fn drop_off_proof() -> Value {
    json!({ "photo": "dropoff.jpg", "receiver_signature": "receiver.png", "traveler_signature": "traveler.png" })
}

#[actix_web::test]
async fn delivery_pays_the_traveler() {
    let _ = env_logger::try_init();
    let state = new_state(FakePaymentProvider::new(), test_config()).await;
    let app = test::init_service(App::new().configure(|cfg| state.configure(cfg))).await;
    fund_wallet(&app, "olga", 5000).await;
    let id = book(&app, "olga", "tomas", 5000).await;
    let path = |action: &str| format!("/api/bookings/{id}/{action}");

    let (status, body) = send(&app, get("tomas", &format!("/api/bookings/{id}"))).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    let view = json_body(&body);
    assert_eq!(view["role"], "traveler");
    assert_eq!(view["booking"]["status"], "new");
    let (status, _) = send(&app, get("mallory", &format!("/api/bookings/{id}"))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // Only the owner pays
    let (status, _) = send(&app, post_empty("tomas", &path("fund"))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, body) = send(&app, post_empty("olga", &path("fund"))).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    let funded = json_body(&body);
    assert_eq!(funded["Funded"]["booking"]["status"], "pending_acceptance");
    assert_eq!(funded["Funded"]["booking"]["paid"], true);
    assert_eq!(balance(&app, "olga").await, 0);

    let (status, body) = send(&app, get("tomas", &path("announcement"))).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(json_body(&body)["is_processed"], false);

    // The traveler answers the request, once
    let (status, _) = send(&app, post_empty("olga", &path("accept"))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, body) = send(&app, post_empty("tomas", &path("accept"))).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    let resolved = json_body(&body);
    assert_eq!(resolved["booking"]["status"], "pick_up");
    assert_eq!(resolved["announcement"]["is_accepted"], true);
    let (status, _) = send(&app, post_empty("tomas", &path("refuse"))).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, body) = send(&app, post("tomas", &path("pick_up"), json!({ "photo": "pickup.jpg" }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST, "{body}");
    let (status, body) = send(&app, post("tomas", &path("pick_up"), pick_up_proof())).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(json_body(&body)["status"], "on_the_way");

    // Role is checked before state
    let (status, _) = send(&app, post("olga", &path("drop_off"), drop_off_proof())).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, body) = send(&app, post("tomas", &path("drop_off"), drop_off_proof())).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(json_body(&body)["status"], "delivered");

    let (status, _) = send(&app, post_empty("tomas", &path("complete"))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, body) = send(&app, post_empty("olga", &path("complete"))).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    let done = json_body(&body);
    assert_eq!(done["booking"]["status"], "completed");
    assert_eq!(done["booking"]["payment_status"], "released");
    assert!(!done["release"].is_null());
    assert_eq!(balance(&app, "tomas").await, 5000);

    // Nothing left to release
    let (status, _) = send(&app, post_empty("olga", &path("release"))).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = send(&app, get("mallory", &path("transactions"))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, body) = send(&app, get("olga", &path("transactions"))).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    let types = json_body(&body)
        .as_array()
        .unwrap()
        .iter()
        .map(|tx| tx["tx_type"].as_str().unwrap().to_string())
        .collect::<Vec<_>>();
    assert!(types.contains(&"HOLD".to_string()), "{types:?}");
    assert!(types.contains(&"RELEASE".to_string()), "{types:?}");

    let (status, body) = send(&app, get("olga", &path("history"))).await;
    assert_eq!(status, StatusCode::OK);
    let statuses = json_body(&body)
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["to_status"].as_str().unwrap().to_string())
        .collect::<Vec<_>>();
    assert_eq!(statuses, vec!["new", "pending_acceptance", "pick_up", "on_the_way", "delivered", "completed"]);

    let (_, body) = send(&app, get("", "/internal/audit")).await;
    assert_eq!(json_body(&body)["consistent"], true, "{body}");
}

#[actix_web::test]
async fn underfunded_wallet() {
    let state = new_state(FakePaymentProvider::new(), test_config()).await;
    let app = test::init_service(App::new().configure(|cfg| state.configure(cfg))).await;
    fund_wallet(&app, "olga", 1000).await;
    let id = book(&app, "olga", "tomas", 4000).await;
    let (status, body) = send(&app, post_empty("olga", &format!("/api/bookings/{id}/fund"))).await;
    assert_eq!(status, StatusCode::PAYMENT_REQUIRED, "{body}");
    assert_eq!(balance(&app, "olga").await, 1000);
    let (_, body) = send(&app, get("olga", &format!("/api/bookings/{id}"))).await;
    assert_eq!(json_body(&body)["booking"]["status"], "new");
}

#[actix_web::test]
async fn checkout_then_cancel() {
    let provider = FakePaymentProvider::new();
    let state = new_state(provider.clone(), test_config()).await;
    let app = test::init_service(App::new().configure(|cfg| state.configure(cfg))).await;
    let id = book(&app, "olga", "tomas", 3000).await;
    let path = |action: &str| format!("/api/bookings/{id}/{action}");

    let (status, body) = send(&app, post_empty("olga", &path("checkout"))).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    let checkout = json_body(&body);
    let intent_id = checkout["payment_intent_id"].as_str().unwrap().to_string();
    assert_eq!(checkout["amount"], 3000);
    assert_eq!(checkout["booking"]["payment_intent_id"], intent_id.as_str());
    assert_eq!(checkout["client_secret"], format!("{intent_id}_secret"));

    // The payer has not finished with the provider yet
    let (status, body) = send(&app, post_empty("olga", &path("confirm_payment"))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST, "{body}");

    provider.settle_charge(&intent_id, ChargeStatus::Succeeded).unwrap();
    let (status, body) = send(&app, post_empty("olga", &path("confirm_payment"))).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(json_body(&body)["Funded"]["booking"]["status"], "pending_acceptance");

    // The provider's own notification arrives afterwards and changes nothing
    let metadata = json!({ "purpose": "booking", "booking_id": id.to_string() });
    let payload = payment_intent_event("evt_200", "payment_intent.succeeded", &intent_id, 3000, metadata);
    let (status, body) = send(&app, signed_webhook(&payload).to_request()).await;
    assert_eq!(status, StatusCode::OK);
    let res = json_body(&body);
    assert_eq!(res["success"], true);
    assert_eq!(res["message"], "Event evt_200 was already processed.");

    let (status, body) = send(&app, post("olga", &path("cancel"), json!({ "reason": "Plans changed" }))).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    let cancelled = json_body(&body);
    assert_eq!(cancelled["booking"]["status"], "cancel");
    assert_eq!(cancelled["booking"]["cancelled_by_role"], "owner");
    assert_eq!(cancelled["booking"]["cancel_reason"], "Plans changed");
    assert_eq!(cancelled["refund"]["credit"]["amount"], 3000);
    assert_eq!(balance(&app, "olga").await, 3000);

    let (status, _) = send(&app, post_empty("tomas", &path("cancel"))).await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[actix_web::test]
async fn refused_and_expired_requests_are_refunded() {
    let mut config = test_config();
    config.announcement_window = Duration::hours(1);
    let state = new_state(FakePaymentProvider::new(), config).await;
    let app = test::init_service(App::new().configure(|cfg| state.configure(cfg))).await;
    fund_wallet(&app, "olga", 2000).await;
    let id = book(&app, "olga", "tomas", 2000).await;
    send(&app, post_empty("olga", &format!("/api/bookings/{id}/fund"))).await;

    // Not stale yet
    let (status, body) = send(&app, post_empty("", "/internal/sweep")).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(json_body(&body)["declined"].as_array().unwrap().len(), 0);

    let (status, body) = send(&app, post_empty("tomas", &format!("/api/bookings/{id}/refuse"))).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    let resolved = json_body(&body);
    assert_eq!(resolved["booking"]["status"], "declined");
    assert_eq!(resolved["announcement"]["resolution"], "refused");
    assert_eq!(balance(&app, "olga").await, 2000);

    // A window that has already closed for every open request
    let mut config = test_config();
    config.announcement_window = Duration::seconds(-60);
    let state = new_state(FakePaymentProvider::new(), config).await;
    let app = test::init_service(App::new().configure(|cfg| state.configure(cfg))).await;
    fund_wallet(&app, "olga", 2000).await;
    let id = book(&app, "olga", "tomas", 2000).await;
    send(&app, post_empty("olga", &format!("/api/bookings/{id}/fund"))).await;
    let (status, body) = send(&app, post_empty("", "/internal/sweep")).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    let result = json_body(&body);
    assert_eq!(result["declined"][0]["booking"]["id"], id);
    assert_eq!(result["declined"][0]["booking"]["status"], "declined");
    assert_eq!(balance(&app, "olga").await, 2000);
    let (status, _) = send(&app, post_empty("tomas", &format!("/api/bookings/{id}/accept"))).await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[actix_web::test]
async fn problem_and_rejection_reports() {
    let state = new_state(FakePaymentProvider::new(), test_config()).await;
    let app = test::init_service(App::new().configure(|cfg| state.configure(cfg))).await;
    fund_wallet(&app, "olga", 3000).await;
    let first = book(&app, "olga", "tomas", 1500).await;
    let second = book(&app, "olga", "tomas", 1500).await;
    for id in [first, second] {
        send(&app, post_empty("olga", &format!("/api/bookings/{id}/fund"))).await;
        send(&app, post_empty("tomas", &format!("/api/bookings/{id}/accept"))).await;
        let (status, body) = send(&app, post("tomas", &format!("/api/bookings/{id}/pick_up"), pick_up_proof())).await;
        assert_eq!(status, StatusCode::OK, "{body}");
    }

    let path = format!("/api/bookings/{first}/problem");
    let (status, _) = send(&app, post("tomas", &path, json!({ "reason": " " }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, body) =
        send(&app, post("tomas", &format!("/api/bookings/{first}/problem"), json!({ "reason": "Box is wet" }))).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    let booking = json_body(&body);
    assert_eq!(booking["status"], "problem_with_the_package");
    assert_eq!(booking["problem_reason"], "Box is wet");

    send(&app, post("tomas", &format!("/api/bookings/{second}/drop_off"), drop_off_proof())).await;
    let (status, body) =
        send(&app, post("olga", &format!("/api/bookings/{second}/reject"), json!({ "reason": "Wrong parcel" }))).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(json_body(&body)["status"], "rejected");
    // A rejected delivery can be dropped off again
    let (status, body) = send(&app, post("tomas", &format!("/api/bookings/{second}/drop_off"), drop_off_proof())).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(json_body(&body)["status"], "delivered");

    let (status, body) = send(&app, get("olga", "/api/bookings")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json_body(&body).as_array().unwrap().len(), 2);
}
