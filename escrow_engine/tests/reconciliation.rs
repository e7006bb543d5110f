use escrow_engine::{
    db_types::{Amount, BookingStatus, UserId},
    traits::{ChargePurpose, ClassifiedError, ErrorKind},
    AnnouncementManagement,
    PaymentEvent,
    PaymentEventKind,
    ProcessedEventLog,
    ReconciliationError,
    ReconciliationOutcome,
};

mod support;

use support::TestSystem;

fn event(id: &str, kind: PaymentEventKind) -> PaymentEvent {
    PaymentEvent { event_id: id.to_string(), kind }
}

#[tokio::test]
async fn a_replayed_booking_charge_funds_once() {
    let sys = TestSystem::new().await;
    let booking = sys.book("owner", "traveler", 3_000).await;
    let (_, charge) = sys.bookings.checkout(&UserId::new("owner"), booking.id).await.unwrap();
    let succeeded = PaymentEventKind::ChargeSucceeded {
        charge_id: charge.id.clone(),
        amount: Amount::from(3_000),
        purpose: Some(ChargePurpose::Booking { booking_id: booking.id }),
    };

    let outcome = sys.reconciliation.process_event(event("evt_1", succeeded.clone())).await.unwrap();
    assert!(matches!(outcome, ReconciliationOutcome::Applied(_)), "{outcome:?}");
    let outcome = sys.reconciliation.process_event(event("evt_1", succeeded.clone())).await.unwrap();
    assert_eq!(outcome, ReconciliationOutcome::Duplicate);
    // The provider may also send the same charge under a new event id
    let outcome = sys.reconciliation.process_event(event("evt_2", succeeded)).await.unwrap();
    assert_eq!(outcome, ReconciliationOutcome::Duplicate);

    let (b, _) = sys.bookings.booking_for(&UserId::new("owner"), booking.id).await.unwrap();
    assert_eq!(b.status, BookingStatus::PendingAcceptance);
    assert!(sys.db.fetch_announcement(booking.id).await.unwrap().is_some());
    assert_eq!(sys.balance("owner").await, Amount::ZERO);
    assert_eq!(sys.escrow_balance().await, Amount::from(3_000));
    let logged = sys.db.fetch_processed_event("evt_1").await.unwrap().unwrap();
    assert_eq!(logged.event_type, "charge.succeeded");
    assert!(logged.outcome.starts_with("applied"));
}

#[tokio::test]
async fn a_charge_without_metadata_is_matched_by_intent_id() {
    let sys = TestSystem::new().await;
    let booking = sys.book("owner", "traveler", 1_200).await;
    let (_, charge) = sys.bookings.checkout(&UserId::new("owner"), booking.id).await.unwrap();
    let kind = PaymentEventKind::ChargeSucceeded { charge_id: charge.id, amount: Amount::from(1_200), purpose: None };
    let outcome = sys.reconciliation.process_event(event("evt_3", kind)).await.unwrap();
    assert!(matches!(outcome, ReconciliationOutcome::Applied(_)), "{outcome:?}");

    let stranger =
        PaymentEventKind::ChargeSucceeded { charge_id: "pi_unknown".into(), amount: Amount::from(100), purpose: None };
    let outcome = sys.reconciliation.process_event(event("evt_4", stranger)).await.unwrap();
    assert!(matches!(outcome, ReconciliationOutcome::Ignored(_)), "{outcome:?}");
}

#[tokio::test]
async fn deposits_are_confirmed_and_failed_through_events() {
    let sys = TestSystem::new().await;
    let user = UserId::new("carol");
    let first = sys.wallets.deposit(&user, Amount::from(1_000)).await.unwrap();
    let second = sys.wallets.deposit(&user, Amount::from(2_000)).await.unwrap();

    let ok = PaymentEventKind::ChargeSucceeded {
        charge_id: first.payment_intent_id.clone(),
        amount: Amount::from(1_000),
        purpose: Some(ChargePurpose::WalletDeposit { tx_id: first.transaction.id }),
    };
    let failed = PaymentEventKind::ChargeFailed {
        charge_id: second.payment_intent_id.clone(),
        purpose: Some(ChargePurpose::WalletDeposit { tx_id: second.transaction.id }),
        reason: "card_declined".into(),
    };
    sys.reconciliation.process_event(event("evt_10", ok.clone())).await.unwrap();
    sys.reconciliation.process_event(event("evt_11", failed)).await.unwrap();
    let outcome = sys.reconciliation.process_event(event("evt_12", ok)).await.unwrap();
    assert_eq!(outcome, ReconciliationOutcome::Duplicate);
    assert_eq!(sys.balance("carol").await, Amount::from(1_000));
}

#[tokio::test]
async fn an_early_payout_event_asks_for_redelivery() {
    let sys = TestSystem::new().await;
    let kind = PaymentEventKind::PayoutPaid { payout_id: "po_missing".into() };
    let err = sys.reconciliation.process_event(event("evt_20", kind.clone())).await.unwrap_err();
    assert!(matches!(err, ReconciliationError::NotYetKnown { .. }), "{err}");
    assert_eq!(err.kind(), ErrorKind::ConcurrencyConflict);
    // Not recorded, so the redelivery is processed
    assert!(sys.db.fetch_processed_event("evt_20").await.unwrap().is_none());
}

#[tokio::test]
async fn a_failed_payout_is_credited_back_once() {
    let sys = TestSystem::new().await;
    let user = UserId::new("erin");
    sys.fund_wallet("erin", 3_000).await;
    let record = sys.wallets.withdraw(&user, Amount::from(3_000), "acct_erin").await.unwrap();
    let payout_id = record.provider_ref.unwrap();

    let failed = PaymentEventKind::PayoutFailed { payout_id: payout_id.clone(), reason: "account_closed".into() };
    let outcome = sys.reconciliation.process_event(event("evt_30", failed.clone())).await.unwrap();
    assert!(matches!(outcome, ReconciliationOutcome::Applied(_)), "{outcome:?}");
    assert_eq!(sys.balance("erin").await, Amount::from(3_000));
    let outcome = sys.reconciliation.process_event(event("evt_31", failed)).await.unwrap();
    assert_eq!(outcome, ReconciliationOutcome::Duplicate);
    assert_eq!(sys.balance("erin").await, Amount::from(3_000));

    let paid = PaymentEventKind::PayoutPaid { payout_id };
    let outcome = sys.reconciliation.process_event(event("evt_32", paid)).await.unwrap();
    assert!(matches!(outcome, ReconciliationOutcome::Ignored(_)), "{outcome:?}");
    assert!(sys.wallets.audit().await.unwrap().is_consistent());
}

#[tokio::test]
async fn malformed_events_are_recorded_as_rejected() {
    let sys = TestSystem::new().await;
    let kind = PaymentEventKind::ChargeSucceeded { charge_id: "pi_x".into(), amount: Amount::ZERO, purpose: None };
    let err = sys.reconciliation.process_event(event("evt_40", kind.clone())).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    let logged = sys.db.fetch_processed_event("evt_40").await.unwrap().unwrap();
    assert!(logged.outcome.starts_with("rejected"));
    let outcome = sys.reconciliation.process_event(event("evt_40", kind)).await.unwrap();
    assert_eq!(outcome, ReconciliationOutcome::Duplicate);

    let info = PaymentEventKind::Informational { event_type: "customer.created".into() };
    let outcome = sys.reconciliation.process_event(event("evt_41", info)).await.unwrap();
    assert!(matches!(outcome, ReconciliationOutcome::Ignored(_)));
}
