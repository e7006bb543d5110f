use std::str::FromStr;

use chrono::Utc;
use cucumber::{then, when};
use escrow_engine::{
    booking_objects::{DropOffProof, PickUpProof},
    db_types::{Amount, BookingStatus, TransactionType, UserId},
    traits::{Actor, ChargePurpose, ChargeStatus, FundingSource},
    AnnouncementManagement,
    LedgerManagement,
    PaymentEvent,
    PaymentEventKind,
};

use crate::cucumber::EscrowWorld;

fn remember<T, E: std::fmt::Display>(world: &mut EscrowWorld, result: Result<T, E>) {
    world.system_mut().last_error = result.err().map(|e| e.to_string());
}

#[when(expr = "booking {word} is funded from the owner's wallet")]
async fn fund_from_wallet(world: &mut EscrowWorld, name: String) {
    let sys = world.system();
    let id = sys.booking_id(&name);
    let result = sys.bookings.fund(id, FundingSource::Wallet).await;
    remember(world, result);
}

#[when(expr = "the owner pays for booking {word} by card")]
async fn pay_by_card(world: &mut EscrowWorld, name: String) {
    let sys = world.system();
    let booking = sys.booking(&name).await;
    let (_, charge) = sys.bookings.checkout(&booking.owner_id, booking.id).await.expect("Error starting checkout");
    sys.provider.settle_charge(&charge.id, ChargeStatus::Succeeded).expect("Charge does not exist");
}

#[when(expr = "the provider reports the card payment for booking {word} as event {word}")]
async fn charge_succeeded(world: &mut EscrowWorld, name: String, event_id: String) {
    let sys = world.system();
    let booking = sys.booking(&name).await;
    let charge_id = booking.payment_intent_id.clone().expect("No checkout was started");
    let event = PaymentEvent {
        event_id,
        kind: PaymentEventKind::ChargeSucceeded {
            charge_id,
            amount: booking.amount,
            purpose: Some(ChargePurpose::Booking { booking_id: booking.id }),
        },
    };
    let result = sys.reconciliation.process_event(event).await;
    remember(world, result);
}

#[when(expr = "the traveler accepts booking {word}")]
async fn accept(world: &mut EscrowWorld, name: String) {
    let sys = world.system();
    let booking = sys.booking(&name).await;
    let result = sys.announcements.accept(&booking.traveler_id, booking.id).await;
    remember(world, result);
}

#[when(expr = "the traveler refuses booking {word}")]
async fn refuse(world: &mut EscrowWorld, name: String) {
    let sys = world.system();
    let booking = sys.booking(&name).await;
    let result = sys.announcements.refuse(&booking.traveler_id, booking.id).await;
    remember(world, result);
}

#[when(expr = "{int} hours pass and the expiry sweep runs")]
async fn sweep(world: &mut EscrowWorld, hours: i64) {
    let sys = world.system();
    let now = Utc::now() + chrono::Duration::hours(hours);
    let result = sys.announcements.expire_stale(now).await;
    remember(world, result);
}

#[when(expr = "the traveler picks up and delivers booking {word}")]
async fn deliver(world: &mut EscrowWorld, name: String) {
    let sys = world.system();
    let booking = sys.booking(&name).await;
    let traveler = booking.traveler_id.clone();
    let pick_up = PickUpProof {
        photo: format!("{name}-pickup.jpg"),
        sender_signature: format!("{name}-sender.png"),
        traveler_signature: format!("{name}-traveler.png"),
    };
    sys.bookings.confirm_pick_up(&traveler, booking.id, pick_up).await.expect("Error confirming pick-up");
    let drop_off = DropOffProof {
        photo: format!("{name}-dropoff.jpg"),
        receiver_signature: format!("{name}-receiver.png"),
        traveler_signature: format!("{name}-traveler.png"),
    };
    sys.bookings.confirm_drop_off(&traveler, booking.id, drop_off).await.expect("Error confirming drop-off");
}

#[when(expr = "the owner completes booking {word}")]
async fn complete(world: &mut EscrowWorld, name: String) {
    let sys = world.system();
    let booking = sys.booking(&name).await;
    let result = sys.bookings.complete(&booking.owner_id, booking.id).await;
    remember(world, result);
}

#[when(expr = "the funds for booking {word} are released")]
async fn release(world: &mut EscrowWorld, name: String) {
    let sys = world.system();
    let id = sys.booking_id(&name);
    let result = sys.bookings.release_funds(&Actor::system(), id).await;
    remember(world, result);
}

#[then(expr = "'{word}' has a balance of {int}")]
async fn check_balance(world: &mut EscrowWorld, user: String, amount: i64) {
    let sys = world.system();
    let wallet = sys.wallets.wallet_for_user(&UserId::new(user.as_str())).await.expect("Error fetching wallet");
    assert_eq!(wallet.balance, Amount::from(amount), "Balance of {user} is incorrect");
}

#[then(expr = "the escrow wallet holds {int}")]
async fn check_escrow(world: &mut EscrowWorld, amount: i64) {
    let sys = world.system();
    let escrow = sys.db.fetch_wallet(sys.escrow.id()).await.expect("Error fetching escrow").expect("No escrow wallet");
    assert_eq!(escrow.balance, Amount::from(amount), "Escrow balance is incorrect");
}

#[then(expr = "booking {word} is {word}")]
async fn check_status(world: &mut EscrowWorld, name: String, status: String) {
    let expected = BookingStatus::from_str(&status).expect("Not a booking status");
    let booking = world.system().booking(&name).await;
    assert_eq!(booking.status, expected, "Booking {name} is in the wrong state");
}

#[then("the last operation succeeded")]
async fn check_success(world: &mut EscrowWorld) {
    if let Some(e) = &world.system().last_error {
        panic!("Expected success, but got: {e}");
    }
}

#[then(expr = "the last operation failed with {string}")]
async fn check_failure(world: &mut EscrowWorld, message: String) {
    let err = world.system().last_error.clone().expect("The last operation succeeded");
    assert!(err.contains(&message), "Expected an error containing '{message}', got '{err}'");
}

#[then(expr = "booking {word} has {int} announcement request(s)")]
async fn check_announcement(world: &mut EscrowWorld, name: String, count: usize) {
    let sys = world.system();
    let found = sys.db.fetch_announcement(sys.booking_id(&name)).await.expect("Error fetching announcement");
    assert_eq!(found.into_iter().count(), count);
}

#[then(expr = "no transactions are recorded for booking {word}")]
async fn check_no_transactions(world: &mut EscrowWorld, name: String) {
    let sys = world.system();
    let log = sys.wallets.transactions_for_booking(sys.booking_id(&name)).await.expect("Error fetching log");
    assert!(log.is_empty(), "Unexpected transactions: {log:?}");
}

#[then(expr = "the log for booking {word} shows a RELEASE paired with a DEPOSIT to '{word}'")]
async fn check_release_pair(world: &mut EscrowWorld, name: String, payee: String) {
    let sys = world.system();
    let id = sys.booking_id(&name);
    let log = sys.wallets.transactions_for_booking(id).await.expect("Error fetching log");
    let release = log.iter().find(|t| t.tx_type == TransactionType::Release).expect("No RELEASE recorded");
    let deposit = log
        .iter()
        .find(|t| t.tx_type == TransactionType::Deposit && t.related_tx_id == Some(release.id))
        .expect("No DEPOSIT paired with the RELEASE");
    let payee = sys.wallets.wallet_for_user(&UserId::new(payee)).await.expect("Error fetching wallet");
    assert_eq!(deposit.wallet_id, payee.id);
    assert_eq!(deposit.booking_id, Some(id));
    assert_eq!(release.amount, -deposit.amount);
}

#[then("the ledger is consistent")]
async fn check_audit(world: &mut EscrowWorld) {
    let audit = world.system().wallets.audit().await.expect("Error auditing ledger");
    assert!(audit.is_consistent(), "{audit:?}");
}
