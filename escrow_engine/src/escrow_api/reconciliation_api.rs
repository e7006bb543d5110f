//! Translates provider notifications into ledger and booking operations.
//!
//! Providers deliver at least once and in no particular order. Every event goes through three steps:
//! 1. The processed-event log is checked. A known event id is a duplicate and nothing else happens.
//! 2. The event is dispatched to the idempotent entry point for its kind. Each of those is guarded by a uniqueness
//!    constraint or a status compare-and-set, so a concurrent duplicate that slips past step 1 still applies once.
//! 3. The outcome is recorded against the event id. Transient failures are not recorded, so that the provider's
//!    redelivery gets another go.
use std::fmt::{Debug, Display};

use log::*;
use serde::{Deserialize, Serialize};

use crate::{
    db_types::{Amount, BookingId, PaymentStatus},
    escrow_api::BookingFlowApi,
    events::{EventProducers, PayoutFailedEvent},
    helpers::{retry_on_conflict, RetryPolicy},
    traits::{
        ChargePurpose,
        ClassifiedError,
        EscrowDatabase,
        ErrorKind,
        FundingOutcome,
        FundingSource,
        LedgerError,
        PaymentProvider,
        ReconciliationError,
        SettlementOutcome,
    },
};

/// A provider notification, reduced to what the ledger cares about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentEvent {
    pub event_id: String,
    pub kind: PaymentEventKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentEventKind {
    ChargeSucceeded { charge_id: String, amount: Amount, purpose: Option<ChargePurpose> },
    ChargeFailed { charge_id: String, purpose: Option<ChargePurpose>, reason: String },
    PayoutPaid { payout_id: String },
    PayoutFailed { payout_id: String, reason: String },
    /// Anything else the provider tells us about. Recorded, never acted on.
    Informational { event_type: String },
}

impl PaymentEventKind {
    pub fn name(&self) -> &str {
        match self {
            Self::ChargeSucceeded { .. } => "charge.succeeded",
            Self::ChargeFailed { .. } => "charge.failed",
            Self::PayoutPaid { .. } => "payout.paid",
            Self::PayoutFailed { .. } => "payout.failed",
            Self::Informational { event_type } => event_type.as_str(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReconciliationOutcome {
    Applied(String),
    /// The event, or its effect, had already been applied.
    Duplicate,
    Ignored(String),
}

impl Display for ReconciliationOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Applied(s) => write!(f, "applied: {s}"),
            Self::Duplicate => write!(f, "duplicate"),
            Self::Ignored(s) => write!(f, "ignored: {s}"),
        }
    }
}

impl From<SettlementOutcome> for ReconciliationOutcome {
    fn from(outcome: SettlementOutcome) -> Self {
        match outcome {
            SettlementOutcome::Applied(tx) => Self::Applied(format!("{} #{} is {}", tx.tx_type, tx.id, tx.status)),
            SettlementOutcome::AlreadyApplied(_) => Self::Duplicate,
            SettlementOutcome::Ignored { reason, .. } => Self::Ignored(reason),
        }
    }
}

#[derive(Clone)]
pub struct ReconciliationApi<B, P> {
    db: B,
    bookings: BookingFlowApi<B, P>,
    producers: EventProducers,
    retry: RetryPolicy,
}

impl<B, P> Debug for ReconciliationApi<B, P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ReconciliationApi")
    }
}

impl<B, P> ReconciliationApi<B, P> {
    pub fn new(db: B, bookings: BookingFlowApi<B, P>, producers: EventProducers) -> Self {
        Self { db, bookings, producers, retry: RetryPolicy::default() }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

impl<B, P> ReconciliationApi<B, P>
where
    B: EscrowDatabase,
    P: PaymentProvider,
{
    pub async fn process_event(&self, event: PaymentEvent) -> Result<ReconciliationOutcome, ReconciliationError> {
        let event_id = event.event_id.as_str();
        let event_type = event.kind.name().to_string();
        if let Some(seen) = self.db.fetch_processed_event(event_id).await? {
            debug!(
                "🧾️ Event {event_id} ({event_type}) was already processed at {}: {}",
                seen.processed_at, seen.outcome
            );
            return Ok(ReconciliationOutcome::Duplicate);
        }
        match self.dispatch(&event).await {
            Ok(outcome) => {
                info!("🧾️ Event {event_id} ({event_type}) {outcome}");
                self.record(event_id, &event_type, &outcome.to_string()).await?;
                Ok(outcome)
            },
            Err(e) if e.kind() == ErrorKind::Validation => {
                warn!("🧾️ Event {event_id} ({event_type}) was rejected. {e}");
                self.record(event_id, &event_type, &format!("rejected: {e}")).await?;
                Err(e)
            },
            Err(e) => {
                warn!("🧾️ Event {event_id} ({event_type}) could not be processed and should be redelivered. {e}");
                Err(e)
            },
        }
    }

    async fn record(&self, event_id: &str, event_type: &str, outcome: &str) -> Result<(), ReconciliationError> {
        let fresh = retry_on_conflict(self.retry, "record processed event", || {
            self.db.record_processed_event(event_id, event_type, outcome)
        })
        .await?;
        if !fresh {
            debug!("🧾️ Event {event_id} was recorded by a concurrent delivery");
        }
        Ok(())
    }

    async fn dispatch(&self, event: &PaymentEvent) -> Result<ReconciliationOutcome, ReconciliationError> {
        let event_id = &event.event_id;
        match &event.kind {
            PaymentEventKind::ChargeSucceeded { charge_id, amount, purpose } => {
                if !amount.is_positive() {
                    return Err(ReconciliationError::MalformedEvent {
                        event_id: event_id.clone(),
                        reason: format!("The charge amount {amount} is not positive"),
                    });
                }
                match self.resolve_purpose(charge_id, *purpose).await? {
                    Some(ChargePurpose::WalletDeposit { tx_id }) => {
                        let outcome =
                            retry_on_conflict(self.retry, "confirm deposit", || self.db.confirm_deposit(tx_id)).await?;
                        Ok(outcome.into())
                    },
                    Some(ChargePurpose::Booking { booking_id }) => {
                        let source =
                            FundingSource::ProviderCharge { payment_intent_id: charge_id.clone(), amount: *amount };
                        let outcome = self.bookings.fund(booking_id, source).await?;
                        Ok(funding_outcome(outcome))
                    },
                    None => Ok(ReconciliationOutcome::Ignored(format!("Charge {charge_id} is not one of ours"))),
                }
            },
            PaymentEventKind::ChargeFailed { charge_id, purpose, reason } => {
                match self.resolve_purpose(charge_id, *purpose).await? {
                    Some(ChargePurpose::WalletDeposit { tx_id }) => {
                        let outcome =
                            retry_on_conflict(self.retry, "fail deposit", || self.db.fail_deposit(tx_id, reason))
                                .await?;
                        Ok(outcome.into())
                    },
                    Some(ChargePurpose::Booking { booking_id }) => self.booking_charge_failed(booking_id, reason).await,
                    None => Ok(ReconciliationOutcome::Ignored(format!("Charge {charge_id} is not one of ours"))),
                }
            },
            PaymentEventKind::PayoutPaid { payout_id } => {
                let outcome = retry_on_conflict(self.retry, "mark payout paid", || self.db.mark_payout_paid(payout_id))
                    .await
                    .map_err(|e| not_yet_known(event_id, e))?;
                Ok(outcome.into())
            },
            PaymentEventKind::PayoutFailed { payout_id, reason } => {
                let outcome = retry_on_conflict(self.retry, "compensate payout", || {
                    self.db.compensate_failed_payout(payout_id, reason)
                })
                .await
                .map_err(|e| not_yet_known(event_id, e))?;
                if let SettlementOutcome::Applied(refund) = &outcome {
                    warn!(
                        "🧾️ Payout {payout_id} failed ({reason}). {} has been credited back to wallet #{}",
                        refund.amount, refund.wallet_id
                    );
                    self.producers
                        .publish_payout_failed(PayoutFailedEvent { refund: refund.clone(), reason: reason.clone() })
                        .await;
                }
                Ok(outcome.into())
            },
            PaymentEventKind::Informational { event_type } => {
                trace!("🧾️ Nothing to do for {event_type} event {event_id}");
                Ok(ReconciliationOutcome::Ignored(format!("{event_type} events are not acted on")))
            },
        }
    }

    /// Charges created by this service carry their purpose in their metadata. A charge without one may still be a
    /// booking checkout, which is recorded against the booking by its intent id.
    async fn resolve_purpose(
        &self,
        charge_id: &str,
        purpose: Option<ChargePurpose>,
    ) -> Result<Option<ChargePurpose>, ReconciliationError> {
        if purpose.is_some() {
            return Ok(purpose);
        }
        let booking = self.db.fetch_booking_by_payment_intent(charge_id).await?;
        Ok(booking.map(|b| ChargePurpose::Booking { booking_id: b.id }))
    }

    async fn booking_charge_failed(
        &self,
        booking_id: BookingId,
        reason: &str,
    ) -> Result<ReconciliationOutcome, ReconciliationError> {
        let booking = self.bookings.mark_payment_failed(booking_id, reason).await?;
        if booking.payment_status == PaymentStatus::Failed {
            Ok(ReconciliationOutcome::Applied(format!("payment for booking #{booking_id} failed")))
        } else {
            Ok(ReconciliationOutcome::Ignored(format!("booking #{booking_id} is already {}", booking.payment_status)))
        }
    }
}

fn funding_outcome(outcome: FundingOutcome) -> ReconciliationOutcome {
    match outcome {
        FundingOutcome::Funded(funded) => {
            ReconciliationOutcome::Applied(format!("booking #{} is {}", funded.booking.id, funded.booking.status))
        },
        FundingOutcome::AlreadyFunded(_) => ReconciliationOutcome::Duplicate,
        FundingOutcome::Underfunded { booking, credited } => ReconciliationOutcome::Ignored(format!(
            "{credited} was credited to the payer's wallet, but booking #{} costs {}",
            booking.id, booking.amount
        )),
        FundingOutcome::NotFundable { booking, credited } => ReconciliationOutcome::Ignored(format!(
            "{credited} was credited to the payer's wallet, but booking #{} is {}",
            booking.id, booking.status
        )),
    }
}

/// A payout notification can overtake the commit of the withdrawal it refers to.
fn not_yet_known(event_id: &str, e: LedgerError) -> ReconciliationError {
    match e {
        LedgerError::UnknownProviderRef { reference, .. } => {
            ReconciliationError::NotYetKnown { event_id: event_id.to_string(), reference }
        },
        e => e.into(),
    }
}
