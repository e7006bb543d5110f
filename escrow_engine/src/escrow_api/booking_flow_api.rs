use std::fmt::Debug;

use log::*;

use crate::{
    db_types::{
        ActorRole,
        Amount,
        Booking,
        BookingEvent,
        BookingId,
        BookingStatus,
        EscrowWallet,
        NewBooking,
        PaymentStatus,
        Report,
        UserId,
    },
    escrow_api::{
        booking_objects::{
            CancelRequest,
            ConditionsUnmetReport,
            DropOffProof,
            NewBookingRequest,
            PickUpProof,
            ProblemReport,
            RejectRequest,
        },
        state_machine::{next_status, BookingAction, TransitionError},
    },
    events::{BookingFundedEvent, BookingStatusChangedEvent, EventProducers, NotificationEvent},
    helpers::{retry_on_conflict, RetryPolicy},
    traits::{
        Actor,
        BookingError,
        CancelledBooking,
        ChargePurpose,
        ChargeRequest,
        ChargeStatus,
        EscrowDatabase,
        FundingOutcome,
        FundingSource,
        PaymentProvider,
        ProviderCharge,
        TransferReceipt,
        TransitionUpdate,
    },
};

impl From<TransitionError> for BookingError {
    fn from(e: TransitionError) -> Self {
        match e {
            TransitionError::NotPermitted { action, role } => BookingError::NotPermitted { action, role },
            TransitionError::InvalidTransition { action, status } => BookingError::InvalidTransition { action, status },
        }
    }
}

/// `BookingFlowApi` drives a booking through its lifecycle on behalf of its participants.
///
/// Every transition follows the same steps: load the booking, work out the caller's role in it, ask the state machine
/// for the next status, and apply it with a compare-and-set against the status that was validated. If someone else
/// moved the booking in between, the whole sequence is retried from the top.
#[derive(Clone)]
pub struct BookingFlowApi<B, P> {
    db: B,
    provider: P,
    escrow: EscrowWallet,
    producers: EventProducers,
    retry: RetryPolicy,
}

impl<B, P> Debug for BookingFlowApi<B, P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "BookingFlowApi")
    }
}

impl<B, P> BookingFlowApi<B, P> {
    pub fn new(db: B, provider: P, escrow: EscrowWallet, producers: EventProducers) -> Self {
        Self { db, provider, escrow, producers, retry: RetryPolicy::default() }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn escrow(&self) -> &EscrowWallet {
        &self.escrow
    }
}

impl<B, P> BookingFlowApi<B, P>
where
    B: EscrowDatabase,
    P: PaymentProvider,
{
    pub async fn create_booking(&self, owner: &UserId, request: NewBookingRequest) -> Result<Booking, BookingError> {
        let new_booking = NewBooking {
            travel_id: request.travel_id,
            package_id: request.package_id,
            owner_id: owner.clone(),
            amount: request.amount,
            currency: self.escrow.currency().to_string(),
        };
        let booking =
            retry_on_conflict(self.retry, "create booking", || self.db.insert_booking(new_booking.clone())).await?;
        info!("📦️ {owner} booked package {} on travel {} (#{})", booking.package_id, booking.travel_id, booking.id);
        Ok(booking)
    }

    /// Fetches a booking the user takes part in, together with their role in it.
    pub async fn booking_for(&self, user: &UserId, id: BookingId) -> Result<(Booking, ActorRole), BookingError> {
        let booking = self.db.fetch_booking(id).await?.ok_or(BookingError::BookingNotFound(id))?;
        let role = booking
            .role_of(user)
            .ok_or_else(|| BookingError::NotAParticipant { booking: id, actor: user.clone() })?;
        Ok((booking, role))
    }

    pub async fn bookings_for_user(&self, user: &UserId) -> Result<Vec<Booking>, BookingError> {
        self.db.fetch_bookings_for_user(user).await
    }

    pub async fn history(&self, user: &UserId, id: BookingId) -> Result<Vec<BookingEvent>, BookingError> {
        self.booking_for(user, id).await?;
        self.db.fetch_booking_history(id).await
    }

    pub async fn reports(&self, user: &UserId, id: BookingId) -> Result<Vec<Report>, BookingError> {
        self.booking_for(user, id).await?;
        self.db.fetch_reports(id).await
    }

    //------------------------------------------   Funding   ------------------------------------------------------
    /// Starts paying for a booking with the provider. The returned charge carries the client secret the payer needs to
    /// complete the payment. Asking again returns the same charge, unless that charge has failed, in which case a fresh
    /// one is created.
    pub async fn checkout(&self, owner: &UserId, id: BookingId) -> Result<(Booking, ProviderCharge), BookingError> {
        let (booking, role) = self.booking_for(owner, id).await?;
        if role != ActorRole::Owner {
            return Err(BookingError::NotPermitted { action: BookingAction::Fund, role });
        }
        next_status(booking.status, BookingAction::Fund, ActorRole::System)?;
        if booking.paid {
            return Err(BookingError::PaymentMismatch { booking: id, reason: "The booking is already paid".into() });
        }
        let request = ChargeRequest {
            amount: booking.amount,
            currency: booking.currency.clone(),
            purpose: ChargePurpose::Booking { booking_id: id },
            customer: owner.clone(),
            idempotency_key: checkout_key(&booking),
        };
        let charge =
            self.provider.create_charge(request).await.map_err(|e| BookingError::ProviderError(e.to_string()))?;
        let booking =
            retry_on_conflict(self.retry, "attach payment intent", || self.db.attach_payment_intent(id, &charge.id))
                .await?;
        debug!("📦️ Checkout for booking #{id} started with charge {}", charge.id);
        Ok((booking, charge))
    }

    /// Asks the provider about the booking's charge and, if it has succeeded, funds the booking. This is the same entry
    /// point the webhook uses, so whichever arrives second is a no-op.
    pub async fn confirm_checkout(&self, owner: &UserId, id: BookingId) -> Result<FundingOutcome, BookingError> {
        let (booking, role) = self.booking_for(owner, id).await?;
        if role != ActorRole::Owner {
            return Err(BookingError::NotPermitted { action: BookingAction::Fund, role });
        }
        let intent_id = booking.payment_intent_id.clone().ok_or_else(|| BookingError::PaymentMismatch {
            booking: id,
            reason: "No checkout has been started for this booking".into(),
        })?;
        let charge =
            self.provider.retrieve_charge(&intent_id).await.map_err(|e| BookingError::ProviderError(e.to_string()))?;
        match charge.status {
            ChargeStatus::Succeeded => {
                let source = FundingSource::ProviderCharge { payment_intent_id: charge.id, amount: charge.amount };
                self.fund(id, source).await
            },
            ChargeStatus::Failed | ChargeStatus::Canceled => {
                let reason = charge.failure_reason.unwrap_or_else(|| format!("The charge is {}", charge.status));
                self.mark_payment_failed(id, &reason).await?;
                Err(BookingError::ProviderError(reason))
            },
            ChargeStatus::Pending => Err(BookingError::PaymentMismatch {
                booking: id,
                reason: "The payment has not been completed yet".into(),
            }),
        }
    }

    /// Pays for the booking from the owner's wallet balance.
    pub async fn fund_from_wallet(&self, owner: &UserId, id: BookingId) -> Result<FundingOutcome, BookingError> {
        let (_, role) = self.booking_for(owner, id).await?;
        if role != ActorRole::Owner {
            return Err(BookingError::NotPermitted { action: BookingAction::Fund, role });
        }
        self.fund(id, FundingSource::Wallet).await
    }

    /// The single funding entry point. Idempotent: funding a paid booking reports [`FundingOutcome::AlreadyFunded`].
    pub async fn fund(&self, id: BookingId, source: FundingSource) -> Result<FundingOutcome, BookingError> {
        let outcome = retry_on_conflict(self.retry, "fund booking", || {
            self.db.fund_booking(&self.escrow, id, source.clone())
        })
        .await?;
        if let FundingOutcome::Funded(funded) = &outcome {
            let booking = &funded.booking;
            self.producers
                .publish_booking_funded(BookingFundedEvent {
                    booking: booking.clone(),
                    announcement: funded.announcement.clone(),
                })
                .await;
            self.producers
                .publish_status_changed(BookingStatusChangedEvent::new(
                    booking.clone(),
                    BookingStatus::New,
                    Actor::system(),
                ))
                .await;
            self.notify(booking.owner_id.clone(), id, format!("Your payment for booking #{id} has been received"))
                .await;
            self.notify(booking.traveler_id.clone(), id, format!("You have a new booking request (#{id})")).await;
        }
        Ok(outcome)
    }

    pub async fn mark_payment_failed(&self, id: BookingId, reason: &str) -> Result<Booking, BookingError> {
        retry_on_conflict(self.retry, "mark payment failed", || self.db.mark_payment_failed(id, reason)).await
    }

    //------------------------------------------   Delivery   -----------------------------------------------------
    pub async fn confirm_pick_up(
        &self,
        user: &UserId,
        id: BookingId,
        proof: PickUpProof,
    ) -> Result<Booking, BookingError> {
        let update = proof.validate()?;
        self.transition(user, id, BookingAction::ConfirmPickUp, update).await
    }

    pub async fn report_problem(
        &self,
        user: &UserId,
        id: BookingId,
        report: ProblemReport,
    ) -> Result<Booking, BookingError> {
        let update = report.validate()?;
        self.transition(user, id, BookingAction::ReportProblem, update).await
    }

    pub async fn report_conditions_unmet(
        &self,
        user: &UserId,
        id: BookingId,
        report: ConditionsUnmetReport,
    ) -> Result<Booking, BookingError> {
        let update = report.validate()?;
        self.transition(user, id, BookingAction::ReportConditionsUnmet, update).await
    }

    pub async fn confirm_drop_off(
        &self,
        user: &UserId,
        id: BookingId,
        proof: DropOffProof,
    ) -> Result<Booking, BookingError> {
        let update = proof.validate()?;
        self.transition(user, id, BookingAction::ConfirmDropOff, update).await
    }

    /// The owner confirms the delivery. The held funds stay in escrow until [`Self::release_funds`] is called.
    pub async fn complete(&self, user: &UserId, id: BookingId) -> Result<Booking, BookingError> {
        self.transition(user, id, BookingAction::Complete, TransitionUpdate::Complete).await
    }

    pub async fn reject(&self, user: &UserId, id: BookingId, request: RejectRequest) -> Result<Booking, BookingError> {
        let update = request.validate()?;
        self.transition(user, id, BookingAction::Reject, update).await
    }

    async fn transition(
        &self,
        user: &UserId,
        id: BookingId,
        action: BookingAction,
        update: TransitionUpdate,
    ) -> Result<Booking, BookingError> {
        let (booking, from, actor) = retry_on_conflict(self.retry, "booking transition", || {
            self.try_transition(user, id, action, update.clone())
        })
        .await?;
        let counterparty = match actor.role {
            ActorRole::Owner => booking.traveler_id.clone(),
            _ => booking.owner_id.clone(),
        };
        let message = format!("Booking #{id} is now {}", booking.status);
        self.producers.publish_status_changed(BookingStatusChangedEvent::new(booking.clone(), from, actor)).await;
        self.notify(counterparty, id, message).await;
        Ok(booking)
    }

    async fn try_transition(
        &self,
        user: &UserId,
        id: BookingId,
        action: BookingAction,
        update: TransitionUpdate,
    ) -> Result<(Booking, BookingStatus, Actor), BookingError> {
        let (booking, role) = self.booking_for(user, id).await?;
        let to = next_status(booking.status, action, role)?;
        let actor = Actor::new(user.clone(), role);
        let updated = self.db.apply_transition(id, booking.status, to, &actor, update).await?;
        Ok((updated, booking.status, actor))
    }

    /// Either participant may cancel a booking that has not reached a terminal state. Anything still held in escrow
    /// goes back to the owner.
    pub async fn cancel(
        &self,
        user: &UserId,
        id: BookingId,
        request: CancelRequest,
    ) -> Result<CancelledBooking, BookingError> {
        let reason = request.reason();
        let (cancelled, from, actor) =
            retry_on_conflict(self.retry, "cancel booking", || self.try_cancel(user, id, reason.clone())).await?;
        let booking = &cancelled.booking;
        let counterparty = match actor.role {
            ActorRole::Owner => booking.traveler_id.clone(),
            _ => booking.owner_id.clone(),
        };
        self.producers.publish_status_changed(BookingStatusChangedEvent::new(booking.clone(), from, actor)).await;
        self.notify(counterparty, id, format!("Booking #{id} has been cancelled")).await;
        if let Some(refund) = &cancelled.refund {
            self.notify(booking.owner_id.clone(), id, format!("{} has been refunded to your wallet", refund.amount()))
                .await;
        }
        Ok(cancelled)
    }

    async fn try_cancel(
        &self,
        user: &UserId,
        id: BookingId,
        reason: Option<String>,
    ) -> Result<(CancelledBooking, BookingStatus, Actor), BookingError> {
        let (booking, role) = self.booking_for(user, id).await?;
        next_status(booking.status, BookingAction::Cancel, role)?;
        let actor = Actor::new(user.clone(), role);
        let cancelled = self.db.cancel_booking(&self.escrow, id, booking.status, &actor, reason).await?;
        Ok((cancelled, booking.status, actor))
    }

    /// Pays the escrowed amount of a completed booking to the traveler. Only the owner (or the system) may do this.
    pub async fn release_funds(
        &self,
        actor: &Actor,
        id: BookingId,
    ) -> Result<(Booking, TransferReceipt), BookingError> {
        if actor.role != ActorRole::System {
            let not_permitted = BookingError::NotPermitted { action: BookingAction::Complete, role: actor.role };
            let user = actor.user_id.as_ref().ok_or(not_permitted)?;
            let (_, role) = self.booking_for(user, id).await?;
            if role != ActorRole::Owner {
                return Err(BookingError::NotPermitted { action: BookingAction::Complete, role });
            }
        }
        let (booking, receipt) =
            retry_on_conflict(self.retry, "release funds", || self.db.release_booking_funds(&self.escrow, id)).await?;
        let message = format!("{} for booking #{id} has been paid to your wallet", receipt.amount());
        self.notify(booking.traveler_id.clone(), id, message).await;
        Ok((booking, receipt))
    }

    /// The amount held in escrow for the booking, if any.
    pub async fn held_amount(&self, id: BookingId) -> Result<Amount, BookingError> {
        let hold = self.db.fetch_outstanding_hold(id).await?;
        Ok(hold.map(|h| h.amount).unwrap_or_default())
    }

    async fn notify(&self, recipient: UserId, booking: BookingId, message: String) {
        self.producers.publish_notification(NotificationEvent::new(recipient, booking, message)).await;
    }
}

/// The provider replays a charge for a repeated key, so the key is scoped to the attempt: a retry after a failed
/// payment must not get the failed intent back.
fn checkout_key(booking: &Booking) -> String {
    match (&booking.payment_intent_id, booking.payment_status) {
        (Some(failed), PaymentStatus::Failed) => format!("booking-{}-checkout-after-{failed}", booking.id),
        _ => format!("booking-{}-checkout", booking.id),
    }
}
