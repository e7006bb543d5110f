use std::fmt::Debug;

use chrono::{DateTime, Duration, Utc};
use log::*;

use crate::{
    db_types::{ActorRole, AnnouncementRequest, BookingId, BookingStatus, EscrowWallet, UserId},
    escrow_api::state_machine::BookingAction,
    events::{
        BookingStatusChangedEvent,
        ConversationStatus,
        ConversationStatusEvent,
        EventProducers,
        NotificationEvent,
    },
    helpers::{retry_on_conflict, Clock, RetryPolicy},
    traits::{Actor, AnnouncementDecision, BookingError, EscrowDatabase, ExpiryResult, ResolvedAnnouncement},
};

pub const DEFAULT_ANNOUNCEMENT_WINDOW_HOURS: i64 = 12;

/// The acceptance gate. The traveler accepts or refuses a funded booking here, and [`Self::expire_stale`] declines
/// whatever the traveler has left unanswered for longer than the decision window.
#[derive(Clone)]
pub struct AnnouncementApi<B> {
    db: B,
    escrow: EscrowWallet,
    window: Duration,
    producers: EventProducers,
    retry: RetryPolicy,
}

impl<B> Debug for AnnouncementApi<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "AnnouncementApi (window: {}h)", self.window.num_hours())
    }
}

impl<B> AnnouncementApi<B> {
    pub fn new(db: B, escrow: EscrowWallet, producers: EventProducers) -> Self {
        Self {
            db,
            escrow,
            window: Duration::hours(DEFAULT_ANNOUNCEMENT_WINDOW_HOURS),
            producers,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn window(&self) -> Duration {
        self.window
    }
}

impl<B> AnnouncementApi<B>
where B: EscrowDatabase
{
    pub async fn fetch_announcement(&self, id: BookingId) -> Result<AnnouncementRequest, BookingError> {
        self.db.fetch_announcement(id).await?.ok_or(BookingError::AnnouncementNotFound(id))
    }

    pub async fn accept(&self, user: &UserId, id: BookingId) -> Result<ResolvedAnnouncement, BookingError> {
        self.decide(user, id, AnnouncementDecision::Accept).await
    }

    pub async fn refuse(&self, user: &UserId, id: BookingId) -> Result<ResolvedAnnouncement, BookingError> {
        self.decide(user, id, AnnouncementDecision::Refuse).await
    }

    /// Applies the traveler's decision. Only the traveler of the booking may decide, and only once: a second decision
    /// fails with [`BookingError::AnnouncementAlreadyProcessed`] whatever the first one was.
    pub async fn decide(
        &self,
        user: &UserId,
        id: BookingId,
        decision: AnnouncementDecision,
    ) -> Result<ResolvedAnnouncement, BookingError> {
        let action = match decision {
            AnnouncementDecision::Accept => BookingAction::Accept,
            AnnouncementDecision::Refuse => BookingAction::Refuse,
            AnnouncementDecision::Expire => BookingAction::Expire,
        };
        let booking = self.db.fetch_booking(id).await?.ok_or(BookingError::BookingNotFound(id))?;
        let role = booking
            .role_of(user)
            .ok_or_else(|| BookingError::NotAParticipant { booking: id, actor: user.clone() })?;
        if !action.allowed_roles().contains(&role) {
            return Err(BookingError::NotPermitted { action, role });
        }
        let actor = Actor::new(user.clone(), role);
        let resolved = self.resolve(id, decision, &actor).await?;
        info!("🔔️ Traveler {user} answered the request for booking #{id}: {}", resolved.booking.status);
        self.announce(&resolved, actor).await;
        Ok(resolved)
    }

    /// Declines every request that has been waiting since before `now - window`, refunding the payer. Requests that
    /// are resolved concurrently by the traveler are skipped. A failure on one request does not stop the sweep.
    pub async fn expire_stale(&self, now: DateTime<Utc>) -> Result<ExpiryResult, BookingError> {
        let cutoff = now - self.window;
        let stale = self.db.fetch_unprocessed_announcements_before(cutoff).await?;
        if stale.is_empty() {
            trace!("🔔️ No announcement requests older than {cutoff}");
            return Ok(ExpiryResult::default());
        }
        debug!("🔔️ {} announcement request(s) older than {cutoff} are being declined", stale.len());
        let mut result = ExpiryResult::default();
        let system = Actor::system();
        for request in stale {
            let id = request.booking_id;
            match self.resolve(id, AnnouncementDecision::Expire, &system).await {
                Ok(resolved) => {
                    info!("🔔️ Booking #{id} was not answered in time and has been declined");
                    self.announce(&resolved, system.clone()).await;
                    result.declined.push(resolved);
                },
                Err(BookingError::AnnouncementAlreadyProcessed(_)) => {
                    debug!("🔔️ Booking #{id} was answered while the sweep was running");
                    result.skipped.push(id);
                },
                Err(e) => {
                    warn!("🔔️ Could not expire the announcement for booking #{id}. {e}");
                    result.failed.push((id, e.to_string()));
                },
            }
        }
        Ok(result)
    }

    pub async fn expire_stale_at<C: Clock + ?Sized>(&self, clock: &C) -> Result<ExpiryResult, BookingError> {
        self.expire_stale(clock.now()).await
    }

    async fn resolve(
        &self,
        id: BookingId,
        decision: AnnouncementDecision,
        actor: &Actor,
    ) -> Result<ResolvedAnnouncement, BookingError> {
        retry_on_conflict(self.retry, "resolve announcement", || {
            self.db.resolve_announcement(&self.escrow, id, decision, actor)
        })
        .await
    }

    async fn announce(&self, resolved: &ResolvedAnnouncement, actor: Actor) {
        let booking = &resolved.booking;
        let id = booking.id;
        let (status, owner_msg, traveler_msg) = if booking.status == BookingStatus::PickUp {
            (
                ConversationStatus::Accepted,
                format!("Your booking #{id} has been accepted"),
                format!("You accepted booking #{id}"),
            )
        } else {
            let traveler_msg = match actor.role {
                ActorRole::System => format!("Booking #{id} expired before you answered"),
                _ => format!("You declined booking #{id}"),
            };
            (
                ConversationStatus::Declined,
                format!("Your booking #{id} has been declined and the payment refunded to your wallet"),
                traveler_msg,
            )
        };
        self.producers
            .publish_status_changed(BookingStatusChangedEvent::new(
                booking.clone(),
                BookingStatus::PendingAcceptance,
                actor,
            ))
            .await;
        self.producers
            .publish_conversation_status(ConversationStatusEvent {
                booking_id: id,
                owner_id: booking.owner_id.clone(),
                traveler_id: booking.traveler_id.clone(),
                status,
            })
            .await;
        self.producers.publish_notification(NotificationEvent::new(booking.owner_id.clone(), id, owner_msg)).await;
        self.producers
            .publish_notification(NotificationEvent::new(booking.traveler_id.clone(), id, traveler_msg))
            .await;
    }
}
