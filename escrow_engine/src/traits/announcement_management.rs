use chrono::{DateTime, Utc};

use crate::{
    db_types::{AnnouncementRequest, BookingId, EscrowWallet},
    traits::{
        data_objects::{Actor, AnnouncementDecision, ResolvedAnnouncement},
        BookingError,
    },
};

/// The acceptance gate in front of every funded booking.
#[allow(async_fn_in_trait)]
pub trait AnnouncementManagement {
    async fn fetch_announcement(&self, booking: BookingId) -> Result<Option<AnnouncementRequest>, BookingError>;

    /// Unprocessed requests created strictly before `cutoff`, oldest first.
    async fn fetch_unprocessed_announcements_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<AnnouncementRequest>, BookingError>;

    /// Resolves the booking's announcement request.
    ///
    /// The `is_processed` latch is taken with a conditional update, so of any number of concurrent resolvers (the
    /// traveler, the expiry sweep) exactly one wins; the others get
    /// [`BookingError::AnnouncementAlreadyProcessed`]. The winner moves the booking out of `pending_acceptance` and,
    /// for refusals and expiries, refunds the payer, all in the same transaction.
    async fn resolve_announcement(
        &self,
        escrow: &EscrowWallet,
        booking: BookingId,
        decision: AnnouncementDecision,
        actor: &Actor,
    ) -> Result<ResolvedAnnouncement, BookingError>;
}
