use thiserror::Error;

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
        PackageId,
        Report,
        TravelId,
        UserId,
    },
    escrow_api::state_machine::BookingAction,
    traits::{
        data_objects::{Actor, CancelledBooking, FundingOutcome, FundingSource, TransferReceipt, TransitionUpdate},
        error_kind::{is_lock_contention, ClassifiedError, ErrorKind},
        LedgerError,
    },
};

/// Persistence for the booking lifecycle.
///
/// Status changes are compare-and-set: every method that moves a booking takes the status the caller validated
/// against and fails with [`BookingError::ConcurrencyConflict`] if the row has moved on in the meantime. Methods that
/// also move money do so in the same database transaction as the status change.
#[allow(async_fn_in_trait)]
pub trait BookingManagement {
    /// Creates a booking in `new` status. The traveler is taken from the travel's owner.
    async fn insert_booking(&self, booking: NewBooking) -> Result<Booking, BookingError>;

    async fn fetch_booking(&self, id: BookingId) -> Result<Option<Booking>, BookingError>;

    async fn fetch_booking_by_payment_intent(&self, intent_id: &str) -> Result<Option<Booking>, BookingError>;

    /// Bookings where `user` is either the owner or the traveler, newest first.
    async fn fetch_bookings_for_user(&self, user: &UserId) -> Result<Vec<Booking>, BookingError>;

    /// Links a provider payment intent to an unpaid booking and marks its payment as processing.
    async fn attach_payment_intent(&self, id: BookingId, intent_id: &str) -> Result<Booking, BookingError>;

    /// Marks the booking's payment as failed, unless it has already been paid.
    async fn mark_payment_failed(&self, id: BookingId, reason: &str) -> Result<Booking, BookingError>;

    /// The single funding entry point used by webhooks, direct confirmation and wallet payments alike.
    ///
    /// Atomically: (for provider charges) credits the payer's wallet keyed on the intent id, holds the booking amount
    /// in escrow, sets `paid`, moves the booking to `pending_acceptance` and creates its announcement request.
    /// Funding an already paid booking is a no-op.
    async fn fund_booking(
        &self,
        escrow: &EscrowWallet,
        id: BookingId,
        source: FundingSource,
    ) -> Result<FundingOutcome, BookingError>;

    /// Applies a transition that does not move money.
    async fn apply_transition(
        &self,
        id: BookingId,
        from: BookingStatus,
        to: BookingStatus,
        actor: &Actor,
        update: TransitionUpdate,
    ) -> Result<Booking, BookingError>;

    /// Cancels the booking, refunding the payer in the same transaction if funds are still held.
    async fn cancel_booking(
        &self,
        escrow: &EscrowWallet,
        id: BookingId,
        from: BookingStatus,
        actor: &Actor,
        reason: Option<String>,
    ) -> Result<CancelledBooking, BookingError>;

    /// Releases the held funds of a `completed` booking to the traveler's wallet.
    async fn release_booking_funds(
        &self,
        escrow: &EscrowWallet,
        id: BookingId,
    ) -> Result<(Booking, TransferReceipt), BookingError>;

    async fn fetch_booking_history(&self, id: BookingId) -> Result<Vec<BookingEvent>, BookingError>;

    async fn fetch_reports(&self, id: BookingId) -> Result<Vec<Report>, BookingError>;
}

#[derive(Debug, Clone, Error)]
pub enum BookingError {
    #[error("Internal database error: {0}")]
    DatabaseError(String),
    #[error("The booking changed while the request was processed, try again. {0}")]
    ConcurrencyConflict(String),
    #[error("{0}")]
    Ledger(#[from] LedgerError),
    #[error("Booking #{0} does not exist")]
    BookingNotFound(BookingId),
    #[error("No booking is linked to payment intent {0}")]
    UnknownPaymentIntent(String),
    #[error("Travel {0} does not exist")]
    TravelNotFound(TravelId),
    #[error("Package {0} does not exist")]
    PackageNotFound(PackageId),
    #[error("Only the package owner can book it")]
    NotPackageOwner,
    #[error("A traveler cannot book their own travel")]
    SelfBooking,
    #[error("Booking amounts must be positive, but {0} was given")]
    InvalidAmount(Amount),
    #[error("Travel {travel_id} already has an active booking for package {package_id}")]
    ActiveBookingExists { travel_id: TravelId, package_id: PackageId },
    #[error("{actor} is not a participant in booking #{booking}")]
    NotAParticipant { booking: BookingId, actor: UserId },
    #[error("The {role} may not {action} a booking")]
    NotPermitted { action: BookingAction, role: ActorRole },
    #[error("Cannot {action} a booking that is {status}")]
    InvalidTransition { action: BookingAction, status: BookingStatus },
    #[error("Missing or empty proof artifact: {0}")]
    MissingProof(&'static str),
    #[error("A reason is required")]
    MissingReason,
    #[error("Booking #{0} has no announcement request")]
    AnnouncementNotFound(BookingId),
    #[error("The announcement request for booking #{0} has already been processed")]
    AnnouncementAlreadyProcessed(BookingId),
    #[error("Funds for booking #{booking} cannot be released. {reason}")]
    FundsNotReleasable { booking: BookingId, reason: String },
    #[error("The payment does not match booking #{booking}. {reason}")]
    PaymentMismatch { booking: BookingId, reason: String },
    #[error("The payment provider rejected the request. {0}")]
    ProviderError(String),
    #[error("Booking invariant violated. {0}")]
    InvariantViolation(String),
}

impl ClassifiedError for BookingError {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::Ledger(e) => e.kind(),
            Self::DatabaseError(_) | Self::InvariantViolation(_) => ErrorKind::Fatal,
            Self::ConcurrencyConflict(_) => ErrorKind::ConcurrencyConflict,
            Self::ProviderError(_) => ErrorKind::ExternalProvider,
            _ => ErrorKind::Validation,
        }
    }
}

impl From<sqlx::Error> for BookingError {
    fn from(e: sqlx::Error) -> Self {
        if is_lock_contention(&e) {
            BookingError::ConcurrencyConflict(e.to_string())
        } else {
            BookingError::DatabaseError(e.to_string())
        }
    }
}
