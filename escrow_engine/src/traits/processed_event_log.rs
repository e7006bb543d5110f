use thiserror::Error;

use crate::{
    db_types::ProcessedEvent,
    traits::{
        error_kind::{is_lock_contention, ClassifiedError, ErrorKind},
        BookingError,
        LedgerError,
    },
};

/// A record of provider webhook deliveries that have been handled.
#[allow(async_fn_in_trait)]
pub trait ProcessedEventLog {
    async fn fetch_processed_event(&self, event_id: &str) -> Result<Option<ProcessedEvent>, ReconciliationError>;

    /// Returns `false` if the event had already been recorded.
    async fn record_processed_event(
        &self,
        event_id: &str,
        event_type: &str,
        outcome: &str,
    ) -> Result<bool, ReconciliationError>;
}

#[derive(Debug, Clone, Error)]
pub enum ReconciliationError {
    #[error("Internal database error: {0}")]
    DatabaseError(String),
    #[error("The ledger is busy, try again. {0}")]
    ConcurrencyConflict(String),
    #[error("{0}")]
    Ledger(#[from] LedgerError),
    #[error("{0}")]
    Booking(#[from] BookingError),
    /// The event refers to a local record that is not visible yet. The provider should redeliver later.
    #[error("Event {event_id} refers to {reference}, which is not known yet")]
    NotYetKnown { event_id: String, reference: String },
    #[error("Event {event_id} cannot be processed. {reason}")]
    MalformedEvent { event_id: String, reason: String },
}

impl ClassifiedError for ReconciliationError {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::DatabaseError(_) => ErrorKind::Fatal,
            Self::ConcurrencyConflict(_) | Self::NotYetKnown { .. } => ErrorKind::ConcurrencyConflict,
            Self::Ledger(e) => e.kind(),
            Self::Booking(e) => e.kind(),
            Self::MalformedEvent { .. } => ErrorKind::Validation,
        }
    }
}

impl From<sqlx::Error> for ReconciliationError {
    fn from(e: sqlx::Error) -> Self {
        if is_lock_contention(&e) {
            ReconciliationError::ConcurrencyConflict(e.to_string())
        } else {
            ReconciliationError::DatabaseError(e.to_string())
        }
    }
}
