use actix_web::{
    error::ResponseError,
    http::{header::ContentType, StatusCode},
    HttpResponse,
};
use escrow_engine::{BookingError, ClassifiedError, ErrorKind, LedgerError, ReconciliationError};
use log::error;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Could not initialize server. {0}")]
    InitializeError(String),
    #[error("Invalid server configuration. {0}")]
    ConfigurationError(String),
    #[error("An I/O error happened in the server. {0}")]
    IOError(#[from] std::io::Error),
    #[error("UnspecifiedError. {0}")]
    Unspecified(String),
    #[error("Could not read request body: {0}")]
    InvalidRequestBody(String),
    #[error("No authenticated user was supplied with the request")]
    MissingActor,
    #[error("Requests from this address are not allowed")]
    ForbiddenPeer,
    #[error("The data was not found. {0}")]
    NoRecordFound(String),
    #[error("{0}")]
    Ledger(#[from] LedgerError),
    #[error("{0}")]
    Booking(#[from] BookingError),
    #[error("{0}")]
    Reconciliation(#[from] ReconciliationError),
}

impl ServerError {
    /// The engine's classification of the error, if it came from the engine.
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            Self::Ledger(e) => Some(e.kind()),
            Self::Booking(e) => Some(e.kind()),
            Self::Reconciliation(e) => Some(e.kind()),
            _ => None,
        }
    }
}

impl ResponseError for ServerError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::InitializeError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::ConfigurationError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::IOError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Unspecified(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::InvalidRequestBody(_) => StatusCode::BAD_REQUEST,
            Self::MissingActor => StatusCode::UNAUTHORIZED,
            Self::ForbiddenPeer => StatusCode::FORBIDDEN,
            Self::NoRecordFound(_) => StatusCode::NOT_FOUND,
            Self::Ledger(e) => ledger_status(e),
            Self::Booking(e) => booking_status(e),
            Self::Reconciliation(e) => match e {
                ReconciliationError::Ledger(e) => ledger_status(e),
                ReconciliationError::Booking(e) => booking_status(e),
                ReconciliationError::MalformedEvent { .. } => StatusCode::BAD_REQUEST,
                _ => status_for_kind(e.kind()),
            },
        }
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        if status.is_server_error() {
            error!("💻️ Request failed with {status}. {self}");
        }
        HttpResponse::build(status)
            .insert_header(ContentType::json())
            .body(serde_json::json!({ "error": self.to_string() }).to_string())
    }
}

fn status_for_kind(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::Validation => StatusCode::BAD_REQUEST,
        ErrorKind::InsufficientFunds => StatusCode::PAYMENT_REQUIRED,
        ErrorKind::ExternalProvider => StatusCode::BAD_GATEWAY,
        ErrorKind::ConcurrencyConflict => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::Fatal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn ledger_status(e: &LedgerError) -> StatusCode {
    match e {
        LedgerError::WalletNotFound(_) | LedgerError::NoWalletForUser(_) | LedgerError::TransactionNotFound(_) => {
            StatusCode::NOT_FOUND
        },
        LedgerError::HoldAlreadyOutstanding(_)
        | LedgerError::NoOutstandingHold(_)
        | LedgerError::NotRefundable { .. } => StatusCode::CONFLICT,
        _ => status_for_kind(e.kind()),
    }
}

fn booking_status(e: &BookingError) -> StatusCode {
    match e {
        BookingError::Ledger(e) => ledger_status(e),
        BookingError::BookingNotFound(_)
        | BookingError::UnknownPaymentIntent(_)
        | BookingError::TravelNotFound(_)
        | BookingError::PackageNotFound(_)
        | BookingError::AnnouncementNotFound(_) => StatusCode::NOT_FOUND,
        BookingError::NotPackageOwner | BookingError::NotAParticipant { .. } | BookingError::NotPermitted { .. } => {
            StatusCode::FORBIDDEN
        },
        BookingError::ActiveBookingExists { .. }
        | BookingError::InvalidTransition { .. }
        | BookingError::AnnouncementAlreadyProcessed(_)
        | BookingError::FundsNotReleasable { .. } => StatusCode::CONFLICT,
        _ => status_for_kind(e.kind()),
    }
}
