//! # Storage contracts of the escrow engine
//!
//! The traits in this module are what a database backend must implement to support the engine. The only backend
//! shipped is [`crate::SqliteDatabase`].
//!
//! ## Ledger
//! Every user has a wallet, and there is a single central escrow wallet. Balances only ever change together with an
//! append-only [`crate::db_types::WalletTransaction`] record, so every balance can be recomputed from the log (see
//! [`LedgerManagement::audit_ledger`]).
//!
//! ## Bookings and announcements
//! A booking is funded by holding its amount in escrow, after which the traveler has to accept it through an
//! announcement request. Bookings then move through the delivery lifecycle until the funds are released to the
//! traveler or refunded to the owner.
//!
//! ## Traits
//! * [`EscrowDatabase`] ties everything together.
//! * [`LedgerManagement`] owns wallets and atomic money movements.
//! * [`BookingManagement`] persists bookings and their (compare-and-set) status transitions.
//! * [`AnnouncementManagement`] is the acceptance gate.
//! * [`CatalogManagement`] is the read model of travels and packages.
//! * [`ProcessedEventLog`] remembers which provider webhooks have been handled.
//! * [`PaymentProvider`] is the outbound port to the card/payout processor. It is not a database trait, but lives here
//!   with the other seams.
mod announcement_management;
mod booking_management;
mod catalog_management;
mod escrow_database;
mod ledger_management;
mod payment_provider;
mod processed_event_log;

pub mod data_objects;
pub mod error_kind;

pub use announcement_management::AnnouncementManagement;
pub use booking_management::{BookingError, BookingManagement};
pub use catalog_management::CatalogManagement;
pub use data_objects::{
    Actor,
    AnnouncementDecision,
    CancelledBooking,
    ExpiryResult,
    FundedBooking,
    FundingOutcome,
    FundingSource,
    LedgerAudit,
    PayoutAttempt,
    ResolvedAnnouncement,
    SettlementOutcome,
    TransferReceipt,
    TransitionUpdate,
    WalletAudit,
};
pub use error_kind::{ClassifiedError, ErrorKind};
pub use escrow_database::EscrowDatabase;
pub use ledger_management::{LedgerError, LedgerManagement};
pub use payment_provider::{
    ChargePurpose,
    ChargeRequest,
    ChargeStatus,
    PaymentProvider,
    PayoutRequest,
    ProviderCharge,
    ProviderError,
    ProviderPayout,
    BOOKING_KEY,
    PURPOSE_KEY,
    WALLET_TX_KEY,
};
pub use processed_event_log::{ProcessedEventLog, ReconciliationError};
