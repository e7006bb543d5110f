//! Escrow Engine
//!
//! The escrow engine holds money on behalf of package owners while a traveler carries their package, and pays it out
//! once the delivery is complete. This library contains the core logic. It is provider-agnostic: the card/payout
//! processor is reached only through the [`PaymentProvider`] trait.
//!
//! The library is divided into two main sections:
//! 1. Storage ([`traits`] and the SQLite backend, [`SqliteDatabase`]). You should never need to call the database
//!    directly. The exception is the data types stored in it, which are defined in [`db_types`] and are public.
//! 2. The public API ([`mod@escrow_api`]): wallets, the booking lifecycle, the acceptance gate and the reconciliation
//!    of provider notifications.
//!
//! The engine also emits events when bookings change hands or a payout fails. See [`events`] for how to hook into
//! them.
pub mod db_types;
pub mod escrow_api;
pub mod events;
pub mod helpers;
pub mod traits;

#[cfg(feature = "sqlite")]
mod sqlite;

#[cfg(any(feature = "test_utils", test))]
pub mod test_utils;

pub use escrow_api::{
    booking_objects,
    ledger_objects,
    state_machine,
    AnnouncementApi,
    BookingFlowApi,
    PaymentEvent,
    PaymentEventKind,
    ReconciliationApi,
    ReconciliationOutcome,
    WalletApi,
};
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteDatabase;
pub use traits::{
    AnnouncementManagement,
    BookingError,
    BookingManagement,
    CatalogManagement,
    ClassifiedError,
    EscrowDatabase,
    ErrorKind,
    LedgerError,
    LedgerManagement,
    PaymentProvider,
    ProcessedEventLog,
    ReconciliationError,
};
