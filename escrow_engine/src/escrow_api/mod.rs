//! # Escrow engine public API
//!
//! The API is split by concern, so that a caller can construct only the parts it needs:
//!
//! * [`wallet_api`] is the wallet engine. Deposits and withdrawals through the payment provider, and the hold, release
//!   and refund primitives.
//! * [`booking_flow_api`] drives a booking through its lifecycle, from checkout to completion or cancellation.
//! * [`announcement_api`] is the acceptance gate in front of every funded booking, including the expiry sweep.
//! * [`reconciliation_api`] applies provider notifications to the ledger exactly once.
//!
//! [`state_machine`] holds the booking transition table. The `*_objects` modules hold request and response types.
//!
//! # API usage
//!
//! Every API is constructed from a database backend implementing [`EscrowDatabase`](crate::traits::EscrowDatabase),
//! plus whatever collaborators it needs:
//!
//! ```rust,ignore
//! use escrow_engine::{SqliteDatabase, WalletApi, LedgerPolicy};
//! let db = SqliteDatabase::new_with_url(url, 25).await?;
//! let escrow = db.escrow_wallet("EUR").await?;
//! let api = WalletApi::new(db, provider, escrow, LedgerPolicy::default());
//! let (wallet, history) = api.statement(&user).await?;
//! ```
pub mod announcement_api;
pub mod booking_flow_api;
pub mod booking_objects;
pub mod ledger_objects;
pub mod reconciliation_api;
pub mod state_machine;
pub mod wallet_api;

pub use announcement_api::AnnouncementApi;
pub use booking_flow_api::BookingFlowApi;
pub use reconciliation_api::{PaymentEvent, PaymentEventKind, ReconciliationApi, ReconciliationOutcome};
pub use wallet_api::WalletApi;
