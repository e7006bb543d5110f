use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::db_types::{
    ActorRole,
    Amount,
    AnnouncementRequest,
    Booking,
    BookingId,
    UserId,
    WalletId,
    WalletRole,
    WalletTransaction,
};

/// The identity behind a request, as established by the upstream auth layer (or the system itself).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub user_id: Option<UserId>,
    pub role: ActorRole,
}

impl Actor {
    pub fn system() -> Self {
        Self { user_id: None, role: ActorRole::System }
    }

    pub fn new(user_id: UserId, role: ActorRole) -> Self {
        Self { user_id: Some(user_id), role }
    }
}

/// The two records written by a paired movement between wallets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferReceipt {
    pub debit: WalletTransaction,
    pub credit: WalletTransaction,
}

impl TransferReceipt {
    pub fn amount(&self) -> Amount {
        self.credit.amount
    }
}

/// The result of applying an externally confirmed state change to a ledger record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SettlementOutcome {
    /// The change was applied now.
    Applied(WalletTransaction),
    /// The record was already in the target state. Nothing changed.
    AlreadyApplied(WalletTransaction),
    /// The record is in a state the change is not compatible with (e.g. confirming a FAILED deposit). Nothing changed.
    Ignored { transaction: WalletTransaction, reason: String },
}

impl SettlementOutcome {
    pub fn transaction(&self) -> &WalletTransaction {
        match self {
            Self::Applied(tx) | Self::AlreadyApplied(tx) => tx,
            Self::Ignored { transaction, .. } => transaction,
        }
    }

    pub fn was_applied(&self) -> bool {
        matches!(self, Self::Applied(_))
    }
}

/// What the provider said when asked to pay a withdrawal out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayoutAttempt {
    Accepted { payout_ref: String, status: String },
    Failed { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct WalletAudit {
    pub wallet_id: WalletId,
    pub role: WalletRole,
    pub owner_id: Option<UserId>,
    pub balance: Amount,
    /// The balance recomputed from the transaction log.
    pub projected: Amount,
}

impl WalletAudit {
    pub fn discrepancy(&self) -> Amount {
        self.balance - self.projected
    }

    pub fn is_consistent(&self) -> bool {
        self.balance == self.projected
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerAudit {
    pub wallets: Vec<WalletAudit>,
    pub escrow_balance: Amount,
    /// Sum of all HOLD records that have not been released or refunded yet.
    pub outstanding_holds: Amount,
}

impl LedgerAudit {
    pub fn is_consistent(&self) -> bool {
        self.escrow_balance == self.outstanding_holds && self.wallets.iter().all(WalletAudit::is_consistent)
    }

    pub fn inconsistent_wallets(&self) -> impl Iterator<Item = &WalletAudit> {
        self.wallets.iter().filter(|w| !w.is_consistent())
    }
}

//--------------------------------------        Bookings       -------------------------------------------------------
/// Where the money for a booking comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FundingSource {
    /// A provider charge that has succeeded. Its amount is credited to the payer's wallet first (keyed on the intent
    /// id), then held.
    ProviderCharge { payment_intent_id: String, amount: Amount },
    /// The payer's existing wallet balance.
    Wallet,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FundedBooking {
    pub booking: Booking,
    pub announcement: AnnouncementRequest,
    pub hold: TransferReceipt,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FundingOutcome {
    Funded(FundedBooking),
    /// The booking was already paid for. Nothing changed.
    AlreadyFunded(Booking),
    /// The charge was credited to the payer's wallet, but it did not cover the booking amount.
    Underfunded { booking: Booking, credited: Amount },
    /// The charge was credited to the payer's wallet, but the booking can no longer be funded (e.g. it was cancelled
    /// while the payment was in flight).
    NotFundable { booking: Booking, credited: Amount },
}

impl FundingOutcome {
    pub fn booking(&self) -> &Booking {
        match self {
            Self::Funded(funded) => &funded.booking,
            Self::AlreadyFunded(booking) => booking,
            Self::Underfunded { booking, .. } | Self::NotFundable { booking, .. } => booking,
        }
    }
}

/// The fields a non-financial booking transition writes, one variant per transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionUpdate {
    PickUp { photo: String, sender_signature: String, traveler_signature: String },
    Problem { reason: String },
    ConditionsUnmet { details: Option<String> },
    DropOff { photo: String, receiver_signature: String, traveler_signature: String },
    Complete,
    Reject { reason: Option<String> },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelledBooking {
    pub booking: Booking,
    /// Present if funds were still held in escrow and have been returned to the payer.
    pub refund: Option<TransferReceipt>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AnnouncementDecision {
    Accept,
    Refuse,
    Expire,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedAnnouncement {
    pub booking: Booking,
    pub announcement: AnnouncementRequest,
    pub refund: Option<TransferReceipt>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExpiryResult {
    pub declined: Vec<ResolvedAnnouncement>,
    /// Requests that were resolved by someone else between the scan and the latch.
    pub skipped: Vec<BookingId>,
    pub failed: Vec<(BookingId, String)>,
}

impl ExpiryResult {
    pub fn declined_count(&self) -> usize {
        self.declined.len()
    }

    pub fn is_empty(&self) -> bool {
        self.declined.is_empty() && self.skipped.is_empty() && self.failed.is_empty()
    }
}
