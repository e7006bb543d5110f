use std::future::Future;

use thiserror::Error;

use crate::{
    db_types::{Amount, BookingId, EscrowWallet, TransactionId, UserId, Wallet, WalletId, WalletTransaction},
    traits::{
        data_objects::{LedgerAudit, PayoutAttempt, SettlementOutcome, TransferReceipt},
        error_kind::{is_lock_contention, ClassifiedError, ErrorKind},
    },
};

/// The ledger store and the atomic money movements on top of it.
///
/// Every mutating method runs as one database transaction that covers all of its reads and writes. Balance
/// decrements are conditional updates (`balance >= amount` is part of the `UPDATE`), so two concurrent callers can
/// never both pass a sufficiency check that only one of them can satisfy, no matter how many processes share the
/// database.
///
/// Each balance change is written together with exactly one [`WalletTransaction`] carrying the same signed amount.
#[allow(async_fn_in_trait)]
pub trait LedgerManagement {
    /// Fetches the central escrow wallet, creating it on first use. There is only ever one.
    async fn escrow_wallet(&self, currency: &str) -> Result<EscrowWallet, LedgerError>;

    /// Fetches the wallet belonging to `user`, creating an empty one on first use.
    async fn fetch_or_create_wallet(&self, user: &UserId, currency: &str) -> Result<Wallet, LedgerError>;

    async fn fetch_wallet(&self, id: WalletId) -> Result<Option<Wallet>, LedgerError>;

    async fn fetch_wallet_for_user(&self, user: &UserId) -> Result<Option<Wallet>, LedgerError>;

    async fn fetch_transaction(&self, id: TransactionId) -> Result<Option<WalletTransaction>, LedgerError>;

    /// Newest first.
    async fn fetch_transactions_for_wallet(&self, wallet: WalletId) -> Result<Vec<WalletTransaction>, LedgerError>;

    async fn fetch_transactions_for_booking(&self, booking: BookingId)
        -> Result<Vec<WalletTransaction>, LedgerError>;

    async fn fetch_outstanding_hold(&self, booking: BookingId) -> Result<Option<WalletTransaction>, LedgerError>;

    /// Records a `PENDING` deposit. The balance is not touched until [`Self::confirm_deposit`].
    async fn begin_deposit(&self, wallet: WalletId, amount: Amount) -> Result<WalletTransaction, LedgerError>;

    /// Stores the provider's charge reference on a pending deposit.
    async fn attach_provider_ref(&self, tx_id: TransactionId, provider_ref: &str) -> Result<(), LedgerError>;

    /// `PENDING -> COMPLETED` and credits the wallet. Replays and out-of-order deliveries are reported through the
    /// outcome rather than as errors.
    async fn confirm_deposit(&self, tx_id: TransactionId) -> Result<SettlementOutcome, LedgerError>;

    /// `PENDING -> FAILED`. The balance is never touched.
    async fn fail_deposit(&self, tx_id: TransactionId, reason: &str) -> Result<SettlementOutcome, LedgerError>;

    /// Withdraws funds to an external destination.
    ///
    /// In one transaction: the balance is decremented, a `PENDING` WITHDRAW is written, and `payout` is invoked with
    /// that record. If the payout fails, the decrement is reversed and the record marked `FAILED` with the reason,
    /// inside the same transaction. If it succeeds, the record is marked `COMPLETED` with the provider's reference.
    async fn withdraw<F, Fut>(
        &self,
        wallet: WalletId,
        amount: Amount,
        destination: &str,
        payout: F,
    ) -> Result<WalletTransaction, LedgerError>
    where
        F: FnOnce(WalletTransaction) -> Fut,
        Fut: Future<Output = PayoutAttempt>;

    /// Records the provider's confirmation that a payout reached its destination.
    async fn mark_payout_paid(&self, payout_ref: &str) -> Result<SettlementOutcome, LedgerError>;

    /// Compensates a payout the provider reported as failed after accepting it: the wallet is credited back and a
    /// REFUND record referencing the withdrawal is written. At most once per withdrawal.
    async fn compensate_failed_payout(&self, payout_ref: &str, reason: &str)
        -> Result<SettlementOutcome, LedgerError>;

    /// Moves `amount` from the payer's wallet into escrow (SPEND on the payer, HOLD on escrow).
    async fn hold(
        &self,
        escrow: &EscrowWallet,
        payer: WalletId,
        amount: Amount,
        booking: BookingId,
    ) -> Result<TransferReceipt, LedgerError>;

    /// Pays the booking's outstanding hold out to `payee` (RELEASE on escrow, DEPOSIT on the payee).
    async fn release(
        &self,
        escrow: &EscrowWallet,
        booking: BookingId,
        payee: WalletId,
        amount: Amount,
    ) -> Result<TransferReceipt, LedgerError>;

    /// Returns the booking's outstanding hold to the wallet it came from (REFUND on both sides).
    async fn refund(
        &self,
        escrow: &EscrowWallet,
        booking: BookingId,
        payer: WalletId,
        amount: Amount,
    ) -> Result<TransferReceipt, LedgerError>;

    /// Refunds a `COMPLETED` SPEND whose escrow hold is still outstanding.
    async fn refund_transaction(
        &self,
        escrow: &EscrowWallet,
        tx_id: TransactionId,
    ) -> Result<TransferReceipt, LedgerError>;

    /// Recomputes every balance from the transaction log.
    async fn audit_ledger(&self) -> Result<LedgerAudit, LedgerError>;
}

#[derive(Debug, Clone, Error)]
pub enum LedgerError {
    #[error("Internal database error: {0}")]
    DatabaseError(String),
    #[error("The ledger is busy, try again. {0}")]
    ConcurrencyConflict(String),
    #[error("Amounts must be positive, but {0} was given")]
    NonPositiveAmount(Amount),
    #[error("A {operation} of {amount} is below the minimum of {minimum}")]
    BelowMinimum { operation: &'static str, amount: Amount, minimum: Amount },
    #[error("Wallet #{wallet} has insufficient funds for {requested}")]
    InsufficientFunds { wallet: WalletId, requested: Amount },
    #[error("Wallet #{0} does not exist")]
    WalletNotFound(WalletId),
    #[error("User {0} does not have a wallet")]
    NoWalletForUser(UserId),
    #[error("Currency mismatch. The wallet holds {wallet}, but {requested} was requested")]
    CurrencyMismatch { wallet: String, requested: String },
    #[error("Booking #{0} already has funds held in escrow")]
    HoldAlreadyOutstanding(BookingId),
    #[error("Booking #{0} has no outstanding hold")]
    NoOutstandingHold(BookingId),
    #[error("Booking #{booking} has {held} held in escrow, but {requested} was requested")]
    HoldAmountMismatch { booking: BookingId, held: Amount, requested: Amount },
    #[error("Funds for booking #{booking} can only be refunded to wallet #{expected}")]
    RefundWalletMismatch { booking: BookingId, expected: WalletId },
    #[error("Transaction #{0} does not exist")]
    TransactionNotFound(TransactionId),
    #[error("Transaction #{id} cannot be refunded. {reason}")]
    NotRefundable { id: TransactionId, reason: String },
    #[error("No {tx_type} transaction matches the provider reference {reference}")]
    UnknownProviderRef { tx_type: String, reference: String },
    #[error("The payment provider rejected the request. {0}")]
    ProviderError(String),
    #[error("Ledger invariant violated. {0}")]
    InvariantViolation(String),
}

impl ClassifiedError for LedgerError {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::DatabaseError(_) | Self::InvariantViolation(_) => ErrorKind::Fatal,
            Self::ConcurrencyConflict(_) => ErrorKind::ConcurrencyConflict,
            Self::InsufficientFunds { .. } => ErrorKind::InsufficientFunds,
            Self::ProviderError(_) => ErrorKind::ExternalProvider,
            Self::NonPositiveAmount(_)
            | Self::BelowMinimum { .. }
            | Self::WalletNotFound(_)
            | Self::NoWalletForUser(_)
            | Self::CurrencyMismatch { .. }
            | Self::HoldAlreadyOutstanding(_)
            | Self::NoOutstandingHold(_)
            | Self::HoldAmountMismatch { .. }
            | Self::RefundWalletMismatch { .. }
            | Self::TransactionNotFound(_)
            | Self::NotRefundable { .. }
            | Self::UnknownProviderRef { .. } => ErrorKind::Validation,
        }
    }
}

impl From<sqlx::Error> for LedgerError {
    fn from(e: sqlx::Error) -> Self {
        if is_lock_contention(&e) {
            LedgerError::ConcurrencyConflict(e.to_string())
        } else {
            LedgerError::DatabaseError(e.to_string())
        }
    }
}
