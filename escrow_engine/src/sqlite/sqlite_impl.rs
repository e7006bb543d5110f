//! `SqliteDatabase` is the concrete escrow engine backend.
//!
//! It implements every trait in [`crate::traits`]. Each mutating method opens a single transaction, composes the
//! low-level functions in [`super::db`] inside it, and commits once at the end. Any error drops the transaction, which
//! rolls all of its writes back.
use std::{fmt::Debug, future::Future};

use chrono::{DateTime, Utc};
use log::*;
use sqlx::{migrate, SqliteConnection, SqlitePool};

use super::db::{announcements, bookings, catalog, db_url, ledger, new_pool, processed_events, transactions, wallets};
use crate::{
    db_types::{
        Amount,
        AnnouncementRequest,
        Booking,
        BookingEvent,
        BookingId,
        BookingStatus,
        EscrowWallet,
        NewBooking,
        NewWalletTransaction,
        Package,
        PackageId,
        PaymentStatus,
        ProcessedEvent,
        Report,
        TransactionId,
        TransactionStatus,
        TransactionType,
        Travel,
        TravelId,
        TxMetadata,
        UserId,
        Wallet,
        WalletId,
        WalletTransaction,
    },
    escrow_api::state_machine::BookingAction,
    traits::{
        Actor,
        AnnouncementDecision,
        AnnouncementManagement,
        BookingError,
        BookingManagement,
        CancelledBooking,
        CatalogManagement,
        EscrowDatabase,
        FundedBooking,
        FundingOutcome,
        FundingSource,
        LedgerAudit,
        LedgerError,
        LedgerManagement,
        PayoutAttempt,
        ProcessedEventLog,
        ReconciliationError,
        ResolvedAnnouncement,
        SettlementOutcome,
        TransferReceipt,
        TransitionUpdate,
        WalletAudit,
    },
};

#[derive(Clone)]
pub struct SqliteDatabase {
    url: String,
    pool: SqlitePool,
}

impl Debug for SqliteDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SqliteDatabase ({})", self.url)
    }
}

impl SqliteDatabase {
    /// Creates a new database API object, using the URL in `ESC_DATABASE_URL`.
    pub async fn new(max_connections: u32) -> Result<Self, sqlx::Error> {
        let url = db_url();
        SqliteDatabase::new_with_url(&url, max_connections).await
    }

    pub async fn new_with_url(url: &str, max_connections: u32) -> Result<Self, sqlx::Error> {
        let pool = new_pool(url, max_connections).await?;
        Ok(Self { url: url.to_string(), pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Brings the schema up to date. Safe to call on every start-up.
    pub async fn run_migrations(&self) -> Result<(), sqlx::migrate::MigrateError> {
        migrate!("./src/sqlite/migrations").run(&self.pool).await?;
        info!("🪛️ Database migrations complete");
        Ok(())
    }
}

impl EscrowDatabase for SqliteDatabase {
    fn url(&self) -> &str {
        self.url.as_str()
    }

    async fn close(&mut self) -> Result<(), LedgerError> {
        self.pool.close().await;
        Ok(())
    }
}

//--------------------------------------        Ledger         -------------------------------------------------------
impl LedgerManagement for SqliteDatabase {
    async fn escrow_wallet(&self, currency: &str) -> Result<EscrowWallet, LedgerError> {
        let mut conn = self.pool.acquire().await?;
        let wallet = wallets::fetch_or_create_central_wallet(currency, &mut conn).await?;
        if wallet.currency != currency {
            return Err(LedgerError::CurrencyMismatch { wallet: wallet.currency, requested: currency.to_string() });
        }
        EscrowWallet::try_from(wallet).map_err(|e| LedgerError::InvariantViolation(e.to_string()))
    }

    async fn fetch_or_create_wallet(&self, user: &UserId, currency: &str) -> Result<Wallet, LedgerError> {
        let mut conn = self.pool.acquire().await?;
        let wallet = wallets::fetch_or_create_wallet(user, currency, &mut conn).await?;
        if wallet.currency != currency {
            return Err(LedgerError::CurrencyMismatch { wallet: wallet.currency, requested: currency.to_string() });
        }
        Ok(wallet)
    }

    async fn fetch_wallet(&self, id: WalletId) -> Result<Option<Wallet>, LedgerError> {
        let mut conn = self.pool.acquire().await?;
        Ok(wallets::fetch_wallet(id, &mut conn).await?)
    }

    async fn fetch_wallet_for_user(&self, user: &UserId) -> Result<Option<Wallet>, LedgerError> {
        let mut conn = self.pool.acquire().await?;
        Ok(wallets::fetch_wallet_for_user(user, &mut conn).await?)
    }

    async fn fetch_transaction(&self, id: TransactionId) -> Result<Option<WalletTransaction>, LedgerError> {
        let mut conn = self.pool.acquire().await?;
        Ok(transactions::fetch_transaction(id, &mut conn).await?)
    }

    async fn fetch_transactions_for_wallet(&self, wallet: WalletId) -> Result<Vec<WalletTransaction>, LedgerError> {
        let mut conn = self.pool.acquire().await?;
        Ok(transactions::fetch_for_wallet(wallet, &mut conn).await?)
    }

    async fn fetch_transactions_for_booking(
        &self,
        booking: BookingId,
    ) -> Result<Vec<WalletTransaction>, LedgerError> {
        let mut conn = self.pool.acquire().await?;
        Ok(transactions::fetch_for_booking(booking, &mut conn).await?)
    }

    async fn fetch_outstanding_hold(&self, booking: BookingId) -> Result<Option<WalletTransaction>, LedgerError> {
        let mut conn = self.pool.acquire().await?;
        Ok(transactions::fetch_outstanding_hold(booking, &mut conn).await?)
    }

    async fn begin_deposit(&self, wallet: WalletId, amount: Amount) -> Result<WalletTransaction, LedgerError> {
        if !amount.is_positive() {
            return Err(LedgerError::NonPositiveAmount(amount));
        }
        let mut tx = self.pool.begin().await?;
        let record = NewWalletTransaction::new(wallet, TransactionType::Deposit, amount, TransactionStatus::Pending);
        let deposit = match transactions::insert(record, &mut tx).await {
            Ok(deposit) => deposit,
            Err(sqlx::Error::Database(e)) if e.is_foreign_key_violation() => {
                return Err(LedgerError::WalletNotFound(wallet));
            },
            Err(e) => return Err(e.into()),
        };
        tx.commit().await?;
        debug!("💰️ Pending deposit #{} of {amount} recorded for wallet #{wallet}", deposit.id);
        Ok(deposit)
    }

    async fn attach_provider_ref(&self, tx_id: TransactionId, provider_ref: &str) -> Result<(), LedgerError> {
        let mut conn = self.pool.acquire().await?;
        transactions::set_provider_ref(tx_id, provider_ref, &mut conn)
            .await?
            .ok_or(LedgerError::TransactionNotFound(tx_id))?;
        trace!("💰️ Transaction #{tx_id} is linked to provider object {provider_ref}");
        Ok(())
    }

    async fn confirm_deposit(&self, tx_id: TransactionId) -> Result<SettlementOutcome, LedgerError> {
        let mut tx = self.pool.begin().await?;
        let updated = transactions::update_status(
            tx_id,
            TransactionType::Deposit,
            TransactionStatus::Pending,
            TransactionStatus::Completed,
            &mut tx,
        )
        .await?;
        let outcome = match updated {
            Some(deposit) => {
                if !wallets::credit(deposit.wallet_id, deposit.amount, &mut tx).await? {
                    return Err(LedgerError::WalletNotFound(deposit.wallet_id));
                }
                debug!("💰️ Deposit #{tx_id} confirmed. {} credited to wallet #{}", deposit.amount, deposit.wallet_id);
                SettlementOutcome::Applied(deposit)
            },
            None => {
                let existing = transactions::fetch_transaction(tx_id, &mut tx)
                    .await?
                    .ok_or(LedgerError::TransactionNotFound(tx_id))?;
                settled_elsewhere(existing, TransactionStatus::Completed)
            },
        };
        tx.commit().await?;
        Ok(outcome)
    }

    async fn fail_deposit(&self, tx_id: TransactionId, reason: &str) -> Result<SettlementOutcome, LedgerError> {
        let mut tx = self.pool.begin().await?;
        let updated = transactions::update_status(
            tx_id,
            TransactionType::Deposit,
            TransactionStatus::Pending,
            TransactionStatus::Failed,
            &mut tx,
        )
        .await?;
        let outcome = match updated {
            Some(deposit) => {
                let deposit = transactions::set_metadata_field(deposit.id, "failure_reason", reason, &mut tx).await?;
                debug!("💰️ Deposit #{tx_id} failed: {reason}");
                SettlementOutcome::Applied(deposit)
            },
            None => {
                let existing = transactions::fetch_transaction(tx_id, &mut tx)
                    .await?
                    .ok_or(LedgerError::TransactionNotFound(tx_id))?;
                settled_elsewhere(existing, TransactionStatus::Failed)
            },
        };
        tx.commit().await?;
        Ok(outcome)
    }

    async fn withdraw<F, Fut>(
        &self,
        wallet: WalletId,
        amount: Amount,
        destination: &str,
        payout: F,
    ) -> Result<WalletTransaction, LedgerError>
    where
        F: FnOnce(WalletTransaction) -> Fut,
        Fut: Future<Output = PayoutAttempt>,
    {
        if !amount.is_positive() {
            return Err(LedgerError::NonPositiveAmount(amount));
        }
        let mut tx = self.pool.begin().await?;
        if !wallets::debit(wallet, amount, &mut tx).await? {
            let reason = match wallets::fetch_wallet(wallet, &mut tx).await? {
                None => LedgerError::WalletNotFound(wallet),
                Some(_) => LedgerError::InsufficientFunds { wallet, requested: amount },
            };
            return Err(reason);
        }
        let metadata = TxMetadata { destination: Some(destination.to_string()), ..Default::default() };
        let record = NewWalletTransaction::new(wallet, TransactionType::Withdraw, -amount, TransactionStatus::Pending)
            .with_metadata(metadata);
        let pending = transactions::insert(record, &mut tx).await?;
        debug!("💰️ Withdrawal #{} of {amount} from wallet #{wallet} is pending payout", pending.id);
        // The payout result is recorded inside the same transaction as the debit, so there is never a committed
        // debit without either a completed payout or its compensation.
        let result = match payout(pending.clone()).await {
            PayoutAttempt::Accepted { payout_ref, status } => {
                transactions::set_provider_ref(pending.id, &payout_ref, &mut tx).await?;
                transactions::set_metadata_field(pending.id, "payout_status", &status, &mut tx).await?;
                let done = transactions::update_status(
                    pending.id,
                    TransactionType::Withdraw,
                    TransactionStatus::Pending,
                    TransactionStatus::Completed,
                    &mut tx,
                )
                .await?
                .ok_or_else(|| LedgerError::InvariantViolation(format!("Withdrawal #{} vanished", pending.id)))?;
                info!("💰️ Withdrawal #{} of {amount} paid out as {payout_ref}", done.id);
                done
            },
            PayoutAttempt::Failed { reason } => {
                if !wallets::credit(wallet, amount, &mut tx).await? {
                    return Err(LedgerError::WalletNotFound(wallet));
                }
                transactions::set_metadata_field(pending.id, "failure_reason", &reason, &mut tx).await?;
                let failed = transactions::update_status(
                    pending.id,
                    TransactionType::Withdraw,
                    TransactionStatus::Pending,
                    TransactionStatus::Failed,
                    &mut tx,
                )
                .await?
                .ok_or_else(|| LedgerError::InvariantViolation(format!("Withdrawal #{} vanished", pending.id)))?;
                warn!(
                    "💰️ Payout for withdrawal #{} failed ({reason}). {amount} returned to wallet #{wallet}",
                    failed.id
                );
                failed
            },
        };
        tx.commit().await?;
        Ok(result)
    }

    async fn mark_payout_paid(&self, payout_ref: &str) -> Result<SettlementOutcome, LedgerError> {
        let mut tx = self.pool.begin().await?;
        let withdrawal = transactions::fetch_by_provider_ref(payout_ref, TransactionType::Withdraw, &mut tx)
            .await?
            .ok_or_else(|| LedgerError::UnknownProviderRef {
                tx_type: TransactionType::Withdraw.to_string(),
                reference: payout_ref.to_string(),
            })?;
        let outcome = match (withdrawal.status, withdrawal.metadata.payout_status.as_deref()) {
            (TransactionStatus::Completed, Some("paid")) => SettlementOutcome::AlreadyApplied(withdrawal),
            (TransactionStatus::Completed, Some("failed")) => SettlementOutcome::Ignored {
                transaction: withdrawal,
                reason: "The payout has already been reported as failed".to_string(),
            },
            (TransactionStatus::Completed, _) => {
                let updated = transactions::set_metadata_field(withdrawal.id, "payout_status", "paid", &mut tx).await?;
                debug!("💰️ Payout {payout_ref} for withdrawal #{} has arrived", updated.id);
                SettlementOutcome::Applied(updated)
            },
            (status, _) => SettlementOutcome::Ignored {
                transaction: withdrawal,
                reason: format!("The withdrawal is {status}"),
            },
        };
        tx.commit().await?;
        Ok(outcome)
    }

    async fn compensate_failed_payout(
        &self,
        payout_ref: &str,
        reason: &str,
    ) -> Result<SettlementOutcome, LedgerError> {
        let mut tx = self.pool.begin().await?;
        let withdrawal = transactions::fetch_by_provider_ref(payout_ref, TransactionType::Withdraw, &mut tx)
            .await?
            .ok_or_else(|| LedgerError::UnknownProviderRef {
                tx_type: TransactionType::Withdraw.to_string(),
                reference: payout_ref.to_string(),
            })?;
        if withdrawal.status != TransactionStatus::Completed {
            let reason = format!("The withdrawal is {}, so its funds were never paid out", withdrawal.status);
            return Ok(SettlementOutcome::Ignored { transaction: withdrawal, reason });
        }
        let amount = withdrawal.amount.abs();
        let metadata = TxMetadata {
            failure_reason: Some(reason.to_string()),
            note: Some(format!("Payout {payout_ref} failed")),
            ..Default::default()
        };
        let refund = NewWalletTransaction::new(
            withdrawal.wallet_id,
            TransactionType::Refund,
            amount,
            TransactionStatus::Completed,
        )
        .related_to(withdrawal.id)
        .with_metadata(metadata);
        let refund = match transactions::insert(refund, &mut tx).await {
            Ok(refund) => refund,
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                let existing = transactions::fetch_refund_of(withdrawal.id, withdrawal.wallet_id, &mut tx)
                    .await?
                    .ok_or_else(|| LedgerError::InvariantViolation("Refund conflict without a refund".into()))?;
                return Ok(SettlementOutcome::AlreadyApplied(existing));
            },
            Err(e) => return Err(e.into()),
        };
        if !wallets::credit(withdrawal.wallet_id, amount, &mut tx).await? {
            return Err(LedgerError::WalletNotFound(withdrawal.wallet_id));
        }
        transactions::set_metadata_field(withdrawal.id, "payout_status", "failed", &mut tx).await?;
        tx.commit().await?;
        warn!(
            "💰️ Payout {payout_ref} failed after it was accepted ({reason}). {amount} credited back to wallet #{}",
            withdrawal.wallet_id
        );
        Ok(SettlementOutcome::Applied(refund))
    }

    async fn hold(
        &self,
        escrow: &EscrowWallet,
        payer: WalletId,
        amount: Amount,
        booking: BookingId,
    ) -> Result<TransferReceipt, LedgerError> {
        let mut tx = self.pool.begin().await?;
        let receipt = ledger::hold(escrow, payer, amount, booking, &mut tx).await?;
        tx.commit().await?;
        Ok(receipt)
    }

    async fn release(
        &self,
        escrow: &EscrowWallet,
        booking: BookingId,
        payee: WalletId,
        amount: Amount,
    ) -> Result<TransferReceipt, LedgerError> {
        let mut tx = self.pool.begin().await?;
        let receipt = ledger::release(escrow, booking, payee, amount, &mut tx).await?;
        tx.commit().await?;
        Ok(receipt)
    }

    async fn refund(
        &self,
        escrow: &EscrowWallet,
        booking: BookingId,
        payer: WalletId,
        amount: Amount,
    ) -> Result<TransferReceipt, LedgerError> {
        let mut tx = self.pool.begin().await?;
        let receipt = ledger::refund(escrow, booking, payer, amount, &mut tx).await?;
        tx.commit().await?;
        Ok(receipt)
    }

    async fn refund_transaction(
        &self,
        escrow: &EscrowWallet,
        tx_id: TransactionId,
    ) -> Result<TransferReceipt, LedgerError> {
        let mut tx = self.pool.begin().await?;
        let spend =
            transactions::fetch_transaction(tx_id, &mut tx).await?.ok_or(LedgerError::TransactionNotFound(tx_id))?;
        let booking = match spend.booking_id {
            Some(id) => bookings::fetch_booking(id, &mut tx).await?,
            None => None,
        };
        if let Some(b) = booking.as_ref().filter(|b| b.status == BookingStatus::Completed) {
            return Err(LedgerError::NotRefundable {
                id: tx_id,
                reason: format!("Booking #{} has been completed and its funds belong to the traveler", b.id),
            });
        }
        let receipt = ledger::refund_spend(escrow, tx_id, &mut tx).await?;
        if let Some(booking) = booking {
            cancel_refunded_booking(&booking, &mut tx).await?;
            bookings::set_payment_status(booking.id, PaymentStatus::Refunded, &mut tx).await?;
        }
        tx.commit().await?;
        Ok(receipt)
    }

    async fn audit_ledger(&self) -> Result<LedgerAudit, LedgerError> {
        // One read transaction, so that every figure comes from the same snapshot.
        let mut tx = self.pool.begin().await?;
        let wallets: Vec<WalletAudit> = sqlx::query_as(
            r#"
            SELECT w.id AS wallet_id, w.role, w.owner_id, w.balance,
                COALESCE((
                    SELECT SUM(t.amount) FROM wallet_transactions t
                    WHERE t.wallet_id = w.id
                      AND (t.status = 'COMPLETED' OR (t.status = 'PENDING' AND t.tx_type = 'WITHDRAW'))
                ), 0) AS projected
            FROM wallets w
            ORDER BY w.id;
            "#,
        )
        .fetch_all(&mut *tx)
        .await?;
        let outstanding_holds: Amount = sqlx::query_scalar(
            "SELECT COALESCE(SUM(amount), 0) FROM wallet_transactions WHERE tx_type = 'HOLD' AND settled_at IS NULL",
        )
        .fetch_one(&mut *tx)
        .await?;
        let escrow_balance = wallets::fetch_central_wallet(&mut tx).await?.map(|w| w.balance).unwrap_or_default();
        tx.commit().await?;
        let audit = LedgerAudit { wallets, escrow_balance, outstanding_holds };
        for w in audit.inconsistent_wallets() {
            error!("💰️ Wallet #{} has a balance of {} but its log adds up to {}", w.wallet_id, w.balance, w.projected);
        }
        Ok(audit)
    }
}

/// Classifies a record that a compare-and-set status update did not match.
fn settled_elsewhere(existing: WalletTransaction, target: TransactionStatus) -> SettlementOutcome {
    if existing.tx_type != TransactionType::Deposit {
        let reason = format!("Transaction #{} is a {}, not a deposit", existing.id, existing.tx_type);
        SettlementOutcome::Ignored { transaction: existing, reason }
    } else if existing.status == target {
        SettlementOutcome::AlreadyApplied(existing)
    } else {
        let reason = format!("Deposit #{} is already {}", existing.id, existing.status);
        SettlementOutcome::Ignored { transaction: existing, reason }
    }
}

//--------------------------------------       Bookings        -------------------------------------------------------
impl BookingManagement for SqliteDatabase {
    async fn insert_booking(&self, booking: NewBooking) -> Result<Booking, BookingError> {
        if !booking.amount.is_positive() {
            return Err(BookingError::InvalidAmount(booking.amount));
        }
        let mut tx = self.pool.begin().await?;
        let travel = catalog::fetch_travel(&booking.travel_id, &mut tx)
            .await?
            .ok_or_else(|| BookingError::TravelNotFound(booking.travel_id.clone()))?;
        let package = catalog::fetch_package(&booking.package_id, &mut tx)
            .await?
            .ok_or_else(|| BookingError::PackageNotFound(booking.package_id.clone()))?;
        if package.user_id != booking.owner_id {
            return Err(BookingError::NotPackageOwner);
        }
        if travel.user_id == booking.owner_id {
            return Err(BookingError::SelfBooking);
        }
        let owner = Actor::new(booking.owner_id.clone(), crate::db_types::ActorRole::Owner);
        let booking = bookings::insert_booking(booking, &travel.user_id, &mut tx).await?;
        bookings::record_event(booking.id, None, booking.status, &owner, None, &mut tx).await?;
        tx.commit().await?;
        debug!(
            "📦️ Booking #{} created for travel {} and package {}",
            booking.id, booking.travel_id, booking.package_id
        );
        Ok(booking)
    }

    async fn fetch_booking(&self, id: BookingId) -> Result<Option<Booking>, BookingError> {
        let mut conn = self.pool.acquire().await?;
        Ok(bookings::fetch_booking(id, &mut conn).await?)
    }

    async fn fetch_booking_by_payment_intent(&self, intent_id: &str) -> Result<Option<Booking>, BookingError> {
        let mut conn = self.pool.acquire().await?;
        Ok(bookings::fetch_booking_by_payment_intent(intent_id, &mut conn).await?)
    }

    async fn fetch_bookings_for_user(&self, user: &UserId) -> Result<Vec<Booking>, BookingError> {
        let mut conn = self.pool.acquire().await?;
        Ok(bookings::fetch_bookings_for_user(user, &mut conn).await?)
    }

    async fn attach_payment_intent(&self, id: BookingId, intent_id: &str) -> Result<Booking, BookingError> {
        let mut tx = self.pool.begin().await?;
        let booking = match bookings::attach_payment_intent(id, intent_id, &mut tx).await? {
            Some(booking) => booking,
            None => {
                let booking = bookings::fetch_booking(id, &mut tx).await?.ok_or(BookingError::BookingNotFound(id))?;
                return Err(BookingError::InvalidTransition { action: BookingAction::Fund, status: booking.status });
            },
        };
        tx.commit().await?;
        debug!("📦️ Booking #{id} is awaiting payment intent {intent_id}");
        Ok(booking)
    }

    async fn mark_payment_failed(&self, id: BookingId, reason: &str) -> Result<Booking, BookingError> {
        let mut tx = self.pool.begin().await?;
        let booking = match bookings::mark_payment_failed(id, &mut tx).await? {
            Some(booking) => {
                info!("📦️ Payment for booking #{id} failed: {reason}");
                booking
            },
            None => {
                let booking = bookings::fetch_booking(id, &mut tx).await?.ok_or(BookingError::BookingNotFound(id))?;
                debug!("📦️ Ignoring a payment failure for booking #{id}, which is {} ({reason})", booking.status);
                booking
            },
        };
        tx.commit().await?;
        Ok(booking)
    }

    async fn fund_booking(
        &self,
        escrow: &EscrowWallet,
        id: BookingId,
        source: FundingSource,
    ) -> Result<FundingOutcome, BookingError> {
        let mut tx = self.pool.begin().await?;
        let booking = bookings::fetch_booking(id, &mut tx).await?.ok_or(BookingError::BookingNotFound(id))?;
        if booking.currency != escrow.currency() {
            return Err(BookingError::PaymentMismatch {
                booking: id,
                reason: format!("The booking is in {}, but escrow holds {}", booking.currency, escrow.currency()),
            });
        }
        let payer = wallets::fetch_or_create_wallet(&booking.owner_id, &booking.currency, &mut tx).await?;
        let mut credited = Amount::ZERO;
        let mut intent_id = None;
        if let FundingSource::ProviderCharge { payment_intent_id, amount } = &source {
            if ledger::credit_provider_deposit(payer.id, *amount, payment_intent_id, Some(id), &mut tx).await?.is_some()
            {
                credited = *amount;
            }
            intent_id = Some(payment_intent_id.as_str());
        }
        if booking.paid {
            tx.commit().await?;
            if credited.is_positive() {
                warn!(
                    "📦️ Booking #{id} was paid for twice. The second charge of {credited} stays in the payer's wallet"
                );
            }
            return Ok(FundingOutcome::AlreadyFunded(booking));
        }
        if booking.status != BookingStatus::New {
            if matches!(source, FundingSource::Wallet) {
                return Err(BookingError::InvalidTransition { action: BookingAction::Fund, status: booking.status });
            }
            tx.commit().await?;
            warn!(
                "📦️ Booking #{id} is {} and cannot be funded. {credited} stays in the payer's wallet",
                booking.status
            );
            return Ok(FundingOutcome::NotFundable { booking, credited });
        }
        if let FundingSource::ProviderCharge { amount, .. } = &source {
            if *amount < booking.amount {
                tx.commit().await?;
                warn!(
                    "📦️ The charge of {amount} for booking #{id} does not cover its price of {}. The funds stay in \
                     the payer's wallet",
                    booking.amount
                );
                return Ok(FundingOutcome::Underfunded { booking, credited });
            }
        }
        let hold = ledger::hold(escrow, payer.id, booking.amount, id, &mut tx).await?;
        let booking = bookings::mark_funded(id, intent_id, &mut tx).await?.ok_or_else(|| {
            BookingError::ConcurrencyConflict(format!("Booking #{id} changed while it was being funded"))
        })?;
        let announcement = match announcements::insert_announcement(&booking, &mut tx).await {
            Ok(a) => a,
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                error!("📦️ Booking #{id} was unpaid, but already has an announcement request");
                return Err(BookingError::InvariantViolation(format!("Duplicate announcement for booking #{id}")));
            },
            Err(e) => return Err(e.into()),
        };
        bookings::record_event(id, Some(BookingStatus::New), booking.status, &Actor::system(), None, &mut tx).await?;
        tx.commit().await?;
        info!("📦️ Booking #{id} is funded. {} is held in escrow pending the traveler's acceptance", booking.amount);
        Ok(FundingOutcome::Funded(FundedBooking { booking, announcement, hold }))
    }

    async fn apply_transition(
        &self,
        id: BookingId,
        from: BookingStatus,
        to: BookingStatus,
        actor: &Actor,
        update: TransitionUpdate,
    ) -> Result<Booking, BookingError> {
        let mut tx = self.pool.begin().await?;
        let booking = bookings::transition(id, from, to, &update, &mut tx)
            .await?
            .ok_or_else(|| BookingError::ConcurrencyConflict(format!("Booking #{id} is no longer {from}")))?;
        let note = match &update {
            TransitionUpdate::Problem { reason } => Some(reason.clone()),
            TransitionUpdate::Reject { reason } => reason.clone(),
            TransitionUpdate::ConditionsUnmet { details } => details.clone(),
            _ => None,
        };
        if let (TransitionUpdate::ConditionsUnmet { details: Some(details) }, Some(reporter)) =
            (&update, &actor.user_id)
        {
            let report = bookings::insert_report(id, reporter, details, &mut tx).await?;
            debug!("📦️ Report #{} filed against booking #{id}", report.id);
        }
        bookings::record_event(id, Some(from), to, actor, note.as_deref(), &mut tx).await?;
        tx.commit().await?;
        debug!("📦️ Booking #{id}: {from} -> {to}");
        Ok(booking)
    }

    async fn cancel_booking(
        &self,
        escrow: &EscrowWallet,
        id: BookingId,
        from: BookingStatus,
        actor: &Actor,
        reason: Option<String>,
    ) -> Result<CancelledBooking, BookingError> {
        let mut tx = self.pool.begin().await?;
        let mut booking = bookings::cancel(id, from, actor, reason.as_deref(), &mut tx)
            .await?
            .ok_or_else(|| BookingError::ConcurrencyConflict(format!("Booking #{id} is no longer {from}")))?;
        if announcements::close_unanswered(id, &mut tx).await?.is_some() {
            debug!("📦️ Announcement for booking #{id} closed by the cancellation");
        }
        let refund = ledger::refund_outstanding(escrow, id, &mut tx).await?;
        if refund.is_some() {
            booking = bookings::set_payment_status(id, PaymentStatus::Refunded, &mut tx).await?;
        }
        bookings::record_event(id, Some(from), BookingStatus::Cancel, actor, reason.as_deref(), &mut tx).await?;
        tx.commit().await?;
        match &refund {
            Some(r) => info!("📦️ Booking #{id} cancelled by the {}. {} refunded", actor.role, r.amount()),
            None => info!("📦️ Booking #{id} cancelled by the {}", actor.role),
        }
        Ok(CancelledBooking { booking, refund })
    }

    async fn release_booking_funds(
        &self,
        escrow: &EscrowWallet,
        id: BookingId,
    ) -> Result<(Booking, TransferReceipt), BookingError> {
        let mut tx = self.pool.begin().await?;
        let booking = bookings::fetch_booking(id, &mut tx).await?.ok_or(BookingError::BookingNotFound(id))?;
        if booking.status != BookingStatus::Completed {
            return Err(BookingError::FundsNotReleasable {
                booking: id,
                reason: format!("The booking is {}, not completed", booking.status),
            });
        }
        let payee = wallets::fetch_or_create_wallet(&booking.traveler_id, &booking.currency, &mut tx).await?;
        let receipt = ledger::release(escrow, id, payee.id, booking.amount, &mut tx).await?;
        let booking = bookings::set_payment_status(id, PaymentStatus::Released, &mut tx).await?;
        tx.commit().await?;
        info!("📦️ {} released to {} for booking #{id}", receipt.amount(), booking.traveler_id);
        Ok((booking, receipt))
    }

    async fn fetch_booking_history(&self, id: BookingId) -> Result<Vec<BookingEvent>, BookingError> {
        let mut conn = self.pool.acquire().await?;
        Ok(bookings::fetch_history(id, &mut conn).await?)
    }

    async fn fetch_reports(&self, id: BookingId) -> Result<Vec<Report>, BookingError> {
        let mut conn = self.pool.acquire().await?;
        Ok(bookings::fetch_reports(id, &mut conn).await?)
    }
}

//--------------------------------------     Announcements     -------------------------------------------------------
impl AnnouncementManagement for SqliteDatabase {
    async fn fetch_announcement(&self, booking: BookingId) -> Result<Option<AnnouncementRequest>, BookingError> {
        let mut conn = self.pool.acquire().await?;
        Ok(announcements::fetch_announcement(booking, &mut conn).await?)
    }

    async fn fetch_unprocessed_announcements_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<AnnouncementRequest>, BookingError> {
        let mut conn = self.pool.acquire().await?;
        Ok(announcements::fetch_unprocessed_before(cutoff, &mut conn).await?)
    }

    async fn resolve_announcement(
        &self,
        escrow: &EscrowWallet,
        booking_id: BookingId,
        decision: AnnouncementDecision,
        actor: &Actor,
    ) -> Result<ResolvedAnnouncement, BookingError> {
        let mut tx = self.pool.begin().await?;
        let announcement = match announcements::latch(booking_id, decision, &mut tx).await? {
            Some(a) => a,
            None => {
                return match announcements::fetch_announcement(booking_id, &mut tx).await? {
                    Some(_) => Err(BookingError::AnnouncementAlreadyProcessed(booking_id)),
                    None => Err(BookingError::AnnouncementNotFound(booking_id)),
                };
            },
        };
        let (to, confirmed) = match decision {
            AnnouncementDecision::Accept => (BookingStatus::PickUp, true),
            AnnouncementDecision::Refuse | AnnouncementDecision::Expire => (BookingStatus::Declined, false),
        };
        let mut booking = match bookings::resolve_pending(booking_id, to, confirmed, &mut tx).await? {
            Some(b) => b,
            None => {
                error!(
                    "🔔️ The announcement latch for booking #{booking_id} was free, but the booking is not pending \
                     acceptance. The one-way latches are out of step."
                );
                return Err(BookingError::InvariantViolation(format!(
                    "Unprocessed announcement for booking #{booking_id}, which is not pending acceptance"
                )));
            },
        };
        let refund = if to == BookingStatus::Declined {
            let refund = ledger::refund_outstanding(escrow, booking_id, &mut tx).await?;
            if refund.is_none() {
                error!("🔔️ Booking #{booking_id} was declined, but nothing was held in escrow for it");
                return Err(BookingError::InvariantViolation(format!(
                    "Paid booking #{booking_id} has no outstanding hold"
                )));
            }
            booking = bookings::set_payment_status(booking_id, PaymentStatus::Refunded, &mut tx).await?;
            refund
        } else {
            None
        };
        let note = match decision {
            AnnouncementDecision::Expire => Some("The traveler did not respond in time"),
            _ => None,
        };
        bookings::record_event(booking_id, Some(BookingStatus::PendingAcceptance), to, actor, note, &mut tx).await?;
        tx.commit().await?;
        debug!("🔔️ Announcement for booking #{booking_id} resolved: {decision:?}");
        Ok(ResolvedAnnouncement { booking, announcement, refund })
    }
}

//--------------------------------------       Catalog         -------------------------------------------------------
impl CatalogManagement for SqliteDatabase {
    async fn upsert_travel(&self, id: &TravelId, user: &UserId) -> Result<Travel, BookingError> {
        let mut conn = self.pool.acquire().await?;
        Ok(catalog::upsert_travel(id, user, &mut conn).await?)
    }

    async fn upsert_package(&self, id: &PackageId, user: &UserId) -> Result<Package, BookingError> {
        let mut conn = self.pool.acquire().await?;
        Ok(catalog::upsert_package(id, user, &mut conn).await?)
    }

    async fn fetch_travel(&self, id: &TravelId) -> Result<Option<Travel>, BookingError> {
        let mut conn = self.pool.acquire().await?;
        Ok(catalog::fetch_travel(id, &mut conn).await?)
    }

    async fn fetch_package(&self, id: &PackageId) -> Result<Option<Package>, BookingError> {
        let mut conn = self.pool.acquire().await?;
        Ok(catalog::fetch_package(id, &mut conn).await?)
    }
}

//--------------------------------------   Processed webhooks  -------------------------------------------------------
impl ProcessedEventLog for SqliteDatabase {
    async fn fetch_processed_event(&self, event_id: &str) -> Result<Option<ProcessedEvent>, ReconciliationError> {
        let mut conn = self.pool.acquire().await?;
        Ok(processed_events::fetch(event_id, &mut conn).await?)
    }

    async fn record_processed_event(
        &self,
        event_id: &str,
        event_type: &str,
        outcome: &str,
    ) -> Result<bool, ReconciliationError> {
        let mut conn = self.pool.acquire().await?;
        Ok(processed_events::record(event_id, event_type, outcome, &mut conn).await?)
    }
}

/// A booking whose SPEND is refunded directly cannot carry on unpaid. It is cancelled by the system and its
/// announcement, if still open, is closed in the caller's transaction.
async fn cancel_refunded_booking(booking: &Booking, conn: &mut SqliteConnection) -> Result<(), LedgerError> {
    const REASON: &str = "Payment refunded";
    if booking.status.is_terminal() {
        // Completed is refused earlier. Cancelled and declined bookings have no hold left to refund.
        return Ok(());
    }
    let id = booking.id;
    let from = booking.status;
    let actor = Actor::system();
    bookings::cancel(id, from, &actor, Some(REASON), &mut *conn)
        .await?
        .ok_or_else(|| LedgerError::ConcurrencyConflict(format!("Booking #{id} is no longer {from}")))?;
    announcements::close_unanswered(id, &mut *conn).await?;
    bookings::record_event(id, Some(from), BookingStatus::Cancel, &actor, Some(REASON), &mut *conn).await?;
    info!("📦️ Booking #{id} cancelled because its payment was refunded");
    Ok(())
}
