//! Paired money movements on an open connection.
//!
//! These functions do not open transactions of their own. The caller must run them inside one, together with any
//! other writes that have to commit (or roll back) with the movement. On error the caller is expected to drop the
//! transaction; some of the writes below will already have been applied to it.
use log::*;
use sqlx::SqliteConnection;

use super::{transactions, wallets};
use crate::{
    db_types::{
        Amount,
        BookingId,
        EscrowWallet,
        NewWalletTransaction,
        TransactionStatus,
        TransactionType,
        TxMetadata,
        WalletId,
        WalletTransaction,
    },
    traits::{LedgerError, TransferReceipt},
};

fn ensure_positive(amount: Amount) -> Result<(), LedgerError> {
    if amount.is_positive() {
        Ok(())
    } else {
        Err(LedgerError::NonPositiveAmount(amount))
    }
}

/// Works out why a conditional debit was refused.
async fn explain_refused_debit(
    wallet: WalletId,
    amount: Amount,
    conn: &mut SqliteConnection,
) -> Result<LedgerError, LedgerError> {
    match wallets::fetch_wallet(wallet, conn).await? {
        None => Ok(LedgerError::WalletNotFound(wallet)),
        Some(_) => Ok(LedgerError::InsufficientFunds { wallet, requested: amount }),
    }
}

/// Debits the escrow wallet. Escrow always covers its outstanding holds, so a refusal here means the ledger is broken.
async fn debit_escrow(escrow: &EscrowWallet, amount: Amount, conn: &mut SqliteConnection) -> Result<(), LedgerError> {
    if wallets::debit(escrow.id(), amount, conn).await? {
        Ok(())
    } else {
        error!("💰️ The escrow wallet cannot cover {amount}, although a hold for it is outstanding");
        Err(LedgerError::InvariantViolation(format!("Escrow wallet cannot cover an outstanding hold of {amount}")))
    }
}

async fn credit_wallet(wallet: WalletId, amount: Amount, conn: &mut SqliteConnection) -> Result<(), LedgerError> {
    if wallets::credit(wallet, amount, conn).await? {
        Ok(())
    } else {
        Err(LedgerError::WalletNotFound(wallet))
    }
}

/// Writes a credit together with its `COMPLETED` DEPOSIT record, keyed on the provider's charge id.
///
/// Returns `None` if a deposit for `provider_ref` already exists, in which case nothing changes.
pub async fn credit_provider_deposit(
    wallet: WalletId,
    amount: Amount,
    provider_ref: &str,
    booking: Option<BookingId>,
    conn: &mut SqliteConnection,
) -> Result<Option<WalletTransaction>, LedgerError> {
    ensure_positive(amount)?;
    let mut record = NewWalletTransaction::new(wallet, TransactionType::Deposit, amount, TransactionStatus::Completed)
        .with_provider_ref(provider_ref);
    if let Some(booking) = booking {
        record = record.for_booking(booking);
    }
    let deposit = match transactions::insert(record, &mut *conn).await {
        Ok(deposit) => deposit,
        Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
            debug!("💰️ Charge {provider_ref} has already been credited");
            return Ok(None);
        },
        Err(e) => return Err(e.into()),
    };
    credit_wallet(wallet, amount, conn).await?;
    debug!("💰️ Charge {provider_ref} credited {amount} to wallet #{wallet}");
    Ok(Some(deposit))
}

/// SPEND on the payer, HOLD on escrow.
pub async fn hold(
    escrow: &EscrowWallet,
    payer: WalletId,
    amount: Amount,
    booking: BookingId,
    conn: &mut SqliteConnection,
) -> Result<TransferReceipt, LedgerError> {
    ensure_positive(amount)?;
    if !wallets::debit(payer, amount, &mut *conn).await? {
        if transactions::fetch_outstanding_hold(booking, &mut *conn).await?.is_some() {
            return Err(LedgerError::HoldAlreadyOutstanding(booking));
        }
        return Err(explain_refused_debit(payer, amount, conn).await?);
    }
    let payer_wallet =
        wallets::fetch_wallet(payer, &mut *conn).await?.ok_or(LedgerError::WalletNotFound(payer))?;
    if payer_wallet.currency != escrow.currency() {
        return Err(LedgerError::CurrencyMismatch {
            wallet: payer_wallet.currency,
            requested: escrow.currency().to_string(),
        });
    }
    credit_wallet(escrow.id(), amount, &mut *conn).await?;
    let spend = NewWalletTransaction::new(payer, TransactionType::Spend, -amount, TransactionStatus::Completed)
        .for_booking(booking);
    let spend = transactions::insert(spend, &mut *conn).await?;
    let hold = NewWalletTransaction::new(escrow.id(), TransactionType::Hold, amount, TransactionStatus::Completed)
        .for_booking(booking)
        .related_to(spend.id);
    let hold = match transactions::insert(hold, conn).await {
        Ok(hold) => hold,
        Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
            return Err(LedgerError::HoldAlreadyOutstanding(booking));
        },
        Err(e) => return Err(e.into()),
    };
    debug!("💰️ {amount} held in escrow for booking #{booking} from wallet #{payer}");
    Ok(TransferReceipt { debit: spend, credit: hold })
}

/// Settles the booking's hold and checks that it is for exactly `amount`.
async fn take_hold(
    booking: BookingId,
    amount: Amount,
    conn: &mut SqliteConnection,
) -> Result<WalletTransaction, LedgerError> {
    ensure_positive(amount)?;
    let hold = transactions::settle_hold(booking, conn).await?.ok_or(LedgerError::NoOutstandingHold(booking))?;
    if hold.amount != amount {
        return Err(LedgerError::HoldAmountMismatch { booking, held: hold.amount, requested: amount });
    }
    Ok(hold)
}

/// RELEASE on escrow, DEPOSIT on the payee.
pub async fn release(
    escrow: &EscrowWallet,
    booking: BookingId,
    payee: WalletId,
    amount: Amount,
    conn: &mut SqliteConnection,
) -> Result<TransferReceipt, LedgerError> {
    let hold = take_hold(booking, amount, &mut *conn).await?;
    debit_escrow(escrow, amount, &mut *conn).await?;
    credit_wallet(payee, amount, &mut *conn).await?;
    let release =
        NewWalletTransaction::new(escrow.id(), TransactionType::Release, -amount, TransactionStatus::Completed)
            .for_booking(booking)
            .related_to(hold.id);
    let release = transactions::insert(release, &mut *conn).await?;
    let deposit = NewWalletTransaction::new(payee, TransactionType::Deposit, amount, TransactionStatus::Completed)
        .for_booking(booking)
        .related_to(release.id)
        .with_metadata(TxMetadata::with_note(format!("Escrow release for booking #{booking}")));
    let deposit = transactions::insert(deposit, conn).await?;
    debug!("💰️ {amount} released from escrow to wallet #{payee} for booking #{booking}");
    Ok(TransferReceipt { debit: release, credit: deposit })
}

/// REFUND on escrow and on the wallet the hold came from.
pub async fn refund(
    escrow: &EscrowWallet,
    booking: BookingId,
    payer: WalletId,
    amount: Amount,
    conn: &mut SqliteConnection,
) -> Result<TransferReceipt, LedgerError> {
    let hold = take_hold(booking, amount, &mut *conn).await?;
    let spend = paired_spend(&hold, &mut *conn).await?;
    if spend.wallet_id != payer {
        return Err(LedgerError::RefundWalletMismatch { booking, expected: spend.wallet_id });
    }
    refund_settled_hold(escrow, &hold, &spend, conn).await
}

/// Refunds whatever is held for the booking to the wallet it came from. `None` if nothing is held.
pub async fn refund_outstanding(
    escrow: &EscrowWallet,
    booking: BookingId,
    conn: &mut SqliteConnection,
) -> Result<Option<TransferReceipt>, LedgerError> {
    let hold = match transactions::settle_hold(booking, &mut *conn).await? {
        Some(hold) => hold,
        None => return Ok(None),
    };
    let spend = paired_spend(&hold, &mut *conn).await?;
    let receipt = refund_settled_hold(escrow, &hold, &spend, conn).await?;
    Ok(Some(receipt))
}

/// Refunds a `COMPLETED` SPEND by settling the hold it was paired with.
pub async fn refund_spend(
    escrow: &EscrowWallet,
    spend_id: i64,
    conn: &mut SqliteConnection,
) -> Result<TransferReceipt, LedgerError> {
    let hold = transactions::settle_hold_for_spend(spend_id, &mut *conn).await?;
    let spend =
        transactions::fetch_transaction(spend_id, &mut *conn).await?.ok_or(LedgerError::TransactionNotFound(spend_id))?;
    let not_refundable = |reason: &str| LedgerError::NotRefundable { id: spend_id, reason: reason.to_string() };
    if spend.tx_type != TransactionType::Spend {
        return Err(not_refundable(&format!("Only SPEND transactions can be refunded, not {}", spend.tx_type)));
    }
    if spend.status != TransactionStatus::Completed {
        return Err(not_refundable(&format!("The transaction is {}", spend.status)));
    }
    let hold = hold.ok_or_else(|| not_refundable("The funds have already been released or refunded"))?;
    refund_settled_hold(escrow, &hold, &spend, conn).await
}

async fn paired_spend(hold: &WalletTransaction, conn: &mut SqliteConnection) -> Result<WalletTransaction, LedgerError> {
    let spend = match hold.related_tx_id {
        Some(id) => transactions::fetch_transaction(id, conn).await?,
        None => None,
    };
    spend.ok_or_else(|| {
        error!("💰️ Hold #{} is not paired with a SPEND", hold.id);
        LedgerError::InvariantViolation(format!("Hold #{} is not paired with a SPEND", hold.id))
    })
}

async fn refund_settled_hold(
    escrow: &EscrowWallet,
    hold: &WalletTransaction,
    spend: &WalletTransaction,
    conn: &mut SqliteConnection,
) -> Result<TransferReceipt, LedgerError> {
    let amount = hold.amount;
    let payer = spend.wallet_id;
    debit_escrow(escrow, amount, &mut *conn).await?;
    credit_wallet(payer, amount, &mut *conn).await?;
    let mut out = NewWalletTransaction::new(escrow.id(), TransactionType::Refund, -amount, TransactionStatus::Completed)
        .related_to(hold.id);
    let mut back = NewWalletTransaction::new(payer, TransactionType::Refund, amount, TransactionStatus::Completed)
        .related_to(spend.id);
    if let Some(booking) = hold.booking_id {
        out = out.for_booking(booking);
        back = back.for_booking(booking);
    }
    let out = transactions::insert(out, &mut *conn).await?;
    let back = transactions::insert(back, conn).await?;
    debug!("💰️ {amount} refunded from escrow to wallet #{payer} (hold #{})", hold.id);
    Ok(TransferReceipt { debit: out, credit: back })
}
