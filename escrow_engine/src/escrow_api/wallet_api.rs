use std::fmt::Debug;

use log::*;

use crate::{
    db_types::{
        Amount,
        BookingId,
        EscrowWallet,
        TransactionId,
        TransactionStatus,
        UserId,
        Wallet,
        WalletId,
        WalletTransaction,
    },
    escrow_api::ledger_objects::{DepositIntent, LedgerPolicy},
    helpers::{retry_on_conflict, RetryPolicy},
    traits::{
        ChargePurpose,
        ChargeRequest,
        ChargeStatus,
        EscrowDatabase,
        LedgerAudit,
        LedgerError,
        PaymentProvider,
        PayoutAttempt,
        PayoutRequest,
        SettlementOutcome,
        TransferReceipt,
    },
};

/// `WalletApi` is the Wallet Engine: user-facing deposits and withdrawals, plus the escrow primitives for callers
/// that manage funds directly.
///
/// Minimums are enforced here. Every database operation is re-run under the [`RetryPolicy`] if it loses a race.
#[derive(Clone)]
pub struct WalletApi<B, P> {
    db: B,
    provider: P,
    escrow: EscrowWallet,
    policy: LedgerPolicy,
    retry: RetryPolicy,
}

impl<B, P> Debug for WalletApi<B, P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "WalletApi (escrow #{})", self.escrow.id())
    }
}

impl<B, P> WalletApi<B, P> {
    pub fn new(db: B, provider: P, escrow: EscrowWallet, policy: LedgerPolicy) -> Self {
        Self { db, provider, escrow, policy, retry: RetryPolicy::default() }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn escrow(&self) -> &EscrowWallet {
        &self.escrow
    }

    pub fn policy(&self) -> &LedgerPolicy {
        &self.policy
    }

    pub fn db(&self) -> &B {
        &self.db
    }
}

impl<B, P> WalletApi<B, P>
where
    B: EscrowDatabase,
    P: PaymentProvider,
{
    /// The user's wallet, created empty on first use.
    pub async fn wallet_for_user(&self, user: &UserId) -> Result<Wallet, LedgerError> {
        let currency = self.policy.currency.as_str();
        retry_on_conflict(self.retry, "fetch wallet", || self.db.fetch_or_create_wallet(user, currency)).await
    }

    pub async fn fetch_wallet(&self, id: WalletId) -> Result<Option<Wallet>, LedgerError> {
        self.db.fetch_wallet(id).await
    }

    /// The user's wallet and its transactions, newest first.
    pub async fn statement(&self, user: &UserId) -> Result<(Wallet, Vec<WalletTransaction>), LedgerError> {
        let wallet = self.wallet_for_user(user).await?;
        let history = self.db.fetch_transactions_for_wallet(wallet.id).await?;
        Ok((wallet, history))
    }

    pub async fn transactions_for_booking(&self, booking: BookingId) -> Result<Vec<WalletTransaction>, LedgerError> {
        self.db.fetch_transactions_for_booking(booking).await
    }

    /// Starts a deposit into the user's wallet.
    ///
    /// A `PENDING` DEPOSIT is recorded first, then the provider is asked for a charge that carries the record's id.
    /// The balance is only credited once the provider confirms the charge (see
    /// [`crate::ReconciliationApi`]). If the provider refuses to create the charge, the deposit is marked `FAILED`.
    pub async fn deposit(&self, user: &UserId, amount: Amount) -> Result<DepositIntent, LedgerError> {
        self.policy.check_deposit(amount)?;
        let wallet = self.wallet_for_user(user).await?;
        let pending =
            retry_on_conflict(self.retry, "begin deposit", || self.db.begin_deposit(wallet.id, amount)).await?;
        let request = ChargeRequest {
            amount,
            currency: wallet.currency.clone(),
            purpose: ChargePurpose::WalletDeposit { tx_id: pending.id },
            customer: user.clone(),
            idempotency_key: format!("deposit-{}", pending.id),
        };
        let charge = match self.provider.create_charge(request).await {
            Ok(charge) => charge,
            Err(e) => {
                warn!("💰️ The provider refused a charge for deposit #{}: {e}", pending.id);
                let reason = e.to_string();
                retry_on_conflict(self.retry, "fail deposit", || self.db.fail_deposit(pending.id, &reason)).await?;
                return Err(LedgerError::ProviderError(e.to_string()));
            },
        };
        if charge.status == ChargeStatus::Failed {
            let reason = charge.failure_reason.clone().unwrap_or_else(|| "The charge failed".to_string());
            retry_on_conflict(self.retry, "fail deposit", || self.db.fail_deposit(pending.id, &reason)).await?;
            return Err(LedgerError::ProviderError(reason));
        }
        retry_on_conflict(self.retry, "attach charge", || self.db.attach_provider_ref(pending.id, &charge.id)).await?;
        let transaction =
            self.db.fetch_transaction(pending.id).await?.ok_or(LedgerError::TransactionNotFound(pending.id))?;
        debug!("💰️ Deposit #{} of {amount} for {user} awaits charge {}", pending.id, charge.id);
        Ok(DepositIntent { transaction, payment_intent_id: charge.id, client_secret: charge.client_secret })
    }

    pub async fn confirm_deposit(&self, tx_id: TransactionId) -> Result<SettlementOutcome, LedgerError> {
        retry_on_conflict(self.retry, "confirm deposit", || self.db.confirm_deposit(tx_id)).await
    }

    pub async fn fail_deposit(&self, tx_id: TransactionId, reason: &str) -> Result<SettlementOutcome, LedgerError> {
        retry_on_conflict(self.retry, "fail deposit", || self.db.fail_deposit(tx_id, reason)).await
    }

    /// Withdraws `amount` from the user's wallet to `destination`.
    ///
    /// The debit, the payout request and its outcome are one atomic unit. If the provider refuses the payout, the
    /// debit is reversed, the WITHDRAW is recorded as `FAILED`, and [`LedgerError::ProviderError`] is returned.
    pub async fn withdraw(
        &self,
        user: &UserId,
        amount: Amount,
        destination: &str,
    ) -> Result<WalletTransaction, LedgerError> {
        self.policy.check_withdraw(amount)?;
        let wallet =
            self.db.fetch_wallet_for_user(user).await?.ok_or_else(|| LedgerError::NoWalletForUser(user.clone()))?;
        // One key for all attempts, so a retried withdrawal cannot pay out twice.
        let idempotency_key = format!("withdraw-{}-{:016x}", wallet.id, rand::random::<u64>());
        let provider = &self.provider;
        let currency = wallet.currency.as_str();
        let record = retry_on_conflict(self.retry, "withdraw", || {
            let key = idempotency_key.clone();
            self.db.withdraw(wallet.id, amount, destination, move |pending: WalletTransaction| async move {
                let request = PayoutRequest {
                    amount,
                    currency: currency.to_string(),
                    destination: destination.to_string(),
                    wallet_tx_id: pending.id,
                    idempotency_key: key,
                };
                match provider.create_payout(request).await {
                    Ok(payout) => PayoutAttempt::Accepted { payout_ref: payout.id, status: payout.status },
                    Err(e) => PayoutAttempt::Failed { reason: e.reason().to_string() },
                }
            })
        })
        .await?;
        match record.metadata.failure_reason.as_deref() {
            Some(reason) if record.status == TransactionStatus::Failed => {
                Err(LedgerError::ProviderError(reason.to_string()))
            },
            _ => Ok(record),
        }
    }

    pub async fn hold(
        &self,
        payer: WalletId,
        amount: Amount,
        booking: BookingId,
    ) -> Result<TransferReceipt, LedgerError> {
        retry_on_conflict(self.retry, "hold", || self.db.hold(&self.escrow, payer, amount, booking)).await
    }

    pub async fn release(
        &self,
        booking: BookingId,
        payee: WalletId,
        amount: Amount,
    ) -> Result<TransferReceipt, LedgerError> {
        retry_on_conflict(self.retry, "release", || self.db.release(&self.escrow, booking, payee, amount)).await
    }

    pub async fn refund(
        &self,
        booking: BookingId,
        payer: WalletId,
        amount: Amount,
    ) -> Result<TransferReceipt, LedgerError> {
        retry_on_conflict(self.retry, "refund", || self.db.refund(&self.escrow, booking, payer, amount)).await
    }

    pub async fn refund_transaction(&self, tx_id: TransactionId) -> Result<TransferReceipt, LedgerError> {
        retry_on_conflict(self.retry, "refund transaction", || self.db.refund_transaction(&self.escrow, tx_id)).await
    }

    pub async fn audit(&self) -> Result<LedgerAudit, LedgerError> {
        retry_on_conflict(self.retry, "audit", || self.db.audit_ledger()).await
    }
}
