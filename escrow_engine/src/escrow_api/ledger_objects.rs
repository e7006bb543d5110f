use serde::{Deserialize, Serialize};

use crate::{
    db_types::{Amount, WalletTransaction},
    traits::LedgerError,
};

/// Deployment-wide limits the wallet engine enforces before touching the database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerPolicy {
    pub currency: String,
    pub min_deposit: Amount,
    pub min_withdraw: Amount,
}

impl Default for LedgerPolicy {
    fn default() -> Self {
        Self {
            currency: escrow_common::DEFAULT_CURRENCY.to_string(),
            min_deposit: Amount::from(500),
            min_withdraw: Amount::from(1000),
        }
    }
}

impl LedgerPolicy {
    pub fn check_deposit(&self, amount: Amount) -> Result<(), LedgerError> {
        check_minimum("deposit", amount, self.min_deposit)
    }

    pub fn check_withdraw(&self, amount: Amount) -> Result<(), LedgerError> {
        check_minimum("withdrawal", amount, self.min_withdraw)
    }
}

fn check_minimum(operation: &'static str, amount: Amount, minimum: Amount) -> Result<(), LedgerError> {
    if !amount.is_positive() {
        return Err(LedgerError::NonPositiveAmount(amount));
    }
    if amount < minimum {
        return Err(LedgerError::BelowMinimum { operation, amount, minimum });
    }
    Ok(())
}

/// A pending deposit together with what the client needs to complete the charge with the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepositIntent {
    pub transaction: WalletTransaction,
    pub payment_intent_id: String,
    pub client_secret: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DepositRequest {
    pub amount: Amount,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WithdrawRequest {
    pub amount: Amount,
    pub destination: String,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn minimums() {
        let policy = LedgerPolicy::default();
        assert!(policy.check_deposit(Amount::from(500)).is_ok());
        assert!(matches!(policy.check_deposit(Amount::from(499)), Err(LedgerError::BelowMinimum { .. })));
        assert!(matches!(policy.check_withdraw(Amount::from(0)), Err(LedgerError::NonPositiveAmount(_))));
        assert!(matches!(policy.check_withdraw(Amount::from(-5000)), Err(LedgerError::NonPositiveAmount(_))));
        assert!(policy.check_withdraw(Amount::from(1000)).is_ok());
    }
}
