use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use crate::traits::{
    ChargeRequest,
    ChargeStatus,
    PaymentProvider,
    PayoutRequest,
    ProviderCharge,
    ProviderError,
    ProviderPayout,
};

#[derive(Debug, Default)]
struct FakeState {
    next_id: u64,
    charges: HashMap<String, ProviderCharge>,
    charge_keys: HashMap<String, String>,
    payouts: Vec<(ProviderPayout, PayoutRequest)>,
    payout_keys: HashMap<String, String>,
    charge_error: Option<ProviderError>,
    payout_error: Option<ProviderError>,
}

impl FakeState {
    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}_{:04}", self.next_id)
    }
}

/// An in-memory payment provider. Charges are created `pending` and stay that way until a test settles them with
/// [`Self::settle_charge`]. Idempotency keys behave like the real thing: a repeated key returns the original object.
#[derive(Debug, Clone, Default)]
pub struct FakePaymentProvider {
    state: Arc<Mutex<FakeState>>,
}

impl FakePaymentProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every subsequent charge request fails with `error`. `None` restores normal behaviour.
    pub fn fail_charges_with(&self, error: Option<ProviderError>) {
        self.state.lock().unwrap().charge_error = error;
    }

    /// Every subsequent payout request fails with `error`. `None` restores normal behaviour.
    pub fn fail_payouts_with(&self, error: Option<ProviderError>) {
        self.state.lock().unwrap().payout_error = error;
    }

    pub fn charge(&self, id: &str) -> Option<ProviderCharge> {
        self.state.lock().unwrap().charges.get(id).cloned()
    }

    /// Moves a charge to `status`, as if the payer had completed (or abandoned) the payment.
    pub fn settle_charge(&self, id: &str, status: ChargeStatus) -> Option<ProviderCharge> {
        let mut state = self.state.lock().unwrap();
        let charge = state.charges.get_mut(id)?;
        charge.status = status;
        if matches!(status, ChargeStatus::Failed | ChargeStatus::Canceled) {
            charge.failure_reason = Some("card_declined".to_string());
        }
        Some(charge.clone())
    }

    pub fn charge_count(&self) -> usize {
        self.state.lock().unwrap().charges.len()
    }

    pub fn payouts(&self) -> Vec<(ProviderPayout, PayoutRequest)> {
        self.state.lock().unwrap().payouts.clone()
    }
}

impl PaymentProvider for FakePaymentProvider {
    async fn create_charge(&self, request: ChargeRequest) -> Result<ProviderCharge, ProviderError> {
        let mut state = self.state.lock().unwrap();
        if let Some(e) = state.charge_error.clone() {
            return Err(e);
        }
        if let Some(id) = state.charge_keys.get(&request.idempotency_key) {
            if let Some(charge) = state.charges.get(id) {
                return Ok(charge.clone());
            }
        }
        let id = state.next_id("pi");
        let charge = ProviderCharge {
            id: id.clone(),
            amount: request.amount,
            currency: request.currency,
            status: ChargeStatus::Pending,
            client_secret: Some(format!("{id}_secret")),
            purpose: Some(request.purpose),
            failure_reason: None,
        };
        state.charge_keys.insert(request.idempotency_key, id.clone());
        state.charges.insert(id, charge.clone());
        Ok(charge)
    }

    async fn retrieve_charge(&self, id: &str) -> Result<ProviderCharge, ProviderError> {
        self.charge(id).ok_or_else(|| ProviderError::Rejected(format!("No such payment intent: {id}")))
    }

    async fn create_payout(&self, request: PayoutRequest) -> Result<ProviderPayout, ProviderError> {
        let mut state = self.state.lock().unwrap();
        if let Some(e) = state.payout_error.clone() {
            return Err(e);
        }
        if let Some(id) = state.payout_keys.get(&request.idempotency_key) {
            if let Some((payout, _)) = state.payouts.iter().find(|(p, _)| &p.id == id) {
                return Ok(payout.clone());
            }
        }
        let id = state.next_id("po");
        let payout = ProviderPayout { id: id.clone(), amount: request.amount, status: "pending".to_string() };
        state.payout_keys.insert(request.idempotency_key.clone(), id);
        state.payouts.push((payout.clone(), request));
        Ok(payout)
    }
}
