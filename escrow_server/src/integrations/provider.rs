//! Glue between the provider REST client and the engine.
//!
//! [`ProviderGateway`] lets the engine create charges and payouts without knowing anything about the provider's wire
//! format, and [`payment_event_from_webhook`] reduces a webhook delivery to the [`PaymentEvent`] the reconciliation
//! adapter understands.
use std::collections::BTreeMap;

use escrow_engine::{
    traits::{
        ChargePurpose,
        ChargeRequest,
        ChargeStatus,
        PaymentProvider,
        PayoutRequest,
        ProviderCharge,
        ProviderError,
        ProviderPayout,
        WALLET_TX_KEY,
    },
    PaymentEvent,
    PaymentEventKind,
};
use log::*;
use provider_tools::{
    EventObject,
    NewPaymentIntent,
    NewPayout,
    PaymentIntent,
    PaymentIntentStatus,
    ProviderApi,
    ProviderApiError,
    ProviderConfig,
    WebhookEvent,
};

#[derive(Clone)]
pub struct ProviderGateway {
    api: ProviderApi,
}

impl ProviderGateway {
    pub fn new(config: ProviderConfig) -> Result<Self, ProviderApiError> {
        let api = ProviderApi::new(config)?;
        Ok(Self { api })
    }
}

impl PaymentProvider for ProviderGateway {
    async fn create_charge(&self, request: ChargeRequest) -> Result<ProviderCharge, ProviderError> {
        let intent = NewPaymentIntent {
            amount: request.amount,
            currency: request.currency.to_lowercase(),
            customer: Some(request.customer.to_string()),
            description: Some(describe(&request.purpose)),
            metadata: request.purpose.to_metadata(),
        };
        let intent =
            self.api.create_payment_intent(intent, &request.idempotency_key).await.map_err(provider_error)?;
        Ok(charge_from_intent(intent))
    }

    async fn retrieve_charge(&self, id: &str) -> Result<ProviderCharge, ProviderError> {
        let intent = self.api.retrieve_payment_intent(id).await.map_err(provider_error)?;
        Ok(charge_from_intent(intent))
    }

    async fn create_payout(&self, request: PayoutRequest) -> Result<ProviderPayout, ProviderError> {
        let mut metadata = BTreeMap::new();
        metadata.insert(WALLET_TX_KEY.to_string(), request.wallet_tx_id.to_string());
        let payout = NewPayout {
            amount: request.amount,
            currency: request.currency.to_lowercase(),
            destination: request.destination,
            metadata,
        };
        let payout = self.api.create_payout(payout, &request.idempotency_key).await.map_err(provider_error)?;
        let status = serde_json::to_value(payout.status)
            .ok()
            .and_then(|v| v.as_str().map(String::from))
            .unwrap_or_else(|| "unknown".to_string());
        Ok(ProviderPayout { id: payout.id, amount: payout.amount, status })
    }
}

fn describe(purpose: &ChargePurpose) -> String {
    match purpose {
        ChargePurpose::WalletDeposit { tx_id } => format!("Wallet deposit #{tx_id}"),
        ChargePurpose::Booking { booking_id } => format!("Payment for booking #{booking_id}"),
    }
}

fn provider_error(e: ProviderApiError) -> ProviderError {
    if e.is_transient() {
        warn!("💳️ The payment provider could not be reached. {e}");
        ProviderError::Unavailable(e.to_string())
    } else {
        debug!("💳️ The payment provider refused the request. {e}");
        ProviderError::Rejected(e.to_string())
    }
}

pub fn charge_status(intent: &PaymentIntent) -> ChargeStatus {
    match intent.status {
        PaymentIntentStatus::Succeeded => ChargeStatus::Succeeded,
        PaymentIntentStatus::Canceled => ChargeStatus::Canceled,
        // The provider sends a declined card back to "requires payment method" with the decline attached
        PaymentIntentStatus::RequiresPaymentMethod if intent.last_payment_error.is_some() => ChargeStatus::Failed,
        _ => ChargeStatus::Pending,
    }
}

pub fn charge_from_intent(intent: PaymentIntent) -> ProviderCharge {
    let status = charge_status(&intent);
    let failure_reason =
        matches!(status, ChargeStatus::Failed | ChargeStatus::Canceled).then(|| intent.failure_reason());
    ProviderCharge {
        purpose: ChargePurpose::from_metadata(&intent.metadata),
        id: intent.id,
        amount: intent.amount,
        currency: intent.currency.to_uppercase(),
        status,
        client_secret: intent.client_secret,
        failure_reason,
    }
}

/// Converts a webhook delivery into a [`PaymentEvent`]. Event types the ledger does not act on become
/// [`PaymentEventKind::Informational`], so that they are still recorded as seen.
pub fn payment_event_from_webhook(event: &WebhookEvent) -> Result<PaymentEvent, ProviderApiError> {
    let kind = match event.object()? {
        EventObject::PaymentIntentSucceeded(intent) => PaymentEventKind::ChargeSucceeded {
            purpose: ChargePurpose::from_metadata(&intent.metadata),
            charge_id: intent.id,
            amount: intent.amount,
        },
        EventObject::PaymentIntentFailed(intent) => PaymentEventKind::ChargeFailed {
            purpose: ChargePurpose::from_metadata(&intent.metadata),
            reason: intent.failure_reason(),
            charge_id: intent.id,
        },
        EventObject::PayoutPaid(payout) => PaymentEventKind::PayoutPaid { payout_id: payout.id },
        EventObject::PayoutFailed(payout) => {
            PaymentEventKind::PayoutFailed { reason: payout.failure_reason(), payout_id: payout.id }
        },
        EventObject::SetupIntent(_) |
        EventObject::PaymentMethod(_) |
        EventObject::Customer(_) |
        EventObject::Unsupported(_) => PaymentEventKind::Informational { event_type: event.event_type.clone() },
    };
    Ok(PaymentEvent { event_id: event.id.clone(), kind })
}
