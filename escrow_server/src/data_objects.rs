use std::fmt::Display;

use escrow_engine::{
    db_types::{ActorRole, Amount, Booking, UserId, Wallet, WalletTransaction},
    traits::ProviderCharge,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonResponse {
    pub success: bool,
    pub message: String,
}

impl JsonResponse {
    pub fn success<S: Display>(message: S) -> Self {
        Self { success: true, message: message.to_string() }
    }

    pub fn failure<S: Display>(message: S) -> Self {
        Self { success: false, message: message.to_string() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletStatement {
    pub wallet: Wallet,
    pub transactions: Vec<WalletTransaction>,
}

/// A booking as seen by one of its participants.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookingView {
    pub booking: Booking,
    pub role: ActorRole,
}

/// What the client needs to complete a booking payment with the provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckoutResponse {
    pub booking: Booking,
    pub payment_intent_id: String,
    pub client_secret: Option<String>,
    pub amount: Amount,
}

impl CheckoutResponse {
    pub fn new(booking: Booking, charge: ProviderCharge) -> Self {
        Self { booking, payment_intent_id: charge.id, client_secret: charge.client_secret, amount: charge.amount }
    }
}

/// Sent by the listing service whenever a travel or package is published or changes hands.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogUpsert {
    pub id: String,
    pub user_id: UserId,
}
