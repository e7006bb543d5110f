use std::{collections::BTreeMap, fmt::Display};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::db_types::{Amount, BookingId, TransactionId, UserId};

/// The metadata key that identifies what a charge pays for.
pub const PURPOSE_KEY: &str = "purpose";
pub const WALLET_TX_KEY: &str = "wallet_tx_id";
pub const BOOKING_KEY: &str = "booking_id";

/// The engine's view of an external card/payout processor.
///
/// Implementations must be idempotent on `idempotency_key`: retrying a request with the same key returns the original
/// object rather than creating a second one.
#[allow(async_fn_in_trait)]
pub trait PaymentProvider: Clone {
    async fn create_charge(&self, request: ChargeRequest) -> Result<ProviderCharge, ProviderError>;

    async fn retrieve_charge(&self, id: &str) -> Result<ProviderCharge, ProviderError>;

    async fn create_payout(&self, request: PayoutRequest) -> Result<ProviderPayout, ProviderError>;
}

/// What a charge is paying for. Travels with the charge as provider metadata so that webhooks can be routed back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChargePurpose {
    WalletDeposit { tx_id: TransactionId },
    Booking { booking_id: BookingId },
}

impl ChargePurpose {
    pub fn to_metadata(&self) -> BTreeMap<String, String> {
        let mut meta = BTreeMap::new();
        match self {
            Self::WalletDeposit { tx_id } => {
                meta.insert(PURPOSE_KEY.to_string(), "deposit".to_string());
                meta.insert(WALLET_TX_KEY.to_string(), tx_id.to_string());
            },
            Self::Booking { booking_id } => {
                meta.insert(PURPOSE_KEY.to_string(), "booking".to_string());
                meta.insert(BOOKING_KEY.to_string(), booking_id.to_string());
            },
        }
        meta
    }

    /// Returns `None` if the metadata does not describe a charge created by this system.
    pub fn from_metadata(meta: &BTreeMap<String, String>) -> Option<Self> {
        match meta.get(PURPOSE_KEY).map(String::as_str) {
            Some("deposit") => meta.get(WALLET_TX_KEY)?.parse().ok().map(|tx_id| Self::WalletDeposit { tx_id }),
            Some("booking") => meta.get(BOOKING_KEY)?.parse().ok().map(|booking_id| Self::Booking { booking_id }),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChargeRequest {
    pub amount: Amount,
    pub currency: String,
    pub purpose: ChargePurpose,
    pub customer: UserId,
    pub idempotency_key: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChargeStatus {
    Pending,
    Succeeded,
    Failed,
    Canceled,
}

impl Display for ChargeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Canceled => "canceled",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderCharge {
    pub id: String,
    pub amount: Amount,
    pub currency: String,
    pub status: ChargeStatus,
    /// Handed to the client so that it can complete the payment with the provider directly.
    pub client_secret: Option<String>,
    pub purpose: Option<ChargePurpose>,
    pub failure_reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayoutRequest {
    pub amount: Amount,
    pub currency: String,
    pub destination: String,
    pub wallet_tx_id: TransactionId,
    pub idempotency_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderPayout {
    pub id: String,
    pub amount: Amount,
    pub status: String,
}

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    /// The provider understood the request and said no. Retrying will not help.
    #[error("The payment provider rejected the request: {0}")]
    Rejected(String),
    /// The provider could not be reached or failed internally.
    #[error("The payment provider is unavailable: {0}")]
    Unavailable(String),
}

impl ProviderError {
    pub fn reason(&self) -> &str {
        match self {
            Self::Rejected(s) | Self::Unavailable(s) => s.as_str(),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn purpose_survives_metadata() {
        let purpose = ChargePurpose::WalletDeposit { tx_id: 42 };
        let meta = purpose.to_metadata();
        assert_eq!(meta.get("purpose").unwrap(), "deposit");
        assert_eq!(ChargePurpose::from_metadata(&meta), Some(purpose));

        let purpose = ChargePurpose::Booking { booking_id: 7 };
        assert_eq!(ChargePurpose::from_metadata(&purpose.to_metadata()), Some(purpose));
    }

    #[test]
    fn foreign_metadata_is_not_a_purpose() {
        let mut meta = BTreeMap::new();
        assert_eq!(ChargePurpose::from_metadata(&meta), None);
        meta.insert("purpose".to_string(), "deposit".to_string());
        meta.insert("wallet_tx_id".to_string(), "not-a-number".to_string());
        assert_eq!(ChargePurpose::from_metadata(&meta), None);
        meta.insert("purpose".to_string(), "subscription".to_string());
        assert_eq!(ChargePurpose::from_metadata(&meta), None);
    }
}
