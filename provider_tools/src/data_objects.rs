use std::{collections::BTreeMap, fmt::Display};

use chrono::{DateTime, TimeZone, Utc};
use escrow_common::Amount;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;

use crate::ProviderApiError;

pub type Metadata = BTreeMap<String, String>;

//--------------------------------------   Payment intents   ---------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentIntentStatus {
    RequiresPaymentMethod,
    RequiresConfirmation,
    RequiresAction,
    Processing,
    Succeeded,
    Canceled,
    #[serde(other)]
    Unknown,
}

impl Display for PaymentIntentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::RequiresPaymentMethod => "requires_payment_method",
            Self::RequiresConfirmation => "requires_confirmation",
            Self::RequiresAction => "requires_action",
            Self::Processing => "processing",
            Self::Succeeded => "succeeded",
            Self::Canceled => "canceled",
            Self::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastPaymentError {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentIntent {
    pub id: String,
    pub amount: Amount,
    pub currency: String,
    pub status: PaymentIntentStatus,
    #[serde(default)]
    pub client_secret: Option<String>,
    #[serde(default)]
    pub customer: Option<String>,
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default)]
    pub last_payment_error: Option<LastPaymentError>,
    #[serde(default)]
    pub created: Option<i64>,
}

impl PaymentIntent {
    pub fn failure_reason(&self) -> String {
        self.last_payment_error
            .as_ref()
            .and_then(|e| e.message.clone().or_else(|| e.code.clone()))
            .unwrap_or_else(|| format!("payment intent is {}", self.status))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewPaymentIntent {
    pub amount: Amount,
    pub currency: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub metadata: Metadata,
}

//--------------------------------------        Payouts        -------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayoutStatus {
    Pending,
    InTransit,
    Paid,
    Failed,
    Canceled,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payout {
    pub id: String,
    pub amount: Amount,
    pub currency: String,
    pub status: PayoutStatus,
    #[serde(default)]
    pub destination: Option<String>,
    #[serde(default)]
    pub failure_code: Option<String>,
    #[serde(default)]
    pub failure_message: Option<String>,
    #[serde(default)]
    pub metadata: Metadata,
}

impl Payout {
    pub fn failure_reason(&self) -> String {
        self.failure_message
            .clone()
            .or_else(|| self.failure_code.clone())
            .unwrap_or_else(|| "payout failed without a reason".to_string())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewPayout {
    pub amount: Amount,
    pub currency: String,
    pub destination: String,
    pub metadata: Metadata,
}

//--------------------------------------  Card / identity side objects  ----------------------------------------------
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetupIntent {
    pub id: String,
    #[serde(default)]
    pub customer: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentMethod {
    pub id: String,
    #[serde(default)]
    pub customer: Option<String>,
    #[serde(rename = "type", default)]
    pub method_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Customer {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
}

//--------------------------------------     Webhook events    -------------------------------------------------------
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventData {
    pub object: Value,
}

/// The envelope of every webhook delivery. The concrete payload is only interpreted via [`WebhookEvent::object`],
/// which dispatches strictly on `event_type`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub created: Option<i64>,
    pub data: EventData,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventObject {
    PaymentIntentSucceeded(PaymentIntent),
    PaymentIntentFailed(PaymentIntent),
    PayoutPaid(Payout),
    PayoutFailed(Payout),
    SetupIntent(SetupIntent),
    PaymentMethod(PaymentMethod),
    Customer(Customer),
    Unsupported(String),
}

impl WebhookEvent {
    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created.and_then(|t| Utc.timestamp_opt(t, 0).single())
    }

    pub fn object(&self) -> Result<EventObject, ProviderApiError> {
        let obj = match self.event_type.as_str() {
            "payment_intent.succeeded" => EventObject::PaymentIntentSucceeded(self.parse()?),
            "payment_intent.payment_failed" | "payment_intent.canceled" => {
                EventObject::PaymentIntentFailed(self.parse()?)
            },
            "payout.paid" => EventObject::PayoutPaid(self.parse()?),
            "payout.failed" | "payout.canceled" => EventObject::PayoutFailed(self.parse()?),
            "setup_intent.succeeded" | "setup_intent.setup_failed" => EventObject::SetupIntent(self.parse()?),
            "payment_method.attached" | "payment_method.detached" => EventObject::PaymentMethod(self.parse()?),
            "customer.created" | "customer.updated" | "customer.deleted" => EventObject::Customer(self.parse()?),
            other => EventObject::Unsupported(other.to_string()),
        };
        Ok(obj)
    }

    fn parse<T: DeserializeOwned>(&self) -> Result<T, ProviderApiError> {
        serde_json::from_value(self.data.object.clone()).map_err(|e| ProviderApiError::MalformedEvent {
            event_id: self.id.clone(),
            event_type: self.event_type.clone(),
            reason: e.to_string(),
        })
    }
}
