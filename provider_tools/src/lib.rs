//! # Payment provider tools
//!
//! Everything the escrow service needs to talk to the external card/payout processor:
//!
//! * [`ProviderConfig`] reads the endpoint, API key and webhook signing secret from the environment.
//! * [`ProviderApi`] is a thin REST client for payment intents and payouts.
//! * The wire [data objects](PaymentIntent) the provider sends back, including the [`WebhookEvent`] envelope and the
//!   typed [`EventObject`] it carries.
//! * [`signature`] computes and verifies the `Escrow-Signature` header on webhook deliveries.
mod api;
mod config;
mod data_objects;
mod error;

pub mod signature;

pub use api::ProviderApi;
pub use config::ProviderConfig;
pub use data_objects::{
    Customer,
    EventObject,
    LastPaymentError,
    NewPaymentIntent,
    NewPayout,
    PaymentIntent,
    PaymentIntentStatus,
    PaymentMethod,
    Payout,
    PayoutStatus,
    SetupIntent,
    WebhookEvent,
};
pub use error::ProviderApiError;
