use std::env;

use escrow_common::Secret;
use log::*;

const DEFAULT_API_URL: &str = "https://api.sandbox.payments.example.com";
const DEFAULT_WEBHOOK_TOLERANCE_SECS: i64 = 300;

#[derive(Debug, Clone)]
pub struct ProviderConfig {
    /// Base URL of the provider's REST API, without a trailing slash.
    pub api_url: String,
    pub api_key: Secret<String>,
    /// Shared secret used to sign webhook deliveries.
    pub webhook_secret: Secret<String>,
    /// Deliveries with a signature timestamp further than this from "now" are rejected.
    pub webhook_tolerance_secs: i64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            api_key: Secret::default(),
            webhook_secret: Secret::default(),
            webhook_tolerance_secs: DEFAULT_WEBHOOK_TOLERANCE_SECS,
        }
    }
}

impl ProviderConfig {
    pub fn new_from_env_or_default() -> Self {
        let api_url = env::var("ESC_PROVIDER_API_URL").unwrap_or_else(|_| {
            warn!("🪛️ ESC_PROVIDER_API_URL not set, using the sandbox default {DEFAULT_API_URL}");
            DEFAULT_API_URL.to_string()
        });
        let api_key = Secret::new(env::var("ESC_PROVIDER_API_KEY").unwrap_or_else(|_| {
            warn!("🪛️ ESC_PROVIDER_API_KEY not set. Calls to the payment provider will be rejected");
            String::default()
        }));
        let webhook_secret = Secret::new(env::var("ESC_WEBHOOK_SECRET").unwrap_or_else(|_| {
            error!("🪛️ ESC_WEBHOOK_SECRET is not set. No provider webhook will pass signature verification");
            String::default()
        }));
        let webhook_tolerance_secs = env::var("ESC_WEBHOOK_TOLERANCE_SECS")
            .ok()
            .and_then(|s| {
                s.parse::<i64>()
                    .map_err(|e| warn!("🪛️ Invalid value for ESC_WEBHOOK_TOLERANCE_SECS ({s}). {e}"))
                    .ok()
            })
            .unwrap_or(DEFAULT_WEBHOOK_TOLERANCE_SECS);
        Self { api_url: api_url.trim_end_matches('/').to_string(), api_key, webhook_secret, webhook_tolerance_secs }
    }
}
