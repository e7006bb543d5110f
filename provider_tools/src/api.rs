use std::sync::Arc;

use log::*;
use reqwest::{
    header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE},
    Client,
    Method,
};
use serde::{de::DeserializeOwned, Serialize};

use crate::{
    config::ProviderConfig,
    data_objects::{NewPaymentIntent, NewPayout, PaymentIntent, Payout},
    ProviderApiError,
};

/// REST client for the payment provider. Cheap to clone; the underlying connection pool is shared.
#[derive(Clone)]
pub struct ProviderApi {
    config: ProviderConfig,
    client: Arc<Client>,
}

impl ProviderApi {
    pub fn new(config: ProviderConfig) -> Result<Self, ProviderApiError> {
        let mut headers = HeaderMap::with_capacity(2);
        let bearer = format!("Bearer {}", config.api_key.reveal());
        let mut val = HeaderValue::from_str(&bearer).map_err(|e| ProviderApiError::Initialization(e.to_string()))?;
        val.set_sensitive(true);
        headers.insert(AUTHORIZATION, val);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let client = Client::builder()
            .default_headers(headers)
            .build()
            .map_err(|e| ProviderApiError::Initialization(e.to_string()))?;
        Ok(Self { config, client: Arc::new(client) })
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{path}", self.config.api_url)
    }

    /// Sends a request to the provider. When `idempotency_key` is given, the provider deduplicates retries of the same
    /// logical request, so callers can safely re-send after a timeout.
    pub async fn rest_query<T: DeserializeOwned, B: Serialize>(
        &self,
        method: Method,
        path: &str,
        body: Option<B>,
        idempotency_key: Option<&str>,
    ) -> Result<T, ProviderApiError> {
        let url = self.url(path);
        trace!("💳️ Sending REST query: {method} {url}");
        let mut req = self.client.request(method, url);
        if let Some(key) = idempotency_key {
            req = req.header("Idempotency-Key", key);
        }
        if let Some(body) = body {
            req = req.json(&body);
        }
        let response = req.send().await.map_err(|e| ProviderApiError::RestResponseError(e.to_string()))?;
        if response.status().is_success() {
            trace!("💳️ REST query successful. {}", response.status());
            response.json::<T>().await.map_err(|e| ProviderApiError::JsonError(e.to_string()))
        } else {
            let status = response.status().as_u16();
            let message = response.text().await.map_err(|e| ProviderApiError::RestResponseError(e.to_string()))?;
            Err(ProviderApiError::QueryError { status, message })
        }
    }

    pub async fn create_payment_intent(
        &self,
        intent: NewPaymentIntent,
        idempotency_key: &str,
    ) -> Result<PaymentIntent, ProviderApiError> {
        debug!("💳️ Creating payment intent for {} {}", intent.amount, intent.currency);
        let result = self
            .rest_query::<PaymentIntent, _>(Method::POST, "/v1/payment_intents", Some(intent), Some(idempotency_key))
            .await?;
        info!("💳️ Created payment intent {} ({})", result.id, result.status);
        Ok(result)
    }

    pub async fn retrieve_payment_intent(&self, id: &str) -> Result<PaymentIntent, ProviderApiError> {
        let path = format!("/v1/payment_intents/{id}");
        debug!("💳️ Fetching payment intent {id}");
        self.rest_query::<PaymentIntent, ()>(Method::GET, &path, None, None).await
    }

    pub async fn create_payout(&self, payout: NewPayout, idempotency_key: &str) -> Result<Payout, ProviderApiError> {
        debug!("💳️ Requesting payout of {} {} to {}", payout.amount, payout.currency, payout.destination);
        let result =
            self.rest_query::<Payout, _>(Method::POST, "/v1/payouts", Some(payout), Some(idempotency_key)).await?;
        info!("💳️ Payout {} accepted by the provider ({:?})", result.id, result.status);
        Ok(result)
    }
}
