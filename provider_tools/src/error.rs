use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProviderApiError {
    #[error("Could not initialize client: {0}")]
    Initialization(String),
    #[error("Invalid REST request: {0}")]
    RestRequestError(String),
    #[error("Invalid REST response: {0}")]
    RestResponseError(String),
    #[error("Could not deserialize JSON: {0}")]
    JsonError(String),
    #[error("Provider request failed. Error {status}. {message}")]
    QueryError { status: u16, message: String },
    #[error("Webhook event {event_id} of type {event_type} does not carry a valid object. {reason}")]
    MalformedEvent { event_id: String, event_type: String, reason: String },
}

impl ProviderApiError {
    /// True when retrying the same request later could reasonably succeed (network trouble, 5xx, rate limiting).
    pub fn is_transient(&self) -> bool {
        match self {
            Self::RestResponseError(_) => true,
            Self::QueryError { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}
