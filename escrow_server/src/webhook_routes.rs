//! The payment provider's webhook endpoint.
//!
//! The signature has already been checked by the time a delivery gets here (see
//! [`crate::middleware::WebhookSignatureMiddlewareFactory`]). The provider redelivers anything that is not answered
//! with a 2xx, so the response code only says whether a retry could help:
//! * the event was applied, was a duplicate, or was rejected for good: 200, with `success` telling them apart;
//! * the engine lost a race or the database is in trouble: 5xx, and the provider tries again later.
use actix_web::{web, HttpResponse};
use escrow_engine::{
    traits::{EscrowDatabase, PaymentProvider},
    ClassifiedError,
    ErrorKind,
    ReconciliationApi,
    ReconciliationOutcome,
};
use log::*;
use provider_tools::WebhookEvent;

use crate::{data_objects::JsonResponse, integrations::provider::payment_event_from_webhook, route};

route!(provider_webhook => Post "/provider" impl EscrowDatabase, PaymentProvider);
pub async fn provider_webhook<B, P>(body: web::Bytes, api: web::Data<ReconciliationApi<B, P>>) -> HttpResponse
where
    B: EscrowDatabase,
    P: PaymentProvider,
{
    let event = match serde_json::from_slice::<WebhookEvent>(&body) {
        Ok(event) => event,
        Err(e) => {
            warn!("🧾️ Received a webhook that is not a provider event. {e}");
            return HttpResponse::Ok().json(JsonResponse::failure(format!("Not a provider event. {e}")));
        },
    };
    trace!("🧾️ Received {} event {}", event.event_type, event.id);
    let payment_event = match payment_event_from_webhook(&event) {
        Ok(ev) => ev,
        Err(e) => {
            warn!("🧾️ Could not interpret event {}. {e}", event.id);
            return HttpResponse::Ok().json(JsonResponse::failure(e));
        },
    };
    match api.process_event(payment_event).await {
        Ok(ReconciliationOutcome::Duplicate) => {
            HttpResponse::Ok().json(JsonResponse::success(format!("Event {} was already processed.", event.id)))
        },
        Ok(outcome) => HttpResponse::Ok().json(JsonResponse::success(outcome)),
        Err(e) => match e.kind() {
            ErrorKind::ConcurrencyConflict => {
                info!("🧾️ Asking the provider to redeliver event {}. {e}", event.id);
                HttpResponse::ServiceUnavailable().json(JsonResponse::failure(e))
            },
            ErrorKind::Fatal => {
                error!("🧾️ Event {} could not be processed. {e}", event.id);
                HttpResponse::InternalServerError().json(JsonResponse::failure(e))
            },
            _ => {
                debug!("🧾️ Event {} was rejected. {e}", event.id);
                HttpResponse::Ok().json(JsonResponse::failure(e))
            },
        },
    }
}
