//! Routes for trusted collaborators and operators, mounted under `/internal`.
//!
//! The listing service keeps the travel/package read model up to date here. These routes are not tied to a user, so
//! the scope is protected by the IP whitelist instead of the actor header.
use actix_web::{web, HttpResponse};
use escrow_engine::{
    db_types::{PackageId, TravelId},
    helpers::SystemClock,
    traits::{CatalogManagement, EscrowDatabase, PaymentProvider},
    AnnouncementApi,
    WalletApi,
};
use log::*;

use crate::{data_objects::CatalogUpsert, errors::ServerError, route};

route!(upsert_travel => Post "/travels" impl CatalogManagement);
pub async fn upsert_travel<B: CatalogManagement>(
    body: web::Json<CatalogUpsert>,
    db: web::Data<B>,
) -> Result<HttpResponse, ServerError> {
    let CatalogUpsert { id, user_id } = body.into_inner();
    debug!("💻️ POST travel {id} for {user_id}");
    let travel = db.upsert_travel(&TravelId::new(id), &user_id).await?;
    Ok(HttpResponse::Ok().json(travel))
}

route!(upsert_package => Post "/packages" impl CatalogManagement);
pub async fn upsert_package<B: CatalogManagement>(
    body: web::Json<CatalogUpsert>,
    db: web::Data<B>,
) -> Result<HttpResponse, ServerError> {
    let CatalogUpsert { id, user_id } = body.into_inner();
    debug!("💻️ POST package {id} for {user_id}");
    let package = db.upsert_package(&PackageId::new(id), &user_id).await?;
    Ok(HttpResponse::Ok().json(package))
}

route!(ledger_audit => Get "/audit" impl EscrowDatabase, PaymentProvider);
/// Recomputes every wallet balance from its transaction log. A 200 is returned either way; check `is_consistent` in
/// the logs, or the `inconsistent` list in the response.
pub async fn ledger_audit<B: EscrowDatabase, P: PaymentProvider>(
    api: web::Data<WalletApi<B, P>>,
) -> Result<HttpResponse, ServerError> {
    let audit = api.audit().await?;
    let consistent = audit.is_consistent();
    if !consistent {
        for w in audit.inconsistent_wallets() {
            error!("💰️ Wallet #{} has a balance of {} but its log adds up to {}", w.wallet_id, w.balance, w.projected);
        }
    }
    Ok(HttpResponse::Ok().json(serde_json::json!({ "consistent": consistent, "audit": audit })))
}

route!(expire_announcements => Post "/sweep" impl EscrowDatabase);
/// Runs the announcement expiry sweep now, rather than waiting for the next scheduled run.
pub async fn expire_announcements<B: EscrowDatabase>(
    api: web::Data<AnnouncementApi<B>>,
) -> Result<HttpResponse, ServerError> {
    info!("🕰️ Expiry sweep requested");
    let result = api.expire_stale_at(&SystemClock).await?;
    Ok(HttpResponse::Ok().json(result))
}
