use std::time::Duration;

use actix_web::{dev::Server, http::KeepAlive, middleware::Logger, web, web::ServiceConfig, App, HttpServer};
use escrow_engine::{
    db_types::EscrowWallet,
    events::{EventHandlers, EventProducers},
    traits::{EscrowDatabase, LedgerManagement, PaymentProvider},
    AnnouncementApi,
    BookingFlowApi,
    ReconciliationApi,
    SqliteDatabase,
    WalletApi,
};
use log::*;

use crate::{
    announcement_sweeper::start_announcement_sweeper,
    config::{ServerConfig, ServerOptions},
    errors::ServerError,
    integrations::provider::ProviderGateway,
    internal_routes::{ExpireAnnouncementsRoute, LedgerAuditRoute, UpsertPackageRoute, UpsertTravelRoute},
    middleware::{IpWhitelistMiddlewareFactory, WebhookSignatureMiddlewareFactory},
    notifications::notification_hooks,
    routes::{
        health,
        AcceptRoute,
        AnnouncementRoute,
        BookingHistoryRoute,
        BookingReportsRoute,
        BookingRoute,
        BookingTransactionsRoute,
        CancelRoute,
        CheckoutRoute,
        CompleteRoute,
        ConditionsUnmetRoute,
        ConfirmPaymentRoute,
        DepositRoute,
        DropOffRoute,
        FundFromWalletRoute,
        MyBookingsRoute,
        MyTransactionsRoute,
        MyWalletRoute,
        NewBookingRoute,
        PickUpRoute,
        RefuseRoute,
        RejectRoute,
        ReleaseRoute,
        ReportProblemRoute,
        WithdrawRoute,
    },
    webhook_routes::ProviderWebhookRoute,
};

const EVENT_BUFFER_SIZE: usize = 128;
const MAX_DB_CONNECTIONS: u32 = 25;

pub async fn run_server(config: ServerConfig) -> Result<(), ServerError> {
    let db = SqliteDatabase::new_with_url(&config.database_url, MAX_DB_CONNECTIONS)
        .await
        .map_err(|e| ServerError::InitializeError(e.to_string()))?;
    db.run_migrations().await.map_err(|e| ServerError::InitializeError(e.to_string()))?;
    let escrow = db
        .escrow_wallet(&config.ledger_policy.currency)
        .await
        .map_err(|e| ServerError::InitializeError(format!("Could not load the escrow wallet. {e}")))?;
    info!("💰️ Using escrow wallet #{} ({})", escrow.id(), escrow.currency());
    let provider =
        ProviderGateway::new(config.provider.clone()).map_err(|e| ServerError::InitializeError(e.to_string()))?;
    let handlers = EventHandlers::new(EVENT_BUFFER_SIZE, notification_hooks(config.notification_url.clone()));
    let producers = handlers.producers();
    handlers.start_handlers().await;

    let sweeper_api = AnnouncementApi::new(db.clone(), escrow.clone(), producers.clone())
        .with_window(config.announcement_window)
        .with_retry_policy(config.retry_policy);
    let _sweeper = start_announcement_sweeper(sweeper_api, config.sweep_interval);

    let state = AppState { config, db, provider, escrow, producers };
    let srv = create_server_instance(state)?;
    srv.await.map_err(|e| ServerError::Unspecified(e.to_string()))
}

pub fn create_server_instance(state: AppState<SqliteDatabase, ProviderGateway>) -> Result<Server, ServerError> {
    let host = state.config.host.clone();
    let port = state.config.port;
    let srv = HttpServer::new(move || {
        let state = state.clone();
        App::new()
            .wrap(Logger::new("%t (%D ms) %s %a %{Host}i %U").log_target("escrow::access_log"))
            .configure(move |cfg| state.configure(cfg))
    })
    .keep_alive(KeepAlive::Timeout(Duration::from_secs(600)))
    .bind((host.as_str(), port))?
    .run();
    Ok(srv)
}

/// Everything a worker needs to build its copy of the app.
#[derive(Clone)]
pub struct AppState<B, P> {
    pub config: ServerConfig,
    pub db: B,
    pub provider: P,
    pub escrow: EscrowWallet,
    pub producers: EventProducers,
}

impl<B, P> AppState<B, P>
where
    B: EscrowDatabase + 'static,
    P: PaymentProvider + 'static,
{
    /// Registers the engine APIs and every route.
    ///
    /// * `/health` is open.
    /// * `/api` requires the actor header.
    /// * `/webhooks` requires a valid provider signature.
    /// * `/internal` is restricted to the configured IP whitelist.
    pub fn configure(&self, cfg: &mut ServiceConfig) {
        let config = &self.config;
        let retry = config.retry_policy;
        let bookings =
            BookingFlowApi::new(self.db.clone(), self.provider.clone(), self.escrow.clone(), self.producers.clone())
                .with_retry_policy(retry);
        let wallets =
            WalletApi::new(self.db.clone(), self.provider.clone(), self.escrow.clone(), config.ledger_policy.clone())
                .with_retry_policy(retry);
        let announcements = AnnouncementApi::new(self.db.clone(), self.escrow.clone(), self.producers.clone())
            .with_window(config.announcement_window)
            .with_retry_policy(retry);
        let reconciliation =
            ReconciliationApi::new(self.db.clone(), bookings.clone(), self.producers.clone()).with_retry_policy(retry);

        let api_scope = web::scope("/api")
            .service(MyWalletRoute::<B, P>::new())
            .service(MyTransactionsRoute::<B, P>::new())
            .service(DepositRoute::<B, P>::new())
            .service(WithdrawRoute::<B, P>::new())
            .service(NewBookingRoute::<B, P>::new())
            .service(MyBookingsRoute::<B, P>::new())
            .service(BookingRoute::<B, P>::new())
            .service(BookingHistoryRoute::<B, P>::new())
            .service(BookingReportsRoute::<B, P>::new())
            .service(BookingTransactionsRoute::<B, P>::new())
            .service(CheckoutRoute::<B, P>::new())
            .service(ConfirmPaymentRoute::<B, P>::new())
            .service(FundFromWalletRoute::<B, P>::new())
            .service(AnnouncementRoute::<B, P>::new())
            .service(AcceptRoute::<B>::new())
            .service(RefuseRoute::<B>::new())
            .service(PickUpRoute::<B, P>::new())
            .service(ReportProblemRoute::<B, P>::new())
            .service(ConditionsUnmetRoute::<B, P>::new())
            .service(DropOffRoute::<B, P>::new())
            .service(CompleteRoute::<B, P>::new())
            .service(ReleaseRoute::<B, P>::new())
            .service(RejectRoute::<B, P>::new())
            .service(CancelRoute::<B, P>::new());
        let webhook_scope = web::scope("/webhooks")
            .wrap(WebhookSignatureMiddlewareFactory::new(
                config.provider.webhook_secret.clone(),
                config.provider.webhook_tolerance_secs,
                config.webhook_signature_checks,
            ))
            .service(ProviderWebhookRoute::<B, P>::new());
        let internal_scope = web::scope("/internal")
            .wrap(IpWhitelistMiddlewareFactory::new(
                config.internal_whitelist.clone(),
                config.use_x_forwarded_for,
                config.use_forwarded,
            ))
            .service(UpsertTravelRoute::<B>::new())
            .service(UpsertPackageRoute::<B>::new())
            .service(LedgerAuditRoute::<B, P>::new())
            .service(ExpireAnnouncementsRoute::<B>::new());

        cfg.app_data(web::Data::new(ServerOptions::from_config(config)))
            .app_data(web::Data::new(self.db.clone()))
            .app_data(web::Data::new(wallets))
            .app_data(web::Data::new(bookings))
            .app_data(web::Data::new(announcements))
            .app_data(web::Data::new(reconciliation))
            .service(health)
            .service(api_scope)
            .service(webhook_scope)
            .service(internal_scope);
    }
}
