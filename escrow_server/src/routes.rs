//! Request handler definitions
//!
//! Define each route and its handler here. Handlers that are more than a line or two MUST go into a separate module.
//! Keep this module neat and tidy 🙏
//!
//! A note about performance:
//! Since each worker thread processes its requests sequentially, handlers which block the current thread will cause the
//! current worker to stop processing new requests. Any long, non-cpu-bound operation (database calls, provider calls)
//! must be awaited, never blocked on.
//!
//! Every handler under `/api` takes an [`AuthenticatedUser`]. Whether that user may act on a given booking is the
//! engine's decision, based on the booking's owner and traveler.
use actix_web::{get, web, HttpResponse, Responder};
use escrow_engine::{
    booking_objects::{
        CancelRequest,
        ConditionsUnmetReport,
        DropOffProof,
        NewBookingRequest,
        PickUpProof,
        ProblemReport,
        RejectRequest,
    },
    db_types::{ActorRole, BookingId},
    ledger_objects::{DepositRequest, WithdrawRequest},
    traits::{Actor, EscrowDatabase, PaymentProvider},
    AnnouncementApi,
    BookingFlowApi,
    WalletApi,
};
use log::*;
use serde_json::json;

use crate::{
    auth::AuthenticatedUser,
    data_objects::{BookingView, CheckoutResponse, WalletStatement},
    errors::ServerError,
};

// Web-actix cannot handle generics in handlers, so it's implemented manually using the `route!` macro
#[macro_export]
macro_rules! route {
    ($name:ident => $method:ident $path:literal impl $($bounds:ty),+) => {
        paste::paste! {
            pub struct [<$name:camel Route>]< $( [< T $bounds:camel> ],)+ >(
                $( core::marker::PhantomData<fn() -> [< T $bounds:camel> ] >,)+
            );
        }
        paste::paste! { impl< $( [< T $bounds:camel> ],)+ > [<$name:camel Route>]< $( [< T $bounds:camel> ],)+ > {
            #[allow(clippy::new_without_default)]
            pub fn new() -> Self {
                Self($( core::marker::PhantomData::<fn() -> [< T $bounds:camel> ] >,)+)
            }
        }}
        paste::paste! { impl<$( [< T $bounds:camel >] , )+> actix_web::dev::HttpServiceFactory
            for [<$name:camel Route>]<$([<T $bounds:camel>],)+>
        where
            $([<T $bounds:camel>]: $bounds + 'static,)+
        {
            fn register(self, config: &mut actix_web::dev::AppService) {
                let res = actix_web::Resource::new($path)
                    .name(stringify!($name))
                    .guard(actix_web::guard::$method())
                    .to($name::< $( [< T $bounds:camel >], )+>);
                actix_web::dev::HttpServiceFactory::register(res, config);
            }
        }}
    };
}

#[get("/health")]
pub async fn health() -> impl Responder {
    HttpResponse::Ok().body("👍️\n")
}

//----------------------------------------------   Wallet  ----------------------------------------------------
route!(my_wallet => Get "/wallet" impl EscrowDatabase, PaymentProvider);
/// Returns the caller's wallet. The wallet is created, empty, the first time it is asked for.
pub async fn my_wallet<B: EscrowDatabase, P: PaymentProvider>(
    user: AuthenticatedUser,
    api: web::Data<WalletApi<B, P>>,
) -> Result<HttpResponse, ServerError> {
    debug!("💻️ GET wallet for {}", user.user_id());
    let wallet = api.wallet_for_user(user.user_id()).await?;
    Ok(HttpResponse::Ok().json(wallet))
}

route!(my_transactions => Get "/wallet/transactions" impl EscrowDatabase, PaymentProvider);
pub async fn my_transactions<B: EscrowDatabase, P: PaymentProvider>(
    user: AuthenticatedUser,
    api: web::Data<WalletApi<B, P>>,
) -> Result<HttpResponse, ServerError> {
    debug!("💻️ GET wallet transactions for {}", user.user_id());
    let (wallet, transactions) = api.statement(user.user_id()).await?;
    Ok(HttpResponse::Ok().json(WalletStatement { wallet, transactions }))
}

route!(deposit => Post "/wallet/deposit" impl EscrowDatabase, PaymentProvider);
/// Starts a deposit. The response carries the provider's client secret; the wallet is only credited once the provider
/// confirms the charge.
pub async fn deposit<B: EscrowDatabase, P: PaymentProvider>(
    user: AuthenticatedUser,
    body: web::Json<DepositRequest>,
    api: web::Data<WalletApi<B, P>>,
) -> Result<HttpResponse, ServerError> {
    let amount = body.into_inner().amount;
    debug!("💻️ POST deposit of {amount} for {}", user.user_id());
    let intent = api.deposit(user.user_id(), amount).await.map_err(|e| {
        debug!("💻️ Could not start deposit. {e}");
        e
    })?;
    Ok(HttpResponse::Ok().json(intent))
}

route!(withdraw => Post "/wallet/withdraw" impl EscrowDatabase, PaymentProvider);
pub async fn withdraw<B: EscrowDatabase, P: PaymentProvider>(
    user: AuthenticatedUser,
    body: web::Json<WithdrawRequest>,
    api: web::Data<WalletApi<B, P>>,
) -> Result<HttpResponse, ServerError> {
    let WithdrawRequest { amount, destination } = body.into_inner();
    debug!("💻️ POST withdrawal of {amount} for {}", user.user_id());
    let tx = api.withdraw(user.user_id(), amount, &destination).await.map_err(|e| {
        debug!("💻️ Could not withdraw. {e}");
        e
    })?;
    Ok(HttpResponse::Ok().json(tx))
}

//----------------------------------------------   Bookings  ----------------------------------------------------
route!(new_booking => Post "/bookings" impl EscrowDatabase, PaymentProvider);
/// The caller books their package onto a travel. The caller must own the package.
pub async fn new_booking<B: EscrowDatabase, P: PaymentProvider>(
    user: AuthenticatedUser,
    body: web::Json<NewBookingRequest>,
    api: web::Data<BookingFlowApi<B, P>>,
) -> Result<HttpResponse, ServerError> {
    let request = body.into_inner();
    debug!("💻️ POST new booking of {} on {} by {}", request.package_id, request.travel_id, user.user_id());
    let booking = api.create_booking(user.user_id(), request).await?;
    Ok(HttpResponse::Created().json(booking))
}

route!(my_bookings => Get "/bookings" impl EscrowDatabase, PaymentProvider);
pub async fn my_bookings<B: EscrowDatabase, P: PaymentProvider>(
    user: AuthenticatedUser,
    api: web::Data<BookingFlowApi<B, P>>,
) -> Result<HttpResponse, ServerError> {
    let bookings = api.bookings_for_user(user.user_id()).await?;
    Ok(HttpResponse::Ok().json(bookings))
}

route!(booking => Get "/bookings/{id}" impl EscrowDatabase, PaymentProvider);
pub async fn booking<B: EscrowDatabase, P: PaymentProvider>(
    user: AuthenticatedUser,
    path: web::Path<BookingId>,
    api: web::Data<BookingFlowApi<B, P>>,
) -> Result<HttpResponse, ServerError> {
    let (booking, role) = api.booking_for(user.user_id(), path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(BookingView { booking, role }))
}

route!(booking_history => Get "/bookings/{id}/history" impl EscrowDatabase, PaymentProvider);
pub async fn booking_history<B: EscrowDatabase, P: PaymentProvider>(
    user: AuthenticatedUser,
    path: web::Path<BookingId>,
    api: web::Data<BookingFlowApi<B, P>>,
) -> Result<HttpResponse, ServerError> {
    let history = api.history(user.user_id(), path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(history))
}

route!(booking_reports => Get "/bookings/{id}/reports" impl EscrowDatabase, PaymentProvider);
pub async fn booking_reports<B: EscrowDatabase, P: PaymentProvider>(
    user: AuthenticatedUser,
    path: web::Path<BookingId>,
    api: web::Data<BookingFlowApi<B, P>>,
) -> Result<HttpResponse, ServerError> {
    let reports = api.reports(user.user_id(), path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(reports))
}

route!(booking_transactions => Get "/bookings/{id}/transactions" impl EscrowDatabase, PaymentProvider);
/// The ledger entries recorded against a booking. Only its participants may see them.
pub async fn booking_transactions<B: EscrowDatabase, P: PaymentProvider>(
    user: AuthenticatedUser,
    path: web::Path<BookingId>,
    bookings: web::Data<BookingFlowApi<B, P>>,
    wallets: web::Data<WalletApi<B, P>>,
) -> Result<HttpResponse, ServerError> {
    let id = path.into_inner();
    bookings.booking_for(user.user_id(), id).await?;
    let transactions = wallets.transactions_for_booking(id).await?;
    Ok(HttpResponse::Ok().json(transactions))
}

//----------------------------------------------   Funding  ----------------------------------------------------
route!(checkout => Post "/bookings/{id}/checkout" impl EscrowDatabase, PaymentProvider);
pub async fn checkout<B: EscrowDatabase, P: PaymentProvider>(
    user: AuthenticatedUser,
    path: web::Path<BookingId>,
    api: web::Data<BookingFlowApi<B, P>>,
) -> Result<HttpResponse, ServerError> {
    let id = path.into_inner();
    debug!("💻️ POST checkout for booking #{id}");
    let (booking, charge) = api.checkout(user.user_id(), id).await.map_err(|e| {
        debug!("💻️ Could not start checkout for booking #{id}. {e}");
        e
    })?;
    Ok(HttpResponse::Ok().json(CheckoutResponse::new(booking, charge)))
}

route!(confirm_payment => Post "/bookings/{id}/confirm_payment" impl EscrowDatabase, PaymentProvider);
/// Checks the booking's charge with the provider and funds the booking if it has gone through. Safe to call even if the
/// provider's webhook has already done so.
pub async fn confirm_payment<B: EscrowDatabase, P: PaymentProvider>(
    user: AuthenticatedUser,
    path: web::Path<BookingId>,
    api: web::Data<BookingFlowApi<B, P>>,
) -> Result<HttpResponse, ServerError> {
    let id = path.into_inner();
    debug!("💻️ POST confirm_payment for booking #{id}");
    let outcome = api.confirm_checkout(user.user_id(), id).await?;
    Ok(HttpResponse::Ok().json(outcome))
}

route!(fund_from_wallet => Post "/bookings/{id}/fund" impl EscrowDatabase, PaymentProvider);
pub async fn fund_from_wallet<B: EscrowDatabase, P: PaymentProvider>(
    user: AuthenticatedUser,
    path: web::Path<BookingId>,
    api: web::Data<BookingFlowApi<B, P>>,
) -> Result<HttpResponse, ServerError> {
    let id = path.into_inner();
    debug!("💻️ POST fund booking #{id} from the wallet of {}", user.user_id());
    let outcome = api.fund_from_wallet(user.user_id(), id).await.map_err(|e| {
        debug!("💻️ Could not fund booking #{id}. {e}");
        e
    })?;
    Ok(HttpResponse::Ok().json(outcome))
}

//----------------------------------------------   Acceptance  ----------------------------------------------------
route!(announcement => Get "/bookings/{id}/announcement" impl EscrowDatabase, PaymentProvider);
pub async fn announcement<B: EscrowDatabase, P: PaymentProvider>(
    user: AuthenticatedUser,
    path: web::Path<BookingId>,
    bookings: web::Data<BookingFlowApi<B, P>>,
    announcements: web::Data<AnnouncementApi<B>>,
) -> Result<HttpResponse, ServerError> {
    let id = path.into_inner();
    bookings.booking_for(user.user_id(), id).await?;
    let request = announcements.fetch_announcement(id).await?;
    Ok(HttpResponse::Ok().json(request))
}

route!(accept => Post "/bookings/{id}/accept" impl EscrowDatabase);
pub async fn accept<B: EscrowDatabase>(
    user: AuthenticatedUser,
    path: web::Path<BookingId>,
    api: web::Data<AnnouncementApi<B>>,
) -> Result<HttpResponse, ServerError> {
    let id = path.into_inner();
    debug!("💻️ POST accept booking #{id} by {}", user.user_id());
    let resolved = api.accept(user.user_id(), id).await?;
    Ok(HttpResponse::Ok().json(resolved))
}

route!(refuse => Post "/bookings/{id}/refuse" impl EscrowDatabase);
pub async fn refuse<B: EscrowDatabase>(
    user: AuthenticatedUser,
    path: web::Path<BookingId>,
    api: web::Data<AnnouncementApi<B>>,
) -> Result<HttpResponse, ServerError> {
    let id = path.into_inner();
    debug!("💻️ POST refuse booking #{id} by {}", user.user_id());
    let resolved = api.refuse(user.user_id(), id).await?;
    Ok(HttpResponse::Ok().json(resolved))
}

//----------------------------------------------   Delivery  ----------------------------------------------------
route!(pick_up => Post "/bookings/{id}/pick_up" impl EscrowDatabase, PaymentProvider);
pub async fn pick_up<B: EscrowDatabase, P: PaymentProvider>(
    user: AuthenticatedUser,
    path: web::Path<BookingId>,
    body: web::Json<PickUpProof>,
    api: web::Data<BookingFlowApi<B, P>>,
) -> Result<HttpResponse, ServerError> {
    let booking = api.confirm_pick_up(user.user_id(), path.into_inner(), body.into_inner()).await?;
    Ok(HttpResponse::Ok().json(booking))
}

route!(report_problem => Post "/bookings/{id}/problem" impl EscrowDatabase, PaymentProvider);
pub async fn report_problem<B: EscrowDatabase, P: PaymentProvider>(
    user: AuthenticatedUser,
    path: web::Path<BookingId>,
    body: web::Json<ProblemReport>,
    api: web::Data<BookingFlowApi<B, P>>,
) -> Result<HttpResponse, ServerError> {
    let booking = api.report_problem(user.user_id(), path.into_inner(), body.into_inner()).await?;
    Ok(HttpResponse::Ok().json(booking))
}

route!(conditions_unmet => Post "/bookings/{id}/conditions_unmet" impl EscrowDatabase, PaymentProvider);
pub async fn conditions_unmet<B: EscrowDatabase, P: PaymentProvider>(
    user: AuthenticatedUser,
    path: web::Path<BookingId>,
    body: Option<web::Json<ConditionsUnmetReport>>,
    api: web::Data<BookingFlowApi<B, P>>,
) -> Result<HttpResponse, ServerError> {
    let report = body.map(web::Json::into_inner).unwrap_or_default();
    let booking = api.report_conditions_unmet(user.user_id(), path.into_inner(), report).await?;
    Ok(HttpResponse::Ok().json(booking))
}

route!(drop_off => Post "/bookings/{id}/drop_off" impl EscrowDatabase, PaymentProvider);
pub async fn drop_off<B: EscrowDatabase, P: PaymentProvider>(
    user: AuthenticatedUser,
    path: web::Path<BookingId>,
    body: web::Json<DropOffProof>,
    api: web::Data<BookingFlowApi<B, P>>,
) -> Result<HttpResponse, ServerError> {
    let booking = api.confirm_drop_off(user.user_id(), path.into_inner(), body.into_inner()).await?;
    Ok(HttpResponse::Ok().json(booking))
}

route!(complete => Post "/bookings/{id}/complete" impl EscrowDatabase, PaymentProvider);
/// The owner confirms delivery, and the escrowed amount is paid to the traveler.
///
/// The booking is completed even if the payout to the traveler fails; in that case the response carries no `release`
/// and the owner (or an operator) can retry with `/bookings/{id}/release`.
pub async fn complete<B: EscrowDatabase, P: PaymentProvider>(
    user: AuthenticatedUser,
    path: web::Path<BookingId>,
    api: web::Data<BookingFlowApi<B, P>>,
) -> Result<HttpResponse, ServerError> {
    let id = path.into_inner();
    debug!("💻️ POST complete booking #{id}");
    let booking = api.complete(user.user_id(), id).await?;
    let actor = Actor::new(user.user_id().clone(), ActorRole::Owner);
    match api.release_funds(&actor, id).await {
        Ok((booking, release)) => Ok(HttpResponse::Ok().json(json!({ "booking": booking, "release": release }))),
        Err(e) => {
            warn!("💻️ Booking #{id} is complete, but its funds could not be released. {e}");
            Ok(HttpResponse::Ok().json(json!({ "booking": booking, "release": null })))
        },
    }
}

route!(release => Post "/bookings/{id}/release" impl EscrowDatabase, PaymentProvider);
pub async fn release<B: EscrowDatabase, P: PaymentProvider>(
    user: AuthenticatedUser,
    path: web::Path<BookingId>,
    api: web::Data<BookingFlowApi<B, P>>,
) -> Result<HttpResponse, ServerError> {
    let id = path.into_inner();
    let actor = Actor::new(user.user_id().clone(), ActorRole::Owner);
    let (booking, release) = api.release_funds(&actor, id).await?;
    Ok(HttpResponse::Ok().json(json!({ "booking": booking, "release": release })))
}

route!(reject => Post "/bookings/{id}/reject" impl EscrowDatabase, PaymentProvider);
pub async fn reject<B: EscrowDatabase, P: PaymentProvider>(
    user: AuthenticatedUser,
    path: web::Path<BookingId>,
    body: Option<web::Json<RejectRequest>>,
    api: web::Data<BookingFlowApi<B, P>>,
) -> Result<HttpResponse, ServerError> {
    let request = body.map(web::Json::into_inner).unwrap_or_default();
    let booking = api.reject(user.user_id(), path.into_inner(), request).await?;
    Ok(HttpResponse::Ok().json(booking))
}

route!(cancel => Post "/bookings/{id}/cancel" impl EscrowDatabase, PaymentProvider);
pub async fn cancel<B: EscrowDatabase, P: PaymentProvider>(
    user: AuthenticatedUser,
    path: web::Path<BookingId>,
    body: Option<web::Json<CancelRequest>>,
    api: web::Data<BookingFlowApi<B, P>>,
) -> Result<HttpResponse, ServerError> {
    let id = path.into_inner();
    debug!("💻️ POST cancel booking #{id} by {}", user.user_id());
    let request = body.map(web::Json::into_inner).unwrap_or_default();
    let cancelled = api.cancel(user.user_id(), id, request).await?;
    Ok(HttpResponse::Ok().json(cancelled))
}
