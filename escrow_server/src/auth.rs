//! Identity of the caller.
//!
//! The server does not authenticate anyone itself. It sits behind a gateway that verifies the user's session and
//! forwards the user id in a header (`X-Actor-Id` by default, see `ESC_ACTOR_HEADER`). Handlers take an
//! [`AuthenticatedUser`] argument to require that header; whether that user may act on a particular booking is
//! decided by the engine against the booking's owner and traveler.
use std::future::{ready, Ready};

use actix_web::{dev::Payload, web, FromRequest, HttpRequest};
use escrow_engine::db_types::UserId;
use log::*;

use crate::{
    config::{ServerOptions, DEFAULT_ACTOR_HEADER},
    errors::ServerError,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedUser(pub UserId);

impl AuthenticatedUser {
    pub fn user_id(&self) -> &UserId {
        &self.0
    }
}

impl FromRequest for AuthenticatedUser {
    type Error = ServerError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        ready(extract_actor(req))
    }
}

fn extract_actor(req: &HttpRequest) -> Result<AuthenticatedUser, ServerError> {
    let header = req
        .app_data::<web::Data<ServerOptions>>()
        .map(|o| o.actor_header.as_str())
        .unwrap_or(DEFAULT_ACTOR_HEADER);
    let value = req.headers().get(header).ok_or_else(|| {
        debug!("💻️ No {header} header on request to {}", req.path());
        ServerError::MissingActor
    })?;
    let user = value.to_str().map(str::trim).map_err(|e| {
        debug!("💻️ The {header} header is not valid text. {e}");
        ServerError::MissingActor
    })?;
    if user.is_empty() {
        return Err(ServerError::MissingActor);
    }
    Ok(AuthenticatedUser(UserId::new(user)))
}
