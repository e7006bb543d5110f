//! Restricts a scope to a fixed set of peer addresses.
//!
//! The `/internal` scope is called by the listing collaborator and by operators, never by end users. When a whitelist
//! is configured, any request whose remote address (see [`get_remote_ip`]) is not on it gets a 403.

use std::{
    future::{ready, Ready},
    net::IpAddr,
    rc::Rc,
};

use actix_web::{
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    Error,
};
use futures::future::LocalBoxFuture;
use log::*;

use crate::{errors::ServerError, helpers::get_remote_ip};

pub struct IpWhitelistMiddlewareFactory {
    whitelist: Option<Rc<Vec<IpAddr>>>,
    use_x_forwarded_for: bool,
    use_forwarded: bool,
}

impl IpWhitelistMiddlewareFactory {
    /// A `None` whitelist lets every request through.
    pub fn new(whitelist: Option<Vec<IpAddr>>, use_x_forwarded_for: bool, use_forwarded: bool) -> Self {
        Self { whitelist: whitelist.map(Rc::new), use_x_forwarded_for, use_forwarded }
    }
}

impl<S, B> Transform<S, ServiceRequest> for IpWhitelistMiddlewareFactory
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Error = Error;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;
    type InitError = ();
    type Response = ServiceResponse<B>;
    type Transform = IpWhitelistMiddlewareService<S>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(IpWhitelistMiddlewareService {
            whitelist: self.whitelist.clone(),
            use_x_forwarded_for: self.use_x_forwarded_for,
            use_forwarded: self.use_forwarded,
            service: Rc::new(service),
        }))
    }
}

pub struct IpWhitelistMiddlewareService<S> {
    whitelist: Option<Rc<Vec<IpAddr>>>,
    use_x_forwarded_for: bool,
    use_forwarded: bool,
    service: Rc<S>,
}

impl<S, B> Service<ServiceRequest> for IpWhitelistMiddlewareService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;
    type Response = ServiceResponse<B>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let service = Rc::clone(&self.service);
        let Some(whitelist) = self.whitelist.clone() else {
            return Box::pin(service.call(req));
        };
        let peer_ip = get_remote_ip(req.request(), self.use_x_forwarded_for, self.use_forwarded);
        let allowed = match peer_ip {
            Some(ip) => {
                trace!("💻️ Internal request from {ip}");
                whitelist.contains(&ip)
            },
            None => {
                warn!("💻️ No IP address found for internal request, denying access.");
                false
            },
        };
        Box::pin(async move {
            if allowed {
                service.call(req).await
            } else {
                warn!("💻️ Denied internal request to {} from {peer_ip:?}", req.path());
                Err(ServerError::ForbiddenPeer.into())
            }
        })
    }
}
