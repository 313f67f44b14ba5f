/// Access-token guard
///
/// Resolves the bearer access token of every request through the access
/// strategy and stores the resulting `AuthenticatedUser` in the request
/// extensions, where handlers pick it up with `web::ReqData`.

use actix_web::{
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    http::header::AUTHORIZATION,
    Error, HttpMessage,
};
use futures::future::LocalBoxFuture;
use std::rc::Rc;

use crate::auth::Authenticator;

/// Must wrap every route that requires an authenticated caller.
pub struct AccessGuard {
    authenticator: Authenticator,
}

impl AccessGuard {
    pub fn new(authenticator: Authenticator) -> Self {
        Self { authenticator }
    }
}

impl<S, B> Transform<S, ServiceRequest> for AccessGuard
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = AccessGuardService<S>;
    type Future = std::future::Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        std::future::ready(Ok(AccessGuardService {
            service: Rc::new(service),
            authenticator: self.authenticator.clone(),
        }))
    }
}

pub struct AccessGuardService<S> {
    service: Rc<S>,
    authenticator: Authenticator,
}

impl<S, B> Service<ServiceRequest> for AccessGuardService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let authorization = req
            .headers()
            .get(AUTHORIZATION)
            .and_then(|h| h.to_str().ok())
            .map(str::to_string);

        let authenticator = self.authenticator.clone();
        let service = self.service.clone();

        Box::pin(async move {
            let user = authenticator
                .validate_access(authorization.as_deref())
                .await?;

            tracing::debug!(user_id = user.id, username = %user.username, "Access token accepted");
            req.extensions_mut().insert(user);

            service.call(req).await
        })
    }
}
