/// Bearer Authentication Middleware
///
/// Resolves the `Authorization: Bearer <token>` header to a live
/// [`Identity`] through [`AuthService::resolve_identity`] and stores it in
/// the request extensions for handlers to take as `web::ReqData<Identity>`.

use actix_web::{
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    http::header::AUTHORIZATION,
    web, Error, HttpMessage,
};
use futures::future::LocalBoxFuture;
use std::rc::Rc;

use crate::auth::AuthService;
use crate::error::{AppError, AuthError};

/// Extract the token from an `Authorization` header value.
pub fn bearer_token(header: &str) -> Option<&str> {
    let (scheme, token) = header.trim().split_once(' ')?;
    let token = token.trim();
    if scheme.eq_ignore_ascii_case("bearer") && !token.is_empty() {
        Some(token)
    } else {
        None
    }
}

/// Protects a resource or scope. Requires `web::Data<AuthService>` in app data.
#[derive(Clone, Default)]
pub struct BearerAuth;

impl<S, B> Transform<S, ServiceRequest> for BearerAuth
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = BearerAuthService<S>;
    type Future = std::future::Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        std::future::ready(Ok(BearerAuthService {
            service: Rc::new(service),
        }))
    }
}

pub struct BearerAuthService<S> {
    service: Rc<S>,
}

impl<S, B> Service<ServiceRequest> for BearerAuthService<S>
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
        let service = self.service.clone();

        Box::pin(async move {
            let auth = req
                .app_data::<web::Data<AuthService>>()
                .cloned()
                .ok_or_else(|| AppError::Internal("AuthService is not registered".to_string()))?;

            let token = req
                .headers()
                .get(AUTHORIZATION)
                .and_then(|h| h.to_str().ok())
                .and_then(bearer_token)
                .map(str::to_string);

            let token = match token {
                Some(token) => token,
                None => {
                    tracing::debug!(
                        path = %req.path(),
                        "Missing or malformed Authorization header"
                    );
                    return Err(AppError::Auth(AuthError::Unauthenticated).into());
                }
            };

            let identity = auth.resolve_identity(&token).await.map_err(|e| {
                tracing::debug!(path = %req.path(), error = %e, "Bearer token rejected");
                e
            })?;

            tracing::debug!(
                user_id = %identity.user_id(),
                session_id = %identity.session_id,
                "Identity resolved"
            );

            req.extensions_mut().insert(identity);
            service.call(req).await
        })
    }
}
