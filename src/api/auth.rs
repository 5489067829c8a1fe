//! Bearer token authentication for the control API.

use crate::api::actix_error::ApiError;
use crate::error::Error;

use actix_web::{
    Error as ActixError,
    dev::{Service, ServiceRequest, ServiceResponse, Transform, forward_ready},
    http::Method,
};
use futures::future::{LocalBoxFuture, Ready, ready};
use std::sync::Arc;

/// Authentication middleware factory
///
/// With no token configured every request passes.
#[derive(Clone)]
pub struct Authentication {
    token: Option<Arc<str>>,
}

impl Authentication {
    /// Create a new Authentication middleware
    pub fn new(token: Option<&str>) -> Self {
        Self {
            token: token.map(Arc::from),
        }
    }
}

impl<S, B> Transform<S, ServiceRequest> for Authentication
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = ActixError> + 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = ActixError;
    type Transform = AuthenticationMiddleware<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(AuthenticationMiddleware {
            service,
            token: self.token.clone(),
        }))
    }
}

/// Authentication middleware implementation
pub struct AuthenticationMiddleware<S> {
    service: S,
    token: Option<Arc<str>>,
}

impl<S> AuthenticationMiddleware<S> {
    fn is_authorized(&self, req: &ServiceRequest) -> bool {
        let Some(expected) = &self.token else {
            return true;
        };

        // CORS preflight carries no credentials
        if req.method() == Method::OPTIONS {
            return true;
        }

        req.headers()
            .get("Authorization")
            .and_then(|h| h.to_str().ok())
            .and_then(|h| h.strip_prefix("Bearer "))
            .is_some_and(|token| token == &**expected)
    }
}

impl<S, B> Service<ServiceRequest> for AuthenticationMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = ActixError> + 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = ActixError;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        if self.is_authorized(&req) {
            let fut = self.service.call(req);
            return Box::pin(async move {
                let res = fut.await?;
                Ok(res)
            });
        }

        tracing::warn!(path = %req.path(), "Authentication failed: invalid or missing bearer token");
        Box::pin(async move {
            Err(ApiError::from(Error::Unauthorized(
                "Invalid or missing bearer token".to_string(),
            ))
            .into())
        })
    }
}
