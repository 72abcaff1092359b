//! Bearer-token middleware guarding every conversion endpoint.
//!
//! Requests must carry `Authorization: Bearer <API_KEY>`. The scheme is
//! matched case-insensitively and the key is compared in constant time.
//! Rejected requests never reach a handler.

use actix_web::{
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    http::header::{HeaderValue, AUTHORIZATION, WWW_AUTHENTICATE},
    Error, HttpResponse,
};
use futures_util::future::LocalBoxFuture;
use std::{
    future::{ready, Ready},
    rc::Rc,
    sync::Arc,
};
use subtle::ConstantTimeEq;
use tracing::warn;

use super::validation::ErrorResponse;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Rejection {
    Missing,
    Malformed,
    InvalidKey,
}

impl Rejection {
    fn message(self) -> &'static str {
        match self {
            Rejection::Malformed => "Invalid authorization header format",
            Rejection::Missing | Rejection::InvalidKey => "Invalid or missing API key",
        }
    }
}

fn check_authorization(header: Option<&HeaderValue>, api_key: &str) -> Result<(), Rejection> {
    let header = header.ok_or(Rejection::Missing)?;
    let value = header.to_str().map_err(|_| Rejection::Malformed)?;

    let mut parts = value.split_whitespace();
    let (Some(scheme), Some(key), None) = (parts.next(), parts.next(), parts.next()) else {
        return Err(Rejection::Malformed);
    };

    if !scheme.eq_ignore_ascii_case("bearer") {
        return Err(Rejection::InvalidKey);
    }
    if bool::from(key.as_bytes().ct_eq(api_key.as_bytes())) {
        Ok(())
    } else {
        Err(Rejection::InvalidKey)
    }
}

/// Middleware factory
#[derive(Clone)]
pub struct BearerAuth {
    api_key: Arc<str>,
}

impl BearerAuth {
    pub fn new(api_key: impl Into<Arc<str>>) -> Self {
        Self {
            api_key: api_key.into(),
        }
    }
}

impl<S> Transform<S, ServiceRequest> for BearerAuth
where
    S: Service<ServiceRequest, Response = ServiceResponse, Error = Error> + 'static,
    S::Future: 'static,
{
    type Response = ServiceResponse;
    type Error = Error;
    type InitError = ();
    type Transform = BearerAuthService<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(BearerAuthService {
            service: Rc::new(service),
            api_key: self.api_key.clone(),
        }))
    }
}

pub struct BearerAuthService<S> {
    service: Rc<S>,
    api_key: Arc<str>,
}

impl<S> Service<ServiceRequest> for BearerAuthService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse, Error = Error> + 'static,
    S::Future: 'static,
{
    type Response = ServiceResponse;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let service = self.service.clone();
        let api_key = self.api_key.clone();

        Box::pin(async move {
            match check_authorization(req.headers().get(AUTHORIZATION), &api_key) {
                Ok(()) => service.call(req).await,
                Err(rejection) => {
                    warn!(
                        path = %req.path(),
                        rejection = ?rejection,
                        "Rejected request with bad credentials"
                    );
                    let response = HttpResponse::Unauthorized()
                        .insert_header((WWW_AUTHENTICATE, "Bearer"))
                        .json(ErrorResponse::new("Unauthorized", rejection.message()));
                    Ok(req.into_response(response))
                }
            }
        })
    }
}
