//! [`Context`]-related definitions.

use std::sync::Arc;

use axum::{async_trait, extract::FromRequestParts, RequestPartsExt as _};
use axum_extra::{
    headers::{authorization::Bearer, Authorization},
    TypedHeader,
};
use secrecy::{ExposeSecret as _, SecretString};

use crate::{define_error, AsError, Error, Service};

/// Application context.
#[derive(Clone, Debug)]
pub struct Context {
    /// [`Service`] instance.
    service: Service,
}

impl Context {
    /// Returns [`Service`] instance of this [`Context`].
    #[must_use]
    pub fn service(&self) -> &Service {
        &self.service
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for Context
where
    S: Send + Sync,
{
    type Rejection = Error;

    async fn from_request_parts(
        parts: &mut http::request::Parts,
        _: &S,
    ) -> Result<Self, Self::Rejection> {
        let service = parts
            .extensions
            .get::<Service>()
            .cloned()
            .ok_or_else(|| Error::internal(&"missing `Service` extension"))?;
        Ok(Self { service })
    }
}

/// Token the internal API callers authenticate with.
#[derive(Clone, Debug)]
pub struct ApiToken(pub Arc<SecretString>);

/// [`Context`] of an authenticated internal API call.
#[derive(Clone, Debug)]
pub struct Internal(pub Context);

#[async_trait]
impl<S> FromRequestParts<S> for Internal
where
    S: Send + Sync,
{
    type Rejection = Error;

    async fn from_request_parts(
        parts: &mut http::request::Parts,
        state: &S,
    ) -> Result<Self, Self::Rejection> {
        let ApiToken(expected) = parts
            .extensions
            .get::<ApiToken>()
            .cloned()
            .ok_or_else(|| Error::internal(&"missing `ApiToken` extension"))?;

        let TypedHeader(Authorization(bearer)) = parts
            .extract::<TypedHeader<Authorization<Bearer>>>()
            .await
            .map_err(|e| {
                if e.is_missing() {
                    AuthError::AuthorizationRequired.into()
                } else {
                    e.into_error()
                }
            })?;
        if !constant_time_eq::constant_time_eq(
            bearer.token().as_bytes(),
            expected.expose_secret().as_bytes(),
        ) {
            return Err(AuthError::InvalidToken.into());
        }

        Context::from_request_parts(parts, state).await.map(Self)
    }
}

impl AsError for axum_extra::typed_header::TypedHeaderRejection {
    fn try_as_error(&self) -> Option<Error> {
        Some(Error {
            code: "BAD_REQUEST",
            status_code: http::StatusCode::BAD_REQUEST,
            message: self.to_string(),
            backtrace: None,
        })
    }
}

define_error! {
    enum AuthError {
        #[code = "AUTHORIZATION_REQUIRED"]
        #[status = UNAUTHORIZED]
        #[message = "Authorization required"]
        AuthorizationRequired,

        #[code = "INVALID_TOKEN"]
        #[status = FORBIDDEN]
        #[message = "Invalid authorization token"]
        InvalidToken,
    }
}
