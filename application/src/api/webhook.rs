//! CRM webhook endpoints.

use axum::{extract::Path, Json};
use serde::Serialize;
use service::{
    command::{self, Command as _},
    domain::webhook,
};

use crate::{define_error, AsError, Context, Error};

/// Result of receiving a webhook.
#[derive(Clone, Copy, Debug, Serialize)]
pub struct Receipt {
    /// [`webhook::Outcome`] of processing the webhook.
    pub outcome: webhook::Outcome,
}

/// Receives the provided webhook `body` of the given [`webhook::Category`].
///
/// Responds successfully once the `body` is stored, whatever the processing
/// outcome is.
async fn receive(
    ctx: &Context,
    category: webhook::Category,
    secret: String,
    body: String,
) -> Result<Json<Receipt>, Error> {
    ctx.service()
        .execute(command::IngestWebhook {
            category,
            secret,
            body,
        })
        .await
        .map(|outcome| Json(Receipt { outcome }))
        .map_err(AsError::into_error)
}

/// Lead status change webhook.
#[tracing::instrument(skip_all, fields(webhook.category = "status"))]
pub async fn status(
    ctx: Context,
    Path(secret): Path<String>,
    body: String,
) -> Result<Json<Receipt>, Error> {
    receive(&ctx, webhook::Category::Status, secret, body).await
}

/// Contract signing day webhook.
#[tracing::instrument(skip_all, fields(webhook.category = "date-deal"))]
pub async fn date_deal(
    ctx: Context,
    Path(secret): Path<String>,
    body: String,
) -> Result<Json<Receipt>, Error> {
    receive(&ctx, webhook::Category::DateDeal, secret, body).await
}

/// Signed contract webhook.
#[tracing::instrument(skip_all, fields(webhook.category = "deal-success"))]
pub async fn deal_success(
    ctx: Context,
    Path(secret): Path<String>,
    body: String,
) -> Result<Json<Receipt>, Error> {
    receive(&ctx, webhook::Category::DealSuccess, secret, body).await
}

/// Validated agent data webhook.
#[tracing::instrument(skip_all, fields(webhook.category = "access-deal"))]
pub async fn access_deal(
    ctx: Context,
    Path(secret): Path<String>,
    body: String,
) -> Result<Json<Receipt>, Error> {
    receive(&ctx, webhook::Category::AccessDeal, secret, body).await
}

impl AsError for command::ingest_webhook::ExecutionError {
    fn try_as_error(&self) -> Option<Error> {
        match self {
            Self::Db(e) => e.try_as_error(),
            Self::InvalidSecret => Some(WebhookError::InvalidSecret.into()),
        }
    }
}

define_error! {
    enum WebhookError {
        #[code = "INVALID_SECRET"]
        #[status = FORBIDDEN]
        #[message = "Invalid webhook secret"]
        InvalidSecret,
    }
}
