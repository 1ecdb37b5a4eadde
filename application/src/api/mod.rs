//! HTTP API definitions.

pub mod booking;
pub mod payment;
pub mod webhook;

use axum::{
    routing::{get, post},
    Router,
};

/// Builds the [`Router`] of all the HTTP API endpoints.
#[must_use]
pub fn router() -> Router {
    Router::new()
        .route("/webhooks/crm/:secret/status", post(webhook::status))
        .route("/webhooks/crm/:secret/date-deal", post(webhook::date_deal))
        .route(
            "/webhooks/crm/:secret/deal-success",
            post(webhook::deal_success),
        )
        .route(
            "/webhooks/crm/:secret/access-deal",
            post(webhook::access_deal),
        )
        .route(
            "/payments/callback",
            get(payment::callback).post(payment::callback),
        )
        .route("/bookings/:id", get(booking::get))
        .route("/bookings/:id/activate", post(booking::activate))
        .route("/bookings/:id/deactivate", post(booking::deactivate))
        .route("/bookings/:id/extend", post(booking::extend))
}
