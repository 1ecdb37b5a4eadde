//! Payment gateway callback endpoint.

use axum::{extract::Query, Json};
use serde::{Deserialize, Serialize};
use service::{
    command::{self, handle_payment_callback::Outcome, Command as _},
    domain::booking,
    infra::payment,
};

use crate::{define_error, AsError, Context, Error};

/// Query parameters of a payment gateway callback.
#[derive(Debug, Deserialize)]
pub struct Callback {
    /// Shared secret of the callback.
    pub secret: String,

    /// ID of the paid order.
    #[serde(rename = "orderNumber")]
    pub order_number: String,

    /// Order status reported by the gateway.
    ///
    /// Informational only, the gateway is asked for the actual status.
    pub status: Option<String>,
}

/// Result of handling a payment gateway callback.
#[derive(Clone, Copy, Debug, Serialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum Receipt {
    /// Booking is marked as paid.
    Payed,

    /// Booking was already paid before.
    AlreadyPaid,

    /// Gateway doesn't confirm the payment.
    Unpaid {
        /// [`payment::OrderStatus`] reported by the gateway.
        order_status: payment::OrderStatus,
    },
}

impl From<Outcome> for Receipt {
    fn from(outcome: Outcome) -> Self {
        match outcome {
            Outcome::Payed => Self::Payed,
            Outcome::AlreadyPaid => Self::AlreadyPaid,
            Outcome::Unpaid(order_status) => Self::Unpaid { order_status },
        }
    }
}

/// Payment gateway callback.
#[tracing::instrument(skip_all)]
pub async fn callback(
    ctx: Context,
    Query(callback): Query<Callback>,
) -> Result<Json<Receipt>, Error> {
    let Callback {
        secret,
        order_number,
        status,
    } = callback;
    tracing::info!(
        order = %order_number,
        ?status,
        "received payment gateway callback",
    );
    let order_id = booking::PaymentOrderId::new(order_number)
        .ok_or_else(|| Error::from(PaymentError::InvalidOrder))?;

    ctx.service()
        .execute(command::HandlePaymentCallback { secret, order_id })
        .await
        .map(|outcome| Json(outcome.into()))
        .map_err(AsError::into_error)
}

impl AsError for command::handle_payment_callback::ExecutionError {
    fn try_as_error(&self) -> Option<Error> {
        match self {
            Self::Crm(e) => e.try_as_error(),
            Self::Db(e) => e.try_as_error(),
            Self::InvalidSecret => Some(PaymentError::InvalidSecret.into()),
            Self::NotActive(_) => Some(PaymentError::NotActive.into()),
            Self::OrderNotExists(_) => Some(PaymentError::UnknownOrder.into()),
            Self::Payment(e) => e.try_as_error(),
        }
    }
}

define_error! {
    enum PaymentError {
        #[code = "INVALID_SECRET"]
        #[status = FORBIDDEN]
        #[message = "Invalid payment callback secret"]
        InvalidSecret,

        #[code = "INVALID_ORDER"]
        #[status = BAD_REQUEST]
        #[message = "Invalid payment order number"]
        InvalidOrder,

        #[code = "UNKNOWN_ORDER"]
        #[status = NOT_FOUND]
        #[message = "No booking is paid by the order"]
        UnknownOrder,

        #[code = "BOOKING_NOT_ACTIVE"]
        #[status = CONFLICT]
        #[message = "Paid booking is not active"]
        NotActive,
    }
}
