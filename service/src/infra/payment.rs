//! [`Payment`] adapter definitions.

use std::sync::Arc;

use common::{
    define_kind,
    operations::{By, Select},
};
use derive_more::{Display, Error as StdError, From};
use secrecy::{ExposeSecret as _, SecretString};
use serde::Deserialize;
use tracerr::Traced;

use crate::{
    domain::booking,
    infra::http::{self, Retry},
};

/// Payment gateway operation.
pub use common::Handler as Payment;

define_kind! {
    #[doc = "Status of a payment gateway order."]
    enum OrderStatus {
        #[doc = "Order is registered, but not paid."]
        Created = 1,

        #[doc = "Payment is authorized, but not completed."]
        Pending = 2,

        #[doc = "Order is paid."]
        Succeeded = 3,

        #[doc = "Payment failed."]
        Failed = 4,

        #[doc = "Payment is refunded."]
        Refunded = 5,

        #[doc = "Payment is declined."]
        Declined = 6,
    }
}

impl OrderStatus {
    /// Converts the provided gateway order status code into an
    /// [`OrderStatus`].
    ///
    /// Unknown codes are considered [`OrderStatus::Failed`].
    #[must_use]
    pub const fn from_code(code: i64) -> Self {
        match code {
            0 => Self::Created,
            1 => Self::Pending,
            2 => Self::Succeeded,
            4 => Self::Refunded,
            6 => Self::Declined,
            _ => Self::Failed,
        }
    }
}

/// [`Sberbank`] configuration.
#[derive(Clone, Debug)]
pub struct Config {
    /// Base URL of the gateway API.
    pub base_url: String,

    /// Merchant login.
    pub username: String,

    /// Merchant password.
    pub password: SecretString,

    /// [`Retry`] policy of requests.
    pub retry: Retry,
}

/// [Sberbank] acquiring API client.
///
/// [Sberbank]: https://securepayments.sberbank.ru/wiki/doku.php
#[derive(Clone, Debug)]
pub struct Sberbank {
    /// HTTP client.
    http: reqwest::Client,

    /// [`Config`] of this client.
    config: Arc<Config>,
}

impl Sberbank {
    /// Creates a new [`Sberbank`] client with the provided [`Config`].
    #[must_use]
    pub fn new(http: reqwest::Client, config: Config) -> Self {
        Self {
            http,
            config: Arc::new(config),
        }
    }
}

impl Payment<Select<By<OrderStatus, booking::PaymentOrderId>>> for Sberbank {
    type Ok = OrderStatus;
    type Err = Traced<Error>;

    async fn execute(
        &self,
        Select(by): Select<By<OrderStatus, booking::PaymentOrderId>>,
    ) -> Result<Self::Ok, Self::Err> {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Status {
            order_status: Option<i64>,
        }

        let order_id = by.into_inner();
        let url = http::url(
            &self.config.base_url,
            "/payment/rest/getOrderStatusExtended.do",
        );
        let resp = self
            .config
            .retry
            .send("order_status", || {
                self.http.get(&url).query(&[
                    ("userName", self.config.username.as_str()),
                    ("password", self.config.password.expose_secret()),
                    ("orderId", order_id.as_str()),
                ])
            })
            .await
            .map_err(tracerr::from_and_wrap!())?;
        let status = resp.status();
        if !status.is_success() {
            return Err(tracerr::new!(Error::Status(status.as_u16())));
        }
        let Status { order_status } =
            resp.json().await.map_err(tracerr::from_and_wrap!())?;

        Ok(order_status.map_or(OrderStatus::Failed, OrderStatus::from_code))
    }
}

/// [`Payment`] error.
#[derive(Debug, Display, StdError, From)]
pub enum Error {
    /// HTTP request failed.
    #[display("Payment gateway request failed: {_0}")]
    Request(reqwest::Error),

    /// Payment gateway responded with an unsuccessful status.
    #[display("Payment gateway responded with `{_0}`")]
    #[from(ignore)]
    Status(#[error(not(source))] u16),
}
