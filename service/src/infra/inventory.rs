//! [`Inventory`] adapter definitions.

use std::sync::Arc;

use common::operations::{By, Delete, Insert, Select};
use derive_more::{Display, Error as StdError, From};
use reqwest::{RequestBuilder, Response, StatusCode};
use secrecy::{ExposeSecret as _, SecretString};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::RwLock;
use tracerr::Traced;
use tracing as log;

use crate::{
    domain::{lead, unit},
    infra::http::{self, Retry},
};

/// Inventory operation.
pub use common::Handler as Inventory;

/// Attachment of a unit to a CRM deal.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Deal {
    /// ID of the unit.
    pub unit_id: unit::Id,

    /// ID of the CRM lead the unit is attached to.
    pub lead_id: lead::Id,
}

/// Result of attaching a unit to a [`Deal`].
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Booking {
    /// Indicator whether the unit is booked by this request.
    pub booked: bool,

    /// Indicator whether the unit is already attached to the deal.
    pub already_in_deal: bool,
}

impl Booking {
    /// Indicates whether the unit ends up booked.
    #[must_use]
    pub const fn is_booked(self) -> bool {
        self.booked || self.already_in_deal
    }
}

/// Result of detaching a unit from a [`Deal`].
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Unbooking {
    /// Indicator whether the unit is detached.
    pub success: bool,
}

/// [`Profitbase`] configuration.
#[derive(Clone, Debug)]
pub struct Config {
    /// Base URL of the API.
    pub base_url: String,

    /// API key.
    pub api_key: SecretString,

    /// [`Retry`] policy of requests.
    pub retry: Retry,
}

/// [Profitbase] API client.
///
/// [Profitbase]: https://developer.profitbase.ru
#[derive(Clone, Debug)]
pub struct Profitbase {
    /// HTTP client.
    http: reqwest::Client,

    /// [`Config`] of this client.
    config: Arc<Config>,

    /// Current access token, if authenticated.
    token: Arc<RwLock<Option<SecretString>>>,
}

/// Error code of a unit already attached to a deal.
const ALREADY_IN_DEAL: &str = "property_already_in_deal";

impl Profitbase {
    /// Creates a new [`Profitbase`] client with the provided [`Config`].
    #[must_use]
    pub fn new(http: reqwest::Client, config: Config) -> Self {
        Self {
            http,
            config: Arc::new(config),
            token: Arc::new(RwLock::new(None)),
        }
    }

    /// Sends the request built by `make`, re-authenticating once if it's
    /// rejected.
    async fn send<F>(&self, name: &str, make: F) -> Result<Response, Traced<Error>>
    where
        F: Fn(&reqwest::Client) -> RequestBuilder,
    {
        let cached = self
            .token
            .read()
            .await
            .as_ref()
            .map(|t| t.expose_secret().to_owned());
        let token = match cached {
            Some(t) => t,
            None => self.authenticate(None).await.map_err(tracerr::wrap!())?,
        };

        let resp = self
            .config
            .retry
            .send(name, || {
                make(&self.http).query(&[("access_token", token.as_str())])
            })
            .await
            .map_err(tracerr::from_and_wrap!())?;
        if !matches!(
            resp.status(),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN,
        ) {
            return Ok(resp);
        }

        log::info!("Inventory rejected `{name}` with `{}`", resp.status());
        let token = self
            .authenticate(Some(&token))
            .await
            .map_err(tracerr::wrap!())?;
        self.config
            .retry
            .send(name, || {
                make(&self.http).query(&[("access_token", token.as_str())])
            })
            .await
            .map_err(tracerr::from_and_wrap!())
    }

    /// Obtains a new access token, unless it was already replaced since the
    /// `stale` one was read.
    async fn authenticate(
        &self,
        stale: Option<&str>,
    ) -> Result<String, Traced<Error>> {
        #[derive(Deserialize)]
        struct Authenticated {
            access_token: String,
        }

        let mut token = self.token.write().await;
        if let Some(t) = token.as_ref() {
            if Some(t.expose_secret()) != stale {
                return Ok(t.expose_secret().to_owned());
            }
        }

        let body = json!({
            "type": "api-app",
            "credentials": { "pb_api_key": self.config.api_key.expose_secret() },
        });
        let url = http::url(&self.config.base_url, "/authentication");
        let resp = self
            .config
            .retry
            .send("authenticate", || self.http.post(&url).json(&body))
            .await
            .map_err(tracerr::from_and_wrap!())?;
        let status = resp.status();
        if !status.is_success() {
            return Err(tracerr::new!(Error::Status(status.as_u16())));
        }
        let Authenticated { access_token } =
            resp.json().await.map_err(tracerr::from_and_wrap!())?;

        *token = Some(access_token.clone().into());
        Ok(access_token)
    }
}

impl Inventory<Select<By<Option<unit::Status>, unit::Id>>> for Profitbase {
    type Ok = Option<unit::Status>;
    type Err = Traced<Error>;

    async fn execute(
        &self,
        Select(by): Select<By<Option<unit::Status>, unit::Id>>,
    ) -> Result<Self::Ok, Self::Err> {
        #[derive(Deserialize)]
        struct Properties {
            #[serde(default)]
            data: Vec<Property>,
        }
        #[derive(Deserialize)]
        struct Property {
            status: String,
        }

        let id = by.into_inner().to_string();
        let url = http::url(&self.config.base_url, "/property");
        let resp = self
            .send("fetch_property", |c| c.get(&url).query(&[("id", &id)]))
            .await
            .map_err(tracerr::wrap!())?;
        let status = resp.status();
        if !status.is_success() {
            return Err(tracerr::new!(Error::Status(status.as_u16())));
        }
        let Properties { data } =
            resp.json().await.map_err(tracerr::from_and_wrap!())?;

        Ok(data.first().map(|p| normalize(&p.status)))
    }
}

impl Inventory<Insert<Deal>> for Profitbase {
    type Ok = Booking;
    type Err = Traced<Error>;

    async fn execute(
        &self,
        Insert(deal): Insert<Deal>,
    ) -> Result<Self::Ok, Self::Err> {
        #[derive(Deserialize)]
        struct Reply {
            #[serde(default)]
            success: bool,
            #[serde(default)]
            code: Option<String>,
        }

        let body = json!({
            "propertyId": deal.unit_id,
            "dealId": deal.lead_id,
        });
        let url = http::url(&self.config.base_url, "/crm/addPropertyDeal");
        let resp = self
            .send("book_unit", |c| c.post(&url).json(&body))
            .await
            .map_err(tracerr::wrap!())?;
        let status = resp.status();
        if status.is_server_error() {
            return Err(tracerr::new!(Error::Status(status.as_u16())));
        }
        // Rejections are reported with a `4xx` status and a JSON body.
        let Reply { success, code } =
            resp.json().await.map_err(tracerr::from_and_wrap!())?;

        Ok(Booking {
            booked: success,
            already_in_deal: code.as_deref() == Some(ALREADY_IN_DEAL),
        })
    }
}

impl Inventory<Delete<By<Deal, lead::Id>>> for Profitbase {
    type Ok = Unbooking;
    type Err = Traced<Error>;

    async fn execute(
        &self,
        Delete(by): Delete<By<Deal, lead::Id>>,
    ) -> Result<Self::Ok, Self::Err> {
        #[derive(Deserialize)]
        struct Reply {
            #[serde(default)]
            success: bool,
        }

        let body = json!({ "dealId": by.into_inner() });
        let url = http::url(&self.config.base_url, "/crm/removePropertyDeal");
        let resp = self
            .send("unbook_unit", |c| c.post(&url).json(&body))
            .await
            .map_err(tracerr::wrap!())?;
        let status = resp.status();
        if status.is_server_error() {
            return Err(tracerr::new!(Error::Status(status.as_u16())));
        }
        let Reply { success } =
            resp.json().await.map_err(tracerr::from_and_wrap!())?;

        Ok(Unbooking { success })
    }
}

/// Normalizes the provided inventory status into a [`unit::Status`].
fn normalize(status: &str) -> unit::Status {
    match status {
        "AVAILABLE" => unit::Status::Free,
        "BOOKED" => unit::Status::Booked,
        // "UNAVAILABLE", "EXECUTION", "SOLD" and anything unknown.
        _ => unit::Status::Sold,
    }
}

/// [`Inventory`] error.
#[derive(Debug, Display, StdError, From)]
pub enum Error {
    /// HTTP request failed.
    #[display("Inventory request failed: {_0}")]
    Request(reqwest::Error),

    /// Inventory responded with an unsuccessful status.
    #[display("Inventory responded with `{_0}`")]
    #[from(ignore)]
    Status(#[error(not(source))] u16),
}
