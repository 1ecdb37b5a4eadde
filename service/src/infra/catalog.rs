//! [`Catalog`] adapter definitions.

use std::sync::Arc;

use common::{
    operations::{By, Select, Update},
    Money,
};
use derive_more::{Display, Error as StdError, From};
use rust_decimal::Decimal;
use secrecy::{ExposeSecret as _, SecretString};
use serde::Deserialize;
use serde_json::json;
use tracerr::Traced;

use crate::{
    domain::{project, unit, Building},
    infra::http::{self, Retry},
};

/// Property catalog operation.
pub use common::Handler as Catalog;

/// Change of a unit status in the catalog.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StatusChange {
    /// Reference of the unit.
    pub unit: unit::CatalogRef,

    /// New status of the unit.
    pub status: unit::Status,
}

/// Lookup of a unit in the catalog.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Lookup {
    /// ID of the unit.
    pub id: unit::Id,

    /// Kind of the unit.
    pub kind: unit::Kind,
}

/// Unit attributes known to the catalog.
#[derive(Clone, Debug, PartialEq)]
pub struct Listing {
    /// Floor of the unit, if any.
    pub floor: Option<unit::Floor>,

    /// Price of the unit, if known.
    pub price: Option<Money>,

    /// Current status of the unit.
    pub status: unit::Status,

    /// [`Building`] the unit is located in.
    pub building: Building,
}

/// [`Graphql`] catalog configuration.
#[derive(Clone, Debug)]
pub struct Config {
    /// URL of the GraphQL endpoint.
    pub url: String,

    /// Login of the internal user.
    pub login: String,

    /// Password of the internal user.
    pub password: SecretString,

    /// [`Retry`] policy of requests.
    pub retry: Retry,
}

/// GraphQL client of the property catalog.
#[derive(Clone, Debug)]
pub struct Graphql {
    /// HTTP client.
    http: reqwest::Client,

    /// [`Config`] of this client.
    config: Arc<Config>,
}

/// GraphQL response envelope.
#[derive(Deserialize)]
struct Envelope<T> {
    data: Option<T>,
    #[serde(default)]
    errors: Vec<GraphqlError>,
}

/// Single GraphQL error.
#[derive(Deserialize)]
struct GraphqlError {
    message: String,
}

impl Graphql {
    /// Creates a new [`Graphql`] client with the provided [`Config`].
    #[must_use]
    pub fn new(http: reqwest::Client, config: Config) -> Self {
        Self {
            http,
            config: Arc::new(config),
        }
    }

    /// Executes the provided GraphQL `query` with the given `variables`.
    async fn query<T>(
        &self,
        name: &str,
        query: &str,
        variables: serde_json::Value,
    ) -> Result<Option<T>, Traced<Error>>
    where
        T: for<'de> Deserialize<'de>,
    {
        let body = json!({ "query": query, "variables": variables });
        let resp = self
            .config
            .retry
            .send(name, || {
                self.http
                    .post(&self.config.url)
                    .basic_auth(
                        &self.config.login,
                        Some(self.config.password.expose_secret()),
                    )
                    .json(&body)
            })
            .await
            .map_err(tracerr::from_and_wrap!())?;
        let status = resp.status();
        if !status.is_success() {
            return Err(tracerr::new!(Error::Status(status.as_u16())));
        }

        let Envelope { data, errors } = resp
            .json::<Envelope<T>>()
            .await
            .map_err(tracerr::from_and_wrap!())?;
        if !errors.is_empty() {
            return Err(tracerr::new!(Error::Graphql(
                errors
                    .into_iter()
                    .map(|e| e.message)
                    .collect::<Vec<_>>()
                    .join("; "),
            )));
        }
        Ok(data)
    }
}

impl Catalog<Update<StatusChange>> for Graphql {
    type Ok = ();
    type Err = Traced<Error>;

    async fn execute(
        &self,
        Update(change): Update<StatusChange>,
    ) -> Result<Self::Ok, Self::Err> {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Changed {
            change_property_status: Option<Outcome>,
        }
        #[derive(Deserialize)]
        struct Outcome {
            ok: bool,
        }

        const QUERY: &str = "\
            mutation($globalId: ID!, $status: String!) { \
                changePropertyStatus(globalId: $globalId, status: $status) { \
                    ok \
                } \
            }";
        let changed = self
            .query::<Changed>(
                "change_property_status",
                QUERY,
                json!({
                    "globalId": change.unit.as_str(),
                    "status": change.status.to_string(),
                }),
            )
            .await
            .map_err(tracerr::wrap!())?;
        match changed.and_then(|c| c.change_property_status) {
            Some(Outcome { ok: true }) => Ok(()),
            Some(Outcome { ok: false }) | None => Err(tracerr::new!(
                Error::Graphql(format!("status of `{}` is not changed", change.unit))
            )),
        }
    }
}

impl Catalog<Select<By<Option<Listing>, Lookup>>> for Graphql {
    type Ok = Option<Listing>;
    type Err = Traced<Error>;

    async fn execute(
        &self,
        Select(by): Select<By<Option<Listing>, Lookup>>,
    ) -> Result<Self::Ok, Self::Err> {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Found {
            property: Option<PropertyDto>,
        }
        #[derive(Deserialize)]
        struct PropertyDto {
            floor: Option<unit::Floor>,
            price: Option<Decimal>,
            status: String,
            building: BuildingDto,
        }
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct BuildingDto {
            id: project::BuildingId,
            project_id: project::Id,
            name: String,
        }

        let Lookup { id, kind } = by.into_inner();
        let field = match kind {
            unit::Kind::Flat | unit::Kind::CommercialApartment => "globalFlat",
            unit::Kind::Parking => "globalParking",
            unit::Kind::Commercial => "globalCommercialSpace",
            unit::Kind::Pantry => "globalPantry",
        };
        let query = format!(
            "query($globalId: ID!) {{ \
                property: {field}(globalId: $globalId) {{ \
                    floor price status \
                    building {{ id projectId name }} \
                }} \
            }}",
        );
        let found = self
            .query::<Found>(
                "fetch_property",
                &query,
                json!({ "globalId": unit::CatalogRef::new(kind, id).as_str() }),
            )
            .await
            .map_err(tracerr::wrap!())?;

        let Some(p) = found.and_then(|f| f.property) else {
            return Ok(None);
        };
        let name = project::Name::new(p.building.name).ok_or_else(|| {
            tracerr::new!(Error::Graphql(format!(
                "building `{}` has invalid name",
                p.building.id,
            )))
        })?;
        Ok(Some(Listing {
            floor: p.floor,
            price: p.price.map(Money::rub),
            status: p.status.parse().unwrap_or(unit::Status::Sold),
            building: Building {
                id: p.building.id,
                project_id: p.building.project_id,
                name,
            },
        }))
    }
}

/// [`Catalog`] error.
#[derive(Debug, Display, StdError, From)]
pub enum Error {
    /// HTTP request failed.
    #[display("Catalog request failed: {_0}")]
    Request(reqwest::Error),

    /// Catalog responded with an unsuccessful status.
    #[display("Catalog responded with `{_0}`")]
    #[from(ignore)]
    Status(#[error(not(source))] u16),

    /// Catalog reported GraphQL errors.
    #[display("Catalog GraphQL error: {_0}")]
    #[from(ignore)]
    Graphql(#[error(not(source))] String),
}
