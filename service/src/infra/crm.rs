//! [`Crm`] adapter definitions.

use std::sync::Arc;

use common::{
    operations::{By, Insert, Select, Update},
    DateTime, Money,
};
use derive_more::{Display, Error as StdError, From};
use reqwest::{RequestBuilder, Response, StatusCode};
use rust_decimal::prelude::ToPrimitive as _;
use secrecy::{ExposeSecret as _, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::RwLock;
use tracerr::Traced;
use tracing as log;

use crate::{
    domain::{lead, Lead},
    infra::http::{self, Retry},
};

/// CRM operation.
pub use common::Handler as Crm;

/// New [`Lead`] to be created in the CRM.
#[derive(Clone, Debug, Default)]
pub struct NewLead {
    /// Name of the [`Lead`].
    pub name: String,

    /// CRM pipeline to put the [`Lead`] into.
    pub pipeline_id: lead::PipelineId,

    /// Initial status of the [`Lead`].
    pub status_id: lead::StatusId,

    /// CRM user responsible for the [`Lead`], if any.
    pub responsible_user_id: Option<lead::ResponsibleId>,

    /// Contacts to attach to the [`Lead`].
    pub contacts: Vec<lead::ContactId>,

    /// Price of the [`Lead`], if known.
    pub price: Option<Money>,

    /// Custom fields to seed the [`Lead`] with.
    pub custom_fields: lead::CustomFields,
}

/// Field-set update of an existing [`Lead`].
#[derive(Clone, Debug, Default)]
pub struct LeadPatch {
    /// ID of the [`Lead`] to update.
    pub id: lead::Id,

    /// New pipeline of the [`Lead`], if any.
    pub pipeline_id: Option<lead::PipelineId>,

    /// New status of the [`Lead`], if any.
    pub status_id: Option<lead::StatusId>,

    /// Custom fields to overwrite.
    pub custom_fields: lead::CustomFields,
}

/// Text note to be appended to a [`Lead`].
#[derive(Clone, Debug)]
pub struct Note {
    /// ID of the [`Lead`].
    pub lead_id: lead::Id,

    /// Text of the note.
    pub text: String,
}

/// New task for a CRM user about a [`Lead`].
#[derive(Clone, Debug)]
pub struct NewTask {
    /// ID of the [`Lead`].
    pub lead_id: lead::Id,

    /// Text of the task.
    pub text: String,

    /// Deadline of the task.
    pub complete_till: DateTime,

    /// CRM user responsible for the task, if any.
    pub responsible_user_id: Option<lead::ResponsibleId>,
}

/// Completion of a CRM task.
#[derive(Clone, Debug)]
pub struct TaskCompletion {
    /// ID of the task.
    pub id: lead::TaskId,

    /// Result of the task.
    pub result: String,
}

/// [`Amocrm`] configuration.
#[derive(Clone, Debug)]
pub struct Config {
    /// Base URL of the CRM account.
    pub base_url: String,

    /// OAuth client ID.
    pub client_id: String,

    /// OAuth client secret.
    pub client_secret: SecretString,

    /// OAuth redirect URI registered for the client.
    pub redirect_uri: String,

    /// Initial OAuth access token.
    pub access_token: SecretString,

    /// Initial OAuth refresh token.
    pub refresh_token: SecretString,

    /// Maximum number of [`Lead`] IDs per request.
    pub batch_limit: usize,

    /// [`Retry`] policy of requests.
    pub retry: Retry,
}

/// [AmoCRM] API v4 client.
///
/// [AmoCRM]: https://www.amocrm.ru/developers/content/crm_platform/api-reference
#[derive(Clone, Debug)]
pub struct Amocrm {
    /// HTTP client.
    http: reqwest::Client,

    /// [`Config`] of this client.
    config: Arc<Config>,

    /// Current OAuth tokens.
    tokens: Arc<RwLock<Tokens>>,
}

/// OAuth tokens of an [`Amocrm`] client.
#[derive(Debug)]
struct Tokens {
    /// Access token.
    access: SecretString,

    /// Refresh token.
    refresh: SecretString,
}

impl Amocrm {
    /// Creates a new [`Amocrm`] client with the provided [`Config`].
    #[must_use]
    pub fn new(http: reqwest::Client, config: Config) -> Self {
        let tokens = Tokens {
            access: config.access_token.clone(),
            refresh: config.refresh_token.clone(),
        };
        Self {
            http,
            config: Arc::new(config),
            tokens: Arc::new(RwLock::new(tokens)),
        }
    }

    /// Returns the full URL of the provided API `path`.
    fn url(&self, path: &str) -> String {
        http::url(&self.config.base_url, path)
    }

    /// Sends the request built by `make`, refreshing the access token once
    /// and replaying the request if the CRM rejects it.
    async fn send<F>(&self, name: &str, make: F) -> Result<Response, Traced<Error>>
    where
        F: Fn(&reqwest::Client) -> RequestBuilder,
    {
        let token = self.tokens.read().await.access.expose_secret().to_owned();
        let resp = self
            .config
            .retry
            .send(name, || make(&self.http).bearer_auth(&token))
            .await
            .map_err(tracerr::from_and_wrap!())?;
        if !matches!(
            resp.status(),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN,
        ) {
            return Ok(resp);
        }

        log::info!("CRM rejected `{name}` with `{}`", resp.status());
        let token = self.refresh(&token).await.map_err(tracerr::wrap!())?;
        self.config
            .retry
            .send(name, || make(&self.http).bearer_auth(&token))
            .await
            .map_err(tracerr::from_and_wrap!())
    }

    /// Refreshes the OAuth tokens, unless they were already refreshed since
    /// the `stale` access token was read.
    async fn refresh(&self, stale: &str) -> Result<String, Traced<Error>> {
        #[derive(Deserialize)]
        struct Refreshed {
            access_token: String,
            refresh_token: String,
        }

        let mut tokens = self.tokens.write().await;
        if tokens.access.expose_secret() != stale {
            return Ok(tokens.access.expose_secret().to_owned());
        }

        let body = json!({
            "client_id": self.config.client_id,
            "client_secret": self.config.client_secret.expose_secret(),
            "grant_type": "refresh_token",
            "refresh_token": tokens.refresh.expose_secret(),
            "redirect_uri": self.config.redirect_uri,
        });
        let resp = self
            .config
            .retry
            .send("refresh_token", || {
                self.http.post(self.url("/oauth2/access_token")).json(&body)
            })
            .await
            .map_err(tracerr::from_and_wrap!())?;
        let Refreshed {
            access_token,
            refresh_token,
        } = ok(resp)
            .await
            .map_err(tracerr::wrap!())?
            .json()
            .await
            .map_err(tracerr::from_and_wrap!())?;

        log::info!("CRM access token refreshed");
        tokens.access = access_token.clone().into();
        tokens.refresh = refresh_token.into();
        Ok(access_token)
    }
}

impl Crm<Select<By<Option<Lead>, lead::Id>>> for Amocrm {
    type Ok = Option<Lead>;
    type Err = Traced<Error>;

    async fn execute(
        &self,
        Select(by): Select<By<Option<Lead>, lead::Id>>,
    ) -> Result<Self::Ok, Self::Err> {
        let id = by.into_inner();
        let url = self.url(&format!("/api/v4/leads/{id}"));
        let resp = self
            .send("fetch_lead", |c| c.get(&url).query(&[("with", "contacts")]))
            .await
            .map_err(tracerr::wrap!())?;
        if matches!(resp.status(), StatusCode::NO_CONTENT | StatusCode::NOT_FOUND)
        {
            return Ok(None);
        }

        let lead = ok(resp)
            .await
            .map_err(tracerr::wrap!())?
            .json::<LeadDto>()
            .await
            .map_err(tracerr::from_and_wrap!())?;
        Ok(Some(lead.into()))
    }
}

impl Crm<Select<By<Vec<Lead>, Vec<lead::Id>>>> for Amocrm {
    type Ok = Vec<Lead>;
    type Err = Traced<Error>;

    async fn execute(
        &self,
        Select(by): Select<By<Vec<Lead>, Vec<lead::Id>>>,
    ) -> Result<Self::Ok, Self::Err> {
        #[derive(Default, Deserialize)]
        struct Page {
            #[serde(rename = "_embedded", default)]
            embedded: Embedded,
        }
        #[derive(Default, Deserialize)]
        struct Embedded {
            #[serde(default)]
            leads: Vec<LeadDto>,
        }

        let ids = by.into_inner();
        let url = self.url("/api/v4/leads");
        let mut leads = Vec::with_capacity(ids.len());
        for chunk in ids.chunks(self.config.batch_limit.max(1)) {
            let mut query = chunk
                .iter()
                .map(|id| ("filter[id][]", id.to_string()))
                .collect::<Vec<_>>();
            query.push(("with", "contacts".to_owned()));
            query.push(("limit", chunk.len().to_string()));

            let resp = self
                .send("fetch_leads", |c| c.get(&url).query(&query))
                .await
                .map_err(tracerr::wrap!())?;
            if resp.status() == StatusCode::NO_CONTENT {
                continue;
            }
            let page = ok(resp)
                .await
                .map_err(tracerr::wrap!())?
                .json::<Page>()
                .await
                .map_err(tracerr::from_and_wrap!())?;
            leads.extend(page.embedded.leads.into_iter().map(Lead::from));
        }
        Ok(leads)
    }
}

impl Crm<Insert<NewLead>> for Amocrm {
    type Ok = Lead;
    type Err = Traced<Error>;

    async fn execute(
        &self,
        Insert(new): Insert<NewLead>,
    ) -> Result<Self::Ok, Self::Err> {
        #[derive(Deserialize)]
        struct Created {
            #[serde(rename = "_embedded")]
            embedded: Embedded,
        }
        #[derive(Deserialize)]
        struct Embedded {
            leads: Vec<CreatedLead>,
        }
        #[derive(Deserialize)]
        struct CreatedLead {
            id: lead::Id,
        }

        let body = json!([{
            "name": new.name,
            "pipeline_id": new.pipeline_id,
            "status_id": new.status_id,
            "responsible_user_id": new.responsible_user_id,
            "price": new.price.and_then(|p| p.amount.trunc().to_i64()),
            "custom_fields_values": FieldDto::from_fields(&new.custom_fields),
            "_embedded": {
                "contacts": new
                    .contacts
                    .iter()
                    .map(|id| json!({ "id": id }))
                    .collect::<Vec<_>>(),
            },
        }]);
        let url = self.url("/api/v4/leads");
        let resp = self
            .send("create_lead", |c| c.post(&url).json(&body))
            .await
            .map_err(tracerr::wrap!())?;
        let created = ok(resp)
            .await
            .map_err(tracerr::wrap!())?
            .json::<Created>()
            .await
            .map_err(tracerr::from_and_wrap!())?;
        let id = created
            .embedded
            .leads
            .first()
            .map(|l| l.id)
            .ok_or_else(|| {
                tracerr::new!(Error::Malformed("no lead is created".into()))
            })?;

        Ok(Lead {
            id,
            pipeline_id: new.pipeline_id,
            status_id: new.status_id,
            responsible_user_id: new.responsible_user_id,
            is_deleted: false,
            contacts: new.contacts,
            custom_fields: new.custom_fields,
        })
    }
}

impl Crm<Update<LeadPatch>> for Amocrm {
    type Ok = ();
    type Err = Traced<Error>;

    async fn execute(
        &self,
        Update(patch): Update<LeadPatch>,
    ) -> Result<Self::Ok, Self::Err> {
        let LeadPatch {
            id,
            pipeline_id,
            status_id,
            custom_fields,
        } = patch;

        let mut body = serde_json::Map::new();
        if let Some(p) = pipeline_id {
            drop(body.insert("pipeline_id".into(), json!(p)));
        }
        if let Some(s) = status_id {
            drop(body.insert("status_id".into(), json!(s)));
        }
        let fields = FieldDto::from_fields(&custom_fields);
        if !fields.is_empty() {
            drop(body.insert("custom_fields_values".into(), json!(fields)));
        }

        let url = self.url(&format!("/api/v4/leads/{id}"));
        let resp = self
            .send("update_lead", |c| c.patch(&url).json(&body))
            .await
            .map_err(tracerr::wrap!())?;
        ok(resp).await.map_err(tracerr::wrap!()).map(drop)
    }
}

impl Crm<Insert<Note>> for Amocrm {
    type Ok = ();
    type Err = Traced<Error>;

    async fn execute(
        &self,
        Insert(note): Insert<Note>,
    ) -> Result<Self::Ok, Self::Err> {
        let body = json!([{
            "note_type": "common",
            "params": { "text": note.text },
        }]);
        let url = self.url(&format!("/api/v4/leads/{}/notes", note.lead_id));
        let resp = self
            .send("create_note", |c| c.post(&url).json(&body))
            .await
            .map_err(tracerr::wrap!())?;
        ok(resp).await.map_err(tracerr::wrap!()).map(drop)
    }
}

impl Crm<Insert<NewTask>> for Amocrm {
    type Ok = lead::TaskId;
    type Err = Traced<Error>;

    async fn execute(
        &self,
        Insert(task): Insert<NewTask>,
    ) -> Result<Self::Ok, Self::Err> {
        #[derive(Deserialize)]
        struct Created {
            #[serde(rename = "_embedded")]
            embedded: Embedded,
        }
        #[derive(Deserialize)]
        struct Embedded {
            tasks: Vec<CreatedTask>,
        }
        #[derive(Deserialize)]
        struct CreatedTask {
            id: lead::TaskId,
        }

        let body = json!([{
            "text": task.text,
            "complete_till": task.complete_till.unix_timestamp(),
            "entity_id": task.lead_id,
            "entity_type": "leads",
            "responsible_user_id": task.responsible_user_id,
        }]);
        let url = self.url("/api/v4/tasks");
        let resp = self
            .send("create_task", |c| c.post(&url).json(&body))
            .await
            .map_err(tracerr::wrap!())?;
        ok(resp)
            .await
            .map_err(tracerr::wrap!())?
            .json::<Created>()
            .await
            .map_err(tracerr::from_and_wrap!())?
            .embedded
            .tasks
            .first()
            .map(|t| t.id)
            .ok_or_else(|| {
                tracerr::new!(Error::Malformed("no task is created".into()))
            })
    }
}

impl Crm<Update<TaskCompletion>> for Amocrm {
    type Ok = ();
    type Err = Traced<Error>;

    async fn execute(
        &self,
        Update(done): Update<TaskCompletion>,
    ) -> Result<Self::Ok, Self::Err> {
        let body = json!({
            "is_completed": true,
            "result": { "text": done.result },
        });
        let url = self.url(&format!("/api/v4/tasks/{}", done.id));
        let resp = self
            .send("complete_task", |c| c.patch(&url).json(&body))
            .await
            .map_err(tracerr::wrap!())?;
        ok(resp).await.map_err(tracerr::wrap!()).map(drop)
    }
}

/// Ensures the provided [`Response`] is successful.
async fn ok(resp: Response) -> Result<Response, Traced<Error>> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(tracerr::new!(Error::Status {
        status: status.as_u16(),
        body,
    }))
}

/// [`Lead`] representation in the CRM API.
#[derive(Deserialize)]
struct LeadDto {
    id: lead::Id,
    #[serde(default)]
    pipeline_id: lead::PipelineId,
    #[serde(default)]
    status_id: lead::StatusId,
    #[serde(default)]
    responsible_user_id: Option<lead::ResponsibleId>,
    #[serde(default)]
    is_deleted: bool,
    #[serde(default)]
    custom_fields_values: Option<Vec<FieldDto>>,
    #[serde(rename = "_embedded", default)]
    embedded: Option<LeadEmbeddedDto>,
}

/// Embedded entities of a [`LeadDto`].
#[derive(Default, Deserialize)]
struct LeadEmbeddedDto {
    #[serde(default)]
    contacts: Vec<ContactDto>,
}

/// Contact reference in the CRM API.
#[derive(Deserialize)]
struct ContactDto {
    id: lead::ContactId,
}

/// Custom field value in the CRM API.
#[derive(Deserialize, Serialize)]
struct FieldDto {
    field_id: lead::FieldId,
    values: Vec<ValueDto>,
}

/// Single value of a [`FieldDto`].
#[derive(Deserialize, Serialize)]
struct ValueDto {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    value: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    enum_id: Option<lead::EnumId>,
}

impl FieldDto {
    /// Converts the provided [`lead::CustomFields`] into [`FieldDto`]s.
    fn from_fields(fields: &lead::CustomFields) -> Vec<Self> {
        let mut dtos = fields
            .iter()
            .map(|(field_id, values)| Self {
                field_id,
                values: values
                    .iter()
                    .map(|v| ValueDto {
                        value: v.value.clone().map(serde_json::Value::String),
                        enum_id: v.enum_id,
                    })
                    .collect(),
            })
            .collect::<Vec<_>>();
        dtos.sort_unstable_by_key(|f| f.field_id);
        dtos
    }
}

impl From<LeadDto> for Lead {
    fn from(dto: LeadDto) -> Self {
        let LeadDto {
            id,
            pipeline_id,
            status_id,
            responsible_user_id,
            is_deleted,
            custom_fields_values,
            embedded,
        } = dto;

        Self {
            id,
            pipeline_id,
            status_id,
            responsible_user_id,
            is_deleted,
            contacts: embedded
                .unwrap_or_default()
                .contacts
                .into_iter()
                .map(|c| c.id)
                .collect(),
            custom_fields: custom_fields_values
                .unwrap_or_default()
                .into_iter()
                .map(|f| {
                    let values = f
                        .values
                        .into_iter()
                        .map(|v| lead::FieldValue {
                            value: v.value.and_then(|v| match v {
                                serde_json::Value::String(s) => Some(s),
                                serde_json::Value::Number(n) => {
                                    Some(n.to_string())
                                }
                                serde_json::Value::Bool(b) => {
                                    Some(b.to_string())
                                }
                                serde_json::Value::Null
                                | serde_json::Value::Array(_)
                                | serde_json::Value::Object(_) => None,
                            }),
                            enum_id: v.enum_id,
                        })
                        .collect();
                    (f.field_id, values)
                })
                .collect(),
        }
    }
}

/// [`Crm`] error.
#[derive(Debug, Display, StdError, From)]
pub enum Error {
    /// HTTP request failed.
    #[display("CRM request failed: {_0}")]
    Request(reqwest::Error),

    /// CRM responded with an unsuccessful status.
    #[display("CRM responded with `{status}`: {body}")]
    #[from(ignore)]
    Status {
        /// HTTP status code.
        status: u16,

        /// Response body.
        body: String,
    },

    /// CRM response is malformed.
    #[display("CRM response is malformed: {_0}")]
    #[from(ignore)]
    Malformed(#[error(not(source))] String),
}

#[cfg(test)]
mod spec {
    use std::time::Duration;

    use common::operations::{By, Insert, Select, Update};
    use secrecy::SecretString;
    use serde_json::json;
    use wiremock::{
        matchers::{body_partial_json, header, method, path, query_param},
        Mock, MockServer, ResponseTemplate,
    };

    use crate::{
        domain::{lead, Lead},
        infra::http::Retry,
    };

    use super::{Amocrm, Config, Crm as _, Error, LeadPatch, Note, TaskCompletion};

    fn client(server: &MockServer) -> Amocrm {
        Amocrm::new(
            reqwest::Client::new(),
            Config {
                base_url: server.uri(),
                client_id: "client".into(),
                client_secret: SecretString::from("secret"),
                redirect_uri: "https://example.com".into(),
                access_token: SecretString::from("stale"),
                refresh_token: SecretString::from("refresh"),
                batch_limit: 2,
                retry: Retry {
                    attempts: 2,
                    backoff: Duration::from_millis(1),
                },
            },
        )
    }

    fn lead_json(id: i64, status_id: i64) -> serde_json::Value {
        json!({
            "id": id,
            "status_id": status_id,
            "pipeline_id": 1_305_043,
            "responsible_user_id": 5,
            "is_deleted": false,
            "custom_fields_values": [
                { "field_id": 363_971, "values": [{ "value": "4321" }] },
                { "field_id": 366_965, "values": [{ "value": "Квартира", "enum_id": 715_523 }] },
                { "field_id": 812_300, "values": [{ "value": 150_000 }] },
            ],
            "_embedded": { "contacts": [{ "id": 77, "is_main": true }] },
        })
    }

    #[tokio::test]
    async fn fetches_lead() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v4/leads/42"))
            .and(query_param("with", "contacts"))
            .and(header("authorization", "Bearer stale"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(lead_json(42, 21)),
            )
            .expect(1)
            .mount(&server)
            .await;

        let lead: Lead = client(&server)
            .execute(Select(By::new(lead::Id::from(42))))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(lead.id, lead::Id::from(42));
        assert_eq!(lead.status_id, lead::StatusId::from(21));
        assert_eq!(lead.contacts, vec![lead::ContactId::from(77)]);
        assert_eq!(
            lead.custom_fields.value(lead::FieldId::from(363_971)),
            Some("4321"),
        );
        assert_eq!(
            lead.custom_fields.value(lead::FieldId::from(812_300)),
            Some("150000"),
        );
        assert_eq!(
            lead.custom_fields.enum_id(lead::FieldId::from(366_965)),
            Some(lead::EnumId::from(715_523)),
        );
    }

    #[tokio::test]
    async fn missing_lead_is_none() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v4/leads/42"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;

        let lead = client(&server)
            .execute(Select(By::<Option<Lead>, _>::new(lead::Id::from(42))))
            .await
            .unwrap();

        assert_eq!(lead, None);
    }

    #[tokio::test]
    async fn refreshes_token_once_and_replays() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v4/leads/42"))
            .and(header("authorization", "Bearer stale"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/oauth2/access_token"))
            .and(body_partial_json(json!({
                "grant_type": "refresh_token",
                "refresh_token": "refresh",
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "fresh",
                "refresh_token": "refresh2",
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v4/leads/42"))
            .and(header("authorization", "Bearer fresh"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(lead_json(42, 21)),
            )
            .expect(1)
            .mount(&server)
            .await;

        let lead = client(&server)
            .execute(Select(By::<Option<Lead>, _>::new(lead::Id::from(42))))
            .await
            .unwrap();

        assert!(lead.is_some());
    }

    #[tokio::test]
    async fn fails_when_refresh_does_not_help() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v4/leads/42"))
            .respond_with(ResponseTemplate::new(403))
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/oauth2/access_token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "fresh",
                "refresh_token": "refresh2",
            })))
            .expect(1)
            .mount(&server)
            .await;

        let err = client(&server)
            .execute(Select(By::<Option<Lead>, _>::new(lead::Id::from(42))))
            .await
            .unwrap_err();

        assert!(matches!(
            err.as_ref(),
            Error::Status { status: 403, .. },
        ));
    }

    #[tokio::test]
    async fn fetches_leads_in_batches() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v4/leads"))
            .and(query_param("limit", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "_embedded": { "leads": [lead_json(1, 21), lead_json(2, 21)] },
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v4/leads"))
            .and(query_param("limit", "1"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let leads = client(&server)
            .execute(Select(By::<Vec<Lead>, _>::new(vec![
                lead::Id::from(1),
                lead::Id::from(2),
                lead::Id::from(3),
            ])))
            .await
            .unwrap();

        assert_eq!(leads.len(), 2);
    }

    #[tokio::test]
    async fn writes_lead_note_and_task() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(path("/api/v4/leads/42"))
            .and(body_partial_json(json!({ "status_id": 143 })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/v4/leads/42/notes"))
            .and(body_partial_json(json!([{ "note_type": "common" }])))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("PATCH"))
            .and(path("/api/v4/tasks/9"))
            .and(body_partial_json(json!({ "is_completed": true })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(1)
            .mount(&server)
            .await;

        let crm = client(&server);
        crm.execute(Update(LeadPatch {
            id: lead::Id::from(42),
            status_id: Some(lead::StatusId::from(143)),
            ..LeadPatch::default()
        }))
        .await
        .unwrap();
        crm.execute(Insert(Note {
            lead_id: lead::Id::from(42),
            text: "Unit is booked".into(),
        }))
        .await
        .unwrap();
        crm.execute(Update(TaskCompletion {
            id: lead::TaskId::from(9),
            result: "Done".into(),
        }))
        .await
        .unwrap();
    }
}
