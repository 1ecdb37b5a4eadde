//! CRM webhook [`Request`] definitions.

use std::{collections::HashMap, sync::LazyLock};

use common::{define_kind, unit, DateTime, DateTimeOf};
use derive_more::{Display, Error, From, Into};
#[cfg(feature = "postgres")]
use postgres_types::{FromSql, ToSql};
use regex::Regex;
use uuid::Uuid;
use xxhash_rust::xxh3::xxh3_64;

use crate::domain::{booking::purchase, lead};

/// Raw inbound CRM webhook, stored verbatim before any processing.
#[derive(Clone, Debug, PartialEq)]
pub struct Request {
    /// ID of this [`Request`].
    pub id: Id,

    /// [`Category`] of this [`Request`].
    pub category: Category,

    /// Raw body of this [`Request`].
    pub body: String,

    /// [`Hash`] of the [`Category`] and the body.
    pub hash: Hash,

    /// [`Subject`] of this [`Request`], if its body is parseable.
    pub subject: Option<Subject>,

    /// [`DateTime`] when this [`Request`] was received.
    pub received_at: ReceptionDateTime,

    /// [`Outcome`] of processing this [`Request`].
    pub outcome: Outcome,
}

impl Request {
    /// Creates a new pending [`Request`] received right now.
    #[must_use]
    pub fn new(category: Category, body: String) -> Self {
        let subject = Event::parse(category, &body)
            .ok()
            .map(|ev| Subject::new(category, &ev));
        Self {
            id: Id(Uuid::new_v4()),
            hash: Hash::new(category, &body),
            subject,
            category,
            body,
            received_at: DateTime::now().coerce(),
            outcome: Outcome::Pending,
        }
    }

    /// Parses the body of this [`Request`] into an [`Event`].
    ///
    /// # Errors
    ///
    /// If the body doesn't match the [`Category`] of this [`Request`].
    pub fn parse(&self) -> Result<Event, ParseError> {
        Event::parse(self.category, &self.body)
    }
}

/// ID of a [`Request`].
#[derive(Clone, Copy, Debug, Display, Eq, From, Hash, Into, PartialEq)]
#[cfg_attr(feature = "postgres", derive(ToSql, FromSql), postgres(transparent))]
pub struct Id(Uuid);

/// Leads of a [`Category`] a [`Request`] is about.
///
/// Redeliveries are detected among [`Request`]s of the same [`Subject`] only.
#[derive(Clone, Debug, Display, Eq, Hash, PartialEq)]
#[cfg_attr(feature = "postgres", derive(ToSql, FromSql), postgres(transparent))]
pub struct Subject(String);

impl Subject {
    /// Creates a new [`Subject`] of the provided [`Category`] and [`Event`].
    #[must_use]
    pub fn new(category: Category, event: &Event) -> Self {
        let mut leads = event.lead_ids();
        leads.sort_unstable();
        leads.dedup();
        let leads = leads
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(",");
        Self(format!("{category}:{leads}"))
    }
}

/// Hash of a [`Request`] used to detect redeliveries.
#[derive(Clone, Copy, Debug, Display, Eq, Hash, PartialEq)]
pub struct Hash(u64);

impl Hash {
    /// Computes a new [`Hash`] of the provided [`Category`] and body.
    #[must_use]
    pub fn new(category: Category, body: &str) -> Self {
        let mut input = Vec::with_capacity(body.len() + 1);
        input.push(category.u8());
        input.extend_from_slice(body.as_bytes());
        Self(xxh3_64(&input))
    }
}

#[cfg(feature = "postgres")]
impl<'a> FromSql<'a> for Hash {
    postgres_types::accepts!(INT8);

    fn from_sql(
        ty: &postgres_types::Type,
        raw: &'a [u8],
    ) -> Result<Self, Box<dyn std::error::Error + Sync + Send>> {
        i64::from_sql(ty, raw)
            .map(|v| Self(u64::from_ne_bytes(v.to_ne_bytes())))
    }
}

#[cfg(feature = "postgres")]
impl ToSql for Hash {
    postgres_types::accepts!(INT8);
    postgres_types::to_sql_checked!();

    fn to_sql(
        &self,
        ty: &postgres_types::Type,
        w: &mut postgres_types::private::BytesMut,
    ) -> Result<postgres_types::IsNull, Box<dyn std::error::Error + Sync + Send>>
    {
        i64::from_ne_bytes(self.0.to_ne_bytes()).to_sql(ty, w)
    }
}

define_kind! {
    #[doc = "Category of a CRM webhook [`Request`], one per endpoint."]
    enum Category {
        #[doc = "Lead status is changed."]
        Status = 1,

        #[doc = "Contract signing day is set."]
        DateDeal = 2,

        #[doc = "Contract is signed."]
        DealSuccess = 3,

        #[doc = "Agent data is validated and access to the deal is granted."]
        AccessDeal = 4,
    }
}

define_kind! {
    #[doc = "Outcome of processing a webhook [`Request`]."]
    enum Outcome {
        #[doc = "Request is stored, but not processed yet."]
        Pending = 1,

        #[doc = "Request changed a booking."]
        Handled = 2,

        #[doc = "Request is stale or repeated, so nothing changed."]
        Ignored = 3,

        #[doc = "No booking matches the request."]
        NotFound = 4,

        #[doc = "Same request was already received recently."]
        Duplicate = 5,

        #[doc = "Request body cannot be parsed."]
        Malformed = 6,

        #[doc = "Request processing failed."]
        Failed = 7,
    }
}

/// Typed CRM webhook event.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Event {
    /// Statuses of leads changed.
    LeadStatusChanged(Vec<StatusChange>),

    /// Contract signing day of a lead is set.
    SigningDateSet {
        /// ID of the lead.
        lead_id: lead::Id,

        /// Contract signing day.
        date: purchase::SigningDateTime,
    },

    /// Contract of a lead is signed.
    DealSucceeded {
        /// ID of the lead.
        lead_id: lead::Id,
    },

    /// Agent data of a lead is validated and access to the deal is granted.
    AccessDealGranted {
        /// ID of the lead.
        lead_id: lead::Id,
    },
}

/// Status change of a single lead.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct StatusChange {
    /// ID of the lead.
    pub lead_id: lead::Id,

    /// New status of the lead.
    pub status_id: lead::StatusId,

    /// Pipeline the lead is in.
    pub pipeline_id: lead::PipelineId,
}

/// Key of a lead attribute in a form-encoded status webhook.
static LEAD_KEY: LazyLock<Regex> = LazyLock::new(|| {
    #[expect(clippy::unwrap_used, reason = "valid regex")]
    Regex::new(r"^leads\[(?:status|update|add)\]\[(\d+)\]\[(\w+)\]$").unwrap()
});

impl Event {
    /// Returns IDs of the leads this [`Event`] is about.
    #[must_use]
    pub fn lead_ids(&self) -> Vec<lead::Id> {
        match self {
            Self::LeadStatusChanged(changes) => {
                changes.iter().map(|c| c.lead_id).collect()
            }
            Self::SigningDateSet { lead_id, .. }
            | Self::DealSucceeded { lead_id }
            | Self::AccessDealGranted { lead_id } => vec![*lead_id],
        }
    }

    /// Parses the provided raw body of the given [`Category`].
    ///
    /// Bodies are form-encoded by the CRM, while JSON objects are accepted
    /// for single-lead categories.
    ///
    /// # Errors
    ///
    /// If the body doesn't match the [`Category`].
    pub fn parse(category: Category, body: &str) -> Result<Self, ParseError> {
        let fields = decode(body)?;
        match category {
            Category::Status => Self::parse_statuses(&fields),
            Category::DateDeal => {
                let date = fields
                    .get("date-deal")
                    .ok_or(ParseError::MissingField("date-deal"))?;
                Ok(Self::SigningDateSet {
                    lead_id: lead_id(&fields)?,
                    date: DateTimeOf::from_dotted_day(date)
                        .ok_or(ParseError::InvalidField("date-deal"))?,
                })
            }
            Category::DealSuccess => {
                confirmed(&fields, "deal-success")?;
                Ok(Self::DealSucceeded {
                    lead_id: lead_id(&fields)?,
                })
            }
            Category::AccessDeal => {
                confirmed(&fields, "access-deal")?;
                Ok(Self::AccessDealGranted {
                    lead_id: lead_id(&fields)?,
                })
            }
        }
    }

    /// Parses form-encoded `leads[status][N][...]` entries.
    fn parse_statuses(
        fields: &HashMap<String, String>,
    ) -> Result<Self, ParseError> {
        let mut leads = HashMap::<u32, HashMap<&str, &str>>::new();
        for (key, value) in fields {
            let Some(caps) = LEAD_KEY.captures(key) else {
                continue;
            };
            let (Some(idx), Some(attr)) = (caps.get(1), caps.get(2)) else {
                continue;
            };
            let idx = idx
                .as_str()
                .parse()
                .map_err(|_| ParseError::InvalidField("leads"))?;
            drop(leads.entry(idx).or_default().insert(attr.as_str(), value));
        }

        let mut indexed = leads.into_iter().collect::<Vec<_>>();
        indexed.sort_unstable_by_key(|(idx, _)| *idx);

        let changes = indexed
            .into_iter()
            .map(|(_, attrs)| {
                let get = |name: &'static str| {
                    attrs
                        .get(name)
                        .ok_or(ParseError::MissingField(name))?
                        .trim()
                        .parse::<i64>()
                        .map_err(|_| ParseError::InvalidField(name))
                };
                Ok(StatusChange {
                    lead_id: get("id")?.into(),
                    status_id: get("status_id")?.into(),
                    pipeline_id: get("pipeline_id")?.into(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        if changes.is_empty() {
            return Err(ParseError::MissingField("leads"));
        }
        Ok(Self::LeadStatusChanged(changes))
    }
}

/// Decodes the provided body into a flat map of fields.
fn decode(body: &str) -> Result<HashMap<String, String>, ParseError> {
    let body = body.trim();
    if body.starts_with('{') {
        let json = serde_json::from_str::<
            serde_json::Map<String, serde_json::Value>,
        >(body)
        .map_err(|_| ParseError::Undecodable)?;
        return Ok(json
            .into_iter()
            .filter_map(|(k, v)| {
                let v = match v {
                    serde_json::Value::String(s) => s,
                    serde_json::Value::Number(n) => n.to_string(),
                    serde_json::Value::Bool(b) => b.to_string(),
                    serde_json::Value::Null
                    | serde_json::Value::Array(_)
                    | serde_json::Value::Object(_) => return None,
                };
                Some((k, v))
            })
            .collect());
    }
    serde_urlencoded::from_str::<Vec<(String, String)>>(body)
        .map(|pairs| pairs.into_iter().collect())
        .map_err(|_| ParseError::Undecodable)
}

/// Extracts the lead ID out of the provided fields.
fn lead_id(fields: &HashMap<String, String>) -> Result<lead::Id, ParseError> {
    fields
        .get("ID")
        .or_else(|| fields.get("id"))
        .ok_or(ParseError::MissingField("ID"))?
        .trim()
        .parse()
        .map_err(|_| ParseError::InvalidField("ID"))
}

/// Ensures the provided flag field is set to a positive value.
fn confirmed(
    fields: &HashMap<String, String>,
    name: &'static str,
) -> Result<(), ParseError> {
    let value = fields.get(name).ok_or(ParseError::MissingField(name))?;
    match value.trim().to_lowercase().as_str() {
        "да" | "yes" | "true" | "1" => Ok(()),
        _ => Err(ParseError::InvalidField(name)),
    }
}

/// Error of parsing a webhook [`Request`] body.
#[derive(Clone, Copy, Debug, Display, Error)]
pub enum ParseError {
    /// Body is neither form-encoded nor a JSON object.
    #[display("Body cannot be decoded")]
    Undecodable,

    /// Required field is missing.
    #[display("Field `{_0}` is missing")]
    MissingField(#[error(not(source))] &'static str),

    /// Field has an invalid value.
    #[display("Field `{_0}` is invalid")]
    InvalidField(#[error(not(source))] &'static str),
}

/// [`DateTime`] when a [`Request`] was received.
pub type ReceptionDateTime = DateTimeOf<(Request, unit::Reception)>;
