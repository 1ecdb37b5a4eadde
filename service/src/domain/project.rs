//! [`Project`] and [`Building`] definitions.

use derive_more::{AsRef, Display, From, FromStr, Into};
#[cfg(feature = "postgres")]
use postgres_types::{FromSql, ToSql};
use serde::{Deserialize, Serialize};

use crate::domain::{lead, Pipeline};

/// Residential complex units are sold in.
#[derive(Clone, Debug, PartialEq)]
pub struct Project {
    /// ID of this [`Project`] in the property catalog.
    pub id: Id,

    /// Name of this [`Project`].
    pub name: Name,

    /// [`City`] this [`Project`] is located in.
    pub city: City,

    /// [`Pipeline`] leads of this [`Project`] are tracked in.
    pub pipeline: Pipeline,

    /// Enumerated value of this [`Project`] in the CRM project field.
    pub crm_enum: Option<lead::EnumId>,

    /// CRM user responsible for the leads of this [`Project`], if any.
    pub responsible_id: Option<lead::ResponsibleId>,

    /// Legal entity selling units of this [`Project`], if any.
    pub organization: Option<String>,
}

/// Building of a [`Project`].
#[derive(Clone, Debug, PartialEq)]
pub struct Building {
    /// ID of this [`Building`] in the property catalog.
    pub id: BuildingId,

    /// ID of the [`Project`] this [`Building`] belongs to.
    pub project_id: Id,

    /// Name of this [`Building`].
    pub name: Name,
}

/// ID of a [`Project`].
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    Deserialize,
    Display,
    Eq,
    From,
    FromStr,
    Hash,
    Into,
    PartialEq,
    Serialize,
)]
#[cfg_attr(feature = "postgres", derive(ToSql, FromSql), postgres(transparent))]
#[serde(transparent)]
pub struct Id(i64);

/// ID of a [`Building`].
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    Deserialize,
    Display,
    Eq,
    From,
    FromStr,
    Hash,
    Into,
    PartialEq,
    Serialize,
)]
#[cfg_attr(feature = "postgres", derive(ToSql, FromSql), postgres(transparent))]
#[serde(transparent)]
pub struct BuildingId(i64);

/// Name of a [`Project`] or a [`Building`].
#[derive(AsRef, Clone, Debug, Display, Eq, Hash, PartialEq)]
#[cfg_attr(feature = "postgres", derive(FromSql, ToSql), postgres(transparent))]
#[as_ref(forward)]
pub struct Name(String);

impl Name {
    /// Creates a new [`Name`] if the given `name` is valid.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Option<Self> {
        let name = name.into();
        let valid = name.trim() == name && !name.is_empty() && name.len() <= 256;
        valid.then_some(Self(name))
    }
}

impl std::str::FromStr for Name {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s).ok_or("invalid `Name`")
    }
}

/// Short slug of a city a [`Project`] is located in (`tmn`, `msk`, etc).
#[derive(AsRef, Clone, Debug, Display, Eq, Hash, PartialEq)]
#[cfg_attr(feature = "postgres", derive(FromSql, ToSql), postgres(transparent))]
#[as_ref(forward)]
pub struct City(String);

impl City {
    /// Creates a new [`City`] if the given `slug` is valid.
    #[must_use]
    pub fn new(slug: impl Into<String>) -> Option<Self> {
        let slug = slug.into();
        let valid = !slug.is_empty()
            && slug.len() <= 32
            && slug.bytes().all(|b| b.is_ascii_lowercase() || b == b'_');
        valid.then_some(Self(slug))
    }
}

impl std::str::FromStr for City {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s).ok_or("invalid `City`")
    }
}
