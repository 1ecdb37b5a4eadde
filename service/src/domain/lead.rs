//! CRM [`Lead`] definitions.

use std::{collections::HashMap, str::FromStr as _};

use common::{Money, Percent};
use derive_more::{Display, From, FromStr, Into};
#[cfg(feature = "postgres")]
use postgres_types::{FromSql, ToSql};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::unit;

/// CRM record of a sales opportunity.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Lead {
    /// ID of this [`Lead`].
    pub id: Id,

    /// ID of the pipeline this [`Lead`] is in.
    pub pipeline_id: PipelineId,

    /// ID of the status of this [`Lead`] in its pipeline.
    pub status_id: StatusId,

    /// ID of the CRM user responsible for this [`Lead`], if any.
    pub responsible_user_id: Option<ResponsibleId>,

    /// Indicator whether this [`Lead`] is deleted in the CRM.
    pub is_deleted: bool,

    /// IDs of the contacts attached to this [`Lead`].
    pub contacts: Vec<ContactId>,

    /// Custom fields of this [`Lead`].
    pub custom_fields: CustomFields,
}

macro_rules! define_id {
    ($(#[doc = $doc:literal] $name:ident),* $(,)?) => {
        $(
            #[doc = $doc]
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
                Ord,
                PartialEq,
                PartialOrd,
                Serialize,
            )]
            #[cfg_attr(
                feature = "postgres",
                derive(ToSql, FromSql),
                postgres(transparent),
            )]
            #[serde(transparent)]
            pub struct $name(i64);
        )*
    };
}

define_id! {
    #[doc = "ID of a [`Lead`]."]
    Id,
    #[doc = "ID of a CRM pipeline."]
    PipelineId,
    #[doc = "ID of a CRM status of a [`Lead`]."]
    StatusId,
    #[doc = "ID of a CRM contact."]
    ContactId,
    #[doc = "ID of a CRM user responsible for a [`Lead`]."]
    ResponsibleId,
    #[doc = "ID of a CRM custom field."]
    FieldId,
    #[doc = "ID of a CRM custom field enumerated value."]
    EnumId,
    #[doc = "ID of a CRM task."]
    TaskId,
}

/// Custom fields of a [`Lead`].
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CustomFields(HashMap<FieldId, Vec<FieldValue>>);

impl CustomFields {
    /// Inserts the provided values of the given field.
    pub fn insert(&mut self, field: FieldId, values: Vec<FieldValue>) {
        drop(self.0.insert(field, values));
    }

    /// Returns the first textual value of the provided field, if any.
    #[must_use]
    pub fn value(&self, field: FieldId) -> Option<&str> {
        self.0
            .get(&field)?
            .iter()
            .find_map(|v| v.value.as_deref())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    }

    /// Returns the first enumerated value of the provided field, if any.
    #[must_use]
    pub fn enum_id(&self, field: FieldId) -> Option<EnumId> {
        self.0.get(&field)?.iter().find_map(|v| v.enum_id)
    }

    /// Iterates over all the fields.
    pub fn iter(&self) -> impl Iterator<Item = (FieldId, &[FieldValue])> {
        self.0.iter().map(|(id, v)| (*id, v.as_slice()))
    }
}

impl FromIterator<(FieldId, Vec<FieldValue>)> for CustomFields {
    fn from_iter<I: IntoIterator<Item = (FieldId, Vec<FieldValue>)>>(
        iter: I,
    ) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Value of a custom field.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct FieldValue {
    /// Textual value.
    pub value: Option<String>,

    /// Enumerated value.
    pub enum_id: Option<EnumId>,
}

impl FieldValue {
    /// Creates a new textual [`FieldValue`].
    #[must_use]
    pub fn text(value: impl Into<String>) -> Self {
        Self {
            value: Some(value.into()),
            enum_id: None,
        }
    }

    /// Creates a new enumerated [`FieldValue`].
    #[must_use]
    pub fn enumerated(enum_id: EnumId) -> Self {
        Self {
            value: None,
            enum_id: Some(enum_id),
        }
    }
}

/// Table of CRM custom field IDs, one per business attribute.
///
/// IDs are specific to a CRM instance, so this table is configuration.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct Fields {
    /// Version label of this table.
    pub version: String,

    /// City of a project.
    pub city: FieldId,

    /// Project name.
    pub project: FieldId,

    /// Inventory ID of a unit.
    pub unit: FieldId,

    /// Kind of a unit.
    pub unit_kind: FieldId,

    /// Reservation start day.
    pub booking_start: FieldId,

    /// Reservation end day.
    pub booking_end: FieldId,

    /// Reservation price.
    pub booking_price: FieldId,

    /// Reservation payment status.
    pub booking_payment_status: FieldId,

    /// Kind of a reservation.
    pub booking_kind: FieldId,

    /// Online purchase status.
    pub online_purchase_status: FieldId,

    /// Payment method.
    pub payment_method: FieldId,

    /// Confirmed reservation end.
    pub booking_until: FieldId,

    /// Final price of a unit.
    pub final_price: FieldId,

    /// Price of a unit with a discount.
    pub price_with_sale: FieldId,

    /// Agent commission percent.
    pub commission: FieldId,

    /// Agent commission amount.
    pub commission_value: FieldId,

    /// Enumerated values of [`Fields::unit_kind`].
    #[serde(deserialize_with = "unit_kinds")]
    pub unit_kinds: HashMap<EnumId, unit::Kind>,
}

/// Deserializes [`Fields::unit_kinds`] from a list of pairs, as configuration
/// formats allow only string keys in maps.
fn unit_kinds<'de, D>(de: D) -> Result<HashMap<EnumId, unit::Kind>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Vec::<(EnumId, unit::Kind)>::deserialize(de)?
        .into_iter()
        .collect())
}

impl Default for Fields {
    fn default() -> Self {
        Self {
            version: "2024.1".into(),
            city: FieldId(692_726),
            project: FieldId(596_489),
            unit: FieldId(363_971),
            unit_kind: FieldId(366_965),
            booking_start: FieldId(689_005),
            booking_end: FieldId(689_007),
            booking_price: FieldId(689_009),
            booking_payment_status: FieldId(689_011),
            booking_kind: FieldId(826_868),
            online_purchase_status: FieldId(823_792),
            payment_method: FieldId(366_639),
            booking_until: FieldId(643_043),
            final_price: FieldId(679_313),
            price_with_sale: FieldId(575_401),
            commission: FieldId(822_836),
            commission_value: FieldId(812_300),
            unit_kinds: HashMap::from([
                (EnumId(715_523), unit::Kind::Flat),
                (EnumId(715_525), unit::Kind::Parking),
                (EnumId(1_311_059), unit::Kind::Commercial),
                (EnumId(1_324_118), unit::Kind::CommercialApartment),
            ]),
        }
    }
}

impl Fields {
    /// Returns the enumerated value of the provided [`unit::Kind`], if any.
    #[must_use]
    pub fn unit_kind_enum(&self, kind: unit::Kind) -> Option<EnumId> {
        self.unit_kinds
            .iter()
            .find_map(|(id, k)| (*k == kind).then_some(*id))
    }

    /// Extracts the commercial terms and unit reference out of the provided
    /// [`Lead`].
    #[must_use]
    pub fn terms(&self, lead: &Lead) -> Terms {
        let fields = &lead.custom_fields;
        let money = |field| {
            fields
                .value(field)
                .and_then(|v| Decimal::from_str(v).ok())
                .map(Money::rub)
        };

        Terms {
            unit: fields
                .value(self.unit)
                .and_then(|v| v.parse::<i64>().ok())
                .map(unit::Id::from),
            unit_kind: fields
                .enum_id(self.unit_kind)
                .and_then(|id| self.unit_kinds.get(&id).copied()),
            commission: fields
                .value(self.commission)
                .and_then(|v| Percent::from_str(v).ok()),
            commission_value: money(self.commission_value),
            final_payment_amount: money(self.final_price)
                .or_else(|| money(self.price_with_sale)),
            paid: fields.value(self.booking_payment_status).is_some_and(|v| {
                matches!(v.to_lowercase().as_str(), "да" | "true")
            }),
        }
    }
}

/// Commercial terms and unit reference of a [`Lead`].
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Terms {
    /// ID of the reserved unit, if any.
    pub unit: Option<unit::Id>,

    /// Kind of the reserved unit, if any.
    pub unit_kind: Option<unit::Kind>,

    /// Agent commission percent.
    pub commission: Option<Percent>,

    /// Agent commission amount.
    pub commission_value: Option<Money>,

    /// Final price of the unit.
    pub final_payment_amount: Option<Money>,

    /// Indicator whether the reservation is paid.
    pub paid: bool,
}
