//! [`Unit`] definitions.

use base64::Engine as _;
use common::{define_kind, Money};
use derive_more::{AsRef, Display, From, FromStr, Into};
#[cfg(feature = "postgres")]
use postgres_types::{FromSql, ToSql};
use serde::{Deserialize, Serialize};

use crate::domain::project;

/// Physical property a booking reserves.
#[derive(Clone, Debug, PartialEq)]
pub struct Unit {
    /// ID of this [`Unit`] shared by the catalog and the inventory.
    pub id: Id,

    /// [`Kind`] of this [`Unit`].
    pub kind: Kind,

    /// ID of the [`Project`] this [`Unit`] belongs to.
    ///
    /// [`Project`]: crate::domain::Project
    pub project_id: project::Id,

    /// ID of the [`Building`] this [`Unit`] belongs to.
    ///
    /// [`Building`]: crate::domain::Building
    pub building_id: project::BuildingId,

    /// Floor this [`Unit`] is located on, if any.
    pub floor: Option<Floor>,

    /// Last known [`Status`] of this [`Unit`].
    pub status: Status,

    /// Price of this [`Unit`], if known.
    pub price: Option<Money>,
}

impl Unit {
    /// Returns the [`CatalogRef`] of this [`Unit`].
    #[must_use]
    pub fn catalog_ref(&self) -> CatalogRef {
        CatalogRef::new(self.kind, self.id)
    }
}

/// ID of a [`Unit`].
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
#[cfg_attr(feature = "postgres", derive(ToSql, FromSql), postgres(transparent))]
#[serde(transparent)]
pub struct Id(i64);

/// Floor of a [`Unit`].
pub type Floor = i16;

define_kind! {
    #[doc = "Kind of a [`Unit`]."]
    enum Kind {
        #[doc = "Flat."]
        Flat = 1,

        #[doc = "Parking space."]
        Parking = 2,

        #[doc = "Commercial space."]
        Commercial = 3,

        #[doc = "Commercial apartment."]
        CommercialApartment = 4,

        #[doc = "Pantry."]
        Pantry = 5,
    }
}

impl Kind {
    /// Returns the catalog type name of this [`Kind`].
    #[must_use]
    pub const fn catalog_type(self) -> &'static str {
        match self {
            Self::Flat | Self::CommercialApartment => "GlobalFlatType",
            Self::Parking => "GlobalParkingSpaceType",
            Self::Commercial => "GlobalCommercialSpaceType",
            Self::Pantry => "GlobalPantryType",
        }
    }
}

define_kind! {
    #[doc = "Availability status of a [`Unit`]."]
    enum Status {
        #[doc = "Unit is available."]
        Free = 1,

        #[doc = "Unit is reserved."]
        Booked = 2,

        #[doc = "Unit is sold."]
        Sold = 3,
    }
}

impl Status {
    /// Indicates whether a [`Unit`] in this [`Status`] can be reserved.
    #[must_use]
    pub const fn is_available(self) -> bool {
        matches!(self, Self::Free)
    }
}

/// Reference of a [`Unit`] in the property catalog.
#[derive(AsRef, Clone, Debug, Display, Eq, Hash, PartialEq)]
#[as_ref(forward)]
pub struct CatalogRef(String);

impl CatalogRef {
    /// Returns this [`CatalogRef`] as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Encodes a new [`CatalogRef`] of the [`Unit`] with the provided [`Kind`]
    /// and [`Id`].
    #[must_use]
    pub fn new(kind: Kind, id: Id) -> Self {
        Self(
            base64::engine::general_purpose::STANDARD
                .encode(format!("{}:{id}", kind.catalog_type())),
        )
    }
}

#[cfg(test)]
mod spec {
    use super::{CatalogRef, Id, Kind, Status};

    #[test]
    fn encodes_catalog_ref() {
        assert_eq!(
            CatalogRef::new(Kind::Flat, Id(1)).to_string(),
            "R2xvYmFsRmxhdFR5cGU6MQ==",
        );
        assert_eq!(
            CatalogRef::new(Kind::CommercialApartment, Id(1)),
            CatalogRef::new(Kind::Flat, Id(1)),
        );
        assert_ne!(
            CatalogRef::new(Kind::Parking, Id(1)),
            CatalogRef::new(Kind::Flat, Id(1)),
        );
    }

    #[test]
    fn availability() {
        assert!(Status::Free.is_available());
        assert!(!Status::Booked.is_available());
        assert!(!Status::Sold.is_available());
    }
}
