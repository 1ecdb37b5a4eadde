//! Expiration [`Check`] definitions.

use common::{DateTime, DateTimeOf};
use derive_more::{Display, From, Into};
#[cfg(feature = "postgres")]
use postgres_types::{FromSql, ToSql};
use uuid::Uuid;

use crate::domain::booking::{self, Substage};
#[cfg(doc)]
use crate::domain::Booking;

/// Deferred re-validation of an unconfirmed [`Booking`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Check {
    /// ID of this [`Check`].
    pub id: Id,

    /// ID of the [`Booking`] to check.
    pub booking_id: booking::Id,

    /// [`DateTime`] this [`Check`] fires at.
    pub fire_at: FireDateTime,

    /// [`Substage`] the lead is moved to if the [`Booking`] expires.
    pub fallback: Substage,

    /// Number of failed attempts to execute this [`Check`].
    pub attempts: u8,
}

impl Check {
    /// Creates a new [`Check`] of the provided [`Booking`].
    #[must_use]
    pub fn new(
        booking_id: booking::Id,
        fire_at: FireDateTime,
        fallback: Substage,
    ) -> Self {
        Self {
            id: Id(Uuid::new_v4()),
            booking_id,
            fire_at,
            fallback,
            attempts: 0,
        }
    }
}

/// ID of a [`Check`].
#[derive(Clone, Copy, Debug, Display, Eq, From, Hash, Into, PartialEq)]
#[cfg_attr(feature = "postgres", derive(ToSql, FromSql), postgres(transparent))]
pub struct Id(Uuid);

/// Selector of [`Check`]s due at some moment.
#[derive(Clone, Copy, Debug)]
pub struct Due {
    /// Moment the [`Check`]s are due at.
    pub at: DateTime,

    /// Maximum number of [`Check`]s to select.
    pub limit: usize,
}

/// [`DateTime`] when a [`Check`] fires.
pub type FireDateTime = DateTimeOf<(Check, Fire)>;

/// Marker type describing a [`Check`] firing.
#[derive(Clone, Copy, Debug)]
pub struct Fire;
