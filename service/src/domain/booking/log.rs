//! Activation log [`Entry`] definitions.

use common::{define_kind, unit, DateTimeOf};
use derive_more::{Display, From, Into};
#[cfg(feature = "postgres")]
use postgres_types::{FromSql, ToSql};
use uuid::Uuid;

use crate::domain::booking;
#[cfg(doc)]
use crate::domain::Booking;

/// Human-readable line of a [`Booking`] activation log.
#[derive(Clone, Debug)]
pub struct Entry {
    /// ID of this [`Entry`].
    pub id: Id,

    /// ID of the [`Booking`] this [`Entry`] belongs to.
    pub booking_id: booking::Id,

    /// [`Actor`] changed the [`Booking`].
    pub actor: Actor,

    /// Human-readable description of the change.
    pub content: String,

    /// [`DateTime`] when this [`Entry`] was created.
    ///
    /// [`DateTime`]: common::DateTime
    pub created_at: CreationDateTime,
}

impl Entry {
    /// Creates a new [`Entry`] happened right now.
    #[must_use]
    pub fn new(
        booking_id: booking::Id,
        actor: Actor,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: Id(Uuid::new_v4()),
            booking_id,
            actor,
            content: content.into(),
            created_at: CreationDateTime::now(),
        }
    }
}

/// ID of an [`Entry`].
#[derive(Clone, Copy, Debug, Display, Eq, From, Hash, Into, PartialEq)]
#[cfg_attr(feature = "postgres", derive(ToSql, FromSql), postgres(transparent))]
pub struct Id(Uuid);

define_kind! {
    #[doc = "Subsystem changing a [`Booking`]."]
    enum Actor {
        #[doc = "Activation engine."]
        Activation = 1,

        #[doc = "Expiration scheduler."]
        Expiration = 2,

        #[doc = "CRM webhook."]
        Webhook = 3,

        #[doc = "Reconciliation sweep."]
        Reconciliation = 4,

        #[doc = "Payment gateway callback."]
        Payment = 5,
    }
}

/// [`DateTime`] when an [`Entry`] was created.
///
/// [`DateTime`]: common::DateTime
pub type CreationDateTime = DateTimeOf<(Entry, unit::Creation)>;
