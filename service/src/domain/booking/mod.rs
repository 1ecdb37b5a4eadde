//! [`Booking`] definitions.

pub mod log;
pub mod purchase;
pub mod stage;

#[cfg(doc)]
use common::DateTime;
use common::{define_kind, DateTimeOf, Money, Percent};
use derive_more::{AsRef, Display, From, FromStr, Into};
#[cfg(feature = "postgres")]
use postgres_types::{FromSql, ToSql};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::{lead, project, unit, user, Pipeline};

pub use self::{
    log::Entry as LogEntry,
    purchase::Purchase,
    stage::{Stage, Substage},
};

/// Time-boxed reservation of a unit.
#[derive(Clone, Debug, PartialEq)]
pub struct Booking {
    /// ID of this [`Booking`].
    pub id: Id,

    /// [`Source`] this [`Booking`] originates from.
    pub source: Source,

    /// ID of the [`User`] owning this [`Booking`].
    ///
    /// [`User`]: crate::domain::User
    pub user_id: user::Id,

    /// ID of the agent [`User`] assigned to this [`Booking`], if any.
    ///
    /// [`User`]: crate::domain::User
    pub agent_id: Option<user::Id>,

    /// ID of the [`Project`] of the reserved unit, if known.
    ///
    /// [`Project`]: crate::domain::Project
    pub project_id: Option<project::Id>,

    /// ID of the [`Building`] of the reserved unit, if known.
    ///
    /// [`Building`]: crate::domain::Building
    pub building_id: Option<project::BuildingId>,

    /// ID of the reserved [`Unit`], if known.
    ///
    /// [`Unit`]: crate::domain::Unit
    pub unit_id: Option<unit::Id>,

    /// ID of the CRM lead tracking this [`Booking`].
    ///
    /// [`None`] until the first CRM write.
    pub lead_id: Option<lead::Id>,

    /// Last known CRM status of the lead.
    pub status_id: Option<lead::StatusId>,

    /// [`Pipeline`] of the lead, if known.
    pub pipeline: Option<Pipeline>,

    /// Cached coarse [`Stage`] of the lead.
    pub stage: Option<Stage>,

    /// Cached [`Substage`] of the lead.
    pub substage: Option<Substage>,

    /// Indicator whether this [`Booking`] currently holds its unit.
    pub active: bool,

    /// Indicator whether an expiration check is still pending.
    pub should_be_deactivated_by_timer: bool,

    /// Indicator whether the lead of this [`Booking`] disappeared from the
    /// CRM.
    pub deleted_in_crm: bool,

    /// Amount the client pays for the reservation.
    pub payment_amount: Option<Money>,

    /// Final price of the unit.
    pub final_payment_amount: Option<Money>,

    /// Agent commission.
    pub commission: Option<Percent>,

    /// Agent commission amount.
    pub commission_value: Option<Money>,

    /// [`PaymentStatus`] of the reservation.
    pub payment_status: PaymentStatus,

    /// ID of the payment gateway order paying this [`Booking`], if any.
    pub payment_order_id: Option<PaymentOrderId>,

    /// Online [`Purchase`] progress.
    pub purchase: Purchase,

    /// Number of times this [`Booking`] was extended.
    pub extensions: u8,

    /// [`DateTime`] when this [`Booking`] was created.
    pub created_at: CreationDateTime,

    /// [`DateTime`] after which an unconfirmed [`Booking`] is released.
    pub expires_at: ExpirationDateTime,

    /// [`DateTime`] when a confirmed reservation ends, if any.
    pub until: Option<ReservationEndDateTime>,
}

impl Booking {
    /// Indicates whether this [`Booking`] is paid.
    #[must_use]
    pub fn is_paid(&self) -> bool {
        self.payment_status == PaymentStatus::Payed
    }

    /// Indicates whether this [`Booking`] has an agent assigned.
    #[must_use]
    pub fn is_agent_assigned(&self) -> bool {
        self.agent_id.is_some()
    }

    /// Indicates whether this [`Booking`] passed the "awaiting first client
    /// action" phase, so its expiration timer is inert.
    #[must_use]
    pub fn is_confirmed(&self) -> bool {
        self.is_paid()
    }

    /// Returns the current online purchase [`Step`] of this [`Booking`].
    ///
    /// [`Step`]: purchase::Step
    #[must_use]
    pub fn purchase_step(&self) -> Option<purchase::Step> {
        self.purchase.step(self.is_paid())
    }
}

/// ID of a [`Booking`].
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
pub struct Id(Uuid);

impl Id {
    /// Creates a new random [`Id`].
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

define_kind! {
    #[doc = "Source a [`Booking`] originates from."]
    enum Source {
        #[doc = "Client reserved a unit in the personal cabinet."]
        Lk = 1,

        #[doc = "Agent assigned a client and reserved a unit for them."]
        AgentAssign = 2,

        #[doc = "Fast booking without a prior lead."]
        FastBooking = 3,

        #[doc = "Lead is imported from the CRM."]
        Crm = 4,
    }
}

impl Source {
    /// Indicates whether a lead of a [`Booking`] from this [`Source`] is a
    /// valid sales lead.
    #[must_use]
    pub const fn is_sales_lead(self) -> bool {
        matches!(self, Self::Lk | Self::AgentAssign | Self::FastBooking)
    }
}

define_kind! {
    #[doc = "Payment status of a [`Booking`]."]
    enum PaymentStatus {
        #[doc = "Reservation is not paid yet."]
        Unpaid = 1,

        #[doc = "Reservation is paid."]
        Payed = 2,
    }
}

/// ID of a payment gateway order.
#[derive(
    AsRef, Clone, Debug, Deserialize, Display, Eq, Hash, PartialEq, Serialize,
)]
#[cfg_attr(feature = "postgres", derive(FromSql, ToSql), postgres(transparent))]
#[as_ref(forward)]
pub struct PaymentOrderId(String);

impl PaymentOrderId {
    /// Creates a new [`PaymentOrderId`] if the given `id` is valid.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Option<Self> {
        let id = id.into();
        let valid = id.trim() == id && !id.is_empty() && id.len() <= 128;
        valid.then_some(Self(id))
    }

    /// Returns this [`PaymentOrderId`] as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::str::FromStr for PaymentOrderId {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s).ok_or("invalid `PaymentOrderId`")
    }
}

/// Field-set update of a [`Booking`].
///
/// Only [`Some`] fields are written, so concurrent writers owning different
/// fields never overwrite each other.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Patch {
    /// ID of the [`Booking`] to update.
    pub id: Id,

    /// New [`Booking::active`] value.
    pub active: Option<bool>,

    /// New [`Booking::should_be_deactivated_by_timer`] value.
    pub should_be_deactivated_by_timer: Option<bool>,

    /// New [`Booking::deleted_in_crm`] value.
    pub deleted_in_crm: Option<bool>,

    /// New [`Booking::agent_id`] value.
    pub agent_id: Option<Option<user::Id>>,

    /// New [`Booking::lead_id`] value.
    pub lead_id: Option<Option<lead::Id>>,

    /// New [`Booking::status_id`] value.
    pub status_id: Option<Option<lead::StatusId>>,

    /// New [`Booking::pipeline`] value.
    pub pipeline: Option<Option<Pipeline>>,

    /// New [`Booking::stage`] value.
    pub stage: Option<Option<Stage>>,

    /// New [`Booking::substage`] value.
    pub substage: Option<Option<Substage>>,

    /// New unit linkage of the [`Booking`].
    pub linkage: Option<Linkage>,

    /// New [`Booking::payment_amount`] value.
    pub payment_amount: Option<Option<Money>>,

    /// New [`Booking::final_payment_amount`] value.
    pub final_payment_amount: Option<Option<Money>>,

    /// New [`Booking::commission`] value.
    pub commission: Option<Option<Percent>>,

    /// New [`Booking::commission_value`] value.
    pub commission_value: Option<Option<Money>>,

    /// New [`Booking::payment_status`] value.
    pub payment_status: Option<PaymentStatus>,

    /// New [`Booking::purchase`] value.
    pub purchase: Option<Purchase>,

    /// New [`Booking::extensions`] value.
    pub extensions: Option<u8>,

    /// New [`Booking::expires_at`] value.
    pub expires_at: Option<ExpirationDateTime>,

    /// New [`Booking::until`] value.
    pub until: Option<Option<ReservationEndDateTime>>,
}

impl Patch {
    /// Creates a new empty [`Patch`] of the [`Booking`] with the provided
    /// [`Id`].
    #[must_use]
    pub fn new(id: Id) -> Self {
        Self {
            id,
            ..Self::default()
        }
    }

    /// Sets the [`Substage`] along with the [`Stage`] derived from it.
    #[must_use]
    pub fn with_substage(mut self, substage: Substage) -> Self {
        self.substage = Some(Some(substage));
        self.stage = Some(substage.stage());
        self
    }

    /// Indicates whether this [`Patch`] changes nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::new(self.id)
    }

    /// Applies this [`Patch`] to the provided [`Booking`].
    pub fn apply(&self, booking: &mut Booking) {
        let Self {
            id: _,
            active,
            should_be_deactivated_by_timer,
            deleted_in_crm,
            agent_id,
            lead_id,
            status_id,
            pipeline,
            stage,
            substage,
            linkage,
            payment_amount,
            final_payment_amount,
            commission,
            commission_value,
            payment_status,
            purchase,
            extensions,
            expires_at,
            until,
        } = self.clone();

        macro_rules! set {
            ($($field:ident),* $(,)?) => {
                $(
                    if let Some(v) = $field {
                        booking.$field = v;
                    }
                )*
            };
        }
        set!(
            active,
            should_be_deactivated_by_timer,
            deleted_in_crm,
            agent_id,
            lead_id,
            status_id,
            pipeline,
            stage,
            substage,
            payment_amount,
            final_payment_amount,
            commission,
            commission_value,
            payment_status,
            purchase,
            extensions,
            expires_at,
            until,
        );
        if let Some(Linkage {
            project_id,
            building_id,
            unit_id,
        }) = linkage
        {
            booking.project_id = project_id;
            booking.building_id = building_id;
            booking.unit_id = unit_id;
        }
    }
}

/// Linkage of a [`Booking`] to its unit.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Linkage {
    /// ID of the [`Project`].
    ///
    /// [`Project`]: crate::domain::Project
    pub project_id: Option<project::Id>,

    /// ID of the [`Building`].
    ///
    /// [`Building`]: crate::domain::Building
    pub building_id: Option<project::BuildingId>,

    /// ID of the [`Unit`].
    ///
    /// [`Unit`]: crate::domain::Unit
    pub unit_id: Option<unit::Id>,
}

/// [`DateTime`] when a [`Booking`] was created.
pub type CreationDateTime = DateTimeOf<(Booking, common::unit::Creation)>;

/// [`DateTime`] when an unconfirmed [`Booking`] expires.
pub type ExpirationDateTime = DateTimeOf<(Booking, common::unit::Expiration)>;

/// [`DateTime`] when a confirmed reservation of a [`Booking`] ends.
pub type ReservationEndDateTime = DateTimeOf<(Booking, Reservation)>;

/// Marker type describing a confirmed reservation.
#[derive(Clone, Copy, Debug)]
pub struct Reservation;


#[cfg(test)]
mod spec {
    use crate::domain::{booking::PaymentStatus, unit};

    use super::{fixture, Linkage, Patch, Stage, Substage};

    #[test]
    fn patch_writes_only_provided_fields() {
        let mut booking = fixture::booking(unit::Id::from(100));
        booking.commission_value = Some(common::Money::rub(1000.into()));
        let before = booking.clone();

        let patch = Patch {
            active: Some(true),
            ..Patch::new(booking.id)
        }
        .with_substage(Substage::Booking);
        patch.apply(&mut booking);

        assert!(booking.active);
        assert_eq!(booking.substage, Some(Substage::Booking));
        assert_eq!(booking.stage, Some(Stage::Booking));
        assert_eq!(booking.commission_value, before.commission_value);
        assert_eq!(booking.unit_id, before.unit_id);
        assert_eq!(booking.expires_at, before.expires_at);
    }

    #[test]
    fn patch_clears_linkage() {
        let mut booking = fixture::booking(unit::Id::from(100));

        Patch {
            linkage: Some(Linkage::default()),
            ..Patch::new(booking.id)
        }
        .apply(&mut booking);

        assert_eq!(booking.unit_id, None);
        assert_eq!(booking.building_id, None);
        assert_eq!(booking.project_id, None);
    }

    #[test]
    fn empty_patch() {
        let booking = fixture::booking(unit::Id::from(100));

        assert!(Patch::new(booking.id).is_empty());
        assert!(!Patch {
            payment_status: Some(PaymentStatus::Payed),
            ..Patch::new(booking.id)
        }
        .is_empty());
    }
}
