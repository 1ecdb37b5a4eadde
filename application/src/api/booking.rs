//! Internal [`Booking`] API endpoints.

use axum::{extract::Path, Json};
use serde::{Deserialize, Serialize};
use service::{
    command::{self, Command as _},
    domain::{self, booking, lead, unit, Pipeline},
    query::{self, Query as _},
};
use uuid::Uuid;

use crate::{define_error, AsError, Error, Internal};

/// Time-boxed reservation of a unit.
#[derive(Clone, Debug, Serialize)]
pub struct Booking {
    /// ID of this [`Booking`].
    pub id: booking::Id,

    /// [`booking::Source`] of this [`Booking`].
    pub source: booking::Source,

    /// ID of the reserved unit.
    pub unit_id: Option<unit::Id>,

    /// ID of the CRM lead tracking this [`Booking`].
    pub lead_id: Option<lead::Id>,

    /// [`Pipeline`] of the CRM lead.
    pub pipeline: Option<Pipeline>,

    /// Coarse [`booking::Stage`] of the CRM lead.
    pub stage: Option<booking::Stage>,

    /// [`booking::Substage`] of the CRM lead.
    pub substage: Option<booking::Substage>,

    /// Indicator whether this [`Booking`] holds its unit.
    pub active: bool,

    /// [`booking::PaymentStatus`] of this [`Booking`].
    pub payment_status: booking::PaymentStatus,

    /// Current online purchase [`booking::purchase::Step`].
    pub purchase_step: Option<booking::purchase::Step>,

    /// Number of times this [`Booking`] was extended.
    pub extensions: u8,

    /// RFC 3339 moment an unconfirmed [`Booking`] expires at.
    pub expires_at: String,

    /// RFC 3339 moment a confirmed reservation ends at.
    pub until: Option<String>,
}

impl From<domain::Booking> for Booking {
    fn from(booking: domain::Booking) -> Self {
        Self {
            id: booking.id,
            source: booking.source,
            unit_id: booking.unit_id,
            lead_id: booking.lead_id,
            pipeline: booking.pipeline,
            stage: booking.stage,
            substage: booking.substage,
            active: booking.active,
            payment_status: booking.payment_status,
            purchase_step: booking.purchase_step(),
            extensions: booking.extensions,
            expires_at: booking.expires_at.to_rfc3339(),
            until: booking.until.map(|u| u.to_rfc3339()),
        }
    }
}

/// Parameters of a [`Booking`] deactivation.
#[derive(Clone, Copy, Debug, Default, Deserialize)]
#[serde(default)]
pub struct Deactivation {
    /// [`booking::Substage`] the CRM lead is moved to, if any.
    pub substage: Option<booking::Substage>,
}

/// Returns the [`Booking`] with the provided ID.
#[tracing::instrument(skip_all, fields(booking.id = %id))]
pub async fn get(
    Internal(ctx): Internal,
    Path(id): Path<Uuid>,
) -> Result<Json<Booking>, Error> {
    ctx.service()
        .execute(query::booking::ById::by(id.into()))
        .await
        .map_err(AsError::into_error)?
        .map(|b| Json(b.into()))
        .ok_or_else(|| BookingError::NotExists.into())
}

/// Activates the [`Booking`] with the provided ID.
#[tracing::instrument(skip_all, fields(booking.id = %id))]
pub async fn activate(
    Internal(ctx): Internal,
    Path(id): Path<Uuid>,
) -> Result<Json<Booking>, Error> {
    ctx.service()
        .execute(command::ActivateBooking {
            booking_id: id.into(),
        })
        .await
        .map(|b| Json(b.into()))
        .map_err(AsError::into_error)
}

/// Deactivates the [`Booking`] with the provided ID.
#[tracing::instrument(skip_all, fields(booking.id = %id))]
pub async fn deactivate(
    Internal(ctx): Internal,
    Path(id): Path<Uuid>,
    params: Option<Json<Deactivation>>,
) -> Result<Json<Booking>, Error> {
    let Deactivation { substage } =
        params.map(|Json(p)| p).unwrap_or_default();
    ctx.service()
        .execute(command::DeactivateBooking {
            booking_id: id.into(),
            substage,
        })
        .await
        .map(|b| Json(b.into()))
        .map_err(AsError::into_error)
}

/// Extends the free period of the [`Booking`] with the provided ID.
#[tracing::instrument(skip_all, fields(booking.id = %id))]
pub async fn extend(
    Internal(ctx): Internal,
    Path(id): Path<Uuid>,
) -> Result<Json<Booking>, Error> {
    ctx.service()
        .execute(command::ExtendBooking {
            booking_id: id.into(),
        })
        .await
        .map(|b| Json(b.into()))
        .map_err(AsError::into_error)
}

impl AsError for command::activate_booking::ExecutionError {
    fn try_as_error(&self) -> Option<Error> {
        match self {
            Self::BookingNotExists(_) => Some(BookingError::NotExists.into()),
            Self::Catalog(e) => e.try_as_error(),
            Self::Crm(e) => e.try_as_error(),
            Self::Db(e) => e.try_as_error(),
            Self::Inventory(e) => e.try_as_error(),
            Self::LeadNotExists(_)
            | Self::PipelineUnmapped(_)
            | Self::ProjectNotExists(_)
            | Self::UnitNotExists(_) => None,
            Self::UnitNotSpecified(_) => {
                Some(BookingError::UnitNotSpecified.into())
            }
            Self::UnitUnavailable(_) => {
                Some(BookingError::UnitUnavailable.into())
            }
        }
    }
}

impl AsError for command::deactivate_booking::ExecutionError {
    fn try_as_error(&self) -> Option<Error> {
        match self {
            Self::BookingNotExists(_) => Some(BookingError::NotExists.into()),
            Self::Catalog(e) => e.try_as_error(),
            Self::Crm(e) => e.try_as_error(),
            Self::Db(e) => e.try_as_error(),
            Self::Inventory(e) => e.try_as_error(),
        }
    }
}

impl AsError for command::extend_booking::ExecutionError {
    fn try_as_error(&self) -> Option<Error> {
        match self {
            Self::AlreadyPaid(_) => Some(BookingError::AlreadyPaid.into()),
            Self::BookingNotExists(_) => Some(BookingError::NotExists.into()),
            Self::Crm(e) => e.try_as_error(),
            Self::Db(e) => e.try_as_error(),
            Self::ExtensionsExhausted(_) => {
                Some(BookingError::ExtensionsExhausted.into())
            }
            Self::NotActive(_) => Some(BookingError::NotActive.into()),
        }
    }
}

define_error! {
    enum BookingError {
        #[code = "BOOKING_NOT_EXISTS"]
        #[status = NOT_FOUND]
        #[message = "Booking doesn't exist"]
        NotExists,

        #[code = "BOOKING_NOT_ACTIVE"]
        #[status = CONFLICT]
        #[message = "Booking is not active"]
        NotActive,

        #[code = "BOOKING_ALREADY_PAID"]
        #[status = CONFLICT]
        #[message = "Booking is already paid"]
        AlreadyPaid,

        #[code = "BOOKING_EXTENSIONS_EXHAUSTED"]
        #[status = CONFLICT]
        #[message = "Booking cannot be extended anymore"]
        ExtensionsExhausted,

        #[code = "UNIT_NOT_SPECIFIED"]
        #[status = UNPROCESSABLE_ENTITY]
        #[message = "Booking has no unit to reserve"]
        UnitNotSpecified,

        #[code = "UNIT_UNAVAILABLE"]
        #[status = CONFLICT]
        #[message = "Unit is not available"]
        UnitUnavailable,
    }
}
