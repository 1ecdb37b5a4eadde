//! [`Booking`]-related read definitions.

use crate::domain::{booking, unit};
#[cfg(doc)]
use crate::domain::Booking;

/// Selector of all active [`Booking`]s carrying a CRM lead.
#[derive(Clone, Copy, Debug, Default)]
pub struct ActiveInCrm;

/// Selector of an active [`Booking`] holding the provided unit.
#[derive(Clone, Copy, Debug)]
pub struct ActiveOnUnit {
    /// ID of the unit.
    pub unit_id: unit::Id,

    /// ID of the [`Booking`] to ignore.
    pub except: booking::Id,
}
