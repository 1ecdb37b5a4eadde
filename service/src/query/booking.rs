//! [`Query`] collection related to a single [`Booking`].

use common::operations::By;

use crate::domain::{booking, lead, Booking};
#[cfg(doc)]
use crate::Query;

use super::DatabaseQuery;

/// Queries a [`Booking`] by its [`booking::Id`].
pub type ById = DatabaseQuery<By<Option<Booking>, booking::Id>>;

/// Queries the latest [`Booking`] tracked by the provided CRM lead.
pub type ByLead = DatabaseQuery<By<Option<Booking>, lead::Id>>;
