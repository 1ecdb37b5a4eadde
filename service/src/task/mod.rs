//! Background [`Task`]s definitions.

mod background;
pub mod dispatch_events;
pub mod fire_expiration_checks;
pub mod reconcile_bookings;

pub use common::Handler as Task;

pub use self::{
    background::Background, dispatch_events::DispatchEvents,
    fire_expiration_checks::FireExpirationChecks,
    reconcile_bookings::ReconcileBookings,
};
