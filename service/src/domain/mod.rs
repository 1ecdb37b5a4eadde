//! Domain definitions.

pub mod booking;
pub mod expiration;
pub mod lead;
pub mod pipeline;
pub mod project;
pub mod unit;
pub mod user;
pub mod webhook;

pub use self::{
    booking::Booking,
    lead::Lead,
    pipeline::Pipeline,
    project::{Building, Project},
    unit::Unit,
    user::User,
};
