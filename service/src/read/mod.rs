//! Read entities definitions.

pub mod booking;
pub mod user;
pub mod webhook;
