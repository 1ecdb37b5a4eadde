//! In-process [`Event`] bus.

use std::{error::Error, fmt};

use futures::future::{self, LocalBoxFuture};
use tokio::sync::mpsc;
use tracing as log;

use crate::domain::booking::{self, Substage};

/// Domain event emitted when a [`Booking`] changes.
///
/// [`Booking`]: crate::domain::Booking
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Event {
    /// Unit is reserved for a booking.
    BookingCreated {
        /// ID of the booking.
        booking_id: booking::Id,
    },

    /// CRM status of a booking changed.
    ChangeStatus {
        /// ID of the booking.
        booking_id: booking::Id,

        /// New [`Substage`] of the booking.
        substage: Substage,
    },

    /// CRM confirmed the reservation payment of a booking.
    PayBooking {
        /// ID of the booking.
        booking_id: booking::Id,
    },

    /// Payment gateway confirmed the reservation payment of a booking.
    BookingPayed {
        /// ID of the booking.
        booking_id: booking::Id,
    },

    /// Contract of a booking is signed.
    AcceptContract {
        /// ID of the booking.
        booking_id: booking::Id,
    },

    /// Free reservation of a booking is extended.
    ExtendFreeBooking {
        /// ID of the booking.
        booking_id: booking::Id,

        /// New expiration moment of the booking.
        expires_at: booking::ExpirationDateTime,
    },
}

impl Event {
    /// Returns the name of this [`Event`].
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::BookingCreated { .. } => "booking_created",
            Self::ChangeStatus { .. } => "change_status",
            Self::PayBooking { .. } => "pay_booking",
            Self::BookingPayed { .. } => "booking_payed",
            Self::AcceptContract { .. } => "accept_contract",
            Self::ExtendFreeBooking { .. } => "extend_free_booking",
        }
    }

    /// Returns ID of the booking this [`Event`] is about.
    #[must_use]
    pub const fn booking_id(&self) -> booking::Id {
        match self {
            Self::BookingCreated { booking_id }
            | Self::ChangeStatus { booking_id, .. }
            | Self::PayBooking { booking_id }
            | Self::BookingPayed { booking_id }
            | Self::AcceptContract { booking_id }
            | Self::ExtendFreeBooking { booking_id, .. } => *booking_id,
        }
    }
}

/// Publishing side of the [`Event`] bus.
#[derive(Clone, Debug)]
pub struct Bus(mpsc::UnboundedSender<Event>);

impl Bus {
    /// Creates a new [`Bus`] along with the [`Queue`] of its [`Event`]s.
    #[must_use]
    pub fn new() -> (Self, Queue) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self(tx), Queue(rx))
    }

    /// Emits the provided [`Event`].
    ///
    /// Never blocks and never fails: an [`Event`] emitted after the [`Queue`]
    /// is gone is logged and dropped.
    pub fn emit(&self, event: Event) {
        if let Err(e) = self.0.send(event) {
            log::warn!("`{}` event dropped: {e}", e.0.name());
        }
    }
}

/// Consuming side of the [`Event`] bus.
#[derive(Debug)]
pub struct Queue(mpsc::UnboundedReceiver<Event>);

impl Queue {
    /// Receives the next [`Event`].
    ///
    /// [`None`] is returned once all the [`Bus`]es are dropped.
    pub async fn recv(&mut self) -> Option<Event> {
        self.0.recv().await
    }

    /// Receives the next already emitted [`Event`], if any.
    pub fn try_recv(&mut self) -> Option<Event> {
        self.0.try_recv().ok()
    }
}

/// Consumer of [`Event`]s.
pub trait Subscriber: fmt::Debug {
    /// Handles the provided [`Event`].
    ///
    /// # Errors
    ///
    /// If failed to handle the [`Event`]. Errors are logged by the dispatcher
    /// and never reach the emitter.
    fn notify<'a>(
        &'a self,
        event: &'a Event,
    ) -> LocalBoxFuture<'a, Result<(), Box<dyn Error>>>;
}

/// [`Subscriber`] logging every [`Event`].
#[derive(Clone, Copy, Debug, Default)]
pub struct Log;

impl Subscriber for Log {
    fn notify<'a>(
        &'a self,
        event: &'a Event,
    ) -> LocalBoxFuture<'a, Result<(), Box<dyn Error>>> {
        log::info!(
            booking_id = %event.booking_id(),
            "`{}` event: {event:?}",
            event.name(),
        );
        Box::pin(future::ok(()))
    }
}
