//! Service contains the business logic of the application.
//!
//! List of available Cargo features:
#![doc = document_features::document_features!()]
#![deny(
    nonstandard_style,
    rust_2018_idioms,
    rustdoc::all,
    trivial_casts,
    trivial_numeric_casts,
    unsafe_code
)]
#![forbid(non_ascii_idents)]
#![warn(
    clippy::allow_attributes,
    clippy::allow_attributes_without_reason,
    clippy::pedantic,
    clippy::wildcard_enum_match_arm,
    deprecated_in_future,
    missing_copy_implementations,
    missing_debug_implementations,
    missing_docs,
    unreachable_pub,
    unused_crate_dependencies,
    unused_import_braces,
    unused_labels,
    unused_lifetimes,
    unused_qualifications,
    unused_results
)]

pub mod command;
pub mod domain;
pub mod event;
pub mod infra;
pub mod query;
pub mod read;
pub mod task;

use std::{error::Error, time};

use common::operations::{By, Start};
use derive_more::Debug;
use secrecy::SecretString;

use crate::domain::{booking::Substage, lead, pipeline};
#[cfg(doc)]
use crate::infra::{Database, External};

pub use self::{command::Command, query::Query, task::Task};

/// [`Service`] configuration.
#[derive(Clone, Debug)]
pub struct Config {
    /// Mapping of CRM statuses onto [`Substage`]s.
    pub pipelines: pipeline::Mapping,

    /// IDs of the CRM lead custom fields.
    pub fields: lead::Fields,

    /// Period a free booking is extended by.
    pub free_booking_period: time::Duration,

    /// Period a paid booking holds its unit for.
    pub paid_booking_period: time::Duration,

    /// Maximum number of times a free booking may be extended.
    pub max_extensions: u8,

    /// [`Substage`] an expired booking's lead is moved to.
    pub expiration_fallback: Substage,

    /// Secret CRM webhooks must carry.
    #[debug(skip)]
    pub webhook_secret: SecretString,

    /// Window identical CRM webhooks are considered duplicates within.
    pub webhook_dedup_window: time::Duration,

    /// Secret payment gateway callbacks must carry.
    #[debug(skip)]
    pub payment_secret: SecretString,

    /// [`task::ReconcileBookings`] configuration.
    pub reconcile_bookings: task::reconcile_bookings::Config,

    /// [`task::FireExpirationChecks`] configuration.
    pub fire_expiration_checks: task::fire_expiration_checks::Config,
}

/// Domain service.
#[derive(Clone, Debug)]
pub struct Service<Db, Ext> {
    /// Configuration of this [`Service`].
    config: Config,

    /// [`Database`] of this [`Service`].
    database: Db,

    /// [`External`] systems of this [`Service`].
    external: Ext,

    /// [`event::Bus`] of this [`Service`].
    events: event::Bus,
}

impl<Db, Ext> Service<Db, Ext> {
    /// Creates a new [`Service`] with the provided parameters.
    ///
    /// Emitted [`event::Event`]s are delivered to the provided
    /// [`event::Subscriber`]s along with the [`event::Log`] one.
    pub fn new(
        config: Config,
        database: Db,
        external: Ext,
        mut subscribers: Vec<Box<dyn event::Subscriber>>,
    ) -> (Self, task::Background)
    where
        Self: Task<
                Start<
                    By<
                        task::ReconcileBookings<Self>,
                        task::reconcile_bookings::Config,
                    >,
                >,
                Ok = (),
                Err: Error,
            > + Task<
                Start<
                    By<
                        task::FireExpirationChecks<Self>,
                        task::fire_expiration_checks::Config,
                    >,
                >,
                Ok = (),
                Err: Error,
            > + Task<Start<task::DispatchEvents>, Ok = (), Err: Error>
            + Clone
            + 'static,
    {
        let (events, queue) = event::Bus::new();
        let this = Service {
            config,
            database,
            external,
            events,
        };
        subscribers.insert(0, Box::new(event::Log));

        let mut bg = task::Background::default();
        let svc = this.clone();
        bg.spawn("reconcile_bookings", async move {
            svc.execute(Start(By::new(svc.config().reconcile_bookings)))
                .await
        });
        let svc = this.clone();
        bg.spawn("fire_expiration_checks", async move {
            svc.execute(Start(By::new(svc.config().fire_expiration_checks)))
                .await
        });
        let svc = this.clone();
        bg.spawn("dispatch_events", async move {
            svc.execute(Start(task::DispatchEvents::new(queue, subscribers)))
                .await
        });

        (this, bg)
    }

    /// Returns [`Config`] of this [`Service`].
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Returns [`Database`] of this [`Service`].
    #[must_use]
    pub fn database(&self) -> &Db {
        &self.database
    }

    /// Returns [`External`] systems of this [`Service`].
    #[must_use]
    pub fn external(&self) -> &Ext {
        &self.external
    }

    /// Returns [`event::Bus`] of this [`Service`].
    #[must_use]
    pub fn events(&self) -> &event::Bus {
        &self.events
    }
}
