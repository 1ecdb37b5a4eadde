//! [`FireExpirationChecks`] [`Task`].

use std::{convert::Infallible, error::Error, time};

use common::{
    operations::{By, Commit, Delete, Perform, Select, Start, Transact, Update},
    DateTime,
};
use tokio::time::interval;
use tracerr::Traced;
use tracing as log;

use crate::{
    command::{check_booking_expiration::Outcome, CheckBookingExpiration},
    domain::expiration::{self, Check},
    infra::{database, Database, Integrations, Transactional},
    Service,
};

use super::Task;

/// Configuration for [`FireExpirationChecks`] [`Task`].
#[derive(Clone, Copy, Debug)]
pub struct Config {
    /// Interval between polls of due [`Check`]s.
    pub interval: time::Duration,

    /// Maximum number of [`Check`]s fired per poll.
    pub limit: usize,

    /// Number of failed attempts after which a [`Check`] releases the unit
    /// without moving the CRM lead.
    pub max_attempts: u8,

    /// Delay before a failed [`Check`] is retried.
    pub retry_after: time::Duration,
}

/// [`Task`] for firing due expiration [`Check`]s.
///
/// Delivery is at-least-once: a [`Check`] is removed only after being
/// executed, and a failed one is retried until it succeeds.
#[derive(Clone, Copy, Debug)]
pub struct FireExpirationChecks<S> {
    /// [`Config`] of this [`Task`].
    config: Config,

    /// [`Service`] instance.
    service: S,
}

impl<Db, Ext> Task<Start<By<FireExpirationChecks<Self>, Config>>>
    for Service<Db, Ext>
where
    FireExpirationChecks<Service<Db, Ext>>:
        Task<Perform<()>, Ok = usize, Err: Error> + 'static,
    Self: Clone,
{
    type Ok = ();
    type Err = Infallible;

    async fn execute(
        &self,
        Start(by): Start<By<FireExpirationChecks<Self>, Config>>,
    ) -> Result<Self::Ok, Self::Err> {
        let config = by.into_inner();
        let task = FireExpirationChecks {
            config,
            service: self.clone(),
        };

        let mut interval = interval(task.config.interval);
        loop {
            let _ = interval.tick().await;
            _ = task.execute(Perform(())).await.map_err(|e| {
                log::error!("`task::FireExpirationChecks` failed: {e}");
            });
        }
    }
}

impl<Db, Ext> FireExpirationChecks<Service<Db, Ext>> {
    /// Creates a new [`FireExpirationChecks`] [`Task`] firing via the
    /// provided [`Service`].
    #[must_use]
    pub const fn new(config: Config, service: Service<Db, Ext>) -> Self {
        Self { config, service }
    }
}

impl<Db, Ext> Task<Perform<()>> for FireExpirationChecks<Service<Db, Ext>>
where
    Db: Transactional,
    Ext: Integrations,
{
    /// Number of fired [`Check`]s.
    type Ok = usize;
    type Err = ExecutionError;

    async fn execute(&self, _: Perform<()>) -> Result<Self::Ok, Self::Err> {
        let Config {
            limit,
            max_attempts,
            retry_after,
            ..
        } = self.config;
        let now = DateTime::now();

        let tx = self
            .service
            .database()
            .execute(Transact)
            .await
            .map_err(tracerr::wrap!())?;

        let due = tx
            .execute(Select(By::<Vec<Check>, _>::new(expiration::Due {
                at: now,
                limit,
            })))
            .await
            .map_err(tracerr::wrap!())?;
        let fired = due.len();

        for check in due {
            let res = self
                .service
                .execute(CheckBookingExpiration {
                    booking_id: check.booking_id,
                    fallback: check.fallback,
                    crm: check.attempts < max_attempts,
                })
                .await;
            match res {
                Ok(Outcome::Rescheduled(at)) => {
                    tx.execute(Update(Check {
                        fire_at: at.coerce(),
                        attempts: 0,
                        ..check
                    }))
                    .await
                    .map_err(tracerr::wrap!())?;
                }
                Ok(
                    Outcome::Skipped
                    | Outcome::Confirmed
                    | Outcome::Deactivated,
                ) => {
                    tx.execute(Delete(By::<Check, _>::new(check.id)))
                        .await
                        .map_err(tracerr::wrap!())?;
                }
                Err(e) => {
                    let attempts = check.attempts.saturating_add(1);
                    if attempts >= max_attempts {
                        log::error!(
                            booking_id = %check.booking_id,
                            "expiration check failed {attempts} times, \
                             retrying without CRM: {e}",
                        );
                    } else {
                        log::warn!(
                            booking_id = %check.booking_id,
                            "expiration check failed, retrying: {e}",
                        );
                    }
                    tx.execute(Update(Check {
                        fire_at: (now + retry_after).coerce(),
                        attempts,
                        ..check
                    }))
                    .await
                    .map_err(tracerr::wrap!())?;
                }
            }
        }

        tx.execute(Commit).await.map_err(tracerr::wrap!())?;
        Ok(fired)
    }
}

/// Error of [`FireExpirationChecks`] execution.
pub type ExecutionError = Traced<database::Error>;
