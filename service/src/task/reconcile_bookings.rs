//! [`ReconcileBookings`] [`Task`].

use std::{collections::HashSet, convert::Infallible, error::Error, time};

use common::operations::{
    By, Commit, Insert, Perform, Select, Start, Transact, Update,
};
use derive_more::{Display, Error as StdError, From};
use tokio::time::interval;
use tracerr::Traced;
use tracing as log;

use crate::{
    command::deactivate_booking::{self, Release},
    domain::{
        booking::{self, log::Actor, Linkage, LogEntry, PaymentStatus, Substage},
        lead,
        pipeline::Resolved,
        unit, Booking, Lead, Unit, User,
    },
    event::Event,
    infra::{
        catalog, crm, database, Database, Integrations, Store, Transactional,
    },
    read, Service,
};

use super::Task;

/// Configuration for [`ReconcileBookings`] [`Task`].
#[derive(Clone, Copy, Debug)]
pub struct Config {
    /// Interval between reconciliation sweeps.
    pub interval: time::Duration,

    /// Number of CRM leads fetched at once.
    pub batch_size: usize,
}

/// [`Task`] for converging active [`Booking`]s with their CRM leads.
#[derive(Clone, Copy, Debug)]
pub struct ReconcileBookings<S> {
    /// [`Config`] of this [`Task`].
    config: Config,

    /// [`Service`] instance.
    service: S,
}

impl<Db, Ext> Task<Start<By<ReconcileBookings<Self>, Config>>>
    for Service<Db, Ext>
where
    ReconcileBookings<Service<Db, Ext>>:
        Task<Perform<()>, Ok = Report, Err: Error> + 'static,
    Self: Clone,
{
    type Ok = ();
    type Err = Infallible;

    async fn execute(
        &self,
        Start(by): Start<By<ReconcileBookings<Self>, Config>>,
    ) -> Result<Self::Ok, Self::Err> {
        let config = by.into_inner();
        let task = ReconcileBookings {
            config,
            service: self.clone(),
        };

        let mut interval = interval(task.config.interval);
        loop {
            let _ = interval.tick().await;
            _ = task.execute(Perform(())).await.map_err(|e| {
                log::error!("`task::ReconcileBookings` failed: {e}");
            });
        }
    }
}

impl<Db, Ext> ReconcileBookings<Service<Db, Ext>> {
    /// Creates a new [`ReconcileBookings`] [`Task`] sweeping via the provided
    /// [`Service`].
    #[must_use]
    pub const fn new(config: Config, service: Service<Db, Ext>) -> Self {
        Self { config, service }
    }
}

/// Summary of a single [`ReconcileBookings`] sweep.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Report {
    /// Number of CRM leads compared with their [`Booking`]s.
    pub checked: usize,

    /// Number of [`Booking`]s updated from their CRM leads.
    pub updated: usize,

    /// Number of [`Booking`]s released.
    pub released: usize,

    /// Number of [`Booking`]s whose CRM lead is gone.
    pub missing: usize,

    /// Number of CRM batches failed to be fetched.
    pub failed_batches: usize,
}

/// Result of reconciling a single [`Booking`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Reconciled {
    /// Nothing changed.
    Unchanged,

    /// [`Booking`] is updated and keeps its unit.
    Updated,

    /// [`Booking`] is released.
    Released,
}

impl<Db, Ext> Task<Perform<()>> for ReconcileBookings<Service<Db, Ext>>
where
    Db: Transactional,
    Ext: Integrations,
{
    type Ok = Report;
    type Err = Traced<ExecutionError>;

    async fn execute(&self, _: Perform<()>) -> Result<Self::Ok, Self::Err> {
        let svc = &self.service;

        let bookings = svc
            .database()
            .execute(Select(By::<Vec<Booking>, _>::new(
                read::booking::ActiveInCrm,
            )))
            .await
            .map_err(tracerr::map_from_and_wrap!(=> ExecutionError))?;
        let lead_ids = bookings
            .iter()
            .filter_map(|b| b.lead_id)
            .collect::<Vec<_>>();
        let mut unseen = lead_ids.iter().copied().collect::<HashSet<_>>();

        let mut report = Report::default();
        for batch in lead_ids.chunks(self.config.batch_size.max(1)) {
            let leads = match svc
                .external()
                .execute(Select(By::<Vec<Lead>, _>::new(batch.to_vec())))
                .await
            {
                Ok(leads) => leads,
                Err(e) => {
                    log::error!("failed to fetch CRM leads {batch:?}: {e}");
                    report.failed_batches += 1;
                    // Unknown is not the same as missing.
                    for id in batch {
                        _ = unseen.remove(id);
                    }
                    continue;
                }
            };

            for lead in leads {
                _ = unseen.remove(&lead.id);
                report.checked += 1;
                match svc.reconcile_lead(&lead).await {
                    Ok(Reconciled::Unchanged) => {}
                    Ok(Reconciled::Updated) => report.updated += 1,
                    Ok(Reconciled::Released) => report.released += 1,
                    Err(e) => log::error!(
                        lead_id = %lead.id,
                        "failed to reconcile `Booking` with CRM lead: {e}",
                    ),
                }
            }
        }

        for lead_id in unseen {
            match svc.release_missing(lead_id).await {
                Ok(true) => report.missing += 1,
                Ok(false) => {}
                Err(e) => log::error!(
                    lead_id = %lead_id,
                    "failed to release `Booking` of missing CRM lead: {e}",
                ),
            }
        }

        log::info!(
            checked = report.checked,
            updated = report.updated,
            released = report.released,
            missing = report.missing,
            failed_batches = report.failed_batches,
            "reconciliation sweep finished",
        );
        Ok(report)
    }
}

impl<Db, Ext> Service<Db, Ext>
where
    Db: Transactional,
    Ext: Integrations,
{
    /// Converges the active [`Booking`] of the provided [`Lead`] with it.
    async fn reconcile_lead(
        &self,
        lead: &Lead,
    ) -> Result<Reconciled, Traced<ExecutionError>> {
        use ExecutionError as E;

        let tx = self
            .database()
            .execute(Transact)
            .await
            .map_err(tracerr::map_from_and_wrap!(=> E))?;

        let Some(booking) = Self::locked_booking_of(&tx, lead.id)
            .await
            .map_err(tracerr::map_from_and_wrap!(=> E))?
            .filter(|b| b.active)
        else {
            return Ok(Reconciled::Unchanged);
        };

        let pipelines = &self.config().pipelines;
        if lead.is_deleted || pipelines.pipeline(lead.pipeline_id).is_none() {
            log::info!(
                booking_id = %booking.id,
                "CRM lead {} is deleted or left sales pipelines",
                lead.id,
            );
            self.release(
                &tx,
                &booking,
                Release {
                    substage: None,
                    crm: false,
                    unbook: true,
                    actor: Actor::Reconciliation,
                },
            )
            .await
            .map_err(tracerr::map_from_and_wrap!(=> E))?;
            if lead.is_deleted {
                tx.execute(Update(booking::Patch {
                    deleted_in_crm: Some(true),
                    ..booking::Patch::new(booking.id)
                }))
                .await
                .map_err(tracerr::map_from_and_wrap!(=> E))?;
            }
            tx.execute(Commit)
                .await
                .map_err(tracerr::map_from_and_wrap!(=> E))?;
            return Ok(Reconciled::Released);
        }

        let Resolved { pipeline, substage } =
            pipelines.resolve(lead.pipeline_id, lead.status_id);
        let terms = self.config().fields.terms(lead);

        let mut patch = booking::Patch {
            status_id: Some(Some(lead.status_id)),
            pipeline: Some(pipeline),
            ..booking::Patch::new(booking.id)
        }
        .with_substage(substage);
        if terms.final_payment_amount.is_some() {
            patch.final_payment_amount = Some(terms.final_payment_amount);
        }
        if terms.paid && !booking.is_paid() {
            patch.payment_status = Some(PaymentStatus::Payed);
            patch.should_be_deactivated_by_timer = Some(false);
        }
        if !booking.is_agent_assigned() {
            if terms.commission.is_some() {
                patch.commission = Some(terms.commission);
            }
            if terms.commission_value.is_some() {
                patch.commission_value = Some(terms.commission_value);
            }
        }
        if substage != Substage::AssignAgent {
            patch.linkage = self.relink(&tx, &booking, &terms).await?;
        }
        if !substage.is_closed() && booking.agent_id.is_none() {
            let agent = tx
                .execute(Select(By::<Option<User>, _>::new(
                    read::user::AgentAmong(lead.contacts.clone()),
                )))
                .await
                .map_err(tracerr::map_from_and_wrap!(=> E))?;
            if let Some(agent) = agent {
                patch.agent_id = Some(Some(agent.id));
            }
        }

        let mut updated = booking.clone();
        patch.apply(&mut updated);
        if updated == booking {
            return Ok(Reconciled::Unchanged);
        }

        tx.execute(Update(patch))
            .await
            .map_err(tracerr::map_from_and_wrap!(=> E))?;

        let reconciled = if substage.is_reserving() {
            tx.execute(Insert(LogEntry::new(
                booking.id,
                Actor::Reconciliation,
                format!(
                    "Converged with CRM lead {} in `{substage}` ({})",
                    lead.id, lead.status_id,
                ),
            )))
            .await
            .map_err(tracerr::map_from_and_wrap!(=> E))?;
            Reconciled::Updated
        } else {
            self.release(
                &tx,
                &updated,
                Release {
                    substage: Some(substage),
                    crm: false,
                    unbook: true,
                    actor: Actor::Reconciliation,
                },
            )
            .await
            .map_err(tracerr::map_from_and_wrap!(=> E))?;
            Reconciled::Released
        };

        tx.execute(Commit)
            .await
            .map_err(tracerr::map_from_and_wrap!(=> E))?;

        if booking.substage != Some(substage) {
            self.events().emit(Event::ChangeStatus {
                booking_id: booking.id,
                substage,
            });
        }
        Ok(reconciled)
    }

    /// Resolves the unit [`Linkage`] of the provided [`Booking`] described by
    /// the given [`lead::Terms`], importing an unknown unit from the catalog.
    ///
    /// [`None`] is returned if the [`Linkage`] stays the same.
    async fn relink<Tx: Store>(
        &self,
        tx: &Tx,
        booking: &Booking,
        terms: &lead::Terms,
    ) -> Result<Option<Linkage>, Traced<ExecutionError>> {
        use ExecutionError as E;

        let Some(unit_id) = terms.unit else {
            return Ok(booking.unit_id.map(|_| Linkage::default()));
        };
        if booking.unit_id == Some(unit_id) {
            return Ok(None);
        }

        let known = tx
            .execute(Select(By::<Option<Unit>, _>::new(unit_id)))
            .await
            .map_err(tracerr::map_from_and_wrap!(=> E))?;
        let unit = if let Some(unit) = known {
            unit
        } else {
            let kind = terms.unit_kind.unwrap_or(unit::Kind::Flat);
            let Some(listing) = self
                .external()
                .execute(Select(By::<Option<catalog::Listing>, _>::new(
                    catalog::Lookup { id: unit_id, kind },
                )))
                .await
                .map_err(tracerr::map_from_and_wrap!(=> E))?
            else {
                log::warn!(
                    booking_id = %booking.id,
                    "`Unit(id: {unit_id})` is unknown to the catalog",
                );
                return Ok(None);
            };
            let unit = Unit {
                id: unit_id,
                kind,
                project_id: listing.building.project_id,
                building_id: listing.building.id,
                floor: listing.floor,
                status: listing.status,
                price: listing.price,
            };
            tx.execute(Insert(listing.building))
                .await
                .map_err(tracerr::map_from_and_wrap!(=> E))?;
            tx.execute(Insert(unit.clone()))
                .await
                .map_err(tracerr::map_from_and_wrap!(=> E))?;
            unit
        };

        Ok(Some(Linkage {
            project_id: Some(unit.project_id),
            building_id: Some(unit.building_id),
            unit_id: Some(unit.id),
        }))
    }

    /// Releases the active [`Booking`] of the provided CRM lead which is gone
    /// from the CRM.
    ///
    /// Returns whether any [`Booking`] was released.
    async fn release_missing(
        &self,
        lead_id: lead::Id,
    ) -> Result<bool, Traced<ExecutionError>> {
        use ExecutionError as E;

        let tx = self
            .database()
            .execute(Transact)
            .await
            .map_err(tracerr::map_from_and_wrap!(=> E))?;

        let Some(booking) = Self::locked_booking_of(&tx, lead_id)
            .await
            .map_err(tracerr::map_from_and_wrap!(=> E))?
            .filter(|b| b.active)
        else {
            return Ok(false);
        };

        log::info!(
            booking_id = %booking.id,
            "CRM lead {lead_id} is gone from the CRM",
        );
        self.release(
            &tx,
            &booking,
            Release {
                substage: None,
                crm: false,
                unbook: true,
                actor: Actor::Reconciliation,
            },
        )
        .await
        .map_err(tracerr::map_from_and_wrap!(=> E))?;
        tx.execute(Update(booking::Patch {
            deleted_in_crm: Some(true),
            ..booking::Patch::new(booking.id)
        }))
        .await
        .map_err(tracerr::map_from_and_wrap!(=> E))?;

        tx.execute(Commit)
            .await
            .map_err(tracerr::map_from_and_wrap!(=> E))?;
        Ok(true)
    }
}

/// Error of [`ReconcileBookings`] execution.
#[derive(Debug, Display, StdError, From)]
pub enum ExecutionError {
    /// Catalog error.
    #[display("Catalog operation failed: {_0}")]
    Catalog(catalog::Error),

    /// CRM error.
    #[display("CRM operation failed: {_0}")]
    Crm(crm::Error),

    /// [`Database`] error.
    #[display("`Database` operation failed: {_0}")]
    Db(database::Error),

    /// Releasing the unit failed.
    #[display("Failed to release unit: {_0}")]
    Release(deactivate_booking::ExecutionError),
}

#[cfg(test)]
mod spec {
    use common::operations::Perform;

    use crate::{
        domain::{
            booking::Substage, lead, project, unit, Building, Lead, Pipeline,
        },
        infra::{catalog, mock},
    };

    use super::{ReconcileBookings, Report, Task as _};

    fn task(svc: &mock::MockService) -> ReconcileBookings<mock::MockService> {
        ReconcileBookings::new(svc.config().reconcile_bookings, svc.clone())
    }

    fn move_lead(svc: &mock::MockService, id: lead::Id, substage: Substage) {
        let pipelines = svc.config().pipelines.clone();
        let mut world = svc.external().world();
        let lead = world.leads.get_mut(&id).unwrap();
        lead.status_id =
            pipelines.status_of(Pipeline::Tyumen, substage).unwrap();
    }

    #[tokio::test]
    async fn converges_moved_and_missing_leads() {
        let (svc, _) = mock::service();
        let units = [100, 101, 102]
            .map(|id| mock::seed_unit(&svc, unit::Id::from(id)));
        let moved = mock::seed_active_booking(
            &svc,
            &units[0],
            lead::Id::from(5_i64),
        );
        let closed = mock::seed_active_booking(
            &svc,
            &units[1],
            lead::Id::from(6_i64),
        );
        let missing = mock::seed_active_booking(
            &svc,
            &units[2],
            lead::Id::from(7_i64),
        );
        move_lead(&svc, lead::Id::from(5_i64), Substage::MakeDecision);
        move_lead(&svc, lead::Id::from(6_i64), Substage::Unrealized);
        drop(svc.external().world().leads.remove(&lead::Id::from(7_i64)));

        let report = task(&svc).execute(Perform(())).await.unwrap();

        assert_eq!(
            report,
            Report {
                checked: 2,
                updated: 1,
                released: 1,
                missing: 1,
                failed_batches: 0,
            },
        );
        let moved = svc.database().booking(moved.id);
        assert!(moved.active);
        assert_eq!(moved.substage, Some(Substage::MakeDecision));
        let closed = svc.database().booking(closed.id);
        assert!(!closed.active);
        assert_eq!(closed.substage, Some(Substage::Unrealized));
        let missing = svc.database().booking(missing.id);
        assert!(!missing.active);
        assert!(missing.deleted_in_crm);
        let world = svc.external().world();
        assert_eq!(world.inventory[&units[2].id], (unit::Status::Free, None));
        assert!(world.lead_updates.is_empty());
    }

    #[tokio::test]
    async fn second_sweep_changes_nothing() {
        let (svc, mut queue) = mock::service();
        let unit = mock::seed_unit(&svc, unit::Id::from(100));
        let booking =
            mock::seed_active_booking(&svc, &unit, lead::Id::from(5_i64));
        move_lead(&svc, lead::Id::from(5_i64), Substage::MakeDecision);

        let first = task(&svc).execute(Perform(())).await.unwrap();
        let stored = svc.database().booking(booking.id);
        let second = task(&svc).execute(Perform(())).await.unwrap();

        assert_eq!(first.updated, 1);
        assert_eq!(second.updated, 0);
        assert_eq!(svc.database().booking(booking.id), stored);
        assert_eq!(mock::events(&mut queue).len(), 1);
    }

    #[tokio::test]
    async fn failed_batch_is_not_treated_as_missing() {
        let (svc, _) = mock::service();
        let unit = mock::seed_unit(&svc, unit::Id::from(100));
        let booking =
            mock::seed_active_booking(&svc, &unit, lead::Id::from(5_i64));
        svc.external().world().crm_batches_fail = true;

        let report = task(&svc).execute(Perform(())).await.unwrap();

        assert_eq!(report.failed_batches, 1);
        assert_eq!(report.missing, 0);
        let stored = svc.database().booking(booking.id);
        assert!(stored.active);
        assert!(!stored.deleted_in_crm);
    }

    #[tokio::test]
    async fn releases_deleted_lead() {
        let (svc, _) = mock::service();
        let unit = mock::seed_unit(&svc, unit::Id::from(100));
        let booking =
            mock::seed_active_booking(&svc, &unit, lead::Id::from(5_i64));
        svc.external()
            .world()
            .leads
            .get_mut(&lead::Id::from(5_i64))
            .unwrap()
            .is_deleted = true;

        let report = task(&svc).execute(Perform(())).await.unwrap();

        assert_eq!(report.released, 1);
        let stored = svc.database().booking(booking.id);
        assert!(!stored.active);
        assert!(stored.deleted_in_crm);
    }

    #[tokio::test]
    async fn imports_relinked_unit_from_catalog() {
        let (svc, _) = mock::service();
        let unit = mock::seed_unit(&svc, unit::Id::from(100));
        let booking =
            mock::seed_active_booking(&svc, &unit, lead::Id::from(5_i64));
        let fields = svc.config().fields.clone();
        {
            let mut world = svc.external().world();
            let lead: &mut Lead =
                world.leads.get_mut(&lead::Id::from(5_i64)).unwrap();
            lead.custom_fields.insert(
                fields.unit,
                vec![lead::FieldValue::text("200")],
            );
            drop(world.listings.insert(
                unit::Id::from(200),
                catalog::Listing {
                    floor: Some(7),
                    price: None,
                    status: unit::Status::Booked,
                    building: Building {
                        id: project::BuildingId::from(20),
                        project_id: project::Id::from(1),
                        name: project::Name::new("Корпус 2").unwrap(),
                    },
                },
            ));
        }

        let report = task(&svc).execute(Perform(())).await.unwrap();

        assert_eq!(report.updated, 1);
        let stored = svc.database().booking(booking.id);
        assert_eq!(stored.unit_id, Some(unit::Id::from(200)));
        assert_eq!(stored.building_id, Some(project::BuildingId::from(20)));
        let state = svc.database().state();
        assert_eq!(state.units[&unit::Id::from(200)].floor, Some(7));
        assert!(state.buildings.contains_key(&project::BuildingId::from(20)));
    }
}
