//! [`Command`] for handling a CRM lead status change.

use common::operations::{
    By, Commit, Insert, Lock, Select, Transact, Update,
};
use derive_more::{Display, Error, From};
use tracerr::Traced;
use tracing as log;

use crate::{
    domain::{
        booking::{self, log::Actor, LogEntry, PaymentStatus, Substage},
        lead,
        pipeline::Resolved,
        unit, webhook, Booking, Unit,
    },
    event::Event,
    infra::{
        catalog, database, inventory, Database, Integrations, Store,
        Transactional,
    },
    read, Service,
};

use super::{
    deactivate_booking::{self, Release},
    Command,
};

/// [`Command`] for applying a CRM lead status change to its [`Booking`].
#[derive(Clone, Copy, Debug)]
pub struct HandleLeadStatus {
    /// ID of the CRM lead.
    pub lead_id: lead::Id,

    /// New status of the CRM lead.
    pub status_id: lead::StatusId,

    /// Pipeline the CRM lead is in.
    pub pipeline_id: lead::PipelineId,
}

impl<Db, Ext> Command<HandleLeadStatus> for Service<Db, Ext>
where
    Db: Transactional,
    Ext: Integrations,
{
    type Ok = webhook::Outcome;
    type Err = Traced<ExecutionError>;

    async fn execute(
        &self,
        cmd: HandleLeadStatus,
    ) -> Result<Self::Ok, Self::Err> {
        use ExecutionError as E;

        let HandleLeadStatus {
            lead_id,
            status_id,
            pipeline_id,
        } = cmd;

        let tx = self
            .database()
            .execute(Transact)
            .await
            .map_err(tracerr::map_from_and_wrap!(=> E))?;

        let Some(mut booking) = Self::locked_booking_of(&tx, lead_id)
            .await
            .map_err(tracerr::map_from_and_wrap!(=> E))?
        else {
            log::info!("no `Booking` of `Lead(id: {lead_id})`");
            return Ok(webhook::Outcome::NotFound);
        };

        if booking.status_id == Some(status_id) {
            log::info!(
                "`Booking(id: {})` is already in `{status_id}` status",
                booking.id,
            );
            return Ok(webhook::Outcome::Ignored);
        }

        let Resolved { pipeline, substage } =
            self.config().pipelines.resolve(pipeline_id, status_id);
        let mut patch = booking::Patch {
            status_id: Some(Some(status_id)),
            pipeline: Some(pipeline.or(booking.pipeline)),
            ..booking::Patch::new(booking.id)
        }
        .with_substage(substage);
        let paid = substage == Substage::PaidBooking && !booking.is_paid();
        if paid {
            patch.payment_status = Some(PaymentStatus::Payed);
            patch.should_be_deactivated_by_timer = Some(false);
        }
        if !booking.active
            && substage.is_reserving()
            && self.rebook(&tx, &booking, lead_id, substage).await?
        {
            patch.active = Some(true);
            patch.should_be_deactivated_by_timer = Some(false);
        }
        tx.execute(Update(patch.clone()))
            .await
            .map_err(tracerr::map_from_and_wrap!(=> E))?;

        if booking.active && substage.is_reserving() {
            let status = if substage.is_selling() {
                unit::Status::Sold
            } else {
                unit::Status::Booked
            };
            self.mark_unit(&tx, &booking, status).await?;
        } else if booking.active {
            let released = self
                .release(
                    &tx,
                    &booking,
                    Release {
                        substage: Some(substage),
                        crm: false,
                        unbook: true,
                        actor: Actor::Webhook,
                    },
                )
                .await
                .map_err(tracerr::map_from_and_wrap!(=> E))?;
            released.apply(&mut booking);
        }

        tx.execute(Insert(LogEntry::new(
            booking.id,
            Actor::Webhook,
            format!("CRM lead {lead_id} moved to `{substage}` ({status_id})"),
        )))
        .await
        .map_err(tracerr::map_from_and_wrap!(=> E))?;

        tx.execute(Commit)
            .await
            .map_err(tracerr::map_from_and_wrap!(=> E))?;

        patch.apply(&mut booking);
        self.events().emit(Event::ChangeStatus {
            booking_id: booking.id,
            substage,
        });
        if paid {
            self.events().emit(Event::PayBooking {
                booking_id: booking.id,
            });
        }

        Ok(webhook::Outcome::Handled)
    }
}

impl<Db, Ext> Service<Db, Ext>
where
    Ext: Integrations,
{
    /// Reserves the unit of the provided inactive [`Booking`] again, once its
    /// CRM lead is back in a reserving [`Substage`].
    ///
    /// Returns `false` if the unit is taken by someone else, so it can't be
    /// reserved.
    async fn rebook<Tx: Store>(
        &self,
        tx: &Tx,
        booking: &Booking,
        lead_id: lead::Id,
        substage: Substage,
    ) -> Result<bool, Traced<ExecutionError>> {
        use ExecutionError as E;

        let Some(unit_id) = booking.unit_id else {
            log::warn!(
                "`Booking(id: {})` has no unit to reserve again",
                booking.id,
            );
            return Ok(false);
        };

        // Avoid concurrent activations upon the same `Unit`.
        tx.execute(Lock(By::<Unit, _>::new(unit_id)))
            .await
            .map_err(tracerr::map_from_and_wrap!(=> E))?;
        let holder = tx
            .execute(Select(By::<Option<Booking>, _>::new(
                read::booking::ActiveOnUnit {
                    unit_id,
                    except: booking.id,
                },
            )))
            .await
            .map_err(tracerr::map_from_and_wrap!(=> E))?;
        if let Some(holder) = holder {
            log::warn!(
                "`Unit(id: {unit_id})` is held by `Booking(id: {})`, so \
                 `Booking(id: {})` stays inactive",
                holder.id,
                booking.id,
            );
            return Ok(false);
        }

        let booked = self
            .external()
            .execute(Insert(inventory::Deal { unit_id, lead_id }))
            .await
            .map_err(tracerr::map_from_and_wrap!(=> E))?;
        if !booked.is_booked() {
            log::warn!(
                "`Unit(id: {unit_id})` is taken in the inventory, so \
                 `Booking(id: {})` stays inactive",
                booking.id,
            );
            return Ok(false);
        }

        let status = if substage.is_selling() {
            unit::Status::Sold
        } else {
            unit::Status::Booked
        };
        self.mark_unit(tx, booking, status).await?;

        log::info!(
            booking_id = %booking.id,
            lead_id = %lead_id,
            "`Booking` reserved again by the CRM lead",
        );
        Ok(true)
    }

    /// Marks the unit of the provided [`Booking`] with the given
    /// [`unit::Status`] in the catalog and locally.
    async fn mark_unit<Tx: Store>(
        &self,
        tx: &Tx,
        booking: &Booking,
        status: unit::Status,
    ) -> Result<(), Traced<ExecutionError>> {
        use ExecutionError as E;

        let Some(unit_id) = booking.unit_id else {
            return Ok(());
        };
        let Some(mut unit) = tx
            .execute(Select(By::<Option<Unit>, _>::new(unit_id)))
            .await
            .map_err(tracerr::map_from_and_wrap!(=> E))?
        else {
            log::warn!("`Unit(id: {unit_id})` is unknown locally");
            return Ok(());
        };
        if unit.status == status {
            return Ok(());
        }

        self.external()
            .execute(Update(catalog::StatusChange {
                unit: unit.catalog_ref(),
                status,
            }))
            .await
            .map_err(tracerr::map_from_and_wrap!(=> E))?;
        unit.status = status;
        tx.execute(Insert(unit))
            .await
            .map_err(tracerr::map_from_and_wrap!(=> E))
    }
}

/// Error of [`HandleLeadStatus`] [`Command`] execution.
#[derive(Debug, Display, Error, From)]
pub enum ExecutionError {
    /// Catalog error.
    #[display("Catalog operation failed: {_0}")]
    Catalog(catalog::Error),

    /// [`Database`] error.
    #[display("`Database` operation failed: {_0}")]
    Db(database::Error),

    /// Inventory error.
    #[display("Inventory operation failed: {_0}")]
    Inventory(inventory::Error),

    /// Releasing the unit failed.
    #[display("Failed to release unit: {_0}")]
    Release(deactivate_booking::ExecutionError),
}

#[cfg(test)]
mod spec {
    use crate::{
        domain::{
            booking::{PaymentStatus, Substage},
            lead, unit, webhook, Pipeline,
        },
        event::Event,
        infra::mock,
        Command as _,
    };

    use super::HandleLeadStatus;

    fn change(svc: &mock::MockService, substage: Substage) -> HandleLeadStatus {
        let pipelines = &svc.config().pipelines;
        HandleLeadStatus {
            lead_id: lead::Id::from(5_i64),
            status_id: pipelines.status_of(Pipeline::Tyumen, substage).unwrap(),
            pipeline_id: pipelines.pipeline_id(Pipeline::Tyumen).unwrap(),
        }
    }

    #[tokio::test]
    async fn replays_transition_once() {
        let (svc, mut queue) = mock::service();
        let unit = mock::seed_unit(&svc, unit::Id::from(100));
        let booking =
            mock::seed_active_booking(&svc, &unit, lead::Id::from(5_i64));
        let cmd = change(&svc, Substage::MakeDecision);

        let outcomes = [
            svc.execute(cmd).await.unwrap(),
            svc.execute(cmd).await.unwrap(),
            svc.execute(cmd).await.unwrap(),
        ];

        assert_eq!(
            outcomes,
            [
                webhook::Outcome::Handled,
                webhook::Outcome::Ignored,
                webhook::Outcome::Ignored,
            ],
        );
        let stored = svc.database().booking(booking.id);
        assert!(stored.active);
        assert_eq!(stored.substage, Some(Substage::MakeDecision));
        assert_eq!(stored.status_id, Some(cmd.status_id));
        assert_eq!(svc.database().state().logs.len(), 1);
        assert_eq!(
            mock::events(&mut queue),
            [Event::ChangeStatus {
                booking_id: booking.id,
                substage: Substage::MakeDecision,
            }],
        );
    }

    #[tokio::test]
    async fn releases_unit_of_closed_deal() {
        let (svc, _) = mock::service();
        let unit = mock::seed_unit(&svc, unit::Id::from(100));
        let booking =
            mock::seed_active_booking(&svc, &unit, lead::Id::from(5_i64));

        let outcome =
            svc.execute(change(&svc, Substage::Unrealized)).await.unwrap();

        assert_eq!(outcome, webhook::Outcome::Handled);
        let stored = svc.database().booking(booking.id);
        assert!(!stored.active);
        assert_eq!(stored.substage, Some(Substage::Unrealized));
        let world = svc.external().world();
        assert_eq!(world.inventory[&unit.id], (unit::Status::Free, None));
        assert_eq!(world.catalog[&unit.catalog_ref()], unit::Status::Free);
        assert!(world.lead_updates.is_empty());
    }

    #[tokio::test]
    async fn reserves_unit_of_reopened_deal() {
        let (svc, _) = mock::service();
        let unit = mock::seed_unit(&svc, unit::Id::from(100));
        let booking =
            mock::seed_active_booking(&svc, &unit, lead::Id::from(5_i64));
        _ = svc
            .execute(change(&svc, Substage::MakeDecision))
            .await
            .unwrap();
        _ = svc.execute(change(&svc, Substage::Unrealized)).await.unwrap();
        assert!(!svc.database().booking(booking.id).active);

        let outcome =
            svc.execute(change(&svc, Substage::Booking)).await.unwrap();

        assert_eq!(outcome, webhook::Outcome::Handled);
        let stored = svc.database().booking(booking.id);
        assert!(stored.active);
        assert_eq!(stored.substage, Some(Substage::Booking));
        assert_eq!(svc.database().unit(unit.id).status, unit::Status::Booked);
        let world = svc.external().world();
        assert_eq!(world.catalog[&unit.catalog_ref()], unit::Status::Booked);
        assert_eq!(
            world.inventory[&unit.id],
            (unit::Status::Booked, Some(lead::Id::from(5_i64))),
        );
    }

    #[tokio::test]
    async fn keeps_reopened_deal_inactive_if_unit_is_taken() {
        let (svc, _) = mock::service();
        let unit = mock::seed_unit(&svc, unit::Id::from(100));
        let booking =
            mock::seed_active_booking(&svc, &unit, lead::Id::from(5_i64));
        _ = svc.execute(change(&svc, Substage::Unrealized)).await.unwrap();
        drop(svc.external().world().inventory.insert(
            unit.id,
            (unit::Status::Booked, Some(lead::Id::from(7_i64))),
        ));

        let outcome =
            svc.execute(change(&svc, Substage::Booking)).await.unwrap();

        assert_eq!(outcome, webhook::Outcome::Handled);
        let stored = svc.database().booking(booking.id);
        assert!(!stored.active);
        assert_eq!(stored.substage, Some(Substage::Booking));
        assert_eq!(
            svc.external().world().catalog[&unit.catalog_ref()],
            unit::Status::Free,
        );
    }

    #[tokio::test]
    async fn confirms_paid_booking() {
        let (svc, mut queue) = mock::service();
        let unit = mock::seed_unit(&svc, unit::Id::from(100));
        let booking =
            mock::seed_active_booking(&svc, &unit, lead::Id::from(5_i64));

        let outcome =
            svc.execute(change(&svc, Substage::PaidBooking)).await.unwrap();

        assert_eq!(outcome, webhook::Outcome::Handled);
        let stored = svc.database().booking(booking.id);
        assert!(stored.active);
        assert_eq!(stored.payment_status, PaymentStatus::Payed);
        assert!(!stored.should_be_deactivated_by_timer);
        assert_eq!(
            mock::events(&mut queue),
            [
                Event::ChangeStatus {
                    booking_id: booking.id,
                    substage: Substage::PaidBooking,
                },
                Event::PayBooking {
                    booking_id: booking.id,
                },
            ],
        );
    }

    #[tokio::test]
    async fn reports_unknown_lead() {
        let (svc, _) = mock::service();

        let outcome =
            svc.execute(change(&svc, Substage::MakeDecision)).await.unwrap();

        assert_eq!(outcome, webhook::Outcome::NotFound);
    }
}
