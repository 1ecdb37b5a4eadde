//! [`Command`] for deactivating a [`Booking`].

use common::operations::{
    By, Commit, Delete, Insert, Lock, Select, Transact, Update,
};
use derive_more::{Display, Error, From};
use tracerr::Traced;
use tracing as log;

use crate::{
    domain::{
        booking::{self, log::Actor, LogEntry, Substage},
        unit, Booking, Unit,
    },
    infra::{
        catalog, crm, database, inventory, Database, Integrations, Store,
        Transactional,
    },
    Service,
};

use super::{log_partial_write, Command};

/// [`Command`] for deactivating a [`Booking`], releasing its unit in the
/// catalog, the CRM and the inventory.
#[derive(Clone, Copy, Debug)]
pub struct DeactivateBooking {
    /// ID of the [`Booking`] to be deactivated.
    pub booking_id: booking::Id,

    /// [`Substage`] the CRM lead is moved to, if any.
    pub substage: Option<Substage>,
}

impl<Db, Ext> Command<DeactivateBooking> for Service<Db, Ext>
where
    Db: Transactional,
    Ext: Integrations,
{
    type Ok = Booking;
    type Err = Traced<ExecutionError>;

    async fn execute(
        &self,
        cmd: DeactivateBooking,
    ) -> Result<Self::Ok, Self::Err> {
        use ExecutionError as E;

        let DeactivateBooking {
            booking_id,
            substage,
        } = cmd;

        let tx = self
            .database()
            .execute(Transact)
            .await
            .map_err(tracerr::map_from_and_wrap!(=> E))?;

        // Avoid concurrent changes of the same `Booking`.
        tx.execute(Lock(By::<Booking, _>::new(booking_id)))
            .await
            .map_err(tracerr::map_from_and_wrap!(=> E))?;

        let mut booking = tx
            .execute(Select(By::<Option<Booking>, _>::new(booking_id)))
            .await
            .map_err(tracerr::map_from_and_wrap!(=> E))?
            .ok_or(E::BookingNotExists(booking_id))
            .map_err(tracerr::wrap!())?;

        if !booking.active {
            log::info!("`Booking(id: {booking_id})` is already inactive");
            return Ok(booking);
        }

        let patch = self
            .release(
                &tx,
                &booking,
                Release {
                    substage,
                    crm: substage.is_some(),
                    unbook: true,
                    actor: Actor::Activation,
                },
            )
            .await?;

        tx.execute(Commit)
            .await
            .map_err(tracerr::map_from_and_wrap!(=> E))?;

        patch.apply(&mut booking);
        Ok(booking)
    }
}

/// Way a [`Booking`] releases its unit.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Release {
    /// [`Substage`] the CRM lead ends up in, if known.
    pub(crate) substage: Option<Substage>,

    /// Indicator whether the CRM lead is moved to the [`Release::substage`].
    pub(crate) crm: bool,

    /// Indicator whether the unit is detached from the CRM lead in the
    /// inventory.
    pub(crate) unbook: bool,

    /// Subsystem releasing the unit.
    pub(crate) actor: Actor,
}

impl<Db, Ext> Service<Db, Ext>
where
    Ext: Integrations,
{
    /// Releases the unit of the provided active [`Booking`] in the catalog,
    /// the CRM and the inventory, one after another, and stores the
    /// deactivated [`Booking`] via the provided transaction.
    ///
    /// A [`Substage::Realized`] unit is marked sold and stays attached to its
    /// deal.
    ///
    /// Returns the [`booking::Patch`] written.
    pub(crate) async fn release<Tx: Store>(
        &self,
        tx: &Tx,
        booking: &Booking,
        release: Release,
    ) -> Result<booking::Patch, Traced<ExecutionError>> {
        use ExecutionError as E;

        let Release {
            substage,
            crm,
            unbook,
            actor,
        } = release;
        let realized = substage == Some(Substage::Realized);
        let mut done: Vec<&str> = vec![];

        if let Some(unit_id) = booking.unit_id {
            let unit = tx
                .execute(Select(By::<Option<Unit>, _>::new(unit_id)))
                .await
                .map_err(tracerr::map_from_and_wrap!(=> E))?;
            if let Some(mut unit) = unit {
                let status = if realized {
                    unit::Status::Sold
                } else {
                    unit::Status::Free
                };
                self.external()
                    .execute(Update(catalog::StatusChange {
                        unit: unit.catalog_ref(),
                        status,
                    }))
                    .await
                    .inspect_err(|e| {
                        log_partial_write("catalog", booking, &done, e);
                    })
                    .map_err(tracerr::map_from_and_wrap!(=> E))?;
                done.push("catalog");

                unit.status = status;
                tx.execute(Insert(unit))
                    .await
                    .map_err(tracerr::map_from_and_wrap!(=> E))?;
            } else {
                log::warn!(
                    "`Unit(id: {unit_id})` of `Booking(id: {})` is unknown, \
                     so its catalog status is left intact",
                    booking.id,
                );
            }
        }

        let mut patch = booking::Patch {
            active: Some(false),
            should_be_deactivated_by_timer: Some(false),
            ..booking::Patch::new(booking.id)
        };
        // Without a CRM write the `substage` is already the lead's one.
        let mut moved = !crm;

        if let (true, Some(target), Some(lead_id)) =
            (crm, substage, booking.lead_id)
        {
            let pipelines = &self.config().pipelines;
            let pipeline = Self::pipeline_of(tx, booking)
                .await
                .map_err(tracerr::map_from_and_wrap!(=> E))?;
            let status_id =
                pipeline.and_then(|p| pipelines.status_of(p, target));
            if let (Some(pipeline), Some(status_id)) = (pipeline, status_id) {
                self.external()
                    .execute(Update(crm::LeadPatch {
                        id: lead_id,
                        pipeline_id: pipelines.pipeline_id(pipeline),
                        status_id: Some(status_id),
                        ..crm::LeadPatch::default()
                    }))
                    .await
                    .inspect_err(|e| {
                        log_partial_write("crm", booking, &done, e);
                    })
                    .map_err(tracerr::map_from_and_wrap!(=> E))?;
                done.push("crm");
                patch.status_id = Some(Some(status_id));
                moved = true;
            } else {
                log::warn!(
                    "no CRM status for `{target}` in `{pipeline:?}` pipeline, \
                     so `Lead(id: {lead_id})` is left intact",
                );
            }
        }

        if let (true, Some(substage)) = (moved, substage) {
            patch = patch.with_substage(substage);
        }

        if let (true, false, Some(lead_id)) = (unbook, realized, booking.lead_id)
        {
            let unbooking = self
                .external()
                .execute(Delete(By::<inventory::Deal, _>::new(lead_id)))
                .await
                .inspect_err(|e| {
                    log_partial_write("inventory", booking, &done, e);
                })
                .map_err(tracerr::map_from_and_wrap!(=> E))?;
            if !unbooking.success {
                log::info!(
                    "unit of `Lead(id: {lead_id})` is already detached in the \
                     inventory",
                );
            }
        }

        tx.execute(Update(patch.clone()))
            .await
            .map_err(tracerr::map_from_and_wrap!(=> E))?;
        tx.execute(Insert(LogEntry::new(
            booking.id,
            actor,
            format!(
                "Booking deactivated, unit {} released{}",
                booking.unit_id.map_or("-".into(), |id| id.to_string()),
                patch
                    .substage
                    .flatten()
                    .map_or(String::new(), |s| format!(", lead is {s}")),
            ),
        )))
        .await
        .map_err(tracerr::map_from_and_wrap!(=> E))?;

        Ok(patch)
    }
}

/// Error of [`DeactivateBooking`] [`Command`] execution.
#[derive(Debug, Display, Error, From)]
pub enum ExecutionError {
    /// [`Booking`] with the provided ID does not exist.
    #[display("`Booking(id: {_0})` does not exist")]
    #[from(ignore)]
    BookingNotExists(#[error(not(source))] booking::Id),

    /// Catalog error.
    #[display("Catalog operation failed: {_0}")]
    Catalog(catalog::Error),

    /// CRM error.
    #[display("CRM operation failed: {_0}")]
    Crm(crm::Error),

    /// [`Database`] error.
    #[display("`Database` operation failed: {_0}")]
    Db(database::Error),

    /// Inventory error.
    #[display("Inventory operation failed: {_0}")]
    Inventory(inventory::Error),
}
