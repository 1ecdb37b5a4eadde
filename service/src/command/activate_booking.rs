//! [`Command`] for activating a [`Booking`].

use common::operations::{By, Commit, Insert, Lock, Select, Transact, Update};
use derive_more::{Display, Error, From};
use tracerr::Traced;
use tracing as log;

use crate::{
    domain::{
        booking::{self, log::Actor, LogEntry, Substage},
        lead,
        pipeline::Resolved,
        project, unit, Booking, Lead, Pipeline, Project, Unit, User,
    },
    event::Event,
    infra::{
        catalog, crm, database, inventory, Database, Integrations,
        Transactional,
    },
    read, Service,
};

use super::{log_partial_write, Command};

/// Unique constraint allowing a single active [`Booking`] per unit.
const ACTIVE_UNIT_CONSTRAINT: &str = "bookings_active_unit_idx";

/// [`Command`] for activating a [`Booking`], reserving its unit in the
/// catalog, the CRM and the inventory.
#[derive(Clone, Copy, Debug)]
pub struct ActivateBooking {
    /// ID of the [`Booking`] to be activated.
    pub booking_id: booking::Id,
}

impl<Db, Ext> Command<ActivateBooking> for Service<Db, Ext>
where
    Db: Transactional,
    Ext: Integrations,
{
    type Ok = Booking;
    type Err = Traced<ExecutionError>;

    #[expect(clippy::too_many_lines, reason = "sequential protocol")]
    async fn execute(
        &self,
        cmd: ActivateBooking,
    ) -> Result<Self::Ok, Self::Err> {
        use ExecutionError as E;

        let ActivateBooking { booking_id } = cmd;

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

        if booking.active {
            log::info!("`Booking(id: {booking_id})` is already active");
            return Ok(booking);
        }

        let unit_id = booking
            .unit_id
            .ok_or(E::UnitNotSpecified(booking_id))
            .map_err(tracerr::wrap!())?;

        // Avoid concurrent activations upon the same `Unit`.
        tx.execute(Lock(By::<Unit, _>::new(unit_id)))
            .await
            .map_err(tracerr::map_from_and_wrap!(=> E))?;

        let mut unit = tx
            .execute(Select(By::<Option<Unit>, _>::new(unit_id)))
            .await
            .map_err(tracerr::map_from_and_wrap!(=> E))?
            .ok_or(E::UnitNotExists(unit_id))
            .map_err(tracerr::wrap!())?;

        let holder = tx
            .execute(Select(By::<Option<Booking>, _>::new(
                read::booking::ActiveOnUnit {
                    unit_id,
                    except: booking_id,
                },
            )))
            .await
            .map_err(tracerr::map_from_and_wrap!(=> E))?;
        if let Some(holder) = holder {
            log::info!(
                "`Unit(id: {unit_id})` is held by `Booking(id: {})`",
                holder.id,
            );
            return Err(tracerr::new!(E::UnitUnavailable(unit_id)));
        }

        let status = self
            .external()
            .execute(Select(By::<Option<unit::Status>, _>::new(unit_id)))
            .await
            .map_err(tracerr::map_from_and_wrap!(=> E))?;
        // Whether the unit is already attached to the lead of this `Booking`.
        let attached = match (status, booking.lead_id) {
            (Some(unit::Status::Free), _) => false,
            // Retry of an activation whose inventory step was not confirmed.
            (Some(unit::Status::Booked), Some(lead_id)) => {
                let own = self
                    .external()
                    .execute(Insert(inventory::Deal { unit_id, lead_id }))
                    .await
                    .map_err(tracerr::map_from_and_wrap!(=> E))?
                    .is_booked();
                if !own {
                    log::info!(
                        "`Unit(id: {unit_id})` is held by another deal than \
                         `Lead(id: {lead_id})` in the inventory",
                    );
                    return Err(tracerr::new!(E::UnitUnavailable(unit_id)));
                }
                true
            }
            (Some(unit::Status::Booked | unit::Status::Sold) | None, _) => {
                return Err(tracerr::new!(E::UnitUnavailable(unit_id)));
            }
        };

        let project_id = booking.project_id.unwrap_or(unit.project_id);
        let project = tx
            .execute(Select(By::<Option<Project>, _>::new(project_id)))
            .await
            .map_err(tracerr::map_from_and_wrap!(=> E))?
            .ok_or(E::ProjectNotExists(project_id))
            .map_err(tracerr::wrap!())?;

        let pipelines = &self.config().pipelines;
        let mut done: Vec<&str> = vec![];

        self.external()
            .execute(Update(catalog::StatusChange {
                unit: unit.catalog_ref(),
                status: unit::Status::Booked,
            }))
            .await
            .inspect_err(|e| log_partial_write("catalog", &booking, &done, e))
            .map_err(tracerr::map_from_and_wrap!(=> E))?;
        done.push("catalog");

        let custom_fields =
            seed_fields(&self.config().fields, &booking, &unit, &project);
        let lead = if let Some(lead_id) = booking.lead_id {
            let lead = self
                .external()
                .execute(Select(By::<Option<Lead>, _>::new(lead_id)))
                .await
                .inspect_err(|e| log_partial_write("crm", &booking, &done, e))
                .map_err(tracerr::map_from_and_wrap!(=> E))?
                .ok_or(E::LeadNotExists(lead_id))
                .map_err(tracerr::wrap!())?;
            let pipeline = pipelines
                .pipeline(lead.pipeline_id)
                .unwrap_or(project.pipeline);
            let (pipeline_id, status_id) = booking_status(pipelines, pipeline)
                .ok_or(E::PipelineUnmapped(pipeline))
                .map_err(tracerr::wrap!())?;
            self.external()
                .execute(Update(crm::LeadPatch {
                    id: lead_id,
                    pipeline_id: Some(pipeline_id),
                    status_id: Some(status_id),
                    custom_fields,
                }))
                .await
                .inspect_err(|e| log_partial_write("crm", &booking, &done, e))
                .map_err(tracerr::map_from_and_wrap!(=> E))?;
            Lead {
                pipeline_id,
                status_id,
                ..lead
            }
        } else {
            let (pipeline_id, status_id) =
                booking_status(pipelines, project.pipeline)
                    .ok_or(E::PipelineUnmapped(project.pipeline))
                    .map_err(tracerr::wrap!())?;
            let contacts = tx
                .execute(Select(By::<Option<User>, _>::new(booking.user_id)))
                .await
                .map_err(tracerr::map_from_and_wrap!(=> E))?
                .and_then(|u| u.contact_id)
                .into_iter()
                .collect();
            self.external()
                .execute(Insert(crm::NewLead {
                    name: format!("{}, unit {unit_id}", project.name),
                    pipeline_id,
                    status_id,
                    responsible_user_id: project.responsible_id,
                    contacts,
                    price: unit.price,
                    custom_fields,
                }))
                .await
                .inspect_err(|e| log_partial_write("crm", &booking, &done, e))
                .map_err(tracerr::map_from_and_wrap!(=> E))?
        };
        done.push("crm");

        let Resolved { pipeline, substage } =
            pipelines.resolve(lead.pipeline_id, lead.status_id);
        let mut patch = booking::Patch {
            lead_id: Some(Some(lead.id)),
            status_id: Some(Some(lead.status_id)),
            pipeline: Some(pipeline),
            ..booking::Patch::new(booking_id)
        }
        .with_substage(substage);

        let booked = if attached {
            Ok(())
        } else {
            self.external()
                .execute(Insert(inventory::Deal {
                    unit_id,
                    lead_id: lead.id,
                }))
                .await
                .map_err(tracerr::map_from_and_wrap!(=> E))
                .and_then(|b| {
                    b.is_booked().then_some(()).ok_or_else(|| {
                        tracerr::new!(E::UnitUnavailable(unit_id))
                    })
                })
        };
        if let Err(e) = booked {
            booking.lead_id = Some(lead.id);
            log_partial_write("inventory", &booking, &done, &e);

            // Keep the CRM lead linked, so a retry reuses it.
            tx.execute(Update(patch))
                .await
                .map_err(tracerr::map_from_and_wrap!(=> E))?;
            tx.execute(Commit)
                .await
                .map_err(tracerr::map_from_and_wrap!(=> E))?;
            return Err(e);
        }

        patch.active = Some(true);
        patch.should_be_deactivated_by_timer = Some(true);
        patch.deleted_in_crm = Some(false);
        tx.execute(Update(patch.clone())).await.map_err(|e| {
            if e.as_ref().is_unique_violation(Some(ACTIVE_UNIT_CONSTRAINT)) {
                tracerr::new!(E::UnitUnavailable(unit_id))
            } else {
                tracerr::map_from_and_wrap!(=> E)(e)
            }
        })?;

        unit.status = unit::Status::Booked;
        tx.execute(Insert(unit))
            .await
            .map_err(tracerr::map_from_and_wrap!(=> E))?;

        _ = self
            .schedule_check(&tx, booking_id, booking.expires_at.coerce(), None)
            .await
            .map_err(tracerr::map_from_and_wrap!(=> E))?;

        let note = crm::Note {
            lead_id: lead.id,
            text: format!(
                "Unit {unit_id} is booked by the booking service until {}",
                booking.expires_at.to_dotted_day(),
            ),
        };
        if let Err(e) = self.external().execute(Insert(note)).await {
            log::warn!("failed to add note to `Lead(id: {})`: {e}", lead.id);
        }

        tx.execute(Insert(LogEntry::new(
            booking_id,
            Actor::Activation,
            format!(
                "Unit {unit_id} booked in catalog, CRM lead {} and inventory",
                lead.id,
            ),
        )))
        .await
        .map_err(tracerr::map_from_and_wrap!(=> E))?;

        tx.execute(Commit)
            .await
            .map_err(tracerr::map_from_and_wrap!(=> E))?;

        patch.apply(&mut booking);
        self.events().emit(Event::BookingCreated { booking_id });

        Ok(booking)
    }
}

/// Returns the CRM pipeline and status of a booked lead in the provided
/// [`Pipeline`].
fn booking_status(
    pipelines: &crate::domain::pipeline::Mapping,
    pipeline: Pipeline,
) -> Option<(lead::PipelineId, lead::StatusId)> {
    Some((
        pipelines.pipeline_id(pipeline)?,
        pipelines.status_of(pipeline, Substage::Booking)?,
    ))
}

/// Seeds the CRM lead custom fields describing the provided [`Booking`].
fn seed_fields(
    fields: &lead::Fields,
    booking: &Booking,
    unit: &Unit,
    project: &Project,
) -> lead::CustomFields {
    let text = |v: String| vec![lead::FieldValue::text(v)];

    let mut custom = lead::CustomFields::default();
    custom.insert(fields.city, text(project.city.to_string()));
    custom.insert(fields.unit, text(unit.id.to_string()));
    custom.insert(
        fields.booking_start,
        text(booking.created_at.to_dotted_day()),
    );
    custom.insert(fields.booking_end, text(booking.expires_at.to_dotted_day()));
    if let Some(id) = project.crm_enum {
        custom.insert(fields.project, vec![lead::FieldValue::enumerated(id)]);
    }
    if let Some(id) = fields.unit_kind_enum(unit.kind) {
        custom.insert(fields.unit_kind, vec![lead::FieldValue::enumerated(id)]);
    }
    if let Some(amount) = &booking.payment_amount {
        custom.insert(fields.booking_price, text(amount.to_string()));
    }
    custom
}

/// Error of [`ActivateBooking`] [`Command`] execution.
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

    /// CRM lead with the provided ID does not exist.
    #[display("`Lead(id: {_0})` does not exist in the CRM")]
    #[from(ignore)]
    LeadNotExists(#[error(not(source))] lead::Id),

    /// [`Pipeline`] has no CRM status for a booked lead.
    #[display("`{_0}` pipeline has no CRM status for a booked lead")]
    #[from(ignore)]
    PipelineUnmapped(#[error(not(source))] Pipeline),

    /// [`Project`] with the provided ID does not exist.
    #[display("`Project(id: {_0})` does not exist")]
    #[from(ignore)]
    ProjectNotExists(#[error(not(source))] project::Id),

    /// [`Unit`] with the provided ID does not exist.
    #[display("`Unit(id: {_0})` does not exist")]
    #[from(ignore)]
    UnitNotExists(#[error(not(source))] unit::Id),

    /// [`Booking`] has no [`Unit`] specified.
    #[display("`Booking(id: {_0})` has no unit specified")]
    #[from(ignore)]
    UnitNotSpecified(#[error(not(source))] booking::Id),

    /// [`Unit`] is already booked or sold.
    #[display("`Unit(id: {_0})` is already booked or sold")]
    #[from(ignore)]
    UnitUnavailable(#[error(not(source))] unit::Id),
}

#[cfg(test)]
mod spec {
    use crate::{
        command::DeactivateBooking,
        domain::{
            booking::Substage, lead, unit, Lead, Pipeline,
        },
        event::Event,
        infra::mock,
        Command as _,
    };

    use super::{ActivateBooking, ExecutionError};

    #[tokio::test]
    async fn reserves_unit_everywhere() {
        let (svc, mut queue) = mock::service();
        let unit = mock::seed_unit(&svc, unit::Id::from(100));
        let booking = mock::seed_booking(&svc, unit.id);

        let activated = svc
            .execute(ActivateBooking {
                booking_id: booking.id,
            })
            .await
            .unwrap();

        assert!(activated.active);
        assert!(activated.should_be_deactivated_by_timer);
        assert_eq!(activated.substage, Some(Substage::Booking));
        assert_eq!(activated.pipeline, Some(Pipeline::Tyumen));
        assert_eq!(svc.database().booking(booking.id), activated);
        assert_eq!(svc.database().unit(unit.id).status, unit::Status::Booked);

        let lead_id = activated.lead_id.unwrap();
        {
            let world = svc.external().world();
            assert_eq!(world.created_leads.len(), 1);
            assert_eq!(
                world.leads[&lead_id].status_id,
                svc.config()
                    .pipelines
                    .status_of(Pipeline::Tyumen, Substage::Booking)
                    .unwrap(),
            );
            assert_eq!(
                world.inventory[&unit.id],
                (unit::Status::Booked, Some(lead_id)),
            );
            assert_eq!(
                world.catalog[&unit.catalog_ref()],
                unit::Status::Booked,
            );
            assert_eq!(world.notes.len(), 1);
        }

        let state = svc.database().state();
        assert_eq!(state.checks.len(), 1);
        assert_eq!(state.checks[0].booking_id, booking.id);
        assert_eq!(state.checks[0].fire_at, booking.expires_at.coerce());
        assert_eq!(state.checks[0].fallback, Substage::Unrealized);
        assert_eq!(state.logs.len(), 1);
        drop(state);

        assert_eq!(
            mock::events(&mut queue),
            [Event::BookingCreated {
                booking_id: booking.id
            }],
        );
    }

    #[tokio::test]
    async fn is_idempotent() {
        let (svc, mut queue) = mock::service();
        let unit = mock::seed_unit(&svc, unit::Id::from(100));
        let booking = mock::seed_booking(&svc, unit.id);

        for _ in 0..2 {
            let activated = svc
                .execute(ActivateBooking {
                    booking_id: booking.id,
                })
                .await
                .unwrap();
            assert!(activated.active);
        }

        let world = svc.external().world();
        assert_eq!(world.book_calls, 1);
        assert_eq!(world.created_leads.len(), 1);
        assert_eq!(mock::events(&mut queue).len(), 1);
    }

    #[tokio::test]
    async fn reactivation_keeps_single_check() {
        let (svc, _) = mock::service();
        let unit = mock::seed_unit(&svc, unit::Id::from(100));
        let booking = mock::seed_booking(&svc, unit.id);
        let activate = ActivateBooking {
            booking_id: booking.id,
        };

        _ = svc.execute(activate).await.unwrap();
        _ = svc
            .execute(DeactivateBooking {
                booking_id: booking.id,
                substage: None,
            })
            .await
            .unwrap();
        let activated = svc.execute(activate).await.unwrap();

        assert!(activated.active);
        let state = svc.database().state();
        assert_eq!(state.checks.len(), 1);
        assert_eq!(state.checks[0].booking_id, booking.id);
    }

    #[tokio::test]
    async fn only_one_of_concurrent_activations_wins() {
        let (svc, _) = mock::service();
        let unit = mock::seed_unit(&svc, unit::Id::from(100));
        let first = mock::seed_booking(&svc, unit.id);
        let second = mock::seed_booking(&svc, unit.id);

        let (a, b) = futures::join!(
            svc.execute(ActivateBooking {
                booking_id: first.id
            }),
            svc.execute(ActivateBooking {
                booking_id: second.id
            }),
        );

        let (winner, loser) = match (a, b) {
            (Ok(w), Err(l)) | (Err(l), Ok(w)) => (w, l),
            (a, b) => panic!("expected exactly one winner: {a:?}, {b:?}"),
        };
        assert!(matches!(
            loser.as_ref(),
            ExecutionError::UnitUnavailable(id) if *id == unit.id,
        ));

        let world = svc.external().world();
        assert_eq!(
            world.inventory[&unit.id],
            (unit::Status::Booked, winner.lead_id),
        );
        let state = svc.database().state();
        assert_eq!(state.bookings.values().filter(|b| b.active).count(), 1);
    }

    #[tokio::test]
    async fn inventory_rejection_is_authoritative() {
        let (svc, mut queue) = mock::service();
        let unit = mock::seed_unit(&svc, unit::Id::from(100));
        let mut booking = mock::seed_booking(&svc, unit.id);
        let own_lead = lead::Id::from(6_i64);
        booking.lead_id = Some(own_lead);
        drop(
            svc.database()
                .state()
                .bookings
                .insert(booking.id, booking.clone()),
        );
        {
            let mut world = svc.external().world();
            drop(world.inventory.insert(
                unit.id,
                (unit::Status::Booked, Some(lead::Id::from(5_i64))),
            ));
            drop(world.leads.insert(
                own_lead,
                Lead {
                    id: own_lead,
                    ..Lead::default()
                },
            ));
        }

        let err = svc
            .execute(ActivateBooking {
                booking_id: booking.id,
            })
            .await
            .unwrap_err();

        assert!(matches!(err.as_ref(), ExecutionError::UnitUnavailable(_)));
        let stored = svc.database().booking(booking.id);
        assert!(!stored.active);
        assert!(!stored.should_be_deactivated_by_timer);
        assert_eq!(stored.lead_id, Some(own_lead));
        assert!(svc.database().state().checks.is_empty());
        {
            let world = svc.external().world();
            assert_eq!(world.book_calls, 1);
            assert_eq!(world.catalog[&unit.catalog_ref()], unit::Status::Free);
            assert!(world.lead_updates.is_empty());
            assert_eq!(
                world.inventory[&unit.id],
                (unit::Status::Booked, Some(lead::Id::from(5_i64))),
            );
        }
        assert!(mock::events(&mut queue).is_empty());
    }

    #[tokio::test]
    async fn resumes_activation_attached_in_inventory() {
        let (svc, mut queue) = mock::service();
        let unit = mock::seed_unit(&svc, unit::Id::from(100));
        let mut booking = mock::seed_booking(&svc, unit.id);
        let own_lead = lead::Id::from(6_i64);
        booking.lead_id = Some(own_lead);
        drop(
            svc.database()
                .state()
                .bookings
                .insert(booking.id, booking.clone()),
        );
        {
            let mut world = svc.external().world();
            drop(
                world
                    .inventory
                    .insert(unit.id, (unit::Status::Booked, Some(own_lead))),
            );
            drop(world.leads.insert(
                own_lead,
                Lead {
                    id: own_lead,
                    ..Lead::default()
                },
            ));
        }

        let activated = svc
            .execute(ActivateBooking {
                booking_id: booking.id,
            })
            .await
            .unwrap();

        assert!(activated.active);
        assert_eq!(activated.lead_id, Some(own_lead));
        let world = svc.external().world();
        assert_eq!(world.book_calls, 1);
        assert_eq!(world.catalog[&unit.catalog_ref()], unit::Status::Booked);
        assert_eq!(world.lead_updates.len(), 1);
        assert_eq!(mock::events(&mut queue).len(), 1);
    }

    #[tokio::test]
    async fn sold_unit_is_unavailable() {
        let (svc, _) = mock::service();
        let unit = mock::seed_unit(&svc, unit::Id::from(100));
        let booking = mock::seed_booking(&svc, unit.id);
        drop(
            svc.external()
                .world()
                .inventory
                .insert(unit.id, (unit::Status::Sold, None)),
        );

        let err = svc
            .execute(ActivateBooking {
                booking_id: booking.id,
            })
            .await
            .unwrap_err();

        assert!(matches!(err.as_ref(), ExecutionError::UnitUnavailable(_)));
        let world = svc.external().world();
        assert_eq!(world.catalog[&unit.catalog_ref()], unit::Status::Free);
        assert!(world.created_leads.is_empty());
        assert_eq!(world.book_calls, 0);
    }
}
