//! [`Command`] for extending a [`Booking`].

use common::{
    operations::{By, Commit, Insert, Lock, Select, Transact, Update},
    DateTime,
};
use derive_more::{Display, Error, From};
use tracerr::Traced;
use tracing as log;

use crate::{
    domain::{
        booking::{self, log::Actor, LogEntry},
        lead, Booking,
    },
    event::Event,
    infra::{crm, database, Database, Integrations, Transactional},
    Service,
};

use super::Command;

/// [`Command`] for extending the free reservation of a [`Booking`].
///
/// The pending expiration check notices the new expiration moment once
/// fired and re-schedules itself.
#[derive(Clone, Copy, Debug)]
pub struct ExtendBooking {
    /// ID of the [`Booking`] to be extended.
    pub booking_id: booking::Id,
}

impl<Db, Ext> Command<ExtendBooking> for Service<Db, Ext>
where
    Db: Transactional,
    Ext: Integrations,
{
    type Ok = Booking;
    type Err = Traced<ExecutionError>;

    async fn execute(&self, cmd: ExtendBooking) -> Result<Self::Ok, Self::Err> {
        use ExecutionError as E;

        let ExtendBooking { booking_id } = cmd;

        let tx = self
            .database()
            .execute(Transact)
            .await
            .map_err(tracerr::map_from_and_wrap!(=> E))?;

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
            return Err(tracerr::new!(E::NotActive(booking_id)));
        }
        if booking.is_paid() {
            return Err(tracerr::new!(E::AlreadyPaid(booking_id)));
        }
        let max = self.config().max_extensions;
        if booking.extensions >= max {
            return Err(tracerr::new!(E::ExtensionsExhausted(max)));
        }

        let expires_at = booking.expires_at.max(DateTime::now().coerce())
            + self.config().free_booking_period;
        let patch = booking::Patch {
            extensions: Some(booking.extensions + 1),
            expires_at: Some(expires_at),
            ..booking::Patch::new(booking_id)
        };
        tx.execute(Update(patch.clone()))
            .await
            .map_err(tracerr::map_from_and_wrap!(=> E))?;

        if let Some(lead_id) = booking.lead_id {
            let mut custom_fields = lead::CustomFields::default();
            custom_fields.insert(
                self.config().fields.booking_end,
                vec![lead::FieldValue::text(expires_at.to_dotted_day())],
            );
            self.external()
                .execute(Update(crm::LeadPatch {
                    id: lead_id,
                    pipeline_id: None,
                    status_id: None,
                    custom_fields,
                }))
                .await
                .inspect_err(|e| {
                    log::error!(
                        booking_id = %booking_id,
                        "failed to push booking end to `Lead(id: {lead_id})`: \
                         {e}",
                    );
                })
                .map_err(tracerr::map_from_and_wrap!(=> E))?;
        }

        tx.execute(Insert(LogEntry::new(
            booking_id,
            Actor::Activation,
            format!(
                "Booking extended until {} ({} of {max})",
                expires_at.to_rfc3339(),
                booking.extensions + 1,
            ),
        )))
        .await
        .map_err(tracerr::map_from_and_wrap!(=> E))?;

        tx.execute(Commit)
            .await
            .map_err(tracerr::map_from_and_wrap!(=> E))?;

        patch.apply(&mut booking);
        self.events().emit(Event::ExtendFreeBooking {
            booking_id,
            expires_at,
        });

        Ok(booking)
    }
}

/// Error of [`ExtendBooking`] [`Command`] execution.
#[derive(Debug, Display, Error, From)]
pub enum ExecutionError {
    /// [`Booking`] is already paid.
    #[display("`Booking(id: {_0})` is already paid")]
    #[from(ignore)]
    AlreadyPaid(#[error(not(source))] booking::Id),

    /// [`Booking`] with the provided ID does not exist.
    #[display("`Booking(id: {_0})` does not exist")]
    #[from(ignore)]
    BookingNotExists(#[error(not(source))] booking::Id),

    /// CRM error.
    #[display("CRM operation failed: {_0}")]
    Crm(crm::Error),

    /// [`Database`] error.
    #[display("`Database` operation failed: {_0}")]
    Db(database::Error),

    /// [`Booking`] was extended the maximum number of times.
    #[display("`Booking` cannot be extended more than {_0} times")]
    #[from(ignore)]
    ExtensionsExhausted(#[error(not(source))] u8),

    /// [`Booking`] is not active.
    #[display("`Booking(id: {_0})` is not active")]
    #[from(ignore)]
    NotActive(#[error(not(source))] booking::Id),
}

#[cfg(test)]
mod spec {
    use crate::{
        domain::{booking::PaymentStatus, lead, unit},
        event::Event,
        infra::mock,
        Command as _,
    };

    use super::{ExecutionError, ExtendBooking};

    #[tokio::test]
    async fn pushes_expiration_forward() {
        let (svc, mut queue) = mock::service();
        let unit = mock::seed_unit(&svc, unit::Id::from(100));
        let booking =
            mock::seed_active_booking(&svc, &unit, lead::Id::from(5_i64));

        let extended = svc
            .execute(ExtendBooking {
                booking_id: booking.id,
            })
            .await
            .unwrap();

        assert_eq!(extended.extensions, 1);
        assert_eq!(
            extended.expires_at,
            booking.expires_at + svc.config().free_booking_period,
        );
        assert_eq!(svc.database().booking(booking.id), extended);
        assert!(svc.database().state().checks.is_empty());
        {
            let world = svc.external().world();
            assert_eq!(world.lead_updates.len(), 1);
            assert_eq!(
                world.lead_updates[0]
                    .custom_fields
                    .value(svc.config().fields.booking_end),
                Some(extended.expires_at.to_dotted_day().as_str()),
            );
        }
        assert_eq!(
            mock::events(&mut queue),
            [Event::ExtendFreeBooking {
                booking_id: booking.id,
                expires_at: extended.expires_at,
            }],
        );
    }

    #[tokio::test]
    async fn is_bounded() {
        let (svc, _) = mock::service();
        let unit = mock::seed_unit(&svc, unit::Id::from(100));
        let booking =
            mock::seed_active_booking(&svc, &unit, lead::Id::from(5_i64));

        for _ in 0..svc.config().max_extensions {
            _ = svc
                .execute(ExtendBooking {
                    booking_id: booking.id,
                })
                .await
                .unwrap();
        }
        let err = svc
            .execute(ExtendBooking {
                booking_id: booking.id,
            })
            .await
            .unwrap_err();

        assert!(matches!(
            err.as_ref(),
            ExecutionError::ExtensionsExhausted(2),
        ));
    }

    #[tokio::test]
    async fn rejects_paid_and_inactive_bookings() {
        let (svc, _) = mock::service();
        let unit = mock::seed_unit(&svc, unit::Id::from(100));
        let inactive = mock::seed_booking(&svc, unit.id);
        let paid =
            mock::seed_active_booking(&svc, &unit, lead::Id::from(5_i64));
        svc.database()
            .state()
            .bookings
            .get_mut(&paid.id)
            .unwrap()
            .payment_status = PaymentStatus::Payed;

        let err = svc
            .execute(ExtendBooking {
                booking_id: inactive.id,
            })
            .await
            .unwrap_err();
        assert!(matches!(err.as_ref(), ExecutionError::NotActive(_)));

        let err = svc
            .execute(ExtendBooking {
                booking_id: paid.id,
            })
            .await
            .unwrap_err();
        assert!(matches!(err.as_ref(), ExecutionError::AlreadyPaid(_)));
    }
}
