//! [`Command`] for checking expiration of a [`Booking`].

use common::{
    operations::{By, Commit, Lock, Select, Transact, Update},
    DateTime,
};
use derive_more::{Display, Error, From};
use tracerr::Traced;
use tracing as log;

use crate::{
    domain::{
        booking::{self, log::Actor, Linkage, Source, Substage},
        Booking,
    },
    infra::{database, Database, Integrations, Transactional},
    Service,
};

use super::{
    deactivate_booking::{self, Release},
    Command,
};

/// [`Command`] for releasing a [`Booking`] whose free reservation is over
/// and unpaid.
#[derive(Clone, Copy, Debug)]
pub struct CheckBookingExpiration {
    /// ID of the [`Booking`] to be checked.
    pub booking_id: booking::Id,

    /// [`Substage`] the CRM lead is moved to on expiration.
    pub fallback: Substage,

    /// Indicator whether the CRM lead is moved to the
    /// [`CheckBookingExpiration::fallback`].
    ///
    /// Once unset, the unit is released in the catalog and the inventory
    /// only, leaving the CRM lead to be synced later.
    pub crm: bool,
}

/// Outcome of a [`CheckBookingExpiration`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Outcome {
    /// [`Booking`] is gone, inactive or not watched by the timer anymore.
    Skipped,

    /// [`Booking`] is paid, so it's not watched by the timer anymore.
    Confirmed,

    /// [`Booking`] was extended and should be checked again at the provided
    /// moment.
    Rescheduled(booking::ExpirationDateTime),

    /// [`Booking`] is released.
    Deactivated,
}

impl<Db, Ext> Command<CheckBookingExpiration> for Service<Db, Ext>
where
    Db: Transactional,
    Ext: Integrations,
{
    type Ok = Outcome;
    type Err = Traced<ExecutionError>;

    async fn execute(
        &self,
        cmd: CheckBookingExpiration,
    ) -> Result<Self::Ok, Self::Err> {
        use ExecutionError as E;

        let CheckBookingExpiration {
            booking_id,
            fallback,
            crm,
        } = cmd;

        let tx = self
            .database()
            .execute(Transact)
            .await
            .map_err(tracerr::map_from_and_wrap!(=> E))?;

        tx.execute(Lock(By::<Booking, _>::new(booking_id)))
            .await
            .map_err(tracerr::map_from_and_wrap!(=> E))?;

        let Some(booking) = tx
            .execute(Select(By::<Option<Booking>, _>::new(booking_id)))
            .await
            .map_err(tracerr::map_from_and_wrap!(=> E))?
        else {
            log::warn!("`Booking(id: {booking_id})` is gone, skipping check");
            return Ok(Outcome::Skipped);
        };

        if !booking.active || !booking.should_be_deactivated_by_timer {
            return Ok(Outcome::Skipped);
        }

        if booking.is_paid() {
            tx.execute(Update(booking::Patch {
                should_be_deactivated_by_timer: Some(false),
                ..booking::Patch::new(booking_id)
            }))
            .await
            .map_err(tracerr::map_from_and_wrap!(=> E))?;
            tx.execute(Commit)
                .await
                .map_err(tracerr::map_from_and_wrap!(=> E))?;
            return Ok(Outcome::Confirmed);
        }

        if booking.expires_at > DateTime::now().coerce() {
            return Ok(Outcome::Rescheduled(booking.expires_at));
        }

        let crm = if booking.source == Source::Lk && !crm {
            log::warn!(
                booking_id = %booking_id,
                lead_id = ?booking.lead_id,
                "releasing expired `Booking` without moving its CRM lead",
            );
            false
        } else {
            booking.source == Source::Lk
        };
        self.release(
            &tx,
            &booking,
            Release {
                substage: crm.then_some(fallback),
                crm,
                unbook: booking.source != Source::FastBooking,
                actor: Actor::Expiration,
            },
        )
        .await
        .map_err(tracerr::map_from_and_wrap!(=> E))?;

        // Fast bookings keep their unit linkage for a later retry.
        if booking.source != Source::FastBooking {
            tx.execute(Update(booking::Patch {
                linkage: Some(Linkage::default()),
                ..booking::Patch::new(booking_id)
            }))
            .await
            .map_err(tracerr::map_from_and_wrap!(=> E))?;
        }

        tx.execute(Commit)
            .await
            .map_err(tracerr::map_from_and_wrap!(=> E))?;

        log::info!(
            booking_id = %booking_id,
            lead_id = ?booking.lead_id,
            "`Booking` expired and released",
        );

        self.notify_agent(&booking, "expired_booking_agent_notification")
            .await;

        Ok(Outcome::Deactivated)
    }
}

/// Error of [`CheckBookingExpiration`] [`Command`] execution.
#[derive(Debug, Display, Error, From)]
pub enum ExecutionError {
    /// [`Database`] error.
    #[display("`Database` operation failed: {_0}")]
    Db(database::Error),

    /// Releasing the unit failed.
    #[display("Failed to release unit: {_0}")]
    Release(deactivate_booking::ExecutionError),
}

#[cfg(test)]
mod spec {
    use std::time::Duration;

    use common::DateTime;

    use crate::{
        domain::{
            booking::{self, PaymentStatus, Source, Substage},
            lead, unit,
        },
        infra::mock,
        Command as _,
    };

    use super::{CheckBookingExpiration, Outcome};

    fn expire(svc: &mock::MockService, id: booking::Id) {
        let mut state = svc.database().state();
        let booking = state.bookings.get_mut(&id).unwrap();
        booking.expires_at =
            (DateTime::now() - Duration::from_secs(1)).coerce();
    }

    #[tokio::test]
    async fn releases_expired_booking_once() {
        let (svc, mut queue) = mock::service();
        let unit = mock::seed_unit(&svc, unit::Id::from(100));
        let booking =
            mock::seed_active_booking(&svc, &unit, lead::Id::from(5_i64));
        expire(&svc, booking.id);

        let check = CheckBookingExpiration {
            booking_id: booking.id,
            fallback: Substage::Unrealized,
            crm: true,
        };
        assert_eq!(svc.execute(check).await.unwrap(), Outcome::Deactivated);

        let stored = svc.database().booking(booking.id);
        assert!(!stored.active);
        assert!(!stored.should_be_deactivated_by_timer);
        assert_eq!(stored.substage, Some(Substage::Unrealized));
        assert_eq!(stored.unit_id, None);
        assert_eq!(svc.database().unit(unit.id).status, unit::Status::Free);
        {
            let world = svc.external().world();
            assert_eq!(world.inventory[&unit.id], (unit::Status::Free, None));
            assert_eq!(
                world.catalog[&unit.catalog_ref()],
                unit::Status::Free,
            );
            assert_eq!(world.lead_updates.len(), 1);
            assert_eq!(world.emails.len(), 1);
            assert_eq!(
                world.emails[0].event,
                "expired_booking_agent_notification",
            );
        }

        assert_eq!(svc.execute(check).await.unwrap(), Outcome::Skipped);
        let world = svc.external().world();
        assert_eq!(world.lead_updates.len(), 1);
        assert_eq!(world.unbook_calls, 1);
        assert_eq!(world.emails.len(), 1);
        assert!(mock::events(&mut queue).is_empty());
    }

    #[tokio::test]
    async fn fast_booking_keeps_unit_linkage() {
        let (svc, _) = mock::service();
        let unit = mock::seed_unit(&svc, unit::Id::from(100));
        let booking =
            mock::seed_active_booking(&svc, &unit, lead::Id::from(5_i64));
        svc.database()
            .state()
            .bookings
            .get_mut(&booking.id)
            .unwrap()
            .source = Source::FastBooking;
        expire(&svc, booking.id);

        let outcome = svc
            .execute(CheckBookingExpiration {
                booking_id: booking.id,
                fallback: Substage::Unrealized,
                crm: true,
            })
            .await
            .unwrap();

        assert_eq!(outcome, Outcome::Deactivated);
        let stored = svc.database().booking(booking.id);
        assert!(!stored.active);
        assert_eq!(stored.unit_id, Some(unit.id));
        let world = svc.external().world();
        assert_eq!(world.unbook_calls, 0);
        assert!(world.lead_updates.is_empty());
    }

    #[tokio::test]
    async fn keeps_crm_substage_of_agent_booking() {
        let (svc, _) = mock::service();
        let unit = mock::seed_unit(&svc, unit::Id::from(100));
        let booking =
            mock::seed_active_booking(&svc, &unit, lead::Id::from(5_i64));
        svc.database()
            .state()
            .bookings
            .get_mut(&booking.id)
            .unwrap()
            .source = Source::AgentAssign;
        expire(&svc, booking.id);

        let outcome = svc
            .execute(CheckBookingExpiration {
                booking_id: booking.id,
                fallback: Substage::Unrealized,
                crm: true,
            })
            .await
            .unwrap();

        assert_eq!(outcome, Outcome::Deactivated);
        let stored = svc.database().booking(booking.id);
        assert!(!stored.active);
        assert_eq!(stored.substage, Some(Substage::Booking));
        assert_eq!(stored.status_id, booking.status_id);
        let world = svc.external().world();
        assert!(world.lead_updates.is_empty());
        assert_eq!(world.unbook_calls, 1);
    }

    #[tokio::test]
    async fn releases_without_crm_when_asked() {
        let (svc, _) = mock::service();
        let unit = mock::seed_unit(&svc, unit::Id::from(100));
        let booking =
            mock::seed_active_booking(&svc, &unit, lead::Id::from(5_i64));
        drop(svc.external().world().leads.remove(&lead::Id::from(5_i64)));
        expire(&svc, booking.id);

        let outcome = svc
            .execute(CheckBookingExpiration {
                booking_id: booking.id,
                fallback: Substage::Unrealized,
                crm: false,
            })
            .await
            .unwrap();

        assert_eq!(outcome, Outcome::Deactivated);
        let stored = svc.database().booking(booking.id);
        assert!(!stored.active);
        assert_eq!(stored.substage, Some(Substage::Booking));
        assert_eq!(svc.database().unit(unit.id).status, unit::Status::Free);
        let world = svc.external().world();
        assert!(world.lead_updates.is_empty());
        assert_eq!(world.inventory[&unit.id], (unit::Status::Free, None));
    }

    #[tokio::test]
    async fn confirms_paid_booking() {
        let (svc, _) = mock::service();
        let unit = mock::seed_unit(&svc, unit::Id::from(100));
        let booking =
            mock::seed_active_booking(&svc, &unit, lead::Id::from(5_i64));
        svc.database()
            .state()
            .bookings
            .get_mut(&booking.id)
            .unwrap()
            .payment_status = PaymentStatus::Payed;
        expire(&svc, booking.id);

        let outcome = svc
            .execute(CheckBookingExpiration {
                booking_id: booking.id,
                fallback: Substage::Unrealized,
                crm: true,
            })
            .await
            .unwrap();

        assert_eq!(outcome, Outcome::Confirmed);
        let stored = svc.database().booking(booking.id);
        assert!(stored.active);
        assert!(!stored.should_be_deactivated_by_timer);
        assert_eq!(svc.external().world().unbook_calls, 0);
    }

    #[tokio::test]
    async fn reschedules_extended_booking() {
        let (svc, _) = mock::service();
        let unit = mock::seed_unit(&svc, unit::Id::from(100));
        let booking =
            mock::seed_active_booking(&svc, &unit, lead::Id::from(5_i64));

        let outcome = svc
            .execute(CheckBookingExpiration {
                booking_id: booking.id,
                fallback: Substage::Unrealized,
                crm: true,
            })
            .await
            .unwrap();

        assert_eq!(outcome, Outcome::Rescheduled(booking.expires_at));
        assert!(svc.database().booking(booking.id).active);
    }

    #[tokio::test]
    async fn skips_missing_booking() {
        let (svc, _) = mock::service();

        let outcome = svc
            .execute(CheckBookingExpiration {
                booking_id: booking::Id::new(),
                fallback: Substage::Unrealized,
                crm: true,
            })
            .await
            .unwrap();

        assert_eq!(outcome, Outcome::Skipped);
    }
}
