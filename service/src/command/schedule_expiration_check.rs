//! [`Command`] for scheduling an expiration [`Check`].

use common::operations::{By, Insert, Select};
use derive_more::{Display, Error, From};
use tracerr::Traced;

use crate::{
    domain::{
        booking::{self, Substage},
        expiration::{self, Check},
        Booking,
    },
    infra::{database, Database, Store},
    Service,
};

use super::Command;

/// [`Command`] for scheduling a deferred expiration [`Check`] of a
/// [`Booking`].
#[derive(Clone, Copy, Debug)]
pub struct ScheduleExpirationCheck {
    /// ID of the [`Booking`] to be checked.
    pub booking_id: booking::Id,

    /// Moment the [`Check`] fires at.
    pub fire_at: expiration::FireDateTime,

    /// [`Substage`] the CRM lead is moved to on expiration.
    ///
    /// The configured one is used if [`None`].
    pub fallback: Option<Substage>,
}

impl<Db, Ext> Command<ScheduleExpirationCheck> for Service<Db, Ext>
where
    Db: Store,
{
    type Ok = Check;
    type Err = Traced<ExecutionError>;

    async fn execute(
        &self,
        cmd: ScheduleExpirationCheck,
    ) -> Result<Self::Ok, Self::Err> {
        use ExecutionError as E;

        let ScheduleExpirationCheck {
            booking_id,
            fire_at,
            fallback,
        } = cmd;

        _ = self
            .database()
            .execute(Select(By::<Option<Booking>, _>::new(booking_id)))
            .await
            .map_err(tracerr::map_from_and_wrap!(=> E))?
            .ok_or(E::BookingNotExists(booking_id))
            .map_err(tracerr::wrap!())?;

        self.schedule_check(self.database(), booking_id, fire_at, fallback)
            .await
            .map_err(tracerr::map_from_and_wrap!(=> E))
    }
}

impl<Db, Ext> Service<Db, Ext> {
    /// Stores a new expiration [`Check`] of the provided [`Booking`] via the
    /// provided transaction, replacing its pending one, if any.
    pub(crate) async fn schedule_check<Tx: Store>(
        &self,
        tx: &Tx,
        booking_id: booking::Id,
        fire_at: expiration::FireDateTime,
        fallback: Option<Substage>,
    ) -> Result<Check, Traced<database::Error>> {
        let check = Check::new(
            booking_id,
            fire_at,
            fallback.unwrap_or(self.config().expiration_fallback),
        );
        tx.execute(Insert(check)).await.map_err(tracerr::wrap!())?;
        Ok(check)
    }
}

/// Error of [`ScheduleExpirationCheck`] [`Command`] execution.
#[derive(Debug, Display, Error, From)]
pub enum ExecutionError {
    /// [`Booking`] with the provided ID does not exist.
    #[display("`Booking(id: {_0})` does not exist")]
    #[from(ignore)]
    BookingNotExists(#[error(not(source))] booking::Id),

    /// [`Database`] error.
    #[display("`Database` operation failed: {_0}")]
    Db(database::Error),
}

#[cfg(test)]
mod spec {
    use std::time::Duration;

    use common::DateTime;

    use crate::{
        domain::{
            booking::{self, Substage},
            unit,
        },
        infra::mock,
        Command as _,
    };

    use super::{ExecutionError, ScheduleExpirationCheck};

    #[tokio::test]
    async fn stores_check_with_configured_fallback() {
        let (svc, _) = mock::service();
        let booking = mock::seed_booking(&svc, unit::Id::from(100));
        let fire_at = DateTime::now().coerce();

        let check = svc
            .execute(ScheduleExpirationCheck {
                booking_id: booking.id,
                fire_at,
                fallback: None,
            })
            .await
            .unwrap();

        assert_eq!(check.fallback, Substage::Unrealized);
        assert_eq!(check.attempts, 0);
        assert_eq!(svc.database().state().checks, [check]);
    }

    #[tokio::test]
    async fn replaces_pending_check() {
        let (svc, _) = mock::service();
        let booking = mock::seed_booking(&svc, unit::Id::from(100));
        let first = DateTime::now().coerce();
        let later = (DateTime::now() + Duration::from_secs(60)).coerce();

        for (fire_at, fallback) in
            [(first, None), (later, Some(Substage::MakeDecision))]
        {
            _ = svc
                .execute(ScheduleExpirationCheck {
                    booking_id: booking.id,
                    fire_at,
                    fallback,
                })
                .await
                .unwrap();
        }

        let checks = svc.database().state().checks.clone();
        assert_eq!(checks.len(), 1);
        assert_eq!(checks[0].fire_at, later);
        assert_eq!(checks[0].fallback, Substage::MakeDecision);
    }

    #[tokio::test]
    async fn rejects_unknown_booking() {
        let (svc, _) = mock::service();

        let err = svc
            .execute(ScheduleExpirationCheck {
                booking_id: booking::Id::new(),
                fire_at: DateTime::now().coerce(),
                fallback: Some(Substage::MakeDecision),
            })
            .await
            .unwrap_err();

        assert!(matches!(err.as_ref(), ExecutionError::BookingNotExists(_)));
        assert!(svc.database().state().checks.is_empty());
    }
}
