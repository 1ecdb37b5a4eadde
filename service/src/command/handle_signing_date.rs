//! [`Command`] for handling a contract signing day set in the CRM.

use std::time::Duration;

use common::operations::{Commit, Insert, Transact, Update};
use derive_more::{Display, Error, From};
use tracerr::Traced;
use tracing as log;

use crate::{
    domain::{
        booking::{self, log::Actor, purchase, LogEntry, Substage},
        lead, webhook,
    },
    event::Event,
    infra::{crm, database, Database, Integrations, Transactional},
    Service,
};

use super::Command;

/// [`Command`] for storing the contract signing day of a [`Booking`] set in
/// the CRM.
///
/// [`Booking`]: crate::domain::Booking
#[derive(Clone, Copy, Debug)]
pub struct HandleSigningDate {
    /// ID of the CRM lead.
    pub lead_id: lead::Id,

    /// Contract signing day.
    pub date: purchase::SigningDateTime,
}

impl<Db, Ext> Command<HandleSigningDate> for Service<Db, Ext>
where
    Db: Transactional,
    Ext: Integrations,
{
    type Ok = webhook::Outcome;
    type Err = Traced<ExecutionError>;

    async fn execute(
        &self,
        cmd: HandleSigningDate,
    ) -> Result<Self::Ok, Self::Err> {
        use ExecutionError as E;

        let HandleSigningDate { lead_id, date } = cmd;

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

        let step = booking.purchase_step();
        if !matches!(
            step,
            Some(
                purchase::Step::EscrowUpload
                    | purchase::Step::AmocrmSigningDate,
            ),
        ) {
            log::info!(
                "`Booking(id: {})` is at `{step:?}` purchase step, so \
                 signing day is ignored",
                booking.id,
            );
            return Ok(webhook::Outcome::Ignored);
        }
        if booking.purchase.signing_date == Some(date) {
            return Ok(webhook::Outcome::Ignored);
        }

        let patch = booking::Patch {
            purchase: Some(purchase::Purchase {
                signing_date: Some(date),
                ..booking.purchase
            }),
            ..booking::Patch::new(booking.id)
        };
        tx.execute(Update(patch.clone()))
            .await
            .map_err(tracerr::map_from_and_wrap!(=> E))?;

        _ = self
            .external()
            .execute(Insert(crm::NewTask {
                lead_id,
                text: format!(
                    "Contract signing is appointed on {}",
                    date.to_dotted_day(),
                ),
                // Due by the end of the signing day.
                complete_till: (date + Duration::from_secs(24 * 60 * 60 - 1))
                    .coerce(),
                responsible_user_id: None,
            }))
            .await
            .map_err(tracerr::map_from_and_wrap!(=> E))?;

        tx.execute(Insert(LogEntry::new(
            booking.id,
            Actor::Webhook,
            format!("Contract signing day set to {}", date.to_dotted_day()),
        )))
        .await
        .map_err(tracerr::map_from_and_wrap!(=> E))?;

        tx.execute(Commit)
            .await
            .map_err(tracerr::map_from_and_wrap!(=> E))?;

        patch.apply(&mut booking);
        self.events().emit(Event::ChangeStatus {
            booking_id: booking.id,
            substage: booking.substage.unwrap_or(Substage::Unknown),
        });

        Ok(webhook::Outcome::Handled)
    }
}

/// Error of [`HandleSigningDate`] [`Command`] execution.
#[derive(Debug, Display, Error, From)]
pub enum ExecutionError {
    /// CRM error.
    #[display("CRM operation failed: {_0}")]
    Crm(crm::Error),

    /// [`Database`] error.
    #[display("`Database` operation failed: {_0}")]
    Db(database::Error),
}

#[cfg(test)]
mod spec {
    use common::DateTimeOf;

    use crate::{
        domain::{
            booking::{PaymentStatus, Purchase},
            lead, unit, webhook, Booking,
        },
        infra::mock,
        Command as _,
    };

    use super::HandleSigningDate;

    fn seed(svc: &mock::MockService, purchase: Purchase) -> Booking {
        let unit = mock::seed_unit(svc, unit::Id::from(100));
        let booking =
            mock::seed_active_booking(svc, &unit, lead::Id::from(5_i64));
        let mut state = svc.database().state();
        let stored = state.bookings.get_mut(&booking.id).unwrap();
        stored.payment_status = PaymentStatus::Payed;
        stored.purchase = purchase;
        stored.clone()
    }

    #[tokio::test]
    async fn stores_signing_day_once() {
        let (svc, mut queue) = mock::service();
        let booking = seed(
            &svc,
            Purchase {
                ddu_accepted: true,
                ..Purchase::default()
            },
        );
        let cmd = HandleSigningDate {
            lead_id: lead::Id::from(5_i64),
            date: DateTimeOf::from_calendar_day(2026, 11, 3).unwrap(),
        };

        assert_eq!(svc.execute(cmd).await.unwrap(), webhook::Outcome::Handled);
        assert_eq!(svc.execute(cmd).await.unwrap(), webhook::Outcome::Ignored);

        let stored = svc.database().booking(booking.id);
        assert_eq!(stored.purchase.signing_date, Some(cmd.date));
        let world = svc.external().world();
        assert_eq!(world.tasks.len(), 1);
        assert_eq!(world.tasks[0].lead_id, cmd.lead_id);
        assert_eq!(mock::events(&mut queue).len(), 1);
    }

    #[tokio::test]
    async fn ignores_wrong_purchase_step() {
        let (svc, mut queue) = mock::service();
        let booking = seed(&svc, Purchase::default());

        let outcome = svc
            .execute(HandleSigningDate {
                lead_id: lead::Id::from(5_i64),
                date: DateTimeOf::from_calendar_day(2026, 11, 3).unwrap(),
            })
            .await
            .unwrap();

        assert_eq!(outcome, webhook::Outcome::Ignored);
        assert_eq!(svc.database().booking(booking.id).purchase.signing_date, None);
        assert!(svc.external().world().tasks.is_empty());
        assert!(mock::events(&mut queue).is_empty());
    }
}
