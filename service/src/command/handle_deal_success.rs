//! [`Command`] for handling a contract signed in the CRM.

use common::operations::{Commit, Insert, Transact, Update};
use derive_more::{Display, Error, From};
use tracerr::Traced;
use tracing as log;

use crate::{
    domain::{
        booking::{self, log::Actor, purchase, LogEntry},
        lead, webhook,
    },
    event::Event,
    infra::{database, Database, Transactional},
    Service,
};

use super::Command;

/// [`Command`] for marking the contract of a [`Booking`] as signed.
///
/// [`Booking`]: crate::domain::Booking
#[derive(Clone, Copy, Debug)]
pub struct HandleDealSuccess {
    /// ID of the CRM lead.
    pub lead_id: lead::Id,
}

impl<Db, Ext> Command<HandleDealSuccess> for Service<Db, Ext>
where
    Db: Transactional,
{
    type Ok = webhook::Outcome;
    type Err = Traced<ExecutionError>;

    async fn execute(
        &self,
        cmd: HandleDealSuccess,
    ) -> Result<Self::Ok, Self::Err> {
        let HandleDealSuccess { lead_id } = cmd;

        let tx = self
            .database()
            .execute(Transact)
            .await
            .map_err(tracerr::map_from_and_wrap!(=> ExecutionError))?;

        let Some(booking) = Self::locked_booking_of(&tx, lead_id)
            .await
            .map_err(tracerr::map_from_and_wrap!(=> ExecutionError))?
        else {
            log::info!("no `Booking` of `Lead(id: {lead_id})`");
            return Ok(webhook::Outcome::NotFound);
        };

        let step = booking.purchase_step();
        if step != Some(purchase::Step::AmocrmSigning) {
            log::info!(
                "`Booking(id: {})` is at `{step:?}` purchase step, so \
                 contract signing is ignored",
                booking.id,
            );
            return Ok(webhook::Outcome::Ignored);
        }

        tx.execute(Update(booking::Patch {
            purchase: Some(purchase::Purchase {
                signed: true,
                ..booking.purchase
            }),
            ..booking::Patch::new(booking.id)
        }))
        .await
        .map_err(tracerr::map_from_and_wrap!(=> ExecutionError))?;

        tx.execute(Insert(LogEntry::new(
            booking.id,
            Actor::Webhook,
            "Contract signed",
        )))
        .await
        .map_err(tracerr::map_from_and_wrap!(=> ExecutionError))?;

        tx.execute(Commit)
            .await
            .map_err(tracerr::map_from_and_wrap!(=> ExecutionError))?;

        self.events().emit(Event::AcceptContract {
            booking_id: booking.id,
        });

        Ok(webhook::Outcome::Handled)
    }
}

/// Error of [`HandleDealSuccess`] [`Command`] execution.
#[derive(Debug, Display, Error, From)]
pub enum ExecutionError {
    /// [`Database`] error.
    #[display("`Database` operation failed: {_0}")]
    Db(database::Error),
}

#[cfg(test)]
mod spec {
    use common::DateTime;

    use crate::{
        domain::{
            booking::{PaymentStatus, Purchase},
            lead, unit, webhook,
        },
        event::Event,
        infra::mock,
        Command as _,
    };

    use super::HandleDealSuccess;

    #[tokio::test]
    async fn signs_contract_at_signing_step_only() {
        let (svc, mut queue) = mock::service();
        let unit = mock::seed_unit(&svc, unit::Id::from(100));
        let booking =
            mock::seed_active_booking(&svc, &unit, lead::Id::from(5_i64));
        svc.database()
            .state()
            .bookings
            .get_mut(&booking.id)
            .unwrap()
            .payment_status = PaymentStatus::Payed;
        let cmd = HandleDealSuccess {
            lead_id: lead::Id::from(5_i64),
        };

        assert_eq!(svc.execute(cmd).await.unwrap(), webhook::Outcome::Ignored);
        assert!(!svc.database().booking(booking.id).purchase.signed);

        svc.database()
            .state()
            .bookings
            .get_mut(&booking.id)
            .unwrap()
            .purchase = Purchase {
            escrow_uploaded: true,
            signing_date: Some(DateTime::now().coerce()),
            ..Purchase::default()
        };

        assert_eq!(svc.execute(cmd).await.unwrap(), webhook::Outcome::Handled);
        assert!(svc.database().booking(booking.id).purchase.signed);
        assert_eq!(svc.execute(cmd).await.unwrap(), webhook::Outcome::Ignored);
        assert_eq!(
            mock::events(&mut queue),
            [Event::AcceptContract {
                booking_id: booking.id,
            }],
        );
    }
}
