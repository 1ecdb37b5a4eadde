//! [`Command`] for handling agent data validated in the CRM.

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
    infra::{database, Database, Transactional},
    Service,
};

use super::Command;

/// [`Command`] for granting access to the deal of a [`Booking`] once the
/// CRM validated the agent data.
///
/// [`Booking`]: crate::domain::Booking
#[derive(Clone, Copy, Debug)]
pub struct HandleAccessDeal {
    /// ID of the CRM lead.
    pub lead_id: lead::Id,
}

impl<Db, Ext> Command<HandleAccessDeal> for Service<Db, Ext>
where
    Db: Transactional,
{
    type Ok = webhook::Outcome;
    type Err = Traced<ExecutionError>;

    async fn execute(
        &self,
        cmd: HandleAccessDeal,
    ) -> Result<Self::Ok, Self::Err> {
        let HandleAccessDeal { lead_id } = cmd;

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
        if step != Some(purchase::Step::AmocrmAgentDataValidation) {
            log::info!(
                "`Booking(id: {})` is at `{step:?}` purchase step, so agent \
                 data validation is ignored",
                booking.id,
            );
            return Ok(webhook::Outcome::Ignored);
        }

        tx.execute(Update(booking::Patch {
            purchase: Some(purchase::Purchase {
                agent_data_validated: true,
                ..booking.purchase
            }),
            ..booking::Patch::new(booking.id)
        }))
        .await
        .map_err(tracerr::map_from_and_wrap!(=> ExecutionError))?;

        tx.execute(Insert(LogEntry::new(
            booking.id,
            Actor::Webhook,
            "Agent data validated, access to the deal granted",
        )))
        .await
        .map_err(tracerr::map_from_and_wrap!(=> ExecutionError))?;

        tx.execute(Commit)
            .await
            .map_err(tracerr::map_from_and_wrap!(=> ExecutionError))?;

        self.events().emit(Event::ChangeStatus {
            booking_id: booking.id,
            substage: booking.substage.unwrap_or(Substage::Unknown),
        });

        Ok(webhook::Outcome::Handled)
    }
}

/// Error of [`HandleAccessDeal`] [`Command`] execution.
#[derive(Debug, Display, Error, From)]
pub enum ExecutionError {
    /// [`Database`] error.
    #[display("`Database` operation failed: {_0}")]
    Db(database::Error),
}
