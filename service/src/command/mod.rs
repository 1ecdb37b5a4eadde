//! [`Command`] definition.

pub mod activate_booking;
pub mod check_booking_expiration;
pub mod deactivate_booking;
pub mod extend_booking;
pub mod handle_access_deal;
pub mod handle_deal_success;
pub mod handle_lead_status;
pub mod handle_payment_callback;
pub mod handle_signing_date;
pub mod ingest_webhook;
pub mod schedule_expiration_check;

use std::fmt;

use common::operations::{By, Insert, Lock, Select};
use secrecy::{ExposeSecret as _, SecretString};
use serde_json::json;
use tracerr::Traced;
use tracing as log;

use crate::{
    domain::{lead, Booking, Pipeline, Project, User},
    infra::{database, notifier, Database, Integrations, Store},
    Service,
};

/// [`Command`] of the [`Service`].
///
/// [`Service`]: crate::Service
pub use common::Handler as Command;

pub use self::{
    activate_booking::ActivateBooking,
    check_booking_expiration::CheckBookingExpiration,
    deactivate_booking::DeactivateBooking, extend_booking::ExtendBooking,
    handle_access_deal::HandleAccessDeal,
    handle_deal_success::HandleDealSuccess,
    handle_lead_status::HandleLeadStatus,
    handle_payment_callback::HandlePaymentCallback,
    handle_signing_date::HandleSigningDate, ingest_webhook::IngestWebhook,
    schedule_expiration_check::ScheduleExpirationCheck,
};

/// Compares the provided secrets in constant time.
fn secrets_match(provided: &str, expected: &SecretString) -> bool {
    constant_time_eq::constant_time_eq(
        provided.as_bytes(),
        expected.expose_secret().as_bytes(),
    )
}

/// Logs a multi-system write of the provided [`Booking`] that stopped at the
/// given `step` after completing the `done` ones.
fn log_partial_write(
    step: &str,
    booking: &Booking,
    done: &[&str],
    err: &dyn fmt::Display,
) {
    log::error!(
        booking_id = %booking.id,
        lead_id = ?booking.lead_id,
        unit_id = ?booking.unit_id,
        "partial write of `Booking`: `{step}` step failed after {done:?}: \
         {err}",
    );
}

impl<Db, Ext> Service<Db, Ext> {
    /// Locks and returns the [`Booking`] of the provided CRM lead, if any.
    pub(crate) async fn locked_booking_of<Tx: Store>(
        tx: &Tx,
        lead_id: lead::Id,
    ) -> Result<Option<Booking>, Traced<database::Error>> {
        let Some(found) = tx
            .execute(Select(By::<Option<Booking>, _>::new(lead_id)))
            .await
            .map_err(tracerr::wrap!())?
        else {
            return Ok(None);
        };

        tx.execute(Lock(By::<Booking, _>::new(found.id)))
            .await
            .map_err(tracerr::wrap!())?;

        // Re-read, since the `Booking` might change before being locked.
        Ok(tx
            .execute(Select(By::<Option<Booking>, _>::new(found.id)))
            .await
            .map_err(tracerr::wrap!())?
            .filter(|b| b.lead_id == Some(lead_id)))
    }

    /// Returns the [`Pipeline`] the CRM lead of the provided [`Booking`]
    /// belongs to, falling back to the one of its [`Project`].
    async fn pipeline_of<Tx: Store>(
        tx: &Tx,
        booking: &Booking,
    ) -> Result<Option<Pipeline>, Traced<database::Error>> {
        if booking.pipeline.is_some() {
            return Ok(booking.pipeline);
        }
        let Some(project_id) = booking.project_id else {
            return Ok(None);
        };
        Ok(tx
            .execute(Select(By::<Option<Project>, _>::new(project_id)))
            .await
            .map_err(tracerr::wrap!())?
            .map(|p| p.pipeline))
    }
}

impl<Db, Ext> Service<Db, Ext>
where
    Db: Store,
    Ext: Integrations,
{
    /// Notifies the agent assigned to the provided [`Booking`], if any, with
    /// an email of the provided mail `event`.
    ///
    /// Failures are logged and never propagated.
    async fn notify_agent(&self, booking: &Booking, event: &'static str) {
        let Some(agent_id) = booking.agent_id else {
            return;
        };
        let agent = match self
            .database()
            .execute(Select(By::<Option<User>, _>::new(agent_id)))
            .await
        {
            Ok(agent) => agent,
            Err(e) => {
                log::error!("failed to load `User(id: {agent_id})`: {e}");
                return;
            }
        };
        let Some(email) = agent.and_then(|a| a.email) else {
            log::info!(
                "`User(id: {agent_id})` has no email, so `{event}` is not \
                 sent",
            );
            return;
        };

        let email = notifier::Email {
            recipients: vec![email],
            event,
            context: json!({
                "booking_id": booking.id,
                "lead_id": booking.lead_id,
                "unit_id": booking.unit_id,
                "expires_at": booking.expires_at.to_rfc3339(),
            }),
        };
        if let Err(e) = self.external().execute(Insert(email)).await {
            log::error!(
                booking_id = %booking.id,
                "failed to send `{event}` email: {e}",
            );
        }
    }
}

#[cfg(test)]
mod spec {
    use secrecy::SecretString;

    use super::secrets_match;

    #[test]
    fn compares_secrets() {
        let secret = SecretString::from("secret");

        assert!(secrets_match("secret", &secret));
        assert!(!secrets_match("secreT", &secret));
        assert!(!secrets_match("", &secret));
    }
}
