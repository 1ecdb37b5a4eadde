//! [`Command`] for ingesting a CRM webhook.

use common::{
    operations::{By, Commit, Insert, Lock, Select, Transact, Update},
    DateTime,
};
use derive_more::{Debug, Display, Error, From};
use tracerr::Traced;
use tracing as log;

use crate::{
    domain::webhook::{self, Event},
    infra::{database, Database, Integrations, Transactional},
    read, Service,
};

use super::{
    handle_access_deal, handle_deal_success, handle_lead_status,
    handle_signing_date, secrets_match, Command, HandleAccessDeal,
    HandleDealSuccess, HandleLeadStatus, HandleSigningDate,
};

/// [`Command`] for storing a raw CRM webhook and dispatching it to its
/// handler.
#[derive(Clone, Debug)]
pub struct IngestWebhook {
    /// [`webhook::Category`] of the webhook.
    pub category: webhook::Category,

    /// Secret the webhook carries.
    #[debug(skip)]
    pub secret: String,

    /// Raw body of the webhook.
    pub body: String,
}

impl<Db, Ext> Command<IngestWebhook> for Service<Db, Ext>
where
    Db: Transactional,
    Ext: Integrations,
{
    type Ok = webhook::Outcome;
    type Err = Traced<ExecutionError>;

    async fn execute(&self, cmd: IngestWebhook) -> Result<Self::Ok, Self::Err> {
        use ExecutionError as E;

        let IngestWebhook {
            category,
            secret,
            body,
        } = cmd;

        if !secrets_match(&secret, &self.config().webhook_secret) {
            return Err(tracerr::new!(E::InvalidSecret));
        }

        let mut request = webhook::Request::new(category, body);
        let tx = self
            .database()
            .execute(Transact)
            .await
            .map_err(tracerr::map_from_and_wrap!(=> E))?;

        // Claim the `Subject`, so concurrent redeliveries see each other.
        if let Some(subject) = &request.subject {
            tx.execute(Lock(By::<webhook::Request, _>::new(subject.clone())))
                .await
                .map_err(tracerr::map_from_and_wrap!(=> E))?;
        }
        tx.execute(Insert(request.clone()))
            .await
            .map_err(tracerr::map_from_and_wrap!(=> E))?;

        let latest = if let Some(subject) = request.subject.clone() {
            tx.execute(Select(By::<Option<webhook::Request>, _>::new(
                read::webhook::Latest {
                    subject,
                    since: (DateTime::now()
                        - self.config().webhook_dedup_window)
                        .coerce(),
                    except: request.id,
                },
            )))
            .await
            .map_err(tracerr::map_from_and_wrap!(=> E))?
        } else {
            None
        };
        let redelivered = latest.as_ref().filter(|prev| {
            prev.hash == request.hash && prev.outcome != webhook::Outcome::Failed
        });
        if let Some(prev) = redelivered {
            log::info!(
                "`{category}` webhook `{}` is a redelivery of `{}`",
                request.id,
                prev.id,
            );
            request.outcome = webhook::Outcome::Duplicate;
            tx.execute(Update(request.clone()))
                .await
                .map_err(tracerr::map_from_and_wrap!(=> E))?;
        }
        tx.execute(Commit)
            .await
            .map_err(tracerr::map_from_and_wrap!(=> E))?;
        if request.outcome == webhook::Outcome::Duplicate {
            return Ok(request.outcome);
        }

        request.outcome = match request.parse() {
            Ok(event) => self.dispatch(event).await,
            Err(e) => {
                log::warn!(
                    "`{category}` webhook `{}` is malformed: {e}",
                    request.id,
                );
                webhook::Outcome::Malformed
            }
        };

        self.database()
            .execute(Update(request.clone()))
            .await
            .map_err(tracerr::map_from_and_wrap!(=> E))?;

        Ok(request.outcome)
    }
}

impl<Db, Ext> Service<Db, Ext>
where
    Db: Transactional,
    Ext: Integrations,
{
    /// Dispatches the provided webhook [`Event`] to its handler.
    ///
    /// Handler errors are logged and reported as
    /// [`webhook::Outcome::Failed`].
    async fn dispatch(&self, event: Event) -> webhook::Outcome {
        match event {
            Event::LeadStatusChanged(changes) => {
                let mut outcomes = Vec::with_capacity(changes.len());
                for change in changes {
                    let outcome = self
                        .execute(HandleLeadStatus {
                            lead_id: change.lead_id,
                            status_id: change.status_id,
                            pipeline_id: change.pipeline_id,
                        })
                        .await
                        .map_err(tracerr::map_from_and_wrap!(=> HandlingError));
                    outcomes.push(or_failed(outcome));
                }
                combine(&outcomes)
            }
            Event::SigningDateSet { lead_id, date } => or_failed(
                self.execute(HandleSigningDate { lead_id, date })
                    .await
                    .map_err(tracerr::map_from_and_wrap!(=> HandlingError)),
            ),
            Event::DealSucceeded { lead_id } => or_failed(
                self.execute(HandleDealSuccess { lead_id })
                    .await
                    .map_err(tracerr::map_from_and_wrap!(=> HandlingError)),
            ),
            Event::AccessDealGranted { lead_id } => or_failed(
                self.execute(HandleAccessDeal { lead_id })
                    .await
                    .map_err(tracerr::map_from_and_wrap!(=> HandlingError)),
            ),
        }
    }
}

/// Unwraps the provided handler result, logging its error.
fn or_failed(
    res: Result<webhook::Outcome, Traced<HandlingError>>,
) -> webhook::Outcome {
    res.unwrap_or_else(|e| {
        log::error!("failed to handle webhook: {e}");
        webhook::Outcome::Failed
    })
}

/// Combines the provided per-lead outcomes of a single webhook.
fn combine(outcomes: &[webhook::Outcome]) -> webhook::Outcome {
    use webhook::Outcome as O;

    if outcomes.contains(&O::Failed) {
        O::Failed
    } else if outcomes.contains(&O::Handled) {
        O::Handled
    } else if outcomes.iter().all(|o| *o == O::NotFound) {
        O::NotFound
    } else {
        O::Ignored
    }
}

/// Error of [`IngestWebhook`] [`Command`] execution.
#[derive(Debug, Display, Error, From)]
pub enum ExecutionError {
    /// [`Database`] error.
    #[display("`Database` operation failed: {_0}")]
    Db(database::Error),

    /// Webhook carries a wrong secret.
    #[display("Webhook secret mismatch")]
    #[from(ignore)]
    InvalidSecret,
}

/// Error of a webhook handler.
#[derive(Debug, Display, Error, From)]
enum HandlingError {
    /// [`HandleAccessDeal`] error.
    AccessDeal(handle_access_deal::ExecutionError),

    /// [`HandleDealSuccess`] error.
    DealSuccess(handle_deal_success::ExecutionError),

    /// [`HandleLeadStatus`] error.
    LeadStatus(handle_lead_status::ExecutionError),

    /// [`HandleSigningDate`] error.
    SigningDate(handle_signing_date::ExecutionError),
}
