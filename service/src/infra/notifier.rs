//! [`Notifier`] adapter definitions.

use std::sync::Arc;

use common::operations::Insert;
use derive_more::{Display, Error as StdError, From};
use secrecy::{ExposeSecret as _, SecretString};
use serde::Serialize;
use tracerr::Traced;

use crate::{
    domain::user,
    infra::http::{self, Retry},
};

/// Notification operation.
pub use common::Handler as Notifier;

/// Email to be sent by the mail service.
///
/// Content is rendered by the mail service out of the template identified by
/// the [`Email::event`].
#[derive(Clone, Debug, Serialize)]
pub struct Email {
    /// Recipients of the email.
    pub recipients: Vec<user::Email>,

    /// Slug of the mail event selecting the template.
    pub event: &'static str,

    /// Template context.
    pub context: serde_json::Value,
}

/// [`Mailer`] configuration.
#[derive(Clone, Debug)]
pub struct Config {
    /// URL of the mail service endpoint.
    pub url: String,

    /// Access token of the mail service.
    pub token: SecretString,

    /// [`Retry`] policy of requests.
    pub retry: Retry,
}

/// Mail service client.
#[derive(Clone, Debug)]
pub struct Mailer {
    /// HTTP client.
    http: reqwest::Client,

    /// [`Config`] of this client.
    config: Arc<Config>,
}

impl Mailer {
    /// Creates a new [`Mailer`] client with the provided [`Config`].
    #[must_use]
    pub fn new(http: reqwest::Client, config: Config) -> Self {
        Self {
            http,
            config: Arc::new(config),
        }
    }
}

impl Notifier<Insert<Email>> for Mailer {
    type Ok = ();
    type Err = Traced<Error>;

    async fn execute(
        &self,
        Insert(email): Insert<Email>,
    ) -> Result<Self::Ok, Self::Err> {
        let url = http::url(&self.config.url, "/");
        let resp = self
            .config
            .retry
            .send("send_email", || {
                self.http
                    .post(&url)
                    .bearer_auth(self.config.token.expose_secret())
                    .json(&email)
            })
            .await
            .map_err(tracerr::from_and_wrap!())?;
        let status = resp.status();
        if !status.is_success() {
            return Err(tracerr::new!(Error::Status(status.as_u16())));
        }
        Ok(())
    }
}

/// [`Notifier`] error.
#[derive(Debug, Display, StdError, From)]
pub enum Error {
    /// HTTP request failed.
    #[display("Mail service request failed: {_0}")]
    Request(reqwest::Error),

    /// Mail service responded with an unsuccessful status.
    #[display("Mail service responded with `{_0}`")]
    #[from(ignore)]
    Status(#[error(not(source))] u16),
}

#[cfg(test)]
mod spec {
    use std::time::Duration;

    use common::operations::Insert;
    use secrecy::SecretString;
    use serde_json::json;
    use wiremock::{
        matchers::{body_partial_json, header, method},
        Mock, MockServer, ResponseTemplate,
    };

    use crate::{domain::user, infra::http::Retry};

    use super::{Config, Email, Mailer, Notifier as _};

    #[tokio::test]
    async fn sends_email() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(header("authorization", "Bearer token"))
            .and(body_partial_json(json!({
                "recipients": ["agent@example.com"],
                "event": "expired_booking_agent_notification",
            })))
            .respond_with(ResponseTemplate::new(202))
            .expect(1)
            .mount(&server)
            .await;
        let mailer = Mailer::new(
            reqwest::Client::new(),
            Config {
                url: server.uri(),
                token: SecretString::from("token"),
                retry: Retry {
                    attempts: 1,
                    backoff: Duration::from_millis(1),
                },
            },
        );

        mailer
            .execute(Insert(Email {
                recipients: vec![user::Email::new("agent@example.com").unwrap()],
                event: "expired_booking_agent_notification",
                context: json!({ "booking_id": 1 }),
            }))
            .await
            .unwrap();
    }
}
