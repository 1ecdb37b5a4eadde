//! Shared HTTP plumbing of external system adapters.

use std::time;

use reqwest::{RequestBuilder, Response};
use tracing as log;

/// Retry policy of an adapter.
#[derive(Clone, Copy, Debug)]
pub struct Retry {
    /// Maximum number of attempts per request.
    pub attempts: u8,

    /// Delay between attempts.
    pub backoff: time::Duration,
}

impl Default for Retry {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff: time::Duration::from_millis(500),
        }
    }
}

impl Retry {
    /// Sends the request built by the provided `make` closure, retrying it on
    /// connection errors, timeouts and `5xx` responses.
    ///
    /// The last response is returned as is, even if it's a `5xx` one.
    ///
    /// # Errors
    ///
    /// If the last attempt failed to be sent.
    pub async fn send<F>(&self, name: &str, make: F) -> reqwest::Result<Response>
    where
        F: Fn() -> RequestBuilder,
    {
        let attempts = self.attempts.max(1);
        let mut attempt = 1;
        loop {
            let res = make().send().await;
            let transient = match &res {
                Ok(resp) => resp.status().is_server_error(),
                Err(e) => e.is_connect() || e.is_timeout(),
            };
            if !transient || attempt >= attempts {
                return res;
            }

            match &res {
                Ok(resp) => log::warn!(
                    "`{name}` responded with `{}`, retrying \
                     ({attempt}/{attempts})",
                    resp.status(),
                ),
                Err(e) => log::warn!(
                    "`{name}` request failed: {e}, retrying \
                     ({attempt}/{attempts})",
                ),
            }
            attempt += 1;
            tokio::time::sleep(self.backoff).await;
        }
    }
}

/// Joins the provided base URL and path.
pub(crate) fn url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/'),
    )
}

#[cfg(test)]
mod spec {
    use std::time::Duration;

    use wiremock::{
        matchers::{method, path},
        Mock, MockServer, ResponseTemplate,
    };

    use super::{url, Retry};

    #[test]
    fn joins_urls() {
        assert_eq!(url("http://a/", "/b"), "http://a/b");
        assert_eq!(url("http://a", "b/c"), "http://a/b/c");
    }

    #[tokio::test]
    async fn retries_server_errors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/flaky"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/flaky"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let retry = Retry {
            attempts: 3,
            backoff: Duration::from_millis(1),
        };
        let client = reqwest::Client::new();
        let resp = retry
            .send("flaky", || client.get(url(&server.uri(), "/flaky")))
            .await
            .unwrap();

        assert_eq!(resp.status().as_u16(), 200);
    }

    #[tokio::test]
    async fn gives_up_after_attempts() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .expect(2)
            .mount(&server)
            .await;

        let retry = Retry {
            attempts: 2,
            backoff: Duration::from_millis(1),
        };
        let client = reqwest::Client::new();
        let resp = retry
            .send("down", || client.get(url(&server.uri(), "/down")))
            .await
            .unwrap();

        assert_eq!(resp.status().as_u16(), 500);
    }

    #[tokio::test]
    async fn does_not_retry_client_errors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let resp = Retry::default()
            .send("missing", || client.get(url(&server.uri(), "/missing")))
            .await
            .unwrap();

        assert_eq!(resp.status().as_u16(), 404);
    }
}
