//! [`Config`]-related definitions.

use std::time;

use config::{builder::DefaultState, ConfigBuilder, ConfigError};
use secrecy::SecretString;
use serde::Deserialize;
use service::{
    domain::{booking::Substage, lead, pipeline},
    infra,
    task::{fire_expiration_checks, reconcile_bookings},
};
use smart_default::SmartDefault;

/// Application configuration.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct Config {
    /// Server configuration.
    pub server: Server,

    /// Service configuration.
    pub service: Service,

    /// Postgres configuration.
    pub postgres: Postgres,

    /// Log configuration.
    pub log: Log,

    /// CRM configuration.
    pub crm: Crm,

    /// Inventory configuration.
    pub inventory: Inventory,

    /// Catalog configuration.
    pub catalog: Catalog,

    /// Payment gateway configuration.
    pub payment: Payment,

    /// Notifier configuration.
    pub notifier: Notifier,
}

impl Config {
    /// Creates a new [`Config`] by:
    /// - loading it from the provided `path` (if any);
    /// - merging it with the environment variables (if any);
    /// - using default values for missing fields.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn new(path: impl AsRef<str>) -> Result<Self, ConfigError> {
        ConfigBuilder::<DefaultState>::default()
            .add_source(config::File::with_name(path.as_ref()).required(false))
            .add_source(config::Environment::with_prefix("CONF").separator("."))
            .build()?
            .try_deserialize()
    }
}

/// Server configuration.
#[derive(Clone, Debug, Deserialize, SmartDefault)]
#[serde(default)]
pub struct Server {
    /// Host to bind the server to.
    #[default("0.0.0.0".to_owned())]
    pub host: String,

    /// Port to bind the server to.
    #[default(8080)]
    pub port: u16,

    /// Bearer token the internal booking API callers authenticate with.
    #[default(SecretString::from("secret"))]
    pub api_token: SecretString,
}

/// Service configuration.
#[derive(Clone, Debug, Deserialize, SmartDefault)]
#[serde(default)]
pub struct Service {
    /// Period a free booking is extended by.
    #[default(time::Duration::from_secs(30 * 60))]
    #[serde(with = "humantime_serde")]
    pub free_booking_period: time::Duration,

    /// Period a paid booking holds its unit for.
    #[default(time::Duration::from_secs(7 * 24 * 60 * 60))]
    #[serde(with = "humantime_serde")]
    pub paid_booking_period: time::Duration,

    /// Maximum number of times a free booking may be extended.
    #[default(1)]
    pub max_extensions: u8,

    /// Substage an expired booking's lead is moved to.
    #[default(Substage::Unrealized)]
    pub expiration_fallback: Substage,

    /// Secret CRM webhooks must carry.
    #[default(SecretString::from("secret"))]
    pub webhook_secret: SecretString,

    /// Window identical CRM webhooks are considered duplicates within.
    #[default(time::Duration::from_secs(60))]
    #[serde(with = "humantime_serde")]
    pub webhook_dedup_window: time::Duration,

    /// Secret payment gateway callbacks must carry.
    #[default(SecretString::from("secret"))]
    pub payment_secret: SecretString,

    /// Service tasks configuration.
    pub tasks: Tasks,
}

/// Service tasks configuration.
#[derive(Clone, Copy, Debug, Default, Deserialize)]
#[serde(default)]
pub struct Tasks {
    /// `ReconcileBookings` task configuration.
    pub reconcile_bookings: ReconcileBookings,

    /// `FireExpirationChecks` task configuration.
    pub fire_expiration_checks: FireExpirationChecks,
}

/// `ReconcileBookings` task configuration.
#[derive(Clone, Copy, Debug, Deserialize, SmartDefault)]
#[serde(default)]
pub struct ReconcileBookings {
    /// Task execution interval.
    #[default(time::Duration::from_secs(10 * 60))]
    #[serde(with = "humantime_serde")]
    pub interval: time::Duration,

    /// Number of CRM leads fetched at once.
    #[default(250)]
    pub batch_size: usize,
}

impl From<ReconcileBookings> for reconcile_bookings::Config {
    fn from(value: ReconcileBookings) -> Self {
        let ReconcileBookings {
            interval,
            batch_size,
        } = value;
        Self {
            interval,
            batch_size,
        }
    }
}

/// `FireExpirationChecks` task configuration.
#[derive(Clone, Copy, Debug, Deserialize, SmartDefault)]
#[serde(default)]
pub struct FireExpirationChecks {
    /// Task execution interval.
    #[default(time::Duration::from_secs(10))]
    #[serde(with = "humantime_serde")]
    pub interval: time::Duration,

    /// Maximum number of checks fired per execution.
    #[default(100)]
    pub limit: usize,

    /// Number of failed attempts after which a check releases the unit
    /// without moving the CRM lead.
    #[default(5)]
    pub max_attempts: u8,

    /// Delay before a failed check is retried.
    #[default(time::Duration::from_secs(60))]
    #[serde(with = "humantime_serde")]
    pub retry_after: time::Duration,
}

impl From<FireExpirationChecks> for fire_expiration_checks::Config {
    fn from(value: FireExpirationChecks) -> Self {
        let FireExpirationChecks {
            interval,
            limit,
            max_attempts,
            retry_after,
        } = value;
        Self {
            interval,
            limit,
            max_attempts,
            retry_after,
        }
    }
}

impl Service {
    /// Converts this [`Service`] configuration into a [`service::Config`]
    /// using the provided CRM tables.
    ///
    /// # Errors
    ///
    /// If two CRM pipelines claim the same status.
    pub fn into_service_config(
        self,
        crm: &Crm,
    ) -> Result<service::Config, pipeline::ConflictError> {
        let Self {
            free_booking_period,
            paid_booking_period,
            max_extensions,
            expiration_fallback,
            webhook_secret,
            webhook_dedup_window,
            payment_secret,
            tasks:
                Tasks {
                    reconcile_bookings,
                    fire_expiration_checks,
                },
        } = self;
        Ok(service::Config {
            pipelines: pipeline::Mapping::new(&crm.pipelines)?,
            fields: crm.fields.clone(),
            free_booking_period,
            paid_booking_period,
            max_extensions,
            expiration_fallback,
            webhook_secret,
            webhook_dedup_window,
            payment_secret,
            reconcile_bookings: reconcile_bookings.into(),
            fire_expiration_checks: fire_expiration_checks.into(),
        })
    }
}

/// Retry policy of an external system adapter.
#[derive(Clone, Copy, Debug, Deserialize, SmartDefault)]
#[serde(default)]
pub struct Retry {
    /// Maximum number of attempts per request.
    #[default(3)]
    pub attempts: u8,

    /// Delay between attempts.
    #[default(time::Duration::from_millis(500))]
    #[serde(with = "humantime_serde")]
    pub backoff: time::Duration,
}

impl From<Retry> for infra::http::Retry {
    fn from(value: Retry) -> Self {
        let Retry { attempts, backoff } = value;
        Self { attempts, backoff }
    }
}

/// CRM configuration.
#[derive(Clone, Debug, Deserialize, SmartDefault)]
#[serde(default)]
pub struct Crm {
    /// Base URL of the CRM API.
    #[default("https://example.amocrm.ru".to_owned())]
    pub base_url: String,

    /// OAuth client ID.
    pub client_id: String,

    /// OAuth client secret.
    pub client_secret: SecretString,

    /// OAuth redirect URI.
    pub redirect_uri: String,

    /// Initial OAuth access token.
    pub access_token: SecretString,

    /// Initial OAuth refresh token.
    pub refresh_token: SecretString,

    /// Maximum number of leads fetched by a single request.
    #[default(250)]
    pub batch_limit: usize,

    /// Retry policy.
    pub retry: Retry,

    /// IDs of the lead custom fields.
    pub fields: lead::Fields,

    /// Pipelines and their statuses.
    pub pipelines: pipeline::Table,
}

impl From<Crm> for infra::crm::Config {
    fn from(value: Crm) -> Self {
        let Crm {
            base_url,
            client_id,
            client_secret,
            redirect_uri,
            access_token,
            refresh_token,
            batch_limit,
            retry,
            fields: _,
            pipelines: _,
        } = value;
        Self {
            base_url,
            client_id,
            client_secret,
            redirect_uri,
            access_token,
            refresh_token,
            batch_limit,
            retry: retry.into(),
        }
    }
}

/// Inventory configuration.
#[derive(Clone, Debug, Deserialize, SmartDefault)]
#[serde(default)]
pub struct Inventory {
    /// Base URL of the inventory API.
    #[default("https://example.profitbase.ru/api/v4/json".to_owned())]
    pub base_url: String,

    /// API key to authenticate with.
    pub api_key: SecretString,

    /// Retry policy.
    pub retry: Retry,
}

impl From<Inventory> for infra::inventory::Config {
    fn from(value: Inventory) -> Self {
        let Inventory {
            base_url,
            api_key,
            retry,
        } = value;
        Self {
            base_url,
            api_key,
            retry: retry.into(),
        }
    }
}

/// Catalog configuration.
#[derive(Clone, Debug, Deserialize, SmartDefault)]
#[serde(default)]
pub struct Catalog {
    /// URL of the catalog GraphQL API.
    #[default("https://backend.example.com/graphql/".to_owned())]
    pub url: String,

    /// Login to authenticate with.
    pub login: String,

    /// Password to authenticate with.
    pub password: SecretString,

    /// Retry policy.
    pub retry: Retry,
}

impl From<Catalog> for infra::catalog::Config {
    fn from(value: Catalog) -> Self {
        let Catalog {
            url,
            login,
            password,
            retry,
        } = value;
        Self {
            url,
            login,
            password,
            retry: retry.into(),
        }
    }
}

/// Payment gateway configuration.
#[derive(Clone, Debug, Deserialize, SmartDefault)]
#[serde(default)]
pub struct Payment {
    /// Base URL of the payment gateway API.
    #[default("https://securepayments.sberbank.ru/payment/rest".to_owned())]
    pub base_url: String,

    /// Username to authenticate with.
    pub username: String,

    /// Password to authenticate with.
    pub password: SecretString,

    /// Retry policy.
    pub retry: Retry,
}

impl From<Payment> for infra::payment::Config {
    fn from(value: Payment) -> Self {
        let Payment {
            base_url,
            username,
            password,
            retry,
        } = value;
        Self {
            base_url,
            username,
            password,
            retry: retry.into(),
        }
    }
}

/// Notifier configuration.
#[derive(Clone, Debug, Deserialize, SmartDefault)]
#[serde(default)]
pub struct Notifier {
    /// URL of the mail service endpoint.
    #[default("http://127.0.0.1:8025/send".to_owned())]
    pub url: String,

    /// Token to authenticate with.
    pub token: SecretString,

    /// Retry policy.
    pub retry: Retry,
}

impl From<Notifier> for infra::notifier::Config {
    fn from(value: Notifier) -> Self {
        let Notifier { url, token, retry } = value;
        Self {
            url,
            token,
            retry: retry.into(),
        }
    }
}

/// Postgres configuration.
#[derive(Clone, Debug, Deserialize, SmartDefault)]
#[serde(default)]
pub struct Postgres {
    /// Host to connect to.
    #[default("127.0.0.1".to_owned())]
    pub host: String,

    /// Port to connect to.
    #[default(5432)]
    pub port: u16,

    /// User to connect as.
    #[default("postgres".to_owned())]
    pub user: String,

    /// Password to connect with.
    #[default("postgres".to_owned())]
    pub password: String,

    /// Database name to connect to.
    #[default("postgres".to_owned())]
    pub dbname: String,
}

impl From<Postgres> for infra::postgres::Config {
    fn from(value: Postgres) -> Self {
        let Postgres {
            host,
            port,
            user,
            password,
            dbname,
        } = value;

        Self {
            host: Some(host),
            port: Some(port),
            user: Some(user),
            password: Some(password),
            dbname: Some(dbname),
            ..Self::default()
        }
    }
}

/// Log configuration.
#[derive(Clone, Copy, Debug, Default, Deserialize)]
#[serde(default)]
pub struct Log {
    /// Log level.
    pub level: LogLevel,
}

/// Log level.
#[derive(Clone, Copy, Debug, Default, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LogLevel {
    /// Designates very low priority, often extremely verbose, information.
    Trace,

    /// Designates lower priority information.
    Debug,

    /// Designates useful information.
    #[default]
    Info,

    /// Designates hazardous situations.
    Warn,

    /// Designates very serious errors.
    Error,
}

impl From<LogLevel> for tracing::Level {
    fn from(value: LogLevel) -> Self {
        match value {
            LogLevel::Trace => Self::TRACE,
            LogLevel::Debug => Self::DEBUG,
            LogLevel::Info => Self::INFO,
            LogLevel::Warn => Self::WARN,
            LogLevel::Error => Self::ERROR,
        }
    }
}

#[cfg(test)]
mod spec {
    use std::time;

    use secrecy::ExposeSecret as _;
    use service::domain::booking::Substage;

    use super::{Config, Service};

    #[test]
    fn defaults_build_service_config() {
        let config = Config::default();

        let service = config
            .service
            .clone()
            .into_service_config(&config.crm)
            .unwrap();

        assert_eq!(service.free_booking_period, time::Duration::from_secs(1800));
        assert_eq!(service.expiration_fallback, Substage::Unrealized);
        assert_eq!(service.pipelines.version(), config.crm.pipelines.version);
        assert_eq!(service.fields, config.crm.fields);
    }

    #[test]
    fn loads_overrides_from_file() {
        let dir = std::env::temp_dir().join(format!(
            "booking-config-{}",
            uuid::Uuid::new_v4(),
        ));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");
        std::fs::write(
            &path,
            r#"
            [server]
            port = 9090
            api_token = "internal"

            [service]
            free_booking_period = "1h"
            max_extensions = 3
            expiration_fallback = "TERMINATION"

            [service.tasks.fire_expiration_checks]
            retry_after = "5m"
            "#,
        )
        .unwrap();

        let config = Config::new(path.to_str().unwrap()).unwrap();

        assert_eq!(config.server.port, 9090);
        assert_eq!(config.server.api_token.expose_secret(), "internal");
        let Service {
            free_booking_period,
            max_extensions,
            expiration_fallback,
            tasks,
            ..
        } = config.service;
        assert_eq!(free_booking_period, time::Duration::from_secs(3600));
        assert_eq!(max_extensions, 3);
        assert_eq!(expiration_fallback, Substage::Termination);
        assert_eq!(
            tasks.fire_expiration_checks.retry_after,
            time::Duration::from_secs(300),
        );
        assert_eq!(tasks.fire_expiration_checks.max_attempts, 5);
    }
}
