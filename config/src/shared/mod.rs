//! Settings shared by the api and worker binaries.

use secrecy::ExposeSecret;
use serde::Deserialize;
use sqlx::postgres::PgConnectOptions;

use crate::{Environment, SerializableSecretString};

/// Top-level settings, layered from `configuration/base.yaml`, the
/// environment overlay and `APP__`-prefixed env vars.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub database: DatabaseConfig,
    pub object_store: ObjectStoreConfig,
    pub api: ApiConfig,
    pub worker: WorkerConfig,
}

/// Connection settings for the application database.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub name: String,
    pub username: String,
    pub password: Option<SerializableSecretString>,
}

impl DatabaseConfig {
    /// Returns sqlx connect options for the application database.
    pub fn connect_options(&self) -> PgConnectOptions {
        let mut options = PgConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .username(&self.username)
            .database(&self.name);
        if let Some(password) = &self.password {
            options = options.password(password.expose_secret());
        }

        options
    }
}

/// Location and credentials of the provisioned staging/delivery bucket.
///
/// The same key pair is embedded into warehouse `COPY`/`CREATE STAGE`
/// statements, so it must be readable by the destinations.
#[derive(Debug, Clone, Deserialize)]
pub struct ObjectStoreConfig {
    pub bucket: String,
    pub region: String,
    pub access_key_id: String,
    pub secret_access_key: SerializableSecretString,
    pub kms_key_id: String,
}

/// Bind address of the HTTP API.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
}

/// Transfer worker pacing.
#[derive(Debug, Clone, Deserialize)]
pub struct WorkerConfig {
    /// Idle sleep between queue polls when no transfer is claimable.
    pub poll_interval_ms: u64,
}

/// Loads [`Settings`] from the `configuration/` directory next to the
/// process working directory.
pub fn load_settings() -> Result<Settings, rust_cli_config::ConfigError> {
    let base_path = std::env::current_dir().map_err(|err| {
        rust_cli_config::ConfigError::Message(format!("could not determine current dir: {err}"))
    })?;
    let configuration_dir = base_path.join("configuration");

    let environment = Environment::load().map_err(|err| {
        rust_cli_config::ConfigError::Message(format!("could not load environment: {err}"))
    })?;
    let environment_file = format!("{environment}.yaml");

    let settings = rust_cli_config::Config::builder()
        .add_source(rust_cli_config::File::from(configuration_dir.join("base.yaml")))
        .add_source(rust_cli_config::File::from(
            configuration_dir.join(environment_file),
        ))
        .add_source(
            rust_cli_config::Environment::with_prefix("APP")
                .prefix_separator("__")
                .separator("__"),
        )
        .build()?;

    settings.try_deserialize::<Settings>()
}
