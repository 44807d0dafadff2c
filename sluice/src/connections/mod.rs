//! Dialect-agnostic connections to sources and destinations.
//!
//! Every database family the engine can talk to is normalized behind the
//! [`DialectAdapter`] trait: a parameterized query, a raw query for DDL the
//! builder cannot parameterize, and a streaming query for extraction. Adapters
//! are created by a [`Connect`] implementation and cached per connection
//! fingerprint by the [`PoolRegistry`].

mod bigquery;
mod mysql;
mod pool;
mod postgres;
mod snowflake;

pub use bigquery::BigQueryAdapter;
pub use mysql::MySqlAdapter;
pub use pool::PoolRegistry;
pub use postgres::PostgresAdapter;
pub use snowflake::SnowflakeAdapter;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{ErrorKind, SluiceResult};
use crate::sluice_error;
use crate::types::{Row, RowStream, Statement};

/// Database engine families the engine knows how to address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineType {
    Postgres,
    CockroachDb,
    Redshift,
    MySql,
    MariaDb,
    MsSql,
    Snowflake,
    BigQuery,
}

/// Driver families, each backed by one adapter implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineFamily {
    Postgres,
    MySql,
    Snowflake,
    BigQuery,
    /// Engines that are recognized but have no adapter yet.
    Unsupported,
}

impl EngineType {
    /// Returns the driver family this engine belongs to.
    pub fn family(&self) -> EngineFamily {
        match self {
            EngineType::Postgres | EngineType::CockroachDb | EngineType::Redshift => {
                EngineFamily::Postgres
            }
            EngineType::MySql | EngineType::MariaDb => EngineFamily::MySql,
            EngineType::Snowflake => EngineFamily::Snowflake,
            EngineType::BigQuery => EngineFamily::BigQuery,
            EngineType::MsSql => EngineFamily::Unsupported,
        }
    }

    pub fn as_static_str(&self) -> &'static str {
        match self {
            EngineType::Postgres => "postgres",
            EngineType::CockroachDb => "cockroachdb",
            EngineType::Redshift => "redshift",
            EngineType::MySql => "mysql",
            EngineType::MariaDb => "mariadb",
            EngineType::MsSql => "mssql",
            EngineType::Snowflake => "snowflake",
            EngineType::BigQuery => "bigquery",
        }
    }

    /// Parses the persisted textual form.
    pub fn parse(value: &str) -> SluiceResult<Self> {
        match value {
            "postgres" => Ok(EngineType::Postgres),
            "cockroachdb" => Ok(EngineType::CockroachDb),
            "redshift" => Ok(EngineType::Redshift),
            "mysql" => Ok(EngineType::MySql),
            "mariadb" => Ok(EngineType::MariaDb),
            "mssql" => Ok(EngineType::MsSql),
            "snowflake" => Ok(EngineType::Snowflake),
            "bigquery" => Ok(EngineType::BigQuery),
            other => Err(sluice_error!(
                ErrorKind::NotImplemented,
                "Unknown database engine",
                other
            )),
        }
    }
}

impl fmt::Display for EngineType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_static_str())
    }
}

/// Connection parameters for one source or destination.
///
/// BigQuery uses a service-account JSON credential instead of host, port and
/// password; warehouse and schema only apply to warehouse destinations.
#[derive(Debug, Clone)]
pub struct ConnectionParams {
    pub engine: EngineType,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub username: String,
    pub password: Option<SecretString>,
    pub database: String,
    pub schema: Option<String>,
    pub warehouse: Option<String>,
    pub service_account: Option<String>,
}

impl ConnectionParams {
    /// Computes the stable pooling fingerprint for these parameters.
    ///
    /// The hash covers (host, port, user, password, database, engine) in a
    /// fixed order, so identical inputs always produce the identical cache key
    /// and any single parameter change produces a different key.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.host.as_deref().unwrap_or_default());
        hasher.update("|");
        hasher.update(self.port.map(|port| port.to_string()).unwrap_or_default());
        hasher.update("|");
        hasher.update(&self.username);
        hasher.update("|");
        hasher.update(
            self.password
                .as_ref()
                .map(|password| password.expose_secret().as_str())
                .unwrap_or_default(),
        );
        hasher.update("|");
        hasher.update(&self.database);
        hasher.update("|");
        hasher.update(self.engine.as_static_str());

        hex::encode(hasher.finalize())
    }
}

/// One database family's query surface, normalized behind a single interface.
#[async_trait]
pub trait DialectAdapter: Send + Sync {
    /// Runs a parameterized statement and returns all rows.
    async fn query(&self, statement: &Statement) -> SluiceResult<Vec<Row>>;

    /// Runs a fully rendered SQL string.
    ///
    /// Reserved for engine-specific DDL/DCL the builder cannot parameterize
    /// (stage creation, COPY with credentials). Callers are responsible for
    /// safe interpolation: identifiers pre-quoted, no user-controlled raw
    /// text.
    async fn query_unsafe(&self, sql: &str) -> SluiceResult<Vec<Row>>;

    /// Opens a parameterized statement as a lazy row stream.
    ///
    /// The stream is finite and not restartable. The underlying connection is
    /// released back to the pool only after the stream is fully drained or
    /// dropped.
    async fn query_stream(&self, statement: &Statement) -> SluiceResult<RowStream>;
}

/// Factory turning connection parameters into a live adapter.
///
/// The production implementation is [`EngineConnector`]; tests substitute a
/// counting fake to observe pool behavior.
#[async_trait]
pub trait Connect: Send + Sync {
    async fn connect(&self, params: &ConnectionParams) -> SluiceResult<Arc<dyn DialectAdapter>>;
}

/// Default [`Connect`] implementation dispatching on the engine family.
pub struct EngineConnector;

#[async_trait]
impl Connect for EngineConnector {
    async fn connect(&self, params: &ConnectionParams) -> SluiceResult<Arc<dyn DialectAdapter>> {
        match params.engine.family() {
            EngineFamily::Postgres => {
                let adapter = PostgresAdapter::connect(params).await?;
                Ok(Arc::new(adapter))
            }
            EngineFamily::MySql => {
                let adapter = MySqlAdapter::connect(params).await?;
                Ok(Arc::new(adapter))
            }
            EngineFamily::Snowflake => {
                let adapter = SnowflakeAdapter::connect(params).await?;
                Ok(Arc::new(adapter))
            }
            EngineFamily::BigQuery => {
                let adapter = BigQueryAdapter::connect(params).await?;
                Ok(Arc::new(adapter))
            }
            EngineFamily::Unsupported => Err(sluice_error!(
                ErrorKind::NotImplemented,
                "Database engine has not yet been implemented",
                params.engine
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> ConnectionParams {
        ConnectionParams {
            engine: EngineType::Postgres,
            host: Some("localhost".to_string()),
            port: Some(5432),
            username: "app".to_string(),
            password: Some(SecretString::new("hunter2".to_string())),
            database: "orders".to_string(),
            schema: None,
            warehouse: None,
            service_account: None,
        }
    }

    #[test]
    fn fingerprint_is_deterministic() {
        assert_eq!(params().fingerprint(), params().fingerprint());
    }

    #[test]
    fn fingerprint_changes_with_any_parameter() {
        let base = params().fingerprint();

        let mut changed = params();
        changed.port = Some(5433);
        assert_ne!(base, changed.fingerprint());

        let mut changed = params();
        changed.database = "billing".to_string();
        assert_ne!(base, changed.fingerprint());

        let mut changed = params();
        changed.engine = EngineType::Redshift;
        assert_ne!(base, changed.fingerprint());

        let mut changed = params();
        changed.password = Some(SecretString::new("other".to_string()));
        assert_ne!(base, changed.fingerprint());
    }

    #[test]
    fn fingerprint_distinguishes_absent_fields() {
        let mut no_password = params();
        no_password.password = None;
        assert_ne!(params().fingerprint(), no_password.fingerprint());
    }

    #[test]
    fn engine_families_are_exhaustive() {
        assert_eq!(EngineType::CockroachDb.family(), EngineFamily::Postgres);
        assert_eq!(EngineType::Redshift.family(), EngineFamily::Postgres);
        assert_eq!(EngineType::MariaDb.family(), EngineFamily::MySql);
        assert_eq!(EngineType::MsSql.family(), EngineFamily::Unsupported);
    }
}
