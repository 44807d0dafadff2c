//! Error types and result definitions for replication operations.
//!
//! Provides a single error type with classification and captured diagnostic
//! metadata. [`SluiceError`] carries an [`ErrorKind`] for programmatic
//! handling, a static description, optional dynamic detail, an optional
//! source error, and the callsite location for operator diagnosis.

use std::borrow::Cow;
use std::error;
use std::fmt;
use std::panic::Location;
use std::sync::Arc;

/// Convenient result type for replication operations using [`SluiceError`] as the error type.
pub type SluiceResult<T> = Result<T, SluiceError>;

/// Main error type for replication operations.
#[derive(Debug, Clone)]
pub struct SluiceError {
    kind: ErrorKind,
    description: Cow<'static, str>,
    detail: Option<Cow<'static, str>>,
    source: Option<Arc<dyn error::Error + Send + Sync>>,
    location: &'static Location<'static>,
}

/// Specific categories of errors that can occur during replication.
///
/// The first block mirrors the externally visible taxonomy: these are the
/// kinds callers are expected to branch on. The remaining kinds classify
/// ambient failures of the surrounding stack.
#[derive(PartialEq, Eq, Copy, Clone, Debug, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    /// The engine or destination family is not supported.
    NotImplemented,
    /// The liveness probe or authentication against a database failed.
    ConnectionRefused,
    /// A required connection field is absent for the destination type.
    MissingCredentials,
    /// The view lacks a primary-key, last-modified, or tenant column.
    MissingTaggedColumn,
    /// A query against the source or destination failed at runtime.
    DatabaseError,
    /// Writing or registering the intermediate staged data failed.
    StagingFailure,
    /// The merge/upsert against the destination table failed.
    UpsertFailure,

    // Ambient kinds.
    InvalidState,
    ValidationError,
    SerializationError,
    ConfigError,
    ObjectStoreError,
    IoError,
    Unknown,
}

impl SluiceError {
    /// Returns the [`ErrorKind`] of this error.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns the detailed error information if available.
    pub fn detail(&self) -> Option<&str> {
        self.detail.as_deref()
    }

    /// Returns the captured callsite location for this error.
    pub fn location(&self) -> &'static Location<'static> {
        self.location
    }

    /// Attaches an originating [`error::Error`] to this error and returns the
    /// modified instance.
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: error::Error + Send + Sync + 'static,
    {
        self.source = Some(Arc::new(source));
        self
    }

    /// Creates a [`SluiceError`] from its components.
    #[track_caller]
    fn from_components(
        kind: ErrorKind,
        description: Cow<'static, str>,
        detail: Option<Cow<'static, str>>,
        source: Option<Arc<dyn error::Error + Send + Sync>>,
    ) -> Self {
        SluiceError {
            kind,
            description,
            detail,
            source,
            location: Location::caller(),
        }
    }
}

impl PartialEq for SluiceError {
    fn eq(&self, other: &SluiceError) -> bool {
        self.kind == other.kind
    }
}

impl fmt::Display for SluiceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        write!(
            f,
            "[{:?}] {} @ {}:{}:{}",
            self.kind,
            self.description,
            self.location.file(),
            self.location.line(),
            self.location.column()
        )?;

        if let Some(detail) = self.detail.as_deref() {
            write!(f, "\n  Detail: {detail}")?;
        }

        Ok(())
    }
}

impl error::Error for SluiceError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|source| source as &(dyn error::Error + 'static))
    }
}

/// Creates a [`SluiceError`] from an error kind and static description.
impl From<(ErrorKind, &'static str)> for SluiceError {
    #[track_caller]
    fn from((kind, desc): (ErrorKind, &'static str)) -> SluiceError {
        SluiceError::from_components(kind, Cow::Borrowed(desc), None, None)
    }
}

/// Creates a [`SluiceError`] from an error kind, static description, and dynamic detail.
impl<D> From<(ErrorKind, &'static str, D)> for SluiceError
where
    D: Into<Cow<'static, str>>,
{
    #[track_caller]
    fn from((kind, desc, detail): (ErrorKind, &'static str, D)) -> SluiceError {
        SluiceError::from_components(kind, Cow::Borrowed(desc), Some(detail.into()), None)
    }
}

/// Converts [`std::io::Error`] to [`SluiceError`] with [`ErrorKind::IoError`].
impl From<std::io::Error> for SluiceError {
    #[track_caller]
    fn from(err: std::io::Error) -> SluiceError {
        let detail = err.to_string();
        SluiceError::from_components(
            ErrorKind::IoError,
            Cow::Borrowed("I/O operation failed"),
            Some(Cow::Owned(detail)),
            Some(Arc::new(err)),
        )
    }
}

/// Converts [`serde_json::Error`] to [`SluiceError`] with [`ErrorKind::SerializationError`].
impl From<serde_json::Error> for SluiceError {
    #[track_caller]
    fn from(err: serde_json::Error) -> SluiceError {
        let detail = err.to_string();
        SluiceError::from_components(
            ErrorKind::SerializationError,
            Cow::Borrowed("JSON serialization failed"),
            Some(Cow::Owned(detail)),
            Some(Arc::new(err)),
        )
    }
}

/// Converts [`sqlx::Error`] to [`SluiceError`] with the appropriate error kind.
///
/// Pool setup and I/O failures map to [`ErrorKind::ConnectionRefused`] since
/// they surface before or instead of query execution; everything else is a
/// runtime [`ErrorKind::DatabaseError`].
impl From<sqlx::Error> for SluiceError {
    #[track_caller]
    fn from(err: sqlx::Error) -> SluiceError {
        let kind = match &err {
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolClosed
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::Configuration(_) => ErrorKind::ConnectionRefused,
            _ => ErrorKind::DatabaseError,
        };

        let detail = err.to_string();
        SluiceError::from_components(
            kind,
            Cow::Borrowed("Database operation failed"),
            Some(Cow::Owned(detail)),
            Some(Arc::new(err)),
        )
    }
}

/// Converts [`reqwest::Error`] to [`SluiceError`] with the appropriate error kind.
///
/// Connect-phase failures map to [`ErrorKind::ConnectionRefused`], everything
/// else to [`ErrorKind::DatabaseError`] since the REST-based adapters use HTTP
/// as their query transport.
impl From<reqwest::Error> for SluiceError {
    #[track_caller]
    fn from(err: reqwest::Error) -> SluiceError {
        let kind = if err.is_connect() || err.is_timeout() {
            ErrorKind::ConnectionRefused
        } else {
            ErrorKind::DatabaseError
        };

        let detail = err.to_string();
        SluiceError::from_components(
            kind,
            Cow::Borrowed("HTTP request failed"),
            Some(Cow::Owned(detail)),
            Some(Arc::new(err)),
        )
    }
}

/// Converts [`csv::Error`] to [`SluiceError`] with [`ErrorKind::SerializationError`].
impl From<csv::Error> for SluiceError {
    #[track_caller]
    fn from(err: csv::Error) -> SluiceError {
        let detail = err.to_string();
        SluiceError::from_components(
            ErrorKind::SerializationError,
            Cow::Borrowed("CSV serialization failed"),
            Some(Cow::Owned(detail)),
            Some(Arc::new(err)),
        )
    }
}

/// Converts [`chrono::ParseError`] to [`SluiceError`] with [`ErrorKind::ValidationError`].
impl From<chrono::ParseError> for SluiceError {
    #[track_caller]
    fn from(err: chrono::ParseError) -> SluiceError {
        let detail = err.to_string();
        SluiceError::from_components(
            ErrorKind::ValidationError,
            Cow::Borrowed("Datetime parsing failed"),
            Some(Cow::Owned(detail)),
            Some(Arc::new(err)),
        )
    }
}

/// Converts [`gcp_bigquery_client::error::BQError`] to [`SluiceError`] with
/// [`ErrorKind::DatabaseError`].
impl From<gcp_bigquery_client::error::BQError> for SluiceError {
    #[track_caller]
    fn from(err: gcp_bigquery_client::error::BQError) -> SluiceError {
        let detail = err.to_string();
        SluiceError::from_components(
            ErrorKind::DatabaseError,
            Cow::Borrowed("BigQuery operation failed"),
            Some(Cow::Owned(detail)),
            Some(Arc::new(err)),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sluice_error;

    #[test]
    fn error_exposes_kind_and_detail() {
        let err = sluice_error!(
            ErrorKind::MissingCredentials,
            "Incomplete credentials for destination",
            "missing warehouse name"
        );

        assert_eq!(err.kind(), ErrorKind::MissingCredentials);
        assert_eq!(err.detail(), Some("missing warehouse name"));
        assert!(err.to_string().contains("Incomplete credentials"));
    }

    #[test]
    fn errors_compare_by_kind() {
        let a = sluice_error!(ErrorKind::DatabaseError, "first");
        let b = sluice_error!(ErrorKind::DatabaseError, "second");
        let c = sluice_error!(ErrorKind::NotImplemented, "third");

        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
