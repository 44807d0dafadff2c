use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use serde::Serialize;
use sluice::error::{ErrorKind, SluiceError};
use thiserror::Error;

/// Error surface of the HTTP API.
///
/// The body carries a stable `code` for programmatic consumers; the message
/// is for operators and not guaranteed stable.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("request validation failed: {0}")]
    Validation(String),

    #[error("precondition failed: {0}")]
    PreconditionFailed(String),

    #[error("error while interacting with PostgreSQL: {0}")]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Engine(#[from] SluiceError),
}

#[derive(Serialize)]
struct ErrorBody {
    code: &'static str,
    message: String,
}

impl ApiError {
    fn code(&self) -> &'static str {
        match self {
            ApiError::NotFound(_) => "not_found",
            ApiError::Validation(_) => "validation_error",
            ApiError::PreconditionFailed(_) => "precondition_failed",
            ApiError::Database(_) => "internal_server_error",
            ApiError::Engine(err) => match err.kind() {
                ErrorKind::NotImplemented => "not_implemented",
                ErrorKind::ConnectionRefused => "connection_refused",
                ErrorKind::MissingCredentials => "missing_credentials",
                ErrorKind::MissingTaggedColumn => "missing_tagged_column",
                ErrorKind::InvalidState => "transfer_not_in_progress",
                ErrorKind::ValidationError => "validation_error",
                _ => "internal_server_error",
            },
        }
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::PreconditionFailed(_) => StatusCode::PRECONDITION_FAILED,
            ApiError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Engine(err) => match err.kind() {
                ErrorKind::NotImplemented
                | ErrorKind::ConnectionRefused
                | ErrorKind::MissingCredentials
                | ErrorKind::MissingTaggedColumn
                | ErrorKind::ValidationError => StatusCode::BAD_REQUEST,
                ErrorKind::InvalidState => StatusCode::PRECONDITION_FAILED,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(ErrorBody {
            code: self.code(),
            message: self.to_string(),
        })
    }
}
