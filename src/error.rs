use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::{backend::BackendError, views::ViewError};

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error(transparent)]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error(transparent)]
    Trip(#[from] TripError),
    #[error(transparent)]
    View(#[from] ViewError),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("unauthorized")]
    Unauthorized,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::Config(_)
            | AppError::Io(_)
            | AppError::Database(_)
            | AppError::Migration(_)
            | AppError::Backend(_)
            | AppError::View(_)
            | AppError::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Trip(err) => err.status(),
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
        };

        (status, self.to_string()).into_response()
    }
}

/// Failures of the trip data controller. `Persistence` displays only its
/// context; the backend cause stays in the source chain for the logs.
#[derive(Debug, Error)]
pub enum TripError {
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    Authorization(String),
    #[error("{context}")]
    Persistence {
        context: String,
        #[source]
        source: BackendError,
    },
    #[error("{0}")]
    NotFound(String),
}

impl TripError {
    pub fn validation(message: impl Into<String>) -> Self {
        TripError::Validation(message.into())
    }

    pub fn authorization(message: impl Into<String>) -> Self {
        TripError::Authorization(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        TripError::NotFound(message.into())
    }

    /// Wraps a backend failure with `context`. Backend rejections of the
    /// request itself keep their own kind.
    pub fn backend(context: impl Into<String>, source: BackendError) -> Self {
        match source {
            BackendError::Invalid(message) => TripError::Validation(message),
            source => TripError::Persistence {
                context: context.into(),
                source,
            },
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            TripError::Validation(_) => "validation",
            TripError::Authorization(_) => "authorization",
            TripError::Persistence { .. } => "persistence",
            TripError::NotFound(_) => "not_found",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            TripError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            TripError::Authorization(_) => StatusCode::FORBIDDEN,
            TripError::Persistence { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            TripError::NotFound(_) => StatusCode::NOT_FOUND,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn persistence_error_shows_only_its_context() {
        let err = TripError::backend(
            "Failed to create trip",
            BackendError::Io(std::io::Error::other("disk on fire")),
        );
        assert_eq!(err.to_string(), "Failed to create trip");
        assert_eq!(err.kind(), "persistence");
        let source = std::error::Error::source(&err).expect("source kept");
        assert_eq!(source.to_string(), "disk on fire");
    }

    #[test]
    fn invalid_backend_request_becomes_validation() {
        let err = TripError::backend("ignored", BackendError::Invalid("bad email".into()));
        assert!(matches!(err, TripError::Validation(ref msg) if msg == "bad email"));
    }
}
