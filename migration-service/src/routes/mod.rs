use actix_web::{
    HttpResponse, ResponseError,
    http::{StatusCode, header::ContentType},
};
use migration::error::{ErrorKind, MigrationError};
use serde::{Deserialize, Serialize};
use std::fmt;

pub mod health_check;
pub mod kvs;
pub mod kvs_migration;
pub mod rc_migration;

/// Error body of every control surface route.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ErrorMessage {
    pub message: String,
    pub error_code: String,
}

impl From<&MigrationError> for ErrorMessage {
    fn from(err: &MigrationError) -> Self {
        Self {
            message: err.to_string(),
            error_code: err.kind().code().to_string(),
        }
    }
}

/// A [`MigrationError`] returned by a route.
#[derive(Debug)]
pub struct ApiError(MigrationError);

impl From<MigrationError> for ApiError {
    fn from(err: MigrationError) -> Self {
        Self(err)
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self.0.kind() {
            ErrorKind::InvalidRequest => StatusCode::BAD_REQUEST,
            ErrorKind::MissingMigrationStatus => StatusCode::NOT_FOUND,
            ErrorKind::WritesRejected | ErrorKind::SourceUnavailable => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let error_message = ErrorMessage::from(&self.0);
        let body =
            serde_json::to_string(&error_message).expect("failed to serialize error message");
        HttpResponse::build(self.status_code())
            .insert_header(ContentType::json())
            .body(body)
    }
}
