use std::error;
use std::fmt;

use migration_config::shared::ValidationError;

/// Convenient result type for migration operations using [`MigrationError`] as the error type.
pub type MigrationResult<T> = Result<T, MigrationError>;

/// Main error type for migration operations.
///
/// A [`MigrationError`] is either a single error with a kind and a description,
/// optionally carrying a dynamic detail, or an aggregate of many errors, as
/// produced when several workers of a round fail.
#[derive(Debug, Clone)]
pub struct MigrationError {
    repr: ErrorRepr,
}

#[derive(Debug, Clone)]
enum ErrorRepr {
    WithDescription(ErrorKind, &'static str),
    WithDescriptionAndDetail(ErrorKind, &'static str, String),
    Many(Vec<MigrationError>),
}

/// Categories of failures that can happen while migrating a partition.
///
/// The kind decides how an error is retried (see [`crate::retry::classify`]) and
/// which error code it carries over the control surface.
#[derive(PartialEq, Eq, Copy, Clone, Debug)]
#[non_exhaustive]
pub enum ErrorKind {
    // Source errors
    SourceUnavailable,
    SourceIoError,
    SourceRequestFailed,

    // Destination errors
    DestinationConnectionFailed,
    DestinationQueryFailed,
    DestinationIoError,

    // Enumeration & integrity errors
    InvalidRequest,
    PageIntegrityMismatch,
    DataLoss,

    // Write gate errors
    WritesRejected,
    WritesDrainFailed,

    // Migration workflow errors
    MissingMigrationStatus,
    InvalidState,
    VerificationFailed,
    WorkerPanic,

    // Configuration errors
    ConfigError,

    // IO & serialization errors
    IoError,
    SerializationError,
    DeserializationError,

    Unknown,
}

impl ErrorKind {
    const ALL: [ErrorKind; 20] = [
        ErrorKind::SourceUnavailable,
        ErrorKind::SourceIoError,
        ErrorKind::SourceRequestFailed,
        ErrorKind::DestinationConnectionFailed,
        ErrorKind::DestinationQueryFailed,
        ErrorKind::DestinationIoError,
        ErrorKind::InvalidRequest,
        ErrorKind::PageIntegrityMismatch,
        ErrorKind::DataLoss,
        ErrorKind::WritesRejected,
        ErrorKind::WritesDrainFailed,
        ErrorKind::MissingMigrationStatus,
        ErrorKind::InvalidState,
        ErrorKind::VerificationFailed,
        ErrorKind::WorkerPanic,
        ErrorKind::ConfigError,
        ErrorKind::IoError,
        ErrorKind::SerializationError,
        ErrorKind::DeserializationError,
        ErrorKind::Unknown,
    ];

    /// Stable name of the kind, used as `ErrorCode` in error responses.
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::SourceUnavailable => "SourceUnavailable",
            ErrorKind::SourceIoError => "SourceIoError",
            ErrorKind::SourceRequestFailed => "SourceRequestFailed",
            ErrorKind::DestinationConnectionFailed => "DestinationConnectionFailed",
            ErrorKind::DestinationQueryFailed => "DestinationQueryFailed",
            ErrorKind::DestinationIoError => "DestinationIoError",
            ErrorKind::InvalidRequest => "InvalidRequest",
            ErrorKind::PageIntegrityMismatch => "PageIntegrityMismatch",
            ErrorKind::DataLoss => "DataLoss",
            ErrorKind::WritesRejected => "WritesRejected",
            ErrorKind::WritesDrainFailed => "WritesDrainFailed",
            ErrorKind::MissingMigrationStatus => "MissingMigrationStatus",
            ErrorKind::InvalidState => "InvalidState",
            ErrorKind::VerificationFailed => "VerificationFailed",
            ErrorKind::WorkerPanic => "WorkerPanic",
            ErrorKind::ConfigError => "ConfigError",
            ErrorKind::IoError => "IoError",
            ErrorKind::SerializationError => "SerializationError",
            ErrorKind::DeserializationError => "DeserializationError",
            ErrorKind::Unknown => "Unknown",
        }
    }

    /// Parses an error code produced by [`ErrorKind::code`].
    pub fn from_code(code: &str) -> Option<ErrorKind> {
        Self::ALL.into_iter().find(|kind| kind.code() == code)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl MigrationError {
    /// Creates a [`MigrationError`] aggregating multiple errors.
    pub fn many(errors: Vec<MigrationError>) -> MigrationError {
        MigrationError {
            repr: ErrorRepr::Many(errors),
        }
    }

    /// Returns the [`ErrorKind`] of this error.
    ///
    /// For multiple errors, returns the kind of the first error or [`ErrorKind::Unknown`]
    /// if the error list is empty.
    pub fn kind(&self) -> ErrorKind {
        match self.repr {
            ErrorRepr::WithDescription(kind, _)
            | ErrorRepr::WithDescriptionAndDetail(kind, _, _) => kind,
            ErrorRepr::Many(ref errors) => errors
                .first()
                .map(|err| err.kind())
                .unwrap_or(ErrorKind::Unknown),
        }
    }

    /// Returns all [`ErrorKind`]s present in this error, flattening aggregates.
    pub fn kinds(&self) -> Vec<ErrorKind> {
        match self.repr {
            ErrorRepr::WithDescription(kind, _)
            | ErrorRepr::WithDescriptionAndDetail(kind, _, _) => vec![kind],
            ErrorRepr::Many(ref errors) => errors
                .iter()
                .flat_map(|err| err.kinds())
                .collect::<Vec<_>>(),
        }
    }

    /// Returns `true` if any of the errors has the given kind.
    pub fn has_kind(&self, kind: ErrorKind) -> bool {
        self.kinds().contains(&kind)
    }

    /// Returns the dynamic detail of the error, or of the first aggregated error that has one.
    pub fn detail(&self) -> Option<&str> {
        match self.repr {
            ErrorRepr::WithDescriptionAndDetail(_, _, ref detail) => Some(detail.as_str()),
            ErrorRepr::Many(ref errors) => errors.iter().find_map(|e| e.detail()),
            _ => None,
        }
    }
}

impl PartialEq for MigrationError {
    fn eq(&self, other: &MigrationError) -> bool {
        match (&self.repr, &other.repr) {
            (ErrorRepr::WithDescription(kind_a, _), ErrorRepr::WithDescription(kind_b, _)) => {
                kind_a == kind_b
            }
            (
                ErrorRepr::WithDescriptionAndDetail(kind_a, _, _),
                ErrorRepr::WithDescriptionAndDetail(kind_b, _, _),
            ) => kind_a == kind_b,
            (ErrorRepr::Many(errors_a), ErrorRepr::Many(errors_b)) => {
                errors_a.len() == errors_b.len()
                    && errors_a.iter().zip(errors_b.iter()).all(|(a, b)| a == b)
            }
            _ => false,
        }
    }
}

impl fmt::Display for MigrationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        match self.repr {
            ErrorRepr::WithDescription(kind, desc) => {
                fmt::Debug::fmt(&kind, f)?;
                f.write_str(": ")?;
                desc.fmt(f)?;

                Ok(())
            }
            ErrorRepr::WithDescriptionAndDetail(kind, desc, ref detail) => {
                fmt::Debug::fmt(&kind, f)?;
                f.write_str(": ")?;
                desc.fmt(f)?;
                f.write_str(" -> ")?;
                detail.fmt(f)?;

                Ok(())
            }
            ErrorRepr::Many(ref errors) => {
                if errors.is_empty() {
                    write!(f, "Multiple errors occurred (empty)")?;
                } else if errors.len() == 1 {
                    errors[0].fmt(f)?;
                } else {
                    write!(f, "Multiple errors occurred ({} total):", errors.len())?;
                    for (i, error) in errors.iter().enumerate() {
                        write!(f, "\n  {}: {}", i + 1, error)?;
                    }
                }
                Ok(())
            }
        }
    }
}

impl error::Error for MigrationError {}

impl From<(ErrorKind, &'static str)> for MigrationError {
    fn from((kind, desc): (ErrorKind, &'static str)) -> MigrationError {
        MigrationError {
            repr: ErrorRepr::WithDescription(kind, desc),
        }
    }
}

impl From<(ErrorKind, &'static str, String)> for MigrationError {
    fn from((kind, desc, detail): (ErrorKind, &'static str, String)) -> MigrationError {
        MigrationError {
            repr: ErrorRepr::WithDescriptionAndDetail(kind, desc, detail),
        }
    }
}

impl<E> From<Vec<E>> for MigrationError
where
    E: Into<MigrationError>,
{
    fn from(errors: Vec<E>) -> MigrationError {
        MigrationError {
            repr: ErrorRepr::Many(errors.into_iter().map(Into::into).collect()),
        }
    }
}

impl From<std::io::Error> for MigrationError {
    fn from(err: std::io::Error) -> MigrationError {
        MigrationError {
            repr: ErrorRepr::WithDescriptionAndDetail(
                ErrorKind::IoError,
                "I/O error occurred",
                err.to_string(),
            ),
        }
    }
}

/// Maps [`serde_json::Error`] to a serialization or deserialization error based on its category.
impl From<serde_json::Error> for MigrationError {
    fn from(err: serde_json::Error) -> MigrationError {
        let (kind, description) = match err.classify() {
            serde_json::error::Category::Io => (ErrorKind::IoError, "JSON I/O operation failed"),
            serde_json::error::Category::Syntax
            | serde_json::error::Category::Data
            | serde_json::error::Category::Eof => (
                ErrorKind::DeserializationError,
                "JSON deserialization failed",
            ),
        };

        MigrationError {
            repr: ErrorRepr::WithDescriptionAndDetail(kind, description, err.to_string()),
        }
    }
}

impl From<ValidationError> for MigrationError {
    fn from(err: ValidationError) -> MigrationError {
        MigrationError {
            repr: ErrorRepr::WithDescriptionAndDetail(
                ErrorKind::ConfigError,
                "Invalid migration configuration",
                err.to_string(),
            ),
        }
    }
}

/// Maps [`sqlx::Error`] to destination store error kinds.
///
/// Pool and I/O failures are connection problems that usually heal, while
/// database errors are query failures.
impl From<sqlx::Error> for MigrationError {
    fn from(err: sqlx::Error) -> MigrationError {
        let kind = match &err {
            sqlx::Error::Database(_) => ErrorKind::DestinationQueryFailed,
            sqlx::Error::Io(_) => ErrorKind::DestinationIoError,
            sqlx::Error::PoolClosed | sqlx::Error::PoolTimedOut => {
                ErrorKind::DestinationConnectionFailed
            }
            _ => ErrorKind::DestinationQueryFailed,
        };

        MigrationError {
            repr: ErrorRepr::WithDescriptionAndDetail(
                kind,
                "Database operation failed",
                err.to_string(),
            ),
        }
    }
}

/// Maps [`reqwest::Error`] to source error kinds.
///
/// Failing to reach the source at all is [`ErrorKind::SourceUnavailable`], a broken
/// body is [`ErrorKind::SourceIoError`], anything else a failed request.
impl From<reqwest::Error> for MigrationError {
    fn from(err: reqwest::Error) -> MigrationError {
        let (kind, description) = if err.is_connect() || err.is_timeout() {
            (ErrorKind::SourceUnavailable, "Source service is unreachable")
        } else if err.is_body() || err.is_decode() {
            (
                ErrorKind::SourceIoError,
                "Reading the source service response failed",
            )
        } else {
            (
                ErrorKind::SourceRequestFailed,
                "Source service request failed",
            )
        };

        MigrationError {
            repr: ErrorRepr::WithDescriptionAndDetail(kind, description, err.to_string()),
        }
    }
}
