use crate::error::{AppError, AppErrorKind, InfrastructureError};
use std::fmt;

/// Database error with a classified kind
#[derive(Debug, Clone, thiserror::Error)]
#[error("{kind}")]
pub struct DatabaseError {
    pub kind: DatabaseErrorKind,
}

#[derive(Debug, Clone)]
pub enum DatabaseErrorKind {
    NotFound { entity: String, id: String },
    /// Unique constraint violated (SQLSTATE 23505)
    UniqueViolation { constraint: Option<String> },
    /// Compare-and-swap on status lost: row was not in the expected status
    StatusConflict {
        id: String,
        expected: String,
        actual: Option<String>,
    },
    ConnectionError { message: String },
    PoolExhausted,
    QueryError { message: String },
    /// Stored value could not be decoded into a domain type
    Decode { message: String },
    Unknown { message: String },
}

impl fmt::Display for DatabaseErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DatabaseErrorKind::NotFound { entity, id } => write!(f, "{} {} not found", entity, id),
            DatabaseErrorKind::UniqueViolation { constraint } => write!(
                f,
                "unique constraint violated: {}",
                constraint.as_deref().unwrap_or("unknown")
            ),
            DatabaseErrorKind::StatusConflict {
                id,
                expected,
                actual,
            } => write!(
                f,
                "status conflict on {}: expected {}, found {}",
                id,
                expected,
                actual.as_deref().unwrap_or("nothing")
            ),
            DatabaseErrorKind::ConnectionError { message } => {
                write!(f, "connection error: {}", message)
            }
            DatabaseErrorKind::PoolExhausted => write!(f, "connection pool exhausted"),
            DatabaseErrorKind::QueryError { message } => write!(f, "query error: {}", message),
            DatabaseErrorKind::Decode { message } => write!(f, "decode error: {}", message),
            DatabaseErrorKind::Unknown { message } => write!(f, "database error: {}", message),
        }
    }
}

impl DatabaseError {
    pub fn new(kind: DatabaseErrorKind) -> Self {
        Self { kind }
    }

    pub fn decode(message: impl Into<String>) -> Self {
        Self::new(DatabaseErrorKind::Decode {
            message: message.into(),
        })
    }

    pub fn status_conflict(
        id: impl fmt::Display,
        expected: impl fmt::Display,
        actual: Option<String>,
    ) -> Self {
        Self::new(DatabaseErrorKind::StatusConflict {
            id: id.to_string(),
            expected: expected.to_string(),
            actual,
        })
    }

    pub fn from_sqlx(err: sqlx::Error) -> Self {
        let kind = match &err {
            sqlx::Error::RowNotFound => DatabaseErrorKind::NotFound {
                entity: "row".to_string(),
                id: String::new(),
            },
            sqlx::Error::PoolTimedOut => DatabaseErrorKind::PoolExhausted,
            sqlx::Error::Io(e) => DatabaseErrorKind::ConnectionError {
                message: e.to_string(),
            },
            sqlx::Error::Database(db) if db.code().as_deref() == Some("23505") => {
                DatabaseErrorKind::UniqueViolation {
                    constraint: db.constraint().map(|c| c.to_string()),
                }
            }
            sqlx::Error::Database(db) => DatabaseErrorKind::QueryError {
                message: db.message().to_string(),
            },
            sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
                DatabaseErrorKind::Decode {
                    message: err.to_string(),
                }
            }
            _ => DatabaseErrorKind::Unknown {
                message: err.to_string(),
            },
        };
        Self { kind }
    }

    pub fn is_unique_violation(&self) -> bool {
        matches!(self.kind, DatabaseErrorKind::UniqueViolation { .. })
    }

    pub fn is_status_conflict(&self) -> bool {
        matches!(self.kind, DatabaseErrorKind::StatusConflict { .. })
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind,
            DatabaseErrorKind::ConnectionError { .. } | DatabaseErrorKind::PoolExhausted
        )
    }
}

impl From<DatabaseError> for AppError {
    fn from(err: DatabaseError) -> Self {
        let is_retryable = err.is_retryable();
        match err.kind {
            DatabaseErrorKind::NotFound { entity, id } => AppError::not_found(entity, id),
            other => AppError::new(AppErrorKind::Infrastructure(InfrastructureError::Database {
                message: other.to_string(),
                is_retryable,
            })),
        }
    }
}
