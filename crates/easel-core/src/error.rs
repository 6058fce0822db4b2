//! Error types for Easel

use thiserror::Error;

use crate::domain::lifecycle::LifecycleError;
use crate::domain::locking::LockError;

/// Result type alias using Easel's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Easel error types with helpful messages and suggestions
#[derive(Error, Debug)]
pub enum Error {
    // Lock errors (E300-E399)
    #[error(transparent)]
    Lock(#[from] LockError),

    // Lifecycle errors (E400-E499)
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    // Database errors (E500-E599)
    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    // Config errors (E600-E699)
    #[error("Configuration error: {0}")]
    ConfigError(String),

    // Input errors (E800-E899)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Parse error: {0}")]
    Parse(String),

    // Generic errors
    #[error("{0}")]
    Other(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Get error code for this error type
    pub fn code(&self) -> &'static str {
        match self {
            Self::Lock(e) => e.code(),
            Self::Lifecycle(e) => e.code(),
            Self::DatabaseError(_) => "E500",
            Self::ConfigError(_) => "E600",
            Self::InvalidInput(_) => "E800",
            Self::Parse(_) => "E801",
            Self::Other(_) | Self::Io(_) => "E9999",
        }
    }

    /// Get suggestion for how to fix this error
    pub fn suggestion(&self) -> Option<String> {
        match self {
            Self::Lock(LockError::Conflict { resource_id, .. }) => Some(format!(
                "wait for the lease to expire or run `easel lock override {} --reason <why>`",
                resource_id
            )),
            Self::Lock(LockError::NotOwner { .. }) => {
                Some("re-acquire the lock with `easel lock acquire`".to_string())
            }
            Self::Lock(LockError::ResourceNotFound(_)) => Some("easel resource list".to_string()),
            Self::Lock(LockError::StoreUnavailable(_))
            | Self::Lifecycle(LifecycleError::StoreUnavailable(_)) => {
                Some("check the result with `easel lock status` before retrying".to_string())
            }
            Self::Lifecycle(LifecycleError::NotArchived { resource_id }) => {
                Some(format!("easel resource archive {}", resource_id))
            }
            Self::Lifecycle(LifecycleError::Locked { resource_id, .. }) => {
                Some(format!("easel lock status {}", resource_id))
            }
            Self::ConfigError(_) => Some("easel config show".to_string()),
            Self::DatabaseError(_) => Some("easel doctor".to_string()),
            _ => None,
        }
    }

    /// Whether the outcome of the failed operation is unknown
    ///
    /// Callers must re-read state instead of assuming success or failure.
    pub fn is_indeterminate(&self) -> bool {
        matches!(
            self,
            Self::Lock(LockError::StoreUnavailable(_))
                | Self::Lifecycle(LifecycleError::StoreUnavailable(_))
                | Self::Lifecycle(LifecycleError::Lock(LockError::StoreUnavailable(_)))
        )
    }
}
