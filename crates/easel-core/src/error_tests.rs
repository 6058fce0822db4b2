//! Error module tests

use chrono::Utc;
use uuid::Uuid;

use crate::domain::lifecycle::{LifecycleError, LifecycleState};
use crate::domain::locking::{LockError, LockTier};
use crate::error::{Error, Result};

fn conflict() -> LockError {
    LockError::Conflict {
        resource_id: "canvas-7".to_string(),
        current_holder: "ann".to_string(),
        tier: LockTier::Edit,
        expires_at: Utc::now(),
    }
}

#[tokio::test]
async fn test_lock_conflict_error() {
    let error: Error = conflict().into();
    assert_eq!(error.code(), "E300");
    assert!(error.to_string().contains("canvas-7"));
    assert!(error.to_string().contains("ann"));
    assert!(
        error
            .suggestion()
            .is_some_and(|s| s.contains("easel lock override canvas-7"))
    );
    assert!(!error.is_indeterminate());
}

#[tokio::test]
async fn test_not_owner_error() {
    let error = Error::Lock(LockError::NotOwner {
        lock_id: Uuid::new_v4(),
        holder_id: "bob".to_string(),
    });
    assert_eq!(error.code(), "E301");
    assert_eq!(
        error.suggestion(),
        Some("re-acquire the lock with `easel lock acquire`".to_string())
    );
}

#[tokio::test]
async fn test_insufficient_tier_message() {
    let error = LockError::InsufficientTier {
        requested: LockTier::Edit,
        incumbent: Some(LockTier::System),
    };
    assert_eq!(error.code(), "E303");
    assert!(error.to_string().contains("a system lock"));

    let empty = LockError::InsufficientTier {
        requested: LockTier::View,
        incumbent: None,
    };
    assert!(empty.to_string().contains("an empty slot"));
}

#[tokio::test]
async fn test_lock_error_codes_are_distinct() {
    let errors = [
        conflict(),
        LockError::MissingReason,
        LockError::InvalidTtl {
            ttl_secs: 1,
            min_secs: 30,
            max_secs: 60,
        },
        LockError::InvalidRequest("empty".to_string()),
        LockError::Contended {
            resource_id: "r".to_string(),
            attempts: 3,
        },
        LockError::StoreUnavailable("timeout".to_string()),
        LockError::Corrupted("bad tier".to_string()),
        LockError::ResourceNotFound("poster".to_string()),
    ];

    let mut codes: Vec<&str> = errors.iter().map(|e| e.code()).collect();
    codes.sort_unstable();
    codes.dedup();
    assert_eq!(codes.len(), errors.len());
}

#[tokio::test]
async fn test_store_unavailable_is_indeterminate() {
    let error = Error::Lock(LockError::StoreUnavailable("timed out".to_string()));
    assert_eq!(error.code(), "E308");
    assert!(error.is_indeterminate());

    let lifecycle = Error::Lifecycle(LifecycleError::StoreUnavailable("gone".to_string()));
    assert_eq!(lifecycle.code(), "E407");
    assert!(lifecycle.is_indeterminate());

    let nested = Error::Lifecycle(LifecycleError::Lock(LockError::StoreUnavailable(
        "gone".to_string(),
    )));
    assert!(nested.is_indeterminate());
}

#[tokio::test]
async fn test_lifecycle_locked_error() {
    let error = Error::Lifecycle(LifecycleError::Locked {
        resource_id: "canvas-7".to_string(),
        holder_id: "ann".to_string(),
        tier: LockTier::System,
        expires_at: Utc::now(),
    });
    assert_eq!(error.code(), "E400");
    assert_eq!(error.suggestion(), Some("easel lock status canvas-7".to_string()));
}

#[tokio::test]
async fn test_not_archived_error() {
    let error = Error::Lifecycle(LifecycleError::NotArchived {
        resource_id: "canvas-7".to_string(),
    });
    assert_eq!(error.code(), "E401");
    assert_eq!(
        error.suggestion(),
        Some("easel resource archive canvas-7".to_string())
    );
    assert!(error.to_string().contains("archive it first"));
}

#[tokio::test]
async fn test_invalid_transition_error() {
    let error = LifecycleError::InvalidTransition {
        from: LifecycleState::Deleted,
        to: LifecycleState::Active,
    };
    assert_eq!(error.code(), "E404");
    assert!(error.to_string().contains("deleted"));
}

#[tokio::test]
async fn test_wrapped_lock_error_keeps_code() {
    let error = LifecycleError::from(LockError::MissingReason);
    assert_eq!(error.code(), "E304");
}

#[tokio::test]
async fn test_config_error() {
    let error = Error::ConfigError("min_ttl_secs must be at least 1".to_string());
    assert_eq!(error.code(), "E600");
    assert_eq!(error.suggestion(), Some("easel config show".to_string()));
}

#[tokio::test]
async fn test_invalid_input_error() {
    let error = Error::InvalidInput("Empty holder".to_string());
    assert_eq!(error.code(), "E800");
    assert_eq!(error.suggestion(), None);
    assert!(error.to_string().contains("Empty holder"));
}

#[tokio::test]
async fn test_parse_error() {
    let error = Error::Parse("unknown tier 'admin'".to_string());
    assert_eq!(error.code(), "E801");
    assert!(error.to_string().starts_with("Parse error"));
}

#[tokio::test]
async fn test_io_error_conversion() {
    let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
    let error: Error = io.into();
    assert_eq!(error.code(), "E9999");
}

#[tokio::test]
async fn test_result_alias() {
    fn fails() -> Result<()> {
        Err(Error::Other("boom".to_string()))
    }

    let err = fails().unwrap_err();
    assert_eq!(err.to_string(), "boom");
}
