use verso_kernel::DocumentError;
use verso_persist::StoreError;

/// Errors surfaced to the caller of a tracked save or revert.
#[derive(Debug, thiserror::Error)]
pub enum TrackError {
    /// Two writers raced on one root, or the store's history no longer lines
    /// up with what this save expected. Never merged silently.
    #[error("history consistency violation: {0}")]
    ConsistencyViolation(#[source] StoreError),
    #[error("history store unavailable: {0}")]
    StoreUnavailable(#[source] StoreError),
    #[error(transparent)]
    Document(#[from] DocumentError),
}

impl From<StoreError> for TrackError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::DuplicateVersion { .. } | StoreError::RetractOutOfOrder { .. } => {
                Self::ConsistencyViolation(err)
            }
            other => Self::StoreUnavailable(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use verso_common::EntityId;

    #[test]
    fn duplicate_version_is_a_consistency_violation() {
        let err = TrackError::from(StoreError::DuplicateVersion {
            root_type: "User".into(),
            root_id: EntityId::new(),
            version: 2,
        });
        assert!(matches!(err, TrackError::ConsistencyViolation(_)));
    }

    #[test]
    fn other_store_failures_are_unavailability() {
        let err = TrackError::from(StoreError::Unavailable("down".into()));
        assert!(matches!(err, TrackError::StoreUnavailable(_)));
        assert!(err.to_string().contains("down"));
    }
}
