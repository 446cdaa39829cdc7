use verso_common::EntityId;

/// Errors from history and document storage.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("CBOR serialization error: {0}")]
    CborEncode(String),
    #[error("CBOR deserialization error: {0}")]
    CborDecode(String),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("integrity check failed: expected {expected}, got {actual}")]
    IntegrityMismatch { expected: String, actual: String },
    #[error("schema version mismatch: file has v{file_version}, expected v{expected_version}")]
    SchemaMismatch {
        file_version: u32,
        expected_version: u32,
    },
    #[error("{root_type} {root_id} already has version {version}")]
    DuplicateVersion {
        root_type: String,
        root_id: EntityId,
        version: u64,
    },
    #[error("cannot retract {root_type} {root_id} v{version}: not the most recent record")]
    RetractOutOfOrder {
        root_type: String,
        root_id: EntityId,
        version: u64,
    },
    #[error("invalid type name {0:?}")]
    InvalidTypeName(String),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}
