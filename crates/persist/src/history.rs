use crate::error::StoreError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use verso_common::EntityId;
use verso_kernel::Fields;

/// One immutable version of a root document.
///
/// Keyed by `(original_type, original_id, version)`. Never modified after it
/// is appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub original_type: String,
    pub original_id: EntityId,
    pub version: u64,
    /// Structural diff from the previous version.
    pub altered_attributes: Fields,
    /// Complete tree state at this version.
    pub full_attributes: Fields,
    pub created_at: DateTime<Utc>,
}

/// Append-only storage for history records.
pub trait HistoryStore {
    /// Store a new record. Fails with [`StoreError::DuplicateVersion`] if the
    /// root already has that version.
    fn append(&mut self, record: HistoryRecord) -> Result<(), StoreError>;

    /// Every record of a root, ascending by version.
    fn query(&self, root_type: &str, root_id: EntityId) -> Result<Vec<HistoryRecord>, StoreError>;

    /// A single version of a root.
    fn query_at(
        &self,
        root_type: &str,
        root_id: EntityId,
        version: u64,
    ) -> Result<Option<HistoryRecord>, StoreError>;

    /// Highest stored version of a root.
    fn latest_version(&self, root_type: &str, root_id: EntityId) -> Result<Option<u64>, StoreError> {
        Ok(self.query(root_type, root_id)?.last().map(|r| r.version))
    }

    /// Compensating rollback for a save whose document write failed after
    /// its record was appended. Only the most recent record of a root can be
    /// retracted.
    fn retract(
        &mut self,
        root_type: &str,
        root_id: EntityId,
        version: u64,
    ) -> Result<HistoryRecord, StoreError>;
}

type RootKey = (String, EntityId);

/// In-memory history store.
///
/// Records are kept per root in version order.
#[derive(Debug, Default, Clone)]
pub struct MemoryHistoryStore {
    records: BTreeMap<RootKey, BTreeMap<u64, HistoryRecord>>,
}

impl MemoryHistoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of records across all roots.
    pub fn len(&self) -> usize {
        self.records.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn key(root_type: &str, root_id: EntityId) -> RootKey {
        (root_type.to_string(), root_id)
    }
}

impl HistoryStore for MemoryHistoryStore {
    fn append(&mut self, record: HistoryRecord) -> Result<(), StoreError> {
        let versions = self
            .records
            .entry(Self::key(&record.original_type, record.original_id))
            .or_default();
        if versions.contains_key(&record.version) {
            return Err(StoreError::DuplicateVersion {
                root_type: record.original_type,
                root_id: record.original_id,
                version: record.version,
            });
        }
        versions.insert(record.version, record);
        Ok(())
    }

    fn query(&self, root_type: &str, root_id: EntityId) -> Result<Vec<HistoryRecord>, StoreError> {
        Ok(self
            .records
            .get(&Self::key(root_type, root_id))
            .map(|versions| versions.values().cloned().collect())
            .unwrap_or_default())
    }

    fn query_at(
        &self,
        root_type: &str,
        root_id: EntityId,
        version: u64,
    ) -> Result<Option<HistoryRecord>, StoreError> {
        Ok(self
            .records
            .get(&Self::key(root_type, root_id))
            .and_then(|versions| versions.get(&version))
            .cloned())
    }

    fn latest_version(&self, root_type: &str, root_id: EntityId) -> Result<Option<u64>, StoreError> {
        Ok(self
            .records
            .get(&Self::key(root_type, root_id))
            .and_then(|versions| versions.keys().next_back().copied()))
    }

    fn retract(
        &mut self,
        root_type: &str,
        root_id: EntityId,
        version: u64,
    ) -> Result<HistoryRecord, StoreError> {
        let out_of_order = || StoreError::RetractOutOfOrder {
            root_type: root_type.to_string(),
            root_id,
            version,
        };
        let versions = self
            .records
            .get_mut(&Self::key(root_type, root_id))
            .ok_or_else(out_of_order)?;
        if versions.keys().next_back() != Some(&version) {
            return Err(out_of_order());
        }
        versions.remove(&version).ok_or_else(out_of_order)
    }
}
