use crate::error::StoreError;
use std::collections::BTreeMap;
use verso_common::EntityId;
use verso_kernel::Fields;

/// Where root documents themselves are written.
///
/// The history engine only needs whole-document writes and reads; embedded
/// nodes never have a record of their own.
pub trait DocumentStore {
    /// Insert or replace a root document.
    fn put(&mut self, kind: &str, id: EntityId, body: Fields) -> Result<(), StoreError>;

    fn get(&self, kind: &str, id: EntityId) -> Result<Option<Fields>, StoreError>;
}

/// In-memory document store, one collection per root type.
#[derive(Debug, Default, Clone)]
pub struct MemoryDocumentStore {
    collections: BTreeMap<String, BTreeMap<EntityId, Fields>>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of documents stored for a type.
    pub fn count(&self, kind: &str) -> usize {
        self.collections.get(kind).map_or(0, BTreeMap::len)
    }
}

impl DocumentStore for MemoryDocumentStore {
    fn put(&mut self, kind: &str, id: EntityId, body: Fields) -> Result<(), StoreError> {
        self.collections
            .entry(kind.to_string())
            .or_default()
            .insert(id, body);
        Ok(())
    }

    fn get(&self, kind: &str, id: EntityId) -> Result<Option<Fields>, StoreError> {
        Ok(self
            .collections
            .get(kind)
            .and_then(|docs| docs.get(&id))
            .cloned())
    }
}
