//! Schemas and store doubles shared by the unit tests.

use serde_json::Value;
use std::sync::Arc;
use verso_common::EntityId;
use verso_kernel::{Fields, RelationDescriptor, Schema};
use verso_persist::{DocumentStore, HistoryRecord, HistoryStore, MemoryHistoryStore, StoreError};

pub(crate) fn article_schema() -> Arc<Schema> {
    Arc::new(
        Schema::builder()
            .root("Article", [RelationDescriptor::many("pages", "Page")])
            .embedded(
                "Page",
                [
                    RelationDescriptor::many("sections", "Section"),
                    RelationDescriptor::one("footer", "Footer"),
                ],
            )
            .embedded("Section", [])
            .embedded("Footer", [])
            .build()
            .unwrap(),
    )
}

pub(crate) fn user_schema() -> Arc<Schema> {
    Arc::new(Schema::builder().root("User", []).build().unwrap())
}

pub(crate) fn fields(value: Value) -> Fields {
    value.as_object().cloned().unwrap()
}

/// Document store whose writes always fail.
#[derive(Debug, Default)]
pub(crate) struct FailingDocumentStore;

impl DocumentStore for FailingDocumentStore {
    fn put(&mut self, _kind: &str, _id: EntityId, _body: Fields) -> Result<(), StoreError> {
        Err(StoreError::Unavailable("document store offline".into()))
    }

    fn get(&self, _kind: &str, _id: EntityId) -> Result<Option<Fields>, StoreError> {
        Ok(None)
    }
}

/// History store that never reports a latest version, as if another writer's
/// records were invisible to the sequencer.
#[derive(Debug, Default)]
pub(crate) struct StaleHistoryStore {
    inner: MemoryHistoryStore,
}

impl HistoryStore for StaleHistoryStore {
    fn append(&mut self, record: HistoryRecord) -> Result<(), StoreError> {
        self.inner.append(record)
    }

    fn query(&self, root_type: &str, root_id: EntityId) -> Result<Vec<HistoryRecord>, StoreError> {
        self.inner.query(root_type, root_id)
    }

    fn query_at(
        &self,
        root_type: &str,
        root_id: EntityId,
        version: u64,
    ) -> Result<Option<HistoryRecord>, StoreError> {
        self.inner.query_at(root_type, root_id, version)
    }

    fn latest_version(&self, _root_type: &str, _root_id: EntityId) -> Result<Option<u64>, StoreError> {
        Ok(None)
    }

    fn retract(
        &mut self,
        root_type: &str,
        root_id: EntityId,
        version: u64,
    ) -> Result<HistoryRecord, StoreError> {
        self.inner.retract(root_type, root_id, version)
    }
}
