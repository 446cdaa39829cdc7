use crate::config::TrackingConfig;
use crate::error::TrackError;
use crate::snapshot::attributes_with_relations;
use crate::tracker::Tracker;
use chrono::Utc;
use std::sync::Arc;
use tracing::warn;
use verso_common::{EntityId, timestamp};
use verso_kernel::{Document, DocumentError, Schema};
use verso_persist::{DocumentStore, HistoryRecord, HistoryStore};

/// Binds a document store and a history store, firing the tracking hooks
/// around every write.
///
/// A save either writes both the root document and its history record, or
/// neither: the in-memory document is checkpointed and restored on failure,
/// and a record appended by a save whose document write failed is retracted.
#[derive(Debug)]
pub struct Repository<D, H> {
    documents: D,
    history: H,
    tracker: Tracker,
}

impl<D: DocumentStore, H: HistoryStore> Repository<D, H> {
    pub fn new(documents: D, history: H, config: TrackingConfig) -> Self {
        Self {
            documents,
            history,
            tracker: Tracker::new(config),
        }
    }

    pub fn tracker(&self) -> &Tracker {
        &self.tracker
    }

    pub fn documents(&self) -> &D {
        &self.documents
    }

    pub fn history(&self) -> &H {
        &self.history
    }

    /// Persist the whole document. `origin` is the node the save was called
    /// on; it decides whether the save is tracked, while the record always
    /// describes the root.
    ///
    /// Returns the new version, or `None` when the save was not tracked.
    pub fn save(&mut self, doc: &mut Document, origin: EntityId) -> Result<Option<u64>, TrackError> {
        let checkpoint = doc.clone();
        let result = self.write(doc, origin);
        if result.is_err() {
            *doc = checkpoint;
        }
        result
    }

    fn write(&mut self, doc: &mut Document, origin: EntityId) -> Result<Option<u64>, TrackError> {
        if doc.entity(origin).is_none() {
            return Err(DocumentError::NodeNotFound(origin).into());
        }
        doc.touch(&timestamp(Utc::now()));
        let recorded = self.tracker.before_save(&mut self.history, doc, origin)?;

        let root = doc.root();
        let body = match doc.entity(root) {
            Some(entity) => attributes_with_relations(entity, &[]),
            None => return Err(DocumentError::NodeNotFound(root).into()),
        };
        if let Err(err) = self.documents.put(doc.root_kind(), root, body) {
            if let Some(version) = recorded {
                warn!(root_type = doc.root_kind(), %root, version, error = %err, "document write failed, retracting history record");
                if let Err(retract) = self.history.retract(doc.root_kind(), root, version) {
                    warn!(%root, version, error = %retract, "retraction failed");
                    return Err(retract.into());
                }
            }
            return Err(err.into());
        }

        doc.commit();
        self.tracker.after_save(doc, recorded)?;
        Ok(recorded)
    }

    /// Every recorded version of the document's root, oldest first.
    pub fn versions(&self, doc: &Document) -> Result<Vec<HistoryRecord>, TrackError> {
        Ok(self.history.query(doc.root_kind(), doc.root())?)
    }

    pub fn version_at(&self, doc: &Document, version: u64) -> Result<Option<HistoryRecord>, TrackError> {
        Ok(self.history.query_at(doc.root_kind(), doc.root(), version)?)
    }

    /// Rebuild a stored root document. `None` if nothing is stored under
    /// that id.
    pub fn load(
        &self,
        schema: Arc<Schema>,
        kind: &str,
        id: EntityId,
    ) -> Result<Option<Document>, TrackError> {
        let Some(body) = self.documents.get(kind, id)? else {
            return Ok(None);
        };
        Ok(Some(Document::from_snapshot(schema, kind, &body)?))
    }
}
