use crate::config::TrackingConfig;
use crate::diff::changes_with_relations;
use crate::error::TrackError;
use crate::snapshot::attributes_with_relations;
use chrono::Utc;
use serde_json::Value;
use tracing::debug;
use verso_common::{EntityId, VERSION_FIELD};
use verso_kernel::{Document, DocumentError, TrackFlag, TrackedEntity};
use verso_persist::{HistoryRecord, HistoryStore, next_version};

/// Routes every save in a document tree to exactly one history record on its
/// root.
#[derive(Debug, Clone, Default)]
pub struct Tracker {
    config: TrackingConfig,
}

impl Tracker {
    pub fn new(config: TrackingConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &TrackingConfig {
        &self.config
    }

    /// Whether a save starting at `origin` produces a version.
    ///
    /// Walks from `origin` to the root: any `Suppressed` node turns tracking
    /// off, otherwise any `Enabled` node turns it on, otherwise the
    /// configured default applies.
    pub fn should_track(&self, doc: &Document, origin: EntityId) -> Result<bool, TrackError> {
        let entity = doc
            .entity(origin)
            .ok_or(DocumentError::NodeNotFound(origin))?;
        let path = entity.ancestry();
        if path.iter().any(|e| e.track_flag() == TrackFlag::Suppressed) {
            return Ok(false);
        }
        if path.iter().any(|e| e.track_flag() == TrackFlag::Enabled) {
            return Ok(true);
        }
        Ok(self.config.track_history_by_default)
    }

    /// Before-save hook. Records a new version of the root when the save is
    /// tracked and writes that version into the root.
    ///
    /// Must run after timestamps are stamped and before the document write.
    pub fn before_save<H: HistoryStore + ?Sized>(
        &self,
        history: &mut H,
        doc: &mut Document,
        origin: EntityId,
    ) -> Result<Option<u64>, TrackError> {
        if !self.should_track(doc, origin)? {
            debug!(root = %doc.root(), %origin, "history tracking suppressed for save");
            return Ok(None);
        }

        let root_id = doc.root();
        let root = doc
            .entity(root_id)
            .ok_or(DocumentError::NodeNotFound(root_id))?;
        let root_type = root.kind().to_string();
        let version = next_version(&*history, &root_type, root_id)?;

        let mut altered = changes_with_relations(root, &self.config.diff_exclusions());
        let previous = root
            .committed_attributes()
            .get(VERSION_FIELD)
            .cloned()
            .unwrap_or(Value::Null);
        altered.insert(
            VERSION_FIELD.to_string(),
            Value::Array(vec![previous, Value::from(version)]),
        );
        let mut full = attributes_with_relations(root, &self.config.snapshot_excluded_fields);
        full.insert(VERSION_FIELD.to_string(), Value::from(version));

        history.append(HistoryRecord {
            original_type: root_type.clone(),
            original_id: root_id,
            version,
            altered_attributes: altered,
            full_attributes: full,
            created_at: Utc::now(),
        })?;
        doc.set_version(version);
        debug!(root_type = %root_type, root = %root_id, version, %origin, "recorded version");
        Ok(Some(version))
    }

    /// After-save hook. A version-producing save hands the root's flag back
    /// to the configured default.
    pub fn after_save(&self, doc: &mut Document, recorded: Option<u64>) -> Result<(), TrackError> {
        if recorded.is_some() {
            let root = doc.root();
            doc.set_track_flag(root, TrackFlag::Inherit)?;
        }
        Ok(())
    }
}
