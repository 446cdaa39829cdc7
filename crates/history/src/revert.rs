use crate::error::TrackError;
use crate::repository::Repository;
use tracing::{debug, info};
use verso_common::{ID_FIELD, VERSION_FIELD};
use verso_kernel::Document;
use verso_persist::{DocumentStore, HistoryStore};

impl<D: DocumentStore, H: HistoryStore> Repository<D, H> {
    /// Restore the document's root tree to a recorded version and save it as
    /// a new version.
    ///
    /// `target` defaults to the version before the current one. A target with
    /// no record leaves the document untouched and returns `Ok(None)`.
    /// Otherwise returns the version the revert produced.
    pub fn revert(&mut self, doc: &mut Document, target: Option<u64>) -> Result<Option<u64>, TrackError> {
        let current = doc.version().unwrap_or(0);
        let Some(target) = target.or_else(|| current.checked_sub(1)) else {
            return Ok(None);
        };
        let Some(record) = self.version_at(doc, target)? else {
            debug!(root = %doc.root(), target, "no recorded version to revert to");
            return Ok(None);
        };

        let mut preserve = vec![ID_FIELD, VERSION_FIELD];
        let excluded = self.tracker().config().snapshot_excluded_fields.clone();
        preserve.extend(excluded.iter().map(String::as_str));

        let checkpoint = doc.clone();
        let root = doc.root();
        if let Err(err) = doc.restore(root, &record.full_attributes, &preserve) {
            *doc = checkpoint;
            return Err(err.into());
        }
        info!(root = %root, from = current, to = target, "reverting document");
        match self.save(doc, root) {
            Ok(version) => Ok(version),
            Err(err) => {
                *doc = checkpoint;
                Err(err)
            }
        }
    }
}
