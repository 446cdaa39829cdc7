use crate::error::StoreError;
use crate::history::HistoryStore;
use verso_common::EntityId;

/// The version the next tracked save of a root will get: the highest stored
/// version plus one, or 1 for a root with no history.
///
/// No locking. Callers serialize writes per root.
pub fn next_version<S: HistoryStore + ?Sized>(
    store: &S,
    root_type: &str,
    root_id: EntityId,
) -> Result<u64, StoreError> {
    Ok(store.latest_version(root_type, root_id)?.unwrap_or(0) + 1)
}
