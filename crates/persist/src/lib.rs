//! Persistence: history records, version sequencing and the document store
//! seam.
//!
//! # Invariants
//! - History is append-only; a record is never modified once stored.
//! - Versions of a root are unique; a duplicate append is an error.
//! - File-backed records are content-hashed in a verifiable chain.

pub mod documents;
pub mod error;
pub mod history;
pub mod sequencer;
pub mod store;

pub use documents::{DocumentStore, MemoryDocumentStore};
pub use error::StoreError;
pub use history::{HistoryRecord, HistoryStore, MemoryHistoryStore};
pub use sequencer::next_version;
pub use store::{FileHistoryStore, HistoryMeta, IntegrityManifest, ManifestEntry};
