//! Document kernel: schema registry, document trees, dirty tracking and the
//! per-node track flags the history engine reads.
//!
//! # Invariants
//! - Every node carries its `_id` attribute from creation.
//! - All mutations flow through explicit `Document` operations.
//! - `changes()` is relative to the last `commit()`.

pub mod document;
pub mod schema;
pub mod tracked;

pub use document::{Document, DocumentError, Fields, Node, ParentLink, TrackFlag};
pub use schema::{Cardinality, Embedding, RelationDescriptor, Schema, SchemaError, TypeDescriptor};
pub use tracked::{NodeRef, TrackedEntity};
