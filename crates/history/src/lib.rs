//! Version history for document trees.
//!
//! Every tracked save of a document appends one immutable record to its
//! root's history: the full tree snapshot plus the structural diff that
//! produced it. Saves that start at an embedded node are routed to the root,
//! so one logical mutation yields exactly one version. A root can be reverted
//! to any recorded version, which itself is saved as a new version.
//!
//! # Invariants
//! - A root's versions are the contiguous sequence 1..N and its `version`
//!   field is N.
//! - `full_attributes` of version V is the exact post-save tree at V.
//! - `altered_attributes` of version V equals [`diff::between`] applied to
//!   the snapshots of V-1 and V.
//! - The version field and its record are persisted together or not at all.

pub mod config;
pub mod diff;
pub mod error;
pub mod repository;
mod revert;
pub mod snapshot;
pub mod tracker;

#[cfg(test)]
mod fixtures;

pub use config::{ConfigError, TrackingConfig};
pub use error::TrackError;
pub use repository::Repository;
pub use tracker::Tracker;
