//! Shared types for the verso workspace: entity identifiers, reserved field
//! names and the timestamp format used by the document layer.

mod types;

pub use types::*;
