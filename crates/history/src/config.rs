use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::OnceLock;
use verso_common::{CREATED_AT_FIELD, UPDATED_AT_FIELD};

static GLOBAL: OnceLock<TrackingConfig> = OnceLock::new();

/// Errors from loading or installing a tracking configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("a global tracking configuration is already installed")]
    AlreadyInstalled,
}

/// How history tracking behaves. Immutable once handed to a tracker.
///
/// ```yaml
/// track_history_by_default: true
/// diff_excluded_fields: [created_at, updated_at]
/// snapshot_excluded_fields: []
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingConfig {
    /// Whether a node whose flag is `Inherit` produces versions.
    pub track_history_by_default: bool,
    /// Never reported in a diff, at any depth.
    pub diff_excluded_fields: Vec<String>,
    /// Bookkeeping fields left out of snapshots, at any depth.
    pub snapshot_excluded_fields: Vec<String>,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            track_history_by_default: true,
            diff_excluded_fields: vec![CREATED_AT_FIELD.into(), UPDATED_AT_FIELD.into()],
            snapshot_excluded_fields: Vec::new(),
        }
    }
}

impl TrackingConfig {
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::from_yaml_str(&std::fs::read_to_string(path)?)
    }

    /// Install the process-wide default. Call once at startup, before any
    /// call to [`TrackingConfig::global`].
    pub fn install_global(self) -> Result<(), ConfigError> {
        GLOBAL.set(self).map_err(|_| ConfigError::AlreadyInstalled)
    }

    /// The installed process-wide default, or the built-in defaults if none
    /// was installed.
    pub fn global() -> &'static TrackingConfig {
        GLOBAL.get_or_init(TrackingConfig::default)
    }

    /// Fields the diff engine drops. Snapshot exclusions are included so a
    /// diff never mentions a field its snapshots cannot show.
    pub fn diff_exclusions(&self) -> Vec<String> {
        let mut fields = self.diff_excluded_fields.clone();
        for field in &self.snapshot_excluded_fields {
            if !fields.contains(field) {
                fields.push(field.clone());
            }
        }
        fields
    }
}
