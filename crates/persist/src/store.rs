//! File-backed history persistence.
//!
//! Layout inside the store directory:
//! ```text
//! history.meta.json                          - metadata and schema version
//! records/<type>/<id>/
//!   000001.record.cbor.zst                   - CBOR+zstd compressed records
//! integrity/
//!   manifest.json                            - hash chain manifest
//! ```

use crate::error::StoreError;
use crate::history::{HistoryRecord, HistoryStore};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use verso_common::EntityId;

/// Current on-disk schema version.
const HISTORY_SCHEMA_VERSION: u32 = 1;

const RECORD_SUFFIX: &str = ".record.cbor.zst";
const STAGED_SUFFIX: &str = ".staged";

/// Metadata stored in history.meta.json.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryMeta {
    pub history_schema_version: u32,
    pub record_count: u64,
}

/// A single entry in the integrity manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestEntry {
    /// Path relative to `records/`.
    pub filename: String,
    pub sha256: String,
    pub prev_hash: Option<String>,
}

/// Integrity manifest tracking every record hash in a chain.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IntegrityManifest {
    pub entries: Vec<ManifestEntry>,
}

/// File-backed history store with schema versioning and integrity checking.
pub struct FileHistoryStore {
    root: PathBuf,
    meta: HistoryMeta,
    manifest: IntegrityManifest,
}

impl FileHistoryStore {
    /// Open or create a history store at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let root = path.as_ref().to_path_buf();
        std::fs::create_dir_all(root.join("records"))?;
        std::fs::create_dir_all(root.join("integrity"))?;

        let meta_path = root.join("history.meta.json");
        let manifest_path = root.join("integrity").join("manifest.json");

        let (meta, manifest) = if meta_path.exists() {
            let meta: HistoryMeta = serde_json::from_reader(std::fs::File::open(&meta_path)?)?;
            if meta.history_schema_version != HISTORY_SCHEMA_VERSION {
                return Err(StoreError::SchemaMismatch {
                    file_version: meta.history_schema_version,
                    expected_version: HISTORY_SCHEMA_VERSION,
                });
            }
            let manifest: IntegrityManifest = if manifest_path.exists() {
                serde_json::from_reader(std::fs::File::open(&manifest_path)?)?
            } else {
                IntegrityManifest::default()
            };
            (meta, manifest)
        } else {
            let meta = HistoryMeta {
                history_schema_version: HISTORY_SCHEMA_VERSION,
                record_count: 0,
            };
            let manifest = IntegrityManifest::default();
            serde_json::to_writer_pretty(std::fs::File::create(&meta_path)?, &meta)?;
            serde_json::to_writer_pretty(std::fs::File::create(&manifest_path)?, &manifest)?;
            (meta, manifest)
        };

        tracing::info!(path = %root.display(), records = meta.record_count, "opened history store");
        Ok(Self {
            root,
            meta,
            manifest,
        })
    }

    /// Verify every hash in the manifest and the chain linking them.
    pub fn verify_integrity(&self) -> Result<(), StoreError> {
        let mut prev_hash: Option<String> = None;
        for entry in &self.manifest.entries {
            if entry.prev_hash != prev_hash {
                return Err(StoreError::IntegrityMismatch {
                    expected: prev_hash.unwrap_or_else(|| "None".into()),
                    actual: entry
                        .prev_hash
                        .clone()
                        .unwrap_or_else(|| "None".into()),
                });
            }

            let data = std::fs::read(self.root.join("records").join(&entry.filename))?;
            let actual_hash = sha256_hex(&data);
            if actual_hash != entry.sha256 {
                return Err(StoreError::IntegrityMismatch {
                    expected: entry.sha256.clone(),
                    actual: actual_hash,
                });
            }

            prev_hash = Some(entry.sha256.clone());
        }
        Ok(())
    }

    /// Get the path to the store root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Get the metadata.
    pub fn meta(&self) -> &HistoryMeta {
        &self.meta
    }

    /// Every `(type, id)` pair with at least one record.
    pub fn roots(&self) -> Result<Vec<(String, EntityId)>, StoreError> {
        let mut roots = Vec::new();
        for kind in std::fs::read_dir(self.root.join("records"))? {
            let kind = kind?;
            let kind_name = kind.file_name().to_string_lossy().into_owned();
            for id in std::fs::read_dir(kind.path())? {
                if let Ok(id) = id?.file_name().to_string_lossy().parse::<EntityId>() {
                    roots.push((kind_name.clone(), id));
                }
            }
        }
        roots.sort();
        Ok(roots)
    }

    fn relative_dir(root_type: &str, root_id: EntityId) -> Result<String, StoreError> {
        let valid = !root_type.is_empty()
            && root_type
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid {
            return Err(StoreError::InvalidTypeName(root_type.to_string()));
        }
        Ok(format!("{root_type}/{root_id}"))
    }

    fn relative_path(root_type: &str, root_id: EntityId, version: u64) -> Result<String, StoreError> {
        Ok(format!(
            "{}/{:06}{RECORD_SUFFIX}",
            Self::relative_dir(root_type, root_id)?,
            version
        ))
    }

    /// Stored versions of a root, ascending, read from file names only.
    fn versions(&self, root_type: &str, root_id: EntityId) -> Result<Vec<u64>, StoreError> {
        let dir = self
            .root
            .join("records")
            .join(Self::relative_dir(root_type, root_id)?);
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut versions = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let name = entry?.file_name();
            let name = name.to_string_lossy();
            if let Some(version) = name
                .strip_suffix(RECORD_SUFFIX)
                .and_then(|v| v.parse::<u64>().ok())
            {
                versions.push(version);
            }
        }
        versions.sort_unstable();
        Ok(versions)
    }

    fn load_record(&self, relative: &str) -> Result<HistoryRecord, StoreError> {
        let compressed = std::fs::read(self.root.join("records").join(relative))?;
        self.verify_file_hash(relative, &compressed)?;
        let cbor_bytes = zstd_decompress(&compressed)?;
        cbor_deserialize(&cbor_bytes)
    }

    fn verify_file_hash(&self, filename: &str, data: &[u8]) -> Result<(), StoreError> {
        let actual = sha256_hex(data);
        match self.manifest.entries.iter().find(|e| e.filename == filename) {
            Some(entry) if entry.sha256 != actual => Err(StoreError::IntegrityMismatch {
                expected: entry.sha256.clone(),
                actual,
            }),
            Some(_) => Ok(()),
            None => Err(StoreError::IntegrityMismatch {
                expected: format!("manifest entry for {filename}"),
                actual: "none".into(),
            }),
        }
    }

    /// Undo a half-finished append: forget its manifest entry and count and
    /// drop the staged file.
    fn rollback_append(&mut self, staged: &Path) {
        self.manifest.entries.pop();
        self.meta.record_count = self.meta.record_count.saturating_sub(1);
        if staged.exists()
            && let Err(err) = std::fs::remove_file(staged)
        {
            tracing::warn!(path = %staged.display(), error = %err, "could not remove staged record");
        }
        if let Err(err) = self.save_manifest().and_then(|()| self.save_meta()) {
            tracing::warn!(path = %self.root.display(), error = %err, "could not rewrite history metadata after failed append");
        }
    }

    fn save_meta(&self) -> Result<(), StoreError> {
        let path = self.root.join("history.meta.json");
        serde_json::to_writer_pretty(std::fs::File::create(path)?, &self.meta)?;
        Ok(())
    }

    fn save_manifest(&self) -> Result<(), StoreError> {
        let path = self.root.join("integrity").join("manifest.json");
        serde_json::to_writer_pretty(std::fs::File::create(path)?, &self.manifest)?;
        Ok(())
    }
}

impl HistoryStore for FileHistoryStore {
    fn append(&mut self, record: HistoryRecord) -> Result<(), StoreError> {
        let filename =
            Self::relative_path(&record.original_type, record.original_id, record.version)?;
        let path = self.root.join("records").join(&filename);
        if path.exists() {
            return Err(StoreError::DuplicateVersion {
                root_type: record.original_type,
                root_id: record.original_id,
                version: record.version,
            });
        }

        let cbor_bytes = cbor_serialize(&record)?;
        let compressed = zstd_compress(&cbor_bytes)?;

        let hash = sha256_hex(&compressed);
        let prev_hash = self.manifest.entries.last().map(|e| e.sha256.clone());

        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        // `versions` ignores the staged name until the rename.
        let staged = path.with_file_name(format!("{:06}{RECORD_SUFFIX}{STAGED_SUFFIX}", record.version));
        std::fs::write(&staged, &compressed)?;

        self.manifest.entries.push(ManifestEntry {
            filename,
            sha256: hash,
            prev_hash,
        });
        self.meta.record_count += 1;

        let published = self
            .save_manifest()
            .and_then(|()| self.save_meta())
            .and_then(|()| std::fs::rename(&staged, &path).map_err(StoreError::from));
        if let Err(err) = published {
            self.rollback_append(&staged);
            return Err(err);
        }
        Ok(())
    }

    fn query(&self, root_type: &str, root_id: EntityId) -> Result<Vec<HistoryRecord>, StoreError> {
        self.versions(root_type, root_id)?
            .into_iter()
            .map(|v| self.load_record(&Self::relative_path(root_type, root_id, v)?))
            .collect()
    }

    fn query_at(
        &self,
        root_type: &str,
        root_id: EntityId,
        version: u64,
    ) -> Result<Option<HistoryRecord>, StoreError> {
        let relative = Self::relative_path(root_type, root_id, version)?;
        if !self.root.join("records").join(&relative).exists() {
            return Ok(None);
        }
        self.load_record(&relative).map(Some)
    }

    fn latest_version(&self, root_type: &str, root_id: EntityId) -> Result<Option<u64>, StoreError> {
        Ok(self.versions(root_type, root_id)?.last().copied())
    }

    fn retract(
        &mut self,
        root_type: &str,
        root_id: EntityId,
        version: u64,
    ) -> Result<HistoryRecord, StoreError> {
        let relative = Self::relative_path(root_type, root_id, version)?;
        let is_last = self
            .manifest
            .entries
            .last()
            .is_some_and(|e| e.filename == relative);
        if !is_last {
            return Err(StoreError::RetractOutOfOrder {
                root_type: root_type.to_string(),
                root_id,
                version,
            });
        }

        let record = self.load_record(&relative)?;
        std::fs::remove_file(self.root.join("records").join(&relative))?;
        self.manifest.entries.pop();
        self.meta.record_count = self.meta.record_count.saturating_sub(1);
        self.save_meta()?;
        self.save_manifest()?;
        Ok(record)
    }
}

fn cbor_serialize<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, StoreError> {
    let mut buf = Vec::new();
    ciborium::into_writer(value, &mut buf).map_err(|e| StoreError::CborEncode(e.to_string()))?;
    Ok(buf)
}

fn cbor_deserialize<T: for<'de> Deserialize<'de>>(data: &[u8]) -> Result<T, StoreError> {
    ciborium::from_reader(data).map_err(|e| StoreError::CborDecode(e.to_string()))
}

fn zstd_compress(data: &[u8]) -> Result<Vec<u8>, StoreError> {
    let mut encoder = zstd::Encoder::new(Vec::new(), 3)?;
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

fn zstd_decompress(data: &[u8]) -> Result<Vec<u8>, StoreError> {
    let mut decoder = zstd::Decoder::new(data)?;
    let mut buf = Vec::new();
    decoder.read_to_end(&mut buf)?;
    Ok(buf)
}

fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}
