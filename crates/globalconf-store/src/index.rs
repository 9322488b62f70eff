//! The `DownloadedFiles` index.
//!
//! Records every configuration file the client has accepted: where it is
//! stored, which source it came through, when it expires and which version
//! it carries. The index drives stale-file deletion and downgrade
//! protection. It is owned by whichever refresh cycle is running and is
//! saved back to disk before the cycle ends.

use crate::error::StoreError;
use crate::fs::write_atomic;
use chrono::{DateTime, Utc};
use globalconf_directory::KnownVersions;
use globalconf_types::ContentId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// One accepted configuration file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadedFile {
    /// Instance identifier of the anchor the file was fetched through.
    pub source: String,
    /// Instance the content belongs to.
    pub instance: String,
    pub content_id: ContentId,
    /// Path relative to the configuration root, `/`-separated.
    pub path: String,
    pub expires_at: DateTime<Utc>,
    pub version: u32,
    pub hash: String,
}

#[derive(Serialize, Deserialize)]
struct IndexFile {
    files: Vec<DownloadedFile>,
}

/// Relative path of a part, derived from its instance and content identifier.
pub fn relative_part_path(instance: &str, content_id: &ContentId) -> String {
    format!("{}/{}", instance, content_id.file_name())
}

/// Index of accepted configuration files keyed by relative path.
#[derive(Debug, Clone, Default)]
pub struct DownloadedFiles {
    location: Option<PathBuf>,
    entries: BTreeMap<String, DownloadedFile>,
}

impl DownloadedFiles {
    /// Loads the index from `path`. A missing file yields an empty index
    /// that will be created on the first save.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let entries = match std::fs::read(&path) {
            Ok(bytes) => {
                let file: IndexFile = serde_json::from_slice(&bytes).map_err(|source| {
                    StoreError::Serialization {
                        path: path.clone(),
                        source,
                    }
                })?;
                file.files
                    .into_iter()
                    .map(|entry| (entry.path.clone(), entry))
                    .collect()
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "downloaded files index not found, starting empty");
                BTreeMap::new()
            }
            Err(e) => return Err(StoreError::io(path, e)),
        };

        Ok(Self {
            location: Some(path),
            entries,
        })
    }

    /// An index that is never read from or written to disk.
    ///
    /// Used by one-shot entry modes that must not touch daemon state.
    pub fn detached() -> Self {
        Self::default()
    }

    pub fn location(&self) -> Option<&Path> {
        self.location.as_deref()
    }

    /// Atomically writes the index back to its location, if it has one.
    pub fn save(&self) -> Result<(), StoreError> {
        let Some(path) = &self.location else {
            return Ok(());
        };
        let file = IndexFile {
            files: self.entries.values().cloned().collect(),
        };
        let bytes =
            serde_json::to_vec_pretty(&file).map_err(|source| StoreError::Serialization {
                path: path.clone(),
                source,
            })?;
        write_atomic(path, &bytes)?;
        tracing::debug!(path = %path.display(), entries = self.entries.len(), "saved downloaded files index");
        Ok(())
    }

    pub fn get(&self, path: &str) -> Option<&DownloadedFile> {
        self.entries.get(path)
    }

    /// Entries ordered by relative path.
    pub fn entries(&self) -> impl Iterator<Item = &DownloadedFile> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Records or replaces the entry for `file.path`.
    pub fn record(&mut self, file: DownloadedFile) {
        self.entries.insert(file.path.clone(), file);
    }

    pub fn remove(&mut self, path: &str) -> Option<DownloadedFile> {
        self.entries.remove(path)
    }

    /// Entries fetched through `source` whose path is not in `keep`.
    pub fn stale_entries<'a>(&'a self, source: &'a str, keep: &'a [String]) -> Vec<DownloadedFile> {
        self.entries
            .values()
            .filter(|entry| entry.source == source && !keep.contains(&entry.path))
            .cloned()
            .collect()
    }

    /// Entries whose source is not in `sources`.
    pub fn entries_outside(&self, sources: &[&str]) -> Vec<DownloadedFile> {
        self.entries
            .values()
            .filter(|entry| !sources.contains(&entry.source.as_str()))
            .cloned()
            .collect()
    }
}

impl KnownVersions for DownloadedFiles {
    fn known_version(&self, instance: &str, content_id: &ContentId) -> Option<u32> {
        self.entries
            .get(&relative_part_path(instance, content_id))
            .map(|entry| entry.version)
    }
}
