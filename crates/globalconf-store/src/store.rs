//! On-disk layout of downloaded configuration.
//!
//! ```text
//! <root>/files.json                      index
//! <root>/instance-identifier             primary instance
//! <root>/<INSTANCE>/<content-id>         content
//! <root>/<INSTANCE>/<content-id>.metadata
//! ```
//!
//! Every write goes through a temporary file and a rename. Within one
//! source, all new parts are written before any stale part is removed.

use crate::error::StoreError;
use crate::fs::{remove_dir_if_empty, remove_file_if_exists, write_atomic};
use crate::index::{relative_part_path, DownloadedFile, DownloadedFiles};
use chrono::{DateTime, Utc};
use globalconf_directory::{validate_instance_identifier, ConfigurationFile, HashAlgorithm};
use globalconf_types::{ContentId, DOWNLOADED_FILES_INDEX, INSTANCE_IDENTIFIER_FILE, METADATA_SUFFIX};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Sidecar describing a stored part.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartMetadata {
    pub content_id: ContentId,
    pub instance: String,
    pub expires_at: DateTime<Utc>,
    pub version: u32,
    pub hash_algorithm: String,
    pub hash: String,
}

impl PartMetadata {
    fn for_file(file: &ConfigurationFile, hash: &str) -> Self {
        Self {
            content_id: file.content_id.clone(),
            instance: file.instance.clone(),
            expires_at: file.expires_at,
            version: file.version,
            hash_algorithm: file.hash_algorithm.id().to_string(),
            hash: hash.to_string(),
        }
    }
}

/// What one source commit changed, as relative paths.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CommitSummary {
    pub persisted: Vec<String>,
    pub deleted: Vec<String>,
}

/// Configuration directory on disk.
#[derive(Debug, Clone)]
pub struct ConfigurationStore {
    root: PathBuf,
}

impl ConfigurationStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Location of the `DownloadedFiles` index for this store.
    pub fn index_path(&self) -> PathBuf {
        self.root.join(DOWNLOADED_FILES_INDEX)
    }

    /// Absolute path of the content of `(instance, content_id)`.
    pub fn part_path(&self, instance: &str, content_id: &ContentId) -> PathBuf {
        self.root.join(instance).join(content_id.file_name())
    }

    pub fn metadata_path(&self, instance: &str, content_id: &ContentId) -> PathBuf {
        self.root
            .join(instance)
            .join(format!("{}{}", content_id.file_name(), METADATA_SUFFIX))
    }

    /// Writes one verified part and its sidecar.
    ///
    /// Content whose hash already matches the file on disk is left alone;
    /// the sidecar is rewritten only when it differs.
    pub fn persist(
        &self,
        source: &str,
        file: &ConfigurationFile,
    ) -> Result<DownloadedFile, StoreError> {
        validate_instance_identifier(&file.instance)
            .map_err(|_| StoreError::InvalidInstance(file.instance.clone()))?;

        let path = self.part_path(&file.instance, &file.content_id);
        let hash = file.computed_hash();

        if existing_hash(&path, file.hash_algorithm).as_deref() == Some(hash.as_str()) {
            tracing::debug!(
                instance = %file.instance,
                content_id = %file.content_id,
                "content unchanged, skipping write"
            );
        } else {
            write_atomic(&path, &file.content)?;
            tracing::info!(
                instance = %file.instance,
                content_id = %file.content_id,
                version = file.version,
                path = %path.display(),
                "stored configuration part"
            );
        }

        let metadata = PartMetadata::for_file(file, &hash);
        if self.read_metadata(&file.instance, &file.content_id).ok().flatten() != Some(metadata.clone()) {
            let metadata_path = self.metadata_path(&file.instance, &file.content_id);
            let bytes = serde_json::to_vec_pretty(&metadata).map_err(|source| {
                StoreError::Serialization {
                    path: metadata_path.clone(),
                    source,
                }
            })?;
            write_atomic(&metadata_path, &bytes)?;
        }

        Ok(DownloadedFile {
            source: source.to_string(),
            instance: file.instance.clone(),
            content_id: file.content_id.clone(),
            path: relative_part_path(&file.instance, &file.content_id),
            expires_at: file.expires_at,
            version: file.version,
            hash,
        })
    }

    /// Reads the sidecar of a stored part, if there is one.
    pub fn read_metadata(
        &self,
        instance: &str,
        content_id: &ContentId,
    ) -> Result<Option<PartMetadata>, StoreError> {
        let path = self.metadata_path(instance, content_id);
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StoreError::io(path, e)),
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|source| StoreError::Serialization { path, source })
    }

    /// Deletes a stored part and its sidecar. Missing files are ignored.
    pub fn remove(&self, entry: &DownloadedFile) -> Result<(), StoreError> {
        remove_file_if_exists(&self.part_path(&entry.instance, &entry.content_id))?;
        remove_file_if_exists(&self.metadata_path(&entry.instance, &entry.content_id))?;

        remove_dir_if_empty(&self.root.join(&entry.instance));

        tracing::info!(
            instance = %entry.instance,
            content_id = %entry.content_id,
            source = %entry.source,
            "removed stale configuration part"
        );
        Ok(())
    }

    pub fn write_instance_identifier(&self, instance: &str) -> Result<(), StoreError> {
        write_atomic(&self.root.join(INSTANCE_IDENTIFIER_FILE), instance.as_bytes())
    }

    pub fn read_instance_identifier(&self) -> Result<Option<String>, StoreError> {
        let path = self.root.join(INSTANCE_IDENTIFIER_FILE);
        match std::fs::read_to_string(&path) {
            Ok(s) => Ok(Some(s.trim().to_string())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::io(path, e)),
        }
    }

    /// Persists every file of one source, then deletes the entries of that
    /// source the new files no longer contain.
    ///
    /// The first failed write aborts the commit before anything is deleted.
    /// Entries of other sources are never touched.
    pub fn commit_source(
        &self,
        index: &mut DownloadedFiles,
        source: &str,
        files: &[ConfigurationFile],
    ) -> Result<CommitSummary, StoreError> {
        let mut summary = CommitSummary::default();

        for file in files {
            let entry = self.persist(source, file)?;
            summary.persisted.push(entry.path.clone());
            index.record(entry);
        }

        for stale in index.stale_entries(source, &summary.persisted) {
            self.remove(&stale)?;
            index.remove(&stale.path);
            summary.deleted.push(stale.path);
        }

        Ok(summary)
    }

    /// Deletes every entry whose source is not in `keep_sources`.
    pub fn retire_sources(
        &self,
        index: &mut DownloadedFiles,
        keep_sources: &[&str],
    ) -> Result<Vec<String>, StoreError> {
        let mut deleted = Vec::new();
        for entry in index.entries_outside(keep_sources) {
            self.remove(&entry)?;
            index.remove(&entry.path);
            deleted.push(entry.path);
        }
        if !deleted.is_empty() {
            tracing::info!(count = deleted.len(), "retired parts of undeclared sources");
        }
        Ok(deleted)
    }
}

/// Hash of the content currently stored at `path`. Unreadable content is
/// treated as absent and will be rewritten.
fn existing_hash(path: &Path, algorithm: HashAlgorithm) -> Option<String> {
    std::fs::read(path)
        .ok()
        .map(|bytes| algorithm.digest_hex(&bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn part(instance: &str, content_id: ContentId, content: &[u8]) -> ConfigurationFile {
        ConfigurationFile {
            content_id,
            instance: instance.to_string(),
            content: content.to_vec(),
            expires_at: Utc::now() + Duration::hours(1),
            version: 2,
            hash_algorithm: HashAlgorithm::Sha256,
            declared_hash: HashAlgorithm::Sha256.digest_hex(content),
        }
    }

    #[test]
    fn layout_is_derived_from_instance_and_content() {
        let store = ConfigurationStore::new("/conf");
        assert_eq!(
            store.part_path("EE", &ContentId::SharedParameters),
            PathBuf::from("/conf/EE/shared-parameters")
        );
        assert_eq!(
            store.metadata_path("EE", &ContentId::PrivateParameters),
            PathBuf::from("/conf/EE/private-parameters.metadata")
        );
        assert_eq!(store.index_path(), PathBuf::from("/conf/files.json"));
    }

    #[test]
    fn persist_writes_content_and_sidecar() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigurationStore::new(dir.path());
        let file = part("EE", ContentId::SharedParameters, b"<shared/>");

        let entry = store.persist("EE", &file).unwrap();
        assert_eq!(entry.path, "EE/shared-parameters");
        assert_eq!(
            std::fs::read(store.part_path("EE", &ContentId::SharedParameters)).unwrap(),
            b"<shared/>"
        );
        let metadata = store
            .read_metadata("EE", &ContentId::SharedParameters)
            .unwrap()
            .unwrap();
        assert_eq!(metadata.version, 2);
        assert_eq!(metadata.hash, entry.hash);
        assert_eq!(metadata.hash_algorithm, "SHA-256");
    }

    #[test]
    fn persist_refuses_unsafe_instance() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigurationStore::new(dir.path());
        let file = part("..", ContentId::SharedParameters, b"x");
        assert!(matches!(
            store.persist("EE", &file),
            Err(StoreError::InvalidInstance(_))
        ));
    }

    #[test]
    fn instance_directory_goes_with_its_last_part() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigurationStore::new(dir.path());
        let shared = store
            .persist("EE", &part("EE", ContentId::SharedParameters, b"<shared/>"))
            .unwrap();
        let private = store
            .persist("EE", &part("EE", ContentId::PrivateParameters, b"{}"))
            .unwrap();

        store.remove(&shared).unwrap();
        assert!(dir.path().join("EE").is_dir());
        assert!(store.part_path("EE", &ContentId::PrivateParameters).exists());

        store.remove(&private).unwrap();
        assert!(!dir.path().join("EE").exists());

        // Removing again finds neither files nor directory.
        store.remove(&private).unwrap();
    }

    #[test]
    fn instance_identifier_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigurationStore::new(dir.path());
        assert_eq!(store.read_instance_identifier().unwrap(), None);
        store.write_instance_identifier("EE").unwrap();
        assert_eq!(store.read_instance_identifier().unwrap().as_deref(), Some("EE"));
    }
}
