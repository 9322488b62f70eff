//! Error types for the persistence layer.

use std::path::PathBuf;

/// Errors that can occur while persisting configuration or its index.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A filesystem operation failed.
    #[error("store I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The index or a metadata sidecar could not be (de)serialized.
    #[error("store serialization error on {}: {source}", .path.display())]
    Serialization {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// An instance identifier cannot be used as a directory name.
    #[error("refusing to store files for instance {0:?}")]
    InvalidInstance(String),
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
