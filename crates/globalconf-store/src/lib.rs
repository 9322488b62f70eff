//! Durable storage for verified configuration.
//!
//! [`ConfigurationStore`] lays verified parts out on disk and
//! [`DownloadedFiles`] remembers what was stored, through which source, and
//! at which version. Only files that passed verification should ever reach
//! this crate.

mod error;
mod fs;
pub mod index;
pub mod store;

pub use error::StoreError;
pub use index::{relative_part_path, DownloadedFile, DownloadedFiles};
pub use store::{CommitSummary, ConfigurationStore, PartMetadata};
