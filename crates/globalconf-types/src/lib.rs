//! Shared types and exit codes for the global configuration client.
//!
//! This crate holds the vocabulary every other crate in the workspace speaks:
//! content identifiers of the parts inside a configuration directory, the
//! extra content requirements checked by validation tooling, and the
//! [`Outcome`] of a refresh cycle together with its process exit code.
//!
//! No crate in the workspace depends on anything *except* `globalconf-types`
//! for these cross-cutting definitions, which keeps the dependency graph
//! strictly layered.

mod content;
mod outcome;

pub use content::{ContentId, ContentIdError, ContentRequirement};
pub use outcome::{exit_code, Outcome};

/// Name of the index file recording every downloaded configuration part.
pub const DOWNLOADED_FILES_INDEX: &str = "files.json";

/// Name of the file holding the primary instance identifier.
pub const INSTANCE_IDENTIFIER_FILE: &str = "instance-identifier";

/// Suffix appended to a part path for its metadata sidecar.
pub const METADATA_SUFFIX: &str = ".metadata";
