//! Anchors, signed configuration directories and their verification.
//!
//! This crate is the pure core of the configuration pipeline. Given the
//! bytes of a downloaded directory and the anchor it was fetched through,
//! it answers one question: which files, if any, may be trusted. It performs
//! no network or filesystem I/O apart from reading anchor files.
//!
//! # Core types
//!
//! - [`ConfigurationAnchor`]: operator-provided root of trust
//! - [`ConfigurationLocation`]: one fetch target resolved from an anchor
//! - [`ConfigurationDirectory`]: a strictly parsed, unverified document
//! - [`VerifiedDirectory`]: the files that passed both verification stages
//!
//! # Verification order
//!
//! 1. [`verify_signature`]: the signature must verify under any anchor
//!    certificate.
//! 2. [`verify_parts`]: per file: hash, expiration, version downgrade.

pub mod anchor;
pub mod document;
pub mod error;
pub mod params;
pub mod verify;
pub mod writer;

pub use anchor::{
    certificate_id, resolve_locations, validate_instance_identifier, AnchorSource,
    ConfigurationAnchor, ConfigurationLocation, TrustedCertificate,
};
pub use document::{ConfigurationDirectory, ConfigurationFile, HashAlgorithm, SignatureAlgorithm};
pub use error::{AnchorError, ParamsError, ParseError, VerifyError};
pub use params::PrivateParameters;
pub use verify::{
    verify, verify_parts, verify_signature, KnownVersions, SignedDirectory, VerifiedDirectory,
    VerifyOptions,
};
pub use writer::{seal, DirectoryWriter};
