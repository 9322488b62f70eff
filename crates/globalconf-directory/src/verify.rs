//! Two-stage verification of a parsed configuration directory.
//!
//! Stage one establishes the signer: the directory signature must verify
//! under at least one certificate of the anchor. Stage two checks each file
//! for integrity and freshness. The stages are chained through the
//! [`SignedDirectory`] type, so freshness checks can only ever run on a
//! directory whose signer has been established.
//!
//! Verification performs no I/O and mutates nothing. The daemon and the
//! one-shot validation tooling run exactly the same checks.

use crate::anchor::{ConfigurationAnchor, TrustedCertificate};
use crate::document::{ConfigurationDirectory, ConfigurationFile};
use crate::error::VerifyError;
use chrono::{DateTime, Utc};
use ed25519_dalek::Signature;
use globalconf_types::ContentId;

/// Versions already accepted for each `(instance, content)` pair.
pub trait KnownVersions {
    fn known_version(&self, instance: &str, content_id: &ContentId) -> Option<u32>;
}

/// Nothing has been accepted before.
impl KnownVersions for () {
    fn known_version(&self, _instance: &str, _content_id: &ContentId) -> Option<u32> {
        None
    }
}

/// Freshness policy for stage two.
#[derive(Debug, Clone, Copy)]
pub struct VerifyOptions {
    pub now: DateTime<Utc>,
    /// Accept files past their expiration date. Only diagnostic tooling
    /// sets this; the scheduled daemon never does.
    pub accept_expired: bool,
}

impl VerifyOptions {
    pub fn at(now: DateTime<Utc>) -> Self {
        Self {
            now,
            accept_expired: false,
        }
    }

    pub fn accept_expired(mut self, accept: bool) -> Self {
        self.accept_expired = accept;
        self
    }
}

/// A directory whose signature verified against the anchor.
#[derive(Debug, Clone)]
pub struct SignedDirectory {
    directory: ConfigurationDirectory,
    signer: TrustedCertificate,
}

impl SignedDirectory {
    /// The anchor certificate that validated the signature.
    pub fn signer(&self) -> &TrustedCertificate {
        &self.signer
    }

    pub fn files(&self) -> &[ConfigurationFile] {
        self.directory.files()
    }
}

/// A directory that passed both verification stages.
#[derive(Debug, Clone)]
pub struct VerifiedDirectory {
    files: Vec<ConfigurationFile>,
    signer: TrustedCertificate,
}

impl VerifiedDirectory {
    /// Files in declared order.
    pub fn files(&self) -> &[ConfigurationFile] {
        &self.files
    }

    pub fn into_files(self) -> Vec<ConfigurationFile> {
        self.files
    }

    pub fn signer(&self) -> &TrustedCertificate {
        &self.signer
    }

    pub fn content_ids(&self) -> impl Iterator<Item = &ContentId> {
        self.files.iter().map(|f| &f.content_id)
    }

    pub fn find(&self, content_id: &ContentId) -> Option<&ConfigurationFile> {
        self.files.iter().find(|f| &f.content_id == content_id)
    }

    /// Keeps only the files matching `keep`, preserving order.
    pub fn retain(&mut self, keep: impl FnMut(&ConfigurationFile) -> bool) {
        self.files.retain(keep);
    }
}

/// Stage one: checks the directory signature against the anchor.
///
/// Any anchor certificate that validates the signature is sufficient.
pub fn verify_signature(
    directory: ConfigurationDirectory,
    anchor: &ConfigurationAnchor,
) -> Result<SignedDirectory, VerifyError> {
    let invalid = || VerifyError::SignatureInvalid {
        certificates: anchor.certificates.len(),
    };

    let signature = Signature::from_slice(directory.signature()).map_err(|_| invalid())?;
    let signer = anchor
        .certificates
        .iter()
        .find(|cert| {
            cert.verifying_key()
                .verify_strict(directory.signed_data(), &signature)
                .is_ok()
        })
        .cloned()
        .ok_or_else(invalid)?;

    if signer.id() != directory.signer_certificate_hash() {
        tracing::warn!(
            declared = directory.signer_certificate_hash(),
            actual = signer.id(),
            "directory references a different certificate than the one that verified it"
        );
    }
    tracing::debug!(
        instance = %anchor.instance_identifier,
        signer = signer.subject(),
        "directory signature verified"
    );

    Ok(SignedDirectory { directory, signer })
}

/// Stage two: checks hash, expiration and version of every file in order.
pub fn verify_parts(
    signed: SignedDirectory,
    options: &VerifyOptions,
    known: &impl KnownVersions,
) -> Result<VerifiedDirectory, VerifyError> {
    for file in signed.directory.files() {
        let computed = file.computed_hash();
        if computed != file.declared_hash {
            return Err(VerifyError::HashMismatch {
                content_id: file.content_id.clone(),
                declared: file.declared_hash.clone(),
                computed,
            });
        }

        if file.expires_at <= options.now {
            if !options.accept_expired {
                return Err(VerifyError::Expired {
                    content_id: file.content_id.clone(),
                    instance: file.instance.clone(),
                    expired_at: file.expires_at,
                });
            }
            tracing::warn!(
                content_id = %file.content_id,
                instance = %file.instance,
                expired_at = %file.expires_at,
                "accepting expired configuration file"
            );
        }

        if let Some(recorded) = known.known_version(&file.instance, &file.content_id) {
            if file.version < recorded {
                return Err(VerifyError::StaleVersion {
                    content_id: file.content_id.clone(),
                    instance: file.instance.clone(),
                    offered: file.version,
                    recorded,
                });
            }
        }
    }

    Ok(VerifiedDirectory {
        files: signed.directory.into_files(),
        signer: signed.signer,
    })
}

/// Runs both stages.
pub fn verify(
    directory: ConfigurationDirectory,
    anchor: &ConfigurationAnchor,
    options: &VerifyOptions,
    known: &impl KnownVersions,
) -> Result<VerifiedDirectory, VerifyError> {
    let signed = verify_signature(directory, anchor)?;
    verify_parts(signed, options, known)
}
