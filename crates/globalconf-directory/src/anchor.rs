//! Configuration anchors and download location resolution.
//!
//! An anchor is the operator-provided root of trust: it names the instance
//! whose configuration is distributed, where that configuration can be
//! downloaded from, and which certificates may sign it. Anchors are
//! immutable once loaded and are shared behind an [`Arc`]; a new anchor
//! replaces the old one wholesale.

use crate::error::AnchorError;
use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::{DateTime, Utc};
use ed25519_dalek::VerifyingKey;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::Arc;
use url::Url;

/// Root of trust for one instance's configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigurationAnchor {
    /// Identifier of the instance that publishes the configuration.
    pub instance_identifier: String,
    /// When the anchor was generated by the publishing instance.
    pub generated_at: DateTime<Utc>,
    /// Download locations, in the order they should be tried.
    pub sources: Vec<AnchorSource>,
    /// Certificates allowed to sign the configuration directory.
    pub certificates: Vec<TrustedCertificate>,
}

/// One download location declared by an anchor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnchorSource {
    pub download_url: Url,
}

/// A certificate trusted to sign configuration directories.
///
/// Only the verification key is modelled; its identifier is the lowercase
/// hex SHA-256 of the raw key bytes and is what signed documents reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "CertificateRecord", into = "CertificateRecord")]
pub struct TrustedCertificate {
    subject: String,
    key: VerifyingKey,
    id: String,
}

/// Wire form of a [`TrustedCertificate`].
#[derive(Serialize, Deserialize)]
struct CertificateRecord {
    #[serde(default)]
    subject: String,
    public_key: String,
}

impl TrustedCertificate {
    pub fn new(subject: impl Into<String>, key: VerifyingKey) -> Self {
        let id = certificate_id(&key);
        Self {
            subject: subject.into(),
            key,
            id,
        }
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn verifying_key(&self) -> &VerifyingKey {
        &self.key
    }

    /// Returns the hex SHA-256 identifier of this certificate.
    pub fn id(&self) -> &str {
        &self.id
    }
}

/// Computes the identifier documents use to reference a signing certificate.
pub fn certificate_id(key: &VerifyingKey) -> String {
    hex::encode(Sha256::digest(key.as_bytes()))
}

impl TryFrom<CertificateRecord> for TrustedCertificate {
    type Error = AnchorError;

    fn try_from(record: CertificateRecord) -> Result<Self, Self::Error> {
        let bytes = STANDARD
            .decode(record.public_key.trim())
            .map_err(|e| AnchorError::InvalidCertificate(e.to_string()))?;
        let bytes: [u8; 32] = bytes.as_slice().try_into().map_err(|_| {
            AnchorError::InvalidCertificate(format!(
                "public key must be 32 bytes, found {}",
                bytes.len()
            ))
        })?;
        let key = VerifyingKey::from_bytes(&bytes)
            .map_err(|e| AnchorError::InvalidCertificate(e.to_string()))?;
        Ok(Self::new(record.subject, key))
    }
}

impl From<TrustedCertificate> for CertificateRecord {
    fn from(cert: TrustedCertificate) -> Self {
        Self {
            subject: cert.subject,
            public_key: STANDARD.encode(cert.key.as_bytes()),
        }
    }
}

impl ConfigurationAnchor {
    /// Loads and validates an anchor from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, AnchorError> {
        let contents = std::fs::read(path.as_ref())?;
        Self::from_json(&contents)
    }

    /// Parses and validates an anchor from JSON bytes.
    pub fn from_json(bytes: &[u8]) -> Result<Self, AnchorError> {
        let anchor: Self = serde_json::from_slice(bytes)?;
        anchor.validate()?;
        Ok(anchor)
    }

    /// Serializes the anchor as pretty-printed JSON.
    pub fn to_json(&self) -> Result<Vec<u8>, AnchorError> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    /// Checks the invariants that serde alone cannot express.
    ///
    /// An empty location list is *not* rejected here; it is reported by
    /// [`resolve_locations`] when a cycle tries to use the anchor.
    pub fn validate(&self) -> Result<(), AnchorError> {
        validate_instance_identifier(&self.instance_identifier)?;
        if self.certificates.is_empty() {
            return Err(AnchorError::NoCertificates(
                self.instance_identifier.clone(),
            ));
        }
        for source in &self.sources {
            match source.download_url.scheme() {
                "http" | "https" => {}
                other => return Err(AnchorError::UnsupportedScheme(other.to_string())),
            }
        }
        Ok(())
    }

    /// Returns the trusted certificate with the given identifier.
    pub fn certificate(&self, id: &str) -> Option<&TrustedCertificate> {
        self.certificates.iter().find(|cert| cert.id() == id)
    }
}

/// Checks that an instance identifier is usable as a single path component.
pub fn validate_instance_identifier(instance: &str) -> Result<(), AnchorError> {
    let valid = !instance.is_empty()
        && instance != "."
        && instance != ".."
        && instance
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(AnchorError::InvalidInstanceIdentifier(instance.to_string()))
    }
}

/// A fetch target: one URL together with the anchor that vouches for it.
#[derive(Debug, Clone)]
pub struct ConfigurationLocation {
    pub url: Url,
    pub anchor: Arc<ConfigurationAnchor>,
}

impl ConfigurationLocation {
    pub fn instance_identifier(&self) -> &str {
        &self.anchor.instance_identifier
    }
}

/// Resolves the ordered list of locations to try for an anchor.
///
/// The anchor-declared order is preserved and duplicate URLs are dropped,
/// keeping the first occurrence. Resolution is deterministic so that a
/// failing cycle can be reproduced exactly.
pub fn resolve_locations(
    anchor: &Arc<ConfigurationAnchor>,
) -> Result<Vec<ConfigurationLocation>, AnchorError> {
    let mut locations: Vec<ConfigurationLocation> = Vec::with_capacity(anchor.sources.len());
    for source in &anchor.sources {
        if locations.iter().any(|l| l.url == source.download_url) {
            continue;
        }
        locations.push(ConfigurationLocation {
            url: source.download_url.clone(),
            anchor: Arc::clone(anchor),
        });
    }

    if locations.is_empty() {
        return Err(AnchorError::NoLocations(anchor.instance_identifier.clone()));
    }
    Ok(locations)
}
