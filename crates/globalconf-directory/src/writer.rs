//! Encoder for signed configuration directories.
//!
//! Produces documents in exactly the layout [`ConfigurationDirectory::parse`]
//! accepts. Publishing instances use it to sign their configuration; the
//! test suites use it to build fixtures.
//!
//! [`ConfigurationDirectory::parse`]: crate::ConfigurationDirectory::parse

use crate::anchor::certificate_id;
use crate::document::{
    HashAlgorithm, SignatureAlgorithm, BASE64_ENCODING, ENVELOPE_TYPE, HEADER_CERTIFICATE_HASH,
    HEADER_CONTENT_IDENTIFIER, HEADER_CONTENT_TYPE, HEADER_EXPIRE_DATE, HEADER_HASH,
    HEADER_HASH_ALGORITHM, HEADER_SIGNATURE_ALGORITHM, HEADER_TRANSFER_ENCODING, HEADER_VERSION,
    PARTS_TYPE,
};
use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::{DateTime, SecondsFormat, Utc};
use ed25519_dalek::{Signer, SigningKey};
use globalconf_types::ContentId;
use std::fmt::Write as _;

const ENVELOPE_BOUNDARY: &str = "globalconf-envelope";
const PARTS_BOUNDARY: &str = "globalconf-parts";
const BASE64_LINE_WIDTH: usize = 76;

struct DraftFile {
    content_id: ContentId,
    instance: String,
    version: u32,
    expires_at: DateTime<Utc>,
    content: Vec<u8>,
}

/// Builder for a signed configuration directory.
pub struct DirectoryWriter {
    hash_algorithm: HashAlgorithm,
    files: Vec<DraftFile>,
}

impl Default for DirectoryWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl DirectoryWriter {
    pub fn new() -> Self {
        Self {
            hash_algorithm: HashAlgorithm::Sha256,
            files: Vec::new(),
        }
    }

    pub fn hash_algorithm(mut self, algorithm: HashAlgorithm) -> Self {
        self.hash_algorithm = algorithm;
        self
    }

    /// Appends a file; files are emitted in the order they are added.
    pub fn file(
        mut self,
        content_id: ContentId,
        instance: impl Into<String>,
        version: u32,
        expires_at: DateTime<Utc>,
        content: impl Into<Vec<u8>>,
    ) -> Self {
        self.files.push(DraftFile {
            content_id,
            instance: instance.into(),
            version,
            expires_at,
            content: content.into(),
        });
        self
    }

    /// Renders the signed `multipart/mixed` section holding the files.
    pub fn parts_section(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "{HEADER_CONTENT_TYPE}: {PARTS_TYPE}; boundary={PARTS_BOUNDARY}"
        );
        out.push('\n');
        for file in &self.files {
            let _ = writeln!(out, "--{PARTS_BOUNDARY}");
            let _ = writeln!(
                out,
                "{HEADER_CONTENT_IDENTIFIER}: {}; instance=\"{}\"",
                file.content_id, file.instance
            );
            let _ = writeln!(out, "{HEADER_VERSION}: {}", file.version);
            let _ = writeln!(
                out,
                "{HEADER_EXPIRE_DATE}: {}",
                file.expires_at.to_rfc3339_opts(SecondsFormat::Secs, true)
            );
            let _ = writeln!(out, "{HEADER_HASH_ALGORITHM}: {}", self.hash_algorithm.id());
            let _ = writeln!(
                out,
                "{HEADER_HASH}: {}",
                self.hash_algorithm.digest_hex(&file.content)
            );
            let _ = writeln!(out, "{HEADER_TRANSFER_ENCODING}: {BASE64_ENCODING}");
            out.push('\n');
            out.push_str(&wrap_base64(&file.content));
        }
        let _ = write!(out, "--{PARTS_BOUNDARY}--");
        out
    }

    /// Renders and signs the complete document.
    pub fn sign(&self, signing_key: &SigningKey) -> Vec<u8> {
        seal(&self.parts_section(), signing_key)
    }
}

/// Wraps an already rendered parts section into a signed envelope.
///
/// The section is signed byte for byte as given, which lets callers
/// produce documents whose parts do not match their declared metadata.
pub fn seal(parts_section: &str, signing_key: &SigningKey) -> Vec<u8> {
    let signature = signing_key.sign(parts_section.as_bytes());
    let cert_hash = certificate_id(&signing_key.verifying_key());

    let mut out = String::new();
    let _ = writeln!(
        out,
        "{HEADER_CONTENT_TYPE}: {ENVELOPE_TYPE}; boundary={ENVELOPE_BOUNDARY}"
    );
    out.push('\n');
    let _ = writeln!(out, "--{ENVELOPE_BOUNDARY}");
    out.push_str(parts_section);
    out.push('\n');
    let _ = writeln!(out, "--{ENVELOPE_BOUNDARY}");
    let _ = writeln!(
        out,
        "{HEADER_SIGNATURE_ALGORITHM}: {}",
        SignatureAlgorithm::Ed25519.id()
    );
    let _ = writeln!(out, "{HEADER_CERTIFICATE_HASH}: {cert_hash}");
    out.push('\n');
    out.push_str(&wrap_base64(&signature.to_bytes()));
    let _ = writeln!(out, "--{ENVELOPE_BOUNDARY}--");
    out.into_bytes()
}

fn wrap_base64(data: &[u8]) -> String {
    let encoded = STANDARD.encode(data);
    let mut out = String::with_capacity(encoded.len() + encoded.len() / BASE64_LINE_WIDTH + 1);
    for chunk in encoded.as_bytes().chunks(BASE64_LINE_WIDTH) {
        // base64 output is pure ASCII
        out.push_str(std::str::from_utf8(chunk).unwrap_or_default());
        out.push('\n');
    }
    if encoded.is_empty() {
        out.push('\n');
    }
    out
}
