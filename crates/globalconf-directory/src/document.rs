//! Strict parser for signed configuration directories.
//!
//! A directory is a UTF-8 MIME-like document: an outer `multipart/related`
//! envelope holding exactly two sections. The first is a `multipart/mixed`
//! entity with one part per configuration file; its exact bytes are what
//! the directory signature covers. The second is the signature itself.
//!
//! The parser never accepts a partial document. Any structural defect,
//! missing header or undecodable body fails the whole document.

use crate::anchor::validate_instance_identifier;
use crate::error::ParseError;
use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::{DateTime, Utc};
use globalconf_types::ContentId;
use sha2::{Digest, Sha256, Sha512};
use std::fmt;
use std::str::FromStr;

pub(crate) const ENVELOPE_TYPE: &str = "multipart/related";
pub(crate) const PARTS_TYPE: &str = "multipart/mixed";
pub(crate) const BASE64_ENCODING: &str = "base64";

pub(crate) const HEADER_CONTENT_TYPE: &str = "Content-Type";
pub(crate) const HEADER_CONTENT_IDENTIFIER: &str = "Content-Identifier";
pub(crate) const HEADER_VERSION: &str = "Version";
pub(crate) const HEADER_EXPIRE_DATE: &str = "Expire-Date";
pub(crate) const HEADER_HASH_ALGORITHM: &str = "Hash-Algorithm-Id";
pub(crate) const HEADER_HASH: &str = "Hash";
pub(crate) const HEADER_TRANSFER_ENCODING: &str = "Content-Transfer-Encoding";
pub(crate) const HEADER_SIGNATURE_ALGORITHM: &str = "Signature-Algorithm-Id";
pub(crate) const HEADER_CERTIFICATE_HASH: &str = "Verification-Certificate-Hash";

/// Digest algorithm declared for a configuration file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HashAlgorithm {
    Sha256,
    Sha512,
}

impl HashAlgorithm {
    pub fn id(self) -> &'static str {
        match self {
            Self::Sha256 => "SHA-256",
            Self::Sha512 => "SHA-512",
        }
    }

    /// Length of a digest in bytes.
    pub fn output_len(self) -> usize {
        match self {
            Self::Sha256 => 32,
            Self::Sha512 => 64,
        }
    }

    /// Computes the lowercase hex digest of `data`.
    pub fn digest_hex(self, data: &[u8]) -> String {
        match self {
            Self::Sha256 => hex::encode(Sha256::digest(data)),
            Self::Sha512 => hex::encode(Sha512::digest(data)),
        }
    }
}

impl FromStr for HashAlgorithm {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "SHA-256" => Ok(Self::Sha256),
            "SHA-512" => Ok(Self::Sha512),
            _ => Err(ParseError::UnsupportedHashAlgorithm(s.to_string())),
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

/// Signature algorithm declared for the directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignatureAlgorithm {
    Ed25519,
}

impl SignatureAlgorithm {
    pub fn id(self) -> &'static str {
        match self {
            Self::Ed25519 => "Ed25519",
        }
    }

    pub fn signature_len(self) -> usize {
        match self {
            Self::Ed25519 => ed25519_dalek::SIGNATURE_LENGTH,
        }
    }
}

impl FromStr for SignatureAlgorithm {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("Ed25519") {
            Ok(Self::Ed25519)
        } else {
            Err(ParseError::UnsupportedSignatureAlgorithm(s.to_string()))
        }
    }
}

/// One configuration file carried inside a directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigurationFile {
    pub content_id: ContentId,
    /// Instance the content belongs to.
    pub instance: String,
    pub content: Vec<u8>,
    pub expires_at: DateTime<Utc>,
    pub version: u32,
    pub hash_algorithm: HashAlgorithm,
    /// Declared digest of `content`, lowercase hex.
    pub declared_hash: String,
}

impl ConfigurationFile {
    /// Recomputes the digest of the content with the declared algorithm.
    pub fn computed_hash(&self) -> String {
        self.hash_algorithm.digest_hex(&self.content)
    }
}

/// A parsed but not yet verified configuration directory.
#[derive(Debug, Clone)]
pub struct ConfigurationDirectory {
    files: Vec<ConfigurationFile>,
    signed_data: Vec<u8>,
    signature: Vec<u8>,
    signature_algorithm: SignatureAlgorithm,
    signer_certificate_hash: String,
}

impl ConfigurationDirectory {
    /// Parses a raw directory document.
    pub fn parse(bytes: &[u8]) -> Result<Self, ParseError> {
        let text = std::str::from_utf8(bytes).map_err(|_| ParseError::NotUtf8)?;

        let (headers, body) = split_entity(text)?;
        let boundary = multipart_boundary(&headers, ENVELOPE_TYPE)?;
        let sections = split_multipart(body, &boundary)?;
        let [parts_section, signature_section] = sections.as_slice() else {
            return Err(ParseError::EnvelopeSections(sections.len()));
        };

        let files = parse_parts_section(parts_section)?;

        let (sig_headers, sig_body) = split_entity(signature_section)?;
        let signature_algorithm: SignatureAlgorithm =
            sig_headers.require(HEADER_SIGNATURE_ALGORITHM)?.parse()?;
        let signer_certificate_hash = sig_headers.require(HEADER_CERTIFICATE_HASH)?;
        if hex::decode(signer_certificate_hash).is_err() {
            return Err(ParseError::InvalidHeader {
                name: HEADER_CERTIFICATE_HASH,
                value: signer_certificate_hash.to_string(),
            });
        }
        let signature = decode_base64(sig_body)?;
        if signature.len() != signature_algorithm.signature_len() {
            return Err(ParseError::InvalidSignatureLength {
                expected: signature_algorithm.signature_len(),
                found: signature.len(),
            });
        }

        Ok(Self {
            files,
            signed_data: parts_section.as_bytes().to_vec(),
            signature,
            signature_algorithm,
            signer_certificate_hash: signer_certificate_hash.to_ascii_lowercase(),
        })
    }

    /// Files in declared order.
    pub fn files(&self) -> &[ConfigurationFile] {
        &self.files
    }

    pub fn into_files(self) -> Vec<ConfigurationFile> {
        self.files
    }

    /// The exact bytes covered by the signature.
    pub fn signed_data(&self) -> &[u8] {
        &self.signed_data
    }

    pub fn signature(&self) -> &[u8] {
        &self.signature
    }

    pub fn signature_algorithm(&self) -> SignatureAlgorithm {
        self.signature_algorithm
    }

    /// Certificate identifier the signer claims to have used.
    pub fn signer_certificate_hash(&self) -> &str {
        &self.signer_certificate_hash
    }
}

fn parse_parts_section(section: &str) -> Result<Vec<ConfigurationFile>, ParseError> {
    let (headers, body) = split_entity(section)?;
    let boundary = multipart_boundary(&headers, PARTS_TYPE)?;

    let mut files: Vec<ConfigurationFile> = Vec::new();
    for raw in split_multipart(body, &boundary)? {
        let file = parse_file(raw)?;
        if files.iter().any(|f| f.content_id == file.content_id) {
            return Err(ParseError::DuplicateContentId(file.content_id));
        }
        files.push(file);
    }
    Ok(files)
}

fn parse_file(raw: &str) -> Result<ConfigurationFile, ParseError> {
    let (headers, body) = split_entity(raw)?;

    let (token, params) = split_header_value(headers.require(HEADER_CONTENT_IDENTIFIER)?);
    let content_id: ContentId = token.parse()?;
    let instance = param(&params, "instance")
        .ok_or_else(|| ParseError::MissingInstance(content_id.clone()))?
        .to_string();
    validate_instance_identifier(&instance).map_err(|_| ParseError::InvalidHeader {
        name: HEADER_CONTENT_IDENTIFIER,
        value: instance.clone(),
    })?;

    let version_raw = headers.require(HEADER_VERSION)?;
    let version: u32 = version_raw.parse().map_err(|_| ParseError::InvalidHeader {
        name: HEADER_VERSION,
        value: version_raw.to_string(),
    })?;

    let expire_raw = headers.require(HEADER_EXPIRE_DATE)?;
    let expires_at = DateTime::parse_from_rfc3339(expire_raw)
        .map_err(|_| ParseError::InvalidHeader {
            name: HEADER_EXPIRE_DATE,
            value: expire_raw.to_string(),
        })?
        .with_timezone(&Utc);

    let hash_algorithm: HashAlgorithm = headers.require(HEADER_HASH_ALGORITHM)?.parse()?;
    let hash_raw = headers.require(HEADER_HASH)?;
    let hash_valid = hex::decode(hash_raw)
        .map(|digest| digest.len() == hash_algorithm.output_len())
        .unwrap_or(false);
    if !hash_valid {
        return Err(ParseError::InvalidHeader {
            name: HEADER_HASH,
            value: hash_raw.to_string(),
        });
    }

    let encoding = headers.require(HEADER_TRANSFER_ENCODING)?;
    if !encoding.eq_ignore_ascii_case(BASE64_ENCODING) {
        return Err(ParseError::UnsupportedEncoding(encoding.to_string()));
    }
    let content = decode_base64(body)?;

    Ok(ConfigurationFile {
        content_id,
        instance,
        content,
        expires_at,
        version,
        hash_algorithm,
        declared_hash: hash_raw.to_ascii_lowercase(),
    })
}

// ---------------------------------------------------------------------------
// MIME-like framing
// ---------------------------------------------------------------------------

/// Header block of one entity, in declared order.
struct Headers<'a>(Vec<(&'a str, &'a str)>);

impl<'a> Headers<'a> {
    fn get(&self, name: &str) -> Option<&'a str> {
        self.0
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| *v)
    }

    fn require(&self, name: &'static str) -> Result<&'a str, ParseError> {
        self.get(name).ok_or(ParseError::MissingHeader(name))
    }
}

fn strip_line_ending(line: &str) -> &str {
    line.strip_suffix("\r\n")
        .or_else(|| line.strip_suffix('\n'))
        .unwrap_or(line)
}

/// Splits an entity into its headers and body at the first empty line.
fn split_entity(text: &str) -> Result<(Headers<'_>, &str), ParseError> {
    let mut headers = Vec::new();
    let mut offset = 0;
    for line in text.split_inclusive('\n') {
        let start = offset;
        offset += line.len();
        let content = strip_line_ending(line);
        if content.is_empty() {
            return Ok((Headers(headers), &text[offset..]));
        }
        if !line.ends_with('\n') {
            break;
        }
        let (name, value) = content
            .split_once(':')
            .ok_or_else(|| ParseError::MalformedHeader(text[start..offset].trim().to_string()))?;
        let name = name.trim();
        if name.is_empty() || name.contains(char::is_whitespace) {
            return Err(ParseError::MalformedHeader(content.to_string()));
        }
        headers.push((name, value.trim()));
    }
    Err(ParseError::MissingHeaderTerminator)
}

/// Splits a header value into its leading token and `key=value` parameters.
fn split_header_value(value: &str) -> (&str, Vec<(String, String)>) {
    let mut pieces = value.split(';');
    let token = pieces.next().unwrap_or_default().trim();
    let params = pieces
        .filter_map(|piece| {
            let (key, val) = piece.split_once('=')?;
            let val = val.trim();
            let val = val
                .strip_prefix('"')
                .and_then(|v| v.strip_suffix('"'))
                .unwrap_or(val);
            Some((key.trim().to_ascii_lowercase(), val.to_string()))
        })
        .collect();
    (token, params)
}

fn param<'a>(params: &'a [(String, String)], key: &str) -> Option<&'a str> {
    params
        .iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.as_str())
}

/// Checks the entity's content type and returns its multipart boundary.
fn multipart_boundary(headers: &Headers<'_>, expected: &'static str) -> Result<String, ParseError> {
    let (media_type, params) = split_header_value(headers.require(HEADER_CONTENT_TYPE)?);
    if !media_type.eq_ignore_ascii_case(expected) {
        return Err(ParseError::UnexpectedContentType {
            expected,
            found: media_type.to_string(),
        });
    }
    let boundary = param(&params, "boundary").ok_or(ParseError::MissingBoundary)?;
    let valid = !boundary.is_empty()
        && boundary.len() <= 70
        && boundary
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "'()+_,-./:=?".contains(c));
    if !valid {
        return Err(ParseError::MissingBoundary);
    }
    Ok(boundary.to_string())
}

/// Splits a multipart body into the raw text of its parts.
///
/// Only blank lines may precede the first delimiter and only whitespace may
/// follow the closing delimiter. A body without a closing delimiter is
/// treated as truncated.
fn split_multipart<'a>(body: &'a str, boundary: &str) -> Result<Vec<&'a str>, ParseError> {
    let delimiter = format!("--{boundary}");
    let closing = format!("--{boundary}--");

    let mut parts = Vec::new();
    let mut current: Option<usize> = None;
    let mut offset = 0;

    for line in body.split_inclusive('\n') {
        let line_start = offset;
        offset += line.len();
        let content = strip_line_ending(line);

        if content == delimiter || content == closing {
            if let Some(start) = current.take() {
                parts.push(strip_line_ending(&body[start..line_start]));
            }
            if content == closing {
                if !body[offset..].trim().is_empty() {
                    return Err(ParseError::UnexpectedData(boundary.to_string()));
                }
                if parts.is_empty() {
                    return Err(ParseError::EmptyMultipart(boundary.to_string()));
                }
                return Ok(parts);
            }
            current = Some(offset);
        } else if current.is_none() && !content.trim().is_empty() {
            return Err(ParseError::UnexpectedData(boundary.to_string()));
        }
    }

    Err(ParseError::Truncated(boundary.to_string()))
}

fn decode_base64(body: &str) -> Result<Vec<u8>, ParseError> {
    let compact: String = body.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    Ok(STANDARD.decode(compact)?)
}
