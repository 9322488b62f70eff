//! Error types for anchors, documents and verification.

use chrono::{DateTime, Utc};
use globalconf_types::{ContentId, ContentIdError, Outcome};

/// Errors that can occur while loading or resolving a configuration anchor.
#[derive(Debug, thiserror::Error)]
pub enum AnchorError {
    /// The anchor file could not be read.
    #[error("failed to read anchor file: {0}")]
    Read(#[from] std::io::Error),

    /// The anchor is not valid JSON or does not match the anchor schema.
    #[error("failed to parse anchor: {0}")]
    Parse(#[from] serde_json::Error),

    /// The instance identifier is empty or not a single path component.
    #[error("invalid instance identifier: {0:?}")]
    InvalidInstanceIdentifier(String),

    /// A download location uses a scheme other than HTTP(S).
    #[error("unsupported download location scheme: {0}")]
    UnsupportedScheme(String),

    /// A trusted certificate is not a valid verification key.
    #[error("invalid trusted certificate: {0}")]
    InvalidCertificate(String),

    /// The anchor lists no trusted certificates.
    #[error("anchor for instance {0} lists no trusted certificates")]
    NoCertificates(String),

    /// The anchor lists no download locations.
    #[error("anchor for instance {0} lists no download locations")]
    NoLocations(String),
}

/// Errors produced by the strict document parser.
///
/// Every variant maps to [`Outcome::MalformedDocument`]; no partially
/// parsed document is ever returned.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("document is not valid UTF-8")]
    NotUtf8,

    #[error("entity has no header terminator")]
    MissingHeaderTerminator,

    #[error("malformed header line: {0:?}")]
    MalformedHeader(String),

    #[error("missing required header {0}")]
    MissingHeader(&'static str),

    #[error("invalid value for header {name}: {value:?}")]
    InvalidHeader { name: &'static str, value: String },

    #[error("expected content type {expected}, found {found}")]
    UnexpectedContentType { expected: &'static str, found: String },

    #[error("multipart entity has no usable boundary")]
    MissingBoundary,

    #[error("unexpected data outside of multipart boundary {0}")]
    UnexpectedData(String),

    #[error("multipart boundary {0} is never closed; document is truncated")]
    Truncated(String),

    #[error("multipart entity with boundary {0} has no parts")]
    EmptyMultipart(String),

    #[error("envelope must contain a parts section and a signature, found {0} sections")]
    EnvelopeSections(usize),

    #[error("invalid content identifier: {0}")]
    InvalidContentId(#[from] ContentIdError),

    #[error("content identifier {0} has no instance attribute")]
    MissingInstance(ContentId),

    #[error("content identifier {0} appears more than once")]
    DuplicateContentId(ContentId),

    #[error("unsupported hash algorithm {0}")]
    UnsupportedHashAlgorithm(String),

    #[error("unsupported signature algorithm {0}")]
    UnsupportedSignatureAlgorithm(String),

    #[error("unsupported content transfer encoding {0}")]
    UnsupportedEncoding(String),

    #[error("invalid base64 body: {0}")]
    InvalidBase64(#[from] base64::DecodeError),

    #[error("signature must be {expected} bytes, found {found}")]
    InvalidSignatureLength { expected: usize, found: usize },
}

impl ParseError {
    pub fn outcome(&self) -> Outcome {
        Outcome::MalformedDocument
    }
}

/// Errors produced by the two verification stages.
#[derive(Debug, thiserror::Error)]
pub enum VerifyError {
    /// No anchor certificate validates the directory signature.
    #[error("directory signature does not verify against any of {certificates} trusted certificates")]
    SignatureInvalid { certificates: usize },

    /// The recomputed hash of a part differs from the declared hash.
    #[error("hash mismatch for {content_id}: declared {declared}, computed {computed}")]
    HashMismatch {
        content_id: ContentId,
        declared: String,
        computed: String,
    },

    /// A part is past its expiration date.
    #[error("{content_id} of instance {instance} expired at {expired_at}")]
    Expired {
        content_id: ContentId,
        instance: String,
        expired_at: DateTime<Utc>,
    },

    /// A part declares a version older than the persisted one.
    #[error("{content_id} of instance {instance} has version {offered}, older than persisted version {recorded}")]
    StaleVersion {
        content_id: ContentId,
        instance: String,
        offered: u32,
        recorded: u32,
    },
}

impl VerifyError {
    pub fn outcome(&self) -> Outcome {
        match self {
            Self::SignatureInvalid { .. } => Outcome::SignatureInvalid,
            Self::HashMismatch { .. } => Outcome::MalformedDocument,
            Self::Expired { .. } => Outcome::Expired,
            Self::StaleVersion { .. } => Outcome::StaleVersion,
        }
    }
}

/// Errors produced while reading parameters carried inside a directory.
#[derive(Debug, thiserror::Error)]
pub enum ParamsError {
    #[error("failed to parse private parameters: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("private parameters declare instance {declared}, part belongs to {expected}")]
    InstanceMismatch { declared: String, expected: String },

    #[error("invalid configuration source: {0}")]
    InvalidSource(#[from] AnchorError),
}
