use crate::ContentRequirement;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Process exit codes reported by the one-shot entry modes.
pub mod exit_code {
    pub const SUCCESS: u8 = 0;
    pub const INTERNAL: u8 = 125;
    pub const INVALID_SIGNATURE: u8 = 124;
    pub const EXPIRED_CONF: u8 = 123;
    pub const CANNOT_DOWNLOAD_CONF: u8 = 122;
    pub const MISSING_PRIVATE_PARAMS: u8 = 121;
    pub const ANCHOR_NOT_FOR_EXTERNAL_SOURCE: u8 = 120;
}

/// Terminal result of one refresh cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// Every part was verified and persisted.
    Success,
    /// No location could be reached, or the transfer failed or timed out.
    DownloadFailed,
    /// The directory signature did not verify against the anchor.
    SignatureInvalid,
    /// A part was already past its expiration date.
    Expired,
    /// A part declared a version older than the one already persisted.
    StaleVersion,
    /// The document could not be parsed or a part hash did not match.
    MalformedDocument,
    /// A validation-mode content requirement was not met.
    MissingRequiredContent(ContentRequirement),
    /// Any other failure, e.g. filesystem errors during persist.
    InternalError,
}

impl Outcome {
    pub fn is_success(self) -> bool {
        matches!(self, Self::Success)
    }

    /// Returns the process exit code for this outcome.
    pub fn exit_code(self) -> u8 {
        match self {
            Self::Success => exit_code::SUCCESS,
            Self::DownloadFailed => exit_code::CANNOT_DOWNLOAD_CONF,
            Self::SignatureInvalid => exit_code::INVALID_SIGNATURE,
            Self::Expired | Self::StaleVersion => exit_code::EXPIRED_CONF,
            Self::MissingRequiredContent(ContentRequirement::ExternalAnchor) => {
                exit_code::ANCHOR_NOT_FOR_EXTERNAL_SOURCE
            }
            Self::MissingRequiredContent(_) => exit_code::MISSING_PRIVATE_PARAMS,
            Self::MalformedDocument | Self::InternalError => exit_code::INTERNAL,
        }
    }

    /// Returns the string label for this outcome.
    pub fn label(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::DownloadFailed => "download_failed",
            Self::SignatureInvalid => "signature_invalid",
            Self::Expired => "expired",
            Self::StaleVersion => "stale_version",
            Self::MalformedDocument => "malformed_document",
            Self::MissingRequiredContent(_) => "missing_required_content",
            Self::InternalError => "internal_error",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}
