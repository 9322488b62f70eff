use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Logical name of one part inside a configuration directory.
///
/// Two identifiers are known to the client itself; everything else is a
/// federation-extension identifier that is carried through verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ContentId {
    /// Parameters distributed only to members of the issuing instance.
    PrivateParameters,
    /// Parameters that may be shared with federated instances.
    SharedParameters,
    /// Any other well-formed identifier.
    Other(String),
}

/// Errors produced when parsing a content identifier token.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ContentIdError {
    #[error("content identifier is empty")]
    Empty,
    #[error("invalid character {0:?} in content identifier")]
    InvalidCharacter(char),
}

impl ContentId {
    pub const PRIVATE_PARAMETERS: &'static str = "PRIVATE-PARAMETERS";
    pub const SHARED_PARAMETERS: &'static str = "SHARED-PARAMETERS";

    /// Returns the wire token for this identifier.
    pub fn as_str(&self) -> &str {
        match self {
            Self::PrivateParameters => Self::PRIVATE_PARAMETERS,
            Self::SharedParameters => Self::SHARED_PARAMETERS,
            Self::Other(token) => token,
        }
    }

    /// Returns the file name this part is stored under.
    ///
    /// The token alphabet is restricted to `[A-Z0-9-]`, so the result is
    /// always a single safe path component.
    pub fn file_name(&self) -> String {
        self.as_str().to_ascii_lowercase()
    }
}

impl FromStr for ContentId {
    type Err = ContentIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(ContentIdError::Empty);
        }
        if let Some(c) = s
            .chars()
            .find(|c| !(c.is_ascii_uppercase() || c.is_ascii_digit() || *c == '-'))
        {
            return Err(ContentIdError::InvalidCharacter(c));
        }

        Ok(match s {
            Self::PRIVATE_PARAMETERS => Self::PrivateParameters,
            Self::SHARED_PARAMETERS => Self::SharedParameters,
            other => Self::Other(other.to_string()),
        })
    }
}

impl TryFrom<String> for ContentId {
    type Error = ContentIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ContentId> for String {
    fn from(id: ContentId) -> Self {
        id.as_str().to_string()
    }
}

impl fmt::Display for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Additional content check applied by validation tooling after a
/// directory has been verified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentRequirement {
    /// No additional check.
    #[default]
    None,
    /// The directory must contain private parameters.
    PrivateParameters,
    /// The directory must contain shared parameters and must *not* contain
    /// private parameters, since it is meant for external federation members.
    ExternalAnchor,
}

impl ContentRequirement {
    /// Checks a sequence of content identifiers against this requirement.
    pub fn is_satisfied_by<'a, I>(self, ids: I) -> bool
    where
        I: IntoIterator<Item = &'a ContentId>,
    {
        match self {
            Self::None => true,
            Self::PrivateParameters => ids
                .into_iter()
                .any(|id| *id == ContentId::PrivateParameters),
            Self::ExternalAnchor => {
                let mut shared = false;
                for id in ids {
                    match id {
                        ContentId::PrivateParameters => return false,
                        ContentId::SharedParameters => shared = true,
                        ContentId::Other(_) => {}
                    }
                }
                shared
            }
        }
    }

    /// Returns the label used in logs and admin responses.
    pub fn label(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::PrivateParameters => "private_parameters",
            Self::ExternalAnchor => "external_anchor",
        }
    }
}
