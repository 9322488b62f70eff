//! Parameters carried inside a configuration directory.
//!
//! Only the part of the private parameters the client itself acts on is
//! modelled: the federation-extension sources. Everything else in a
//! parameters file is opaque content for the subsystems that consume it.

use crate::anchor::ConfigurationAnchor;
use crate::document::ConfigurationFile;
use crate::error::ParamsError;
use globalconf_types::ContentId;
use serde::{Deserialize, Serialize};

/// Private parameters of one instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrivateParameters {
    pub instance_identifier: String,
    /// Anchors of federated instances whose shared parameters should be
    /// downloaded alongside this instance's configuration.
    #[serde(default)]
    pub configuration_sources: Vec<ConfigurationAnchor>,
}

impl PrivateParameters {
    pub fn from_json(bytes: &[u8]) -> Result<Self, ParamsError> {
        let params: Self = serde_json::from_slice(bytes)?;
        for source in &params.configuration_sources {
            source.validate()?;
        }
        Ok(params)
    }

    /// Reads the private parameters of `instance` from a set of files.
    ///
    /// Returns `Ok(None)` when the files carry no private parameters.
    pub fn from_files(
        files: &[ConfigurationFile],
        instance: &str,
    ) -> Result<Option<Self>, ParamsError> {
        let Some(file) = files
            .iter()
            .find(|f| f.content_id == ContentId::PrivateParameters)
        else {
            return Ok(None);
        };

        let params = Self::from_json(&file.content)?;
        if file.instance != instance || params.instance_identifier != instance {
            return Err(ParamsError::InstanceMismatch {
                declared: params.instance_identifier,
                expected: instance.to_string(),
            });
        }
        Ok(Some(params))
    }

    /// Configuration sources other than the owning instance itself.
    pub fn extension_sources(&self) -> impl Iterator<Item = &ConfigurationAnchor> {
        self.configuration_sources
            .iter()
            .filter(move |anchor| anchor.instance_identifier != self.instance_identifier)
    }
}
