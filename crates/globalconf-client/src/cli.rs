use clap::{Args, Parser, Subcommand};
use globalconf_types::ContentRequirement;
use std::path::PathBuf;

#[derive(Clone, Debug, Parser)]
#[command(name = "globalconf-client", version = env!("CARGO_PKG_VERSION"), about, long_about = None, propagate_version = true)]
pub struct Cli {
    /// Configuration file (defaults to $GLOBALCONF_CONFIG_PATH, then globalconf.toml).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Clone, Debug, Subcommand)]
pub enum Command {
    /// Run the scheduler and admin endpoint until interrupted.
    #[command(name = "daemon")]
    Daemon,
    /// Download and store the configuration an anchor points to, once.
    #[command(alias = "dl", name = "download")]
    Download(DownloadArgs),
    /// Download and verify without storing anything.
    #[command(name = "validate")]
    Validate(ValidateArgs),
}

#[derive(Clone, Debug, Args)]
pub struct DownloadArgs {
    /// Configuration anchor file.
    pub anchor: PathBuf,
    /// Directory to store the downloaded configuration in.
    pub destination: PathBuf,
}

#[derive(Clone, Debug, Args)]
pub struct ValidateArgs {
    /// Configuration anchor file.
    pub anchor: PathBuf,

    /// Fail unless the directory carries private parameters.
    #[arg(long, conflicts_with = "require_external_anchor")]
    pub require_private_params: bool,

    /// Fail unless the directory carries shared parameters only.
    #[arg(long)]
    pub require_external_anchor: bool,

    /// Accept files past their expiration date.
    #[arg(long)]
    pub allow_expired: bool,
}

impl ValidateArgs {
    pub fn requirement(&self) -> ContentRequirement {
        if self.require_private_params {
            ContentRequirement::PrivateParameters
        } else if self.require_external_anchor {
            ContentRequirement::ExternalAnchor
        } else {
            ContentRequirement::None
        }
    }
}
