//! Global configuration client.
//!
//! Keeps a local copy of an instance's signed global configuration up to
//! date: fetching it from the locations named by a configuration anchor,
//! verifying it, and persisting the verified parts. Runs as a daemon with a
//! scheduler and an admin endpoint, or as one-shot download and validation
//! commands.

pub mod admin;
pub mod cli;
pub mod client;
pub mod config;
pub mod fetch;
pub mod scheduler;

pub use client::{
    ClientContext, Clock, ConfigurationClient, CycleError, CycleOptions, CycleReport,
    ExtensionPolicy, ExtensionReport, PersistMode,
};
pub use fetch::{DocumentFetcher, FetchError, FetchSettings, HttpFetcher};
pub use scheduler::{spawn_scheduler, SchedulerHandle};
