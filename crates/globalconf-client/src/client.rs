//! The configuration client: one refresh cycle from anchor to disk.
//!
//! A cycle resolves the anchor's locations, downloads the first directory a
//! location will serve, verifies it, and persists the verified parts. On
//! success it optionally follows the federation extensions declared in the
//! primary instance's private parameters.
//!
//! All cross-cycle state lives in one [`ClientContext`] behind an async
//! mutex that a cycle holds from start to finish, so cycles of the same
//! client never overlap.

use crate::fetch::{DocumentFetcher, FetchError};
use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use globalconf_directory::{
    resolve_locations, verify, AnchorError, ConfigurationAnchor, ConfigurationDirectory,
    KnownVersions, ParamsError, ParseError, PrivateParameters, VerifiedDirectory, VerifyError,
    VerifyOptions,
};
use globalconf_store::{ConfigurationStore, DownloadedFiles, StoreError};
use globalconf_types::{ContentId, ContentRequirement, Outcome};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::Instrument;
use uuid::Uuid;

/// Source of the current time for expiration checks.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// State handed from one cycle to the next.
#[derive(Debug)]
pub struct ClientContext {
    pub anchor: Arc<ConfigurationAnchor>,
    pub downloaded: DownloadedFiles,
}

impl ClientContext {
    pub fn new(anchor: ConfigurationAnchor, downloaded: DownloadedFiles) -> Self {
        Self {
            anchor: Arc::new(anchor),
            downloaded,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PersistMode {
    /// Write verified parts and update the index.
    #[default]
    Commit,
    /// Verify only. Nothing on disk changes.
    DryRun,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExtensionPolicy {
    #[default]
    Follow,
    Skip,
}

/// How a cycle treats what it downloads.
#[derive(Debug, Clone, Copy, Default)]
pub struct CycleOptions {
    pub persist: PersistMode,
    pub extensions: ExtensionPolicy,
    pub accept_expired: bool,
    pub requirement: ContentRequirement,
}

impl CycleOptions {
    /// Scheduled and on-demand daemon cycles.
    pub fn daemon() -> Self {
        Self::default()
    }

    /// One-shot download into a destination directory.
    pub fn download() -> Self {
        Self {
            extensions: ExtensionPolicy::Skip,
            ..Self::default()
        }
    }

    /// One-shot validation of what an anchor currently serves.
    pub fn validate(requirement: ContentRequirement, accept_expired: bool) -> Self {
        Self {
            persist: PersistMode::DryRun,
            extensions: ExtensionPolicy::Skip,
            accept_expired,
            requirement,
        }
    }
}

/// Why a cycle did not succeed.
#[derive(Debug, Error)]
pub enum CycleError {
    #[error("anchor is unusable: {0}")]
    Anchor(#[from] AnchorError),

    #[error("all {attempts} download locations failed, last error: {last}")]
    Download {
        attempts: usize,
        #[source]
        last: FetchError,
    },

    #[error("malformed configuration directory: {0}")]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Verify(#[from] VerifyError),

    #[error("invalid private parameters: {0}")]
    Params(#[from] ParamsError),

    #[error("directory does not contain the required content ({})", .0.label())]
    MissingContent(ContentRequirement),

    #[error("failed to persist configuration: {0}")]
    Store(#[from] StoreError),

    #[error("persistence task did not complete: {0}")]
    Interrupted(#[source] tokio::task::JoinError),
}

impl CycleError {
    pub fn outcome(&self) -> Outcome {
        match self {
            CycleError::Anchor(_) | CycleError::Store(_) | CycleError::Interrupted(_) => {
                Outcome::InternalError
            }
            CycleError::Download { .. } => Outcome::DownloadFailed,
            CycleError::Parse(e) => e.outcome(),
            CycleError::Verify(e) => e.outcome(),
            CycleError::Params(_) => Outcome::MalformedDocument,
            CycleError::MissingContent(requirement) => {
                Outcome::MissingRequiredContent(*requirement)
            }
        }
    }
}

/// Result of following one federation extension.
#[derive(Debug, Clone, Serialize)]
pub struct ExtensionReport {
    pub instance: String,
    pub outcome: Outcome,
    pub persisted: Vec<String>,
    pub deleted: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Result of one cycle.
#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub cycle_id: Uuid,
    pub outcome: Outcome,
    pub primary_instance: String,
    /// Relative paths written (or, in a dry run, verified) for the primary source.
    pub persisted: Vec<String>,
    pub deleted: Vec<String>,
    pub extensions: Vec<ExtensionReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub finished_at: DateTime<Utc>,
}

impl CycleReport {
    pub fn exit_code(&self) -> u8 {
        self.outcome.exit_code()
    }
}

#[derive(Default)]
struct CycleSummary {
    persisted: Vec<String>,
    deleted: Vec<String>,
    extensions: Vec<ExtensionReport>,
}

/// Downloads, verifies and persists global configuration.
pub struct ConfigurationClient<F> {
    fetcher: F,
    store: ConfigurationStore,
    clock: Clock,
    context: Mutex<ClientContext>,
    last_report: std::sync::Mutex<Option<CycleReport>>,
}

impl<F: DocumentFetcher> ConfigurationClient<F> {
    pub fn new(fetcher: F, store: ConfigurationStore, context: ClientContext) -> Self {
        Self {
            fetcher,
            store,
            clock: Arc::new(Utc::now),
            context: Mutex::new(context),
            last_report: std::sync::Mutex::new(None),
        }
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn store(&self) -> &ConfigurationStore {
        &self.store
    }

    /// Report of the most recently finished cycle.
    pub fn last_report(&self) -> Option<CycleReport> {
        self.last_report
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Runs a cycle, waiting for any cycle already in flight to finish.
    pub async fn run_cycle(&self, options: &CycleOptions) -> CycleReport {
        let mut context = self.context.lock().await;
        self.run_locked(&mut context, options).await
    }

    /// Runs a cycle unless one is already in flight.
    pub async fn try_run_cycle(&self, options: &CycleOptions) -> Option<CycleReport> {
        let mut context = self.context.try_lock().ok()?;
        Some(self.run_locked(&mut context, options).await)
    }

    /// Waits until no cycle is running.
    pub async fn wait_idle(&self) {
        drop(self.context.lock().await);
    }

    /// Replaces the anchor used by subsequent cycles.
    pub async fn reload_anchor(&self, path: impl AsRef<Path>) -> Result<(), AnchorError> {
        let anchor = ConfigurationAnchor::load(path)?;
        let mut context = self.context.lock().await;
        tracing::info!(
            instance = %anchor.instance_identifier,
            locations = anchor.sources.len(),
            certificates = anchor.certificates.len(),
            "configuration anchor reloaded"
        );
        context.anchor = Arc::new(anchor);
        Ok(())
    }

    async fn run_locked(&self, context: &mut ClientContext, options: &CycleOptions) -> CycleReport {
        let cycle_id = Uuid::new_v4();
        let primary_instance = context.anchor.instance_identifier.clone();
        let span = tracing::info_span!("cycle", %cycle_id, instance = %primary_instance);

        let result = self.execute(context, options).instrument(span.clone()).await;

        let report = span.in_scope(|| match result {
            Ok(summary) => {
                tracing::info!(
                    persisted = summary.persisted.len(),
                    deleted = summary.deleted.len(),
                    extensions = summary.extensions.len(),
                    outcome = %Outcome::Success,
                    "configuration cycle finished"
                );
                CycleReport {
                    cycle_id,
                    outcome: Outcome::Success,
                    primary_instance,
                    persisted: summary.persisted,
                    deleted: summary.deleted,
                    extensions: summary.extensions,
                    error: None,
                    finished_at: Utc::now(),
                }
            }
            Err(e) => {
                let outcome = e.outcome();
                tracing::error!(outcome = %outcome, error = %e, "configuration cycle failed");
                CycleReport {
                    cycle_id,
                    outcome,
                    primary_instance,
                    persisted: Vec::new(),
                    deleted: Vec::new(),
                    extensions: Vec::new(),
                    error: Some(e.to_string()),
                    finished_at: Utc::now(),
                }
            }
        });

        *self.last_report.lock().unwrap_or_else(|e| e.into_inner()) = Some(report.clone());
        report
    }

    async fn execute(
        &self,
        context: &mut ClientContext,
        options: &CycleOptions,
    ) -> Result<CycleSummary, CycleError> {
        let verify_options = VerifyOptions::at((self.clock)()).accept_expired(options.accept_expired);
        let anchor = Arc::clone(&context.anchor);
        let instance = anchor.instance_identifier.clone();

        let verified =
            download_verified(&self.fetcher, &anchor, &verify_options, &context.downloaded).await?;

        if !options.requirement.is_satisfied_by(verified.content_ids()) {
            return Err(CycleError::MissingContent(options.requirement));
        }

        // Private parameters are part of the directory: reject them before
        // anything is written.
        let sources: Vec<ConfigurationAnchor> = match options.extensions {
            ExtensionPolicy::Follow => PrivateParameters::from_files(verified.files(), &instance)?
                .map(|p| p.extension_sources().cloned().collect())
                .unwrap_or_default(),
            ExtensionPolicy::Skip => Vec::new(),
        };

        let mut summary = CycleSummary::default();

        tracing::debug!(state = "persisting", "cycle state");
        match options.persist {
            PersistMode::Commit => {
                let source = instance.clone();
                let files = verified.into_files();
                let commit = self
                    .with_index(context, move |store, index| {
                        let commit = store.commit_source(index, &source, &files)?;
                        store.write_instance_identifier(&source)?;
                        Ok(commit)
                    })
                    .await?;
                summary.persisted = commit.persisted;
                summary.deleted = commit.deleted;
            }
            PersistMode::DryRun => {
                summary.persisted = verified
                    .files()
                    .iter()
                    .map(|f| globalconf_store::relative_part_path(&f.instance, &f.content_id))
                    .collect();
            }
        }

        if options.extensions == ExtensionPolicy::Follow {
            tracing::debug!(state = "triggering_extensions", "cycle state");
            summary.extensions = self
                .follow_extensions(context, &sources, &verify_options, options.persist)
                .await;
        }

        if options.persist == PersistMode::Commit {
            let keep: Option<Vec<String>> = (options.extensions == ExtensionPolicy::Follow).then(|| {
                std::iter::once(instance.clone())
                    .chain(sources.iter().map(|s| s.instance_identifier.clone()))
                    .collect()
            });
            let retired = self
                .with_index(context, move |store, index| {
                    let retired = match &keep {
                        Some(keep) => {
                            let keep: Vec<&str> = keep.iter().map(String::as_str).collect();
                            store.retire_sources(index, &keep)?
                        }
                        None => Vec::new(),
                    };
                    index.save()?;
                    Ok(retired)
                })
                .await?;
            summary.deleted.extend(retired);
        }

        tracing::debug!(state = "done", "cycle state");
        Ok(summary)
    }

    /// Runs a store operation on the blocking pool, moving the index in and
    /// back out. The index keeps whatever the operation recorded, even when
    /// it fails part way.
    async fn with_index<T, Op>(&self, context: &mut ClientContext, op: Op) -> Result<T, CycleError>
    where
        T: Send + 'static,
        Op: FnOnce(&ConfigurationStore, &mut DownloadedFiles) -> Result<T, StoreError>
            + Send
            + 'static,
    {
        let store = self.store.clone();
        let mut index = std::mem::take(&mut context.downloaded);
        let task = tokio::task::spawn_blocking(move || {
            let result = op(&store, &mut index);
            (index, result)
        });
        match task.await {
            Ok((index, result)) => {
                context.downloaded = index;
                Ok(result?)
            }
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(e) => Err(CycleError::Interrupted(e)),
        }
    }

    /// Downloads every extension concurrently, then persists them one by one.
    ///
    /// Failures are recorded per extension and never fail the cycle.
    async fn follow_extensions(
        &self,
        context: &mut ClientContext,
        sources: &[ConfigurationAnchor],
        verify_options: &VerifyOptions,
        persist: PersistMode,
    ) -> Vec<ExtensionReport> {
        let downloaded = &context.downloaded;
        let results = join_all(sources.iter().map(|source| async move {
            let anchor = Arc::new(source.clone());
            let mut verified =
                download_verified(&self.fetcher, &anchor, verify_options, downloaded).await?;
            retain_shared_parameters(&mut verified, &source.instance_identifier);
            Ok::<_, CycleError>(verified)
        }))
        .await;

        let mut reports = Vec::with_capacity(sources.len());
        for (source, result) in sources.iter().zip(results) {
            let instance = source.instance_identifier.as_str();
            let persisted = match result {
                Ok(verified) => match persist {
                    PersistMode::Commit => {
                        let source = instance.to_string();
                        let files = verified.into_files();
                        self.with_index(context, move |store, index| {
                            store.commit_source(index, &source, &files)
                        })
                        .await
                        .map(|c| (c.persisted, c.deleted))
                    }
                    PersistMode::DryRun => Ok((
                        verified
                            .files()
                            .iter()
                            .map(|f| globalconf_store::relative_part_path(&f.instance, &f.content_id))
                            .collect(),
                        Vec::new(),
                    )),
                },
                Err(e) => Err(e),
            };

            let report = match persisted {
                Ok((persisted, deleted)) => {
                    tracing::info!(extension = instance, persisted = persisted.len(), "extension updated");
                    ExtensionReport {
                        instance: instance.to_string(),
                        outcome: Outcome::Success,
                        persisted,
                        deleted,
                        error: None,
                    }
                }
                Err(e) => {
                    tracing::warn!(extension = instance, outcome = %e.outcome(), error = %e, "extension failed");
                    ExtensionReport {
                        instance: instance.to_string(),
                        outcome: e.outcome(),
                        persisted: Vec::new(),
                        deleted: Vec::new(),
                        error: Some(e.to_string()),
                    }
                }
            };
            reports.push(report);
        }
        reports
    }
}

/// Tries each location of `anchor` in order until one serves a directory.
///
/// Only transport failures move on to the next location. A directory that
/// was served but fails to parse or verify ends the attempt.
async fn download_verified<F: DocumentFetcher>(
    fetcher: &F,
    anchor: &Arc<ConfigurationAnchor>,
    options: &VerifyOptions,
    known: &impl KnownVersions,
) -> Result<VerifiedDirectory, CycleError> {
    tracing::debug!(state = "resolving", instance = %anchor.instance_identifier, "cycle state");
    let locations = resolve_locations(anchor)?;
    let mut last_error = None;

    for location in &locations {
        tracing::debug!(state = "fetching", url = %location.url, "cycle state");
        match fetcher.fetch(location).await {
            Ok(bytes) => {
                tracing::debug!(state = "verifying", url = %location.url, bytes = bytes.len(), "cycle state");
                let directory = ConfigurationDirectory::parse(&bytes)?;
                let verified = verify(directory, &location.anchor, options, known)?;
                tracing::info!(
                    url = %location.url,
                    instance = location.instance_identifier(),
                    signer = verified.signer().subject(),
                    files = verified.files().len(),
                    "configuration directory verified"
                );
                return Ok(verified);
            }
            Err(e) => {
                tracing::warn!(url = %location.url, error = %e, "download failed, trying next location");
                last_error = Some(e);
            }
        }
    }

    match last_error {
        Some(last) => Err(CycleError::Download {
            attempts: locations.len(),
            last,
        }),
        None => Err(AnchorError::NoLocations(anchor.instance_identifier.clone()).into()),
    }
}

/// Extension sources contribute only their own shared parameters.
fn retain_shared_parameters(verified: &mut VerifiedDirectory, instance: &str) {
    verified.retain(|file| {
        let keep = file.content_id == ContentId::SharedParameters && file.instance == instance;
        if !keep {
            tracing::debug!(
                extension = instance,
                content_id = %file.content_id,
                file_instance = %file.instance,
                "skipping extension part"
            );
        }
        keep
    });
}
