//! Global configuration client binary.
//!
//! Without a subcommand it runs as a daemon: a scheduler refreshing the
//! configuration at a fixed interval plus an admin endpoint, shut down
//! gracefully on SIGTERM/SIGINT. The `download` and `validate`
//! subcommands run a single cycle and exit with its outcome code.

use clap::Parser;
use globalconf_client::admin;
use globalconf_client::cli::{Cli, Command, DownloadArgs, ValidateArgs};
use globalconf_client::config::{self, Config};
use globalconf_client::{
    spawn_scheduler, ClientContext, ConfigurationClient, CycleOptions, FetchSettings, HttpFetcher,
};
use globalconf_directory::ConfigurationAnchor;
use globalconf_store::{ConfigurationStore, DownloadedFiles};
use globalconf_types::exit_code;
use std::net::SocketAddr;
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

fn resolve_config_path(cli: &Cli) -> (String, &'static str) {
    if let Some(path) = cli.config.as_ref().filter(|p| !p.as_os_str().is_empty()) {
        return (path.to_string_lossy().into_owned(), "cli-arg");
    }

    if let Ok(path) = std::env::var("GLOBALCONF_CONFIG_PATH") {
        if !path.trim().is_empty() {
            return (path, "env-var");
        }
    }

    ("globalconf.toml".to_string(), "default")
}

fn init_tracing(config: &Config) {
    let filter =
        EnvFilter::try_new(&config.logging.level).unwrap_or_else(|_| EnvFilter::new("info"));

    if config.logging.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let (config_path, config_source) = resolve_config_path(&cli);

    let config = match config::load_config(Some(&config_path)) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("failed to load configuration from {config_path}: {e}");
            return ExitCode::from(exit_code::INTERNAL);
        }
    };
    init_tracing(&config);

    tracing::info!(
        source = config_source,
        path = %config_path,
        "resolved startup configuration path"
    );

    let fetcher = match HttpFetcher::new(FetchSettings {
        timeout: config.client.fetch_timeout(),
        max_bytes: config.client.max_document_bytes,
    }) {
        Ok(fetcher) => fetcher,
        Err(e) => {
            tracing::error!(error = %e, "failed to build HTTP client");
            return ExitCode::from(exit_code::INTERNAL);
        }
    };

    match cli.command {
        None | Some(Command::Daemon) => run_daemon(config, fetcher).await,
        Some(Command::Download(args)) => run_download(args, fetcher).await,
        Some(Command::Validate(args)) => run_validate(args, &config, fetcher).await,
    }
}

fn load_anchor(path: &Path) -> Option<ConfigurationAnchor> {
    match ConfigurationAnchor::load(path) {
        Ok(anchor) => Some(anchor),
        Err(e) => {
            tracing::error!(path = %path.display(), error = %e, "failed to load configuration anchor");
            None
        }
    }
}

async fn run_download(args: DownloadArgs, fetcher: HttpFetcher) -> ExitCode {
    let Some(anchor) = load_anchor(&args.anchor) else {
        return ExitCode::from(exit_code::INTERNAL);
    };
    let client = ConfigurationClient::new(
        fetcher,
        ConfigurationStore::new(&args.destination),
        ClientContext::new(anchor, DownloadedFiles::detached()),
    );
    let report = client.run_cycle(&CycleOptions::download()).await;
    ExitCode::from(report.exit_code())
}

async fn run_validate(args: ValidateArgs, config: &Config, fetcher: HttpFetcher) -> ExitCode {
    let Some(anchor) = load_anchor(&args.anchor) else {
        return ExitCode::from(exit_code::INTERNAL);
    };
    let client = ConfigurationClient::new(
        fetcher,
        ConfigurationStore::new(&config.client.configuration_path),
        ClientContext::new(anchor, DownloadedFiles::detached()),
    );
    let options = CycleOptions::validate(args.requirement(), args.allow_expired);
    let report = client.run_cycle(&options).await;
    if report.outcome.is_success() {
        println!("configuration is valid ({} files)", report.persisted.len());
    } else {
        println!(
            "configuration is not valid: {}",
            report.error.as_deref().unwrap_or(report.outcome.label())
        );
    }
    ExitCode::from(report.exit_code())
}

async fn run_daemon(config: Config, fetcher: HttpFetcher) -> ExitCode {
    let Some(anchor) = load_anchor(&config.client.anchor_path) else {
        return ExitCode::from(exit_code::INTERNAL);
    };
    let store = ConfigurationStore::new(&config.client.configuration_path);
    let downloaded = match DownloadedFiles::load(store.index_path()) {
        Ok(index) => index,
        Err(e) => {
            tracing::error!(error = %e, "failed to load downloaded files index");
            return ExitCode::from(exit_code::INTERNAL);
        }
    };

    let client = Arc::new(ConfigurationClient::new(
        fetcher,
        store,
        ClientContext::new(anchor, downloaded),
    ));

    let addr = SocketAddr::new(config.admin.host, config.admin.port);
    let listener = match TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(%addr, error = %e, "failed to bind admin endpoint");
            return ExitCode::from(exit_code::INTERNAL);
        }
    };

    let scheduler = spawn_scheduler(
        Arc::clone(&client),
        config.client.update_interval(),
        CycleOptions::daemon(),
    );

    tracing::info!(%addr, "starting globalconf client");

    let served = admin::serve(listener, admin::router(client), shutdown_signal()).await;
    scheduler.shutdown().await;

    match served {
        Ok(()) => {
            tracing::info!("globalconf client shut down");
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(error = %e, "admin endpoint error");
            ExitCode::from(exit_code::INTERNAL)
        }
    }
}

/// Waits for a SIGINT (Ctrl+C) or SIGTERM signal for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => { tracing::info!("received SIGINT, initiating graceful shutdown"); }
        () = terminate => { tracing::info!("received SIGTERM, initiating graceful shutdown"); }
    }
}
