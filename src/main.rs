use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use humantime::format_duration;
use tracing::{error, info, warn};

use picker_frame::auth::{CredentialStore, InstalledAppFlow};
use picker_frame::config::Configuration;
use picker_frame::logging;
use picker_frame::media::MediaFetcher;
use picker_frame::picker::{HttpPickerApi, PollPolicy, SessionClient};
use picker_frame::pipeline::{Acquisition, Pipeline};
use picker_frame::scan::LocalImageSet;
use picker_frame::slideshow::viewer;

#[derive(Debug, Parser)]
#[command(
    name = "picker-frame",
    version,
    about = "Pick photos on your phone, download them, and run a crossfade slideshow."
)]
struct Cli {
    /// Path to YAML config; built-in defaults when omitted.
    #[arg(short, long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Increase log verbosity (repeatable)
    #[arg(short = 'v', long = "verbose", global = true, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Clone, Copy, Subcommand)]
enum Command {
    /// Authorize, pick, download, then show the slideshow.
    Run,
    /// Obtain or refresh the access credential and persist it.
    Auth,
    /// Authorize, pick and download without opening a window.
    Select,
    /// Show the slideshow over what local storage already holds.
    Show,
}

#[tokio::main]
async fn main() {
    if let Err(err) = try_main().await {
        error!(error = ?err, "picker-frame exited with error");
        std::process::exit(1);
    }
}

async fn try_main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    let cfg = load_config(cli.config.as_ref())?;
    let command = cli.command.unwrap_or(Command::Run);
    info!(?command, "starting picker-frame");

    match command {
        Command::Auth => {
            let store = credential_store(&cfg)?;
            let credential = store.obtain().await.context("authorization failed")?;
            info!(
                path = %store.path().display(),
                expires_at = %credential.expires_at,
                "credential ready"
            );
        }
        Command::Show => show(&cfg)?,
        Command::Select => {
            acquire(&cfg).await?;
        }
        Command::Run => {
            if let Some(images) = acquire(&cfg).await? {
                present(&images, &cfg)?;
            }
        }
    }
    Ok(())
}

fn load_config(path: Option<&PathBuf>) -> Result<Configuration> {
    let cfg = match path {
        Some(path) => Configuration::from_yaml_file(path)
            .with_context(|| format!("failed to load configuration from {}", path.display()))?,
        None => Configuration::default(),
    };
    let cfg = cfg.validated().context("invalid configuration values")?;
    tracing::debug!("effective configuration:\n{cfg:#?}");
    Ok(cfg)
}

fn credential_store(cfg: &Configuration) -> Result<CredentialStore<InstalledAppFlow>> {
    let flow = InstalledAppFlow::from_config(&cfg.credentials, cfg.picker.request_timeout)
        .context("failed to prepare the consent flow")?;
    Ok(CredentialStore::new(
        cfg.credentials.token_cache.clone(),
        cfg.credentials.expiry_skew,
        flow,
    ))
}

/// Run the acquisition stage. `None` means the user never finished picking.
async fn acquire(cfg: &Configuration) -> Result<Option<LocalImageSet>> {
    let api = HttpPickerApi::from_config(&cfg.picker).context("failed to build picker client")?;
    let sessions = SessionClient::new(api, PollPolicy::from(&cfg.picker));
    let fetcher = MediaFetcher::from_config(&cfg.media, cfg.picker.request_timeout)
        .context("failed to build download client")?;
    let pipeline = Pipeline::new(credential_store(cfg)?, sessions, fetcher, cfg.clone());

    let outcome = tokio::select! {
        outcome = pipeline.acquire() => outcome?,
        _ = tokio::signal::ctrl_c() => {
            warn!("ctrl-c received; abandoning selection");
            return Ok(None);
        }
    };
    match outcome {
        Acquisition::Downloaded { report, images } => {
            info!(
                saved = report.saved_count(),
                failed = report.failed_count(),
                local = images.len(),
                "acquisition finished"
            );
            Ok(Some(images))
        }
        Acquisition::SelectionNotCompleted {
            session_id,
            elapsed,
        } => {
            warn!(
                %session_id,
                waited = %format_duration(elapsed),
                "selection not completed; nothing to show"
            );
            Ok(None)
        }
    }
}

fn show(cfg: &Configuration) -> Result<()> {
    let images = LocalImageSet::scan(&cfg.media.storage_dir, &cfg.slideshow.extensions)
        .context("failed to scan local storage")?;
    info!(count = images.len(), dir = %cfg.media.storage_dir.display(), "local images");
    present(&images, cfg)
}

/// The event loop owns the main thread until the window closes.
fn present(images: &LocalImageSet, cfg: &Configuration) -> Result<()> {
    viewer::run(images, &cfg.slideshow).context("slideshow failed")
}
