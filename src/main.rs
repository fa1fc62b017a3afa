use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::filter::{EnvFilter, LevelFilter};
use updatex::core::config_manager;
use updatex::{
    CachedArtifact, CheckOutcome, Downloader, FeedProbeAgent, FeedServerSession, HostContext,
    Platform, UpdateCheckResult, UpdateChecker, UpdateEvent, UpdateManager, UpdateState,
    UpdaterConfig,
};

#[derive(Parser)]
#[command(name = "updatex", version, about = "Check, download and serve application updates")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Check a manifest for a newer version
    Check {
        /// Manifest URL
        #[arg(long)]
        url: String,
        /// Version to compare against, defaults to this binary's version
        #[arg(long)]
        current: Option<String>,
        /// Manifest key to read, defaults to the running platform
        #[arg(long)]
        platform: Option<String>,
    },
    /// Serve local files on a loopback feed until delivered or interrupted
    Serve {
        #[arg(long)]
        artifact: PathBuf,
        /// Delta release index to expose at /RELEASES
        #[arg(long)]
        releases: Option<PathBuf>,
    },
    /// Run a full update cycle, staging the artifact through the feed
    Run {
        /// Config file, defaults to the one in the user data directory
        #[arg(long)]
        config: Option<PathBuf>,
        /// Override the manifest URL from the config
        #[arg(long)]
        url: Option<String>,
        /// Override the running version from the config
        #[arg(long)]
        current: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy()
        .add_directive("hyper=off".parse()?)
        .add_directive("reqwest=warn".parse()?);
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match Cli::parse().command {
        Command::Check {
            url,
            current,
            platform,
        } => check(url, current, platform).await,
        Command::Serve { artifact, releases } => serve(artifact, releases).await,
        Command::Run {
            config,
            url,
            current,
        } => run(config, url, current).await,
    }
}

async fn check(url: String, current: Option<String>, platform: Option<String>) -> Result<()> {
    let current = current.unwrap_or_else(|| UpdateManager::current_version().to_string());
    let platform = platform
        .map(|name| Platform::from(name.as_str()))
        .unwrap_or_else(Platform::current);

    let downloader = Downloader::new(UpdaterConfig::default().stall_timeout())?;
    let checker = UpdateChecker::new(downloader).with_platform(platform.clone());

    match checker.check(&url, &current).await? {
        UpdateCheckResult::UpdateAvailable(meta) => {
            println!("Update available for {}: {} -> {}", platform, current, meta.version);
            if let Some(artifact) = meta.artifact_url() {
                println!("  artifact: {}", artifact);
            }
            if let Some(releases) = meta.release_index_url() {
                println!("  releases: {}", releases);
            }
        }
        UpdateCheckResult::NoUpdate => {
            println!("No update available for {} (current: {})", platform, current);
        }
    }
    Ok(())
}

async fn serve(artifact: PathBuf, releases: Option<PathBuf>) -> Result<()> {
    anyhow::ensure!(artifact.is_file(), "artifact {} not found", artifact.display());

    let mut cached = CachedArtifact::single(artifact);
    if let Some(releases) = releases {
        anyhow::ensure!(releases.is_file(), "release index {} not found", releases.display());
        cached = cached.with_releases(releases);
    }

    let session = FeedServerSession::start(&cached).await?;
    tracing::info!(feed = %session.feed_url(), "feed session started");
    println!("Feed: {}", session.feed_url());
    println!("Artifact: {}", session.asset_url());

    tokio::select! {
        _ = session.closed() => println!("Artifact delivered, feed closed"),
        _ = tokio::signal::ctrl_c() => {
            session.shutdown();
            session.closed().await;
            println!("Feed closed");
        }
    }
    Ok(())
}

async fn run(
    config_path: Option<PathBuf>,
    url: Option<String>,
    current: Option<String>,
) -> Result<()> {
    let mut config = match config_path {
        Some(path) => config_manager::load_config(&path)?,
        None => config_manager::load_user_config()?,
    };
    if let Some(url) = url {
        config.url = url;
    }
    if let Some(current) = current {
        config.version = current;
    }
    // the cycle is driven below rather than from a background task
    let config = config.with_check_on_start(false);

    let staging = config_manager::get_staging_dir()?;
    let (agent, agent_events) = FeedProbeAgent::channel(&staging);
    let manager = UpdateManager::initialize(config, &HostContext::from_env(), Arc::new(agent))
        .context("failed to start the update manager")?;
    if manager.state() == UpdateState::Disabled {
        println!("Updates are disabled");
        return Ok(());
    }

    manager.attach_native_events(agent_events);
    let (_, mut events) = manager.events().subscribe_channel();

    let outcome = manager.check_for_updates().await?;
    while let Ok(event) = events.try_recv() {
        print_event(&event);
    }

    match outcome {
        CheckOutcome::Available(_) if manager.state() == UpdateState::Serving => {
            while let Some(event) = events.recv().await {
                print_event(&event);
                if matches!(event, UpdateEvent::UpdateDownloaded(_) | UpdateEvent::Error(_)) {
                    break;
                }
            }
            if manager.state() == UpdateState::Completed {
                println!("Update staged in {}", staging.display());
            }
        }
        CheckOutcome::Available(meta) if !manager.config().auto_download => {
            println!(
                "Version {} is available; enable autoDownload to fetch it",
                meta.version
            );
        }
        _ => {}
    }
    Ok(())
}

fn print_event(event: &UpdateEvent) {
    match event {
        UpdateEvent::DownloadProgress(percent) => {
            if percent % 10 == 0 {
                println!("[{}] {}%", event.name(), percent);
            }
        }
        UpdateEvent::Error(message) => eprintln!("[{}] {}", event.name(), message),
        _ => match event.metadata() {
            Some(meta) => println!("[{}] {}", event.name(), meta.version),
            None => println!("[{}]", event.name()),
        },
    }
}
