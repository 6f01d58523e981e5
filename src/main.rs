//! Tracewire CLI

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use tracewire::collector::Collector;
use tracewire::config::Config;
use tracewire::storage;
use tracewire::transport::TransportServer;

#[derive(Debug, Parser)]
#[command(name = "tracewire", version, about = "Collect and inspect recorded sessions")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Receive entries from a recorder until Ctrl-C, then save them
    Collect {
        /// Channel name, or a socket path; defaults to the configured channel
        #[arg(short, long)]
        channel: Option<String>,

        /// Session file to write; `.json` is added when there is no extension
        #[arg(short, long)]
        out: PathBuf,

        /// Name stored in the session
        #[arg(long, default_value = "collected")]
        name: String,

        /// TOML configuration for transport settings
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Show entry counts and correlation groups of a session file
    Stats {
        /// Session file
        file: PathBuf,
    },

    /// Validate a TOML configuration file
    CheckConfig {
        /// Configuration file
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    match cli.command {
        Commands::Collect {
            channel,
            out,
            name,
            config,
        } => collect(channel, &out, &name, config.as_deref()).await,
        Commands::Stats { file } => stats(&file),
        Commands::CheckConfig { file } => check_config(&file),
    }
}

async fn collect(
    channel: Option<String>,
    out: &Path,
    name: &str,
    config: Option<&Path>,
) -> anyhow::Result<()> {
    let config = match config {
        Some(path) => {
            Config::from_file(path).with_context(|| format!("loading {}", path.display()))?
        }
        None => Config::default(),
    };
    let channel = channel.unwrap_or_else(|| config.recording.channel_name.clone());

    let server = TransportServer::new(&channel, &config.transport);
    let events = server
        .start()
        .with_context(|| format!("listening on {}", server.path().display()))?;
    let collector = tokio::spawn(Collector::new().run(events));

    tokio::signal::ctrl_c()
        .await
        .context("waiting for Ctrl-C")?;
    info!("Received SIGINT, saving session");

    server.stop().await;
    let collector = collector.await.context("collector task failed")?;

    let out = &storage::session_path(out);

    collector
        .save(name, out)
        .with_context(|| format!("saving {}", out.display()))?;
    println!(
        "Collected {} entries into {}",
        collector.entry_count(),
        out.display()
    );
    Ok(())
}

fn stats(file: &Path) -> anyhow::Result<()> {
    let session =
        storage::load(file).with_context(|| format!("reading {}", file.display()))?;

    println!("Session: {} ({})", session.name, session.id);
    println!("Started: {}", session.start_time);
    match session.end_time {
        Some(end) => println!("Ended:   {end} ({}s)", session.duration().num_seconds()),
        None => println!("Ended:   (not finalized)"),
    }
    if let Some(target) = &session.target {
        println!("Target:  {}", target.process_name);
    }
    println!("Entries: {}", session.entries.len());

    for (kind, count) in session.kind_counts() {
        println!("  {kind:<18} {count}");
    }

    let groups = session.correlation_groups();
    println!("Correlation groups: {}", groups.len());
    for (id, entries) in groups {
        println!("  {id:<20} {}", entries.len());
    }

    Ok(())
}

fn check_config(file: &Path) -> anyhow::Result<()> {
    let config =
        Config::from_file(file).with_context(|| format!("checking {}", file.display()))?;
    println!(
        "{} is valid (channel '{}', payload ceiling {} bytes)",
        file.display(),
        config.recording.channel_name,
        config.recording.max_payload_size
    );
    Ok(())
}
