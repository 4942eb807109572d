#[cfg(test)]
mod tests;

use crate::config::credentials::configured_credentials;
use crate::config::{Config, get_config_path, load_config, ref_store_path};
use crate::dedup::{DedupCache, spawn_purge_task};
use crate::incoming::{IncomingProcessor, IncomingSettings};
use crate::outgoing::{GraphClient, Outgoing};
use crate::pending::{PendingAckTable, spawn_expiry_sweeper};
use crate::profile::{DEFAULT_PROFILE_CACHE_SIZE, GraphProfileResolver};
use crate::refstore::SqliteRefStore;
use crate::sink::{ChannelSink, DEFAULT_SINK_CAPACITY, NormalizedEvent};
use crate::webhook::{self, WebhookState};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "fbrelay")]
#[command(about = "Messenger webhook relay with dedup and delivery tracking")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the webhook receiver
    Serve {
        /// Config file (defaults to ~/.fbrelay/config.json)
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Load and validate the config, then print it with secrets redacted
    CheckConfig {
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

pub async fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { config } => {
            serve(config).await?;
        }
        Commands::CheckConfig { config } => {
            check_config(config)?;
        }
    }

    Ok(())
}

async fn serve(config_path: Option<PathBuf>) -> Result<()> {
    info!("Loading configuration...");
    let config = load_config(config_path.as_deref())?;
    if config.messenger.page_access_token.is_empty() {
        warn!("messenger.pageAccessToken is empty, profile lookups and replies will fail");
    }

    let pending = Arc::new(PendingAckTable::new());
    let sweeper = spawn_expiry_sweeper(
        pending.clone(),
        Duration::from_secs(config.pending.sweep_interval_secs),
        Duration::from_secs(config.pending.max_age_secs),
    );

    let dedup = Arc::new(DedupCache::new(
        config.dedup.max_entries,
        Duration::from_secs(config.dedup.ttl_secs),
    ));
    let purger = spawn_purge_task(
        dedup.clone(),
        Duration::from_secs(config.pending.sweep_interval_secs),
    );

    let (sink, sink_rx) = ChannelSink::new(DEFAULT_SINK_CAPACITY);
    let processor = Arc::new(build_processor(&config, dedup, pending, Arc::new(sink))?);
    let consumer = tokio::spawn(forward_to_stdout(sink_rx));

    let state = WebhookState::new(
        processor,
        &config.webhook.verify_token,
        &config.webhook.app_secret,
    );
    let server = webhook::start(
        &config.webhook.host,
        config.webhook.port,
        &config.webhook.path,
        state,
    )
    .await?;

    println!(
        "fbrelay listening on http://{}:{}{}",
        config.webhook.host, config.webhook.port, config.webhook.path
    );

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            println!("\nShutting down...");
        }
        _ = server => {
            warn!("webhook server stopped");
        }
    }

    sweeper.abort();
    purger.abort();
    consumer.abort();
    Ok(())
}

/// Wire the inbound processor against the Graph API, the SQLite ref store,
/// and the given dedup cache and sink.
fn build_processor(
    config: &Config,
    dedup: Arc<DedupCache>,
    pending: Arc<PendingAckTable>,
    sink: Arc<ChannelSink>,
) -> Result<IncomingProcessor> {
    let messenger = &config.messenger;
    let api = Arc::new(GraphClient::new(
        &messenger.graph_api_base,
        &messenger.page_access_token,
    ));
    let outgoing = Arc::new(Outgoing::new(api, pending.clone()));
    let profiles = Arc::new(GraphProfileResolver::new(
        &messenger.graph_api_base,
        &messenger.page_access_token,
        DEFAULT_PROFILE_CACHE_SIZE,
    ));

    let refs_path = ref_store_path(config)?;
    let refs = Arc::new(
        SqliteRefStore::open(&refs_path)
            .with_context(|| format!("Failed to open ref store at {}", refs_path.display()))?,
    );
    info!("ref store at {}", refs_path.display());

    Ok(IncomingProcessor::new(
        dedup,
        pending,
        profiles,
        sink,
        refs,
        outgoing,
        IncomingSettings::from(messenger),
    ))
}

/// Drain normalized events as JSON lines on stdout.
async fn forward_to_stdout(mut rx: mpsc::Receiver<NormalizedEvent>) {
    while let Some(event) = rx.recv().await {
        match serde_json::to_string(&event) {
            Ok(line) => println!("{}", line),
            Err(e) => warn!("failed to serialize {} event: {}", event.kind, e),
        }
    }
}

fn check_config(config_path: Option<PathBuf>) -> Result<()> {
    let path = match config_path {
        Some(path) => path,
        None => get_config_path()?,
    };
    let config = load_config(Some(&path))?;
    println!("{}", describe_config(&path, &config));
    Ok(())
}

fn describe_config(path: &std::path::Path, config: &Config) -> String {
    let credentials = configured_credentials(config);
    let credentials = if credentials.is_empty() {
        "none".to_string()
    } else {
        credentials.join(", ")
    };
    format!(
        "\u{2713} Config OK: {}\nCredentials set: {}\n{:#?}",
        path.display(),
        credentials,
        config
    )
}
