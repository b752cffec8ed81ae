use std::{path::PathBuf, time::Duration};

use clap::{Parser, Subcommand};
use marketplace::{Config, ServeError};
use offline_sync::{HttpReplayer, OfflineStore, PendingAction, SyncError, drain};
use thiserror::Error;
use tracing::info;

use crate::logging;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("{0}")]
    Serve(#[from] ServeError),
    #[error("{0}")]
    Sync(#[from] SyncError),
    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Parser)]
#[command(name = "analog", version = "0.1.0")]
#[command(about = "Run the Analog Society marketplace and its offline queue")]
pub struct Cli {
    /// Write logs to a daily rolling file in this directory instead of stderr
    #[arg(long, global = true, env = "LOG_DIR")]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

impl Cli {
    pub async fn handle() -> Result<(), CliError> {
        let cli = Cli::parse();
        let _guard = logging::init(cli.log_dir.as_deref());

        match cli.command {
            Commands::Serve(cmd) => cmd.execute().await,
            Commands::Sync(cmd) => cmd.execute().await,
            Commands::Queue(cmd) => cmd.execute().await,
        }
    }
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Start the web server
    Serve(Serve),
    /// Replay queued offline actions against the server
    Sync(SyncQueue),
    /// Inspect or edit the offline store
    Queue(Queue),
}

#[derive(Debug, Parser)]
struct Serve {
    /// Overrides BIND_ADDRESS
    #[arg(short, long)]
    bind: Option<String>,

    /// Overrides DATABASE_URL
    #[arg(long)]
    database_url: Option<String>,

    /// Overrides UPLOADS_DIR
    #[arg(long)]
    uploads_dir: Option<PathBuf>,
}

impl Serve {
    fn config(self) -> Config {
        let mut config = Config::from_env();
        if let Some(bind) = self.bind {
            config.bind_address = bind;
        }
        if let Some(url) = self.database_url {
            config.database_url = url;
        }
        if let Some(dir) = self.uploads_dir {
            config.uploads_dir = dir;
        }
        config
    }

    async fn execute(self) -> Result<(), CliError> {
        marketplace::serve(self.config()).await?;
        Ok(())
    }
}

#[derive(Debug, Parser)]
struct StoreArgs {
    /// Offline store location
    #[arg(long, env = "OFFLINE_STORE", default_value = "sqlite://analog-offline.db")]
    store: String,
}

impl StoreArgs {
    async fn open(&self) -> Result<OfflineStore, CliError> {
        Ok(OfflineStore::open(&self.store).await?)
    }
}

#[derive(Debug, Parser)]
struct SyncQueue {
    #[command(flatten)]
    store: StoreArgs,

    /// Server that queued actions are sent to
    #[arg(long, env = "ANALOG_SERVER", default_value = "http://localhost:3045")]
    server: String,

    /// Session cookie (`analog.sid=...`) to send with every action
    #[arg(long, env = "ANALOG_COOKIE")]
    cookie: Option<String>,

    /// Per-request timeout in seconds
    #[arg(long, default_value_t = 10)]
    timeout: u64,
}

impl SyncQueue {
    async fn execute(self) -> Result<(), CliError> {
        let store = self.store.open().await?;
        let mut replayer = HttpReplayer::new(&self.server, Duration::from_secs(self.timeout))?;
        if let Some(cookie) = self.cookie {
            replayer = replayer.with_cookie(cookie);
        }

        let report = drain(&store, &replayer).await?;
        println!(
            "replayed {}, failed {}, remaining {}",
            report.replayed, report.failed, report.remaining
        );
        Ok(())
    }
}

#[derive(Debug, Parser)]
struct Queue {
    #[command(flatten)]
    store: StoreArgs,

    #[command(subcommand)]
    action: QueueAction,
}

#[derive(Debug, Subcommand)]
enum QueueAction {
    /// List queued actions, oldest first
    List,
    /// Queue a JSON request for the next sync
    Add {
        #[arg(short, long, default_value = "POST")]
        method: String,
        /// Path or absolute URL
        url: String,
        /// JSON body
        #[arg(short, long)]
        body: Option<String>,
    },
    /// Print everything held locally as JSON
    Export,
    /// Delete cached items, user data and queued actions
    Clear,
}

impl Queue {
    async fn execute(self) -> Result<(), CliError> {
        let store = self.store.open().await?;

        match self.action {
            QueueAction::List => {
                for queued in store.pending().await? {
                    println!(
                        "{}\t{}\t{} {}",
                        queued.id, queued.queued_at, queued.action.method, queued.action.url
                    );
                }
            }
            QueueAction::Add { method, url, body } => {
                let body: serde_json::Value = match body {
                    Some(raw) => serde_json::from_str(&raw)?,
                    None => serde_json::json!({}),
                };
                let id = store
                    .enqueue(&PendingAction::json(&method.to_ascii_uppercase(), &url, &body))
                    .await?;
                println!("queued {}", id);
            }
            QueueAction::Export => {
                let export = store.export().await?;
                println!("{}", serde_json::to_string_pretty(&export)?);
            }
            QueueAction::Clear => {
                store.clear().await?;
                info!("Offline store cleared from the command line");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn command_line_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn serve_flags_override_the_environment() {
        let cli = Cli::try_parse_from(["analog", "serve", "--bind", "127.0.0.1:9000"]).unwrap();
        let Commands::Serve(serve) = cli.command else {
            panic!("expected serve");
        };
        assert_eq!(serve.config().bind_address, "127.0.0.1:9000");
    }

    #[test]
    fn queue_add_parses() {
        let cli = Cli::try_parse_from([
            "analog",
            "queue",
            "--store",
            "sqlite::memory:",
            "add",
            "/requests",
            "--body",
            r#"{"itemId":1}"#,
        ])
        .unwrap();
        let Commands::Queue(queue) = cli.command else {
            panic!("expected queue");
        };
        assert_eq!(queue.store.store, "sqlite::memory:");
        assert!(matches!(queue.action, QueueAction::Add { ref url, .. } if url == "/requests"));
    }
}
