//! kphttp Daemon
//!
//! Answers KeePassHTTP requests read as newline-delimited JSON on stdin,
//! writing one JSON response per line to stdout. New associations are
//! approved by the operator on the terminal.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::io::BufReader;
use tracing::info;

use kphttp_core::config::{Config, default_database_path, load_config};
use kphttp_core::tracing_init::init_tracing;
use kphttp_core::{ApprovalPrompt, DenyAll, Host, JsonCredentialStore, ProtocolEngine};
use kphttp_daemon::prompt::TerminalPrompt;
use kphttp_daemon::server::serve;

#[derive(Parser, Debug)]
#[command(name = "kphttp-daemon")]
#[command(version, about = "KeePassHTTP host over newline-delimited JSON")]
struct Args {
    /// Config file (defaults to the global kphttp/settings.json)
    #[arg(long, env = "KPHTTP_CONFIG")]
    config: Option<PathBuf>,

    /// Credential database file; created when missing
    #[arg(long)]
    database: Option<PathBuf>,

    /// Log level filter (e.g. "info", "debug", "warn")
    #[arg(long)]
    log_level: Option<String>,

    /// Output logs as JSON.
    #[arg(long)]
    log_json: bool,

    /// Refuse every association without asking.
    #[arg(long, env = "KPHTTP_AUTO_DENY")]
    auto_deny: bool,
}

impl Args {
    /// Command-line values win over the config file and environment.
    fn apply(&self, config: &mut Config) {
        if let Some(path) = &self.database {
            config.daemon.database_path = Some(path.clone());
        }
        if let Some(level) = &self.log_level {
            config.daemon.log_level.clone_from(level);
        }
        if self.log_json {
            config.daemon.log_json = true;
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let mut config = load_config(args.config.as_deref())?;
    args.apply(&mut config);

    let log_filter = format!(
        "kphttp_daemon={0},kphttp_core={0}",
        config.daemon.log_level
    );
    init_tracing(&log_filter, config.daemon.log_json);

    let Some(database_path) = config.daemon.database_path.clone().or_else(default_database_path)
    else {
        anyhow::bail!("Cannot determine a database location; pass --database");
    };

    info!(
        version = env!("CARGO_PKG_VERSION"),
        database = %database_path.display(),
        auto_deny = args.auto_deny,
        "Starting kphttp-daemon"
    );

    let store = Arc::new(JsonCredentialStore::open(&database_path)?);
    let prompt: Arc<dyn ApprovalPrompt> = if args.auto_deny {
        Arc::new(DenyAll)
    } else {
        Arc::new(TerminalPrompt)
    };
    let engine = ProtocolEngine::new(store, prompt).with_config(config.protocol.clone());

    let host = Host::new();
    host.open(Arc::new(engine)).await;

    serve(&host, BufReader::new(tokio::io::stdin()), tokio::io::stdout()).await?;
    host.close().await;

    info!("kphttp-daemon stopped");
    Ok(())
}
