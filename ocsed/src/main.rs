use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use tracing_subscriber::EnvFilter;

use ocse_core::CseConfig;
use ocse_http::HttpSender;
use ocse_service::Cse;
use ocse_storage::{MemoryStorage, SqliteStorage, Storage};

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Backend {
    Memory,
    Sqlite,
}

/// oneM2M CSE server.
#[derive(Parser, Debug)]
#[command(name = "ocsed", version, about)]
struct Args {
    /// Path to the configuration file.
    #[arg(short, long, default_value = "ocse.yaml")]
    config: PathBuf,

    /// Configuration profile overlay (ocse-{profile}.yaml).
    #[arg(short, long)]
    profile: Option<String>,

    /// Storage backend.
    #[arg(long, value_enum, default_value_t = Backend::Sqlite)]
    db: Backend,

    /// SQLite database URL (ignored with --db memory).
    #[arg(long, default_value = "sqlite:ocse.db")]
    db_url: String,

    /// Override the configured HTTP listen address.
    #[arg(short, long)]
    listen: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Args::parse();
    let mut config = if args.config.exists() {
        CseConfig::load_with_profile(&args.config, args.profile.as_deref())?
    } else {
        tracing::warn!(path = %args.config.display(), "config file not found, using defaults");
        CseConfig::default()
    };
    if let Some(listen) = args.listen {
        config.http.listen = listen;
    }

    let storage: Arc<dyn Storage> = match args.db {
        Backend::Memory => Arc::new(MemoryStorage::new()),
        Backend::Sqlite => Arc::new(SqliteStorage::connect(&args.db_url).await?),
    };

    let sender = Arc::new(HttpSender::new(Duration::from_secs(
        config.request_expiration_delta,
    )));

    let listen = config.http.listen.clone();
    let cse = Cse::builder(config)
        .storage(storage)
        .sender(sender)
        .start()
        .await?;

    let server = {
        let cse = cse.clone();
        tokio::spawn(async move { ocse_http::serve(cse, &listen).await })
    };

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");
    cse.shutdown().await;
    server.await??;
    Ok(())
}
