//! `keystore` — operator command line for the pluggable key store.
//!
//! Connects to whichever backend the flags (or `KEYSTORE_*` environment
//! variables) select, runs one command under a deadline, and closes the
//! store again.

#![allow(clippy::print_stdout, clippy::print_stderr)]

use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use clap::{Parser, Subcommand, ValueEnum};
use tracing::{debug, warn};

use keystore_backend::{CallContext, KeyStore, MongoConfig, StoreBackendType, StoreConfig};

// ── CLI structure ────────────────────────────────────────────────────

/// Keystore — probe and manage secrets in a pluggable key store.
#[derive(Parser)]
#[command(
    name = "keystore",
    version,
    about = "Keystore CLI — probe and manage secrets in a pluggable key store",
    long_about = None,
    after_help = "Examples:\n  \
        keystore --backend mongodb status\n  \
        keystore create tenant/a/master $(head -c 32 /dev/urandom | base64)\n  \
        keystore get tenant/a/master\n  \
        keystore list tenant/ --limit 100",
)]
struct Cli {
    /// Storage backend.
    #[arg(
        long,
        env = "KEYSTORE_BACKEND",
        value_enum,
        ignore_case = true,
        default_value_t = Backend::Memory
    )]
    backend: Backend,

    /// MongoDB connection string.
    #[arg(
        long,
        env = "KEYSTORE_MONGO_URI",
        default_value = "mongodb://127.0.0.1:27017",
        hide_env_values = true
    )]
    mongo_uri: String,

    /// MongoDB database holding the key collection.
    #[arg(long, env = "KEYSTORE_MONGO_DATABASE", default_value = "kes")]
    database: String,

    /// MongoDB collection holding one document per key.
    #[arg(long, env = "KEYSTORE_MONGO_COLLECTION", default_value = "keys")]
    collection: String,

    /// How long the driver waits for a reachable server, in seconds.
    #[arg(long, env = "KEYSTORE_MONGO_SERVER_SELECTION_TIMEOUT")]
    server_selection_timeout: Option<u64>,

    /// Deadline for the command, in seconds.
    #[arg(long, default_value = "10")]
    timeout: u64,

    /// Log filter, used when `RUST_LOG` is not set.
    #[arg(long, env = "KEYSTORE_LOG_LEVEL", default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Backend {
    /// In-process store, empty on every run.
    Memory,
    /// MongoDB collection.
    #[value(alias = "mongo")]
    Mongodb,
}

#[derive(Subcommand)]
enum Commands {
    /// Probe the backend and print its latency.
    Status,
    /// Store a new key. Fails if the name is taken.
    Create {
        /// Key name.
        name: String,
        /// Base64-encoded value (raw text with --plain).
        value: String,
        /// Treat the value as raw text instead of base64.
        #[arg(long)]
        plain: bool,
    },
    /// Print the value of a key (base64 unless --plain).
    Get {
        /// Key name.
        name: String,
        /// Print the value as text instead of base64.
        #[arg(long)]
        plain: bool,
    },
    /// Delete a key.
    Delete {
        /// Key name.
        name: String,
    },
    /// List key names starting with a prefix.
    List {
        /// Name prefix (empty lists everything).
        #[arg(default_value = "")]
        prefix: String,
        /// Maximum number of names (0 = all).
        #[arg(long, default_value = "0")]
        limit: usize,
    },
}

impl Commands {
    /// Whether the command changes what the store holds.
    fn mutates(&self) -> bool {
        matches!(self, Self::Create { .. } | Self::Delete { .. })
    }
}

impl Cli {
    fn store_config(&self) -> StoreConfig {
        let backend = match self.backend {
            Backend::Memory => StoreBackendType::Memory,
            Backend::Mongodb => StoreBackendType::MongoDb(MongoConfig {
                connection_string: self.mongo_uri.clone(),
                database: self.database.clone(),
                collection: self.collection.clone(),
                app_name: Some("keystore-cli".to_owned()),
                server_selection_timeout_secs: self.server_selection_timeout,
                ..MongoConfig::default()
            }),
        };
        StoreConfig { backend }
    }
}

// ── Entry point ──────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(level: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level)),
        )
        .with_writer(std::io::stderr)
        .init();
}

async fn run(cli: Cli) -> Result<()> {
    let config = cli.store_config();
    if cli.backend == Backend::Memory && cli.command.mutates() {
        eprintln!(
            "warning: the memory backend does not persist; \
             changes are lost when keystore exits (use --backend mongodb)"
        );
    }
    debug!(backend = ?cli.backend, "connecting to key store");
    let store = keystore_backend::connect(&config)
        .await
        .context("failed to connect to key store")?;

    let ctx = CallContext::with_timeout(Duration::from_secs(cli.timeout));
    let result = dispatch(store.as_ref(), &ctx, cli.command).await;

    if let Err(e) = store.close().await {
        warn!(error = %e, "failed to close key store");
    }
    result
}

async fn dispatch(store: &dyn KeyStore, ctx: &CallContext, cmd: Commands) -> Result<()> {
    match cmd {
        Commands::Status => cmd_status(store, ctx).await,
        Commands::Create { name, value, plain } => {
            cmd_create(store, ctx, &name, &value, plain).await
        }
        Commands::Get { name, plain } => cmd_get(store, ctx, &name, plain).await,
        Commands::Delete { name } => cmd_delete(store, ctx, &name).await,
        Commands::List { prefix, limit } => cmd_list(store, ctx, &prefix, limit).await,
    }
}

// ── Commands ─────────────────────────────────────────────────────────

async fn cmd_status(store: &dyn KeyStore, ctx: &CallContext) -> Result<()> {
    let state = store.status(ctx).await.context("status probe failed")?;
    println!(
        "reachable (latency: {:.2} ms)",
        state.latency.as_secs_f64() * 1000.0
    );
    Ok(())
}

async fn cmd_create(
    store: &dyn KeyStore,
    ctx: &CallContext,
    name: &str,
    value: &str,
    plain: bool,
) -> Result<()> {
    let bytes = decode_value(value, plain)?;
    store
        .create(ctx, name, &bytes)
        .await
        .with_context(|| format!("failed to create '{name}'"))?;
    println!("created '{name}'");
    Ok(())
}

async fn cmd_get(store: &dyn KeyStore, ctx: &CallContext, name: &str, plain: bool) -> Result<()> {
    let value = store
        .get(ctx, name)
        .await
        .with_context(|| format!("failed to read '{name}'"))?;
    println!("{}", encode_value(&value, plain));
    Ok(())
}

async fn cmd_delete(store: &dyn KeyStore, ctx: &CallContext, name: &str) -> Result<()> {
    store
        .delete(ctx, name)
        .await
        .with_context(|| format!("failed to delete '{name}'"))?;
    println!("deleted '{name}'");
    Ok(())
}

async fn cmd_list(
    store: &dyn KeyStore,
    ctx: &CallContext,
    prefix: &str,
    limit: usize,
) -> Result<()> {
    let listing = store
        .list(ctx, prefix, limit)
        .await
        .with_context(|| format!("failed to list keys with prefix '{prefix}'"))?;
    for name in &listing.names {
        println!("{name}");
    }
    if limit > 0 && listing.len() == limit {
        eprintln!("limit reached; last name: {}", listing.last_name);
    }
    Ok(())
}

// ── Value encoding ───────────────────────────────────────────────────

fn decode_value(value: &str, plain: bool) -> Result<Vec<u8>> {
    if plain {
        return Ok(value.as_bytes().to_vec());
    }
    BASE64
        .decode(value)
        .context("value is not valid base64 (use --plain for raw text)")
}

fn encode_value(value: &[u8], plain: bool) -> String {
    if plain {
        String::from_utf8_lossy(value).into_owned()
    } else {
        BASE64.encode(value)
    }
}
