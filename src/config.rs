use anyhow::{Context, Result};
use clap::Parser;
use std::env;

use crate::services::{DEFAULT_LOOK_AHEAD, DEFAULT_SHARD_SIZE, DEFAULT_WRITE_WINDOW};

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    pub spool_dir: String,
    pub shard_size: usize,
    pub look_ahead: usize,
    pub write_window: usize,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "Chunked blob store over a key-value substrate")]
pub struct Args {
    /// Host to bind to (overrides SHARDFS_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides SHARDFS_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Database URL (overrides SHARDFS_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Directory where uploads are spooled (overrides SHARDFS_SPOOL_DIR)
    #[arg(long)]
    pub spool_dir: Option<String>,

    /// Shard size in bytes (overrides SHARDFS_SHARD_SIZE)
    #[arg(long)]
    pub shard_size: Option<usize>,

    /// Reader look-ahead window in shards (overrides SHARDFS_LOOK_AHEAD)
    #[arg(long)]
    pub look_ahead: Option<usize>,

    /// Writer in-flight window in shards (overrides SHARDFS_WRITE_WINDOW)
    #[arg(long)]
    pub write_window: Option<usize>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        // Parse CLI once
        let args = Args::parse();

        // --- Environment fallback ---
        let env_host = env::var("SHARDFS_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let env_port = parse_env("SHARDFS_PORT", 3000u16)?;
        let env_db = env::var("SHARDFS_DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://./data/shardfs.db".into());
        let env_spool = env::var("SHARDFS_SPOOL_DIR").unwrap_or_else(|_| "./data/spool".into());
        let env_shard_size = parse_env("SHARDFS_SHARD_SIZE", DEFAULT_SHARD_SIZE)?;
        let env_look_ahead = parse_env("SHARDFS_LOOK_AHEAD", DEFAULT_LOOK_AHEAD)?;
        let env_write_window = parse_env("SHARDFS_WRITE_WINDOW", DEFAULT_WRITE_WINDOW)?;

        // --- Merge ---
        let cfg = Self {
            host: args.host.unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            database_url: args.database_url.unwrap_or(env_db),
            spool_dir: args.spool_dir.unwrap_or(env_spool),
            shard_size: args.shard_size.unwrap_or(env_shard_size),
            look_ahead: args.look_ahead.unwrap_or(env_look_ahead),
            write_window: args.write_window.unwrap_or(env_write_window),
        };

        Ok((cfg, args.migrate))
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_env<T>(name: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(value) => value
            .parse::<T>()
            .with_context(|| format!("parsing {} value `{}`", name, value)),
        Err(env::VarError::NotPresent) => Ok(default),
        Err(err) => Err(err).context(format!("reading {}", name)),
    }
}
