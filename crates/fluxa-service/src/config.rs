//! CLI flags, environment fallbacks, and optional config-file layering for
//! `fluxa-service` (§10.4).
//!
//! Shaped after `toka-orchestration-service::Cli` (`clap` flags with `env`
//! fallbacks) and `toka-config-cli`'s `ConfigError` style (one `thiserror`
//! variant per failure mode, constructor helpers, `is_*` predicates) for the
//! config-loading error type.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use fluxa_ledger::DEFAULT_LIVENESS_WINDOW_SECS;
use fluxa_ingest::MAX_INLINE_BYTES;
use thiserror::Error;

/// Storage backend selection (§10.1: in-memory for local dev, Postgres for
/// durability).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    /// In-memory relational store and ledger; data does not survive a
    /// restart. Suitable for local development and tests.
    Memory,
    /// `sqlx`-backed Postgres relational store and ledger (§6 schema).
    Postgres,
}

/// Command-line flags for the `fluxa-service` binary.
#[derive(Parser, Debug, Clone)]
#[command(name = "fluxa-service")]
#[command(about = "Fluxa event-ingestion pipeline: HTTP ingest, processor poll loop, read path")]
#[command(version)]
pub struct Cli {
    /// Optional TOML config file layered under CLI flags and environment
    /// variables (lowest precedence; §10.4).
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Address to bind the HTTP server to.
    #[arg(long, env = "FLUXA_BIND_ADDR", default_value = "0.0.0.0:8080")]
    pub bind_addr: String,

    /// Storage backend: `memory` or `postgres`.
    #[arg(long, env = "FLUXA_STORAGE", default_value = "memory")]
    pub storage: String,

    /// Postgres connection string; required when `--storage postgres`.
    #[arg(long, env = "DATABASE_URL")]
    pub database_url: Option<String>,

    /// Root directory for the filesystem-backed blob store.
    #[arg(long, env = "FLUXA_BLOB_ROOT", default_value = "data/blobs")]
    pub blob_root: PathBuf,

    /// Maximum bytes a payload may be before it is offloaded to the blob
    /// store (§4.1 `MAX_INLINE_BYTES`).
    #[arg(long, env = "FLUXA_MAX_INLINE_BYTES", default_value_t = MAX_INLINE_BYTES)]
    pub max_inline_bytes: usize,

    /// Ledger claim liveness window, in seconds (§4.2).
    #[arg(long, env = "FLUXA_LIVENESS_WINDOW_SECS", default_value_t = DEFAULT_LIVENESS_WINDOW_SECS)]
    pub liveness_window_secs: i64,

    /// Per-operation DB timeout, in seconds (§5).
    #[arg(long, env = "FLUXA_DB_TIMEOUT_SECS", default_value_t = 5)]
    pub db_timeout_secs: u64,

    /// Blob fetch/write timeout, in seconds (§5).
    #[arg(long, env = "FLUXA_BLOB_TIMEOUT_SECS", default_value_t = 10)]
    pub blob_timeout_secs: u64,

    /// How often the processor polls the queue for a new batch, in
    /// milliseconds.
    #[arg(long, env = "FLUXA_POLL_INTERVAL_MS", default_value_t = 250)]
    pub poll_interval_ms: u64,

    /// Maximum messages fetched per poll (§4.4 "Batch contract": the core
    /// handles `1..N`).
    #[arg(long, env = "FLUXA_BATCH_SIZE", default_value_t = 10)]
    pub batch_size: usize,

    /// Max-receive-count before the in-memory queue dead-letters a message
    /// (transport-owned per §9; the core assumes `>= 2`).
    #[arg(long, env = "FLUXA_MAX_RECEIVE_COUNT", default_value_t = 5)]
    pub max_receive_count: u32,

    /// Log level passed to `tracing_subscriber`'s `EnvFilter`.
    #[arg(long, env = "FLUXA_LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

/// Fully resolved, validated application configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Address to bind the HTTP server to.
    pub bind_addr: String,
    /// Selected relational/ledger backend.
    pub storage: StorageBackend,
    /// Postgres connection string, present iff `storage == Postgres`.
    pub database_url: Option<String>,
    /// Root directory for the filesystem blob store.
    pub blob_root: PathBuf,
    /// §4.1 threshold.
    pub max_inline_bytes: usize,
    /// §4.2 liveness window.
    pub liveness_window: Duration,
    /// §5 per-op DB timeout.
    pub db_timeout: Duration,
    /// §5 blob timeout.
    pub blob_timeout: Duration,
    /// Processor poll cadence.
    pub poll_interval: Duration,
    /// Processor batch size.
    pub batch_size: usize,
    /// In-memory queue's max-receive-count before dead-lettering.
    pub max_receive_count: u32,
    /// `tracing_subscriber::EnvFilter` directive.
    pub log_level: String,
}

/// Errors that can occur while assembling [`AppConfig`].
///
/// Grounded on `toka-config-cli::ConfigError`'s shape: one variant per
/// failure mode, a constructor helper per variant, `is_*` predicates for
/// callers that want to branch without matching.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// `--config` named a file that could not be read.
    #[error("configuration file not found or unreadable: {0}")]
    FileNotFound(PathBuf),

    /// The config file's contents could not be parsed.
    #[error("failed to parse configuration file '{file}': {reason}")]
    ParseError {
        /// The file that failed to parse.
        file: PathBuf,
        /// Underlying parser error text.
        reason: String,
    },

    /// `--storage` named something other than `memory` or `postgres`.
    #[error("unsupported storage backend '{0}'; expected 'memory' or 'postgres'")]
    InvalidStorageBackend(String),

    /// `--storage postgres` was selected without a database URL.
    #[error("--database-url (or DATABASE_URL) is required when --storage=postgres")]
    MissingDatabaseUrl,
}

impl ConfigError {
    /// Build a [`ConfigError::FileNotFound`].
    pub fn file_not_found<P: Into<PathBuf>>(path: P) -> Self {
        Self::FileNotFound(path.into())
    }

    /// Build a [`ConfigError::ParseError`].
    pub fn parse_error<P: Into<PathBuf>, R: Into<String>>(file: P, reason: R) -> Self {
        Self::ParseError {
            file: file.into(),
            reason: reason.into(),
        }
    }

    /// `true` for [`ConfigError::FileNotFound`].
    pub fn is_file_not_found(&self) -> bool {
        matches!(self, Self::FileNotFound(_))
    }

    /// `true` for [`ConfigError::InvalidStorageBackend`].
    pub fn is_invalid_backend(&self) -> bool {
        matches!(self, Self::InvalidStorageBackend(_))
    }
}

impl AppConfig {
    /// Resolve CLI flags (already merged with environment variables by
    /// `clap`) and an optional config file into a validated [`AppConfig`].
    ///
    /// Precedence, highest first: explicit CLI flag > environment variable
    /// (handled by `clap`'s `env` attribute before this function ever runs)
    /// > config file > built-in default. The config file only fills in
    /// values the caller left at their `clap` default, so an operator can
    /// check in a `fluxa.toml` for shared settings while still overriding
    /// any single value with a flag or env var.
    pub fn load(cli: Cli) -> Result<Self, ConfigError> {
        let mut cli = cli;

        if let Some(path) = cli.config.clone() {
            let file = FileOverrides::load(&path)?;
            file.apply(&mut cli);
        }

        let storage = match cli.storage.as_str() {
            "memory" => StorageBackend::Memory,
            "postgres" => StorageBackend::Postgres,
            other => return Err(ConfigError::InvalidStorageBackend(other.to_string())),
        };

        if storage == StorageBackend::Postgres && cli.database_url.is_none() {
            return Err(ConfigError::MissingDatabaseUrl);
        }

        Ok(AppConfig {
            bind_addr: cli.bind_addr,
            storage,
            database_url: cli.database_url,
            blob_root: cli.blob_root,
            max_inline_bytes: cli.max_inline_bytes,
            liveness_window: Duration::from_secs(cli.liveness_window_secs.max(0) as u64),
            db_timeout: Duration::from_secs(cli.db_timeout_secs),
            blob_timeout: Duration::from_secs(cli.blob_timeout_secs),
            poll_interval: Duration::from_millis(cli.poll_interval_ms),
            batch_size: cli.batch_size.max(1),
            max_receive_count: cli.max_receive_count.max(2),
            log_level: cli.log_level,
        })
    }
}

/// The subset of [`Cli`] fields a config file is allowed to override,
/// applied only where the running `Cli` still holds its `clap` default
/// (so an explicit flag or env var always wins).
struct FileOverrides {
    raw: config::Config,
}

impl FileOverrides {
    fn load(path: &PathBuf) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::file_not_found(path.clone()));
        }
        let raw = config::Config::builder()
            .add_source(config::File::from(path.clone()))
            .build()
            .map_err(|e| ConfigError::parse_error(path.clone(), e.to_string()))?;
        Ok(Self { raw })
    }

    fn apply(&self, cli: &mut Cli) {
        let defaults = Cli::parse_from(["fluxa-service"]);

        if cli.bind_addr == defaults.bind_addr {
            if let Ok(v) = self.raw.get_string("bind_addr") {
                cli.bind_addr = v;
            }
        }
        if cli.storage == defaults.storage {
            if let Ok(v) = self.raw.get_string("storage") {
                cli.storage = v;
            }
        }
        if cli.database_url.is_none() {
            if let Ok(v) = self.raw.get_string("database_url") {
                cli.database_url = Some(v);
            }
        }
        if cli.blob_root == defaults.blob_root {
            if let Ok(v) = self.raw.get_string("blob_root") {
                cli.blob_root = PathBuf::from(v);
            }
        }
        if cli.max_inline_bytes == defaults.max_inline_bytes {
            if let Ok(v) = self.raw.get_int("max_inline_bytes") {
                cli.max_inline_bytes = v as usize;
            }
        }
        if cli.liveness_window_secs == defaults.liveness_window_secs {
            if let Ok(v) = self.raw.get_int("liveness_window_secs") {
                cli.liveness_window_secs = v;
            }
        }
        if cli.db_timeout_secs == defaults.db_timeout_secs {
            if let Ok(v) = self.raw.get_int("db_timeout_secs") {
                cli.db_timeout_secs = v as u64;
            }
        }
        if cli.blob_timeout_secs == defaults.blob_timeout_secs {
            if let Ok(v) = self.raw.get_int("blob_timeout_secs") {
                cli.blob_timeout_secs = v as u64;
            }
        }
        if cli.poll_interval_ms == defaults.poll_interval_ms {
            if let Ok(v) = self.raw.get_int("poll_interval_ms") {
                cli.poll_interval_ms = v as u64;
            }
        }
        if cli.batch_size == defaults.batch_size {
            if let Ok(v) = self.raw.get_int("batch_size") {
                cli.batch_size = v as usize;
            }
        }
        if cli.max_receive_count == defaults.max_receive_count {
            if let Ok(v) = self.raw.get_int("max_receive_count") {
                cli.max_receive_count = v as u32;
            }
        }
        if cli.log_level == defaults.log_level {
            if let Ok(v) = self.raw.get_string("log_level") {
                cli.log_level = v;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_cli() -> Cli {
        Cli::parse_from(["fluxa-service"])
    }

    #[test]
    fn defaults_resolve_to_memory_backend() {
        let config = AppConfig::load(base_cli()).unwrap();
        assert_eq!(config.storage, StorageBackend::Memory);
        assert!(config.database_url.is_none());
    }

    #[test]
    fn postgres_backend_without_url_is_rejected() {
        let mut cli = base_cli();
        cli.storage = "postgres".to_string();
        let err = AppConfig::load(cli).unwrap_err();
        assert!(matches!(err, ConfigError::MissingDatabaseUrl));
    }

    #[test]
    fn postgres_backend_with_url_is_accepted() {
        let mut cli = base_cli();
        cli.storage = "postgres".to_string();
        cli.database_url = Some("postgres://localhost/fluxa".to_string());
        let config = AppConfig::load(cli).unwrap();
        assert_eq!(config.storage, StorageBackend::Postgres);
    }

    #[test]
    fn unknown_backend_is_rejected() {
        let mut cli = base_cli();
        cli.storage = "dynamodb".to_string();
        let err = AppConfig::load(cli).unwrap_err();
        assert!(err.is_invalid_backend());
    }

    #[test]
    fn batch_size_is_floored_at_one() {
        let mut cli = base_cli();
        cli.batch_size = 0;
        let config = AppConfig::load(cli).unwrap();
        assert_eq!(config.batch_size, 1);
    }
}
