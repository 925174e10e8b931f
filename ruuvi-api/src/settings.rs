//! Layered startup configuration.
//!
//! Values are resolved in increasing precedence: built-in defaults, the TOML
//! config file, environment variables, then command-line flags. The config
//! file is taken from `--config` (or `RUUVI_CONFIG`); otherwise the first
//! `config.toml` found in `.`, `$HOME/.ruuvitag-measurement-api` and
//! `/etc/ruuvitag-measurement-api` is used. No file at all is fine.
//!
//! ```toml
//! loglevel = "debug"
//!
//! [columns]
//! time = "ts"
//! name = "device"
//! temperature = "temp_c"
//!
//! [postgres]
//! host = "db.local"
//! username = "ruuvi"
//! database = "ruuvi"
//! table = "ruuvitag"
//! name_table = "ruuvitag_names"
//!
//! [server]
//! port = 8080
//! tokens = ["dashboard-token"]
//! ```

use crate::auth::AuthConfig;
use crate::config::{process_env, ApiConfig, EnvLookup};
use crate::connection::BackoffConfig;
use crate::db::DbConfig;
use crate::telemetry::{LogFormat, TelemetryConfig};
use clap::Parser;
use ruuvi_core::{ColumnMapping, ConfigError};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_FILE_NAME: &str = "config.toml";
const CONFIG_DIR_NAME: &str = "ruuvitag-measurement-api";

// ============================================================================
// COMMAND LINE
// ============================================================================

#[derive(Debug, Clone, Default, Parser)]
#[command(
    name = "ruuvi-api",
    version,
    about = "REST API for the latest RuuviTag measurements stored in PostgreSQL"
)]
pub struct Cli {
    /// Config file (default: config.toml in ., $HOME/.ruuvitag-measurement-api
    /// or /etc/ruuvitag-measurement-api)
    #[arg(short, long, env = "RUUVI_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log filter, e.g. `info` or `ruuvi_api=debug,info`
    #[arg(long)]
    pub loglevel: Option<String>,

    #[arg(long = "postgres.host")]
    pub postgres_host: Option<String>,

    #[arg(long = "postgres.port")]
    pub postgres_port: Option<u16>,

    #[arg(long = "postgres.username")]
    pub postgres_username: Option<String>,

    #[arg(long = "postgres.password")]
    pub postgres_password: Option<String>,

    #[arg(long = "postgres.database")]
    pub postgres_database: Option<String>,

    /// Measurement table
    #[arg(long = "postgres.table")]
    pub postgres_table: Option<String>,

    /// Table listing device identities
    #[arg(long = "postgres.name_table")]
    pub postgres_name_table: Option<String>,

    #[arg(long = "server.port")]
    pub server_port: Option<u16>,

    /// Accepted bearer token; repeat or comma-separate for several
    #[arg(long = "server.token", value_delimiter = ',')]
    pub server_tokens: Vec<String>,

    /// Column mapping as logical=physical pairs, e.g. `time=ts,name=device`
    #[arg(long, value_delimiter = ',')]
    pub columns: Vec<String>,
}

impl Cli {
    fn apply_db(&self, db: &mut DbConfig) {
        overwrite(&mut db.host, &self.postgres_host);
        overwrite(&mut db.port, &self.postgres_port);
        overwrite(&mut db.user, &self.postgres_username);
        overwrite(&mut db.password, &self.postgres_password);
        overwrite(&mut db.dbname, &self.postgres_database);
        overwrite(&mut db.table, &self.postgres_table);
        overwrite(&mut db.name_table, &self.postgres_name_table);
    }
}

fn overwrite<T: Clone>(slot: &mut T, value: &Option<T>) {
    if let Some(value) = value {
        *slot = value.clone();
    }
}

// ============================================================================
// CONFIG FILE
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub loglevel: Option<String>,
    /// `json` or `text`
    pub log_format: Option<String>,
    /// Logical field name to physical column.
    pub columns: BTreeMap<String, String>,
    pub postgres: PostgresSection,
    pub server: ServerSection,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PostgresSection {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub database: Option<String>,
    pub table: Option<String>,
    pub name_table: Option<String>,
    pub connect_timeout_secs: Option<u64>,
    pub backoff: BackoffSection,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BackoffSection {
    pub min_ms: Option<u64>,
    pub max_ms: Option<u64>,
    pub max_times: Option<usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerSection {
    pub bind: Option<String>,
    pub port: Option<u16>,
    #[serde(alias = "token")]
    pub tokens: Vec<String>,
    pub request_timeout_secs: Option<u64>,
    pub health_timeout_secs: Option<u64>,
    pub max_n: Option<i64>,
    pub max_concurrent_requests: Option<usize>,
}

impl FileConfig {
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let file_error = |reason: String| ConfigError::File {
            path: path.display().to_string(),
            reason,
        };
        let contents = std::fs::read_to_string(path).map_err(|e| file_error(e.to_string()))?;
        Self::parse(&contents).map_err(|e| match e {
            ConfigError::File { reason, .. } => file_error(reason),
            other => other,
        })
    }

    pub fn parse(contents: &str) -> Result<Self, ConfigError> {
        toml::from_str(contents).map_err(|e: toml::de::Error| ConfigError::File {
            path: String::new(),
            reason: e.message().to_string(),
        })
    }

    /// Load `explicit` when given, else the first file on the search path.
    /// Returns the path that was read, if any.
    pub fn discover(
        explicit: Option<&Path>,
        env: EnvLookup<'_>,
    ) -> Result<(Self, Option<PathBuf>), ConfigError> {
        if let Some(path) = explicit {
            return Ok((Self::from_path(path)?, Some(path.to_path_buf())));
        }
        for path in search_paths(env("HOME").as_deref()) {
            if path.is_file() {
                return Ok((Self::from_path(&path)?, Some(path)));
            }
        }
        Ok((Self::default(), None))
    }

    fn apply_db(&self, db: &mut DbConfig) {
        let pg = &self.postgres;
        overwrite(&mut db.host, &pg.host);
        overwrite(&mut db.port, &pg.port);
        overwrite(&mut db.user, &pg.username);
        overwrite(&mut db.password, &pg.password);
        overwrite(&mut db.dbname, &pg.database);
        overwrite(&mut db.table, &pg.table);
        overwrite(&mut db.name_table, &pg.name_table);
        if let Some(secs) = pg.connect_timeout_secs {
            db.connect_timeout = Duration::from_secs(secs);
        }
    }

    fn apply_backoff(&self, backoff: &mut BackoffConfig) {
        let section = &self.postgres.backoff;
        if let Some(ms) = section.min_ms {
            backoff.min_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = section.max_ms {
            backoff.max_delay = Duration::from_millis(ms);
        }
        overwrite(&mut backoff.max_times, &section.max_times);
    }

    fn apply_api(&self, api: &mut ApiConfig) {
        let server = &self.server;
        overwrite(&mut api.bind_host, &server.bind);
        overwrite(&mut api.port, &server.port);
        if let Some(secs) = server.request_timeout_secs {
            api.request_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = server.health_timeout_secs {
            api.health_timeout = Duration::from_secs(secs);
        }
        overwrite(&mut api.max_n, &server.max_n);
        overwrite(&mut api.max_concurrent_requests, &server.max_concurrent_requests);
    }

    fn apply_telemetry(&self, telemetry: &mut TelemetryConfig) -> Result<(), ConfigError> {
        overwrite(&mut telemetry.filter, &self.loglevel);
        if let Some(format) = &self.log_format {
            telemetry.format =
                format
                    .parse::<LogFormat>()
                    .map_err(|e| ConfigError::InvalidValue {
                        field: "log_format".to_string(),
                        value: format.clone(),
                        reason: e.message,
                    })?;
        }
        Ok(())
    }
}

/// Candidate config files, in lookup order.
pub fn search_paths(home: Option<&str>) -> Vec<PathBuf> {
    let mut paths = vec![PathBuf::from(CONFIG_FILE_NAME)];
    if let Some(home) = home.filter(|h| !h.is_empty()) {
        paths.push(
            Path::new(home)
                .join(format!(".{}", CONFIG_DIR_NAME))
                .join(CONFIG_FILE_NAME),
        );
    }
    paths.push(Path::new("/etc").join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME));
    paths
}

// ============================================================================
// RESOLVED SETTINGS
// ============================================================================

#[derive(Debug, Clone)]
pub struct Settings {
    pub db: DbConfig,
    pub backoff: BackoffConfig,
    pub api: ApiConfig,
    pub auth: AuthConfig,
    pub columns: ColumnMapping,
    pub telemetry: TelemetryConfig,
    /// Config file that was read, if any.
    pub source: Option<PathBuf>,
}

impl Settings {
    /// Resolve against the process environment and the file system.
    pub fn load(cli: &Cli) -> Result<Self, ConfigError> {
        let (file, source) = FileConfig::discover(cli.config.as_deref(), &process_env)?;
        let mut settings = Self::resolve(cli, &file, &process_env)?;
        settings.source = source;
        Ok(settings)
    }

    /// Layer `file`, then `env`, then `cli` over the defaults.
    pub fn resolve(cli: &Cli, file: &FileConfig, env: EnvLookup<'_>) -> Result<Self, ConfigError> {
        let mut db = DbConfig::default();
        file.apply_db(&mut db);
        let mut db = db.with_env(env);
        cli.apply_db(&mut db);

        let mut backoff = BackoffConfig::default();
        file.apply_backoff(&mut backoff);
        let backoff = backoff.with_env(env);

        let mut api = ApiConfig::default();
        file.apply_api(&mut api);
        let mut api = api.with_env(env);
        overwrite(&mut api.port, &cli.server_port);
        api.validate()?;

        let auth = if !cli.server_tokens.is_empty() {
            AuthConfig::with_tokens(&cli.server_tokens)
        } else {
            AuthConfig::with_tokens(&file.server.tokens).with_env(env)
        };

        let columns = resolve_columns(cli, file, env)?;

        let mut telemetry = TelemetryConfig::default();
        file.apply_telemetry(&mut telemetry)?;
        let mut telemetry = telemetry.with_env(env);
        overwrite(&mut telemetry.filter, &cli.loglevel);

        Ok(Self {
            db,
            backoff,
            api,
            auth,
            columns,
            telemetry,
            source: None,
        })
    }
}

/// Flags, then `RUUVI_COLUMNS`, then the file's `[columns]` table. Nothing
/// configured means every field is stored under its own name.
fn resolve_columns(
    cli: &Cli,
    file: &FileConfig,
    env: EnvLookup<'_>,
) -> Result<ColumnMapping, ConfigError> {
    if !cli.columns.is_empty() {
        return ColumnMapping::parse(&cli.columns.join(","));
    }
    if let Some(raw) = env("RUUVI_COLUMNS").filter(|raw| !raw.trim().is_empty()) {
        return ColumnMapping::parse(&raw);
    }
    if !file.columns.is_empty() {
        return ColumnMapping::from_pairs(
            file.columns
                .iter()
                .map(|(logical, physical)| (logical.as_str(), physical.as_str())),
        );
    }
    Ok(ColumnMapping::default())
}
