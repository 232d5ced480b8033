//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{path::PathBuf, str::FromStr};

use clap::{Args, Parser, Subcommand, ValueHint, builder::BoolishValueParser};
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

use crate::cache::{
    BackendKind, CacheConfig, FieldCacheConfig, QueryCacheConfig, Zone,
    backend::DEFAULT_DIRECTORY,
};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "graphql-cache";
const ENV_PREFIX: &str = "GRAPHQL_CACHE";
const DEFAULT_RESPONSE_BODY_LIMIT_BYTES: u64 = 1024 * 1024;

/// Command-line arguments for the graphql-cache binary.
#[derive(Debug, Parser)]
#[command(
    name = "graphql-cache",
    version,
    about = "Administer the GraphQL lookaside cache"
)]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(
        long = "config-file",
        env = "GRAPHQL_CACHE_CONFIG_FILE",
        value_name = "PATH",
        value_hint = ValueHint::FilePath
    )]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Clear one cache zone, or every zone when no zone is given.
    Clear(ClearArgs),
}

#[derive(Debug, Args, Default, Clone)]
pub struct ClearArgs {
    /// Zone to clear; all zones are cleared when omitted.
    #[arg(long, value_name = "ZONE", value_parser = parse_zone)]
    pub zone: Option<Zone>,

    #[command(flatten)]
    pub overrides: CacheOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct CacheOverrides {
    /// Override the filesystem backend directory.
    #[arg(long = "cache-directory", value_name = "PATH", value_hint = ValueHint::DirPath)]
    pub cache_directory: Option<PathBuf>,

    /// Override the storage backend (filesystem|memory).
    #[arg(long = "cache-backend", value_name = "BACKEND")]
    pub cache_backend: Option<String>,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,
}

/// Fully-resolved settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub logging: LoggingSettings,
    pub cache: CacheConfig,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix(ENV_PREFIX).separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Clear(args)) => raw.apply_cache_overrides(&args.overrides),
        None => raw.apply_cache_overrides(&CacheOverrides::default()),
    }

    Settings::from_raw(raw)
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    logging: RawLoggingSettings,
    cache: RawCacheSettings,
}

impl RawSettings {
    fn apply_cache_overrides(&mut self, overrides: &CacheOverrides) {
        if let Some(directory) = overrides.cache_directory.as_ref() {
            self.cache.directory = Some(directory.clone());
        }
        if let Some(backend) = overrides.cache_backend.as_ref() {
            self.cache.backend = Some(backend.clone());
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        Ok(Self {
            logging: build_logging_settings(raw.logging)?,
            cache: build_cache_settings(raw.cache)?,
        })
    }
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheConfig, LoadError> {
    let backend = match cache.backend.as_deref().map(str::trim) {
        None | Some("") | Some("filesystem") => BackendKind::Filesystem,
        Some("memory") => BackendKind::Memory,
        Some(other) => {
            return Err(LoadError::invalid(
                "cache.backend",
                format!("unknown backend `{other}`; expected `filesystem` or `memory`"),
            ));
        }
    };

    let directory = cache
        .directory
        .unwrap_or_else(|| PathBuf::from(DEFAULT_DIRECTORY));
    if directory.as_os_str().is_empty() {
        return Err(LoadError::invalid("cache.directory", "must not be empty"));
    }

    let limit = cache
        .response_body_limit_bytes
        .unwrap_or(DEFAULT_RESPONSE_BODY_LIMIT_BYTES);
    if limit == 0 {
        return Err(LoadError::invalid(
            "cache.response_body_limit_bytes",
            "must be greater than zero",
        ));
    }
    let response_body_limit_bytes = usize::try_from(limit).map_err(|_| {
        LoadError::invalid(
            "cache.response_body_limit_bytes",
            "value exceeds supported range for usize",
        )
    })?;

    let fields = cache
        .fields
        .into_iter()
        .map(build_field_cache)
        .collect::<Result<Vec<_>, _>>()?;
    let queries = cache
        .queries
        .into_iter()
        .map(build_query_cache)
        .collect::<Result<Vec<_>, _>>()?;

    Ok(CacheConfig {
        enabled: cache.enabled.unwrap_or(true),
        backend,
        directory,
        measure_performance: cache.measure_performance.unwrap_or(false),
        response_body_limit_bytes,
        fields,
        queries,
    })
}

fn build_field_cache(field: RawFieldCache) -> Result<FieldCacheConfig, LoadError> {
    let query_name = required_name(field.query_name, "cache.fields.query_name")?;
    let field_name = required_name(field.field_name, "cache.fields.field_name")?;
    Ok(FieldCacheConfig {
        zone: optional_zone(field.zone, "cache.fields.zone")?,
        query_name,
        field_name,
        expire: field.expire,
    })
}

fn build_query_cache(query: RawQueryCache) -> Result<QueryCacheConfig, LoadError> {
    let query_name = required_name(query.query_name, "cache.queries.query_name")?;
    Ok(QueryCacheConfig {
        zone: optional_zone(query.zone, "cache.queries.zone")?,
        query_name,
        expire: query.expire,
    })
}

fn optional_zone(value: Option<String>, key: &'static str) -> Result<Zone, LoadError> {
    match value {
        Some(name) => {
            Zone::parse(name.trim()).map_err(|err| LoadError::invalid(key, err.to_string()))
        }
        None => Ok(Zone::default()),
    }
}

fn parse_zone(value: &str) -> Result<Zone, String> {
    Zone::parse(value).map_err(|err| err.to_string())
}

fn required_name(value: Option<String>, key: &'static str) -> Result<String, LoadError> {
    value
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
        .ok_or_else(|| LoadError::invalid(key, "must be set"))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    enabled: Option<bool>,
    backend: Option<String>,
    directory: Option<PathBuf>,
    measure_performance: Option<bool>,
    response_body_limit_bytes: Option<u64>,
    fields: Vec<RawFieldCache>,
    queries: Vec<RawQueryCache>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawFieldCache {
    zone: Option<String>,
    query_name: Option<String>,
    field_name: Option<String>,
    expire: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawQueryCache {
    zone: Option<String>,
    query_name: Option<String>,
    expire: Option<u64>,
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}
