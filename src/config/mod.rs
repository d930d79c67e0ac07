//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{
    collections::HashMap,
    net::SocketAddr,
    num::{NonZeroU64, NonZeroUsize},
    str::FromStr,
    time::Duration,
};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;
use url::Url;

use crate::cache::{
    DEFAULT_MAX_BODY_BYTES, DEFAULT_MAX_ENTRIES, DEFAULT_REDIS_KEY_PREFIX,
    DEFAULT_REDIS_TIMEOUT_MS, DEFAULT_SWEEP_INTERVAL_SECS, PolicyTable, ResourceCachePolicy,
};
use crate::domain::types::ResourceType;

mod cli;

pub use cli::{CliArgs, Command, ServeArgs, ServeOverrides};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "wallwise";
const ENV_PREFIX: &str = "WALLWISE";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 3000;
const DEFAULT_GRACEFUL_SHUTDOWN_SECS: u64 = 30;

/// Fully-resolved deployment settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub cache: CacheSettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub addr: SocketAddr,
    pub graceful_shutdown: Duration,
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

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub enabled: bool,
    /// Present when the shared Redis store is selected.
    pub redis: Option<RedisSettings>,
    pub sweep_interval: Duration,
    pub max_body_bytes: usize,
    pub max_entries: NonZeroUsize,
    pub policies: PolicyTable,
}

#[derive(Debug, Clone)]
pub struct RedisSettings {
    pub url: String,
    pub key_prefix: String,
    pub timeout: Duration,
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
        Some(Command::Serve(args)) => raw.apply_serve_overrides(&args.overrides),
        None => raw.apply_serve_overrides(&ServeOverrides::default()),
    }

    Settings::from_raw(raw)
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    logging: RawLoggingSettings,
    cache: RawCacheSettings,
}

impl RawSettings {
    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        if let Some(host) = overrides.server_host.as_ref() {
            self.server.host = Some(host.clone());
        }
        if let Some(port) = overrides.server_port {
            self.server.port = Some(port);
        }
        if let Some(seconds) = overrides.server_graceful_shutdown_seconds {
            self.server.graceful_shutdown_seconds = Some(seconds);
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(enabled) = overrides.cache_enabled {
            self.cache.enabled = Some(enabled);
        }
        if let Some(distributed) = overrides.cache_distributed {
            self.cache.distributed = Some(distributed);
        }
        if let Some(url) = overrides.cache_redis_url.as_ref() {
            self.cache.redis_url = Some(url.clone());
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            cache,
        } = raw;

        Ok(Self {
            server: build_server_settings(server)?,
            logging: build_logging_settings(logging)?,
            cache: build_cache_settings(cache)?,
        })
    }
}

fn build_server_settings(server: RawServerSettings) -> Result<ServerSettings, LoadError> {
    let host = server.host.unwrap_or_else(|| DEFAULT_HOST.to_string());

    let port = server.port.unwrap_or(DEFAULT_PORT);
    if port == 0 {
        return Err(LoadError::invalid(
            "server.port",
            "port must be greater than zero",
        ));
    }

    let addr = parse_socket_addr(&host, port)
        .map_err(|reason| LoadError::invalid("server.addr", reason))?;

    let graceful_secs = server
        .graceful_shutdown_seconds
        .unwrap_or(DEFAULT_GRACEFUL_SHUTDOWN_SECS);
    if graceful_secs == 0 {
        return Err(LoadError::invalid(
            "server.graceful_shutdown_seconds",
            "must be greater than zero",
        ));
    }

    Ok(ServerSettings {
        addr,
        graceful_shutdown: Duration::from_secs(graceful_secs),
    })
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

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    let redis = if cache.distributed.unwrap_or(false) {
        Some(build_redis_settings(&cache)?)
    } else {
        None
    };

    let sweep_seconds = cache
        .sweep_interval_seconds
        .unwrap_or(DEFAULT_SWEEP_INTERVAL_SECS);
    if sweep_seconds == 0 {
        return Err(LoadError::invalid(
            "cache.sweep_interval_seconds",
            "must be greater than zero",
        ));
    }

    let max_body_bytes = match cache.max_body_bytes {
        Some(0) => {
            return Err(LoadError::invalid(
                "cache.max_body_bytes",
                "must be greater than zero",
            ));
        }
        Some(value) => usize::try_from(value).map_err(|_| {
            LoadError::invalid(
                "cache.max_body_bytes",
                "value exceeds supported range for usize",
            )
        })?,
        None => DEFAULT_MAX_BODY_BYTES,
    };

    let max_entries = cache
        .max_entries
        .unwrap_or(DEFAULT_MAX_ENTRIES as u64);
    let max_entries = usize::try_from(max_entries)
        .ok()
        .and_then(NonZeroUsize::new)
        .ok_or_else(|| {
            LoadError::invalid("cache.max_entries", "must be between 1 and usize::MAX")
        })?;

    Ok(CacheSettings {
        enabled: cache.enabled.unwrap_or(true),
        redis,
        sweep_interval: Duration::from_secs(sweep_seconds),
        max_body_bytes,
        max_entries,
        policies: build_policy_table(cache.policies)?,
    })
}

fn build_redis_settings(cache: &RawCacheSettings) -> Result<RedisSettings, LoadError> {
    let raw_url = cache
        .redis_url
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| {
            LoadError::invalid("cache.redis_url", "required when cache.distributed is true")
        })?;
    let parsed = Url::parse(raw_url)
        .map_err(|err| LoadError::invalid("cache.redis_url", format!("invalid URL: {err}")))?;
    if !matches!(parsed.scheme(), "redis" | "rediss") {
        return Err(LoadError::invalid(
            "cache.redis_url",
            format!("unsupported scheme `{}`", parsed.scheme()),
        ));
    }

    let timeout_ms = cache.redis_timeout_ms.unwrap_or(DEFAULT_REDIS_TIMEOUT_MS);
    if timeout_ms == 0 {
        return Err(LoadError::invalid(
            "cache.redis_timeout_ms",
            "must be greater than zero",
        ));
    }

    Ok(RedisSettings {
        url: raw_url.to_string(),
        key_prefix: cache
            .redis_key_prefix
            .clone()
            .unwrap_or_else(|| DEFAULT_REDIS_KEY_PREFIX.to_string()),
        timeout: Duration::from_millis(timeout_ms),
    })
}

/// Built-in policies with per-resource overrides applied on top.
fn build_policy_table(
    overrides: HashMap<String, RawPolicySettings>,
) -> Result<PolicyTable, LoadError> {
    let mut table = PolicyTable::defaults();
    for (name, raw) in overrides {
        let resource_type = ResourceType::from_str(&name)
            .map_err(|err| LoadError::invalid("cache.policies", err.to_string()))?;
        let defaults = ResourceCachePolicy::default_for(resource_type);

        let duration = match raw.duration_seconds {
            Some(seconds) => NonZeroU64::new(seconds).ok_or_else(|| {
                LoadError::invalid(
                    "cache.policies.duration_seconds",
                    format!("`{name}` duration must be greater than zero"),
                )
            })?,
            None => NonZeroU64::new(defaults.duration_seconds()).unwrap_or(NonZeroU64::MIN),
        };
        let policy = match raw.vary_by_query {
            Some(names) => ResourceCachePolicy::new(resource_type, duration, names),
            None => ResourceCachePolicy::new(resource_type, duration, defaults.vary_by_query()),
        };
        table.insert(policy);
    }
    Ok(table)
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    host: Option<String>,
    port: Option<u16>,
    graceful_shutdown_seconds: Option<u64>,
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
    distributed: Option<bool>,
    redis_url: Option<String>,
    redis_key_prefix: Option<String>,
    redis_timeout_ms: Option<u64>,
    sweep_interval_seconds: Option<u64>,
    max_body_bytes: Option<u64>,
    max_entries: Option<u64>,
    policies: HashMap<String, RawPolicySettings>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawPolicySettings {
    duration_seconds: Option<u64>,
    vary_by_query: Option<Vec<String>>,
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let candidate = format!("{host}:{port}");
    candidate
        .parse()
        .map_err(|err| format!("invalid address `{candidate}`: {err}"))
}

#[cfg(test)]
mod tests;
