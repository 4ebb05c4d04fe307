//! Configuration loading for the alerts service.
//!
//! Loads layered `.env` files and environment variables prefixed with
//! `ALERTS_`, producing a typed [`AppConfig`].

use std::{collections::BTreeMap, env, net::SocketAddr, path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::models::Role;

const ENV_PREFIX: &str = "ALERTS_";

/// Application configuration derived from `ALERTS_*` environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct AppConfig {
    #[serde(default = "default_profile")]
    pub profile: String,
    #[serde(default = "default_api_bind_addr")]
    pub api_bind_addr: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_log_format")]
    pub log_format: String,
    #[serde(default = "default_database_url")]
    pub database_url: String,
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,
    #[serde(default = "default_db_acquire_timeout_ms")]
    pub db_acquire_timeout_ms: u64,
    /// Upper bound for a single alert store operation
    #[serde(default = "default_store_timeout_ms")]
    pub store_timeout_ms: u64,
    #[serde(default = "default_run_migrations")]
    pub run_migrations: bool,
    /// Bearer tokens accepted on the ingestion endpoint
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ingest_tokens: Vec<String>,
    /// Static identity directory used to authorize viewers
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub viewer_tokens: Vec<ViewerTokenConfig>,
    #[serde(default)]
    pub severity: SeverityThresholdsConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub ingest_retry: RetryPolicyConfig,
}

/// One entry of the static viewer directory.
///
/// Environment format: `token|viewer_id|role[|tenant_scope[|owner_id]]`, comma separated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct ViewerTokenConfig {
    pub token: String,
    pub viewer_id: String,
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_scope: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<String>,
}

impl ViewerTokenConfig {
    /// Parse a single `token|viewer_id|role[|tenant[|owner]]` entry.
    pub fn parse(entry: &str) -> Result<Self, ConfigError> {
        let invalid = || ConfigError::InvalidViewerToken {
            entry: redact_entry(entry),
        };

        let parts: Vec<&str> = entry.split('|').map(str::trim).collect();
        if parts.len() < 3 || parts.len() > 5 {
            return Err(invalid());
        }
        if parts[0].is_empty() || parts[1].is_empty() {
            return Err(invalid());
        }

        let tenant_scope = match parts.get(3).filter(|value| !value.is_empty()) {
            Some(value) => Some(value.parse::<Uuid>().map_err(|_| invalid())?),
            None => None,
        };
        let owner_id = parts
            .get(4)
            .filter(|value| !value.is_empty())
            .map(|value| value.to_string());

        Ok(Self {
            token: parts[0].to_string(),
            viewer_id: parts[1].to_string(),
            role: Role::parse(parts[2]),
            tenant_scope,
            owner_id,
        })
    }

    /// Validate that the role carries the scope it needs to ever see anything.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let needs_tenant = matches!(self.role, Role::Analyst | Role::Client);
        if self.role == Role::Unknown
            || (needs_tenant && self.tenant_scope.is_none())
            || (self.role == Role::Client && self.owner_id.is_none())
        {
            return Err(ConfigError::InvalidViewerScope {
                viewer_id: self.viewer_id.clone(),
                role: self.role.as_str().to_string(),
            });
        }
        Ok(())
    }
}

fn redact_entry(entry: &str) -> String {
    match entry.split_once('|') {
        Some((_, rest)) => format!("[REDACTED]|{}", rest),
        None => "[REDACTED]".to_string(),
    }
}

/// Severity band lower bounds. A score equal to a bound belongs to that (higher) band.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct SeverityThresholdsConfig {
    #[serde(default = "default_severity_low")]
    pub low: f64,
    #[serde(default = "default_severity_medium")]
    pub medium: f64,
    #[serde(default = "default_severity_high")]
    pub high: f64,
    #[serde(default = "default_severity_critical")]
    pub critical: f64,
}

impl Default for SeverityThresholdsConfig {
    fn default() -> Self {
        Self {
            low: default_severity_low(),
            medium: default_severity_medium(),
            high: default_severity_high(),
            critical: default_severity_critical(),
        }
    }
}

impl SeverityThresholdsConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let bounds = [self.low, self.medium, self.high, self.critical];
        let in_range = bounds.iter().all(|b| b.is_finite() && (0.0..=1.0).contains(b));
        let ascending = bounds.windows(2).all(|pair| pair[0] < pair[1]);
        if !in_range || !ascending {
            return Err(ConfigError::InvalidSeverityThresholds {
                low: self.low,
                medium: self.medium,
                high: self.high,
                critical: self.critical,
            });
        }
        Ok(())
    }
}

/// Fan-out tuning for live sessions.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct DispatchConfig {
    /// Per-session send timeout; a session exceeding it is treated as dead (default: 250)
    #[serde(default = "default_dispatch_send_timeout_ms")]
    pub send_timeout_ms: u64,
    /// Maximum concurrent session deliveries per fan-out (default: 64)
    #[serde(default = "default_dispatch_max_concurrency")]
    pub max_concurrency: usize,
    /// Outbound envelope queue depth per session (default: 256)
    #[serde(default = "default_dispatch_session_buffer")]
    pub session_buffer: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            send_timeout_ms: default_dispatch_send_timeout_ms(),
            max_concurrency: default_dispatch_max_concurrency(),
            session_buffer: default_dispatch_session_buffer(),
        }
    }
}

impl DispatchConfig {
    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.send_timeout_ms == 0 || self.send_timeout_ms > 10_000 {
            return Err(ConfigError::InvalidDispatchTimeout {
                value: self.send_timeout_ms,
            });
        }
        if self.max_concurrency == 0 || self.max_concurrency > 1024 {
            return Err(ConfigError::InvalidDispatchConcurrency {
                value: self.max_concurrency,
            });
        }
        if self.session_buffer == 0 {
            return Err(ConfigError::InvalidSessionBuffer {
                value: self.session_buffer,
            });
        }
        Ok(())
    }
}

/// Backoff policy for retrying `StoreUnavailable` during ingestion
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct RetryPolicyConfig {
    /// Base delay; attempt `n` waits `base_ms * 2^n` (default: 50)
    #[serde(default = "default_retry_base_ms")]
    pub base_ms: u64,
    /// Cap on a single backoff delay (default: 2000)
    #[serde(default = "default_retry_max_ms")]
    pub max_ms: u64,
    /// Total attempts including the first (default: 4)
    #[serde(default = "default_retry_max_attempts")]
    pub max_attempts: u32,
    /// Random spread applied to each delay, 0.0-1.0 (default: 0.1)
    #[serde(default = "default_retry_jitter_factor")]
    pub jitter_factor: f64,
}

impl Default for RetryPolicyConfig {
    fn default() -> Self {
        Self {
            base_ms: default_retry_base_ms(),
            max_ms: default_retry_max_ms(),
            max_attempts: default_retry_max_attempts(),
            jitter_factor: default_retry_jitter_factor(),
        }
    }
}

impl RetryPolicyConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.base_ms > self.max_ms {
            return Err(ConfigError::InvalidRetryBounds {
                base: self.base_ms,
                max: self.max_ms,
            });
        }
        if self.max_attempts == 0 {
            return Err(ConfigError::InvalidRetryAttempts {
                value: self.max_attempts,
            });
        }
        if !(0.0..=1.0).contains(&self.jitter_factor) {
            return Err(ConfigError::InvalidRetryJitter {
                value: self.jitter_factor,
            });
        }
        Ok(())
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            profile: default_profile(),
            api_bind_addr: default_api_bind_addr(),
            log_level: default_log_level(),
            log_format: default_log_format(),
            database_url: default_database_url(),
            db_max_connections: default_db_max_connections(),
            db_acquire_timeout_ms: default_db_acquire_timeout_ms(),
            store_timeout_ms: default_store_timeout_ms(),
            run_migrations: default_run_migrations(),
            ingest_tokens: Vec::new(),
            viewer_tokens: Vec::new(),
            severity: SeverityThresholdsConfig::default(),
            dispatch: DispatchConfig::default(),
            ingest_retry: RetryPolicyConfig::default(),
        }
    }
}

impl AppConfig {
    /// Returns the configured bind address as a socket address.
    pub fn bind_addr(&self) -> Result<SocketAddr, std::net::AddrParseError> {
        self.api_bind_addr.parse()
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }

    /// Returns a redacted JSON representation (tokens are redacted).
    pub fn redacted_json(&self) -> serde_json::Result<String> {
        let mut config = self.clone();
        if !config.ingest_tokens.is_empty() {
            config.ingest_tokens = vec!["[REDACTED]".to_string()];
        }
        for viewer in config.viewer_tokens.iter_mut() {
            viewer.token = "[REDACTED]".to_string();
        }
        if let Some((scheme, _)) = config.database_url.split_once("://") {
            config.database_url = format!("{}://[REDACTED]", scheme);
        }
        serde_json::to_string_pretty(&config)
    }

    /// Validates the configuration, returning an error if settings are out of bounds.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.profile != "test" && self.ingest_tokens.is_empty() {
            return Err(ConfigError::MissingIngestTokens);
        }

        if self.store_timeout_ms == 0 {
            return Err(ConfigError::InvalidStoreTimeout {
                value: self.store_timeout_ms,
            });
        }

        for viewer in &self.viewer_tokens {
            viewer.validate()?;
        }

        self.severity.validate()?;
        self.dispatch.validate()?;
        self.ingest_retry.validate()?;

        Ok(())
    }
}

fn default_profile() -> String {
    "local".to_string()
}

fn default_api_bind_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

fn default_database_url() -> String {
    "postgresql://localhost:5432/alerts".to_string()
}

fn default_db_max_connections() -> u32 {
    10
}

fn default_db_acquire_timeout_ms() -> u64 {
    5000
}

fn default_store_timeout_ms() -> u64 {
    3000
}

fn default_run_migrations() -> bool {
    true
}

fn default_severity_low() -> f64 {
    0.5
}

fn default_severity_medium() -> f64 {
    0.7
}

fn default_severity_high() -> f64 {
    0.85
}

fn default_severity_critical() -> f64 {
    0.95
}

fn default_dispatch_send_timeout_ms() -> u64 {
    250
}

fn default_dispatch_max_concurrency() -> usize {
    64
}

fn default_dispatch_session_buffer() -> usize {
    256
}

fn default_retry_base_ms() -> u64 {
    50
}

fn default_retry_max_ms() -> u64 {
    2000
}

fn default_retry_max_attempts() -> u32 {
    4
}

fn default_retry_jitter_factor() -> f64 {
    0.1
}

/// Errors that can occur while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load environment file {path}: {source}")]
    EnvFile {
        path: PathBuf,
        source: dotenvy::Error,
    },
    #[error("invalid api bind address '{value}': {source}")]
    InvalidBindAddr {
        value: String,
        source: std::net::AddrParseError,
    },
    #[error("invalid value '{value}' for {key}")]
    InvalidValue { key: String, value: String },
    #[error("no ingest tokens configured; set ALERTS_INGEST_TOKEN or ALERTS_INGEST_TOKENS")]
    MissingIngestTokens,
    #[error("invalid viewer token entry '{entry}'; expected token|viewer_id|role[|tenant[|owner]]")]
    InvalidViewerToken { entry: String },
    #[error("viewer {viewer_id} with role {role} is missing the tenant/owner scope it requires")]
    InvalidViewerScope { viewer_id: String, role: String },
    #[error(
        "severity thresholds must be strictly ascending within [0, 1], got low={low} medium={medium} high={high} critical={critical}"
    )]
    InvalidSeverityThresholds {
        low: f64,
        medium: f64,
        high: f64,
        critical: f64,
    },
    #[error("store timeout must be positive, got {value}")]
    InvalidStoreTimeout { value: u64 },
    #[error("dispatch send timeout must be between 1 and 10000 ms, got {value}")]
    InvalidDispatchTimeout { value: u64 },
    #[error("dispatch concurrency must be between 1 and 1024, got {value}")]
    InvalidDispatchConcurrency { value: usize },
    #[error("session buffer must be positive, got {value}")]
    InvalidSessionBuffer { value: usize },
    #[error("retry base delay ({base}ms) cannot be greater than max delay ({max}ms)")]
    InvalidRetryBounds { base: u64, max: u64 },
    #[error("retry attempts must be at least 1, got {value}")]
    InvalidRetryAttempts { value: u32 },
    #[error("retry jitter factor must be between 0.0 and 1.0, got {value}")]
    InvalidRetryJitter { value: f64 },
}

/// Loads configuration using layered `.env` files and `ALERTS_*` env vars.
pub struct ConfigLoader {
    base_dir: PathBuf,
}

impl ConfigLoader {
    /// Creates a new loader rooted at the current working directory.
    pub fn new() -> Self {
        Self {
            base_dir: env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
        }
    }

    /// Creates a loader rooted at the provided directory (useful for tests).
    pub fn with_base_dir(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    /// Loads `.env` layers, overlays the process environment, and validates the result.
    pub fn load(&self) -> Result<AppConfig, ConfigError> {
        let (mut layered, profile_hint) = self.collect_layered_env()?;

        // Process environment wins over files.
        for (key, value) in env::vars() {
            if let Some(stripped) = key.strip_prefix(ENV_PREFIX) {
                layered.insert(stripped.to_string(), value);
            }
        }

        let profile = take_string(&mut layered, "PROFILE").unwrap_or(profile_hint);
        let api_bind_addr =
            take_string(&mut layered, "API_BIND_ADDR").unwrap_or_else(default_api_bind_addr);
        let log_level = take_string(&mut layered, "LOG_LEVEL").unwrap_or_else(default_log_level);
        let log_format =
            take_string(&mut layered, "LOG_FORMAT").unwrap_or_else(default_log_format);
        let database_url =
            take_string(&mut layered, "DATABASE_URL").unwrap_or_else(default_database_url);
        let db_max_connections = take_parsed(&mut layered, "DB_MAX_CONNECTIONS")?
            .unwrap_or_else(default_db_max_connections);
        let db_acquire_timeout_ms = take_parsed(&mut layered, "DB_ACQUIRE_TIMEOUT_MS")?
            .unwrap_or_else(default_db_acquire_timeout_ms);
        let store_timeout_ms = take_parsed(&mut layered, "STORE_TIMEOUT_MS")?
            .unwrap_or_else(default_store_timeout_ms);
        let run_migrations =
            take_parsed(&mut layered, "RUN_MIGRATIONS")?.unwrap_or_else(default_run_migrations);

        // Single token or comma-separated list
        let ingest_tokens = if let Some(tokens) = layered.remove("INGEST_TOKENS") {
            split_list(&tokens)
        } else if let Some(token) = take_string(&mut layered, "INGEST_TOKEN") {
            vec![token]
        } else {
            Vec::new()
        };

        let viewer_tokens = layered
            .remove("VIEWER_TOKENS")
            .map(|entries| {
                split_list(&entries)
                    .iter()
                    .map(|entry| ViewerTokenConfig::parse(entry))
                    .collect::<Result<Vec<_>, _>>()
            })
            .transpose()?
            .unwrap_or_default();

        let severity = SeverityThresholdsConfig {
            low: take_parsed(&mut layered, "SEVERITY_LOW")?.unwrap_or_else(default_severity_low),
            medium: take_parsed(&mut layered, "SEVERITY_MEDIUM")?
                .unwrap_or_else(default_severity_medium),
            high: take_parsed(&mut layered, "SEVERITY_HIGH")?
                .unwrap_or_else(default_severity_high),
            critical: take_parsed(&mut layered, "SEVERITY_CRITICAL")?
                .unwrap_or_else(default_severity_critical),
        };

        let dispatch = DispatchConfig {
            send_timeout_ms: take_parsed(&mut layered, "DISPATCH_SEND_TIMEOUT_MS")?
                .unwrap_or_else(default_dispatch_send_timeout_ms),
            max_concurrency: take_parsed(&mut layered, "DISPATCH_MAX_CONCURRENCY")?
                .unwrap_or_else(default_dispatch_max_concurrency),
            session_buffer: take_parsed(&mut layered, "DISPATCH_SESSION_BUFFER")?
                .unwrap_or_else(default_dispatch_session_buffer),
        };

        let ingest_retry = RetryPolicyConfig {
            base_ms: take_parsed(&mut layered, "INGEST_RETRY_BASE_MS")?
                .unwrap_or_else(default_retry_base_ms),
            max_ms: take_parsed(&mut layered, "INGEST_RETRY_MAX_MS")?
                .unwrap_or_else(default_retry_max_ms),
            max_attempts: take_parsed(&mut layered, "INGEST_RETRY_MAX_ATTEMPTS")?
                .unwrap_or_else(default_retry_max_attempts),
            jitter_factor: take_parsed(&mut layered, "INGEST_RETRY_JITTER_FACTOR")?
                .unwrap_or_else(default_retry_jitter_factor),
        };

        let config = AppConfig {
            profile,
            api_bind_addr,
            log_level,
            log_format,
            database_url,
            db_max_connections,
            db_acquire_timeout_ms,
            store_timeout_ms,
            run_migrations,
            ingest_tokens,
            viewer_tokens,
            severity,
            dispatch,
            ingest_retry,
        };

        config.validate()?;

        match config.bind_addr() {
            Ok(_) => Ok(config),
            Err(source) => Err(ConfigError::InvalidBindAddr {
                value: config.api_bind_addr.clone(),
                source,
            }),
        }
    }

    fn collect_layered_env(&self) -> Result<(BTreeMap<String, String>, String), ConfigError> {
        let mut values = BTreeMap::new();

        self.merge_dotenv(self.base_dir.join(".env"), &mut values)?;
        self.merge_dotenv(self.base_dir.join(".env.local"), &mut values)?;

        let profile = env::var(format!("{}PROFILE", ENV_PREFIX))
            .ok()
            .or_else(|| values.get("PROFILE").cloned())
            .unwrap_or_else(default_profile);

        self.merge_dotenv(
            self.base_dir.join(format!(".env.{}", &profile)),
            &mut values,
        )?;
        self.merge_dotenv(
            self.base_dir.join(format!(".env.{}.local", &profile)),
            &mut values,
        )?;

        Ok((values, profile))
    }

    fn merge_dotenv(
        &self,
        path: PathBuf,
        values: &mut BTreeMap<String, String>,
    ) -> Result<(), ConfigError> {
        match dotenvy::from_path_iter(&path) {
            Ok(iter) => {
                for item in iter {
                    let (key, value) = item.map_err(|source| ConfigError::EnvFile {
                        path: path.clone(),
                        source,
                    })?;
                    if let Some(stripped) = key.strip_prefix(ENV_PREFIX) {
                        values.insert(stripped.to_string(), value);
                    }
                }
                Ok(())
            }
            Err(dotenvy::Error::Io(ref io_err))
                if io_err.kind() == std::io::ErrorKind::NotFound =>
            {
                Ok(())
            }
            Err(err) => Err(ConfigError::EnvFile { path, source: err }),
        }
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

fn take_string(layered: &mut BTreeMap<String, String>, key: &str) -> Option<String> {
    layered
        .remove(key)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn take_parsed<T: std::str::FromStr>(
    layered: &mut BTreeMap<String, String>,
    key: &str,
) -> Result<Option<T>, ConfigError> {
    match take_string(layered, key) {
        Some(value) => value
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue {
                key: format!("{}{}", ENV_PREFIX, key),
                value,
            }),
        None => Ok(None),
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}
