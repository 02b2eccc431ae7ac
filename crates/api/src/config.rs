use std::str::FromStr;
use std::time::Duration;

use renderflow_render::PollConfig;

/// A configuration value was present but could not be parsed.
#[derive(Debug, thiserror::Error)]
#[error("{key} must be a valid {expected}, got {value:?}")]
pub struct ConfigError {
    pub key: &'static str,
    pub expected: &'static str,
    pub value: String,
}

/// Log output flavour selected by `LOG_FORMAT`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Server configuration loaded from environment variables.
///
/// All fields have sensible defaults suitable for local development.
/// In production, override via environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `3000`).
    pub port: u16,
    /// Allowed CORS origins, parsed from comma-separated `CORS_ORIGINS` env var.
    pub cors_origins: Vec<String>,
    /// HTTP request timeout in seconds (default: `30`).
    pub request_timeout_secs: u64,
    /// Upper bound on waiting for background tasks at shutdown (default: `30`).
    pub shutdown_timeout_secs: u64,
    /// PostgreSQL URL for execution records. Unset keeps records in memory.
    pub database_url: Option<String>,
    /// Upper bound on combinations one generate request may produce.
    pub max_combinations: usize,
    pub log_format: LogFormat,
    pub render: RenderConfig,
    pub broadcaster: BroadcasterConfig,
}

/// Render backend, polling and scheduling settings.
#[derive(Debug, Clone)]
pub struct RenderConfig {
    /// Live renderer base URL. Unset selects the offline backend.
    pub api_url: Option<String>,
    pub api_key: Option<String>,
    pub poll_interval: Duration,
    pub poll_max_attempts: u32,
    pub poll_workers: usize,
    pub batch_wave_size: usize,
    /// Largest fan-out a single batch request may expand into.
    pub batch_max_jobs: usize,
    pub scheduler_concurrency: usize,
    /// Remote ranking service. Unset ranks with the local heuristic only.
    pub optimizer_url: Option<String>,
}

/// Realtime status broadcaster settings.
#[derive(Debug, Clone)]
pub struct BroadcasterConfig {
    /// Expected client token. `None` authenticates every connection on connect.
    pub auth_token: Option<String>,
    pub auth_timeout: Duration,
    pub heartbeat_interval: Duration,
    pub idle_timeout: Duration,
    pub cleanup_interval: Duration,
}

impl Default for BroadcasterConfig {
    fn default() -> Self {
        Self {
            auth_token: None,
            auth_timeout: Duration::from_secs(30),
            heartbeat_interval: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(120),
            cleanup_interval: Duration::from_secs(60),
        }
    }
}

impl RenderConfig {
    pub fn poll_config(&self) -> PollConfig {
        PollConfig {
            interval: self.poll_interval,
            max_attempts: self.poll_max_attempts,
            workers: self.poll_workers,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                      | Default                  |
    /// |------------------------------|--------------------------|
    /// | `HOST`                       | `0.0.0.0`                |
    /// | `PORT`                       | `3000`                   |
    /// | `CORS_ORIGINS`               | `http://localhost:5173`  |
    /// | `REQUEST_TIMEOUT_SECS`       | `30`                     |
    /// | `SHUTDOWN_TIMEOUT_SECS`      | `30`                     |
    /// | `RENDER_API_URL`             | unset (offline backend)  |
    /// | `RENDER_API_KEY`             | unset                    |
    /// | `RENDER_POLL_INTERVAL_MS`    | `5000`, `500` offline    |
    /// | `RENDER_POLL_MAX_ATTEMPTS`   | `60`                     |
    /// | `RENDER_POLL_WORKERS`        | `8`                      |
    /// | `RENDER_BATCH_WAVE_SIZE`     | `5`                      |
    /// | `RENDER_BATCH_MAX_JOBS`      | `500`                    |
    /// | `MAX_COMBINATIONS`           | `1000`                   |
    /// | `SCHEDULER_CONCURRENCY`      | `5`                      |
    /// | `WS_AUTH_TOKEN`              | unset                    |
    /// | `WS_AUTH_TIMEOUT_SECS`       | `30`                     |
    /// | `WS_HEARTBEAT_INTERVAL_SECS` | `30`                     |
    /// | `WS_IDLE_TIMEOUT_SECS`       | `120`                    |
    /// | `WS_CLEANUP_INTERVAL_SECS`   | `60`                     |
    /// | `DATABASE_URL`               | unset (in-memory store)  |
    /// | `OPTIMIZER_URL`              | unset                    |
    /// | `LOG_FORMAT`                 | `pretty`                 |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`ServerConfig::from_env`] but reads values through `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let env = Env(&lookup);

        let cors_origins: Vec<String> = env
            .string("CORS_ORIGINS")
            .unwrap_or_else(|| "http://localhost:5173".into())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let log_format = match env.string("LOG_FORMAT").as_deref() {
            None | Some("pretty") => LogFormat::Pretty,
            Some("json") => LogFormat::Json,
            Some(other) => {
                return Err(ConfigError {
                    key: "LOG_FORMAT",
                    expected: "log format (pretty|json)",
                    value: other.to_string(),
                })
            }
        };

        let api_url = env.string("RENDER_API_URL");
        let default_poll_ms = if api_url.is_some() { 5000 } else { 500 };

        let render = RenderConfig {
            api_key: env.string("RENDER_API_KEY"),
            poll_interval: env.millis("RENDER_POLL_INTERVAL_MS", default_poll_ms)?,
            poll_max_attempts: env.parse("RENDER_POLL_MAX_ATTEMPTS", "u32", 60)?,
            poll_workers: env.positive("RENDER_POLL_WORKERS", 8)?,
            batch_wave_size: env.positive("RENDER_BATCH_WAVE_SIZE", 5)?,
            batch_max_jobs: env.positive("RENDER_BATCH_MAX_JOBS", 500)?,
            scheduler_concurrency: env.positive("SCHEDULER_CONCURRENCY", 5)?,
            optimizer_url: env.string("OPTIMIZER_URL"),
            api_url,
        };

        let broadcaster = BroadcasterConfig {
            auth_token: env.string("WS_AUTH_TOKEN"),
            auth_timeout: env.secs("WS_AUTH_TIMEOUT_SECS", 30)?,
            heartbeat_interval: env.secs("WS_HEARTBEAT_INTERVAL_SECS", 30)?,
            idle_timeout: env.secs("WS_IDLE_TIMEOUT_SECS", 120)?,
            cleanup_interval: env.secs("WS_CLEANUP_INTERVAL_SECS", 60)?,
        };

        Ok(Self {
            host: env.string("HOST").unwrap_or_else(|| "0.0.0.0".into()),
            port: env.parse("PORT", "u16", 3000)?,
            cors_origins,
            request_timeout_secs: env.positive("REQUEST_TIMEOUT_SECS", 30)?,
            shutdown_timeout_secs: env.parse("SHUTDOWN_TIMEOUT_SECS", "u64", 30)?,
            database_url: env.string("DATABASE_URL"),
            max_combinations: env.positive("MAX_COMBINATIONS", 1000)?,
            log_format,
            render,
            broadcaster,
        })
    }
}

/// Typed accessors over a key lookup. Empty values count as unset.
struct Env<'a>(&'a dyn Fn(&str) -> Option<String>);

impl Env<'_> {
    fn string(&self, key: &str) -> Option<String> {
        (self.0)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn parse<T: FromStr>(
        &self,
        key: &'static str,
        expected: &'static str,
        default: T,
    ) -> Result<T, ConfigError> {
        match self.string(key) {
            None => Ok(default),
            Some(value) => value.parse().map_err(|_| ConfigError {
                key,
                expected,
                value,
            }),
        }
    }

    fn positive<T>(&self, key: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr + PartialEq + Default,
    {
        let value = self.parse(key, "positive integer", default)?;
        if value == T::default() {
            return Err(ConfigError {
                key,
                expected: "positive integer",
                value: "0".into(),
            });
        }
        Ok(value)
    }

    fn secs(&self, key: &'static str, default: u64) -> Result<Duration, ConfigError> {
        self.positive(key, default).map(Duration::from_secs)
    }

    fn millis(&self, key: &'static str, default: u64) -> Result<Duration, ConfigError> {
        self.positive(key, default).map(Duration::from_millis)
    }
}
