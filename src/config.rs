use config::{Config, ConfigError, Environment, File};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub store: StoreConfig,
    pub authority: AuthorityConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub ttl: TtlConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub notify: NotifyConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Health server port (disabled when unset)
    #[serde(default)]
    pub health_port: Option<u16>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// Redis URL of the shared ephemeral store
    pub url: String,
    /// Per-operation timeout in milliseconds
    #[serde(default = "default_op_timeout_ms")]
    pub op_timeout_ms: u64,
}

fn default_op_timeout_ms() -> u64 {
    2000
}

impl StoreConfig {
    pub fn op_timeout(&self) -> Duration {
        Duration::from_millis(self.op_timeout_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthorityConfig {
    /// Base URL of the authoritative config API
    pub base_url: String,
    /// Bot API key, sent as a bearer token
    #[serde(default)]
    pub api_key: String,
    /// Per-request timeout in milliseconds
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Heartbeat write + server status read cadence
    pub heartbeat_interval_secs: u64,
    /// Version check cadence
    pub version_check_interval_secs: u64,
    /// Random jitter applied to both cadences (0.1 = ±10%)
    pub jitter_pct: f64,
    /// Consecutive store failures tolerated before entering DEGRADED
    pub store_retry_budget: u32,
    /// Authoritative fetch attempts per cycle
    pub fetch_max_attempts: u32,
    /// Base delay for exponential backoff between fetch attempts
    pub fetch_base_backoff_secs: u64,
    /// Upper bound on a single authoritative fetch
    pub fetch_timeout_secs: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_secs: 30,
            version_check_interval_secs: 60,
            jitter_pct: 0.1,
            store_retry_budget: 3,
            fetch_max_attempts: 3,
            fetch_base_backoff_secs: 2,
            fetch_timeout_secs: 10,
        }
    }
}

impl AgentConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn version_check_interval(&self) -> Duration {
        Duration::from_secs(self.version_check_interval_secs)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    /// Backoff before retry number `retry` (0-based): base * 2^retry
    pub fn backoff_duration(&self, retry: u32) -> Duration {
        let delay = self
            .fetch_base_backoff_secs
            .saturating_mul(2u64.saturating_pow(retry));
        Duration::from_secs(delay)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TtlConfig {
    pub heartbeat_secs: u64,
    pub server_status_secs: u64,
    pub version_secs: u64,
}

impl Default for TtlConfig {
    fn default() -> Self {
        Self {
            heartbeat_secs: 60,
            server_status_secs: 300,
            version_secs: 24 * 60 * 60,
        }
    }
}

impl TtlConfig {
    pub fn heartbeat(&self) -> Duration {
        Duration::from_secs(self.heartbeat_secs)
    }

    pub fn server_status(&self) -> Duration {
        Duration::from_secs(self.server_status_secs)
    }

    pub fn version(&self) -> Duration {
        Duration::from_secs(self.version_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Fixed cadence for recomputing every account's server status
    pub sweep_interval_secs: u64,
    /// Server-side drawdown limit in percent (policy engine)
    pub max_drawdown_pct: Option<Decimal>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: 60,
            max_drawdown_pct: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NotifyConfig {
    /// LINE Messaging API channel access token
    pub line_channel_token: Option<String>,
    /// LINE user id that receives alerts
    pub line_recipient: Option<String>,
    /// Minimum interval between duplicate alerts
    pub rate_limit_secs: u64,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            line_channel_token: None,
            line_recipient: None,
            rate_limit_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Enable JSON formatted logs
    #[serde(default)]
    pub json: bool,
    /// Write daily-rolling log files to this directory
    #[serde(default)]
    pub dir: Option<String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl AppConfig {
    /// Load configuration from files and environment
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from("config")
    }

    /// Load configuration from a specific directory
    pub fn load_from<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        let builder = Config::builder()
            // Start with default values
            .set_default("store.url", "redis://127.0.0.1:6379/0")?
            .set_default("authority.base_url", "http://127.0.0.1:8000")?
            .set_default("logging.level", "info")?
            .set_default("logging.json", false)?
            // Load default config file
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Load environment-specific config (e.g., config/production.toml)
            .add_source(
                File::from(config_dir.join(
                    std::env::var("BOTSYNC_ENV").unwrap_or_else(|_| "development".to_string()),
                ))
                .required(false),
            )
            // Override with environment variables (BOTSYNC_STORE__URL, etc.)
            .add_source(
                Environment::with_prefix("BOTSYNC")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.agent.heartbeat_interval_secs == 0 {
            errors.push("agent.heartbeat_interval_secs must be positive".to_string());
        }

        if self.agent.version_check_interval_secs == 0 {
            errors.push("agent.version_check_interval_secs must be positive".to_string());
        }

        // A heartbeat that outlives its TTL makes a live bot look DOWN
        if self.ttl.heartbeat_secs <= self.agent.heartbeat_interval_secs {
            errors.push(format!(
                "ttl.heartbeat_secs ({}) must exceed agent.heartbeat_interval_secs ({})",
                self.ttl.heartbeat_secs, self.agent.heartbeat_interval_secs
            ));
        }

        if self.ttl.server_status_secs <= self.monitor.sweep_interval_secs {
            errors.push(format!(
                "ttl.server_status_secs ({}) must exceed monitor.sweep_interval_secs ({})",
                self.ttl.server_status_secs, self.monitor.sweep_interval_secs
            ));
        }

        if !(0.0..0.5).contains(&self.agent.jitter_pct) {
            errors.push("agent.jitter_pct must be in [0, 0.5)".to_string());
        }

        if self.agent.fetch_max_attempts == 0 {
            errors.push("agent.fetch_max_attempts must be at least 1".to_string());
        }

        if self.agent.store_retry_budget == 0 {
            errors.push("agent.store_retry_budget must be at least 1".to_string());
        }

        if let Some(limit) = self.monitor.max_drawdown_pct {
            if limit <= Decimal::ZERO || limit > Decimal::ONE_HUNDRED {
                errors.push("monitor.max_drawdown_pct must be in (0, 100]".to_string());
            }
        }

        if url::Url::parse(&self.authority.base_url).is_err() {
            errors.push(format!(
                "authority.base_url is not a valid URL: {}",
                self.authority.base_url
            ));
        }

        if self.notify.line_channel_token.is_some() != self.notify.line_recipient.is_some() {
            errors.push(
                "notify.line_channel_token and notify.line_recipient must be set together"
                    .to_string(),
            );
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> AppConfig {
        AppConfig {
            store: StoreConfig {
                url: "redis://127.0.0.1:6379/0".to_string(),
                op_timeout_ms: 2000,
            },
            authority: AuthorityConfig {
                base_url: "https://fx.example.com".to_string(),
                api_key: "k".to_string(),
                request_timeout_ms: 10_000,
            },
            agent: AgentConfig::default(),
            ttl: TtlConfig::default(),
            monitor: MonitorConfig::default(),
            notify: NotifyConfig::default(),
            logging: LoggingConfig::default(),
            health_port: None,
        }
    }

    #[test]
    fn test_defaults_are_valid() {
        assert!(sample().validate().is_ok());
    }

    #[test]
    fn test_heartbeat_ttl_must_exceed_interval() {
        let mut config = sample();
        config.agent.heartbeat_interval_secs = 60;
        let errors = config.validate().unwrap_err();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("ttl.heartbeat_secs"));
    }

    #[test]
    fn test_backoff_doubles() {
        let agent = AgentConfig::default();
        assert_eq!(agent.backoff_duration(0), Duration::from_secs(2));
        assert_eq!(agent.backoff_duration(1), Duration::from_secs(4));
        assert_eq!(agent.backoff_duration(2), Duration::from_secs(8));
    }

    #[test]
    fn test_line_settings_come_in_pairs() {
        let mut config = sample();
        config.notify.line_channel_token = Some("token".to_string());
        assert!(config.validate().is_err());
        config.notify.line_recipient = Some("U123".to_string());
        assert!(config.validate().is_ok());
    }
}
