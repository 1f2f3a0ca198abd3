use domain::models::{WebhookRetryPolicyConfig, MAX_POLICY_DURATION};
use domain::services::{RateLimitValidator, VerifierConfig};
use serde::Deserialize;
use std::net::{AddrParseError, SocketAddr};
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub security: SecurityConfig,
    pub retry: RetryConfig,
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub delivery: DeliveryConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    #[serde(default = "default_max_body_size")]
    pub max_body_size: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub format: LogFormat,
}

/// Output format of the log subscriber.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

/// Inbound verification settings.
#[derive(Debug, Clone, Deserialize)]
pub struct SecurityConfig {
    /// Shared HMAC secret agreed with the form provider.
    #[serde(default)]
    pub webhook_secret: String,

    #[serde(default = "default_signature_header")]
    pub signature_header: String,

    #[serde(default = "default_timestamp_header")]
    pub timestamp_header: String,

    #[serde(default = "default_timestamp_tolerance")]
    pub timestamp_tolerance_secs: u64,

    /// Replay TTL for requests without a timestamp header.
    #[serde(default = "default_replay_ttl_floor")]
    pub replay_ttl_floor_secs: u64,

    #[serde(default = "default_replay_cleanup_interval")]
    pub replay_cleanup_interval_secs: u64,

    /// Requests per minute accepted on the inbound webhook route. 0 disables.
    #[serde(default = "default_inbound_rate_limit")]
    pub inbound_rate_limit_per_minute: u32,
}

/// Retry policy plus the drain interval of the retry job.
#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_initial_retry_interval")]
    pub initial_retry_interval_secs: u64,

    #[serde(default = "default_max_retry_interval")]
    pub max_retry_interval_secs: u64,

    #[serde(default = "default_backoff_multiplier")]
    pub exponential_backoff_multiplier: f64,

    #[serde(default = "default_jitter_percentage")]
    pub jitter_percentage: f64,

    #[serde(default = "default_max_retry_duration")]
    pub max_retry_duration_secs: u64,

    #[serde(default = "default_max_total_attempts")]
    pub max_total_attempts: u32,

    #[serde(default = "default_failure_rate_threshold")]
    pub failure_rate_disable_threshold: f64,

    #[serde(default = "default_failure_rate_window")]
    pub failure_rate_evaluation_window_secs: u64,

    #[serde(default = "default_process_interval")]
    pub process_interval_secs: u64,

    /// How long finished records stay queryable before cleanup drops them.
    #[serde(default = "default_record_retention")]
    pub record_retention_secs: u64,

    #[serde(default = "default_record_cleanup_interval")]
    pub record_cleanup_interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    /// Ceiling for outbound calls to the form provider.
    #[serde(default = "default_requests_per_second")]
    pub requests_per_second: f64,
}

/// Where verified events are forwarded.
#[derive(Debug, Clone, Deserialize)]
pub struct DeliveryConfig {
    /// Forwarding is disabled when unset.
    #[serde(default)]
    pub forward_url: Option<String>,

    /// Secret used to sign forwarded requests. Unsigned when unset.
    #[serde(default)]
    pub signing_secret: Option<String>,

    #[serde(default = "default_delivery_timeout_ms")]
    pub timeout_ms: u64,
}

// Default value functions
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_request_timeout() -> u64 {
    30
}
fn default_max_body_size() -> usize {
    1_048_576
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_signature_header() -> String {
    domain::services::DEFAULT_SIGNATURE_HEADER.to_string()
}
fn default_timestamp_header() -> String {
    domain::services::DEFAULT_TIMESTAMP_HEADER.to_string()
}
fn default_timestamp_tolerance() -> u64 {
    300
}
fn default_replay_ttl_floor() -> u64 {
    300
}
fn default_replay_cleanup_interval() -> u64 {
    60
}
fn default_inbound_rate_limit() -> u32 {
    600
}
fn default_initial_retry_interval() -> u64 {
    60
}
fn default_max_retry_interval() -> u64 {
    3600
}
fn default_backoff_multiplier() -> f64 {
    2.0
}
fn default_jitter_percentage() -> f64 {
    10.0
}
fn default_max_retry_duration() -> u64 {
    86_400
}
fn default_max_total_attempts() -> u32 {
    10
}
fn default_failure_rate_threshold() -> f64 {
    100.0
}
fn default_failure_rate_window() -> u64 {
    86_400
}
fn default_process_interval() -> u64 {
    30
}
fn default_record_retention() -> u64 {
    86_400
}
fn default_record_cleanup_interval() -> u64 {
    600
}
fn default_requests_per_second() -> f64 {
    2.0
}
fn default_delivery_timeout_ms() -> u64 {
    10_000
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            forward_url: None,
            signing_secret: None,
            timeout_ms: default_delivery_timeout_ms(),
        }
    }
}

/// Configuration validation error
#[derive(Debug, thiserror::Error)]
pub enum ConfigValidationError {
    #[error("Missing required configuration: {0}")]
    MissingRequired(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

impl Config {
    /// Load configuration from files and environment variables.
    ///
    /// Loading order (later sources override earlier):
    /// 1. config/default.toml - base configuration with defaults
    /// 2. config/local.toml - local overrides (optional, not in git)
    /// 3. Environment variables with FW__ prefix
    pub fn load() -> Result<Self, config::ConfigError> {
        let config = config::Config::builder()
            .add_source(config::File::with_name("config/default"))
            .add_source(config::File::with_name("config/local").required(false))
            .add_source(config::Environment::with_prefix("FW").separator("__"))
            .build()?;

        let cfg: Self = config.try_deserialize()?;
        cfg.validate()
            .map_err(|e| config::ConfigError::Message(e.to_string()))?;
        Ok(cfg)
    }

    /// Load configuration for testing with custom overrides.
    ///
    /// Builds the config from embedded defaults so tests do not depend on
    /// the working directory.
    #[cfg(test)]
    pub fn load_for_test(overrides: &[(&str, &str)]) -> Result<Self, config::ConfigError> {
        let defaults = r#"
            [server]
            host = "0.0.0.0"
            port = 8080
            request_timeout_secs = 30
            max_body_size = 1048576

            [logging]
            level = "info"
            format = "json"

            [security]
            webhook_secret = ""
            signature_header = "x-webhook-signature"
            timestamp_header = "x-webhook-timestamp"
            timestamp_tolerance_secs = 300
            replay_ttl_floor_secs = 300
            replay_cleanup_interval_secs = 60
            inbound_rate_limit_per_minute = 600

            [retry]
            initial_retry_interval_secs = 60
            max_retry_interval_secs = 3600
            exponential_backoff_multiplier = 2.0
            jitter_percentage = 10.0
            max_retry_duration_secs = 86400
            max_total_attempts = 10
            failure_rate_disable_threshold = 100.0
            failure_rate_evaluation_window_secs = 86400
            process_interval_secs = 30
            record_retention_secs = 86400
            record_cleanup_interval_secs = 600

            [rate_limit]
            requests_per_second = 2.0

            [delivery]
            timeout_ms = 10000
        "#;

        let mut builder = config::Config::builder()
            .add_source(config::File::from_str(defaults, config::FileFormat::Toml));

        for (key, value) in overrides {
            builder = builder.set_override(*key, *value)?;
        }

        // Validation is left to the test.
        builder.build()?.try_deserialize()
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.security.webhook_secret.is_empty() {
            return Err(ConfigValidationError::MissingRequired(
                "FW__SECURITY__WEBHOOK_SECRET environment variable must be set".to_string(),
            ));
        }

        if self.server.port == 0 {
            return Err(ConfigValidationError::InvalidValue(
                "Server port cannot be 0".to_string(),
            ));
        }

        if self.security.signature_header.trim().is_empty() {
            return Err(ConfigValidationError::InvalidValue(
                "signature_header cannot be empty".to_string(),
            ));
        }

        RateLimitValidator::new(self.rate_limit.requests_per_second)
            .map_err(|e| ConfigValidationError::InvalidValue(format!("rate_limit: {}", e)))?;

        if self.retry.process_interval_secs == 0 {
            return Err(ConfigValidationError::InvalidValue(
                "retry.process_interval_secs cannot be 0".to_string(),
            ));
        }

        if self.retry.record_cleanup_interval_secs == 0 {
            return Err(ConfigValidationError::InvalidValue(
                "retry.record_cleanup_interval_secs cannot be 0".to_string(),
            ));
        }

        if Duration::from_secs(self.retry.record_retention_secs) > MAX_POLICY_DURATION {
            return Err(ConfigValidationError::InvalidValue(format!(
                "retry.record_retention_secs cannot exceed {}",
                MAX_POLICY_DURATION.as_secs()
            )));
        }

        self.retry_policy()
            .validate()
            .map_err(|e| ConfigValidationError::InvalidValue(format!("retry policy: {}", e)))?;

        Ok(())
    }

    pub fn socket_addr(&self) -> Result<SocketAddr, AddrParseError> {
        format!("{}:{}", self.server.host, self.server.port).parse()
    }

    pub fn retry_policy(&self) -> WebhookRetryPolicyConfig {
        let retry = &self.retry;
        WebhookRetryPolicyConfig {
            initial_retry_interval: Duration::from_secs(retry.initial_retry_interval_secs),
            max_retry_interval: Duration::from_secs(retry.max_retry_interval_secs),
            exponential_backoff_multiplier: retry.exponential_backoff_multiplier,
            jitter_percentage: retry.jitter_percentage,
            max_retry_duration: Duration::from_secs(retry.max_retry_duration_secs),
            max_total_attempts: retry.max_total_attempts,
            failure_rate_disable_threshold: retry.failure_rate_disable_threshold,
            failure_rate_evaluation_window: Duration::from_secs(
                retry.failure_rate_evaluation_window_secs,
            ),
        }
    }

    /// Header names are matched case-insensitively, so they are lowercased here.
    pub fn verifier_config(&self) -> VerifierConfig {
        let security = &self.security;
        VerifierConfig {
            secret: security.webhook_secret.clone(),
            signature_header: security.signature_header.trim().to_ascii_lowercase(),
            timestamp_header: security.timestamp_header.trim().to_ascii_lowercase(),
            timestamp_tolerance: Duration::from_secs(security.timestamp_tolerance_secs),
            replay_ttl_floor: Duration::from_secs(security.replay_ttl_floor_secs),
        }
    }
}

impl RetryConfig {
    pub fn process_interval(&self) -> Duration {
        Duration::from_secs(self.process_interval_secs)
    }

    pub fn record_retention(&self) -> Duration {
        Duration::from_secs(self.record_retention_secs)
    }

    pub fn record_cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.record_cleanup_interval_secs)
    }
}

impl SecurityConfig {
    pub fn replay_cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.replay_cleanup_interval_secs)
    }
}

impl DeliveryConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Forward URL, ignoring blank values coming from the environment.
    pub fn forward_url(&self) -> Option<&str> {
        self.forward_url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
    }
}
