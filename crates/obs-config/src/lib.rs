//! Layered configuration loading, validation, and environment overrides (§5.2/§9).
//!
//! [`CoreConfig`] is built in three layers: compiled-in defaults, an optional
//! TOML file, then `OBS_*`-prefixed environment variables — each layer only
//! overriding what the previous one set. Validation splits into hard
//! [`ConfigError`]s (structurally invalid input) and advisory
//! [`ConfigWarning`]s (unusual but workable values); credentials are never
//! rendered by `Debug`.
#![deny(unsafe_code)]
#![warn(missing_docs)]

use std::fmt;
use std::path::Path;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors that can occur while loading or validating a [`CoreConfig`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The requested configuration file was not found.
    #[error("config file not found: {path}")]
    FileNotFound {
        /// Path that was requested.
        path: String,
    },
    /// The file could not be parsed as valid TOML.
    #[error("failed to parse config: {reason}")]
    ParseError {
        /// Human-readable parse error detail.
        reason: String,
    },
    /// Semantic validation failed (one or more problems).
    #[error("config validation failed: {reasons:?}")]
    ValidationError {
        /// Individual validation failure messages.
        reasons: Vec<String>,
    },
}

/// Advisory-level issues that do not prevent startup but deserve attention.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigWarning {
    /// A credential needed for a remote collaborator was never set.
    MissingCredential {
        /// Name of the unset credential field.
        field: String,
    },
    /// An HTTP timeout is unusually large.
    LargeHttpTimeout {
        /// Timeout value in seconds.
        secs: u64,
    },
    /// The chat-history cap is unusually large, inflating cache entry size.
    LargeChatHistoryCount {
        /// Configured cap.
        count: usize,
    },
}

impl fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingCredential { field } => write!(f, "credential '{field}' is not set"),
            Self::LargeHttpTimeout { secs } => write!(f, "http_timeout_secs is unusually large ({secs}s)"),
            Self::LargeChatHistoryCount { count } => write!(f, "chat_history_count is unusually large ({count})"),
        }
    }
}

// ---------------------------------------------------------------------------
// Credentials
// ---------------------------------------------------------------------------

/// Secrets read from the environment. Never derives `Debug`/logs its values —
/// [`fmt::Debug`] is hand-written to redact every field.
#[derive(Clone, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct Credentials {
    /// Bearer token for the platform-configuration service.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform_bearer_token: Option<String>,
    /// Service key for the platform-configuration service.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform_service_key: Option<String>,
    /// API key for the platform's autonomous-agent endpoint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform_api_key: Option<String>,
    /// Bearer token for the Responses backend.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub responses_bearer_token: Option<String>,
    /// API key for the Workflow backend.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_api_key: Option<String>,
    /// Hex-encoded 256-bit key for the session cache's authenticated
    /// encryption (§4.7). Absent means the daemon generates an ephemeral
    /// key at startup, suitable for development only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_encryption_key: Option<String>,
}

fn redacted(value: &Option<String>) -> &'static str {
    if value.is_some() {
        "<redacted>"
    } else {
        "<unset>"
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("platform_bearer_token", &redacted(&self.platform_bearer_token))
            .field("platform_service_key", &redacted(&self.platform_service_key))
            .field("platform_api_key", &redacted(&self.platform_api_key))
            .field("responses_bearer_token", &redacted(&self.responses_bearer_token))
            .field("workflow_api_key", &redacted(&self.workflow_api_key))
            .field("session_encryption_key", &redacted(&self.session_encryption_key))
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Config types
// ---------------------------------------------------------------------------

/// Output format for structured logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// Human-readable, ANSI-colored output — the default for local development.
    #[default]
    Pretty,
    /// Structured JSON lines, suited to production log aggregation.
    Json,
}

/// Top-level runtime configuration for the observability service.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, JsonSchema)]
pub struct CoreConfig {
    /// Address the HTTP server binds to.
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// Bounded job-queue capacity (§4.5).
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Number of concurrent job-queue worker tasks (§4.5).
    #[serde(default = "default_queue_workers")]
    pub queue_workers: usize,
    /// Default session-cache TTL, in seconds (§4.7).
    #[serde(default = "default_session_ttl_secs")]
    pub session_ttl_secs: u64,
    /// Default chat-history window cap (§4.7).
    #[serde(default = "default_chat_history_count")]
    pub chat_history_count: usize,
    /// Timeout, in seconds, for outbound HTTP calls (§5).
    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,
    /// `tracing` log level (e.g. `"info"`, `"debug"`).
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Structured-log output format.
    #[serde(default)]
    pub log_format: LogFormat,
    /// Base URL of the platform-configuration service (§6.3).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform_config_base_url: Option<String>,
    /// Responses backend endpoint (§6.4).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub responses_backend_endpoint: Option<String>,
    /// Responses backend `api-version` query parameter.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub responses_api_version: Option<String>,
    /// Workflow backend base URL (§6.4).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_backend_base_url: Option<String>,
    /// Credentials for the collaborators above. Always sourced from the
    /// environment, never from a checked-in TOML file.
    #[serde(default)]
    pub credentials: Credentials,
}

fn default_bind_address() -> String {
    "0.0.0.0:8080".to_string()
}
fn default_queue_capacity() -> usize {
    256
}
fn default_queue_workers() -> usize {
    4
}
fn default_session_ttl_secs() -> u64 {
    obs_core::DEFAULT_SESSION_TTL_SECS
}
fn default_chat_history_count() -> usize {
    obs_core::DEFAULT_CHAT_HISTORY_COUNT
}
fn default_http_timeout_secs() -> u64 {
    30
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            queue_capacity: default_queue_capacity(),
            queue_workers: default_queue_workers(),
            session_ttl_secs: default_session_ttl_secs(),
            chat_history_count: default_chat_history_count(),
            http_timeout_secs: default_http_timeout_secs(),
            log_level: default_log_level(),
            log_format: LogFormat::default(),
            platform_config_base_url: None,
            responses_backend_endpoint: None,
            responses_api_version: None,
            workflow_backend_base_url: None,
            credentials: Credentials::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

const VALID_LOG_LEVELS: &[&str] = &["error", "warn", "info", "debug", "trace"];
const MAX_HTTP_TIMEOUT_SECS: u64 = 300;
const LARGE_HTTP_TIMEOUT_THRESHOLD: u64 = 60;
const LARGE_CHAT_HISTORY_THRESHOLD: usize = 200;

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

/// Loads a [`CoreConfig`] from an optional TOML file, then applies `OBS_*`
/// environment variable overrides on top.
///
/// * If `path` is `Some`, reads and parses the file.
/// * If `path` is `None`, starts from [`CoreConfig::default`].
pub fn load_config(path: Option<&Path>) -> Result<CoreConfig, ConfigError> {
    let mut config = match path {
        Some(p) => {
            let content = std::fs::read_to_string(p).map_err(|_| ConfigError::FileNotFound {
                path: p.display().to_string(),
            })?;
            parse_toml(&content)?
        }
        None => CoreConfig::default(),
    };
    apply_env_overrides(&mut config);
    Ok(config)
}

/// Parses a TOML string into a [`CoreConfig`].
pub fn parse_toml(content: &str) -> Result<CoreConfig, ConfigError> {
    toml::from_str(content).map_err(|e| ConfigError::ParseError { reason: e.to_string() })
}

// ---------------------------------------------------------------------------
// Env overrides
// ---------------------------------------------------------------------------

fn env_string(name: &str, target: &mut Option<String>) {
    if let Ok(val) = std::env::var(name) {
        *target = Some(val);
    }
}

fn env_parsed<T: std::str::FromStr>(name: &str, target: &mut T) {
    if let Ok(val) = std::env::var(name)
        && let Ok(parsed) = val.parse()
    {
        *target = parsed;
    }
}

/// Applies `OBS_*`-prefixed environment variable overrides in place.
///
/// Recognised variables: `OBS_BIND_ADDRESS`, `OBS_QUEUE_CAPACITY`,
/// `OBS_QUEUE_WORKERS`, `OBS_SESSION_TTL_SECS`, `OBS_CHAT_HISTORY_COUNT`,
/// `OBS_HTTP_TIMEOUT_SECS`, `OBS_LOG_LEVEL`, `OBS_LOG_FORMAT`,
/// `OBS_PLATFORM_CONFIG_BASE_URL`, `OBS_RESPONSES_BACKEND_ENDPOINT`,
/// `OBS_RESPONSES_API_VERSION`, `OBS_WORKFLOW_BACKEND_BASE_URL`, and the
/// credential variables `OBS_PLATFORM_BEARER_TOKEN`,
/// `OBS_PLATFORM_SERVICE_KEY`, `OBS_PLATFORM_API_KEY`,
/// `OBS_RESPONSES_BEARER_TOKEN`, `OBS_WORKFLOW_API_KEY`,
/// `OBS_SESSION_ENCRYPTION_KEY`.
pub fn apply_env_overrides(config: &mut CoreConfig) {
    if let Ok(val) = std::env::var("OBS_BIND_ADDRESS") {
        config.bind_address = val;
    }
    env_parsed("OBS_QUEUE_CAPACITY", &mut config.queue_capacity);
    env_parsed("OBS_QUEUE_WORKERS", &mut config.queue_workers);
    env_parsed("OBS_SESSION_TTL_SECS", &mut config.session_ttl_secs);
    env_parsed("OBS_CHAT_HISTORY_COUNT", &mut config.chat_history_count);
    env_parsed("OBS_HTTP_TIMEOUT_SECS", &mut config.http_timeout_secs);
    if let Ok(val) = std::env::var("OBS_LOG_LEVEL") {
        config.log_level = val;
    }
    if let Ok(val) = std::env::var("OBS_LOG_FORMAT") {
        config.log_format = match val.to_ascii_lowercase().as_str() {
            "json" => LogFormat::Json,
            _ => LogFormat::Pretty,
        };
    }
    env_string("OBS_PLATFORM_CONFIG_BASE_URL", &mut config.platform_config_base_url);
    env_string("OBS_RESPONSES_BACKEND_ENDPOINT", &mut config.responses_backend_endpoint);
    env_string("OBS_RESPONSES_API_VERSION", &mut config.responses_api_version);
    env_string("OBS_WORKFLOW_BACKEND_BASE_URL", &mut config.workflow_backend_base_url);

    env_string("OBS_PLATFORM_BEARER_TOKEN", &mut config.credentials.platform_bearer_token);
    env_string("OBS_PLATFORM_SERVICE_KEY", &mut config.credentials.platform_service_key);
    env_string("OBS_PLATFORM_API_KEY", &mut config.credentials.platform_api_key);
    env_string("OBS_RESPONSES_BEARER_TOKEN", &mut config.credentials.responses_bearer_token);
    env_string("OBS_WORKFLOW_API_KEY", &mut config.credentials.workflow_api_key);
    env_string("OBS_SESSION_ENCRYPTION_KEY", &mut config.credentials.session_encryption_key);
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Validates a parsed configuration, returning advisory warnings.
///
/// Hard errors (zero capacity/workers/ttl, out-of-range timeouts, an
/// unrecognised log level) come back as [`ConfigError::ValidationError`];
/// soft issues (missing credentials, unusually large values) come back as
/// warnings.
pub fn validate_config(config: &CoreConfig) -> Result<Vec<ConfigWarning>, ConfigError> {
    let mut errors: Vec<String> = Vec::new();
    let mut warnings: Vec<ConfigWarning> = Vec::new();

    if !VALID_LOG_LEVELS.contains(&config.log_level.as_str()) {
        errors.push(format!("invalid log_level '{}'", config.log_level));
    }
    if config.queue_capacity == 0 {
        errors.push("queue_capacity must be greater than 0".to_string());
    }
    if config.queue_workers == 0 {
        errors.push("queue_workers must be greater than 0".to_string());
    }
    if config.session_ttl_secs == 0 {
        errors.push("session_ttl_secs must be greater than 0".to_string());
    }
    if config.chat_history_count == 0 {
        errors.push("chat_history_count must be greater than 0".to_string());
    }
    if config.http_timeout_secs == 0 || config.http_timeout_secs > MAX_HTTP_TIMEOUT_SECS {
        errors.push(format!(
            "http_timeout_secs {} out of range (1..{MAX_HTTP_TIMEOUT_SECS})",
            config.http_timeout_secs
        ));
    } else if config.http_timeout_secs > LARGE_HTTP_TIMEOUT_THRESHOLD {
        warnings.push(ConfigWarning::LargeHttpTimeout { secs: config.http_timeout_secs });
    }

    if config.chat_history_count > LARGE_CHAT_HISTORY_THRESHOLD {
        warnings.push(ConfigWarning::LargeChatHistoryCount { count: config.chat_history_count });
    }

    for (field, value) in [
        ("credentials.platform_bearer_token", &config.credentials.platform_bearer_token),
        ("credentials.platform_service_key", &config.credentials.platform_service_key),
        ("credentials.responses_bearer_token", &config.credentials.responses_bearer_token),
        ("credentials.workflow_api_key", &config.credentials.workflow_api_key),
        ("credentials.session_encryption_key", &config.credentials.session_encryption_key),
    ] {
        if value.is_none() {
            warnings.push(ConfigWarning::MissingCredential { field: field.to_string() });
        }
    }

    if errors.is_empty() {
        Ok(warnings)
    } else {
        Err(ConfigError::ValidationError { reasons: errors })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::Mutex;

    // Environment-variable tests share process-global state; serialize them.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn default_config_is_valid_with_advisory_warnings() {
        let config = CoreConfig::default();
        let warnings = validate_config(&config).expect("default config should be valid");
        assert!(!warnings.is_empty());
    }

    #[test]
    fn default_config_has_sensible_defaults() {
        let config = CoreConfig::default();
        assert_eq!(config.bind_address, "0.0.0.0:8080");
        assert_eq!(config.session_ttl_secs, 180);
        assert_eq!(config.chat_history_count, 30);
        assert_eq!(config.log_format, LogFormat::Pretty);
    }

    #[test]
    fn parse_valid_toml_string() {
        let toml = r#"
            bind_address = "127.0.0.1:9000"
            log_level = "debug"
        "#;
        let config = parse_toml(toml).unwrap();
        assert_eq!(config.bind_address, "127.0.0.1:9000");
        assert_eq!(config.log_level, "debug");
        // Fields absent from the file still take their compiled-in defaults.
        assert_eq!(config.queue_capacity, 256);
    }

    #[test]
    fn parse_invalid_toml_gives_parse_error() {
        let err = parse_toml("this is [not valid toml =").unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
    }

    #[test]
    fn validation_catches_invalid_log_level() {
        let config = CoreConfig {
            log_level: "verbose".to_string(),
            ..Default::default()
        };
        let err = validate_config(&config).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError { .. }));
    }

    #[test]
    fn validation_catches_zero_queue_capacity() {
        let config = CoreConfig {
            queue_capacity: 0,
            ..Default::default()
        };
        let err = validate_config(&config).unwrap_err();
        match err {
            ConfigError::ValidationError { reasons } => {
                assert!(reasons.iter().any(|r| r.contains("queue_capacity")));
            }
            other => panic!("expected ValidationError, got {other:?}"),
        }
    }

    #[test]
    fn validation_catches_timeout_out_of_range() {
        let config = CoreConfig {
            http_timeout_secs: MAX_HTTP_TIMEOUT_SECS + 1,
            ..Default::default()
        };
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn large_timeout_under_max_produces_warning_not_error() {
        let config = CoreConfig {
            http_timeout_secs: LARGE_HTTP_TIMEOUT_THRESHOLD + 1,
            ..Default::default()
        };
        let warnings = validate_config(&config).unwrap();
        assert!(warnings.iter().any(|w| matches!(w, ConfigWarning::LargeHttpTimeout { .. })));
    }

    #[test]
    fn missing_credentials_produce_warnings() {
        let warnings = validate_config(&CoreConfig::default()).unwrap();
        assert!(warnings.iter().any(|w| matches!(w, ConfigWarning::MissingCredential { .. })));
    }

    #[test]
    fn load_missing_file_gives_file_not_found() {
        let err = load_config(Some(Path::new("/nonexistent/obs-core.toml"))).unwrap_err();
        assert!(matches!(err, ConfigError::FileNotFound { .. }));
    }

    #[test]
    fn load_config_from_file_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("obs-core.toml");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(f, "bind_address = \"0.0.0.0:9090\"\nlog_level = \"warn\"").unwrap();
        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.bind_address, "0.0.0.0:9090");
        assert_eq!(config.log_level, "warn");
    }

    #[test]
    fn env_overrides_take_precedence_over_file() {
        let _guard = ENV_LOCK.lock().unwrap();
        let previous = std::env::var("OBS_BIND_ADDRESS").ok();
        std::env::set_var("OBS_BIND_ADDRESS", "0.0.0.0:7777");

        let mut config = CoreConfig::default();
        apply_env_overrides(&mut config);
        assert_eq!(config.bind_address, "0.0.0.0:7777");

        match previous {
            Some(v) => std::env::set_var("OBS_BIND_ADDRESS", v),
            None => std::env::remove_var("OBS_BIND_ADDRESS"),
        }
    }

    #[test]
    fn env_override_ignores_unparseable_numeric_value() {
        let _guard = ENV_LOCK.lock().unwrap();
        let previous = std::env::var("OBS_QUEUE_CAPACITY").ok();
        std::env::set_var("OBS_QUEUE_CAPACITY", "not-a-number");

        let mut config = CoreConfig::default();
        apply_env_overrides(&mut config);
        assert_eq!(config.queue_capacity, 256);

        match previous {
            Some(v) => std::env::set_var("OBS_QUEUE_CAPACITY", v),
            None => std::env::remove_var("OBS_QUEUE_CAPACITY"),
        }
    }

    #[test]
    fn credentials_debug_output_never_contains_secret_values() {
        let creds = Credentials {
            platform_bearer_token: Some("super-secret-token".to_string()),
            platform_service_key: Some("svc-key".to_string()),
            platform_api_key: None,
            responses_bearer_token: None,
            workflow_api_key: None,
            session_encryption_key: None,
        };
        let rendered = format!("{creds:?}");
        assert!(!rendered.contains("super-secret-token"));
        assert!(!rendered.contains("svc-key"));
        assert!(rendered.contains("<redacted>"));
        assert!(rendered.contains("<unset>"));
    }

    #[test]
    fn config_warning_display_mentions_the_offending_value() {
        let warning = ConfigWarning::LargeHttpTimeout { secs: 120 };
        assert!(warning.to_string().contains("120"));
    }
}
