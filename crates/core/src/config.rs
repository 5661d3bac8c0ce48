use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::rate_limit::RateLimitPolicy;

pub const DEFAULT_LLM_BASE_URL: &str = "https://openrouter.ai/api/v1";

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub llm: LlmConfig,
    pub server: ServerConfig,
    pub limits: LimitsConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LlmConfig {
    pub api_key: Option<SecretString>,
    pub base_url: String,
    pub model: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub max_tokens: u32,
    pub breaker_failure_threshold: u32,
    pub breaker_reset_secs: u64,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub graceful_shutdown_secs: u64,
    pub voice_response_timeout_secs: u64,
}

/// Cost-protection thresholds. A count equal to the limit is already rejected.
#[derive(Clone, Debug)]
pub struct LimitsConfig {
    pub contact_messages_per_hour: u32,
    pub contact_messages_per_day: u32,
    pub agent_replies_per_day: u32,
    pub voice_max_turns: u32,
    pub voice_max_duration_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub llm_model: Option<String>,
    pub llm_api_key: Option<String>,
    pub llm_base_url: Option<String>,
    pub server_port: Option<u16>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://frontdesk.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            llm: LlmConfig {
                api_key: None,
                base_url: DEFAULT_LLM_BASE_URL.to_string(),
                model: "anthropic/claude-haiku-4-5".to_string(),
                timeout_secs: 30,
                max_retries: 2,
                max_tokens: 1024,
                breaker_failure_threshold: 5,
                breaker_reset_secs: 30,
            },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                port: 8080,
                graceful_shutdown_secs: 15,
                voice_response_timeout_secs: 12,
            },
            limits: LimitsConfig::default(),
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        let policy = RateLimitPolicy::default();
        Self {
            contact_messages_per_hour: policy.contact_messages_per_hour,
            contact_messages_per_day: policy.contact_messages_per_day,
            agent_replies_per_day: policy.agent_replies_per_day,
            voice_max_turns: policy.voice_max_turns,
            voice_max_duration_secs: policy.voice_max_duration.as_secs(),
        }
    }
}

impl LimitsConfig {
    pub fn policy(&self) -> RateLimitPolicy {
        RateLimitPolicy {
            contact_messages_per_hour: self.contact_messages_per_hour,
            contact_messages_per_day: self.contact_messages_per_day,
            agent_replies_per_day: self.agent_replies_per_day,
            voice_max_turns: self.voice_max_turns,
            voice_max_duration: Duration::from_secs(self.voice_max_duration_secs),
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("frontdesk.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
        }

        if let Some(llm) = patch.llm {
            if let Some(api_key) = llm.api_key {
                self.llm.api_key = Some(secret_value(api_key));
            }
            if let Some(base_url) = llm.base_url {
                self.llm.base_url = base_url;
            }
            if let Some(model) = llm.model {
                self.llm.model = model;
            }
            if let Some(timeout_secs) = llm.timeout_secs {
                self.llm.timeout_secs = timeout_secs;
            }
            if let Some(max_retries) = llm.max_retries {
                self.llm.max_retries = max_retries;
            }
            if let Some(max_tokens) = llm.max_tokens {
                self.llm.max_tokens = max_tokens;
            }
            if let Some(threshold) = llm.breaker_failure_threshold {
                self.llm.breaker_failure_threshold = threshold;
            }
            if let Some(reset_secs) = llm.breaker_reset_secs {
                self.llm.breaker_reset_secs = reset_secs;
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(port) = server.port {
                self.server.port = port;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
            }
            if let Some(voice_timeout) = server.voice_response_timeout_secs {
                self.server.voice_response_timeout_secs = voice_timeout;
            }
        }

        if let Some(limits) = patch.limits {
            if let Some(value) = limits.contact_messages_per_hour {
                self.limits.contact_messages_per_hour = value;
            }
            if let Some(value) = limits.contact_messages_per_day {
                self.limits.contact_messages_per_day = value;
            }
            if let Some(value) = limits.agent_replies_per_day {
                self.limits.agent_replies_per_day = value;
            }
            if let Some(value) = limits.voice_max_turns {
                self.limits.voice_max_turns = value;
            }
            if let Some(value) = limits.voice_max_duration_secs {
                self.limits.voice_max_duration_secs = value;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("FRONTDESK_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("FRONTDESK_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections =
                parse_u32("FRONTDESK_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("FRONTDESK_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("FRONTDESK_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("FRONTDESK_LLM_API_KEY") {
            self.llm.api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("FRONTDESK_LLM_BASE_URL") {
            self.llm.base_url = value;
        }
        if let Some(value) = read_env("FRONTDESK_LLM_MODEL") {
            self.llm.model = value;
        }
        if let Some(value) = read_env("FRONTDESK_LLM_TIMEOUT_SECS") {
            self.llm.timeout_secs = parse_u64("FRONTDESK_LLM_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("FRONTDESK_LLM_MAX_RETRIES") {
            self.llm.max_retries = parse_u32("FRONTDESK_LLM_MAX_RETRIES", &value)?;
        }
        if let Some(value) = read_env("FRONTDESK_LLM_MAX_TOKENS") {
            self.llm.max_tokens = parse_u32("FRONTDESK_LLM_MAX_TOKENS", &value)?;
        }

        if let Some(value) = read_env("FRONTDESK_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("FRONTDESK_SERVER_PORT") {
            self.server.port = parse_u16("FRONTDESK_SERVER_PORT", &value)?;
        }
        if let Some(value) = read_env("FRONTDESK_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_u64("FRONTDESK_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }
        if let Some(value) = read_env("FRONTDESK_SERVER_VOICE_RESPONSE_TIMEOUT_SECS") {
            self.server.voice_response_timeout_secs =
                parse_u64("FRONTDESK_SERVER_VOICE_RESPONSE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("FRONTDESK_LIMITS_CONTACT_MESSAGES_PER_HOUR") {
            self.limits.contact_messages_per_hour =
                parse_u32("FRONTDESK_LIMITS_CONTACT_MESSAGES_PER_HOUR", &value)?;
        }
        if let Some(value) = read_env("FRONTDESK_LIMITS_CONTACT_MESSAGES_PER_DAY") {
            self.limits.contact_messages_per_day =
                parse_u32("FRONTDESK_LIMITS_CONTACT_MESSAGES_PER_DAY", &value)?;
        }
        if let Some(value) = read_env("FRONTDESK_LIMITS_AGENT_REPLIES_PER_DAY") {
            self.limits.agent_replies_per_day =
                parse_u32("FRONTDESK_LIMITS_AGENT_REPLIES_PER_DAY", &value)?;
        }

        let log_level =
            read_env("FRONTDESK_LOGGING_LEVEL").or_else(|| read_env("FRONTDESK_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("FRONTDESK_LOGGING_FORMAT").or_else(|| read_env("FRONTDESK_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(llm_model) = overrides.llm_model {
            self.llm.model = llm_model;
        }
        if let Some(api_key) = overrides.llm_api_key {
            self.llm.api_key = Some(secret_value(api_key));
        }
        if let Some(base_url) = overrides.llm_base_url {
            self.llm.base_url = base_url;
        }
        if let Some(port) = overrides.server_port {
            self.server.port = port;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_llm(&self.llm)?;
        validate_server(&self.server)?;
        validate_limits(&self.limits)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("frontdesk.toml"), PathBuf::from("config/frontdesk.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    let sqlite_url =
        url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                .to_string(),
        ));
    }

    if database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_llm(llm: &LlmConfig) -> Result<(), ConfigError> {
    if llm.timeout_secs == 0 || llm.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "llm.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    let base_url = llm.base_url.trim();
    if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
        return Err(ConfigError::Validation(
            "llm.base_url must start with http:// or https://".to_string(),
        ));
    }

    // Hosted endpoints reject anonymous calls; local gateways usually do not.
    let hosted = base_url.starts_with("https://");
    let missing_key =
        llm.api_key.as_ref().map(|value| value.expose_secret().trim().is_empty()).unwrap_or(true);
    if hosted && missing_key {
        return Err(ConfigError::Validation(format!(
            "llm.api_key is required for `{base_url}` (set FRONTDESK_LLM_API_KEY)"
        )));
    }

    if llm.model.trim().is_empty() {
        return Err(ConfigError::Validation("llm.model must not be empty".to_string()));
    }

    if llm.max_tokens == 0 {
        return Err(ConfigError::Validation(
            "llm.max_tokens must be greater than zero".to_string(),
        ));
    }

    if llm.breaker_failure_threshold == 0 {
        return Err(ConfigError::Validation(
            "llm.breaker_failure_threshold must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.port == 0 {
        return Err(ConfigError::Validation("server.port must be greater than zero".to_string()));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
        ));
    }

    if server.voice_response_timeout_secs == 0 || server.voice_response_timeout_secs > 60 {
        return Err(ConfigError::Validation(
            "server.voice_response_timeout_secs must be in range 1..=60".to_string(),
        ));
    }

    Ok(())
}

fn validate_limits(limits: &LimitsConfig) -> Result<(), ConfigError> {
    let all_positive = limits.contact_messages_per_hour > 0
        && limits.contact_messages_per_day > 0
        && limits.agent_replies_per_day > 0
        && limits.voice_max_turns > 0
        && limits.voice_max_duration_secs > 0;
    if !all_positive {
        return Err(ConfigError::Validation(
            "limits.* thresholds must all be greater than zero".to_string(),
        ));
    }

    if limits.contact_messages_per_hour > limits.contact_messages_per_day {
        return Err(ConfigError::Validation(
            "limits.contact_messages_per_hour cannot exceed limits.contact_messages_per_day"
                .to_string(),
        ));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.parse::<u16>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    llm: Option<LlmPatch>,
    server: Option<ServerPatch>,
    limits: Option<LimitsPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LlmPatch {
    api_key: Option<String>,
    base_url: Option<String>,
    model: Option<String>,
    timeout_secs: Option<u64>,
    max_retries: Option<u32>,
    max_tokens: Option<u32>,
    breaker_failure_threshold: Option<u32>,
    breaker_reset_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
    voice_response_timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LimitsPatch {
    contact_messages_per_hour: Option<u32>,
    contact_messages_per_day: Option<u32>,
    agent_replies_per_day: Option<u32>,
    voice_max_turns: Option<u32>,
    voice_max_duration_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}
