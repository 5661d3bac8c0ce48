use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use frontdesk_core::config::{AppConfig, LoadOptions};
use secrecy::ExposeSecret;
use toml::Value;

/// One rendered setting: dotted key, display value, and the env var that can override it.
struct Field {
    key: &'static str,
    value: String,
    env_key: Option<&'static str>,
}

impl Field {
    fn new(key: &'static str, value: impl ToString, env_key: Option<&'static str>) -> Self {
        Self { key, value: value.to_string(), env_key }
    }
}

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for field in fields(&config) {
        let source = field_source(
            field.key,
            field.env_key,
            config_file_doc.as_ref(),
            config_file_path.as_deref(),
        );
        lines.push(render_line(field.key, &field.value, source));
    }

    lines.join("\n")
}

fn fields(config: &AppConfig) -> Vec<Field> {
    let api_key = redact_key(config.llm.api_key.as_ref().map(|key| key.expose_secret()));
    vec![
        Field::new("database.url", &config.database.url, Some("FRONTDESK_DATABASE_URL")),
        Field::new(
            "database.max_connections",
            config.database.max_connections,
            Some("FRONTDESK_DATABASE_MAX_CONNECTIONS"),
        ),
        Field::new(
            "database.timeout_secs",
            config.database.timeout_secs,
            Some("FRONTDESK_DATABASE_TIMEOUT_SECS"),
        ),
        Field::new("llm.base_url", &config.llm.base_url, Some("FRONTDESK_LLM_BASE_URL")),
        Field::new("llm.model", &config.llm.model, Some("FRONTDESK_LLM_MODEL")),
        Field::new("llm.api_key", api_key, Some("FRONTDESK_LLM_API_KEY")),
        Field::new("llm.timeout_secs", config.llm.timeout_secs, Some("FRONTDESK_LLM_TIMEOUT_SECS")),
        Field::new("llm.max_retries", config.llm.max_retries, Some("FRONTDESK_LLM_MAX_RETRIES")),
        Field::new("llm.max_tokens", config.llm.max_tokens, Some("FRONTDESK_LLM_MAX_TOKENS")),
        Field::new(
            "server.bind_address",
            &config.server.bind_address,
            Some("FRONTDESK_SERVER_BIND_ADDRESS"),
        ),
        Field::new("server.port", config.server.port, Some("FRONTDESK_SERVER_PORT")),
        Field::new(
            "server.voice_response_timeout_secs",
            config.server.voice_response_timeout_secs,
            Some("FRONTDESK_SERVER_VOICE_RESPONSE_TIMEOUT_SECS"),
        ),
        Field::new(
            "limits.contact_messages_per_hour",
            config.limits.contact_messages_per_hour,
            Some("FRONTDESK_LIMITS_CONTACT_MESSAGES_PER_HOUR"),
        ),
        Field::new(
            "limits.contact_messages_per_day",
            config.limits.contact_messages_per_day,
            Some("FRONTDESK_LIMITS_CONTACT_MESSAGES_PER_DAY"),
        ),
        Field::new(
            "limits.agent_replies_per_day",
            config.limits.agent_replies_per_day,
            Some("FRONTDESK_LIMITS_AGENT_REPLIES_PER_DAY"),
        ),
        Field::new("limits.voice_max_turns", config.limits.voice_max_turns, None),
        Field::new("limits.voice_max_duration_secs", config.limits.voice_max_duration_secs, None),
        Field::new("logging.level", &config.logging.level, Some("FRONTDESK_LOGGING_LEVEL")),
        Field::new(
            "logging.format",
            format!("{:?}", config.logging.format),
            Some("FRONTDESK_LOGGING_FORMAT"),
        ),
    ]
}

fn detect_config_path() -> Option<PathBuf> {
    [PathBuf::from("frontdesk.toml"), PathBuf::from("config/frontdesk.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_key: Option<&str>,
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_key {
        if env::var_os(env_key).is_some() {
            return format!("env ({env_key})");
        }
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}

/// Keeps a recognisable prefix such as `sk-` and hides the rest.
fn redact_key(key: Option<&str>) -> String {
    let Some(trimmed) = key.map(str::trim) else {
        return "<unset>".to_string();
    };
    if trimmed.is_empty() {
        return "<empty>".to_string();
    }

    if let Some((prefix, _)) = trimmed.split_once('-') {
        return format!("{prefix}-***");
    }

    "<redacted>".to_string()
}
