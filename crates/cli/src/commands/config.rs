use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use relaydesk_core::config::AppConfig;
use secrecy::{ExposeSecret, SecretString};
use toml::Value;

use crate::commands::{load_config, CommandResult};

pub fn run() -> CommandResult {
    let config = match load_config("config") {
        Ok(config) => config,
        Err(failure) => return failure,
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for (key, value) in effective_values(&config) {
        let source =
            field_source(key, &env_key(key), config_file_doc.as_ref(), config_file_path.as_deref());
        lines.push(render_line(key, &value, source));
    }

    CommandResult::success("config", lines.join("\n"))
}

fn effective_values(config: &AppConfig) -> Vec<(&'static str, String)> {
    vec![
        ("database.url", config.database.url.clone()),
        ("database.max_connections", config.database.max_connections.to_string()),
        ("database.timeout_secs", config.database.timeout_secs.to_string()),
        ("transport.api_url", config.transport.api_url.clone()),
        ("transport.api_key", redact_secret(Some(&config.transport.api_key))),
        ("transport.timeout_secs", config.transport.timeout_secs.to_string()),
        ("llm.provider", format!("{:?}", config.llm.provider)),
        ("llm.model", config.llm.model.clone()),
        ("llm.base_url", config.llm.base_url.clone().unwrap_or_else(|| "<unset>".to_string())),
        ("llm.api_key", redact_secret(config.llm.api_key.as_ref())),
        ("llm.timeout_secs", config.llm.timeout_secs.to_string()),
        ("llm.max_retries", config.llm.max_retries.to_string()),
        (
            "media.transcription_base_url",
            config
                .media
                .transcription_base_url
                .clone()
                .unwrap_or_else(|| "<unset>".to_string()),
        ),
        ("media.transcription_model", config.media.transcription_model.clone()),
        ("billing.timeout_secs", config.billing.timeout_secs.to_string()),
        ("orchestrator.call_timeout_secs", config.orchestrator.call_timeout_secs.to_string()),
        ("orchestrator.history_turns", config.orchestrator.history_turns.to_string()),
        ("orchestrator.page_size", config.orchestrator.page_size.to_string()),
        (
            "orchestrator.min_automated_replies",
            config.orchestrator.min_automated_replies.to_string(),
        ),
        (
            "orchestrator.recent_window_minutes",
            config.orchestrator.recent_window_minutes.to_string(),
        ),
        ("server.bind_address", config.server.bind_address.clone()),
        ("server.port", config.server.port.to_string()),
        ("server.webhook_secret", redact_secret(config.server.webhook_secret.as_ref())),
        ("logging.level", config.logging.level.clone()),
        ("logging.format", format!("{:?}", config.logging.format)),
    ]
}

/// `database.url` -> `RELAYDESK_DATABASE_URL`.
fn env_key(key_path: &str) -> String {
    format!("RELAYDESK_{}", key_path.replace('.', "_").to_uppercase())
}

fn detect_config_path() -> Option<PathBuf> {
    [PathBuf::from("relaydesk.toml"), PathBuf::from("config/relaydesk.toml")]
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
    env_key: &str,
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if env::var_os(env_key).is_some() {
        return format!("env ({env_key})");
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

fn redact_secret(secret: Option<&SecretString>) -> String {
    match secret.map(|secret| secret.expose_secret().trim().to_owned()) {
        None => "<unset>".to_string(),
        Some(value) if value.is_empty() => "<empty>".to_string(),
        Some(value) if value.chars().count() > 8 => {
            format!("{}***", value.chars().take(4).collect::<String>())
        }
        Some(_) => "<redacted>".to_string(),
    }
}
