use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub transport: TransportConfig,
    pub llm: LlmConfig,
    pub media: MediaConfig,
    pub billing: BillingConfig,
    pub orchestrator: OrchestratorConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

/// Chat gateway connection plus the restart policy of each session actor.
#[derive(Clone, Debug)]
pub struct TransportConfig {
    pub api_url: String,
    pub api_key: SecretString,
    pub timeout_secs: u64,
    pub restart_max_retries: u32,
    pub restart_base_delay_ms: u64,
    pub restart_max_delay_ms: u64,
}

#[derive(Clone, Debug)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    pub api_key: Option<SecretString>,
    pub base_url: Option<String>,
    pub model: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

#[derive(Clone, Debug)]
pub struct MediaConfig {
    /// Falls back to `llm.base_url` when unset.
    pub transcription_base_url: Option<String>,
    pub transcription_model: String,
    pub language: String,
}

#[derive(Clone, Debug)]
pub struct BillingConfig {
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct OrchestratorConfig {
    pub call_timeout_secs: u64,
    pub history_turns: usize,
    pub page_size: usize,
    pub min_automated_replies: u32,
    pub recent_window_minutes: i64,
    pub loose_transfer_min_recent: u32,
    pub fallback_min_recent: u32,
    pub indecision_min_replies: u32,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            call_timeout_secs: 30,
            history_turns: 10,
            page_size: 20,
            min_automated_replies: 3,
            recent_window_minutes: 120,
            loose_transfer_min_recent: 5,
            fallback_min_recent: 3,
            indecision_min_replies: 5,
        }
    }
}

impl OrchestratorConfig {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub graceful_shutdown_secs: u64,
    pub webhook_secret: Option<SecretString>,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmProvider {
    OpenAi,
    Anthropic,
    Ollama,
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
    pub llm_provider: Option<LlmProvider>,
    pub llm_model: Option<String>,
    pub transport_api_url: Option<String>,
    pub transport_api_key: Option<String>,
    pub server_port: Option<u16>,
    pub webhook_secret: Option<String>,
    pub call_timeout_secs: Option<u64>,
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
                url: "sqlite://relaydesk.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            transport: TransportConfig {
                api_url: "http://localhost:8081".to_string(),
                api_key: String::new().into(),
                timeout_secs: 30,
                restart_max_retries: 5,
                restart_base_delay_ms: 250,
                restart_max_delay_ms: 5_000,
            },
            llm: LlmConfig {
                provider: LlmProvider::Ollama,
                api_key: None,
                base_url: Some("http://localhost:11434".to_string()),
                model: "llama3.1".to_string(),
                timeout_secs: 60,
                max_retries: 2,
            },
            media: MediaConfig {
                transcription_base_url: None,
                transcription_model: "whisper-1".to_string(),
                language: "pt".to_string(),
            },
            billing: BillingConfig { timeout_secs: 30 },
            orchestrator: OrchestratorConfig::default(),
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                port: 8080,
                graceful_shutdown_secs: 15,
                webhook_secret: None,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl std::str::FromStr for LlmProvider {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(Self::OpenAi),
            "anthropic" => Ok(Self::Anthropic),
            "ollama" => Ok(Self::Ollama),
            other => Err(ConfigError::Validation(format!(
                "unsupported llm provider `{other}` (expected openai|anthropic|ollama)"
            ))),
        }
    }
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
            let expected =
                options.config_path.unwrap_or_else(|| PathBuf::from("relaydesk.toml"));
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

        if let Some(transport) = patch.transport {
            if let Some(api_url) = transport.api_url {
                self.transport.api_url = api_url;
            }
            if let Some(transport_api_key_value) = transport.api_key {
                self.transport.api_key = secret_value(transport_api_key_value);
            }
            if let Some(timeout_secs) = transport.timeout_secs {
                self.transport.timeout_secs = timeout_secs;
            }
            if let Some(restart_max_retries) = transport.restart_max_retries {
                self.transport.restart_max_retries = restart_max_retries;
            }
            if let Some(restart_base_delay_ms) = transport.restart_base_delay_ms {
                self.transport.restart_base_delay_ms = restart_base_delay_ms;
            }
            if let Some(restart_max_delay_ms) = transport.restart_max_delay_ms {
                self.transport.restart_max_delay_ms = restart_max_delay_ms;
            }
        }

        if let Some(llm) = patch.llm {
            if let Some(provider) = llm.provider {
                self.llm.provider = provider;
            }
            if let Some(llm_api_key_value) = llm.api_key {
                self.llm.api_key = Some(secret_value(llm_api_key_value));
            }
            if let Some(base_url) = llm.base_url {
                self.llm.base_url = Some(base_url);
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
        }

        if let Some(media) = patch.media {
            if let Some(transcription_base_url) = media.transcription_base_url {
                self.media.transcription_base_url = Some(transcription_base_url);
            }
            if let Some(transcription_model) = media.transcription_model {
                self.media.transcription_model = transcription_model;
            }
            if let Some(language) = media.language {
                self.media.language = language;
            }
        }

        if let Some(billing) = patch.billing {
            if let Some(timeout_secs) = billing.timeout_secs {
                self.billing.timeout_secs = timeout_secs;
            }
        }

        if let Some(orchestrator) = patch.orchestrator {
            let target = &mut self.orchestrator;
            if let Some(value) = orchestrator.call_timeout_secs {
                target.call_timeout_secs = value;
            }
            if let Some(value) = orchestrator.history_turns {
                target.history_turns = value;
            }
            if let Some(value) = orchestrator.page_size {
                target.page_size = value;
            }
            if let Some(value) = orchestrator.min_automated_replies {
                target.min_automated_replies = value;
            }
            if let Some(value) = orchestrator.recent_window_minutes {
                target.recent_window_minutes = value;
            }
            if let Some(value) = orchestrator.loose_transfer_min_recent {
                target.loose_transfer_min_recent = value;
            }
            if let Some(value) = orchestrator.fallback_min_recent {
                target.fallback_min_recent = value;
            }
            if let Some(value) = orchestrator.indecision_min_replies {
                target.indecision_min_replies = value;
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
            if let Some(webhook_secret_value) = server.webhook_secret {
                self.server.webhook_secret = Some(secret_value(webhook_secret_value));
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
        if let Some(value) = read_env("RELAYDESK_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("RELAYDESK_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections =
                parse_u32("RELAYDESK_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("RELAYDESK_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("RELAYDESK_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("RELAYDESK_TRANSPORT_API_URL") {
            self.transport.api_url = value;
        }
        if let Some(value) = read_env("RELAYDESK_TRANSPORT_API_KEY") {
            self.transport.api_key = secret_value(value);
        }
        if let Some(value) = read_env("RELAYDESK_TRANSPORT_TIMEOUT_SECS") {
            self.transport.timeout_secs = parse_u64("RELAYDESK_TRANSPORT_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("RELAYDESK_TRANSPORT_RESTART_MAX_RETRIES") {
            self.transport.restart_max_retries =
                parse_u32("RELAYDESK_TRANSPORT_RESTART_MAX_RETRIES", &value)?;
        }
        if let Some(value) = read_env("RELAYDESK_TRANSPORT_RESTART_BASE_DELAY_MS") {
            self.transport.restart_base_delay_ms =
                parse_u64("RELAYDESK_TRANSPORT_RESTART_BASE_DELAY_MS", &value)?;
        }
        if let Some(value) = read_env("RELAYDESK_TRANSPORT_RESTART_MAX_DELAY_MS") {
            self.transport.restart_max_delay_ms =
                parse_u64("RELAYDESK_TRANSPORT_RESTART_MAX_DELAY_MS", &value)?;
        }

        if let Some(value) = read_env("RELAYDESK_LLM_PROVIDER") {
            self.llm.provider = value.parse()?;
        }
        if let Some(value) = read_env("RELAYDESK_LLM_API_KEY") {
            self.llm.api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("RELAYDESK_LLM_BASE_URL") {
            self.llm.base_url = Some(value);
        }
        if let Some(value) = read_env("RELAYDESK_LLM_MODEL") {
            self.llm.model = value;
        }
        if let Some(value) = read_env("RELAYDESK_LLM_TIMEOUT_SECS") {
            self.llm.timeout_secs = parse_u64("RELAYDESK_LLM_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("RELAYDESK_LLM_MAX_RETRIES") {
            self.llm.max_retries = parse_u32("RELAYDESK_LLM_MAX_RETRIES", &value)?;
        }

        if let Some(value) = read_env("RELAYDESK_MEDIA_TRANSCRIPTION_BASE_URL") {
            self.media.transcription_base_url = Some(value);
        }
        if let Some(value) = read_env("RELAYDESK_MEDIA_TRANSCRIPTION_MODEL") {
            self.media.transcription_model = value;
        }
        if let Some(value) = read_env("RELAYDESK_MEDIA_LANGUAGE") {
            self.media.language = value;
        }

        if let Some(value) = read_env("RELAYDESK_BILLING_TIMEOUT_SECS") {
            self.billing.timeout_secs = parse_u64("RELAYDESK_BILLING_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("RELAYDESK_ORCHESTRATOR_CALL_TIMEOUT_SECS") {
            self.orchestrator.call_timeout_secs =
                parse_u64("RELAYDESK_ORCHESTRATOR_CALL_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("RELAYDESK_ORCHESTRATOR_HISTORY_TURNS") {
            self.orchestrator.history_turns =
                parse_u32("RELAYDESK_ORCHESTRATOR_HISTORY_TURNS", &value)? as usize;
        }
        if let Some(value) = read_env("RELAYDESK_ORCHESTRATOR_PAGE_SIZE") {
            self.orchestrator.page_size =
                parse_u32("RELAYDESK_ORCHESTRATOR_PAGE_SIZE", &value)? as usize;
        }
        if let Some(value) = read_env("RELAYDESK_ORCHESTRATOR_MIN_AUTOMATED_REPLIES") {
            self.orchestrator.min_automated_replies =
                parse_u32("RELAYDESK_ORCHESTRATOR_MIN_AUTOMATED_REPLIES", &value)?;
        }
        if let Some(value) = read_env("RELAYDESK_ORCHESTRATOR_RECENT_WINDOW_MINUTES") {
            self.orchestrator.recent_window_minutes =
                parse_u32("RELAYDESK_ORCHESTRATOR_RECENT_WINDOW_MINUTES", &value)? as i64;
        }

        if let Some(value) = read_env("RELAYDESK_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("RELAYDESK_SERVER_PORT") {
            self.server.port = parse_u16("RELAYDESK_SERVER_PORT", &value)?;
        }
        if let Some(value) = read_env("RELAYDESK_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_u64("RELAYDESK_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }
        if let Some(value) = read_env("RELAYDESK_SERVER_WEBHOOK_SECRET") {
            self.server.webhook_secret = Some(secret_value(value));
        }

        let log_level =
            read_env("RELAYDESK_LOGGING_LEVEL").or_else(|| read_env("RELAYDESK_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("RELAYDESK_LOGGING_FORMAT").or_else(|| read_env("RELAYDESK_LOG_FORMAT"));
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
        if let Some(llm_provider) = overrides.llm_provider {
            self.llm.provider = llm_provider;
        }
        if let Some(llm_model) = overrides.llm_model {
            self.llm.model = llm_model;
        }
        if let Some(transport_api_url) = overrides.transport_api_url {
            self.transport.api_url = transport_api_url;
        }
        if let Some(transport_api_key) = overrides.transport_api_key {
            self.transport.api_key = secret_value(transport_api_key);
        }
        if let Some(server_port) = overrides.server_port {
            self.server.port = server_port;
        }
        if let Some(webhook_secret) = overrides.webhook_secret {
            self.server.webhook_secret = Some(secret_value(webhook_secret));
        }
        if let Some(call_timeout_secs) = overrides.call_timeout_secs {
            self.orchestrator.call_timeout_secs = call_timeout_secs;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_transport(&self.transport)?;
        validate_llm(&self.llm)?;
        validate_media(&self.media)?;
        validate_timeout("billing.timeout_secs", self.billing.timeout_secs)?;
        validate_orchestrator(&self.orchestrator)?;
        validate_server(&self.server)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("relaydesk.toml"), PathBuf::from("config/relaydesk.toml")]
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

    validate_timeout("database.timeout_secs", database.timeout_secs)
}

fn validate_transport(transport: &TransportConfig) -> Result<(), ConfigError> {
    if !is_http_url(&transport.api_url) {
        return Err(ConfigError::Validation(
            "transport.api_url must start with http:// or https://".to_string(),
        ));
    }

    if transport.api_key.expose_secret().trim().is_empty() {
        return Err(ConfigError::Validation(
            "transport.api_key is required. Use the global API key configured on the chat gateway"
                .to_string(),
        ));
    }

    validate_timeout("transport.timeout_secs", transport.timeout_secs)?;

    if transport.restart_base_delay_ms > transport.restart_max_delay_ms {
        return Err(ConfigError::Validation(
            "transport.restart_base_delay_ms must not exceed transport.restart_max_delay_ms"
                .to_string(),
        ));
    }

    Ok(())
}

fn validate_llm(llm: &LlmConfig) -> Result<(), ConfigError> {
    validate_timeout("llm.timeout_secs", llm.timeout_secs)?;

    match llm.provider {
        LlmProvider::OpenAi | LlmProvider::Anthropic => {
            let missing = llm
                .api_key
                .as_ref()
                .map(|value| value.expose_secret().trim().is_empty())
                .unwrap_or(true);
            if missing {
                return Err(ConfigError::Validation(
                    "llm.api_key is required for openai/anthropic providers".to_string(),
                ));
            }
        }
        LlmProvider::Ollama => {
            let missing =
                llm.base_url.as_ref().map(|value| value.trim().is_empty()).unwrap_or(true);
            if missing {
                return Err(ConfigError::Validation(
                    "llm.base_url is required for ollama provider".to_string(),
                ));
            }
        }
    }

    Ok(())
}

fn validate_media(media: &MediaConfig) -> Result<(), ConfigError> {
    if media.transcription_model.trim().is_empty() {
        return Err(ConfigError::Validation(
            "media.transcription_model must not be empty".to_string(),
        ));
    }

    if let Some(base_url) = &media.transcription_base_url {
        if !is_http_url(base_url) {
            return Err(ConfigError::Validation(
                "media.transcription_base_url must start with http:// or https://".to_string(),
            ));
        }
    }

    Ok(())
}

fn validate_orchestrator(orchestrator: &OrchestratorConfig) -> Result<(), ConfigError> {
    validate_timeout("orchestrator.call_timeout_secs", orchestrator.call_timeout_secs)?;

    if orchestrator.history_turns == 0 {
        return Err(ConfigError::Validation(
            "orchestrator.history_turns must be greater than zero".to_string(),
        ));
    }

    if orchestrator.page_size == 0 || orchestrator.page_size > 50 {
        return Err(ConfigError::Validation(
            "orchestrator.page_size must be in range 1..=50".to_string(),
        ));
    }

    if orchestrator.recent_window_minutes <= 0 {
        return Err(ConfigError::Validation(
            "orchestrator.recent_window_minutes must be greater than zero".to_string(),
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

    if let Some(secret) = &server.webhook_secret {
        if secret.expose_secret().trim().is_empty() {
            return Err(ConfigError::Validation(
                "server.webhook_secret must not be blank when set".to_string(),
            ));
        }
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

fn validate_timeout(key: &str, value: u64) -> Result<(), ConfigError> {
    if value == 0 || value > 300 {
        return Err(ConfigError::Validation(format!("{key} must be in range 1..=300")));
    }
    Ok(())
}

fn is_http_url(value: &str) -> bool {
    let value = value.trim();
    value.starts_with("http://") || value.starts_with("https://")
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
    transport: Option<TransportPatch>,
    llm: Option<LlmPatch>,
    media: Option<MediaPatch>,
    billing: Option<BillingPatch>,
    orchestrator: Option<OrchestratorPatch>,
    server: Option<ServerPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct TransportPatch {
    api_url: Option<String>,
    api_key: Option<String>,
    timeout_secs: Option<u64>,
    restart_max_retries: Option<u32>,
    restart_base_delay_ms: Option<u64>,
    restart_max_delay_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LlmPatch {
    provider: Option<LlmProvider>,
    api_key: Option<String>,
    base_url: Option<String>,
    model: Option<String>,
    timeout_secs: Option<u64>,
    max_retries: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct MediaPatch {
    transcription_base_url: Option<String>,
    transcription_model: Option<String>,
    language: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct BillingPatch {
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct OrchestratorPatch {
    call_timeout_secs: Option<u64>,
    history_turns: Option<usize>,
    page_size: Option<usize>,
    min_automated_replies: Option<u32>,
    recent_window_minutes: Option<i64>,
    loose_transfer_min_recent: Option<u32>,
    fallback_min_recent: Option<u32>,
    indecision_min_replies: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
    webhook_secret: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}
