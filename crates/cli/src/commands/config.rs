use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use dealdesk_core::config::{AppConfig, LoadOptions};
use secrecy::ExposeSecret;
use toml::Value;

struct Entry {
    key: &'static str,
    env_key: &'static str,
    value: String,
}

fn entry(key: &'static str, env_key: &'static str, value: impl Into<String>) -> Entry {
    Entry { key, env_key, value: value.into() }
}

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let store_token = config
        .store
        .api_token
        .as_ref()
        .map_or_else(|| "<unset>".to_string(), |token| redact_token(token.expose_secret()));
    let synonyms = if config.intake.field_synonyms.is_empty() {
        "<none>".to_string()
    } else {
        config
            .intake
            .field_synonyms
            .iter()
            .map(|(alias, field)| format!("{alias}->{field}"))
            .collect::<Vec<_>>()
            .join(", ")
    };

    let entries = [
        entry("chat.bot_token", "DEALDESK_CHAT_BOT_TOKEN", redact_token(config.chat.bot_token.expose_secret())),
        entry("chat.api_base_url", "DEALDESK_CHAT_API_BASE_URL", config.chat.api_base_url.as_str()),
        entry(
            "chat.poll_timeout_secs",
            "DEALDESK_CHAT_POLL_TIMEOUT_SECS",
            config.chat.poll_timeout_secs.to_string(),
        ),
        entry(
            "chat.max_message_age_secs",
            "DEALDESK_CHAT_MAX_MESSAGE_AGE_SECS",
            config.chat.max_message_age_secs.to_string(),
        ),
        entry("store.backend", "DEALDESK_STORE_BACKEND", format!("{:?}", config.store.backend)),
        entry("store.api_token", "DEALDESK_STORE_API_TOKEN", store_token),
        entry(
            "store.offers_database_id",
            "DEALDESK_STORE_OFFERS_DATABASE_ID",
            config.store.offers_database_id.as_deref().unwrap_or("<unset>"),
        ),
        entry(
            "store.advertisers_database_id",
            "DEALDESK_STORE_ADVERTISERS_DATABASE_ID",
            config.store.advertisers_database_id.as_deref().unwrap_or("<unset>"),
        ),
        entry("store.base_url", "DEALDESK_STORE_BASE_URL", config.store.base_url.as_str()),
        entry("store.api_version", "", config.store.api_version.as_str()),
        entry("store.timeout_secs", "DEALDESK_STORE_TIMEOUT_SECS", config.store.timeout_secs.to_string()),
        entry(
            "store.min_request_interval_ms",
            "DEALDESK_STORE_MIN_REQUEST_INTERVAL_MS",
            config.store.min_request_interval_ms.to_string(),
        ),
        entry("store.cpa_markup", "DEALDESK_STORE_CPA_MARKUP", config.store.markups.cpa.to_string()),
        entry("store.crg_markup", "DEALDESK_STORE_CRG_MARKUP", config.store.markups.crg.to_string()),
        entry("store.cpl_markup", "DEALDESK_STORE_CPL_MARKUP", config.store.markups.cpl.to_string()),
        entry(
            "intake.deal_delimiter",
            "DEALDESK_INTAKE_DEAL_DELIMITER",
            config.intake.deal_delimiter.to_string(),
        ),
        entry(
            "intake.strict_unknown_fields",
            "DEALDESK_INTAKE_STRICT_UNKNOWN_FIELDS",
            config.intake.strict_unknown_fields.to_string(),
        ),
        entry(
            "intake.max_message_chars",
            "DEALDESK_INTAKE_MAX_MESSAGE_CHARS",
            config.intake.max_message_chars.to_string(),
        ),
        entry("intake.max_deals", "DEALDESK_INTAKE_MAX_DEALS", config.intake.max_deals.to_string()),
        entry("intake.field_synonyms", "", synonyms),
        entry("server.bind_address", "DEALDESK_SERVER_BIND_ADDRESS", config.server.bind_address.as_str()),
        entry(
            "server.health_check_port",
            "DEALDESK_SERVER_HEALTH_CHECK_PORT",
            config.server.health_check_port.to_string(),
        ),
        entry(
            "server.graceful_shutdown_secs",
            "DEALDESK_SERVER_GRACEFUL_SHUTDOWN_SECS",
            config.server.graceful_shutdown_secs.to_string(),
        ),
        entry("logging.level", "DEALDESK_LOGGING_LEVEL", config.logging.level.as_str()),
        entry("logging.format", "DEALDESK_LOGGING_FORMAT", format!("{:?}", config.logging.format)),
    ];

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    lines.extend(entries.iter().map(|entry| {
        let source = field_source(
            entry.key,
            (!entry.env_key.is_empty()).then_some(entry.env_key),
            config_file_doc.as_ref(),
            config_file_path.as_deref(),
        );
        render_line(entry.key, &entry.value, source)
    }));

    lines.join("\n")
}

fn detect_config_path() -> Option<PathBuf> {
    [PathBuf::from("dealdesk.toml"), PathBuf::from("config/dealdesk.toml")]
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

/// Keeps the bot id of a Telegram token or the prefix of a Notion token.
fn redact_token(token: &str) -> String {
    let trimmed = token.trim();
    if trimmed.is_empty() {
        return "<empty>".to_string();
    }

    if let Some((prefix, _)) = trimmed.split_once(':').or_else(|| trimmed.split_once('_')) {
        return format!("{prefix}:***");
    }

    "<redacted>".to_string()
}
