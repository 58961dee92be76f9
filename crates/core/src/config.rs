use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use rust_decimal::Decimal;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::intake::{IntakeConfig, DEFAULT_MAX_DEALS, DEFAULT_MAX_MESSAGE_CHARS};
use crate::tokenizer::DealDelimiter;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub chat: ChatConfig,
    pub store: StoreConfig,
    pub intake: IntakeConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct ChatConfig {
    pub bot_token: SecretString,
    pub api_base_url: String,
    pub poll_timeout_secs: u64,
    /// Messages older than this are ignored.
    pub max_message_age_secs: u64,
}

#[derive(Clone, Debug)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    pub api_token: Option<SecretString>,
    pub offers_database_id: Option<String>,
    pub advertisers_database_id: Option<String>,
    pub base_url: String,
    pub api_version: String,
    pub timeout_secs: u64,
    pub min_request_interval_ms: u64,
    pub markups: SellingMarkups,
}

/// Amounts added to buying prices to derive network selling prices.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SellingMarkups {
    pub cpa: Decimal,
    pub crg: Decimal,
    pub cpl: Decimal,
}

impl Default for SellingMarkups {
    fn default() -> Self {
        Self {
            cpa: Decimal::ONE_HUNDRED,
            crg: Decimal::new(1, 2),
            cpl: Decimal::new(5, 0),
        }
    }
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub health_check_port: u16,
    pub graceful_shutdown_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackend {
    Notion,
    Memory,
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
    pub log_level: Option<String>,
    pub chat_bot_token: Option<String>,
    pub store_backend: Option<StoreBackend>,
    pub store_api_token: Option<String>,
    pub strict_unknown_fields: Option<bool>,
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
            chat: ChatConfig {
                bot_token: String::new().into(),
                api_base_url: "https://api.telegram.org".to_string(),
                poll_timeout_secs: 30,
                max_message_age_secs: 30,
            },
            store: StoreConfig {
                backend: StoreBackend::Notion,
                api_token: None,
                offers_database_id: None,
                advertisers_database_id: None,
                base_url: "https://api.notion.com".to_string(),
                api_version: "2022-06-28".to_string(),
                timeout_secs: 30,
                min_request_interval_ms: 500,
                markups: SellingMarkups::default(),
            },
            intake: IntakeConfig::default(),
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                health_check_port: 8080,
                graceful_shutdown_secs: 15,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl FromStr for StoreBackend {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "notion" => Ok(Self::Notion),
            "memory" => Ok(Self::Memory),
            other => Err(ConfigError::Validation(format!(
                "unsupported store backend `{other}` (expected notion|memory)"
            ))),
        }
    }
}

impl FromStr for LogFormat {
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
        let config = Self::load_unvalidated(options)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads only what offline validation needs; chat and store credentials
    /// are neither required nor checked.
    pub fn load_intake(options: LoadOptions) -> Result<IntakeConfig, ConfigError> {
        let config = Self::load_unvalidated(options)?;
        validate_intake(&config.intake)?;
        Ok(config.intake)
    }

    fn load_unvalidated(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("dealdesk.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(chat) = patch.chat {
            if let Some(bot_token_value) = chat.bot_token {
                self.chat.bot_token = secret_value(bot_token_value);
            }
            if let Some(api_base_url) = chat.api_base_url {
                self.chat.api_base_url = api_base_url;
            }
            if let Some(poll_timeout_secs) = chat.poll_timeout_secs {
                self.chat.poll_timeout_secs = poll_timeout_secs;
            }
            if let Some(max_message_age_secs) = chat.max_message_age_secs {
                self.chat.max_message_age_secs = max_message_age_secs;
            }
        }

        if let Some(store) = patch.store {
            if let Some(backend) = store.backend {
                self.store.backend = backend;
            }
            if let Some(api_token_value) = store.api_token {
                self.store.api_token = Some(secret_value(api_token_value));
            }
            if let Some(offers_database_id) = store.offers_database_id {
                self.store.offers_database_id = Some(offers_database_id);
            }
            if let Some(advertisers_database_id) = store.advertisers_database_id {
                self.store.advertisers_database_id = Some(advertisers_database_id);
            }
            if let Some(base_url) = store.base_url {
                self.store.base_url = base_url;
            }
            if let Some(api_version) = store.api_version {
                self.store.api_version = api_version;
            }
            if let Some(timeout_secs) = store.timeout_secs {
                self.store.timeout_secs = timeout_secs;
            }
            if let Some(min_request_interval_ms) = store.min_request_interval_ms {
                self.store.min_request_interval_ms = min_request_interval_ms;
            }
            if let Some(cpa_markup) = store.cpa_markup {
                self.store.markups.cpa = cpa_markup;
            }
            if let Some(crg_markup) = store.crg_markup {
                self.store.markups.crg = crg_markup;
            }
            if let Some(cpl_markup) = store.cpl_markup {
                self.store.markups.cpl = cpl_markup;
            }
        }

        if let Some(intake) = patch.intake {
            if let Some(deal_delimiter) = intake.deal_delimiter {
                self.intake.deal_delimiter = deal_delimiter;
            }
            if let Some(strict_unknown_fields) = intake.strict_unknown_fields {
                self.intake.strict_unknown_fields = strict_unknown_fields;
            }
            if let Some(max_message_chars) = intake.max_message_chars {
                self.intake.max_message_chars = max_message_chars;
            }
            if let Some(max_deals) = intake.max_deals {
                self.intake.max_deals = max_deals;
            }
            if let Some(field_synonyms) = intake.field_synonyms {
                self.intake.field_synonyms.extend(field_synonyms);
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(health_check_port) = server.health_check_port {
                self.server.health_check_port = health_check_port;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
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
        if let Some(value) = read_env("DEALDESK_CHAT_BOT_TOKEN") {
            self.chat.bot_token = secret_value(value);
        }
        if let Some(value) = read_env("DEALDESK_CHAT_API_BASE_URL") {
            self.chat.api_base_url = value;
        }
        if let Some(value) = read_env("DEALDESK_CHAT_POLL_TIMEOUT_SECS") {
            self.chat.poll_timeout_secs = parse_u64("DEALDESK_CHAT_POLL_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("DEALDESK_CHAT_MAX_MESSAGE_AGE_SECS") {
            self.chat.max_message_age_secs =
                parse_u64("DEALDESK_CHAT_MAX_MESSAGE_AGE_SECS", &value)?;
        }

        if let Some(value) = read_env("DEALDESK_STORE_BACKEND") {
            self.store.backend = value.parse()?;
        }
        if let Some(value) = read_env("DEALDESK_STORE_API_TOKEN") {
            self.store.api_token = Some(secret_value(value));
        }
        if let Some(value) = read_env("DEALDESK_STORE_OFFERS_DATABASE_ID") {
            self.store.offers_database_id = Some(value);
        }
        if let Some(value) = read_env("DEALDESK_STORE_ADVERTISERS_DATABASE_ID") {
            self.store.advertisers_database_id = Some(value);
        }
        if let Some(value) = read_env("DEALDESK_STORE_BASE_URL") {
            self.store.base_url = value;
        }
        if let Some(value) = read_env("DEALDESK_STORE_TIMEOUT_SECS") {
            self.store.timeout_secs = parse_u64("DEALDESK_STORE_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("DEALDESK_STORE_MIN_REQUEST_INTERVAL_MS") {
            self.store.min_request_interval_ms =
                parse_u64("DEALDESK_STORE_MIN_REQUEST_INTERVAL_MS", &value)?;
        }
        if let Some(value) = read_env("DEALDESK_STORE_CPA_MARKUP") {
            self.store.markups.cpa = parse_decimal("DEALDESK_STORE_CPA_MARKUP", &value)?;
        }
        if let Some(value) = read_env("DEALDESK_STORE_CRG_MARKUP") {
            self.store.markups.crg = parse_decimal("DEALDESK_STORE_CRG_MARKUP", &value)?;
        }
        if let Some(value) = read_env("DEALDESK_STORE_CPL_MARKUP") {
            self.store.markups.cpl = parse_decimal("DEALDESK_STORE_CPL_MARKUP", &value)?;
        }

        if let Some(value) = read_env("DEALDESK_INTAKE_DEAL_DELIMITER") {
            self.intake.deal_delimiter = DealDelimiter::from(value);
        }
        if let Some(value) = read_env("DEALDESK_INTAKE_STRICT_UNKNOWN_FIELDS") {
            self.intake.strict_unknown_fields =
                parse_bool("DEALDESK_INTAKE_STRICT_UNKNOWN_FIELDS", &value)?;
        }
        if let Some(value) = read_env("DEALDESK_INTAKE_MAX_MESSAGE_CHARS") {
            self.intake.max_message_chars =
                parse_usize("DEALDESK_INTAKE_MAX_MESSAGE_CHARS", &value)?;
        }
        if let Some(value) = read_env("DEALDESK_INTAKE_MAX_DEALS") {
            self.intake.max_deals = parse_usize("DEALDESK_INTAKE_MAX_DEALS", &value)?;
        }

        if let Some(value) = read_env("DEALDESK_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("DEALDESK_SERVER_HEALTH_CHECK_PORT") {
            self.server.health_check_port =
                parse_u16("DEALDESK_SERVER_HEALTH_CHECK_PORT", &value)?;
        }
        if let Some(value) = read_env("DEALDESK_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_u64("DEALDESK_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        let log_level =
            read_env("DEALDESK_LOGGING_LEVEL").or_else(|| read_env("DEALDESK_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("DEALDESK_LOGGING_FORMAT").or_else(|| read_env("DEALDESK_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(chat_bot_token) = overrides.chat_bot_token {
            self.chat.bot_token = secret_value(chat_bot_token);
        }
        if let Some(store_backend) = overrides.store_backend {
            self.store.backend = store_backend;
        }
        if let Some(store_api_token) = overrides.store_api_token {
            self.store.api_token = Some(secret_value(store_api_token));
        }
        if let Some(strict_unknown_fields) = overrides.strict_unknown_fields {
            self.intake.strict_unknown_fields = strict_unknown_fields;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_chat(&self.chat)?;
        validate_store(&self.store)?;
        validate_intake(&self.intake)?;
        validate_server(&self.server)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("dealdesk.toml"), PathBuf::from("config/dealdesk.toml")]
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

fn validate_chat(chat: &ChatConfig) -> Result<(), ConfigError> {
    let bot_token = chat.bot_token.expose_secret();
    if bot_token.is_empty() {
        return Err(ConfigError::Validation(
            "chat.bot_token is required. Create a bot with @BotFather and copy the token it issues"
                .to_string(),
        ));
    }
    let well_formed = bot_token
        .split_once(':')
        .map(|(id, secret)| {
            !id.is_empty() && id.chars().all(|ch| ch.is_ascii_digit()) && !secret.is_empty()
        })
        .unwrap_or(false);
    if !well_formed {
        return Err(ConfigError::Validation(
            "chat.bot_token must look like `<bot id>:<secret>` as issued by @BotFather".to_string(),
        ));
    }

    if !is_http_url(&chat.api_base_url) {
        return Err(ConfigError::Validation(
            "chat.api_base_url must start with http:// or https://".to_string(),
        ));
    }

    if chat.poll_timeout_secs == 0 || chat.poll_timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "chat.poll_timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_store(store: &StoreConfig) -> Result<(), ConfigError> {
    if store.timeout_secs == 0 || store.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "store.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    let markups = [store.markups.cpa, store.markups.crg, store.markups.cpl];
    if markups.iter().any(|markup| markup.is_sign_negative()) {
        return Err(ConfigError::Validation(
            "store markups (cpa_markup, crg_markup, cpl_markup) must not be negative".to_string(),
        ));
    }

    match store.backend {
        StoreBackend::Notion => {
            let missing_token = store
                .api_token
                .as_ref()
                .map(|value| value.expose_secret().trim().is_empty())
                .unwrap_or(true);
            if missing_token {
                return Err(ConfigError::Validation(
                    "store.api_token is required for the notion backend. Create an internal integration at https://www.notion.so/my-integrations".to_string(),
                ));
            }
            let has_id = |id: &Option<String>| id.as_ref().is_some_and(|id| !id.trim().is_empty());
            if !has_id(&store.offers_database_id) {
                return Err(ConfigError::Validation(
                    "store.offers_database_id is required for the notion backend".to_string(),
                ));
            }
            if !has_id(&store.advertisers_database_id) {
                return Err(ConfigError::Validation(
                    "store.advertisers_database_id is required for the notion backend".to_string(),
                ));
            }
            if !is_http_url(&store.base_url) {
                return Err(ConfigError::Validation(
                    "store.base_url must start with http:// or https://".to_string(),
                ));
            }
        }
        StoreBackend::Memory => {}
    }

    Ok(())
}

fn validate_intake(intake: &IntakeConfig) -> Result<(), ConfigError> {
    if let DealDelimiter::Separator(token) = &intake.deal_delimiter {
        if token.trim().is_empty() {
            return Err(ConfigError::Validation(
                "intake.deal_delimiter must be `blank_line` or a non-empty separator token"
                    .to_string(),
            ));
        }
    }

    if intake.max_message_chars == 0 || intake.max_deals == 0 {
        return Err(ConfigError::Validation(format!(
            "intake.max_message_chars and intake.max_deals must be greater than zero (defaults: {DEFAULT_MAX_MESSAGE_CHARS} and {DEFAULT_MAX_DEALS})"
        )));
    }

    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.health_check_port == 0 {
        return Err(ConfigError::Validation(
            "server.health_check_port must be greater than zero".to_string(),
        ));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
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

fn is_http_url(value: &str) -> bool {
    value.starts_with("http://") || value.starts_with("https://")
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn invalid_override(key: &str, value: &str) -> ConfigError {
    ConfigError::InvalidEnvOverride { key: key.to_string(), value: value.to_string() }
}

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.parse::<u16>().map_err(|_| invalid_override(key, value))
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| invalid_override(key, value))
}

fn parse_usize(key: &str, value: &str) -> Result<usize, ConfigError> {
    value.parse::<usize>().map_err(|_| invalid_override(key, value))
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    value.parse::<bool>().map_err(|_| invalid_override(key, value))
}

fn parse_decimal(key: &str, value: &str) -> Result<Decimal, ConfigError> {
    Decimal::from_str(value.trim()).map_err(|_| invalid_override(key, value))
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    chat: Option<ChatPatch>,
    store: Option<StorePatch>,
    intake: Option<IntakePatch>,
    server: Option<ServerPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct ChatPatch {
    bot_token: Option<String>,
    api_base_url: Option<String>,
    poll_timeout_secs: Option<u64>,
    max_message_age_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct StorePatch {
    backend: Option<StoreBackend>,
    api_token: Option<String>,
    offers_database_id: Option<String>,
    advertisers_database_id: Option<String>,
    base_url: Option<String>,
    api_version: Option<String>,
    timeout_secs: Option<u64>,
    min_request_interval_ms: Option<u64>,
    cpa_markup: Option<Decimal>,
    crg_markup: Option<Decimal>,
    cpl_markup: Option<Decimal>,
}

#[derive(Debug, Default, Deserialize)]
struct IntakePatch {
    deal_delimiter: Option<DealDelimiter>,
    strict_unknown_fields: Option<bool>,
    max_message_chars: Option<usize>,
    max_deals: Option<usize>,
    field_synonyms: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    health_check_port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}
