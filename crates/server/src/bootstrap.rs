use std::sync::Arc;

use dealdesk_chat::{
    deal_dispatcher, ChatRunner, DealSubmissionService, ReconnectPolicy, TelegramTransport,
    TransportError,
};
use dealdesk_core::config::{AppConfig, ConfigError, LoadOptions};
use dealdesk_core::{DealIntake, IntakeError};
use dealdesk_store::{build_store, DealStore, StoreError};
use thiserror::Error;
use tracing::info;

pub struct Application {
    pub config: AppConfig,
    pub intake: Arc<DealIntake>,
    pub store: Arc<dyn DealStore>,
    pub chat_runner: ChatRunner,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("deal intake could not be built: {0}")]
    Intake(#[from] IntakeError),
    #[error("deal store could not be built: {0}")]
    Store(#[from] StoreError),
    #[error("chat transport could not be built: {0}")]
    Transport(#[from] TransportError),
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );

    let intake = Arc::new(DealIntake::new(config.intake.clone())?);
    let store = build_store(&config.store)?;
    info!(
        event_name = "system.bootstrap.store_ready",
        correlation_id = "bootstrap",
        backend = store.backend(),
        "deal store initialized"
    );

    let transport = Arc::new(TelegramTransport::from_config(&config.chat)?);
    let service = DealSubmissionService::new(
        intake.clone(),
        store.clone(),
        config.chat.max_message_age_secs,
    );
    let dispatcher = deal_dispatcher(service, config.intake.deal_delimiter.clone());
    let chat_runner = ChatRunner::new(transport, dispatcher, ReconnectPolicy::default());

    Ok(Application { config, intake, store, chat_runner })
}

#[cfg(test)]
mod tests {
    use dealdesk_core::config::{ConfigOverrides, LoadOptions, StoreBackend};

    use crate::bootstrap::bootstrap;

    #[tokio::test]
    async fn bootstrap_fails_fast_on_malformed_bot_token() {
        let result = bootstrap(LoadOptions {
            overrides: ConfigOverrides {
                chat_bot_token: Some("not-a-token".to_owned()),
                store_backend: Some(StoreBackend::Memory),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        })
        .await;

        let message = result.err().map(|error| error.to_string()).unwrap_or_default();
        assert!(message.contains("chat.bot_token"), "unexpected error: {message}");
    }

    #[tokio::test]
    async fn bootstrap_wires_memory_store_and_shared_intake() {
        let app = bootstrap(LoadOptions {
            overrides: ConfigOverrides {
                chat_bot_token: Some("123456:test-token".to_owned()),
                store_backend: Some(StoreBackend::Memory),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        })
        .await
        .expect("bootstrap should succeed with valid overrides");

        assert_eq!(app.store.backend(), "memory");
        assert!(app.store.health().await.is_ok());

        let report = app.intake.process("Partner: A\nGEO: US").expect("report");
        assert_eq!(report.invalid_count, 1);
    }
}
