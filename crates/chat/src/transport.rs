use std::{sync::Arc, time::Duration};

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::blocks::MessageTemplate;
use crate::events::{ChatEnvelope, EventContext, EventDispatcher, HandlerResult};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("transport failed to connect: {0}")]
    Connect(String),
    #[error("transport read failed: {0}")]
    Receive(String),
    #[error("transport ack failed: {0}")]
    Acknowledge(String),
    #[error("transport send failed: {0}")]
    Send(String),
    #[error("transport disconnect failed: {0}")]
    Disconnect(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self { max_retries: 5, base_delay_ms: 250, max_delay_ms: 5_000 }
    }
}

impl ReconnectPolicy {
    fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(16);
        let multiplier = 1_u64 << exponent;
        let delay_ms = self.base_delay_ms.saturating_mul(multiplier).min(self.max_delay_ms);
        Duration::from_millis(delay_ms)
    }
}

#[async_trait]
pub trait ChatTransport: Send + Sync {
    async fn connect(&self) -> Result<(), TransportError>;
    /// Next update; `None` once the stream is closed.
    async fn next_envelope(&self) -> Result<Option<ChatEnvelope>, TransportError>;
    async fn acknowledge(&self, update_id: i64) -> Result<(), TransportError>;
    async fn send_message(
        &self,
        chat_id: i64,
        message: &MessageTemplate,
    ) -> Result<(), TransportError>;
    async fn disconnect(&self) -> Result<(), TransportError>;
}

struct PumpFailure {
    error: TransportError,
    delivered: usize,
}

/// Pulls updates from a [`ChatTransport`], dispatches them and sends
/// replies back to the originating chat.
pub struct ChatRunner {
    transport: Arc<dyn ChatTransport>,
    dispatcher: EventDispatcher,
    reconnect_policy: ReconnectPolicy,
}

impl ChatRunner {
    pub fn new(
        transport: Arc<dyn ChatTransport>,
        dispatcher: EventDispatcher,
        reconnect_policy: ReconnectPolicy,
    ) -> Self {
        Self { transport, dispatcher, reconnect_policy }
    }

    /// Runs until the transport closes or reconnect attempts are exhausted.
    ///
    /// Exhausted retries are logged and reported as `Ok` so the rest of the
    /// process keeps serving. The retry budget resets once a connection has
    /// delivered updates.
    pub async fn start(&self) -> Result<()> {
        let mut attempt = 0;
        loop {
            let failure = match self.connect_and_pump(attempt).await {
                Ok(()) => return Ok(()),
                Err(failure) => failure,
            };
            if failure.delivered > 0 {
                attempt = 0;
            }

            warn!(
                attempt,
                max_retries = self.reconnect_policy.max_retries,
                error = %failure.error,
                "chat transport failed"
            );

            if attempt >= self.reconnect_policy.max_retries {
                warn!(
                    max_retries = self.reconnect_policy.max_retries,
                    "chat transport retries exhausted; continuing process without crash"
                );
                return Ok(());
            }

            let delay = self.reconnect_policy.backoff(attempt);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            attempt += 1;
        }
    }

    async fn connect_and_pump(&self, attempt: u32) -> Result<(), PumpFailure> {
        let mut delivered = 0;
        let fail = |error: TransportError, delivered: usize| PumpFailure { error, delivered };

        info!(attempt, "opening chat transport connection");
        self.transport.connect().await.map_err(|error| fail(error, delivered))?;
        info!(attempt, "chat transport connected");

        loop {
            let envelope = match self.transport.next_envelope().await {
                Ok(Some(envelope)) => envelope,
                Ok(None) => {
                    info!(attempt, "chat transport stream closed");
                    return self
                        .transport
                        .disconnect()
                        .await
                        .map_err(|error| fail(error, delivered));
                }
                Err(error) => return Err(fail(error, delivered)),
            };
            delivered += 1;

            let correlation_id = format!("update-{}", envelope.update_id);
            let chat_id = envelope.event.chat_id();
            info!(
                event_name = "ingress.chat.update_received",
                update_id = envelope.update_id,
                event_type = ?envelope.event.event_type(),
                correlation_id = %correlation_id,
                chat_id = chat_id.unwrap_or_default(),
                "received chat update"
            );

            if let Err(error) = self.transport.acknowledge(envelope.update_id).await {
                warn!(
                    event_name = "ingress.chat.ack_sent",
                    update_id = envelope.update_id,
                    correlation_id = %correlation_id,
                    error = %error,
                    "failed to acknowledge chat update"
                );
            } else {
                debug!(
                    event_name = "ingress.chat.ack_sent",
                    update_id = envelope.update_id,
                    correlation_id = %correlation_id,
                    "acknowledged chat update"
                );
            }

            let context =
                EventContext { correlation_id: correlation_id.clone(), received_at: Utc::now() };
            let reply = match self.dispatcher.dispatch(&envelope, &context).await {
                Ok(HandlerResult::Responded(reply)) => reply,
                Ok(HandlerResult::Processed | HandlerResult::Ignored) => continue,
                Err(error) => {
                    warn!(
                        update_id = envelope.update_id,
                        correlation_id = %correlation_id,
                        error = %error,
                        "event dispatch failed; continuing chat loop"
                    );
                    continue;
                }
            };

            let Some(chat_id) = chat_id else {
                continue;
            };
            if let Err(error) = self.transport.send_message(chat_id, &reply).await {
                warn!(
                    event_name = "egress.chat.reply_failed",
                    correlation_id = %correlation_id,
                    chat_id,
                    error = %error,
                    "failed to send chat reply"
                );
            } else {
                debug!(
                    event_name = "egress.chat.reply_sent",
                    correlation_id = %correlation_id,
                    chat_id,
                    "sent chat reply"
                );
            }
        }
    }
}
