use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dealdesk_core::DealDelimiter;
use thiserror::Error;
use tracing::debug;

use crate::{
    blocks::MessageTemplate,
    commands::{parse_command, CommandParseError, CommandRouter},
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChatEnvelope {
    pub update_id: i64,
    pub event: ChatEvent,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChatEvent {
    Command(MessageEvent),
    Message(MessageEvent),
    Unsupported { event_type: String },
}

impl ChatEvent {
    pub fn event_type(&self) -> ChatEventType {
        match self {
            Self::Command(_) => ChatEventType::Command,
            Self::Message(_) => ChatEventType::Message,
            Self::Unsupported { .. } => ChatEventType::Unsupported,
        }
    }

    pub fn chat_id(&self) -> Option<i64> {
        match self {
            Self::Command(event) | Self::Message(event) => Some(event.chat_id),
            Self::Unsupported { .. } => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ChatEventType {
    Command,
    Message,
    Unsupported,
}

/// A text message posted to the bot.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MessageEvent {
    pub chat_id: i64,
    pub message_id: i64,
    pub sender: Option<String>,
    pub text: String,
    pub sent_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EventContext {
    pub correlation_id: String,
    pub received_at: DateTime<Utc>,
}

impl Default for EventContext {
    fn default() -> Self {
        Self { correlation_id: "unknown-correlation-id".to_owned(), received_at: Utc::now() }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HandlerResult {
    Responded(MessageTemplate),
    Processed,
    Ignored,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EventHandlerError {
    #[error(transparent)]
    Parse(#[from] CommandParseError),
    #[error("deal submission handler failure: {0}")]
    Submission(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DispatchError {
    #[error(transparent)]
    Handler(#[from] EventHandlerError),
}

#[async_trait]
pub trait EventHandler: Send + Sync {
    fn event_type(&self) -> ChatEventType;
    async fn handle(
        &self,
        envelope: &ChatEnvelope,
        ctx: &EventContext,
    ) -> Result<HandlerResult, EventHandlerError>;
}

#[derive(Default)]
pub struct EventDispatcher {
    handlers: HashMap<ChatEventType, Arc<dyn EventHandler>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<H>(&mut self, handler: H)
    where
        H: EventHandler + 'static,
    {
        self.handlers.insert(handler.event_type(), Arc::new(handler));
    }

    pub async fn dispatch(
        &self,
        envelope: &ChatEnvelope,
        ctx: &EventContext,
    ) -> Result<HandlerResult, DispatchError> {
        let Some(handler) = self.handlers.get(&envelope.event.event_type()) else {
            return Ok(HandlerResult::Ignored);
        };

        handler.handle(envelope, ctx).await.map_err(DispatchError::from)
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }
}

/// Dispatcher wired for deal intake: bot commands plus free-text deal
/// submissions handled by `service`.
pub fn deal_dispatcher<S>(service: S, delimiter: DealDelimiter) -> EventDispatcher
where
    S: DealMessageService + 'static,
{
    let mut dispatcher = EventDispatcher::new();
    dispatcher.register(CommandHandler::new(delimiter));
    dispatcher.register(DealMessageHandler::new(service));
    dispatcher
}

pub struct CommandHandler {
    router: CommandRouter,
}

impl CommandHandler {
    pub fn new(delimiter: DealDelimiter) -> Self {
        Self { router: CommandRouter::new(delimiter) }
    }
}

#[async_trait]
impl EventHandler for CommandHandler {
    fn event_type(&self) -> ChatEventType {
        ChatEventType::Command
    }

    async fn handle(
        &self,
        envelope: &ChatEnvelope,
        ctx: &EventContext,
    ) -> Result<HandlerResult, EventHandlerError> {
        let ChatEvent::Command(event) = &envelope.event else {
            return Ok(HandlerResult::Ignored);
        };

        let command = parse_command(&event.text)?;
        debug!(
            event_name = "chat.command.received",
            correlation_id = %ctx.correlation_id,
            chat_id = event.chat_id,
            command = %command.command,
            addressed_to = command.addressed_to.as_deref().unwrap_or("any"),
        );
        Ok(HandlerResult::Responded(self.router.route(&command)))
    }
}

#[async_trait]
pub trait DealMessageService: Send + Sync {
    /// Runs a free-text submission; `None` means nothing should be sent back.
    async fn handle_deal_message(
        &self,
        event: &MessageEvent,
        ctx: &EventContext,
    ) -> Result<Option<MessageTemplate>, EventHandlerError>;
}

pub struct DealMessageHandler<S> {
    service: S,
}

impl<S> DealMessageHandler<S>
where
    S: DealMessageService,
{
    pub fn new(service: S) -> Self {
        Self { service }
    }
}

#[async_trait]
impl<S> EventHandler for DealMessageHandler<S>
where
    S: DealMessageService + 'static,
{
    fn event_type(&self) -> ChatEventType {
        ChatEventType::Message
    }

    async fn handle(
        &self,
        envelope: &ChatEnvelope,
        ctx: &EventContext,
    ) -> Result<HandlerResult, EventHandlerError> {
        let ChatEvent::Message(event) = &envelope.event else {
            return Ok(HandlerResult::Ignored);
        };

        let message = self.service.handle_deal_message(event, ctx).await?;
        Ok(match message {
            Some(message) => HandlerResult::Responded(message),
            None => HandlerResult::Processed,
        })
    }
}
