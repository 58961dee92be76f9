//! Telegram Bot API transport over long polling.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dealdesk_core::config::ChatConfig;
use reqwest::Client;
use secrecy::ExposeSecret;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::blocks::{MessageTemplate, MAX_MESSAGE_CHARS};
use crate::events::{ChatEnvelope, ChatEvent, MessageEvent};
use crate::transport::{ChatTransport, TransportError};

const POLL_GRACE: Duration = Duration::from_secs(10);

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BotUser {
    username: Option<String>,
}

struct PollState {
    offset: Option<i64>,
    pending: VecDeque<ChatEnvelope>,
}

pub struct TelegramTransport {
    client: Client,
    endpoint: String,
    poll_timeout_secs: u64,
    state: Mutex<PollState>,
}

impl TelegramTransport {
    pub fn from_config(config: &ChatConfig) -> Result<Self, TransportError> {
        Self::new(&config.api_base_url, config.bot_token.expose_secret(), config.poll_timeout_secs)
    }

    pub fn new(
        api_base_url: &str,
        bot_token: &str,
        poll_timeout_secs: u64,
    ) -> Result<Self, TransportError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(poll_timeout_secs) + POLL_GRACE)
            .build()
            .map_err(|error| TransportError::Connect(error.to_string()))?;
        Ok(Self {
            client,
            endpoint: format!("{}/bot{bot_token}", api_base_url.trim_end_matches('/')),
            poll_timeout_secs,
            state: Mutex::new(PollState { offset: None, pending: VecDeque::new() }),
        })
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, body: &Value) -> Result<T, String> {
        let response = self
            .client
            .post(format!("{}/{method}", self.endpoint))
            .json(body)
            .send()
            .await
            // reqwest errors embed the request URL, which carries the token.
            .map_err(|error| error.without_url().to_string())?;
        let status = response.status();
        let payload: ApiResponse<T> =
            response.json().await.map_err(|error| error.without_url().to_string())?;

        match payload {
            ApiResponse { ok: true, result: Some(result), .. } => Ok(result),
            ApiResponse { description, .. } => Err(format!(
                "{method} failed with HTTP {}: {}",
                status.as_u16(),
                description.unwrap_or_else(|| "no description".to_owned())
            )),
        }
    }
}

#[async_trait]
impl ChatTransport for TelegramTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        let bot: BotUser = self.call("getMe", &json!({})).await.map_err(TransportError::Connect)?;
        info!(
            event_name = "chat.telegram.connected",
            bot_username = bot.username.as_deref().unwrap_or("unknown"),
            "telegram bot authenticated"
        );
        Ok(())
    }

    async fn next_envelope(&self) -> Result<Option<ChatEnvelope>, TransportError> {
        let mut state = self.state.lock().await;
        loop {
            if let Some(envelope) = state.pending.pop_front() {
                return Ok(Some(envelope));
            }

            let mut request = json!({
                "timeout": self.poll_timeout_secs,
                "allowed_updates": ["message"],
            });
            if let Some(offset) = state.offset {
                request["offset"] = json!(offset);
            }

            let updates: Vec<Value> =
                self.call("getUpdates", &request).await.map_err(TransportError::Receive)?;
            for update in &updates {
                let Some(update_id) = update["update_id"].as_i64() else {
                    continue;
                };
                let next = update_id + 1;
                state.offset = Some(state.offset.map_or(next, |offset| offset.max(next)));
                if let Some(envelope) = envelope_from_update(update) {
                    state.pending.push_back(envelope);
                }
            }
            debug!(event_name = "chat.telegram.polled", updates = updates.len());
        }
    }

    async fn acknowledge(&self, update_id: i64) -> Result<(), TransportError> {
        // Telegram confirms updates through the offset of the next poll.
        let mut state = self.state.lock().await;
        let next = update_id + 1;
        state.offset = Some(state.offset.map_or(next, |offset| offset.max(next)));
        Ok(())
    }

    async fn send_message(
        &self,
        chat_id: i64,
        message: &MessageTemplate,
    ) -> Result<(), TransportError> {
        for chunk in message.render_chunks(MAX_MESSAGE_CHARS) {
            let body = json!({
                "chat_id": chat_id,
                "text": chunk,
                "parse_mode": "HTML",
                "disable_web_page_preview": true,
            });
            let _: Value = self.call("sendMessage", &body).await.map_err(TransportError::Send)?;
        }
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.state.lock().await.pending.clear();
        Ok(())
    }
}

/// Maps one `getUpdates` entry onto a chat event.
///
/// Returns `None` when the entry has no `update_id`. Anything other than a
/// text message becomes [`ChatEvent::Unsupported`].
pub fn envelope_from_update(update: &Value) -> Option<ChatEnvelope> {
    let update_id = update.get("update_id")?.as_i64()?;
    let event = match update.get("message") {
        Some(message) => message_event(message),
        None => ChatEvent::Unsupported { event_type: update_kind(update) },
    };
    Some(ChatEnvelope { update_id, event })
}

fn message_event(message: &Value) -> ChatEvent {
    let (Some(text), Some(chat_id), Some(message_id)) = (
        message["text"].as_str(),
        message["chat"]["id"].as_i64(),
        message["message_id"].as_i64(),
    ) else {
        return ChatEvent::Unsupported { event_type: "non_text_message".to_owned() };
    };

    let sender = message["from"]["username"]
        .as_str()
        .or_else(|| message["from"]["first_name"].as_str())
        .map(str::to_owned);
    let sent_at = message["date"]
        .as_i64()
        .and_then(|seconds| DateTime::<Utc>::from_timestamp(seconds, 0))
        .unwrap_or_else(Utc::now);

    let event = MessageEvent { chat_id, message_id, sender, text: text.to_owned(), sent_at };
    if text.trim_start().starts_with('/') {
        ChatEvent::Command(event)
    } else {
        ChatEvent::Message(event)
    }
}

fn update_kind(update: &Value) -> String {
    update
        .as_object()
        .and_then(|fields| fields.keys().find(|key| key.as_str() != "update_id").cloned())
        .unwrap_or_else(|| "empty".to_owned())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::extract::{Path, State};
    use axum::routing::post;
    use axum::{Json, Router};
    use serde_json::{json, Value};
    use tokio::net::TcpListener;
    use tokio::sync::Mutex;

    use super::{envelope_from_update, TelegramTransport};
    use crate::blocks::{MessageBuilder, MAX_MESSAGE_CHARS};
    use crate::events::ChatEvent;
    use crate::transport::{ChatTransport, TransportError};

    #[test]
    fn text_messages_become_message_or_command_events() {
        let update = json!({
            "update_id": 501,
            "message": {
                "message_id": 9,
                "date": 1_760_000_000,
                "chat": { "id": -100_42, "type": "group" },
                "from": { "id": 1, "first_name": "Dana", "username": "dana_aff" },
                "text": "Partner: Acme\nGEO: DE"
            }
        });
        let envelope = envelope_from_update(&update).expect("envelope");
        assert_eq!(envelope.update_id, 501);
        let ChatEvent::Message(event) = envelope.event else {
            panic!("expected message event");
        };
        assert_eq!(event.chat_id, -100_42);
        assert_eq!(event.sender.as_deref(), Some("dana_aff"));
        assert_eq!(event.sent_at.timestamp(), 1_760_000_000);

        let command = json!({
            "update_id": 502,
            "message": { "message_id": 10, "date": 1, "chat": { "id": 5 }, "text": "/help" }
        });
        assert!(matches!(
            envelope_from_update(&command).map(|envelope| envelope.event),
            Some(ChatEvent::Command(event)) if event.sender.is_none()
        ));
    }

    #[test]
    fn other_updates_are_unsupported() {
        let photo = json!({
            "update_id": 1,
            "message": { "message_id": 1, "date": 1, "chat": { "id": 5 }, "photo": [] }
        });
        let edited = json!({ "update_id": 2, "edited_message": {} });

        assert_eq!(
            envelope_from_update(&photo).map(|envelope| envelope.event),
            Some(ChatEvent::Unsupported { event_type: "non_text_message".to_owned() })
        );
        assert_eq!(
            envelope_from_update(&edited).map(|envelope| envelope.event),
            Some(ChatEvent::Unsupported { event_type: "edited_message".to_owned() })
        );
        assert!(envelope_from_update(&json!({ "message": {} })).is_none());
    }

    #[derive(Default)]
    struct FakeTelegram {
        offsets: Vec<Option<i64>>,
        sent: Vec<Value>,
    }

    type Shared = Arc<Mutex<FakeTelegram>>;

    async fn api(
        State(state): State<Shared>,
        Path((bot, method)): Path<(String, String)>,
        Json(body): Json<Value>,
    ) -> Json<Value> {
        if bot != "bot123:secret" {
            return Json(json!({ "ok": false, "description": "Unauthorized" }));
        }
        let mut state = state.lock().await;
        match method.as_str() {
            "getMe" => Json(json!({ "ok": true, "result": { "username": "deal_desk_bot" } })),
            "getUpdates" => {
                state.offsets.push(body["offset"].as_i64());
                let result = if state.offsets.len() == 1 {
                    json!([
                        { "update_id": 7, "message": {
                            "message_id": 1, "date": 1, "chat": { "id": 5 }, "text": "/start" } },
                        { "update_id": 8, "channel_post": {} }
                    ])
                } else {
                    json!([])
                };
                Json(json!({ "ok": true, "result": result }))
            }
            "sendMessage" => {
                state.sent.push(body);
                Json(json!({ "ok": true, "result": { "message_id": state.sent.len() } }))
            }
            _ => Json(json!({ "ok": false, "description": "Not Found" })),
        }
    }

    async fn spawn_fake(state: Shared) -> String {
        let app = Router::new().route("/{bot}/{method}", post(api)).with_state(state);
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind fake telegram");
        let address = listener.local_addr().expect("local addr");
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        format!("http://{address}")
    }

    #[tokio::test]
    async fn polls_with_offsets_and_buffers_updates() {
        let state = Shared::default();
        let base_url = spawn_fake(state.clone()).await;
        let transport = TelegramTransport::new(&base_url, "123:secret", 0).expect("transport");

        transport.connect().await.expect("connect");
        let first = transport.next_envelope().await.expect("poll").expect("update");
        assert_eq!(first.update_id, 7);
        assert!(matches!(first.event, ChatEvent::Command(_)));
        transport.acknowledge(first.update_id).await.expect("ack");

        let second = transport.next_envelope().await.expect("buffered").expect("update");
        assert_eq!(second.update_id, 8);
        assert_eq!(state.lock().await.offsets, vec![None]);
    }

    #[tokio::test]
    async fn long_replies_are_sent_in_chunks() {
        let state = Shared::default();
        let base_url = spawn_fake(state.clone()).await;
        let transport = TelegramTransport::new(&base_url, "123:secret", 0).expect("transport");
        let line = "x".repeat(100);
        let long_text = vec![line; 60].join("\n");
        let message = MessageBuilder::new("long")
            .section("long.v1", |section| {
                section.plain(long_text);
            })
            .build();

        transport.send_message(5, &message).await.expect("send");

        let state = state.lock().await;
        assert_eq!(state.sent.len(), 2);
        for body in &state.sent {
            assert_eq!(body["chat_id"], 5);
            assert_eq!(body["parse_mode"], "HTML");
            let chars = body["text"].as_str().map_or(0, |text| text.chars().count());
            assert!(chars <= MAX_MESSAGE_CHARS);
        }
    }

    #[tokio::test]
    async fn bad_token_fails_to_connect() {
        let base_url = spawn_fake(Shared::default()).await;
        let transport = TelegramTransport::new(&base_url, "999:wrong", 0).expect("transport");
        assert!(matches!(
            transport.connect().await,
            Err(TransportError::Connect(message)) if message.contains("Unauthorized")
        ));
    }
}
