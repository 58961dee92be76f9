//! Chat interface for dealdesk.
//!
//! Partners paste one or more deals into a chat with the bot; every message
//! is run through the core intake, valid deals are written to the deal store
//! and the bot replies with a per-deal report.
//!
//! - **Transport** (`transport`, `telegram`) - long-polling loop with
//!   reconnection; Telegram Bot API implementation
//! - **Events** (`events`) - typed updates routed to handlers
//! - **Commands** (`commands`) - `/start` and `/help`
//! - **Messages** (`blocks`) - reply builders and rendering
//! - **Submission** (`service`) - intake, store write, reply
//!
//! # Architecture
//!
//! ```text
//! Telegram updates → ChatRunner → EventDispatcher → Handlers → DealIntake
//!                                                       ↓           ↓
//!                                    sendMessage ← MessageTemplate  DealStore
//! ```

pub mod blocks;
pub mod commands;
pub mod events;
pub mod service;
pub mod telegram;
pub mod transport;

pub use events::{deal_dispatcher, ChatEnvelope, ChatEvent, EventContext, EventDispatcher};
pub use service::DealSubmissionService;
pub use telegram::TelegramTransport;
pub use transport::{ChatRunner, ChatTransport, ReconnectPolicy, TransportError};
