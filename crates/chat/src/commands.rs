use dealdesk_core::DealDelimiter;
use thiserror::Error;

use crate::blocks::{self, MessageTemplate};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommandEnvelope {
    pub command: String,
    pub args: String,
    pub addressed_to: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChatCommand {
    Start,
    Help,
    Unknown { command: String },
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum CommandParseError {
    #[error("message is not a bot command")]
    NotACommand,
    #[error("command name is empty")]
    EmptyCommand,
}

/// Parses `/name[@bot] args...` into its parts.
///
/// The command name is lower-cased; the bot suffix is kept separately so
/// group chats can ignore commands addressed to other bots.
pub fn parse_command(text: &str) -> Result<CommandEnvelope, CommandParseError> {
    let trimmed = text.trim_start();
    let Some(body) = trimmed.strip_prefix('/') else {
        return Err(CommandParseError::NotACommand);
    };

    let (head, args) = match body.split_once(char::is_whitespace) {
        Some((head, args)) => (head, args.trim()),
        None => (body, ""),
    };
    let (name, addressed_to) = match head.split_once('@') {
        Some((name, bot)) => (name, Some(bot.to_owned())),
        None => (head, None),
    };
    if name.is_empty() {
        return Err(CommandParseError::EmptyCommand);
    }

    Ok(CommandEnvelope {
        command: name.to_ascii_lowercase(),
        args: args.to_owned(),
        addressed_to,
    })
}

pub fn classify_command(command: &str) -> ChatCommand {
    match command {
        "start" => ChatCommand::Start,
        "help" => ChatCommand::Help,
        other => ChatCommand::Unknown { command: other.to_owned() },
    }
}

pub struct CommandRouter {
    delimiter: DealDelimiter,
}

impl CommandRouter {
    pub fn new(delimiter: DealDelimiter) -> Self {
        Self { delimiter }
    }

    pub fn route(&self, envelope: &CommandEnvelope) -> MessageTemplate {
        match classify_command(&envelope.command) {
            ChatCommand::Start => blocks::welcome_message(&self.delimiter),
            ChatCommand::Help => blocks::help_message(&self.delimiter),
            ChatCommand::Unknown { command } => blocks::unknown_command_message(&command),
        }
    }
}
