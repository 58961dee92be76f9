//! Entry point to the parsing and validation engine.
//!
//! [`DealIntake`] compiles the configured grammar once and is then shared
//! read-only between concurrently handled submissions.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::grammar::{Grammar, GrammarError};
use crate::report::SubmissionReport;
use crate::tokenizer::{DealDelimiter, DealTokenizer};
use crate::validator::Validator;

pub const DEFAULT_MAX_MESSAGE_CHARS: usize = 10_000;
pub const DEFAULT_MAX_DEALS: usize = 50;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IntakeConfig {
    pub deal_delimiter: DealDelimiter,
    pub strict_unknown_fields: bool,
    /// Extra field-name synonyms, keyed by synonym, valued by canonical name.
    pub field_synonyms: BTreeMap<String, String>,
    pub max_message_chars: usize,
    pub max_deals: usize,
}

impl Default for IntakeConfig {
    fn default() -> Self {
        Self {
            deal_delimiter: DealDelimiter::BlankLine,
            strict_unknown_fields: false,
            field_synonyms: BTreeMap::new(),
            max_message_chars: DEFAULT_MAX_MESSAGE_CHARS,
            max_deals: DEFAULT_MAX_DEALS,
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum IntakeError {
    #[error("message is {chars} characters long; the limit is {max}")]
    InputTooLarge { chars: usize, max: usize },
    #[error("message contains {count} deals; the limit is {max} per message")]
    TooManyDeals { count: usize, max: usize },
    #[error("deal separator token must not be empty")]
    EmptySeparator,
    #[error(transparent)]
    Grammar(#[from] GrammarError),
    #[error("invalid intake configuration: {0}")]
    InvalidConfig(String),
}

impl IntakeError {
    /// Whether the submission was rejected for its size rather than for a
    /// broken configuration.
    pub fn is_resource_limit(&self) -> bool {
        matches!(self, Self::InputTooLarge { .. } | Self::TooManyDeals { .. })
    }
}

#[derive(Clone, Debug)]
pub struct DealIntake {
    grammar: Grammar,
    config: IntakeConfig,
}

impl DealIntake {
    pub fn new(config: IntakeConfig) -> Result<Self, IntakeError> {
        if matches!(&config.deal_delimiter, DealDelimiter::Separator(token) if token.trim().is_empty())
        {
            return Err(IntakeError::EmptySeparator);
        }
        if config.max_message_chars == 0 {
            return Err(IntakeError::InvalidConfig("max_message_chars must be > 0".to_owned()));
        }
        if config.max_deals == 0 {
            return Err(IntakeError::InvalidConfig("max_deals must be > 0".to_owned()));
        }
        let grammar = Grammar::with_synonyms(&config.field_synonyms)?;
        Ok(Self { grammar, config })
    }

    pub fn config(&self) -> &IntakeConfig {
        &self.config
    }

    pub fn grammar(&self) -> &Grammar {
        &self.grammar
    }

    pub fn tokenize<'a>(&self, raw_text: &'a str) -> DealTokenizer<'a> {
        DealTokenizer::new(raw_text, &self.config.deal_delimiter)
    }

    /// Parses and validates every deal in `raw_text`.
    ///
    /// The same input always yields the same report.
    pub fn process(&self, raw_text: &str) -> Result<SubmissionReport, IntakeError> {
        let chars = raw_text.chars().count();
        if chars > self.config.max_message_chars {
            return Err(IntakeError::InputTooLarge { chars, max: self.config.max_message_chars });
        }

        let max = self.config.max_deals;
        let mut blocks = self.tokenize(raw_text);
        let accepted: Vec<_> = blocks.by_ref().take(max).collect();
        let overflow = blocks.count();
        if overflow > 0 {
            return Err(IntakeError::TooManyDeals { count: max + overflow, max });
        }

        let validator = Validator::new(&self.grammar, self.config.strict_unknown_fields);
        Ok(accepted.iter().map(|block| validator.validate(block)).collect())
    }
}

/// One-shot convenience over [`DealIntake`].
pub fn parse_and_validate(
    raw_text: &str,
    config: &IntakeConfig,
) -> Result<SubmissionReport, IntakeError> {
    DealIntake::new(config.clone())?.process(raw_text)
}
