//! Splits a raw submission into deal blocks and each block into
//! `name = value` pairs.
//!
//! The tokenizer borrows the input and makes a single lazy pass over it. It
//! never rejects text: lines it cannot split are kept as [`UnparsedLine`]s so
//! the validator can report them.
//!
//! A line in the compact positional form
//! `REGION-PARTNER-GEO-LANGUAGE-SOURCES-MODEL-CPA-CRG-CPL-FUNNELS-CR-DEDUCTION`
//! is a deal of its own, whatever delimiter is configured. `&` marks an
//! absent position.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::grammar::{is_empty_value, FieldName};

/// Field order of the positional one-line form.
pub const POSITIONAL_FIELDS: [FieldName; 12] = [
    FieldName::Region,
    FieldName::Partner,
    FieldName::Geo,
    FieldName::Language,
    FieldName::Sources,
    FieldName::Model,
    FieldName::Cpa,
    FieldName::Crg,
    FieldName::Cpl,
    FieldName::Funnels,
    FieldName::Cr,
    FieldName::Deduction,
];

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum DealDelimiter {
    /// One or more blank lines separate deals.
    #[default]
    BlankLine,
    /// A line whose trimmed content equals the token separates deals.
    Separator(String),
}

const BLANK_LINE_KEY: &str = "blank_line";

impl From<String> for DealDelimiter {
    fn from(value: String) -> Self {
        if value.trim().eq_ignore_ascii_case(BLANK_LINE_KEY) {
            Self::BlankLine
        } else {
            Self::Separator(value.trim().to_owned())
        }
    }
}

impl From<DealDelimiter> for String {
    fn from(value: DealDelimiter) -> Self {
        match value {
            DealDelimiter::BlankLine => BLANK_LINE_KEY.to_owned(),
            DealDelimiter::Separator(token) => token,
        }
    }
}

impl fmt::Display for DealDelimiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BlankLine => f.write_str(BLANK_LINE_KEY),
            Self::Separator(token) => write!(f, "separator `{token}`"),
        }
    }
}

impl DealDelimiter {
    fn is_boundary(&self, line: &str) -> bool {
        match self {
            Self::BlankLine => line.trim().is_empty(),
            Self::Separator(token) => line.trim() == token,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RawField<'a> {
    pub name: &'a str,
    pub value: &'a str,
    /// 1-based line within the block.
    pub line: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UnparsedLine<'a> {
    pub line: usize,
    pub text: &'a str,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawDealBlock<'a> {
    /// 1-based position within the submission.
    pub index: usize,
    pub text: &'a str,
    pub fields: Vec<RawField<'a>>,
    pub unparsed: Vec<UnparsedLine<'a>>,
}

impl<'a> RawDealBlock<'a> {
    fn parse(index: usize, text: &'a str) -> Self {
        if let Some(values) = split_positional(text) {
            let fields = POSITIONAL_FIELDS
                .iter()
                .zip(values)
                .filter(|(_, value)| !is_empty_value(value))
                .map(|(field, value)| RawField { name: field.as_str(), value, line: 1 })
                .collect();
            return Self { index, text, fields, unparsed: Vec::new() };
        }

        let mut fields = Vec::new();
        let mut unparsed = Vec::new();

        for (offset, line) in text.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let number = offset + 1;
            match split_pair(line) {
                Some((name, value)) => fields.push(RawField { name, value, line: number }),
                None => unparsed.push(UnparsedLine { line: number, text: line.trim() }),
            }
        }

        Self { index, text, fields, unparsed }
    }
}

/// Splits on the first `=` or `:`. List bullets in front of the name are
/// ignored.
fn split_pair(line: &str) -> Option<(&str, &str)> {
    let position = line.find(|ch: char| ch == '=' || ch == ':')?;
    let name = line[..position].trim().trim_start_matches(|ch: char| matches!(ch, '-' | '*' | '•'));
    let name = name.trim();
    if name.is_empty() {
        return None;
    }
    Some((name, line[position + 1..].trim()))
}

/// Splits a single positional line into its twelve trimmed values.
fn split_positional(line: &str) -> Option<Vec<&str>> {
    if line.contains(['\n', ':', '=']) {
        return None;
    }
    let values: Vec<&str> = line.split('-').map(str::trim).collect();
    (values.len() == POSITIONAL_FIELDS.len()).then_some(values)
}

pub struct DealTokenizer<'a> {
    input: &'a str,
    cursor: usize,
    next_index: usize,
    delimiter: DealDelimiter,
}

impl<'a> DealTokenizer<'a> {
    pub fn new(input: &'a str, delimiter: &DealDelimiter) -> Self {
        Self { input, cursor: 0, next_index: 1, delimiter: delimiter.clone() }
    }

    /// Returns the next line with its byte offset, without the line break.
    fn next_line(&mut self) -> Option<(usize, &'a str)> {
        if self.cursor >= self.input.len() {
            return None;
        }
        let start = self.cursor;
        let rest = &self.input[start..];
        let (line, consumed) = match rest.find('\n') {
            Some(end) => (&rest[..end], end + 1),
            None => (rest, rest.len()),
        };
        self.cursor += consumed;
        Some((start, line.strip_suffix('\r').unwrap_or(line)))
    }
}

impl<'a> Iterator for DealTokenizer<'a> {
    type Item = RawDealBlock<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut span: Option<(usize, usize)> = None;

        while let Some((start, line)) = self.next_line() {
            if self.delimiter.is_boundary(line) {
                if span.is_some() {
                    break;
                }
                continue;
            }
            if line.trim().is_empty() {
                continue;
            }
            if split_positional(line).is_some() {
                if span.is_some() {
                    // Leave the line for the next call.
                    self.cursor = start;
                    break;
                }
                span = Some((start, start + line.len()));
                break;
            }
            let end = start + line.len();
            span = Some(match span {
                Some((block_start, _)) => (block_start, end),
                None => (start, end),
            });
        }

        let (start, end) = span?;
        let index = self.next_index;
        self.next_index += 1;
        Some(RawDealBlock::parse(index, &self.input[start..end]))
    }
}
