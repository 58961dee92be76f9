use serde::{Deserialize, Serialize};

use crate::grammar::FieldName;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldErrorKind {
    Missing,
    Malformed,
    Forbidden,
    DuplicateDeclaration,
    UnknownField,
    AmbiguousPricingModel,
}

impl FieldErrorKind {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Missing => "missing",
            Self::Malformed => "malformed",
            Self::Forbidden => "forbidden",
            Self::DuplicateDeclaration => "duplicate",
            Self::UnknownField => "unknown field",
            Self::AmbiguousPricingModel => "ambiguous pricing model",
        }
    }

    pub fn is_ambiguous(&self) -> bool {
        matches!(self, Self::AmbiguousPricingModel)
    }
}

/// One field-level problem with a submitted deal.
///
/// `field` is the canonical field label for recognized fields, the name as
/// typed for unknown ones, and `line N` for lines that could not be split.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    pub field: String,
    pub kind: FieldErrorKind,
    pub message: String,
}

impl FieldError {
    pub fn missing(field: FieldName) -> Self {
        Self {
            field: field.as_str().to_owned(),
            kind: FieldErrorKind::Missing,
            message: format!("{field} is required but was not provided"),
        }
    }

    pub fn malformed(field: FieldName, values: &[String], expected: &str) -> Self {
        let quoted = values.iter().map(|value| format!("\"{value}\"")).collect::<Vec<_>>();
        Self {
            field: field.as_str().to_owned(),
            kind: FieldErrorKind::Malformed,
            message: format!("{field} has invalid value {}; expected {expected}", quoted.join(", ")),
        }
    }

    pub fn forbidden(field: FieldName, model: &str) -> Self {
        Self {
            field: field.as_str().to_owned(),
            kind: FieldErrorKind::Forbidden,
            message: format!("{field} is not allowed for {model} deals"),
        }
    }

    pub fn duplicate(field: &str, occurrences: usize) -> Self {
        Self {
            field: field.to_owned(),
            kind: FieldErrorKind::DuplicateDeclaration,
            message: format!("{field} is declared {occurrences} times; keep a single declaration"),
        }
    }

    pub fn unknown_field(name: &str) -> Self {
        Self {
            field: name.to_owned(),
            kind: FieldErrorKind::UnknownField,
            message: format!("`{name}` is not a recognized deal field"),
        }
    }

    pub fn unparsed_line(line: usize, text: &str) -> Self {
        Self {
            field: format!("line {line}"),
            kind: FieldErrorKind::UnknownField,
            message: format!("could not read \"{}\"; expected `Field: value`", text.trim()),
        }
    }

    pub fn ambiguous_model(first: &str, conflicting: &str) -> Self {
        Self {
            field: FieldName::Model.as_str().to_owned(),
            kind: FieldErrorKind::AmbiguousPricingModel,
            message: format!(
                "Model is declared as both \"{}\" and \"{}\"; declare exactly one pricing model",
                first.trim(),
                conflicting.trim()
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{FieldError, FieldErrorKind};
    use crate::grammar::FieldName;

    #[test]
    fn malformed_message_quotes_every_offending_value() {
        let error = FieldError::malformed(
            FieldName::Geo,
            &["USA".to_owned(), "1X".to_owned()],
            "a two-letter country code",
        );
        assert_eq!(error.kind, FieldErrorKind::Malformed);
        assert_eq!(error.field, "GEO");
        assert!(error.message.contains("\"USA\", \"1X\""));
    }

    #[test]
    fn unparsed_lines_use_positional_field_names() {
        let error = FieldError::unparsed_line(3, "  hello there ");
        assert_eq!(error.field, "line 3");
        assert_eq!(error.kind, FieldErrorKind::UnknownField);
        assert!(error.message.contains("\"hello there\""));
    }
}
