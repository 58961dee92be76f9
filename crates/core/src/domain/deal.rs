use std::collections::BTreeMap;

use rust_decimal::Decimal;
use serde::Serialize;

use crate::domain::feedback::FieldError;
use crate::grammar::FieldName;
use crate::pricing::PricingModel;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Text(String),
    Money(Decimal),
    Ratio(Decimal),
    Model(PricingModel),
    List(Vec<String>),
}

impl FieldValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[String]> {
        match self {
            Self::List(values) => Some(values),
            _ => None,
        }
    }

    pub fn as_decimal(&self) -> Option<Decimal> {
        match self {
            Self::Money(value) | Self::Ratio(value) => Some(*value),
            _ => None,
        }
    }

    /// Human-readable rendering, lists joined with `", "`.
    pub fn display(&self) -> String {
        match self {
            Self::Text(value) => value.clone(),
            Self::Money(value) => value.to_string(),
            Self::Ratio(value) => format!("{}%", (*value * Decimal::ONE_HUNDRED).normalize()),
            Self::Model(model) => model.label().to_owned(),
            Self::List(values) => values.join(", "),
        }
    }
}

/// A validated deal.
///
/// Only the validator constructs records, so a `DealRecord` always carries a
/// resolved pricing model with all of its required fields and none of its
/// forbidden ones. Serializes as a map of canonical field name to value.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DealRecord {
    #[serde(skip)]
    model: PricingModel,
    #[serde(flatten)]
    fields: BTreeMap<FieldName, FieldValue>,
}

impl DealRecord {
    pub(crate) fn new(model: PricingModel, mut fields: BTreeMap<FieldName, FieldValue>) -> Self {
        fields.insert(FieldName::Model, FieldValue::Model(model));
        Self { model, fields }
    }

    pub fn model(&self) -> PricingModel {
        self.model
    }

    pub fn get(&self, field: FieldName) -> Option<&FieldValue> {
        self.fields.get(&field)
    }

    pub fn text(&self, field: FieldName) -> Option<&str> {
        self.get(field).and_then(FieldValue::as_text)
    }

    pub fn list(&self, field: FieldName) -> &[String] {
        self.get(field).and_then(FieldValue::as_list).unwrap_or(&[])
    }

    pub fn decimal(&self, field: FieldName) -> Option<Decimal> {
        self.get(field).and_then(FieldValue::as_decimal)
    }

    pub fn partner(&self) -> &str {
        self.text(FieldName::Partner).unwrap_or_default()
    }

    /// Fields in grammar order.
    pub fn iter(&self) -> impl Iterator<Item = (FieldName, &FieldValue)> {
        self.fields.iter().map(|(name, value)| (*name, value))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DealOutcome {
    Valid {
        /// 1-based position of the deal within the submission.
        index: usize,
        record: DealRecord,
        warnings: Vec<FieldError>,
    },
    Invalid {
        index: usize,
        source_text: String,
        errors: Vec<FieldError>,
        warnings: Vec<FieldError>,
    },
}

impl DealOutcome {
    pub fn index(&self) -> usize {
        match self {
            Self::Valid { index, .. } | Self::Invalid { index, .. } => *index,
        }
    }

    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid { .. })
    }

    pub fn record(&self) -> Option<&DealRecord> {
        match self {
            Self::Valid { record, .. } => Some(record),
            Self::Invalid { .. } => None,
        }
    }

    pub fn errors(&self) -> &[FieldError] {
        match self {
            Self::Valid { .. } => &[],
            Self::Invalid { errors, .. } => errors,
        }
    }

    pub fn warnings(&self) -> &[FieldError] {
        match self {
            Self::Valid { warnings, .. } | Self::Invalid { warnings, .. } => warnings,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use rust_decimal::Decimal;

    use super::{DealRecord, FieldValue};
    use crate::grammar::FieldName;
    use crate::pricing::PricingModel;

    #[test]
    fn record_serializes_as_canonical_field_map() {
        let mut fields = BTreeMap::new();
        fields.insert(FieldName::Geo, FieldValue::List(vec!["US".to_owned(), "CA".to_owned()]));
        fields.insert(FieldName::Partner, FieldValue::Text("Acme".to_owned()));
        let record = DealRecord::new(PricingModel::Cpl, fields);

        let json = serde_json::to_value(&record).expect("serialize record");
        assert_eq!(json["GEO"], serde_json::json!(["US", "CA"]));
        assert_eq!(json["Model"], "CPL");
        assert_eq!(json["Partner"], "Acme");
        assert_eq!(record.iter().next().map(|(name, _)| name), Some(FieldName::Partner));
    }

    #[test]
    fn ratio_display_is_a_percentage() {
        assert_eq!(FieldValue::Ratio(Decimal::new(1, 1)).display(), "10%");
        assert_eq!(FieldValue::Ratio(Decimal::new(125, 3)).display(), "12.5%");
    }
}
