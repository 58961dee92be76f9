//! Pricing-model table and resolver.
//!
//! Every model maps to the pricing fields it requires and the ones it forbids
//! on top of the common required set. Rule changes belong in the rule statics
//! below, never in the validator.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::feedback::FieldError;
use crate::grammar::{is_empty_value, FieldName, Grammar};
use crate::tokenizer::RawDealBlock;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PricingModel {
    #[serde(rename = "CPA/CRG")]
    CpaCrg,
    #[serde(rename = "CPA")]
    Cpa,
    #[serde(rename = "CPL")]
    Cpl,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ModelRules {
    pub required: &'static [FieldName],
    pub forbidden: &'static [FieldName],
}

/// Fields whose presence is governed by the pricing model.
pub const PRICING_FIELDS: [FieldName; 3] = [FieldName::Cpa, FieldName::Crg, FieldName::Cpl];

static CPA_CRG_RULES: ModelRules =
    ModelRules { required: &[FieldName::Cpa, FieldName::Crg], forbidden: &[FieldName::Cpl] };
static CPA_RULES: ModelRules =
    ModelRules { required: &[FieldName::Cpa], forbidden: &[FieldName::Crg, FieldName::Cpl] };
static CPL_RULES: ModelRules =
    ModelRules { required: &[FieldName::Cpl], forbidden: &[FieldName::Cpa, FieldName::Crg] };

impl PricingModel {
    pub const ALL: [PricingModel; 3] = [PricingModel::CpaCrg, PricingModel::Cpa, PricingModel::Cpl];

    pub fn label(&self) -> &'static str {
        match self {
            Self::CpaCrg => "CPA/CRG",
            Self::Cpa => "CPA",
            Self::Cpl => "CPL",
        }
    }

    pub fn rules(&self) -> &'static ModelRules {
        match self {
            Self::CpaCrg => &CPA_CRG_RULES,
            Self::Cpa => &CPA_RULES,
            Self::Cpl => &CPL_RULES,
        }
    }

    pub fn requires(&self, field: FieldName) -> bool {
        self.rules().required.contains(&field)
    }

    pub fn forbids(&self, field: FieldName) -> bool {
        self.rules().forbidden.contains(&field)
    }
}

impl fmt::Display for PricingModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("unsupported pricing model `{0}` (expected CPA/CRG, CPA or CPL)")]
pub struct UnknownPricingModel(pub String);

impl FromStr for PricingModel {
    type Err = UnknownPricingModel;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized: String = value
            .trim()
            .chars()
            .filter(|ch| !ch.is_whitespace())
            .collect::<String>()
            .to_ascii_lowercase();
        match normalized.as_str() {
            "cpa/crg" | "cpa_crg" | "cpa+crg" | "cpa-crg" | "cpacrg" | "crg" => Ok(Self::CpaCrg),
            "cpa" => Ok(Self::Cpa),
            "cpl" => Ok(Self::Cpl),
            _ => Err(UnknownPricingModel(value.trim().to_owned())),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ModelResolution {
    Resolved(PricingModel),
    Unresolved(FieldError),
}

impl ModelResolution {
    pub fn model(&self) -> Option<PricingModel> {
        match self {
            Self::Resolved(model) => Some(*model),
            Self::Unresolved(_) => None,
        }
    }

    pub fn is_ambiguous(&self) -> bool {
        matches!(self, Self::Unresolved(error) if error.kind.is_ambiguous())
    }
}

/// Resolves the pricing model declared by a block.
pub fn resolve(block: &RawDealBlock<'_>, grammar: &Grammar) -> ModelResolution {
    let declared: Vec<&str> = block
        .fields
        .iter()
        .filter(|field| {
            grammar.lookup(field.name).map(|spec| spec.name == FieldName::Model).unwrap_or(false)
        })
        .map(|field| field.value)
        .collect();
    resolve_declarations(&declared)
}

/// Resolves the model from every declared indicator value, in input order.
pub fn resolve_declarations(declared: &[&str]) -> ModelResolution {
    let Some(first) = declared.first() else {
        return ModelResolution::Unresolved(FieldError::missing(FieldName::Model));
    };

    let first_key = declaration_key(first);
    if let Some(conflict) = declared.iter().skip(1).find(|value| declaration_key(value) != first_key)
    {
        return ModelResolution::Unresolved(FieldError::ambiguous_model(first, conflict));
    }

    let value = first.trim();
    if is_empty_value(value) {
        return ModelResolution::Unresolved(FieldError::missing(FieldName::Model));
    }

    match PricingModel::from_str(value) {
        Ok(model) => ModelResolution::Resolved(model),
        Err(_) => ModelResolution::Unresolved(FieldError::malformed(
            FieldName::Model,
            &[value.to_owned()],
            FieldName::Model.spec().syntax.expectation(),
        )),
    }
}

/// Two declarations agree when they parse to the same model, or, failing
/// that, when their trimmed lowercase spellings match.
fn declaration_key(value: &str) -> String {
    match PricingModel::from_str(value) {
        Ok(model) => model.label().to_owned(),
        Err(_) => value.trim().to_lowercase(),
    }
}
