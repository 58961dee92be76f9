//! Field grammar for deal submissions.
//!
//! The grammar is a static table of [`FieldSpec`]s plus a synonym index. Field
//! names are matched case-insensitively after trimming; `_`, `-` and runs of
//! whitespace inside a name collapse to a single space, so `deal_name`,
//! `Deal-Name` and `deal   name` all resolve to the same key.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::deal::FieldValue;
use crate::pricing::PricingModel;

/// Canonical field names, declared in grammar order.
///
/// The derived `Ord` follows declaration order, which is also the order used
/// for records and for `Missing`/`Malformed` feedback.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum FieldName {
    Partner,
    Region,
    #[serde(rename = "GEO")]
    Geo,
    Language,
    Sources,
    Model,
    #[serde(rename = "CPA")]
    Cpa,
    #[serde(rename = "CRG")]
    Crg,
    #[serde(rename = "CPL")]
    Cpl,
    Funnels,
    #[serde(rename = "CR")]
    Cr,
    Deduction,
}

impl FieldName {
    pub const ALL: [FieldName; 12] = [
        FieldName::Partner,
        FieldName::Region,
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

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Partner => "Partner",
            Self::Region => "Region",
            Self::Geo => "GEO",
            Self::Language => "Language",
            Self::Sources => "Sources",
            Self::Model => "Model",
            Self::Cpa => "CPA",
            Self::Crg => "CRG",
            Self::Cpl => "CPL",
            Self::Funnels => "Funnels",
            Self::Cr => "CR",
            Self::Deduction => "Deduction",
        }
    }

    pub fn spec(&self) -> &'static FieldSpec {
        // FIELD_SPECS is indexed in declaration order.
        &FIELD_SPECS[*self as usize]
    }
}

impl fmt::Display for FieldName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cardinality {
    Single,
    Multi,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueSyntax {
    FreeText,
    CountryCode,
    Language,
    TrafficSource,
    PricingModel,
    Money,
    Ratio,
}

impl ValueSyntax {
    pub fn expectation(&self) -> &'static str {
        match self {
            Self::FreeText => "non-empty text",
            Self::CountryCode => "a two-letter country code such as US or DE",
            Self::Language => "a language name or code such as English or fr",
            Self::TrafficSource => "a traffic source such as Facebook or Google",
            Self::PricingModel => "one of CPA/CRG, CPA, CPL",
            Self::Money => "a positive amount such as 1200 or $15.50",
            Self::Ratio => "a percentage such as 10% or 0.1",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: FieldName,
    pub cardinality: Cardinality,
    pub syntax: ValueSyntax,
    pub required: bool,
}

const fn spec(
    name: FieldName,
    cardinality: Cardinality,
    syntax: ValueSyntax,
    required: bool,
) -> FieldSpec {
    FieldSpec { name, cardinality, syntax, required }
}

/// Pricing fields carry `required: false`; whether they are required or
/// forbidden is decided by the resolved [`PricingModel`].
static FIELD_SPECS: [FieldSpec; 12] = [
    spec(FieldName::Partner, Cardinality::Single, ValueSyntax::FreeText, true),
    spec(FieldName::Region, Cardinality::Single, ValueSyntax::FreeText, false),
    spec(FieldName::Geo, Cardinality::Multi, ValueSyntax::CountryCode, true),
    spec(FieldName::Language, Cardinality::Multi, ValueSyntax::Language, true),
    spec(FieldName::Sources, Cardinality::Multi, ValueSyntax::TrafficSource, true),
    spec(FieldName::Model, Cardinality::Single, ValueSyntax::PricingModel, true),
    spec(FieldName::Cpa, Cardinality::Single, ValueSyntax::Money, false),
    spec(FieldName::Crg, Cardinality::Single, ValueSyntax::Ratio, false),
    spec(FieldName::Cpl, Cardinality::Single, ValueSyntax::Money, false),
    spec(FieldName::Funnels, Cardinality::Multi, ValueSyntax::FreeText, true),
    spec(FieldName::Cr, Cardinality::Single, ValueSyntax::Ratio, false),
    spec(FieldName::Deduction, Cardinality::Single, ValueSyntax::Ratio, false),
];

const BUILTIN_SYNONYMS: &[(&str, FieldName)] = &[
    ("company", FieldName::Partner),
    ("deal", FieldName::Partner),
    ("deal name", FieldName::Partner),
    ("name", FieldName::Partner),
    ("advertiser", FieldName::Partner),
    ("tier", FieldName::Region),
    ("country", FieldName::Geo),
    ("countries", FieldName::Geo),
    ("geos", FieldName::Geo),
    ("languages", FieldName::Language),
    ("lang", FieldName::Language),
    ("source", FieldName::Sources),
    ("traffic", FieldName::Sources),
    ("traffic source", FieldName::Sources),
    ("pricing model", FieldName::Model),
    ("pricing", FieldName::Model),
    ("deal type", FieldName::Model),
    ("cpa price", FieldName::Cpa),
    ("price", FieldName::Cpa),
    ("crg %", FieldName::Crg),
    ("cpl price", FieldName::Cpl),
    ("funnel", FieldName::Funnels),
    ("offers", FieldName::Funnels),
    ("offer", FieldName::Funnels),
    ("conversion rate", FieldName::Cr),
    ("deduction limit", FieldName::Deduction),
    ("deduction %", FieldName::Deduction),
];

const LANGUAGE_ALIASES: &[(&str, &str)] = &[
    ("en", "English"),
    ("eng", "English"),
    ("english", "English"),
    ("fr", "French"),
    ("fre", "French"),
    ("french", "French"),
    ("it", "Italian"),
    ("ita", "Italian"),
    ("italian", "Italian"),
    ("es", "Spanish"),
    ("esp", "Spanish"),
    ("spanish", "Spanish"),
    ("de", "German"),
    ("ger", "German"),
    ("german", "German"),
    ("nl", "Dutch"),
    ("dut", "Dutch"),
    ("dutch", "Dutch"),
    ("pt", "Portuguese"),
    ("por", "Portuguese"),
    ("portuguese", "Portuguese"),
    ("ru", "Russian"),
    ("rus", "Russian"),
    ("russian", "Russian"),
    ("se", "Swedish"),
    ("swe", "Swedish"),
    ("swedish", "Swedish"),
    ("dk", "Danish"),
    ("dan", "Danish"),
    ("danish", "Danish"),
    ("no", "Norwegian"),
    ("nor", "Norwegian"),
    ("norwegian", "Norwegian"),
    ("fi", "Finnish"),
    ("fin", "Finnish"),
    ("finnish", "Finnish"),
    ("nat", "Native"),
    ("native", "Native"),
    ("local", "Native"),
];

const SOURCE_ALIASES: &[(&str, &str)] = &[
    ("fb", "Facebook"),
    ("facebook", "Facebook"),
    ("gg", "Google"),
    ("google", "Google"),
    ("google display", "Google Display"),
    ("google seo", "Google SEO"),
    ("dv", "Google DV360"),
    ("dv360", "Google DV360"),
    ("dv 360", "Google DV360"),
    ("google dv360", "Google DV360"),
    ("google dv 360", "Google DV360"),
    ("display", "Display"),
    ("seo", "SEO"),
    ("taboola", "Taboola"),
    ("bing", "Bing"),
    ("native", "Native"),
    ("tiktok", "TikTok"),
    ("push", "Push"),
    ("email", "Email"),
];

/// Placeholder some submitters use for "no value".
const EMPTY_PLACEHOLDER: &str = "&";

#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("unknown field `{name}`")]
pub struct UnknownField {
    pub name: String,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum GrammarError {
    #[error("synonym `{synonym}` targets unknown field `{target}`")]
    UnknownSynonymTarget { synonym: String, target: String },
    #[error("synonym key must not be empty")]
    EmptySynonym,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ValueError {
    /// Nothing usable after trimming and dropping empty elements.
    Empty,
    Invalid { values: Vec<String>, expected: &'static str },
}

#[derive(Clone, Debug)]
pub struct Grammar {
    index: HashMap<String, FieldName>,
}

impl Default for Grammar {
    fn default() -> Self {
        let mut index = HashMap::new();
        for name in FieldName::ALL {
            index.insert(normalize_field_key(name.as_str()), name);
        }
        for (synonym, name) in BUILTIN_SYNONYMS {
            index.insert(normalize_field_key(synonym), *name);
        }
        Self { index }
    }
}

impl Grammar {
    /// Builds the grammar with configured synonyms layered over the built-ins.
    pub fn with_synonyms(synonyms: &BTreeMap<String, String>) -> Result<Self, GrammarError> {
        let mut grammar = Self::default();
        for (synonym, target) in synonyms {
            let key = normalize_field_key(synonym);
            if key.is_empty() {
                return Err(GrammarError::EmptySynonym);
            }
            let canonical = grammar.index.get(&normalize_field_key(target)).copied().ok_or_else(
                || GrammarError::UnknownSynonymTarget {
                    synonym: synonym.clone(),
                    target: target.clone(),
                },
            )?;
            grammar.index.insert(key, canonical);
        }
        Ok(grammar)
    }

    pub fn lookup(&self, name: &str) -> Result<&'static FieldSpec, UnknownField> {
        self.index
            .get(&normalize_field_key(name))
            .map(FieldName::spec)
            .ok_or_else(|| UnknownField { name: name.trim().to_owned() })
    }

    pub fn specs(&self) -> impl Iterator<Item = &'static FieldSpec> {
        FIELD_SPECS.iter()
    }
}

pub fn normalize_field_key(name: &str) -> String {
    name.split(|ch: char| ch.is_whitespace() || ch == '_' || ch == '-')
        .filter(|part| !part.is_empty())
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

impl FieldSpec {
    /// Parses a raw value according to this field's cardinality and syntax.
    pub fn parse_value(&self, raw: &str) -> Result<FieldValue, ValueError> {
        match self.cardinality {
            Cardinality::Single => {
                let trimmed = raw.trim();
                if is_empty_value(trimmed) {
                    return Err(ValueError::Empty);
                }
                parse_scalar(self.syntax, trimmed).map_err(|()| ValueError::Invalid {
                    values: vec![trimmed.to_owned()],
                    expected: self.syntax.expectation(),
                })
            }
            Cardinality::Multi => self.parse_list(raw),
        }
    }

    fn parse_list(&self, raw: &str) -> Result<FieldValue, ValueError> {
        let mut values: Vec<String> = Vec::new();
        let mut rejected = Vec::new();

        for element in split_multi_value(raw) {
            match parse_element(self.syntax, element) {
                Ok(value) => {
                    if !values.contains(&value) {
                        values.push(value);
                    }
                }
                Err(()) => rejected.push(element.to_owned()),
            }
        }

        if !rejected.is_empty() {
            return Err(ValueError::Invalid {
                values: rejected,
                expected: self.syntax.expectation(),
            });
        }
        if values.is_empty() {
            return Err(ValueError::Empty);
        }
        Ok(FieldValue::List(values))
    }
}

pub fn split_multi_value(raw: &str) -> impl Iterator<Item = &str> {
    raw.split(|ch: char| matches!(ch, ',' | ';' | '|' | '+'))
        .map(str::trim)
        .filter(|element| !is_empty_value(element))
}

pub(crate) fn is_empty_value(value: &str) -> bool {
    value.is_empty() || value == EMPTY_PLACEHOLDER
}

fn parse_scalar(syntax: ValueSyntax, value: &str) -> Result<FieldValue, ()> {
    match syntax {
        ValueSyntax::Money => parse_money(value).map(FieldValue::Money),
        ValueSyntax::Ratio => parse_ratio(value).map(FieldValue::Ratio),
        ValueSyntax::PricingModel => {
            PricingModel::from_str(value).map(FieldValue::Model).map_err(|_| ())
        }
        other => parse_element(other, value).map(FieldValue::Text),
    }
}

fn parse_element(syntax: ValueSyntax, value: &str) -> Result<String, ()> {
    match syntax {
        ValueSyntax::CountryCode => parse_country_code(value),
        ValueSyntax::Language => parse_language(value),
        ValueSyntax::TrafficSource => parse_source(value),
        ValueSyntax::FreeText => Ok(value.to_owned()),
        ValueSyntax::PricingModel => {
            PricingModel::from_str(value).map(|model| model.label().to_owned()).map_err(|_| ())
        }
        ValueSyntax::Money => parse_money(value).map(|amount| amount.to_string()),
        ValueSyntax::Ratio => parse_ratio(value).map(|ratio| ratio.to_string()),
    }
}

fn parse_country_code(value: &str) -> Result<String, ()> {
    let stripped: String =
        value.chars().filter(|ch| !('\u{1F1E6}'..='\u{1F1FF}').contains(ch)).collect();
    let code = stripped.trim();
    if code.len() == 2 && code.chars().all(|ch| ch.is_ascii_alphabetic()) {
        Ok(code.to_ascii_uppercase())
    } else {
        Err(())
    }
}

fn parse_language(value: &str) -> Result<String, ()> {
    let key = value.to_lowercase();
    if let Some((_, language)) = LANGUAGE_ALIASES.iter().find(|(alias, _)| *alias == key) {
        return Ok((*language).to_owned());
    }
    if !value.chars().all(|ch| ch.is_alphabetic() || ch == ' ') {
        return Err(());
    }
    let mut chars = value.chars();
    match chars.next() {
        Some(first) => Ok(first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect()),
        None => Err(()),
    }
}

fn parse_source(value: &str) -> Result<String, ()> {
    let key = value.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase();
    if let Some((_, source)) = SOURCE_ALIASES.iter().find(|(alias, _)| *alias == key) {
        return Ok((*source).to_owned());
    }
    if value.chars().any(char::is_alphabetic) {
        Ok(value.to_owned())
    } else {
        Err(())
    }
}

fn parse_money(value: &str) -> Result<Decimal, ()> {
    let lowered = value.to_ascii_lowercase();
    let amount = lowered.trim_start_matches('$').trim_end_matches("usd").trim_end_matches('$');
    let amount = Decimal::from_str(amount.trim()).map_err(|_| ())?;
    if amount > Decimal::ZERO {
        Ok(amount.normalize())
    } else {
        Err(())
    }
}

/// Values above 1 are read as percentages, so `10`, `10%` and `0.1` agree.
fn parse_ratio(value: &str) -> Result<Decimal, ()> {
    let number = Decimal::from_str(value.trim_end_matches('%').trim()).map_err(|_| ())?;
    let ratio = if number > Decimal::ONE { number / Decimal::ONE_HUNDRED } else { number };
    if ratio > Decimal::ZERO && ratio <= Decimal::ONE {
        Ok(ratio.normalize())
    } else {
        Err(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use rust_decimal::Decimal;

    use super::{normalize_field_key, FieldName, Grammar, GrammarError, ValueError};
    use crate::domain::deal::FieldValue;

    #[test]
    fn lookup_is_case_insensitive_and_trims() {
        let grammar = Grammar::default();
        assert_eq!(grammar.lookup("  geo ").expect("geo").name, FieldName::Geo);
        assert_eq!(grammar.lookup("FUNNELS").expect("funnels").name, FieldName::Funnels);
        assert_eq!(grammar.lookup("Deal_Name").expect("deal name").name, FieldName::Partner);
    }

    #[test]
    fn lookup_reports_unknown_field_with_trimmed_name() {
        let error = Grammar::default().lookup(" landing page ").expect_err("unknown");
        assert_eq!(error.name, "landing page");
    }

    #[test]
    fn configured_synonyms_resolve_to_canonical_names() {
        let mut synonyms = BTreeMap::new();
        synonyms.insert("Traffic Type".to_owned(), "sources".to_owned());
        synonyms.insert("buyer".to_owned(), "company".to_owned());

        let grammar = Grammar::with_synonyms(&synonyms).expect("grammar");
        assert_eq!(grammar.lookup("traffic-type").expect("synonym").name, FieldName::Sources);
        assert_eq!(grammar.lookup("BUYER").expect("chained synonym").name, FieldName::Partner);
    }

    #[test]
    fn synonym_to_unknown_field_is_rejected() {
        let mut synonyms = BTreeMap::new();
        synonyms.insert("budget".to_owned(), "spend".to_owned());

        let error = Grammar::with_synonyms(&synonyms).expect_err("unknown target");
        assert!(matches!(error, GrammarError::UnknownSynonymTarget { ref target, .. } if target == "spend"));
    }

    #[test]
    fn multi_value_dedupes_preserving_first_seen_order() {
        let value = FieldName::Geo.spec().parse_value("US, us; CA,🇺🇸US").expect("geo list");
        assert_eq!(value, FieldValue::List(vec!["US".to_owned(), "CA".to_owned()]));
    }

    #[test]
    fn all_empty_multi_value_is_reported_as_empty() {
        assert_eq!(FieldName::Funnels.spec().parse_value(" , ;& "), Err(ValueError::Empty));
    }

    #[test]
    fn malformed_elements_are_collected() {
        let error = FieldName::Geo.spec().parse_value("US,USA,1X").expect_err("bad codes");
        assert!(matches!(
            error,
            ValueError::Invalid { ref values, .. } if values == &vec!["USA".to_owned(), "1X".to_owned()]
        ));
    }

    #[test]
    fn language_and_source_aliases_normalize() {
        let languages = FieldName::Language.spec().parse_value("eng, FR, klingon").expect("langs");
        assert_eq!(
            languages,
            FieldValue::List(vec!["English".into(), "French".into(), "Klingon".into()])
        );
        let sources = FieldName::Sources.spec().parse_value("fb|dv 360|Native Ads").expect("src");
        assert_eq!(
            sources,
            FieldValue::List(vec!["Facebook".into(), "Google DV360".into(), "Native Ads".into()])
        );
    }

    #[test]
    fn money_accepts_currency_markers_and_rejects_non_positive() {
        let spec = FieldName::Cpa.spec();
        assert_eq!(spec.parse_value("$1200").expect("money"), FieldValue::Money(Decimal::new(1200, 0)));
        assert_eq!(spec.parse_value("15.50 USD").expect("money"), FieldValue::Money(Decimal::new(155, 1)));
        assert!(matches!(spec.parse_value("0"), Err(ValueError::Invalid { .. })));
        assert!(matches!(spec.parse_value("cheap"), Err(ValueError::Invalid { .. })));
    }

    #[test]
    fn ratio_reads_percentages_above_one() {
        let spec = FieldName::Crg.spec();
        assert_eq!(spec.parse_value("10%").expect("pct"), FieldValue::Ratio(Decimal::new(1, 1)));
        assert_eq!(spec.parse_value("0.1").expect("ratio"), FieldValue::Ratio(Decimal::new(1, 1)));
        assert!(matches!(spec.parse_value("150"), Err(ValueError::Invalid { .. })));
    }

    #[test]
    fn placeholder_single_value_is_empty() {
        assert_eq!(FieldName::Cpl.spec().parse_value(" & "), Err(ValueError::Empty));
    }

    #[test]
    fn field_keys_collapse_separators() {
        assert_eq!(normalize_field_key("  Deduction__Limit "), "deduction limit");
    }
}
