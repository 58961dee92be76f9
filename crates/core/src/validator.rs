use std::collections::BTreeMap;

use crate::domain::deal::{DealOutcome, DealRecord};
use crate::domain::feedback::FieldError;
use crate::grammar::{split_multi_value, FieldName, Grammar, ValueError};
use crate::pricing::{self, ModelResolution, PRICING_FIELDS};
use crate::tokenizer::RawDealBlock;

/// Applies the field grammar and pricing-model rules to one deal block.
///
/// Errors are reported in detection order:
/// 1. duplicate declarations, once per field in first-seen order
/// 2. unknown fields and unparsed lines, in line order
/// 3. missing or malformed fields in grammar order, the model slot carrying
///    the resolver's error
/// 4. fields forbidden by the resolved model
///
/// An ambiguous model short-circuits and is the only error reported. A
/// repeated model is left to the resolver, so agreeing repeats raise no
/// duplicate error. Duplicates of unknown names follow the unknown-field
/// strictness: errors when strict, warnings otherwise.
#[derive(Clone, Copy, Debug)]
pub struct Validator<'g> {
    grammar: &'g Grammar,
    strict_unknown_fields: bool,
}

struct Declaration<'a> {
    value: &'a str,
    occurrences: usize,
}

struct UnknownName {
    key: String,
    name: String,
    occurrences: usize,
}

enum SeenName {
    Known(FieldName),
    Unknown(usize),
}

impl<'g> Validator<'g> {
    pub fn new(grammar: &'g Grammar, strict_unknown_fields: bool) -> Self {
        Self { grammar, strict_unknown_fields }
    }

    pub fn validate(&self, block: &RawDealBlock<'_>) -> DealOutcome {
        let mut declared: BTreeMap<FieldName, Declaration<'_>> = BTreeMap::new();
        let mut first_seen: Vec<SeenName> = Vec::new();
        let mut unknown: Vec<(usize, FieldError)> = Vec::new();
        let mut unknown_names: Vec<UnknownName> = Vec::new();

        for field in &block.fields {
            match self.grammar.lookup(field.name) {
                Ok(spec) => {
                    let entry = declared.entry(spec.name).or_insert_with(|| {
                        first_seen.push(SeenName::Known(spec.name));
                        Declaration { value: field.value, occurrences: 0 }
                    });
                    entry.occurrences += 1;
                }
                Err(error) => {
                    let key = error.name.to_lowercase();
                    match unknown_names.iter_mut().find(|seen| seen.key == key) {
                        Some(seen) => seen.occurrences += 1,
                        None => {
                            first_seen.push(SeenName::Unknown(unknown_names.len()));
                            unknown.push((field.line, FieldError::unknown_field(&error.name)));
                            unknown_names.push(UnknownName {
                                key,
                                name: error.name,
                                occurrences: 1,
                            });
                        }
                    }
                }
            }
        }
        for line in &block.unparsed {
            unknown.push((line.line, FieldError::unparsed_line(line.line, line.text)));
        }
        unknown.sort_by_key(|(line, _)| *line);
        let unknown = unknown.into_iter().map(|(_, error)| error).collect::<Vec<_>>();

        // The resolver owns repeated model declarations.
        let mut duplicates = Vec::new();
        let mut unknown_duplicates = Vec::new();
        for seen in &first_seen {
            match seen {
                SeenName::Known(FieldName::Model) => {}
                SeenName::Known(name) => {
                    let occurrences = declared.get(name).map_or(0, |entry| entry.occurrences);
                    if occurrences > 1 {
                        duplicates.push(FieldError::duplicate(name.as_str(), occurrences));
                    }
                }
                SeenName::Unknown(position) => {
                    let seen = &unknown_names[*position];
                    if seen.occurrences > 1 {
                        let error = FieldError::duplicate(&seen.name, seen.occurrences);
                        if self.strict_unknown_fields {
                            duplicates.push(error);
                        } else {
                            unknown_duplicates.push(error);
                        }
                    }
                }
            }
        }

        let warnings = if self.strict_unknown_fields {
            Vec::new()
        } else {
            unknown_duplicates.into_iter().chain(unknown.iter().cloned()).collect()
        };

        let resolution = pricing::resolve(block, self.grammar);
        if let ModelResolution::Unresolved(error) = &resolution {
            if error.kind.is_ambiguous() {
                return DealOutcome::Invalid {
                    index: block.index,
                    source_text: block.text.to_owned(),
                    errors: vec![error.clone()],
                    warnings,
                };
            }
        }
        let model = resolution.model();

        let mut errors = duplicates;
        if self.strict_unknown_fields {
            errors.extend(unknown);
        }

        let mut values = BTreeMap::new();
        for spec in self.grammar.specs() {
            if spec.name == FieldName::Model {
                if let ModelResolution::Unresolved(error) = &resolution {
                    errors.push(error.clone());
                }
                continue;
            }

            let required = if PRICING_FIELDS.contains(&spec.name) {
                match model {
                    Some(model) if model.forbids(spec.name) => continue,
                    Some(model) => model.requires(spec.name),
                    None => continue,
                }
            } else {
                spec.required
            };

            let Some(declaration) = declared.get(&spec.name) else {
                if required {
                    errors.push(FieldError::missing(spec.name));
                }
                continue;
            };

            match spec.parse_value(declaration.value) {
                Ok(value) => {
                    values.insert(spec.name, value);
                }
                Err(ValueError::Empty) => {
                    if required {
                        errors.push(FieldError::missing(spec.name));
                    }
                }
                Err(ValueError::Invalid { values, expected }) => {
                    errors.push(FieldError::malformed(spec.name, &values, expected));
                }
            }
        }

        if let Some(model) = model {
            for (name, declaration) in &declared {
                let has_content = split_multi_value(declaration.value).next().is_some();
                if model.forbids(*name) && has_content {
                    errors.push(FieldError::forbidden(*name, model.label()));
                }
            }
        }

        match model {
            Some(model) if errors.is_empty() => DealOutcome::Valid {
                index: block.index,
                record: DealRecord::new(model, values),
                warnings,
            },
            _ => DealOutcome::Invalid {
                index: block.index,
                source_text: block.text.to_owned(),
                errors,
                warnings,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use super::Validator;
    use crate::domain::deal::{DealOutcome, FieldValue};
    use crate::domain::feedback::FieldErrorKind;
    use crate::grammar::{FieldName, Grammar};
    use crate::pricing::PricingModel;
    use crate::tokenizer::{DealDelimiter, DealTokenizer};

    const VALID_CPA_CRG: &str = "Partner: Acme\nGEO: US, CA\nLanguage: en\nSources: fb\n\
Model: CPA/CRG\nCPA: 1200\nCRG: 10%\nFunnels: crypto";

    fn validate(text: &str, strict: bool) -> DealOutcome {
        let grammar = Grammar::default();
        let block = DealTokenizer::new(text, &DealDelimiter::BlankLine).next().expect("block");
        Validator::new(&grammar, strict).validate(&block)
    }

    fn kinds(outcome: &DealOutcome) -> Vec<(String, FieldErrorKind)> {
        outcome.errors().iter().map(|error| (error.field.clone(), error.kind)).collect()
    }

    #[test]
    fn valid_cpa_crg_deal_produces_typed_record() {
        let outcome = validate(VALID_CPA_CRG, false);
        let record = outcome.record().expect("valid record");

        assert_eq!(record.model(), PricingModel::CpaCrg);
        assert_eq!(record.partner(), "Acme");
        assert_eq!(record.list(FieldName::Geo), ["US".to_owned(), "CA".to_owned()]);
        assert_eq!(record.list(FieldName::Language), ["English".to_owned()]);
        assert_eq!(record.get(FieldName::Crg), Some(&FieldValue::Ratio(Decimal::new(1, 1))));
        assert!(outcome.warnings().is_empty());
    }

    #[test]
    fn every_missing_common_field_is_reported_once_in_grammar_order() {
        let outcome = validate("Model: CPL\nCPL: 20", false);
        assert_eq!(
            kinds(&outcome),
            vec![
                ("Partner".to_owned(), FieldErrorKind::Missing),
                ("GEO".to_owned(), FieldErrorKind::Missing),
                ("Language".to_owned(), FieldErrorKind::Missing),
                ("Sources".to_owned(), FieldErrorKind::Missing),
                ("Funnels".to_owned(), FieldErrorKind::Missing),
            ]
        );
    }

    #[test]
    fn forbidden_field_alone_invalidates_an_otherwise_valid_deal() {
        let outcome = validate(&format!("{VALID_CPA_CRG}\nCPL: 15"), false);
        assert_eq!(kinds(&outcome), vec![("CPL".to_owned(), FieldErrorKind::Forbidden)]);
    }

    #[test]
    fn placeholder_for_forbidden_field_is_ignored() {
        let outcome = validate(&format!("{VALID_CPA_CRG}\nCPL: &"), false);
        assert!(outcome.is_valid());
    }

    #[test]
    fn unknown_model_skips_pricing_checks() {
        let outcome = validate(
            "Partner: Acme\nGEO: US\nLanguage: en\nSources: fb\nModel: cpx\nFunnels: x\nCPL: abc",
            false,
        );
        assert_eq!(kinds(&outcome), vec![("Model".to_owned(), FieldErrorKind::Malformed)]);
    }

    #[test]
    fn ambiguous_model_is_the_only_error() {
        let outcome = validate("Model: CPA\nModel: CPL\nGEO: nowhere", false);
        assert_eq!(
            kinds(&outcome),
            vec![("Model".to_owned(), FieldErrorKind::AmbiguousPricingModel)]
        );
    }

    #[test]
    fn duplicates_come_first_and_keep_first_value() {
        let outcome = validate(&format!("{VALID_CPA_CRG}\ncountry: DE\nPartner: Other"), false);
        assert_eq!(
            kinds(&outcome),
            vec![
                ("Partner".to_owned(), FieldErrorKind::DuplicateDeclaration),
                ("GEO".to_owned(), FieldErrorKind::DuplicateDeclaration),
            ]
        );
    }

    #[test]
    fn malformed_values_are_quoted_and_ordered_by_grammar() {
        let outcome = validate(
            "Funnels: x\nCPA: free\nGEO: USA\nPartner: Acme\nLanguage: en\nSources: fb\nModel: CPA",
            false,
        );
        assert_eq!(
            kinds(&outcome),
            vec![
                ("GEO".to_owned(), FieldErrorKind::Malformed),
                ("CPA".to_owned(), FieldErrorKind::Malformed),
            ]
        );
        assert!(outcome.errors()[0].message.contains("\"USA\""));
    }

    #[test]
    fn unknown_fields_warn_unless_strict() {
        let text = format!("{VALID_CPA_CRG}\nLanding: https://example.test\nfree note");

        let lenient = validate(&text, false);
        assert!(lenient.is_valid());
        assert_eq!(lenient.warnings().len(), 2);
        assert_eq!(lenient.warnings()[0].field, "Landing");
        assert_eq!(lenient.warnings()[1].field, "line 10");

        let strict = validate(&text, true);
        assert_eq!(
            kinds(&strict),
            vec![
                ("Landing".to_owned(), FieldErrorKind::UnknownField),
                ("line 10".to_owned(), FieldErrorKind::UnknownField),
            ]
        );
    }

    #[test]
    fn repeated_unknown_name_is_a_duplicate_that_follows_strictness() {
        let text = format!("{VALID_CPA_CRG}\nNote: a\nnote: b");

        let strict = validate(&text, true);
        assert_eq!(
            kinds(&strict),
            vec![
                ("Note".to_owned(), FieldErrorKind::DuplicateDeclaration),
                ("Note".to_owned(), FieldErrorKind::UnknownField),
            ]
        );

        let lenient = validate(&text, false);
        assert!(lenient.is_valid());
        let warnings: Vec<FieldErrorKind> =
            lenient.warnings().iter().map(|warning| warning.kind).collect();
        assert_eq!(
            warnings,
            vec![FieldErrorKind::DuplicateDeclaration, FieldErrorKind::UnknownField]
        );
    }

    #[test]
    fn duplicates_of_known_and_unknown_names_keep_first_seen_order() {
        let text = format!("Note: a\n{VALID_CPA_CRG}\nNote: b\nPartner: Other");
        let outcome = validate(&text, true);
        assert_eq!(
            kinds(&outcome)[..2],
            [
                ("Note".to_owned(), FieldErrorKind::DuplicateDeclaration),
                ("Partner".to_owned(), FieldErrorKind::DuplicateDeclaration),
            ]
        );
    }

    #[test]
    fn agreeing_model_repeats_are_not_duplicates() {
        let outcome = validate(&format!("{VALID_CPA_CRG}\nModel: cpa_crg"), false);
        assert!(outcome.is_valid());
    }

    #[test]
    fn missing_model_is_reported_in_its_slot_and_skips_pricing_checks() {
        let outcome = validate(
            "Partner: Acme\nGEO: US\nLanguage: en\nSources: fb\nCPA: abc\nFunnels: x",
            false,
        );
        assert_eq!(kinds(&outcome), vec![("Model".to_owned(), FieldErrorKind::Missing)]);

        let outcome = validate("GEO: US\nCPA: abc", false);
        assert_eq!(
            kinds(&outcome),
            vec![
                ("Partner".to_owned(), FieldErrorKind::Missing),
                ("Language".to_owned(), FieldErrorKind::Missing),
                ("Sources".to_owned(), FieldErrorKind::Missing),
                ("Model".to_owned(), FieldErrorKind::Missing),
                ("Funnels".to_owned(), FieldErrorKind::Missing),
            ]
        );
    }

    #[test]
    fn empty_optional_field_is_treated_as_absent() {
        let outcome = validate(&format!("{VALID_CPA_CRG}\nDeduction: &\nRegion:"), false);
        let record = outcome.record().expect("valid");
        assert!(record.get(FieldName::Deduction).is_none());
        assert!(record.get(FieldName::Region).is_none());
    }
}
