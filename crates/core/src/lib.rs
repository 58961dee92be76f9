pub mod config;
pub mod domain;
pub mod errors;
pub mod grammar;
pub mod intake;
pub mod pricing;
pub mod report;
pub mod tokenizer;
pub mod validator;

pub use domain::deal::{DealOutcome, DealRecord, FieldValue};
pub use domain::feedback::{FieldError, FieldErrorKind};
pub use errors::{ApplicationError, DomainError, InterfaceError};
pub use grammar::{Cardinality, FieldName, FieldSpec, Grammar, GrammarError, ValueSyntax};
pub use intake::{parse_and_validate, DealIntake, IntakeConfig, IntakeError};
pub use pricing::{ModelResolution, PricingModel};
pub use report::{aggregate, SubmissionReport};
pub use tokenizer::{DealDelimiter, DealTokenizer, RawDealBlock, RawField};
pub use validator::Validator;
