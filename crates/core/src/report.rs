use serde::Serialize;

use crate::domain::deal::{DealOutcome, DealRecord};

/// Per-submission result: one outcome per detected deal block, in input
/// order.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SubmissionReport {
    pub outcomes: Vec<DealOutcome>,
    pub valid_count: usize,
    pub invalid_count: usize,
}

pub fn aggregate(outcomes: impl IntoIterator<Item = DealOutcome>) -> SubmissionReport {
    outcomes.into_iter().collect()
}

impl FromIterator<DealOutcome> for SubmissionReport {
    fn from_iter<I: IntoIterator<Item = DealOutcome>>(iter: I) -> Self {
        let outcomes: Vec<DealOutcome> = iter.into_iter().collect();
        let valid_count = outcomes.iter().filter(|outcome| outcome.is_valid()).count();
        let invalid_count = outcomes.len() - valid_count;
        Self { outcomes, valid_count, invalid_count }
    }
}

impl SubmissionReport {
    pub fn total(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    pub fn all_valid(&self) -> bool {
        !self.is_empty() && self.invalid_count == 0
    }

    /// Valid records paired with their 1-based deal index.
    pub fn valid_records(&self) -> impl Iterator<Item = (usize, &DealRecord)> {
        self.outcomes.iter().filter_map(|outcome| outcome.record().map(|r| (outcome.index(), r)))
    }

    pub fn invalid(&self) -> impl Iterator<Item = &DealOutcome> {
        self.outcomes.iter().filter(|outcome| !outcome.is_valid())
    }
}
