use dealdesk_core::{ApplicationError, SubmissionReport};
use serde::Serialize;
use tracing::{info, warn};

use super::DealStore;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StoreReceipt {
    Stored { index: usize, partner: String, id: String, url: Option<String> },
    StoreWriteFailed { index: usize, partner: String, message: String },
}

impl StoreReceipt {
    pub fn index(&self) -> usize {
        match self {
            Self::Stored { index, .. } | Self::StoreWriteFailed { index, .. } => *index,
        }
    }

    pub fn partner(&self) -> &str {
        match self {
            Self::Stored { partner, .. } | Self::StoreWriteFailed { partner, .. } => partner,
        }
    }

    pub fn is_stored(&self) -> bool {
        matches!(self, Self::Stored { .. })
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SubmissionReceipt {
    pub receipts: Vec<StoreReceipt>,
    pub stored_count: usize,
    pub failed_count: usize,
}

impl SubmissionReceipt {
    pub fn is_empty(&self) -> bool {
        self.receipts.is_empty()
    }

    pub fn failures(&self) -> impl Iterator<Item = ApplicationError> + '_ {
        self.receipts.iter().filter_map(|receipt| match receipt {
            StoreReceipt::StoreWriteFailed { index, message, .. } => {
                Some(ApplicationError::StoreWriteFailed { index: *index, message: message.clone() })
            }
            StoreReceipt::Stored { .. } => None,
        })
    }
}

/// Writes every valid record of `report`, in deal order.
///
/// A failed write never stops the batch; it is recorded as
/// `StoreWriteFailed` next to the deal's index.
pub async fn submit_report(store: &dyn DealStore, report: &SubmissionReport) -> SubmissionReceipt {
    let mut receipt = SubmissionReceipt::default();

    for (index, record) in report.valid_records() {
        let partner = record.partner().to_owned();
        match store.write_deal(record).await {
            Ok(stored) => {
                info!(
                    event_name = "store.deal.written",
                    backend = store.backend(),
                    deal_index = index,
                    entry_id = %stored.id,
                );
                receipt.stored_count += 1;
                receipt.receipts.push(StoreReceipt::Stored {
                    index,
                    partner,
                    id: stored.id,
                    url: stored.url,
                });
            }
            Err(error) => {
                warn!(
                    event_name = "store.deal.write_failed",
                    backend = store.backend(),
                    deal_index = index,
                    error = %error,
                );
                receipt.failed_count += 1;
                receipt.receipts.push(StoreReceipt::StoreWriteFailed {
                    index,
                    partner,
                    message: error.to_string(),
                });
            }
        }
    }

    receipt
}

#[cfg(test)]
mod tests {
    use dealdesk_core::{parse_and_validate, ApplicationError, IntakeConfig};

    use super::{submit_report, StoreReceipt};
    use crate::InMemoryDealStore;

    const SUBMISSION: &str = "\
Partner: Good Co
GEO: US
Language: en
Sources: fb
Model: CPL
CPL: 20
Funnels: x

Partner: Broken
GEO: US

Partner: Bad Co
GEO: DE
Language: de
Sources: gg
Model: CPA
CPA: 900
Funnels: y
";

    #[tokio::test]
    async fn only_valid_deals_are_written_and_failures_do_not_stop_the_batch() {
        let report = parse_and_validate(SUBMISSION, &IntakeConfig::default()).expect("report");
        let store = InMemoryDealStore::default();
        store.reject_partner("Bad Co").await;

        let receipt = submit_report(&store, &report).await;

        assert_eq!(receipt.stored_count, 1);
        assert_eq!(receipt.failed_count, 1);
        assert_eq!(receipt.receipts.len(), 2);
        assert!(matches!(receipt.receipts[0], StoreReceipt::Stored { index: 1, .. }));
        assert_eq!(receipt.receipts[1].index(), 3);
        assert_eq!(receipt.receipts[1].partner(), "Bad Co");

        let failures: Vec<ApplicationError> = receipt.failures().collect();
        assert!(matches!(failures[..], [ApplicationError::StoreWriteFailed { index: 3, .. }]));
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn report_without_valid_deals_writes_nothing() {
        let report = parse_and_validate("Partner: Broken", &IntakeConfig::default()).expect("ok");
        let store = InMemoryDealStore::default();

        let receipt = submit_report(&store, &report).await;
        assert!(receipt.is_empty());
        assert!(store.is_empty().await);
    }
}
