use std::collections::HashSet;

use async_trait::async_trait;
use dealdesk_core::DealRecord;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{DealStore, StoreError, StoredDeal};

/// Keeps written deals in memory. Writes for partners registered with
/// [`InMemoryDealStore::reject_partner`] fail, which lets callers exercise
/// partial submission failures.
#[derive(Default)]
pub struct InMemoryDealStore {
    deals: RwLock<Vec<(String, DealRecord)>>,
    rejected_partners: RwLock<HashSet<String>>,
    unavailable: RwLock<bool>,
}

impl InMemoryDealStore {
    pub async fn reject_partner(&self, partner: impl Into<String>) {
        self.rejected_partners.write().await.insert(partner.into());
    }

    pub async fn set_unavailable(&self, unavailable: bool) {
        *self.unavailable.write().await = unavailable;
    }

    pub async fn stored(&self) -> Vec<(String, DealRecord)> {
        self.deals.read().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.deals.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.deals.read().await.is_empty()
    }
}

#[async_trait]
impl DealStore for InMemoryDealStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn write_deal(&self, record: &DealRecord) -> Result<StoredDeal, StoreError> {
        if *self.unavailable.read().await {
            return Err(StoreError::Unavailable("in-memory store switched off".to_owned()));
        }
        if self.rejected_partners.read().await.contains(record.partner()) {
            return Err(StoreError::Rejected {
                status: 400,
                message: format!("partner `{}` rejected", record.partner()),
            });
        }

        let id = Uuid::new_v4().to_string();
        self.deals.write().await.push((id.clone(), record.clone()));
        Ok(StoredDeal { id, url: None })
    }

    async fn health(&self) -> Result<(), StoreError> {
        if *self.unavailable.read().await {
            return Err(StoreError::Unavailable("in-memory store switched off".to_owned()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use dealdesk_core::{parse_and_validate, IntakeConfig};

    use super::InMemoryDealStore;
    use crate::{DealStore, StoreError};

    fn record(partner: &str) -> dealdesk_core::DealRecord {
        let text = format!(
            "Partner: {partner}\nGEO: US\nLanguage: en\nSources: fb\nModel: CPL\nCPL: 20\nFunnels: x"
        );
        let report = parse_and_validate(&text, &IntakeConfig::default()).expect("report");
        report.outcomes[0].record().cloned().expect("valid record")
    }

    #[tokio::test]
    async fn stores_records_with_fresh_ids() {
        let store = InMemoryDealStore::default();
        let first = store.write_deal(&record("Acme")).await.expect("write");
        let second = store.write_deal(&record("Acme")).await.expect("write");

        assert_ne!(first.id, second.id);
        assert_eq!(store.len().await, 2);
    }

    #[tokio::test]
    async fn rejected_partner_and_outage_fail_writes() {
        let store = InMemoryDealStore::default();
        store.reject_partner("Bad Co").await;

        assert!(matches!(
            store.write_deal(&record("Bad Co")).await,
            Err(StoreError::Rejected { status: 400, .. })
        ));

        store.set_unavailable(true).await;
        assert!(store.health().await.is_err());
        assert!(matches!(
            store.write_deal(&record("Acme")).await,
            Err(StoreError::Unavailable(_))
        ));
        assert!(store.is_empty().await);
    }
}
