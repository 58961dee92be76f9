//! Document-store adapter for validated deals.
//!
//! The [`DealStore`] trait is the seam between the submission flow and the
//! backing database. [`notion::NotionDealStore`] writes offers into a Notion
//! database; [`memory::InMemoryDealStore`] backs tests and dry runs.

use std::sync::Arc;

use async_trait::async_trait;
use dealdesk_core::config::{StoreBackend, StoreConfig};
use dealdesk_core::DealRecord;
use serde::Serialize;
use thiserror::Error;

pub mod memory;
pub mod notion;
pub mod submit;

pub use memory::InMemoryDealStore;
pub use notion::NotionDealStore;
pub use submit::{submit_report, StoreReceipt, SubmissionReceipt};

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct StoredDeal {
    pub id: String,
    pub url: Option<String>,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("store request failed: {0}")]
    Transport(String),
    #[error("store rejected the request with HTTP {status}: {message}")]
    Rejected { status: u16, message: String },
    #[error("could not decode store response: {0}")]
    Decode(String),
    #[error("store is not configured: {0}")]
    Configuration(String),
    #[error("store is unavailable: {0}")]
    Unavailable(String),
    #[error("deal cannot be stored: {0}")]
    InvalidRecord(String),
}

#[async_trait]
pub trait DealStore: Send + Sync {
    fn backend(&self) -> &'static str;

    /// Writes one validated deal as a new entry.
    async fn write_deal(&self, record: &DealRecord) -> Result<StoredDeal, StoreError>;

    async fn health(&self) -> Result<(), StoreError>;
}

/// Builds the store selected by `[store].backend`.
pub fn build_store(config: &StoreConfig) -> Result<Arc<dyn DealStore>, StoreError> {
    match config.backend {
        StoreBackend::Notion => Ok(Arc::new(NotionDealStore::from_config(config)?)),
        StoreBackend::Memory => Ok(Arc::new(InMemoryDealStore::default())),
    }
}
