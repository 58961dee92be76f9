//! Notion offers database client.
//!
//! Each valid deal becomes a page in the offers database, linked to its
//! advertiser page. Advertisers are looked up by title and created on first
//! use. All requests share one pacing gate so consecutive calls are at least
//! `min_request_interval_ms` apart.

use std::time::Duration;

use async_trait::async_trait;
use dealdesk_core::config::{SellingMarkups, StoreConfig};
use dealdesk_core::{DealRecord, FieldName};
use reqwest::{Client, RequestBuilder};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use secrecy::{ExposeSecret, SecretString};
use serde_json::{json, Map, Value};
use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use super::{DealStore, StoreError, StoredDeal};

const TITLE_PROPERTY: &str = "GEO-Funnel Code";
const STATUS_PROPERTY: &str = "Active Status";
const ADVERTISER_RELATION_PROPERTY: &str = "⚡ ALL ADVERTISERS | Kitchen";

#[derive(Clone, Debug)]
pub struct NotionSettings {
    pub base_url: String,
    pub api_version: String,
    pub api_token: SecretString,
    pub offers_database_id: String,
    pub advertisers_database_id: String,
    pub timeout: Duration,
    pub min_request_interval: Duration,
    pub markups: SellingMarkups,
}

impl NotionSettings {
    pub fn from_config(config: &StoreConfig) -> Result<Self, StoreError> {
        let api_token = config
            .api_token
            .clone()
            .ok_or_else(|| StoreError::Configuration("store.api_token is not set".to_owned()))?;
        let offers_database_id = config.offers_database_id.clone().ok_or_else(|| {
            StoreError::Configuration("store.offers_database_id is not set".to_owned())
        })?;
        let advertisers_database_id = config.advertisers_database_id.clone().ok_or_else(|| {
            StoreError::Configuration("store.advertisers_database_id is not set".to_owned())
        })?;

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_owned(),
            api_version: config.api_version.clone(),
            api_token,
            offers_database_id,
            advertisers_database_id,
            timeout: Duration::from_secs(config.timeout_secs),
            min_request_interval: Duration::from_millis(config.min_request_interval_ms),
            markups: config.markups,
        })
    }
}

pub struct NotionDealStore {
    client: Client,
    settings: NotionSettings,
    last_request: Mutex<Option<Instant>>,
}

impl NotionDealStore {
    pub fn from_config(config: &StoreConfig) -> Result<Self, StoreError> {
        Self::new(NotionSettings::from_config(config)?)
    }

    pub fn new(settings: NotionSettings) -> Result<Self, StoreError> {
        let client = Client::builder()
            .timeout(settings.timeout)
            .build()
            .map_err(|error| StoreError::Configuration(error.to_string()))?;
        Ok(Self { client, settings, last_request: Mutex::new(None) })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/v1/{path}", self.settings.base_url)
    }

    /// Waits until the configured interval has passed since the previous
    /// request. Holding the lock across the sleep serializes callers.
    async fn pace(&self) {
        let mut last = self.last_request.lock().await;
        if let Some(previous) = *last {
            let elapsed = previous.elapsed();
            if elapsed < self.settings.min_request_interval {
                sleep(self.settings.min_request_interval - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }

    async fn send(&self, request: RequestBuilder) -> Result<Value, StoreError> {
        self.pace().await;

        let response = request
            .bearer_auth(self.settings.api_token.expose_secret())
            .header("Notion-Version", &self.settings.api_version)
            .send()
            .await
            .map_err(|error| StoreError::Transport(error.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StoreError::Rejected {
                status: status.as_u16(),
                message: error_message(&body),
            });
        }

        response.json::<Value>().await.map_err(|error| StoreError::Decode(error.to_string()))
    }

    async fn find_advertiser(&self, name: &str) -> Result<Option<String>, StoreError> {
        let url = self.url(&format!("databases/{}/query", self.settings.advertisers_database_id));
        let body = json!({
            "filter": { "property": "title", "title": { "equals": name } },
            "page_size": 1
        });
        let payload = self.send(self.client.post(url).json(&body)).await?;

        Ok(payload
            .get("results")
            .and_then(Value::as_array)
            .and_then(|results| results.first())
            .and_then(|page| page.get("id"))
            .and_then(Value::as_str)
            .map(str::to_owned))
    }

    async fn create_advertiser(&self, name: &str) -> Result<String, StoreError> {
        let body = json!({
            "parent": { "database_id": self.settings.advertisers_database_id },
            "properties": { "title": { "title": [{ "text": { "content": name } }] } }
        });
        let payload = self.send(self.client.post(self.url("pages")).json(&body)).await?;
        page_id(&payload)
    }

    async fn advertiser_id(&self, name: &str) -> Result<String, StoreError> {
        if let Some(id) = self.find_advertiser(name).await? {
            debug!(event_name = "store.notion.advertiser_found", advertiser = %name, page_id = %id);
            return Ok(id);
        }
        let id = self.create_advertiser(name).await?;
        info!(event_name = "store.notion.advertiser_created", advertiser = %name, page_id = %id);
        Ok(id)
    }
}

#[async_trait]
impl DealStore for NotionDealStore {
    fn backend(&self) -> &'static str {
        "notion"
    }

    async fn write_deal(&self, record: &DealRecord) -> Result<StoredDeal, StoreError> {
        let advertiser_id = self.advertiser_id(record.partner()).await?;
        let properties = offer_properties(record, &advertiser_id, &self.settings.markups)?;
        let body = json!({
            "parent": { "database_id": self.settings.offers_database_id },
            "properties": properties,
        });

        let payload = self.send(self.client.post(self.url("pages")).json(&body)).await?;
        let id = page_id(&payload)?;
        let url = payload.get("url").and_then(Value::as_str).map(str::to_owned);
        info!(
            event_name = "store.notion.offer_created",
            partner = %record.partner(),
            page_id = %id,
            "offer page created"
        );
        Ok(StoredDeal { id, url })
    }

    async fn health(&self) -> Result<(), StoreError> {
        let url = self.url(&format!("databases/{}", self.settings.offers_database_id));
        match self.send(self.client.get(url)).await {
            Ok(_) => Ok(()),
            Err(error) => {
                warn!(event_name = "store.notion.health_failed", error = %error);
                Err(error)
            }
        }
    }
}

fn page_id(payload: &Value) -> Result<String, StoreError> {
    payload
        .get("id")
        .and_then(Value::as_str)
        .map(str::to_owned)
        .ok_or_else(|| StoreError::Decode("response has no page id".to_owned()))
}

fn error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|value| value.get("message").and_then(Value::as_str).map(str::to_owned))
        .unwrap_or_else(|| body.chars().take(200).collect())
}

/// Maps a record onto the offers database schema.
///
/// Buying prices are copied as-is and selling prices are buying plus the
/// configured markup. Absent pricing fields produce no property. A selling
/// price outside the decimal range rejects the record.
pub fn offer_properties(
    record: &DealRecord,
    advertiser_id: &str,
    markups: &SellingMarkups,
) -> Result<Value, StoreError> {
    let mut properties = Map::new();

    properties.insert(
        TITLE_PROPERTY.to_owned(),
        json!({ "title": [{ "text": { "content": offer_title(record) } }] }),
    );
    properties.insert(STATUS_PROPERTY.to_owned(), json!({ "select": { "name": "Active" } }));

    for field in [FieldName::Language, FieldName::Sources, FieldName::Funnels] {
        let options: Vec<Value> =
            record.list(field).iter().map(|name| json!({ "name": name })).collect();
        properties.insert(field.as_str().to_owned(), json!({ "multi_select": options }));
    }

    let priced = [
        (FieldName::Cpa, "CPA | Buying", "CPA | Network | Selling", markups.cpa),
        (FieldName::Crg, "CRG | Buying", "CRG | Network | Selling", markups.crg),
        (FieldName::Cpl, "CPL | Buying", "CPL | Network | Selling", markups.cpl),
    ];
    for (field, buying, selling, markup) in priced {
        if let Some(amount) = record.decimal(field) {
            let selling_price = amount.checked_add(markup).ok_or_else(|| {
                StoreError::InvalidRecord(format!(
                    "{field} {amount} plus the {markup} markup is out of range"
                ))
            })?;
            properties.insert(buying.to_owned(), number(amount));
            properties.insert(selling.to_owned(), number(selling_price));
        }
    }

    if let Some(deduction) = record.decimal(FieldName::Deduction) {
        properties.insert("Deduction %".to_owned(), number(deduction));
    }

    properties.insert(
        ADVERTISER_RELATION_PROPERTY.to_owned(),
        json!({ "relation": [{ "id": advertiser_id }] }),
    );

    Ok(Value::Object(properties))
}

/// `"{GEO} {Language}-{Partner}-{Sources}"`, list values joined with `|`.
pub fn offer_title(record: &DealRecord) -> String {
    format!(
        "{} {}-{}-{}",
        record.list(FieldName::Geo).join("|"),
        record.list(FieldName::Language).join("|"),
        record.partner(),
        record.list(FieldName::Sources).join("|"),
    )
}

fn number(value: Decimal) -> Value {
    match value.normalize().to_f64() {
        Some(number) => json!({ "number": number }),
        None => json!({ "number": Value::Null }),
    }
}
