//! Paginated newest-first walk of the remote activity feed.
//!
//! The endpoint answers a JSON POST with up to one page of records sorted
//! newest-first, bounded above by `maxTimestampMs`. The walk re-issues the
//! request with a descending cursor until it reaches the caller's lookback
//! floor, persisting each page atomically. Any fetch failure ends the walk
//! cleanly; committed pages survive and an idempotent re-run is the retry
//! strategy.

use crate::FeedError;
use crate::normalize::normalize_record;
use fieldlapse_core::{Action, PortalRecord};
use fieldlapse_storage::HistoryStore;
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Delay between page fetches, keeping the walk polite to the upstream.
pub const DEFAULT_PAGE_DELAY: Duration = Duration::from_millis(1_500);

/// Per-request timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Connection settings for the feed endpoint.
#[derive(Debug, Clone)]
pub struct FeedConfig {
    /// POST endpoint answering plext pages.
    pub endpoint: String,
    /// Opaque request body captured from a prior request; the walk only
    /// overrides its paging fields.
    pub base_payload: Value,
    pub page_delay: Duration,
    pub request_timeout: Duration,
}

impl FeedConfig {
    #[must_use]
    pub fn new(endpoint: impl Into<String>, base_payload: Value) -> Self {
        Self {
            endpoint: endpoint.into(),
            base_payload,
            page_delay: DEFAULT_PAGE_DELAY,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

/// Counters reported after an ingest run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestSummary {
    pub pages: usize,
    pub records_seen: usize,
    pub records_dropped: usize,
    pub actions_stored: usize,
    pub portals_stored: usize,
    pub oldest_reached_ms: Option<i64>,
}

/// Normalized content of one raw page.
#[derive(Debug, Default)]
pub struct PageNormalization {
    pub actions: Vec<Action>,
    pub portals: Vec<PortalRecord>,
    pub dropped: usize,
}

/// Echo the opaque base payload with the three paging fields overridden.
#[must_use]
pub fn build_page_request(base: &Value, cursor_ms: i64) -> Value {
    let mut body = base.clone();
    if let Value::Object(map) = &mut body {
        map.insert("minTimestampMs".to_string(), json!(-1));
        map.insert("maxTimestampMs".to_string(), json!(cursor_ms));
        map.insert("plextContinuationGuid".to_string(), json!(""));
    }
    body
}

/// Normalize every record of a raw page. Drop-rule hits and unreadable
/// records are counted, never fatal.
#[must_use]
pub fn normalize_page(records: &[Value]) -> PageNormalization {
    let mut page = PageNormalization::default();
    for record in records {
        match normalize_record(record) {
            Ok(Some(event)) => {
                page.actions.push(event.action);
                page.portals.extend(event.portals);
            }
            Ok(None) => page.dropped += 1,
            Err(err) => {
                debug!(%err, "unreadable record dropped");
                page.dropped += 1;
            }
        }
    }
    page
}

/// Drives the paginated fetch until the lookback floor is reached.
pub struct Ingester {
    client: reqwest::Client,
    config: FeedConfig,
    stop: Arc<AtomicBool>,
}

impl Ingester {
    /// Build an ingester and its HTTP client.
    pub fn new(config: FeedConfig) -> Result<Self, FeedError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self {
            client,
            config,
            stop: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Shared flag that ends the walk between pages when set.
    #[must_use]
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    /// Walk pages from `start_ms` down to `stop_before_ms`, persisting each
    /// page into `store`. Fetch failures end the walk with whatever is
    /// committed; storage failures propagate.
    pub async fn run(
        &self,
        store: &mut HistoryStore,
        start_ms: i64,
        stop_before_ms: i64,
    ) -> Result<IngestSummary, FeedError> {
        let mut summary = IngestSummary::default();
        let mut cursor = start_ms;
        loop {
            if self.stop.load(Ordering::Relaxed) {
                info!("stop requested; ingest ends");
                break;
            }
            let records = match self.fetch_page(cursor).await {
                Ok(records) => records,
                Err(err) => {
                    warn!(%err, cursor, "page fetch failed; ingest ends");
                    break;
                }
            };
            if records.is_empty() {
                debug!(cursor, "empty page; feed exhausted");
                break;
            }

            let page = normalize_page(&records);
            let write = store.insert_page(&page.portals, &page.actions)?;
            summary.pages += 1;
            summary.records_seen += records.len();
            summary.records_dropped += page.dropped;
            summary.actions_stored += write.actions_inserted;
            summary.portals_stored += write.portals_inserted;

            // Pages are newest-first, so the tail record is the oldest.
            let Some(oldest) = records
                .last()
                .and_then(|record| record.get(1))
                .and_then(Value::as_i64)
            else {
                warn!(cursor, "page tail missing timestamp; ingest ends");
                break;
            };
            summary.oldest_reached_ms = Some(oldest);
            if oldest < stop_before_ms {
                debug!(oldest, floor = stop_before_ms, "lookback floor reached");
                break;
            }
            cursor = oldest - 1;
            tokio::time::sleep(self.config.page_delay).await;
        }
        info!(
            pages = summary.pages,
            records = summary.records_seen,
            actions = summary.actions_stored,
            portals = summary.portals_stored,
            dropped = summary.records_dropped,
            "ingest finished"
        );
        Ok(summary)
    }

    async fn fetch_page(&self, cursor_ms: i64) -> Result<Vec<Value>, FeedError> {
        let body = build_page_request(&self.config.base_payload, cursor_ms);
        let response = self
            .client
            .post(&self.config.endpoint)
            .json(&body)
            .send()
            .await?
            .error_for_status()?;
        let payload: Value = response.json().await?;
        payload
            .get("result")
            .and_then(Value::as_array)
            .cloned()
            .ok_or(FeedError::Malformed("response missing result array"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_request_overrides_only_paging_fields() {
        let base = json!({
            "desiredNumItems": 50,
            "minLatE6": 1, "maxLatE6": 2,
            "minLngE6": 3, "maxLngE6": 4,
            "minTimestampMs": 123,
            "maxTimestampMs": 456,
            "plextContinuationGuid": "stale",
            "zoom": 15,
        });
        let body = build_page_request(&base, 999);
        assert_eq!(body["minTimestampMs"], json!(-1));
        assert_eq!(body["maxTimestampMs"], json!(999));
        assert_eq!(body["plextContinuationGuid"], json!(""));
        assert_eq!(body["desiredNumItems"], json!(50));
        assert_eq!(body["zoom"], json!(15));
        // The base payload itself is untouched.
        assert_eq!(base["maxTimestampMs"], json!(456));
    }

    #[test]
    fn page_normalization_counts_drops_and_broken_records() {
        let records = vec![
            json!(["ev1", 1_000, { "plext": {
                "text": "alice captured Portal p1",
                "markup": [
                    ["PLAYER", { "plain": "alice", "team": "RESISTANCE" }],
                    ["PORTAL", { "guid": "p1.16", "latE6": 1, "lngE6": 2,
                                 "name": "P1", "address": "", "team": "NEUTRAL" }],
                ],
            }}]),
            json!(["ev2", 900, { "plext": {
                "text": "Portal p1 is under attack by bob",
                "markup": [],
            }}]),
            json!("garbage"),
        ];
        let page = normalize_page(&records);
        assert_eq!(page.actions.len(), 1);
        assert_eq!(page.portals.len(), 1);
        assert_eq!(page.dropped, 2);
        assert_eq!(page.actions[0].id, "ev1");
    }
}
