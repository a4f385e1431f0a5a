//! `MediaManager` implementation over the cataloger HTTP API.

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;
use transferarr_config::MediaManagerConfig;
use transferarr_core::{AdapterError, AdapterResult, ManagerKind, MediaManager, QueueItem};

use crate::queue::{QueuePage, items_from_page, page_contains};

const API_KEY_HEADER: &str = "X-Api-Key";
const QUEUE_PAGE_SIZE: u32 = 1000;

/// Queue adapter for one configured manager instance.
pub struct ArrManager {
    kind: ManagerKind,
    base_url: String,
    api_key: String,
    http: reqwest::Client,
}

impl ArrManager {
    /// Build an adapter from its configuration entry.
    ///
    /// # Errors
    ///
    /// Returns an error when the HTTP client cannot be constructed.
    pub fn new(config: &MediaManagerConfig, timeout: Duration) -> AdapterResult<Self> {
        let kind = config.kind;
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| AdapterError::Connection {
                kind: kind.as_str(),
                detail: format!("http client construction failed: {err}"),
            })?;
        Ok(Self {
            kind,
            base_url: config.base_url(),
            api_key: config.api_key.clone(),
            http,
        })
    }

    fn request_error(&self, operation: &'static str, err: &reqwest::Error) -> AdapterError {
        if err.is_timeout() {
            AdapterError::Timeout {
                kind: self.kind.as_str(),
                operation,
            }
        } else {
            AdapterError::Connection {
                kind: self.kind.as_str(),
                detail: err.to_string(),
            }
        }
    }

    async fn fetch_queue(&self, operation: &'static str) -> AdapterResult<QueuePage> {
        let url = format!(
            "{}/api/v3/queue?page=1&pageSize={QUEUE_PAGE_SIZE}",
            self.base_url
        );
        let response = self
            .http
            .get(&url)
            .header(API_KEY_HEADER, &self.api_key)
            .send()
            .await
            .map_err(|err| self.request_error(operation, &err))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AdapterError::Status {
                kind: self.kind.as_str(),
                status: status.as_u16(),
            });
        }

        response
            .json::<QueuePage>()
            .await
            .map_err(|err| AdapterError::Protocol {
                kind: self.kind.as_str(),
                detail: err.to_string(),
            })
    }
}

#[async_trait]
impl MediaManager for ArrManager {
    fn kind(&self) -> ManagerKind {
        self.kind
    }

    async fn queue(&self) -> AdapterResult<Vec<QueueItem>> {
        let page = self.fetch_queue("queue").await?;
        Ok(items_from_page(self.kind.as_str(), page))
    }

    async fn ready_to_remove(&self, queue_id: &str) -> AdapterResult<bool> {
        let page = self.fetch_queue("ready_to_remove").await?;
        let still_queued = page_contains(&page, queue_id);
        debug!(
            kind = self.kind.as_str(),
            queue_id,
            still_queued,
            "ingest check"
        );
        // The manager drops a queue entry once the import finished, so
        // absence is the ingest-complete signal.
        Ok(!still_queued)
    }
}
