//! Scan/scroll cursor over one index.
//!
//! The cursor hides the difference between the initial scan request and the
//! continuation requests: callers just keep calling [`Cursor::next`] until a
//! page comes back empty.

use reqwest::Method;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::DocType;
use crate::error::{Error, Result};
use crate::host::EsHost;
use crate::progress::Counters;
use crate::record::Page;
use crate::response::ScrollResponse;
use crate::retry::{with_retry, RetryConfig};

/// Pages through every document matching a query.
pub struct Cursor {
    host: Arc<EsHost>,
    doc: DocType,
    query: Value,
    ttl: String,
    retry: RetryConfig,
    counters: Arc<Counters>,
    scroll_id: Option<String>,
    total: u64,
    loop_no: u64,
    position: u64,
}

impl Cursor {
    /// Creates a cursor; nothing is sent before the first [`Cursor::next`].
    pub fn new(
        host: Arc<EsHost>,
        doc: DocType,
        query: Value,
        ttl: impl Into<String>,
        counters: Arc<Counters>,
    ) -> Self {
        Self {
            host,
            doc,
            query,
            ttl: ttl.into(),
            retry: RetryConfig::for_scroll(),
            counters,
            scroll_id: None,
            total: 0,
            loop_no: 0,
            position: 0,
        }
    }

    /// Overrides the retry policy of scan and scroll calls.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Documents matched by the scan; 0 until the first page is fetched.
    pub fn total(&self) -> u64 {
        self.total
    }

    /// Current continuation token, if the scan has been opened.
    pub fn scroll_id(&self) -> Option<&str> {
        self.scroll_id.as_deref()
    }

    fn scan_uri(&self) -> String {
        let mut uri = format!("{}/_search?scroll={}", self.doc.uri(), self.ttl);
        // search_type=scan was removed in 5.0
        if !self.host.version().at_least(5, 0, 0) {
            uri.push_str("&search_type=scan");
        }
        uri
    }

    /// Issues the initial scan request and stores its token and total.
    ///
    /// # Errors
    ///
    /// Returns an error once retries are exhausted, or immediately when the
    /// store reports an error.
    pub async fn open(&mut self) -> Result<Page> {
        let uri = self.scan_uri();
        let body = serde_json::to_string(&self.query)?;

        let mut resp: ScrollResponse = with_retry(&self.retry, "scan", || {
            self.host.request(Method::GET, &uri, Some(body.clone()))
        })
        .await?;
        info!(uri = %uri, query = %body, "scan opened");

        let message = resp.error_message();
        if !message.is_empty() {
            return Err(Error::remote("scan", message));
        }
        if resp.scroll_id.is_empty() {
            return Err(Error::remote("scan", "get scroll_id failed"));
        }

        self.total = resp.total().unwrap_or(0);
        self.counters.set_total_once(self.total);
        self.scroll_id = Some(resp.scroll_id.clone());

        let total = resp.total();
        let records = resp.take_records();
        self.record_page(records.len());
        Ok(Page {
            records,
            scroll_id: resp.scroll_id,
            total,
        })
    }

    /// Fetches the next page. An empty page means the scroll is exhausted.
    ///
    /// # Errors
    ///
    /// Returns an error once retries are exhausted, or immediately when the
    /// store reports an error.
    pub async fn next(&mut self) -> Result<Page> {
        if self.scroll_id.is_none() {
            let page = self.open().await?;
            // Stores >= 5.0 answer the scan with the first page already.
            if page.has_more() {
                return Ok(page);
            }
        }
        let scroll_id = self
            .scroll_id
            .clone()
            .ok_or_else(|| Error::remote("scroll_next", "get scroll_id failed"))?;

        let body = json!({ "scroll": self.ttl, "scroll_id": scroll_id }).to_string();
        let mut resp: ScrollResponse = with_retry(&self.retry, "scroll_next", || {
            self.host
                .request(Method::GET, "/_search/scroll", Some(body.clone()))
        })
        .await?;

        let message = resp.error_message();
        if !message.is_empty() {
            return Err(Error::remote("scroll_next", message));
        }

        // Tokens may change between pages; always keep the latest.
        if !resp.scroll_id.is_empty() {
            self.scroll_id = Some(resp.scroll_id.clone());
        }

        let records = resp.take_records();
        // The first page handed out carries the scan's estimate.
        let total = (self.position == 0 && !records.is_empty()).then_some(self.total);
        self.record_page(records.len());
        Ok(Page {
            records,
            scroll_id: resp.scroll_id,
            total,
        })
    }

    fn record_page(&mut self, len: usize) {
        self.loop_no += 1;
        self.position += len as u64;
        Counters::add(&self.counters.read, len as u64);
        info!(
            "scroll_next result, loopNo={}, total={}, scrollPos={}",
            self.loop_no, self.total, self.position
        );
    }

    /// Releases the scroll context on the store. Failures are only logged.
    pub async fn clear(&mut self) {
        let Some(scroll_id) = self.scroll_id.take() else {
            return;
        };
        let body = json!({ "scroll_id": [scroll_id] }).to_string();
        let result: Result<Value> = self
            .host
            .request(Method::DELETE, "/_search/scroll", Some(body))
            .await;
        if let Err(e) = result {
            warn!("clear scroll failed: {}", e);
        }
    }
}

#[cfg(test)]
#[path = "cursor_tests.rs"]
mod tests;
