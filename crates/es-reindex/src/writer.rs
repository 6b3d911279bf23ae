//! Bulk writes and per-item reconciliation.
//!
//! A [`PendingBatch`] collects the bulk lines of one page together with the
//! serialized record behind each identity key. Once the store answers, every
//! `index` item is matched back to its record so failures can be logged with
//! the payload that caused them.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::host::EsHost;
use crate::progress::Counters;
use crate::record::{identity_key, Record};
use crate::response::BulkResponse;

/// Bulk body under construction.
#[derive(Debug, Default, Clone)]
pub struct PendingBatch {
    body: String,
    pending: HashMap<String, String>,
    len: usize,
}

impl PendingBatch {
    /// Creates an empty batch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends the action header and document of `record`.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be serialized.
    pub fn push(&mut self, record: &Record) -> Result<()> {
        self.body.push_str(&record.bulk_lines()?);
        self.pending.insert(record.identity(), record.to_line()?);
        self.len += 1;
        Ok(())
    }

    /// Records in the batch.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether nothing was pushed.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Newline-delimited request body.
    pub fn body(&self) -> &str {
        &self.body
    }

    /// Serialized record pushed under `identity`.
    pub fn payload(&self, identity: &str) -> Option<&str> {
        self.pending.get(identity).map(String::as_str)
    }

    // Typeless records come back with the store's default type (`_doc`).
    fn lookup(&self, index: &str, doc_type: &str, id: &str) -> Option<(String, &str)> {
        let key = identity_key(index, doc_type, id);
        if let Some(raw) = self.pending.get(&key) {
            return Some((key, raw));
        }
        let typeless = identity_key(index, "", id);
        self.pending.get(&typeless).map(|raw| (typeless, raw.as_str()))
    }
}

/// One item the store refused.
#[derive(Debug, Clone, PartialEq)]
pub struct FailedItem {
    /// Identity key of the record.
    pub identity: String,
    /// Item status code.
    pub status: u16,
    /// Error text reported for the item.
    pub error: String,
    /// Serialized record that was sent.
    pub payload: String,
}

/// Outcome of one bulk call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchReport {
    /// Items matched back to a pending record.
    pub acked: u64,
    /// Items written.
    pub succeeded: u64,
    /// Items refused.
    pub failed: u64,
    /// Items that matched nothing or carried another action type.
    pub ignored: u64,
    /// Details of every refused item.
    pub failures: Vec<FailedItem>,
}

impl BatchReport {
    /// Failure recorded for `identity`, if any.
    pub fn failure(&self, identity: &str) -> Option<&FailedItem> {
        self.failures.iter().find(|item| item.identity == identity)
    }
}

/// Matches a bulk answer against the batch that produced it.
///
/// Only `index` actions are considered; anything else is counted as ignored.
pub fn reconcile(batch: &PendingBatch, response: &BulkResponse) -> BatchReport {
    let mut report = BatchReport::default();
    for item in &response.items {
        let Some(result) = item.get("index") else {
            report.ignored += 1;
            continue;
        };
        let Some((identity, payload)) = batch.lookup(&result.index, &result.doc_type, &result.id)
        else {
            warn!(key = %result.identity(), "bulk item matches no pending record");
            report.ignored += 1;
            continue;
        };

        report.acked += 1;
        let message = result.error_message();
        if message.is_empty() {
            report.succeeded += 1;
        } else {
            report.failed += 1;
            report.failures.push(FailedItem {
                identity,
                status: result.status,
                error: message,
                payload: payload.to_string(),
            });
        }
    }
    report
}

/// Sends batches to the destination store and keeps the write counters.
pub struct BatchWriter {
    host: Arc<EsHost>,
    counters: Arc<Counters>,
    dry_run: bool,
}

impl BatchWriter {
    /// Creates a writer for `host`.
    pub fn new(host: Arc<EsHost>, counters: Arc<Counters>, dry_run: bool) -> Self {
        Self {
            host,
            counters,
            dry_run,
        }
    }

    /// Submits `batch` as one bulk call. An empty batch sends nothing.
    ///
    /// Item-level failures are logged and counted but never returned as errors.
    ///
    /// # Errors
    ///
    /// Returns an error if the call fails in transport, the answer cannot be
    /// decoded, or the store reports a request-level error.
    pub async fn submit(&self, batch: &PendingBatch) -> Result<BatchReport> {
        if batch.is_empty() {
            return Ok(BatchReport::default());
        }
        if self.dry_run {
            debug!(records = batch.len(), "dry run, bulk body not sent");
            return Ok(BatchReport::default());
        }

        Counters::add(&self.counters.batches, 1);
        let response = self.host.bulk(batch.body().to_string()).await?;

        let message = response.error_message();
        if !message.is_empty() {
            return Err(Error::remote("bulk", message));
        }

        let report = reconcile(batch, &response);
        Counters::add(&self.counters.acked, report.acked);
        Counters::add(&self.counters.succeeded, report.succeeded);
        Counters::add(&self.counters.failed, report.failed);

        for item in &report.failures {
            error!(
                key = %item.identity,
                status = item.status,
                input = %item.payload,
                "bulk item failed: {}",
                item.error
            );
        }
        if response.errors || report.failed > 0 {
            warn!(
                took = response.took,
                failed = report.failed,
                "bulk resp has error"
            );
        } else {
            info!(took = response.took, items = report.acked, "bulk all success");
        }
        Ok(report)
    }
}
