//! Wire shapes of the store's scroll and bulk responses.

use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;

use crate::record::{identity_key, Record};

/// Renders an `error` field, which older stores send as a string and newer
/// ones as an object. Absent, null and `""` all mean "no error".
pub fn error_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Response of the initial scan and of every scroll continuation.
#[derive(Debug, Default, Deserialize)]
pub struct ScrollResponse {
    /// Error reported by the store, if any.
    #[serde(default)]
    pub error: Value,
    /// Continuation token.
    #[serde(rename = "_scroll_id", default)]
    pub scroll_id: String,
    /// Time the store spent, in ms.
    #[serde(default)]
    pub took: u64,
    /// Whether the search timed out on some shard.
    #[serde(default)]
    pub timed_out: bool,
    /// Matching documents.
    #[serde(default)]
    pub hits: Option<Hits>,
}

/// `hits` section of a search response.
#[derive(Debug, Default, Deserialize)]
pub struct Hits {
    /// Either a plain number or `{"value": n, "relation": ".."}`.
    #[serde(default)]
    pub total: Value,
    /// The page of documents.
    #[serde(default)]
    pub hits: Vec<Record>,
}

impl ScrollResponse {
    /// Error text, empty when the call succeeded.
    pub fn error_message(&self) -> String {
        error_text(&self.error)
    }

    /// Total matching documents, when reported.
    pub fn total(&self) -> Option<u64> {
        let total = &self.hits.as_ref()?.total;
        match total {
            Value::Number(n) => n.as_u64(),
            Value::Object(map) => map.get("value").and_then(Value::as_u64),
            _ => None,
        }
    }

    /// Takes the page of records out of the response.
    pub fn take_records(&mut self) -> Vec<Record> {
        self.hits
            .as_mut()
            .map(|hits| std::mem::take(&mut hits.hits))
            .unwrap_or_default()
    }
}

/// Response of a `_bulk` call.
#[derive(Debug, Default, Deserialize)]
pub struct BulkResponse {
    /// Request-level error, if any.
    #[serde(default)]
    pub error: Value,
    /// Time the store spent, in ms.
    #[serde(default)]
    pub took: u64,
    /// Whether at least one item failed.
    #[serde(default)]
    pub errors: bool,
    /// One map per bulk action, keyed by action type (`index`, `create`...).
    #[serde(default)]
    pub items: Vec<HashMap<String, BulkResultItem>>,
}

impl BulkResponse {
    /// Request-level error text, empty when the store accepted the call.
    pub fn error_message(&self) -> String {
        error_text(&self.error)
    }
}

/// Outcome of one bulk action.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BulkResultItem {
    /// Target index.
    #[serde(rename = "_index", default)]
    pub index: String,
    /// Target type.
    #[serde(rename = "_type", default)]
    pub doc_type: String,
    /// Target id.
    #[serde(rename = "_id", default)]
    pub id: String,
    /// Document version after the write.
    #[serde(rename = "_version", default)]
    pub version: u64,
    /// HTTP-like status of the item.
    #[serde(default)]
    pub status: u16,
    /// Item-level error, if any.
    #[serde(default)]
    pub error: Value,
}

impl BulkResultItem {
    /// Identity key, comparable with [`Record::identity`].
    pub fn identity(&self) -> String {
        identity_key(&self.index, &self.doc_type, &self.id)
    }

    /// Error text, empty when the item was written.
    pub fn error_message(&self) -> String {
        error_text(&self.error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_error_text_variants() {
        assert_eq!(error_text(&Value::Null), "");
        assert_eq!(error_text(&json!("")), "");
        assert_eq!(error_text(&json!("boom")), "boom");
        assert_eq!(
            error_text(&json!({"type": "version_conflict"})),
            r#"{"type":"version_conflict"}"#
        );
    }

    #[test]
    fn test_scan_response_legacy_total() {
        let body = r#"{"_scroll_id":"c2Nhbj","took":3,"timed_out":false,"hits":{"total":42,"hits":[]}}"#;
        let mut resp: ScrollResponse = serde_json::from_str(body).unwrap();
        assert_eq!(resp.scroll_id, "c2Nhbj");
        assert_eq!(resp.total(), Some(42));
        assert!(resp.take_records().is_empty());
        assert!(resp.error_message().is_empty());
    }

    #[test]
    fn test_scroll_response_object_total_and_hits() {
        let body = r#"{"_scroll_id":"abc","hits":{"total":{"value":7,"relation":"eq"},
            "hits":[{"_index":"a","_type":"t","_id":"1","_score":1.0,"_source":{"n":1}}]}}"#;
        let mut resp: ScrollResponse = serde_json::from_str(body).unwrap();
        assert_eq!(resp.total(), Some(7));
        let records = resp.take_records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].identity(), "a|t|1");
    }

    #[test]
    fn test_scroll_response_error() {
        let body = r#"{"error":"SearchContextMissingException","status":404}"#;
        let resp: ScrollResponse = serde_json::from_str(body).unwrap();
        assert_eq!(resp.error_message(), "SearchContextMissingException");
        assert_eq!(resp.total(), None);
    }

    #[test]
    fn test_bulk_response_items() {
        let body = r#"{"took":5,"errors":true,"items":[
            {"index":{"_index":"a","_type":"t","_id":"1","_version":2,"status":200,"error":""}},
            {"index":{"_index":"a","_type":"t","_id":"2","status":409,"error":"version_conflict"}}
        ]}"#;
        let resp: BulkResponse = serde_json::from_str(body).unwrap();
        assert!(resp.errors);
        assert_eq!(resp.items.len(), 2);
        let second = &resp.items[1]["index"];
        assert_eq!(second.identity(), "a|t|2");
        assert_eq!(second.status, 409);
        assert_eq!(second.error_message(), "version_conflict");
    }

    #[test]
    fn test_bulk_response_request_error() {
        let body = r#"{"error":{"type":"illegal_argument_exception","reason":"explicit index in bulk is not allowed"},"status":400}"#;
        let resp: BulkResponse = serde_json::from_str(body).unwrap();
        assert!(resp.items.is_empty());
        assert!(resp.error_message().contains("illegal_argument_exception"));

        let ok: BulkResponse = serde_json::from_str(r#"{"took":1,"errors":false,"items":[]}"#).unwrap();
        assert!(ok.error_message().is_empty());
    }
}
