//! Dump-only mode: scroll the origin index and write every record as a JSON line.

use std::sync::Arc;

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::info;

use crate::config::ResolvedConfig;
use crate::error::{Error, Result};
use crate::host::EsHost;
use crate::pipeline::{open_cursor, produce};
use crate::progress::{CounterSnapshot, Counters};

/// Streams the origin index to a writer, without filtering or writeback.
pub struct Dump {
    config: ResolvedConfig,
    host: Arc<EsHost>,
    counters: Arc<Counters>,
}

impl Dump {
    /// Connects to the origin store.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be reached or is too old.
    pub async fn connect(config: ResolvedConfig) -> Result<Self> {
        let host = Arc::new(EsHost::connect(&config.origin.host).await?);
        Ok(Self::new(config, host))
    }

    /// Creates a dump over an already connected host.
    pub fn new(config: ResolvedConfig, host: Arc<EsHost>) -> Self {
        Self {
            config,
            host,
            counters: Counters::new(),
        }
    }

    /// Writes every record as one line, then flushes.
    ///
    /// # Errors
    ///
    /// Returns an error if the scroll fails or the writer does.
    pub async fn run<W>(&self, out: &mut W) -> Result<CounterSnapshot>
    where
        W: AsyncWrite + Unpin,
    {
        let cursor = open_cursor(self.host.clone(), &self.config, self.counters.clone());
        let (tx, mut rx) = mpsc::channel(2);
        let producer = tokio::spawn(produce(cursor, tx));

        let written = async {
            let mut lines = 0u64;
            while let Some(page) = rx.recv().await {
                for record in &page.records {
                    let mut line = record.to_line()?;
                    line.push('\n');
                    out.write_all(line.as_bytes()).await?;
                    lines += 1;
                }
            }
            out.flush().await?;
            Ok::<_, Error>(lines)
        }
        .await;
        // Unblocks the producer if the writer failed first.
        drop(rx);

        let produced = producer
            .await
            .map_err(|e| Error::Task(e.to_string()))
            .and_then(|result| result);
        let lines = written?;
        produced?;

        Counters::add(&self.counters.written, lines);
        let snapshot = self.counters.snapshot();
        info!("dump finished: {}", snapshot);
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DocType, HostConfig, IndexInfo, ReindexConfig};
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_dump_writes_json_lines() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"version": {"number": "6.8.0"}})),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/src/doc/_search"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "_scroll_id": "s1",
                "hits": {"total": 2, "hits": [
                    {"_index": "src", "_type": "doc", "_id": "1", "_source": {"n": 1}},
                    {"_index": "src", "_type": "doc", "_id": "2", "_source": {"n": 2.50}}
                ]}
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/_search/scroll"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "_scroll_id": "s1", "hits": {"total": 2, "hits": []}
            })))
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/_search/scroll"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .mount(&server)
            .await;

        let config = ReindexConfig::new(IndexInfo {
            host: HostConfig {
                addr: server.uri(),
                ..Default::default()
            },
            doc_type: DocType::new("src", "doc"),
        })
        .resolve()
        .unwrap();

        let dump = Dump::connect(config).await.unwrap();
        let mut out = Vec::new();
        let snapshot = dump.run(&mut out).await.unwrap();

        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(
            lines[0],
            r#"{"_index":"src","_type":"doc","_id":"1","_source":{"n":1}}"#
        );
        assert_eq!(snapshot.read, 2);
        assert_eq!(snapshot.written, 2);
    }
}
