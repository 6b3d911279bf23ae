// Reindex tool - pedantic lints relaxed for CLI ergonomics
#![allow(clippy::pedantic)]

//! # es-reindex
//!
//! `es-reindex` scrolls every document matching a query out of an
//! Elasticsearch index, optionally reshapes each one through an external
//! filter command, and bulks the result into a destination index.
//!
//! ## Pipeline
//!
//! | Stage | Module | Notes |
//! |-------|--------|-------|
//! | Scan/scroll | [`cursor`] | Legacy `search_type=scan` below 5.0 |
//! | Worker pool | [`pipeline`] | Bounded queue of `2 × workers` pages |
//! | Filter | [`filter`] | One `sh -c` child per worker, line protocol |
//! | Bulk | [`writer`] | Per-item reconciliation by identity key |
//! | Progress | [`progress`] | Rate and ETA every few seconds |
//!
//! ## Quick Start
//!
//! ```bash
//! es-reindex init --output es_reindex.yaml
//! es-reindex --config es_reindex.yaml --dry-run
//! es-reindex --config es_reindex.yaml
//! ```
//!
//! ## Filter protocol
//!
//! The filter reads one JSON record per line on stdin and answers one line
//! on stdout: the replacement record, or an empty line to drop it.
//!
//! ```text
//! > {"_index":"a","_type":"t","_id":"1","_source":{"name":"x"}}
//! < {"_index":"a","_type":"t","_id":"1","_source":{"name":"X"}}
//! ```

#![warn(missing_docs)]

pub mod config;
pub mod cursor;
pub mod dump;
pub mod error;
pub mod filter;
pub mod host;
pub mod pipeline;
pub mod progress;
pub mod record;
pub mod response;
pub mod retry;
pub mod writer;

pub use config::{ReindexConfig, ReindexOptions, ResolvedConfig};
pub use cursor::Cursor;
pub use dump::Dump;
pub use error::{Error, Result};
pub use filter::{FilterAdapter, FilterOutcome, FilterRetryPolicy};
pub use host::EsHost;
pub use pipeline::Pipeline;
pub use progress::{CounterSnapshot, Counters};
pub use record::{Page, Record};
pub use writer::{BatchReport, BatchWriter, PendingBatch};
