//! Reindex pipeline orchestration.
//!
//! One producer task drains the cursor into a bounded queue; `workers` tasks
//! pull pages from it, run every record through defaults and the filter, and
//! bulk what is left into the destination. A progress task reports on a timer.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::config::{DocType, ResolvedConfig};
use crate::cursor::Cursor;
use crate::error::{Error, Result};
use crate::filter::{FilterAdapter, FilterOutcome};
use crate::host::EsHost;
use crate::progress::{CounterSnapshot, Counters, ProgressTracker};
use crate::record::Page;
use crate::retry::RetryConfig;
use crate::writer::{BatchReport, BatchWriter, PendingBatch};

type PageQueue = Arc<Mutex<mpsc::Receiver<Page>>>;

/// Where a worker currently is in its loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// Between pages.
    Idle,
    /// Waiting on the queue.
    Dequeuing,
    /// Applying defaults and the filter.
    Transforming,
    /// Waiting on the bulk call.
    Writing,
    /// Queue drained, filter closed.
    Closed,
}

impl WorkerState {
    /// Pipeline stage a failure in this state belongs to.
    pub fn stage(self) -> &'static str {
        match self {
            Self::Idle | Self::Dequeuing => "queue",
            Self::Transforming => "filter",
            Self::Writing => "bulk",
            Self::Closed => "close",
        }
    }
}

/// Builds the scan cursor over the origin index.
pub(crate) fn open_cursor(
    host: Arc<EsHost>,
    config: &ResolvedConfig,
    counters: Arc<Counters>,
) -> Cursor {
    let retry = RetryConfig::fixed(
        config.options.scroll_retries,
        Duration::from_millis(config.options.retry_delay_ms),
    );
    Cursor::new(
        host,
        config.origin.doc_type.clone(),
        config.scan_query.clone(),
        config.scan_time.clone(),
        counters,
    )
    .with_retry(retry)
}

/// Pushes pages until one comes back empty, then closes the queue and
/// releases the scroll.
pub(crate) async fn produce(mut cursor: Cursor, queue: mpsc::Sender<Page>) -> Result<()> {
    let result = async {
        loop {
            let page = cursor.next().await?;
            if !page.has_more() {
                info!(total = cursor.total(), "scroll exhausted");
                return Ok(());
            }
            if queue.send(page).await.is_err() {
                warn!("page queue closed before the scroll finished");
                return Ok(());
            }
        }
    }
    .await;
    drop(queue);
    cursor.clear().await;
    result
}

/// Reindex pipeline.
pub struct Pipeline {
    config: ResolvedConfig,
    origin: Arc<EsHost>,
    destination: Arc<EsHost>,
    counters: Arc<Counters>,
}

impl Pipeline {
    /// Connects to both stores.
    ///
    /// # Errors
    ///
    /// Returns an error if a store cannot be reached or is too old.
    pub async fn connect(config: ResolvedConfig) -> Result<Self> {
        let origin = Arc::new(EsHost::connect(&config.origin.host).await?);
        let destination = if config.destination.host == config.origin.host {
            origin.clone()
        } else {
            Arc::new(EsHost::connect(&config.destination.host).await?)
        };
        Ok(Self::new(config, origin, destination))
    }

    /// Creates a pipeline over already connected hosts.
    pub fn new(config: ResolvedConfig, origin: Arc<EsHost>, destination: Arc<EsHost>) -> Self {
        Self {
            config,
            origin,
            destination,
            counters: Counters::new(),
        }
    }

    /// Live counters of this pipeline.
    pub fn counters(&self) -> Arc<Counters> {
        self.counters.clone()
    }

    /// Runs the reindex to completion.
    ///
    /// # Errors
    ///
    /// Returns the first fatal error: exhausted scroll retries, a remote
    /// error, a failed bulk call or a filter that gave up. Every other task
    /// is aborted when that happens.
    pub async fn run(&self) -> Result<CounterSnapshot> {
        let options = &self.config.options;
        let workers = options.workers.max(1);
        info!(
            origin = %self.config.origin.index_uri(),
            destination = %self.config.destination.index_uri(),
            workers,
            same_index = self.config.same_index,
            dry_run = options.dry_run,
            "Starting reindex pipeline"
        );

        let tracker = ProgressTracker::start(
            self.counters.clone(),
            Duration::from_secs(options.progress_interval_secs.max(1)),
        );

        let (tx, rx) = mpsc::channel(workers * 2);
        let queue: PageQueue = Arc::new(Mutex::new(rx));
        let mut tasks: JoinSet<(&'static str, Result<()>)> = JoinSet::new();

        let cursor = open_cursor(self.origin.clone(), &self.config, self.counters.clone());
        tasks.spawn(async move { ("scroll", produce(cursor, tx).await) });

        for id in 0..workers {
            let worker = Worker::start(id, &self.config, &self.destination, &self.counters)?;
            tasks.spawn(worker.run(queue.clone()));
        }

        while let Some(joined) = tasks.join_next().await {
            let (stage, result) = match joined {
                Ok(outcome) => outcome,
                Err(e) => ("task", Err(Error::Task(e.to_string()))),
            };
            if let Err(e) = result {
                tasks.abort_all();
                tracker.stop();
                error!(stage, "reindex failed at {}: {} {}", stage, e, self.counters);
                return Err(e);
            }
        }

        tracker.stop();
        let snapshot = self.counters.snapshot();
        info!(
            "reindex finished in {:.2}s: {}",
            snapshot.elapsed.as_secs_f64(),
            snapshot
        );
        Ok(snapshot)
    }
}

/// One queue consumer with its own filter process.
struct Worker {
    id: usize,
    retarget: DocType,
    fields_default: Map<String, Value>,
    same_index: bool,
    debug: bool,
    filter: Option<FilterAdapter>,
    writer: BatchWriter,
    counters: Arc<Counters>,
    state: WorkerState,
}

impl Worker {
    fn start(
        id: usize,
        config: &ResolvedConfig,
        destination: &Arc<EsHost>,
        counters: &Arc<Counters>,
    ) -> Result<Self> {
        let filter = match &config.filter_cmd {
            Some(cmd) => Some(FilterAdapter::spawn(
                cmd,
                id.to_string(),
                config.filter_dir.clone(),
                config.options.filter_retry.policy(),
            )?),
            None => None,
        };
        Ok(Self {
            id,
            retarget: config.retarget.clone(),
            fields_default: config.fields_default.clone(),
            same_index: config.same_index,
            debug: config.options.debug,
            filter,
            writer: BatchWriter::new(
                destination.clone(),
                counters.clone(),
                config.options.dry_run,
            ),
            counters: counters.clone(),
            state: WorkerState::Idle,
        })
    }

    fn set_state(&mut self, state: WorkerState) {
        debug!(worker = self.id, from = ?self.state, to = ?state, "worker state");
        self.state = state;
    }

    /// Drains the queue; on failure also reports the stage that failed.
    async fn run(mut self, queue: PageQueue) -> (&'static str, Result<()>) {
        info!(worker = self.id, "worker started");
        let result = self.drain(queue).await;
        let stage = self.state.stage();
        if let Some(filter) = self.filter.as_mut() {
            filter.close().await;
        }
        self.set_state(WorkerState::Closed);
        info!(worker = self.id, "worker stopped");
        (stage, result)
    }

    async fn drain(&mut self, queue: PageQueue) -> Result<()> {
        loop {
            self.set_state(WorkerState::Dequeuing);
            let page = queue.lock().await.recv().await;
            let Some(page) = page else {
                return Ok(());
            };
            self.process_page(page).await?;
            self.set_state(WorkerState::Idle);
        }
    }

    async fn process_page(&mut self, page: Page) -> Result<BatchReport> {
        self.set_state(WorkerState::Transforming);
        let mut batch = PendingBatch::new();

        for mut record in page.records {
            let key = record.identity();
            // Only explicit overrides; aliases and typed hits keep their identity.
            if !self.retarget.index.is_empty() {
                record.index.clone_from(&self.retarget.index);
            }
            if !self.retarget.doc_type.is_empty() {
                record.doc_type.clone_from(&self.retarget.doc_type);
            }
            let mut changed = record.apply_defaults(&self.fields_default);

            if let Some(filter) = self.filter.as_mut() {
                match filter.transform(&record).await? {
                    FilterOutcome::Drop => {
                        Counters::add(&self.counters.skipped, 1);
                        info!(worker = self.id, key = %key, "filter dropped record");
                        continue;
                    }
                    FilterOutcome::Keep {
                        record: filtered,
                        changed: filter_changed,
                    } => {
                        changed |= filter_changed;
                        record = filtered;
                    }
                }
            }

            if self.same_index && !changed {
                Counters::add(&self.counters.skipped, 1);
                continue;
            }
            if self.debug {
                debug!(worker = self.id, key = %key, record = %record.to_line()?, "record queued");
            }
            batch.push(&record)?;
            Counters::add(&self.counters.written, 1);
        }

        if batch.is_empty() {
            debug!(worker = self.id, "not changed, skip reindex");
            return Ok(BatchReport::default());
        }
        self.set_state(WorkerState::Writing);
        self.writer.submit(&batch).await
    }
}
