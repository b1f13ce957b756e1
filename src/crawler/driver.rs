//! Crawl driver - ties discovery, the ledger, the work queue and the sink
//! together into one resumable run

use crate::crawler::queue::WorkQueue;
use crate::fetch::{FetchClient, FetchOutcome};
use crate::ledger::{LedgerError, ProgressLedger};
use crate::output::{CsvSink, SinkError};
use crate::source::{Discovery, Record, WorkItem};
use crate::HarvestError;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Shared flag that stops a run from starting new items
///
/// Items already in flight finish normally; everything not yet started is
/// left for the next run.
#[derive(Debug, Clone, Default)]
pub struct HaltHandle(Arc<AtomicBool>);

impl HaltHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn halt(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_halted(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Counts reported at the end of a run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Items returned by discovery, duplicates included
    pub discovered: usize,

    /// Items skipped because an earlier run finished them
    pub already_finished: usize,

    /// Items this run set out to fetch
    pub pending: usize,

    pub succeeded: usize,
    pub failed: usize,

    /// Pending items never started because the run was halted
    pub skipped: usize,

    /// True if the run was stopped early by its halt handle
    pub interrupted: bool,

    pub elapsed: Duration,
}

/// How discovered items split against the ledger and existing output
#[derive(Debug, Default)]
struct Plan {
    pending: Vec<WorkItem>,
    already_finished: usize,
    reconciled: usize,
    duplicates: usize,
}

/// Splits discovered items into work still to do
///
/// An id counts as done only if the ledger has it finished and its row is
/// in the output. A ledger hit with no row means the process died between
/// `mark_finished` and the next flush, so the item is fetched again.
fn plan(items: Vec<WorkItem>, finished: &HashSet<String>, written: &HashSet<String>) -> Plan {
    let mut plan = Plan::default();
    let mut seen = HashSet::new();

    for item in items {
        if !seen.insert(item.id.clone()) {
            plan.duplicates += 1;
            continue;
        }
        if finished.contains(&item.id) {
            if written.contains(&item.id) {
                plan.already_finished += 1;
                continue;
            }
            tracing::warn!(id = %item.id, "finished in ledger but missing from output, refetching");
            plan.reconciled += 1;
        }
        plan.pending.push(item);
    }

    plan
}

/// What became of one submitted item
#[derive(Debug)]
enum ItemResult {
    Succeeded,
    Failed,
    /// Not started because the run was halted
    Skipped,
    /// The ledger or output store is unusable; the run must stop
    StoreFailure(String),
}

/// State shared by every worker task of a run
struct Worker {
    fetch: Arc<FetchClient>,
    ledger: Arc<dyn ProgressLedger>,
    sink: Arc<CsvSink>,
    halt: HaltHandle,
    completed: AtomicUsize,
    total: usize,
    started: Instant,
}

impl Worker {
    /// Runs one item through mark-in-progress, fetch, sink and ledger
    ///
    /// The record is in the sink buffer before `mark_finished` is called, and
    /// a flush is still guaranteed (when due here, or at the end of the run).
    async fn process(&self, item: WorkItem) -> ItemResult {
        if self.halt.is_halted() {
            return ItemResult::Skipped;
        }

        if let Err(e) = self.ledger.mark_in_progress(&item).await {
            tracing::warn!(id = %item.id, error = %e, "could not record in_progress");
        }

        // A panicking fetcher must still leave a `failed` entry behind
        let fetch = self.fetch.clone();
        let owned = item.clone();
        let outcome = tokio::spawn(async move { fetch.fetch(&owned).await }).await;

        let result = match outcome {
            Ok(FetchOutcome::Success(record)) => self.store(&item, record).await,
            Ok(FetchOutcome::Failure(failure)) => {
                tracing::warn!(
                    id = %item.id,
                    attempts = failure.attempts,
                    retries_exhausted = failure.retries_exhausted,
                    "item failed: {}",
                    failure.cause
                );
                self.record_failure(&item, &failure.cause).await
            }
            Err(e) => {
                tracing::error!(id = %item.id, error = %e, "fetch task failed");
                self.record_failure(&item, &format!("fetch task failed: {}", e))
                    .await
            }
        };

        self.report_progress();
        result
    }

    async fn store(&self, item: &WorkItem, record: Record) -> ItemResult {
        if self.sink.append(record).await {
            if let Err(e) = self.sink.flush().await {
                if e.is_store_level() {
                    return self.store_failure(item, &e.to_string());
                }
                tracing::error!(id = %item.id, error = %e, "output flush failed");
                return self
                    .record_failure(item, &format!("output flush failed: {}", e))
                    .await;
            }
        }

        match self.ledger.mark_finished(item).await {
            Ok(()) => {
                tracing::debug!(id = %item.id, "finished");
                ItemResult::Succeeded
            }
            Err(e) => self.ledger_failure(item, e),
        }
    }

    async fn record_failure(&self, item: &WorkItem, cause: &str) -> ItemResult {
        match self.ledger.mark_failed(item, cause).await {
            Ok(()) => ItemResult::Failed,
            Err(e) => self.ledger_failure(item, e),
        }
    }

    fn ledger_failure(&self, item: &WorkItem, err: LedgerError) -> ItemResult {
        if err.is_store_level() {
            return self.store_failure(item, &err.to_string());
        }
        tracing::error!(id = %item.id, error = %err, "ledger append failed");
        ItemResult::Failed
    }

    fn store_failure(&self, item: &WorkItem, cause: &str) -> ItemResult {
        tracing::error!(id = %item.id, "store unavailable, halting run: {}", cause);
        self.halt.halt();
        ItemResult::StoreFailure(cause.to_string())
    }

    fn report_progress(&self) {
        let completed = self.completed.fetch_add(1, Ordering::SeqCst) + 1;
        if completed % 10 == 0 {
            let rate = completed as f64 / self.started.elapsed().as_secs_f64().max(0.001);
            tracing::info!(
                "Progress: {} / {} items done, {:.2} items/sec",
                completed,
                self.total,
                rate
            );
        }
    }
}

/// Resumable crawl over one discovery source
pub struct CrawlDriver {
    discovery: Arc<dyn Discovery>,
    fetch: Arc<FetchClient>,
    ledger: Arc<dyn ProgressLedger>,
    sink: Arc<CsvSink>,
    concurrency: usize,
    halt: HaltHandle,
}

impl CrawlDriver {
    /// Creates a driver
    ///
    /// # Arguments
    ///
    /// * `discovery` - Produces the run's work items
    /// * `fetch` - Retrying detail client
    /// * `ledger` - Durable progress ledger
    /// * `sink` - Output sink, already opened
    /// * `concurrency` - Maximum items in flight
    pub fn new(
        discovery: Arc<dyn Discovery>,
        fetch: FetchClient,
        ledger: Arc<dyn ProgressLedger>,
        sink: Arc<CsvSink>,
        concurrency: usize,
    ) -> Self {
        Self {
            discovery,
            fetch: Arc::new(fetch),
            ledger,
            sink,
            concurrency: concurrency.max(1),
            halt: HaltHandle::new(),
        }
    }

    /// Uses an externally owned halt handle (e.g. one wired to Ctrl-C)
    pub fn with_halt_handle(mut self, halt: HaltHandle) -> Self {
        self.halt = halt;
        self
    }

    pub fn halt_handle(&self) -> HaltHandle {
        self.halt.clone()
    }

    /// Runs the crawl to completion
    ///
    /// Per-item failures are recorded in the ledger and counted; they never
    /// fail the run. The run itself fails when the ledger cannot be read,
    /// discovery fails, a store becomes unusable, or the final flush fails.
    pub async fn run(&self) -> Result<RunSummary, HarvestError> {
        let started = Instant::now();

        self.ledger.init().await?;
        let finished = self.ledger.load_finished_ids().await?;
        tracing::info!("Ledger lists {} finished items", finished.len());

        let items = self.discovery.discover().await?;
        let discovered = items.len();
        let written = self.sink.ids().await;

        let plan = plan(items, &finished, &written);
        if plan.duplicates > 0 {
            tracing::warn!("Discovery returned {} duplicate ids", plan.duplicates);
        }
        if plan.reconciled > 0 {
            tracing::warn!(
                "{} finished items were missing from the output and will be refetched",
                plan.reconciled
            );
        }

        let mut summary = RunSummary {
            discovered,
            already_finished: plan.already_finished,
            pending: plan.pending.len(),
            ..RunSummary::default()
        };

        if plan.pending.is_empty() {
            tracing::info!(
                "Nothing to do: all {} items already finished",
                plan.already_finished
            );
            summary.elapsed = started.elapsed();
            return Ok(summary);
        }

        tracing::info!(
            "Fetching {} items ({} already finished) with concurrency {}",
            summary.pending,
            summary.already_finished,
            self.concurrency
        );

        let worker = Arc::new(Worker {
            fetch: self.fetch.clone(),
            ledger: self.ledger.clone(),
            sink: self.sink.clone(),
            halt: self.halt.clone(),
            completed: AtomicUsize::new(0),
            total: summary.pending,
            started,
        });

        let mut queue = WorkQueue::new(self.concurrency);
        let mut submitted = 0;
        for item in plan.pending {
            if self.halt.is_halted() {
                break;
            }
            let worker = worker.clone();
            if !queue
                .submit(move || async move { worker.process(item).await })
                .await
            {
                break;
            }
            submitted += 1;
        }
        summary.skipped = summary.pending - submitted;

        let drained = queue.drain().await;
        let mut store_failure = None;
        for result in drained.results {
            match result {
                ItemResult::Succeeded => summary.succeeded += 1,
                ItemResult::Failed => summary.failed += 1,
                ItemResult::Skipped => summary.skipped += 1,
                ItemResult::StoreFailure(cause) => {
                    summary.failed += 1;
                    store_failure.get_or_insert(cause);
                }
            }
        }
        summary.failed += drained.panicked;

        let flushed = self.sink.flush().await;
        summary.elapsed = started.elapsed();

        if let Some(cause) = store_failure {
            if let Err(e) = flushed {
                tracing::error!("Final flush failed: {}", e);
            }
            return Err(HarvestError::StoreUnavailable(cause));
        }
        let rows = flushed.map_err(|e: SinkError| {
            tracing::error!("Final flush failed: {}", e);
            e
        })?;

        summary.interrupted = self.halt.is_halted();
        if summary.interrupted {
            tracing::warn!(
                "Run interrupted: {} items not started, resume to continue",
                summary.skipped
            );
        }

        tracing::info!(
            "Run complete: {} succeeded, {} failed, {} rows in {} ({:.1}s)",
            summary.succeeded,
            summary.failed,
            rows,
            self.sink.path().display(),
            summary.elapsed.as_secs_f64()
        );

        Ok(summary)
    }
}
