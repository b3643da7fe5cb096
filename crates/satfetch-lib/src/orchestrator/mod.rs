mod aggregate;
mod state;

pub use aggregate::{AggregateResult, BatchStatus, ResultSink, Summary};
pub use state::{DownloadTask, ItemReport, ItemState, TerminalState};

use crate::catalog::{Availability, Catalog, CatalogError, Item, ItemId, OnlineStatus};
use crate::download::{DownloadOptions, DownloadOutcome, Downloader, FailureReason};
use crate::retrieval::{OfflineTrigger, RejectReason, RetrievalLedger, TriggerOutcome};
use futures::stream::{self, StreamExt};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{Instant, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OrchestrationError {
    #[error("All {items} products failed with invalid credentials")]
    SystemicAuthFailure { items: usize },

    #[error("Invalid download options: {details}")]
    InvalidOptions { details: String },
}

/// Stops the runs of one orchestrator: in-flight transfers end with their partial file kept,
/// everything else is reported as cancelled. Once cancelled, later runs stop immediately too.
#[derive(Clone, Debug)]
pub struct CancelHandle {
    token: CancellationToken,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// Downloads batches of catalog products, waiting for archived ones to come back online.
pub struct Orchestrator {
    catalog: Catalog,
    options: DownloadOptions,
    downloader: Arc<Downloader>,
    cancel: CancellationToken,
}

impl Orchestrator {
    pub fn new(catalog: Catalog, options: DownloadOptions) -> Result<Self, OrchestrationError> {
        let problems = options.validate();
        if !problems.is_empty() {
            return Err(OrchestrationError::InvalidOptions {
                details: problems.join(", "),
            });
        }
        let downloader = Arc::new(Downloader::new(catalog.transport(), &options));
        Ok(Self {
            catalog,
            options,
            downloader,
            cancel: CancellationToken::new(),
        })
    }

    pub fn options(&self) -> &DownloadOptions {
        &self.options
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            token: self.cancel.clone(),
        }
    }

    /// Runs a single item through the same lifecycle as a batch.
    pub async fn download_one(&self, item: &Item, destination: &Path) -> DownloadOutcome {
        match self.download_many(vec![item.clone()], destination).await {
            Ok(mut result) => result
                .items
                .remove(&item.id)
                .map(|report| report.outcome)
                .unwrap_or_else(|| {
                    DownloadOutcome::Failed(FailureReason::Internal(
                        "no outcome was recorded".to_string(),
                    ))
                }),
            Err(OrchestrationError::SystemicAuthFailure { .. }) => {
                DownloadOutcome::Failed(FailureReason::Unauthorized)
            }
            Err(err) => DownloadOutcome::Failed(FailureReason::Internal(err.to_string())),
        }
    }

    pub async fn download_many(
        &self,
        items: Vec<Item>,
        destination: &Path,
    ) -> Result<AggregateResult, OrchestrationError> {
        let requests = items.into_iter().map(Request::Item).collect();
        self.run(requests, destination).await
    }

    /// Like [`Orchestrator::download_many`], fetching each product's metadata first.
    pub async fn download_ids(
        &self,
        ids: Vec<ItemId>,
        destination: &Path,
    ) -> Result<AggregateResult, OrchestrationError> {
        let requests = ids.into_iter().map(Request::Id).collect();
        self.run(requests, destination).await
    }

    async fn run(
        &self,
        requests: Vec<Request>,
        destination: &Path,
    ) -> Result<AggregateResult, OrchestrationError> {
        let requests = deduplicate(requests);
        info!(items = requests.len(), destination = %destination.display(), "Starting batch");

        let ctx = Arc::new(RunContext::new(self, destination));
        let deadline_timer = ctx.stop.arm_deadline(self.options.batch_timeout);

        let tasks = ctx.classify(requests).await;

        let mut join_set = JoinSet::new();
        let mut task_items = HashMap::new();
        for task in tasks {
            let id = task.item().id.clone();
            let task_ctx = ctx.clone();
            let handle = join_set.spawn(async move {
                let id = task.item().id.clone();
                let report = task_ctx.drive(task).await;
                task_ctx.record(id, report);
            });
            task_items.insert(handle.id(), id);
        }

        while let Some(joined) = join_set.join_next_with_id().await {
            let Err(err) = joined else {
                continue;
            };
            if let Some(id) = task_items.get(&err.id()) {
                tracing::error!(id = %id, error = %err, "Download task failed");
                ctx.record(
                    id.clone(),
                    ItemReport {
                        outcome: DownloadOutcome::Failed(FailureReason::Internal(err.to_string())),
                        terminal: TerminalState::Done,
                        attempts: 0,
                    },
                );
            }
        }
        if let Some(timer) = deadline_timer {
            timer.abort();
        }

        let result = ctx.sink.take_result();
        let summary = result.summary;
        info!(
            succeeded = summary.succeeded,
            failed = summary.failed,
            given_up = summary.given_up,
            cancelled = summary.cancelled,
            skipped = summary.skipped,
            status = ?result.status,
            "Batch finished"
        );

        if result.all_unauthorized() {
            return Err(OrchestrationError::SystemicAuthFailure {
                items: result.items.len(),
            });
        }
        Ok(result)
    }
}

enum Request {
    Id(ItemId),
    Item(Item),
}

impl Request {
    fn id(&self) -> &ItemId {
        match self {
            Request::Id(id) => id,
            Request::Item(item) => &item.id,
        }
    }
}

/// Keeps the first request per id, in input order.
fn deduplicate(requests: Vec<Request>) -> Vec<Request> {
    let mut seen = HashSet::new();
    requests
        .into_iter()
        .filter(|request| {
            let fresh = seen.insert(request.id().clone());
            if !fresh {
                debug!(id = %request.id(), "Ignoring duplicate product");
            }
            fresh
        })
        .collect()
}

/// Picks `<title>.<ext>`, or `<title>_<id>.<ext>` when an earlier item of the batch took the name.
fn assign_filename(item: &Item, extension: &str, used: &mut HashSet<String>) -> String {
    let name = item.filename(extension);
    if used.insert(name.clone()) {
        return name;
    }
    let unique = item.unique_filename(extension);
    debug!(id = %item.id, taken = %name, name = %unique, "Filename already used in this batch");
    used.insert(unique.clone());
    unique
}

fn metadata_failure(err: CatalogError) -> FailureReason {
    match err {
        CatalogError::Unauthorized { .. } => FailureReason::Unauthorized,
        CatalogError::Transport(err) => FailureReason::Network {
            reason: err.to_string(),
        },
        err => FailureReason::Metadata(err.to_string()),
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum StopCause {
    Deadline,
    FailFast,
}

/// Everything that ends a run early. Without a recorded cause the stop came from a user cancel.
#[derive(Clone)]
struct StopSignal {
    token: CancellationToken,
    cause: Arc<OnceLock<StopCause>>,
}

impl StopSignal {
    fn new(parent: &CancellationToken) -> Self {
        Self {
            token: parent.child_token(),
            cause: Arc::new(OnceLock::new()),
        }
    }

    /// Only the first cause is kept.
    fn stop(&self, cause: StopCause) {
        if !self.token.is_cancelled() {
            let _ = self.cause.set(cause);
        }
        self.token.cancel();
    }

    fn arm_deadline(&self, timeout: Option<Duration>) -> Option<JoinHandle<()>> {
        let timeout = timeout?;
        let signal = self.clone();
        Some(tokio::spawn(async move {
            tokio::select! {
                _ = sleep(timeout) => {
                    warn!(timeout_secs = timeout.as_secs(), "Batch deadline reached, stopping");
                    signal.stop(StopCause::Deadline);
                }
                _ = signal.token.cancelled() => {}
            }
        }))
    }

    fn is_stopped(&self) -> bool {
        self.token.is_cancelled()
    }

    async fn stopped(&self) {
        self.token.cancelled().await
    }

    fn outcome(&self) -> (DownloadOutcome, TerminalState) {
        if self.cause.get() == Some(&StopCause::Deadline) {
            (
                DownloadOutcome::Failed(FailureReason::DeadlineExceeded),
                TerminalState::GivenUp,
            )
        } else {
            (
                DownloadOutcome::Failed(FailureReason::Cancelled),
                TerminalState::Cancelled,
            )
        }
    }

    fn report(&self) -> ItemReport {
        let (outcome, terminal) = self.outcome();
        ItemReport {
            outcome,
            terminal,
            attempts: 0,
        }
    }
}

enum Retrieval {
    Online,
    Stopped,
    Finished(DownloadOutcome, TerminalState),
}

/// State shared by the tasks of one run.
struct RunContext {
    catalog: Catalog,
    downloader: Arc<Downloader>,
    retrieval: OfflineTrigger,
    options: DownloadOptions,
    destination: PathBuf,
    download_permits: Semaphore,
    catalog_permits: Semaphore,
    stop: StopSignal,
    sink: ResultSink,
}

impl RunContext {
    fn new(orchestrator: &Orchestrator, destination: &Path) -> Self {
        let options = orchestrator.options.clone();
        let ledger = Arc::new(RetrievalLedger::new(options.trigger_interval));
        Self {
            catalog: orchestrator.catalog.clone(),
            downloader: orchestrator.downloader.clone(),
            retrieval: OfflineTrigger::new(orchestrator.catalog.transport(), ledger),
            download_permits: Semaphore::new(options.concurrency),
            catalog_permits: Semaphore::new(options.catalog_concurrency),
            destination: destination.to_path_buf(),
            stop: StopSignal::new(&orchestrator.cancel),
            sink: ResultSink::new(),
            options,
        }
    }

    /// Resolves metadata, assigns filenames and probes availability, in input order.
    /// Items that are already settled are recorded; the rest are returned for driving.
    async fn classify(&self, requests: Vec<Request>) -> Vec<DownloadTask> {
        let limit = self.options.catalog_concurrency;
        let resolved: Vec<_> = stream::iter(requests)
            .map(|request| self.resolve(request))
            .buffered(limit)
            .collect()
            .await;

        let mut used = HashSet::new();
        let mut tasks = Vec::with_capacity(resolved.len());
        for entry in resolved {
            match entry {
                Ok(item) => {
                    let name = assign_filename(&item, &self.options.file_extension, &mut used);
                    let path = self.destination.join(name);
                    tasks.push(DownloadTask::new(item, path));
                }
                Err((id, report)) => {
                    self.record(id, report);
                }
            }
        }

        let classified: Vec<_> = stream::iter(tasks)
            .map(|task| self.probe_task(task))
            .buffered(limit)
            .collect()
            .await;
        classified.into_iter().flatten().collect()
    }

    async fn resolve(&self, request: Request) -> Result<Item, (ItemId, ItemReport)> {
        let id = match request {
            Request::Item(item) => return Ok(item),
            Request::Id(id) => id,
        };
        let resolved = tokio::select! {
            biased;
            _ = self.stop.stopped() => None,
            resolved = self.catalog.resolve(&id) => Some(resolved),
        };
        match resolved {
            None => Err((id, self.stop.report())),
            Some(Ok(item)) => Ok(item),
            Some(Err(err)) => {
                warn!(id = %id, error = %err, "Failed to fetch product metadata");
                let report = ItemReport {
                    outcome: DownloadOutcome::Failed(metadata_failure(err)),
                    terminal: TerminalState::Done,
                    attempts: 0,
                };
                Err((id, report))
            }
        }
    }

    async fn probe_task(&self, mut task: DownloadTask) -> Option<DownloadTask> {
        let id = task.item().id.clone();
        if self.stop.is_stopped() {
            self.finish_stopped(task);
            return None;
        }

        // An existing final file is trusted; probing or triggering it would only spend quota.
        match tokio::fs::try_exists(task.path()).await {
            Ok(true) => {
                debug!(id = %id, path = %task.path().display(), "Product already downloaded");
                let outcome = DownloadOutcome::Succeeded {
                    path: task.path().to_path_buf(),
                    bytes_written: 0,
                };
                self.record(id, task.finish(outcome, TerminalState::Done));
                return None;
            }
            Ok(false) => {}
            Err(err) => {
                let outcome = DownloadOutcome::Failed(FailureReason::Io(err.to_string()));
                self.record(id, task.finish(outcome, TerminalState::Done));
                return None;
            }
        }

        let probed = tokio::select! {
            biased;
            _ = self.stop.stopped() => None,
            probed = self.probe(task.item()) => Some(probed),
        };
        let Some(probed) = probed else {
            self.finish_stopped(task);
            return None;
        };
        let catalog_flag = task.item().online;
        match probed {
            Ok(Availability::Online) => task.mark_online(),
            Ok(Availability::Offline) => task.mark_offline(),
            Err(err) => {
                warn!(id = %id, error = %err, "Failed to probe product");
                let outcome = DownloadOutcome::Failed(metadata_failure(err));
                self.record(id, task.finish(outcome, TerminalState::Done));
                return None;
            }
        }
        if catalog_flag != OnlineStatus::Unknown && catalog_flag != task.item().online {
            debug!(id = %id, catalog = ?catalog_flag, probed = ?task.item().online, "Catalog online flag disagrees with probe");
        }
        Some(task)
    }

    async fn drive(&self, mut task: DownloadTask) -> ItemReport {
        let max_attempts = self.options.max_attempts;
        loop {
            if self.stop.is_stopped() {
                return self.stopped(task);
            }
            match task.state() {
                ItemState::Online => {
                    let permit = tokio::select! {
                        biased;
                        _ = self.stop.stopped() => continue,
                        permit = self.download_permits.acquire() => permit,
                    };
                    let Ok(permit) = permit else {
                        let reason = FailureReason::Internal("download limiter closed".to_string());
                        return task.finish(DownloadOutcome::Failed(reason), TerminalState::Done);
                    };
                    task.start_download();
                    let outcome = self
                        .downloader
                        .download_to(task.item(), task.path(), &self.stop.token)
                        .await;
                    drop(permit);

                    let id = &task.item().id;
                    let Some(reason) = outcome.failure() else {
                        return task.finish(outcome, TerminalState::Done);
                    };
                    if *reason == FailureReason::Cancelled {
                        return self.stopped(task);
                    }
                    let retryable = reason.is_retryable() || *reason == FailureReason::Offline;
                    if !retryable {
                        return task.finish(outcome, TerminalState::Done);
                    }
                    if task.attempts() >= max_attempts {
                        warn!(id = %id, attempts = task.attempts(), %reason, "Giving up on product");
                        return task.finish(outcome, TerminalState::GivenUp);
                    }
                    if *reason == FailureReason::Offline {
                        info!(id = %id, "Product went offline, requesting retrieval");
                        task.mark_offline();
                    } else {
                        warn!(id = %id, attempt = task.attempts(), %reason, "Download failed, retrying");
                        task.retry();
                    }
                }
                ItemState::Retrying => {
                    tokio::select! {
                        biased;
                        _ = self.stop.stopped() => continue,
                        _ = sleep(self.options.retry_delay) => {}
                    }
                    task.mark_online();
                }
                ItemState::Offline => match self.await_retrieval(&task).await {
                    Retrieval::Online => task.mark_online(),
                    Retrieval::Stopped => continue,
                    Retrieval::Finished(outcome, terminal) => return task.finish(outcome, terminal),
                },
                state => {
                    let reason = FailureReason::Internal(format!("cannot drive a product in state {state:?}"));
                    return task.finish(DownloadOutcome::Failed(reason), TerminalState::Done);
                }
            }
        }
    }

    /// Trigger, wait and re-probe until the item is online, rejected or out of time.
    async fn await_retrieval(&self, task: &DownloadTask) -> Retrieval {
        let item = task.item();
        let poll_interval = self.options.poll_interval;
        let deadline = self
            .options
            .offline_timeout
            .map(|timeout| task.offline_since().unwrap_or_else(Instant::now) + timeout);

        loop {
            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                warn!(id = %item.id, "Product is still offline, giving up");
                return Retrieval::Finished(
                    DownloadOutcome::Failed(FailureReason::StillOffline),
                    TerminalState::GivenUp,
                );
            }

            let triggered = tokio::select! {
                biased;
                _ = self.stop.stopped() => return Retrieval::Stopped,
                triggered = self.trigger(item) => triggered,
            };
            match triggered {
                TriggerOutcome::AlreadyOnline => return Retrieval::Online,
                TriggerOutcome::Accepted => {
                    info!(id = %item.id, "Retrieval from the archive accepted");
                }
                TriggerOutcome::AlreadyTriggered => {}
                TriggerOutcome::Rejected(reason) if reason.is_transient() => {
                    debug!(id = %item.id, %reason, "Retrieval not accepted, trying again later");
                }
                TriggerOutcome::Rejected(RejectReason::Unauthorized) => {
                    return Retrieval::Finished(
                        DownloadOutcome::Failed(FailureReason::Unauthorized),
                        TerminalState::Done,
                    );
                }
                TriggerOutcome::Rejected(reason) => {
                    warn!(id = %item.id, %reason, "Retrieval rejected");
                    return Retrieval::Finished(
                        DownloadOutcome::Failed(FailureReason::Rejected(reason)),
                        TerminalState::Done,
                    );
                }
            }

            let wait = match deadline {
                Some(deadline) => {
                    poll_interval.min(deadline.saturating_duration_since(Instant::now()))
                }
                None => poll_interval,
            };
            tokio::select! {
                biased;
                _ = self.stop.stopped() => return Retrieval::Stopped,
                _ = sleep(wait) => {}
            }

            let probed = tokio::select! {
                biased;
                _ = self.stop.stopped() => return Retrieval::Stopped,
                probed = self.probe(item) => probed,
            };
            match probed {
                Ok(Availability::Online) => {
                    info!(id = %item.id, "Product is online");
                    return Retrieval::Online;
                }
                Ok(Availability::Offline) => {}
                Err(err) if err.is_unauthorized() => {
                    return Retrieval::Finished(
                        DownloadOutcome::Failed(FailureReason::Unauthorized),
                        TerminalState::Done,
                    );
                }
                Err(err) => debug!(id = %item.id, error = %err, "Probe failed"),
            }
        }
    }

    async fn probe(&self, item: &Item) -> Result<Availability, CatalogError> {
        let _permit = self.catalog_permits.acquire().await.ok();
        self.catalog.probe(item).await
    }

    async fn trigger(&self, item: &Item) -> TriggerOutcome {
        let _permit = self.catalog_permits.acquire().await.ok();
        self.retrieval.trigger(item).await
    }

    fn stopped(&self, task: DownloadTask) -> ItemReport {
        let (outcome, terminal) = self.stop.outcome();
        task.finish(outcome, terminal)
    }

    fn finish_stopped(&self, task: DownloadTask) {
        let id = task.item().id.clone();
        let report = self.stopped(task);
        self.record(id, report);
    }

    fn record(&self, id: ItemId, report: ItemReport) {
        let failed =
            report.terminal != TerminalState::Cancelled && report.outcome.failure().is_some();
        if failed && self.options.fail_fast && !self.stop.is_stopped() {
            warn!(id = %id, outcome = ?report.outcome, "Product failed, cancelling the rest of the batch");
            self.stop.stop(StopCause::FailFast);
        }
        self.sink.record(id, report);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Checksum, ChecksumAlgorithm};

    fn item(id: &str, title: &str) -> Item {
        Item {
            id: ItemId::from(id),
            title: title.to_string(),
            size: 1,
            checksum: Checksum::from_hex(ChecksumAlgorithm::Md5, "00").unwrap(),
            online: OnlineStatus::Unknown,
            download_url: String::new(),
        }
    }

    #[test]
    fn test_deduplicate_keeps_first_in_order() {
        let requests = vec![
            Request::Id(ItemId::from("b")),
            Request::Id(ItemId::from("a")),
            Request::Item(item("b", "later")),
            Request::Id(ItemId::from("c")),
        ];
        let ids: Vec<_> = deduplicate(requests)
            .iter()
            .map(|request| request.id().to_string())
            .collect();
        assert_eq!(ids, ["b", "a", "c"]);
    }

    #[test]
    fn test_colliding_titles_get_unique_names() {
        let mut used = HashSet::new();
        assert_eq!(
            assign_filename(&item("1", "S1A_IW"), "zip", &mut used),
            "S1A_IW.zip"
        );
        assert_eq!(
            assign_filename(&item("2", "S1A_IW"), "zip", &mut used),
            "S1A_IW_2.zip"
        );
        assert_eq!(
            assign_filename(&item("3", "S1B_IW"), "zip", &mut used),
            "S1B_IW.zip"
        );
    }

    #[test]
    fn test_metadata_failure_mapping() {
        assert_eq!(
            metadata_failure(CatalogError::Unauthorized { url: "u".into() }),
            FailureReason::Unauthorized
        );
        assert!(matches!(
            metadata_failure(CatalogError::NotFound {
                id: ItemId::from("x")
            }),
            FailureReason::Metadata(_)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_marks_stop_as_given_up() {
        let parent = CancellationToken::new();
        let stop = StopSignal::new(&parent);
        let timer = stop.arm_deadline(Some(Duration::from_secs(5))).unwrap();

        stop.stopped().await;
        timer.await.unwrap();
        assert_eq!(
            stop.outcome(),
            (
                DownloadOutcome::Failed(FailureReason::DeadlineExceeded),
                TerminalState::GivenUp
            )
        );
        assert!(!parent.is_cancelled());
    }

    #[test]
    fn test_fail_fast_stop_reports_cancelled() {
        let parent = CancellationToken::new();
        let stop = StopSignal::new(&parent);
        stop.stop(StopCause::FailFast);
        // A deadline that fires afterwards does not change how siblings are reported.
        stop.stop(StopCause::Deadline);
        assert!(stop.is_stopped());
        assert_eq!(
            stop.outcome(),
            (
                DownloadOutcome::Failed(FailureReason::Cancelled),
                TerminalState::Cancelled
            )
        );
        assert!(!parent.is_cancelled());
    }

    #[test]
    fn test_user_cancel_propagates_to_run() {
        let parent = CancellationToken::new();
        let stop = StopSignal::new(&parent);
        parent.cancel();
        assert!(stop.is_stopped());
        assert_eq!(stop.outcome().1, TerminalState::Cancelled);
    }
}
