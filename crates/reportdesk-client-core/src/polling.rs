//! Periodic status refresh for the active job and the exactly-once delivery
//! trigger.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::api::{DownloadAction, ReportApi, StatusPayload, UploadListing};
use crate::controller::JobLifecycleController;
use crate::error::ClientError;
use crate::job::JobStatus;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(3_500);

/// Server view of a job gathered by one poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobSnapshot {
    Status(StatusPayload),
    Listing(UploadListing),
}

/// Reads job status. When the status endpoint does not know the job yet
/// (404), the upload listing is used for this cycle instead.
pub async fn fetch_job_snapshot(
    api: &dyn ReportApi,
    session_token: &str,
    job_id: &str,
) -> Result<JobSnapshot, ClientError> {
    match api.job_status(session_token, job_id).await {
        Ok(payload) => Ok(JobSnapshot::Status(payload)),
        Err(error) if error.is_not_found() => {
            tracing::debug!(job_id, "status endpoint returned 404; falling back to upload listing");
            api.list_uploads(session_token, job_id)
                .await
                .map(JobSnapshot::Listing)
        }
        Err(error) => Err(error),
    }
}

/// Receives the download for a delivered job (opens it, saves it, ...).
#[async_trait]
pub trait DeliverySink: Send + Sync {
    async fn deliver(&self, action: DownloadAction);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// Snapshot applied; `delivered` is true when this cycle fired the
    /// delivery trigger.
    Updated { status: JobStatus, delivered: bool },
    /// The job was replaced or the run cancelled; nothing was applied.
    Stale,
    /// The fetch failed; the next cycle tries again.
    Failed(ClientError),
}

struct PollRun {
    job_id: String,
    cancelled: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

impl Drop for PollRun {
    fn drop(&mut self) {
        self.cancelled.store(true, Ordering::Release);
        self.handle.abort();
    }
}

pub struct PollingScheduler {
    controller: Arc<JobLifecycleController>,
    sink: Arc<dyn DeliverySink>,
    interval: Duration,
    run: Mutex<Option<PollRun>>,
}

impl PollingScheduler {
    pub fn new(controller: Arc<JobLifecycleController>, sink: Arc<dyn DeliverySink>) -> Self {
        Self::with_interval(controller, sink, DEFAULT_POLL_INTERVAL)
    }

    pub fn with_interval(
        controller: Arc<JobLifecycleController>,
        sink: Arc<dyn DeliverySink>,
        interval: Duration,
    ) -> Self {
        Self {
            controller,
            sink,
            interval: interval.max(Duration::from_millis(100)),
            run: Mutex::new(None),
        }
    }

    /// Starts polling `job_id`, cancelling any previous run. Must be called
    /// from within a tokio runtime.
    pub fn start(&self, job_id: &str) {
        let cancelled = Arc::new(AtomicBool::new(false));
        let handle = tokio::spawn(run_loop(
            self.controller.clone(),
            self.sink.clone(),
            job_id.to_string(),
            self.interval,
            cancelled.clone(),
        ));
        let previous = self.run_guard().replace(PollRun {
            job_id: job_id.to_string(),
            cancelled,
            handle,
        });
        if let Some(previous) = previous {
            tracing::debug!(job_id = %previous.job_id, "cancelling previous poll run");
            drop(previous);
        }
        tracing::info!(job_id, interval_ms = self.interval.as_millis() as u64, "polling started");
    }

    pub fn stop(&self) {
        if let Some(run) = self.run_guard().take() {
            tracing::info!(job_id = %run.job_id, "polling stopped");
            drop(run);
        }
    }

    /// Job id of the current run, if its task is still alive.
    pub fn running_job_id(&self) -> Option<String> {
        self.run_guard()
            .as_ref()
            .filter(|run| !run.handle.is_finished())
            .map(|run| run.job_id.clone())
    }

    /// Waits for the current run to end on its own (terminal status or job
    /// replacement). Dropping the returned future cancels the run.
    pub async fn wait(&self) {
        let run = self.run_guard().take();
        if let Some(mut run) = run {
            if let Err(error) = (&mut run.handle).await {
                if !error.is_cancelled() {
                    tracing::warn!(%error, "poll task ended abnormally");
                }
            }
        }
    }

    /// Runs one cycle inline, outside the timer.
    pub async fn poll_once(&self, job_id: &str) -> PollOutcome {
        let cancelled = AtomicBool::new(false);
        poll_cycle(&self.controller, &self.sink, job_id, &cancelled).await
    }

    fn run_guard(&self) -> MutexGuard<'_, Option<PollRun>> {
        self.run.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for PollingScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn run_loop(
    controller: Arc<JobLifecycleController>,
    sink: Arc<dyn DeliverySink>,
    job_id: String,
    interval: Duration,
    cancelled: Arc<AtomicBool>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        ticker.tick().await;
        match poll_cycle(&controller, &sink, &job_id, &cancelled).await {
            PollOutcome::Stale => {
                tracing::debug!(%job_id, "poll run no longer current");
                break;
            }
            PollOutcome::Updated { status, .. } if status.is_terminal() => {
                tracing::info!(%job_id, %status, "job reached a terminal status");
                break;
            }
            PollOutcome::Updated { .. } => {}
            PollOutcome::Failed(error) => {
                tracing::warn!(%job_id, code = error.code(), %error, "poll cycle failed");
            }
        }
    }
}

// The cancel flag and the active job id are both checked before the request
// and again before the response is applied.
async fn poll_cycle(
    controller: &JobLifecycleController,
    sink: &Arc<dyn DeliverySink>,
    job_id: &str,
    cancelled: &AtomicBool,
) -> PollOutcome {
    if cancelled.load(Ordering::Acquire) || controller.active_job_id().as_deref() != Some(job_id) {
        return PollOutcome::Stale;
    }

    let snapshot = match controller.fetch_snapshot(job_id).await {
        Ok(snapshot) => snapshot,
        Err(error) => return PollOutcome::Failed(error),
    };

    if cancelled.load(Ordering::Acquire) {
        return PollOutcome::Stale;
    }
    let Some(status) = controller.apply_snapshot(job_id, &snapshot) else {
        return PollOutcome::Stale;
    };

    let mut delivered = false;
    if status == JobStatus::Delivered && controller.auto_deliver_enabled() {
        if let Some(token) = controller.session_token() {
            if controller.claim_delivery(job_id) {
                let action = DownloadAction {
                    job_id: job_id.to_string(),
                    url: controller.api().download_url(&token, job_id),
                };
                tracing::info!(job_id, "auto-delivering document");
                deliver_detached(sink.clone(), action).await;
                delivered = true;
            }
        }
    }

    PollOutcome::Updated { status, delivered }
}

// Runs on its own task so aborting the poll run cannot cut a claimed delivery
// short.
async fn deliver_detached(sink: Arc<dyn DeliverySink>, action: DownloadAction) {
    let job_id = action.job_id.clone();
    let handle = tokio::spawn(async move { sink.deliver(action).await });
    if let Err(error) = handle.await {
        tracing::warn!(%job_id, %error, "delivery task ended abnormally");
    }
}
