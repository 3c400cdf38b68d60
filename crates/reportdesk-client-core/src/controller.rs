//! Owner of the single active job: creation, upload checklist, submission.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use serde_json::Value;

use crate::api::{InitJobRequest, ReportApi, StatusPayload, UploadFile};
use crate::error::ClientError;
use crate::job::{Job, JobStatus, JobType};
use crate::polling::{JobSnapshot, fetch_job_snapshot};
use crate::store::PersistentStore;

struct ActiveJob {
    job: Job,
    submit_in_flight: Arc<AtomicBool>,
}

impl ActiveJob {
    fn new(job: Job) -> Self {
        Self {
            job,
            submit_in_flight: Arc::new(AtomicBool::new(false)),
        }
    }
}

/// Clears the submit flag when the submit future finishes or is dropped.
struct SubmitGuard(Arc<AtomicBool>);

impl Drop for SubmitGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct JobLifecycleController {
    api: Arc<dyn ReportApi>,
    store: Arc<PersistentStore>,
    active: Mutex<Option<ActiveJob>>,
    // Job ids whose delivery trigger has fired. Outlives job replacement so
    // re-attaching a delivered job does not deliver it again.
    delivered: Mutex<HashSet<String>>,
}

impl JobLifecycleController {
    pub fn new(api: Arc<dyn ReportApi>, store: Arc<PersistentStore>) -> Self {
        Self {
            api,
            store,
            active: Mutex::new(None),
            delivered: Mutex::new(HashSet::new()),
        }
    }

    pub fn active_job(&self) -> Option<Job> {
        self.active_guard().as_ref().map(|active| active.job.clone())
    }

    pub fn active_job_id(&self) -> Option<String> {
        self.active_guard()
            .as_ref()
            .map(|active| active.job.id().to_string())
    }

    /// Creates a job and makes it the active one, discarding the previous
    /// job entirely. Callers stop the previous job's polling first.
    pub async fn init(&self, job_type: JobType, inputs: Value) -> Result<Job, ClientError> {
        let token = self.require_token()?;
        if !self.store.capabilities().can_create_jobs() {
            return Err(ClientError::AccessBlocked);
        }

        let request = InitJobRequest { job_type, inputs };
        let response = self.api.init_job(&token, &request).await?;
        let job = Job::from_init(job_type, response);
        tracing::info!(
            job_id = job.id(),
            %job_type,
            required = job.required_sets().len(),
            "job initialized"
        );
        self.replace_active(job.clone());
        Ok(job)
    }

    /// Makes an existing server-side job the active one. Re-attaching the
    /// active job keeps its in-flight submit flag; delivery is remembered
    /// per job id either way.
    pub async fn attach(&self, job_id: &str) -> Result<Job, ClientError> {
        let token = self.require_token()?;
        let listing = self.api.list_uploads(&token, job_id).await?;
        let job = Job::from_listing(job_id, &listing);
        tracing::info!(job_id, status = %job.status(), "attached to existing job");
        self.replace_active(job.clone());
        Ok(job)
    }

    /// Uploads one file into `file_set`, then re-reads the server's listing
    /// rather than appending locally.
    pub async fn upload(&self, file_set: &str, file: Option<UploadFile>) -> Result<Job, ClientError> {
        let job_id = self.active_job_id().ok_or(ClientError::NoActiveJob)?;
        let file = file.ok_or(ClientError::MissingFile)?;
        let token = self.require_token()?;

        self.api
            .upload_file(&token, &job_id, file_set.trim(), &file)
            .await?;
        tracing::info!(%job_id, file_set, filename = %file.filename, bytes = file.bytes.len(), "file uploaded");
        self.refresh_job(&token, &job_id).await
    }

    pub async fn refresh_uploads(&self) -> Result<Job, ClientError> {
        let job_id = self.active_job_id().ok_or(ClientError::NoActiveJob)?;
        let token = self.require_token()?;
        self.refresh_job(&token, &job_id).await
    }

    /// Submits the active job for review once no required set is missing.
    pub async fn submit(&self) -> Result<Job, ClientError> {
        let (job_id, in_flight) = {
            let guard = self.active_guard();
            let active = guard.as_ref().ok_or(ClientError::NoActiveJob)?;
            (active.job.id().to_string(), active.submit_in_flight.clone())
        };
        if in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(ClientError::SubmitInFlight);
        }
        let _submit_guard = SubmitGuard(in_flight);

        let token = self.require_token()?;
        let job = self.refresh_job(&token, &job_id).await?;
        if !job.is_ready_to_submit() {
            let missing = job.missing_required_sets().iter().cloned().collect();
            return Err(ClientError::MissingRequiredSets(missing));
        }

        self.api.submit_job(&token, &job_id).await?;
        tracing::info!(%job_id, "job submitted for review");
        self.apply_snapshot(
            &job_id,
            &JobSnapshot::Status(StatusPayload::from_status(JobStatus::PendingReview.as_str())),
        );

        match fetch_job_snapshot(self.api.as_ref(), &token, &job_id).await {
            Ok(snapshot) => {
                self.apply_snapshot(&job_id, &snapshot);
            }
            Err(error) => {
                tracing::warn!(%job_id, code = error.code(), %error, "post-submit status poll failed");
            }
        }
        self.active_job_matching(&job_id).ok_or(ClientError::NoActiveJob)
    }

    /// Fetches the server's view of `job_id` without touching local state.
    pub async fn fetch_snapshot(&self, job_id: &str) -> Result<JobSnapshot, ClientError> {
        let token = self.require_token()?;
        fetch_job_snapshot(self.api.as_ref(), &token, job_id).await
    }

    /// Applies a snapshot if `job_id` is still the active job. Returns the
    /// resulting status, or `None` when the snapshot belongs to a job that
    /// has since been replaced.
    pub fn apply_snapshot(&self, job_id: &str, snapshot: &JobSnapshot) -> Option<JobStatus> {
        let mut guard = self.active_guard();
        let active = guard.as_mut().filter(|active| active.job.id() == job_id)?;
        let previous = active.job.status().clone();
        match snapshot {
            JobSnapshot::Status(payload) => active.job.apply_status(payload),
            JobSnapshot::Listing(listing) => active.job.apply_listing(listing),
        }
        let next = active.job.status().clone();
        if next != previous {
            tracing::info!(job_id, from = %previous, to = %next, "job status changed");
        }
        Some(next)
    }

    /// Stops tracking the active job and forgets past deliveries (logout).
    pub fn clear_active(&self) {
        if let Some(previous) = self.active_guard().take() {
            tracing::debug!(job_id = previous.job.id(), "active job cleared");
        }
        self.delivered_guard().clear();
    }

    /// Test-and-set of the delivery latch for `job_id`, which must be the
    /// active job. True at most once per job id.
    pub fn claim_delivery(&self, job_id: &str) -> bool {
        let guard = self.active_guard();
        if guard.as_ref().is_none_or(|active| active.job.id() != job_id) {
            return false;
        }
        self.delivered_guard().insert(job_id.to_string())
    }

    pub fn session_token(&self) -> Option<String> {
        self.store.load_token()
    }

    pub fn auto_deliver_enabled(&self) -> bool {
        self.store.load_auto_deliver()
    }

    pub(crate) fn api(&self) -> &dyn ReportApi {
        self.api.as_ref()
    }

    async fn refresh_job(&self, token: &str, job_id: &str) -> Result<Job, ClientError> {
        let listing = self.api.list_uploads(token, job_id).await?;
        self.apply_snapshot(job_id, &JobSnapshot::Listing(listing))
            .ok_or(ClientError::NoActiveJob)?;
        self.active_job_matching(job_id).ok_or(ClientError::NoActiveJob)
    }

    fn active_job_matching(&self, job_id: &str) -> Option<Job> {
        self.active_guard()
            .as_ref()
            .filter(|active| active.job.id() == job_id)
            .map(|active| active.job.clone())
    }

    fn replace_active(&self, job: Job) {
        let mut guard = self.active_guard();
        let next = match guard.take() {
            Some(previous) if previous.job.id() == job.id() => ActiveJob {
                job,
                submit_in_flight: previous.submit_in_flight,
            },
            Some(previous) => {
                tracing::debug!(job_id = previous.job.id(), "previous job discarded");
                ActiveJob::new(job)
            }
            None => ActiveJob::new(job),
        };
        *guard = Some(next);
    }

    fn require_token(&self) -> Result<String, ClientError> {
        self.store.load_token().ok_or(ClientError::MissingToken)
    }

    fn active_guard(&self) -> MutexGuard<'_, Option<ActiveJob>> {
        self.active
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // Always taken after `active` when both are held.
    fn delivered_guard(&self) -> MutexGuard<'_, HashSet<String>> {
        self.delivered
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
