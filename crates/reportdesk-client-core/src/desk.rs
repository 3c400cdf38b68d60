//! Wiring of auth, job tracking, and polling for one device session.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::api::ReportApi;
use crate::auth::AuthFlow;
use crate::controller::JobLifecycleController;
use crate::error::ClientError;
use crate::features::Capabilities;
use crate::job::{Job, JobType};
use crate::polling::{DeliverySink, PollingScheduler};
use crate::store::PersistentStore;

pub struct ReportDesk {
    store: Arc<PersistentStore>,
    auth: AuthFlow,
    jobs: Arc<JobLifecycleController>,
    scheduler: PollingScheduler,
}

impl ReportDesk {
    pub fn new(
        api: Arc<dyn ReportApi>,
        store: Arc<PersistentStore>,
        sink: Arc<dyn DeliverySink>,
        poll_interval: Duration,
    ) -> Self {
        let jobs = Arc::new(JobLifecycleController::new(api.clone(), store.clone()));
        Self {
            auth: AuthFlow::new(api, store.clone()),
            scheduler: PollingScheduler::with_interval(jobs.clone(), sink, poll_interval),
            jobs,
            store,
        }
    }

    pub fn auth(&self) -> &AuthFlow {
        &self.auth
    }

    pub fn jobs(&self) -> &JobLifecycleController {
        &self.jobs
    }

    pub fn scheduler(&self) -> &PollingScheduler {
        &self.scheduler
    }

    pub fn store(&self) -> &PersistentStore {
        &self.store
    }

    /// Derived from the stored grant at call time.
    pub fn capabilities(&self) -> Capabilities {
        self.store.capabilities()
    }

    /// Replaces the active job with a new one and starts polling it. The
    /// previous job's poller is stopped before the new job exists.
    pub async fn start_job(&self, job_type: JobType, inputs: Value) -> Result<Job, ClientError> {
        self.scheduler.stop();
        let job = self.jobs.init(job_type, inputs).await?;
        self.scheduler.start(job.id());
        Ok(job)
    }

    pub async fn attach_job(&self, job_id: &str) -> Result<Job, ClientError> {
        self.scheduler.stop();
        let job = self.jobs.attach(job_id).await?;
        self.scheduler.start(job.id());
        Ok(job)
    }

    /// Submits the active job and makes sure it is being polled.
    pub async fn submit(&self) -> Result<Job, ClientError> {
        let job = self.jobs.submit().await?;
        if self.scheduler.running_job_id().as_deref() != Some(job.id()) {
            self.scheduler.start(job.id());
        }
        Ok(job)
    }

    pub fn logout(&self) {
        self.scheduler.stop();
        self.jobs.clear_active();
        self.auth.logout();
    }
}
