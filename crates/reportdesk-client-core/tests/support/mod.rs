#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use reportdesk_client_core::api::{
    InitJobRequest, InitJobResponse, RequestLinkResponse, ReviewQueue, StatusPayload,
    UploadListing, VerifyResponse,
};
use reportdesk_client_core::{
    AccessGrant, ClientError, DeliverySink, DownloadAction, PersistentStore, ReportApi, Session,
    UploadFile, UploadedFile,
};
use serde_json::{Value, json};
use tokio::sync::Notify;

struct FakeJob {
    required: Vec<String>,
    files: Vec<UploadedFile>,
    status: String,
}

/// In-process stand-in for the report service. Records every call.
#[derive(Default)]
pub struct FakeApi {
    calls: Mutex<Vec<String>>,
    jobs: Mutex<HashMap<String, FakeJob>>,
    init_queue: Mutex<VecDeque<InitJobResponse>>,
    status_script: Mutex<VecDeque<Result<StatusPayload, ClientError>>>,
    status_unindexed: Mutex<HashSet<String>>,
    verify_result: Mutex<Option<Result<VerifyResponse, ClientError>>>,
    access_grant: Mutex<Value>,
    status_gate: Mutex<Option<Arc<Notify>>>,
    submit_gate: Mutex<Option<Arc<Notify>>>,
}

impl FakeApi {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn queue_init(&self, job_id: &str, required: &[&str], optional: &[&str]) {
        self.init_queue.lock().expect("lock").push_back(InitJobResponse {
            job_id: job_id.to_string(),
            required: required.iter().map(ToString::to_string).collect(),
            optional: optional.iter().map(ToString::to_string).collect(),
            warnings: Vec::new(),
        });
    }

    pub fn set_status(&self, job_id: &str, status: &str) {
        if let Some(job) = self.jobs.lock().expect("lock").get_mut(job_id) {
            job.status = status.to_string();
        }
    }

    /// Responses returned by `job_status` before falling back to job state.
    pub fn script_status(&self, results: Vec<Result<StatusPayload, ClientError>>) {
        self.status_script.lock().expect("lock").extend(results);
    }

    /// Makes `/jobs/status` answer 404 for `job_id`.
    pub fn unindex_status(&self, job_id: &str) {
        self.status_unindexed
            .lock()
            .expect("lock")
            .insert(job_id.to_string());
    }

    pub fn set_verify(&self, result: Result<VerifyResponse, ClientError>) {
        *self.verify_result.lock().expect("lock") = Some(result);
    }

    pub fn set_access(&self, grant: Value) {
        *self.access_grant.lock().expect("lock") = grant;
    }

    pub fn gate_status(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.status_gate.lock().expect("lock") = Some(gate.clone());
        gate
    }

    pub fn gate_submit(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.submit_gate.lock().expect("lock") = Some(gate.clone());
        gate
    }

    /// Stores a file for `job_id` as if another client had uploaded it.
    /// Not recorded as a call.
    pub fn put_file(&self, job_id: &str, file_set: &str, filename: &str) {
        if let Some(job) = self.jobs.lock().expect("lock").get_mut(job_id) {
            job.files.push(UploadedFile {
                file_set: file_set.to_string(),
                filename: filename.to_string(),
                key: format!("{job_id}/{file_set}/{filename}"),
                size: 8,
            });
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().expect("lock").clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.calls()
            .iter()
            .filter(|call| call.starts_with(prefix))
            .count()
    }

    fn record(&self, call: impl Into<String>) {
        self.calls.lock().expect("lock").push(call.into());
    }

    fn listing_for(&self, job_id: &str) -> Result<UploadListing, ClientError> {
        let jobs = self.jobs.lock().expect("lock");
        let job = jobs
            .get(job_id)
            .ok_or_else(|| ClientError::http(404, Some("job not found".to_string())))?;
        let uploaded: HashSet<&str> = job.files.iter().map(|f| f.file_set.as_str()).collect();
        let missing = job
            .required
            .iter()
            .filter(|set| !uploaded.contains(set.as_str()))
            .cloned()
            .collect();
        Ok(UploadListing {
            files: job.files.clone(),
            missing_required_sets: Some(missing),
            status: Some(job.status.clone()),
        })
    }
}

#[async_trait]
impl ReportApi for FakeApi {
    async fn health(&self) -> Result<(), ClientError> {
        self.record("health");
        Ok(())
    }

    async fn request_link(&self, email: &str) -> Result<RequestLinkResponse, ClientError> {
        self.record(format!("request_link:{email}"));
        Ok(RequestLinkResponse {
            ok: true,
            email: Some(email.to_string()),
            ttl_seconds: None,
            error: None,
        })
    }

    async fn verify(&self, one_time_token: &str) -> Result<VerifyResponse, ClientError> {
        self.record(format!("verify:{one_time_token}"));
        self.verify_result
            .lock()
            .expect("lock")
            .clone()
            .unwrap_or_else(|| Err(ClientError::http(401, Some("invalid token".to_string()))))
    }

    async fn access(&self, _session_token: &str) -> Result<Value, ClientError> {
        self.record("access");
        Ok(self.access_grant.lock().expect("lock").clone())
    }

    async fn init_job(
        &self,
        _session_token: &str,
        request: &InitJobRequest,
    ) -> Result<InitJobResponse, ClientError> {
        self.record(format!("init_job:{}", request.job_type));
        let response = self
            .init_queue
            .lock()
            .expect("lock")
            .pop_front()
            .ok_or_else(|| ClientError::http(500, Some("no job queued".to_string())))?;
        self.jobs.lock().expect("lock").insert(
            response.job_id.clone(),
            FakeJob {
                required: response.required.clone(),
                files: Vec::new(),
                status: "draft".to_string(),
            },
        );
        Ok(response)
    }

    async fn upload_file(
        &self,
        _session_token: &str,
        job_id: &str,
        file_set: &str,
        file: &UploadFile,
    ) -> Result<(), ClientError> {
        self.record(format!("upload_file:{job_id}:{file_set}"));
        let mut jobs = self.jobs.lock().expect("lock");
        let job = jobs
            .get_mut(job_id)
            .ok_or_else(|| ClientError::http(404, None))?;
        job.files.push(UploadedFile {
            file_set: file_set.to_string(),
            filename: file.filename.clone(),
            key: format!("{job_id}/{file_set}/{}", file.filename),
            size: file.bytes.len() as u64,
        });
        Ok(())
    }

    async fn list_uploads(
        &self,
        _session_token: &str,
        job_id: &str,
    ) -> Result<UploadListing, ClientError> {
        self.record(format!("list_uploads:{job_id}"));
        self.listing_for(job_id)
    }

    async fn submit_job(&self, _session_token: &str, job_id: &str) -> Result<(), ClientError> {
        self.record(format!("submit_job:{job_id}"));
        let gate = self.submit_gate.lock().expect("lock").clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        self.set_status(job_id, "pending_review");
        Ok(())
    }

    async fn job_status(
        &self,
        _session_token: &str,
        job_id: &str,
    ) -> Result<StatusPayload, ClientError> {
        self.record(format!("job_status:{job_id}"));
        let gate = self.status_gate.lock().expect("lock").clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        if let Some(scripted) = self.status_script.lock().expect("lock").pop_front() {
            return scripted;
        }
        if self.status_unindexed.lock().expect("lock").contains(job_id) {
            return Err(ClientError::http(404, Some("job not found".to_string())));
        }
        let jobs = self.jobs.lock().expect("lock");
        let job = jobs
            .get(job_id)
            .ok_or_else(|| ClientError::http(404, Some("job not found".to_string())))?;
        Ok(StatusPayload::from_status(job.status.clone()))
    }

    async fn approve_job(&self, _session_token: &str, job_id: &str) -> Result<(), ClientError> {
        self.record(format!("approve_job:{job_id}"));
        self.set_status(job_id, "generating");
        Ok(())
    }

    async fn review_queue(&self, _session_token: &str) -> Result<ReviewQueue, ClientError> {
        self.record("review_queue");
        Ok(ReviewQueue::default())
    }

    fn download_url(&self, session_token: &str, job_id: &str) -> String {
        format!("https://reports.example.com/jobs/download?job_id={job_id}&token={session_token}")
    }
}

#[derive(Default)]
pub struct RecordingSink {
    actions: Mutex<Vec<DownloadAction>>,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn actions(&self) -> Vec<DownloadAction> {
        self.actions.lock().expect("lock").clone()
    }
}

#[async_trait]
impl DeliverySink for RecordingSink {
    async fn deliver(&self, action: DownloadAction) {
        self.actions.lock().expect("lock").push(action);
    }
}

/// Sink that signals `started`, then holds each delivery until `release`
/// is notified.
#[derive(Default)]
pub struct GatedSink {
    pub started: Notify,
    pub release: Notify,
    pub finished: Notify,
    actions: Mutex<Vec<DownloadAction>>,
}

impl GatedSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn actions(&self) -> Vec<DownloadAction> {
        self.actions.lock().expect("lock").clone()
    }
}

#[async_trait]
impl DeliverySink for GatedSink {
    async fn deliver(&self, action: DownloadAction) {
        self.started.notify_one();
        self.release.notified().await;
        self.actions.lock().expect("lock").push(action);
        self.finished.notify_one();
    }
}

pub fn app_access_grant() -> Value {
    json!({
        "features": {
            "app_access": true,
            "tier": "standard",
            "language_addon": false,
            "strategic_master_plan": false,
            "advisor_chatbot": false
        },
        "subscription": { "admin": false }
    })
}

/// A store holding a verified session for `a@b.com` with the given grant.
pub fn signed_in_store(grant: Value) -> Arc<PersistentStore> {
    let store = PersistentStore::in_memory();
    let session = Session {
        email: "a@b.com".to_string(),
        access_grant: AccessGrant::new(grant),
        app_url: None,
        verified_at: Utc::now(),
        session_token: "tok1".to_string(),
    };
    store.save_token(&session.session_token);
    store.save_session(&session);
    Arc::new(store)
}

pub fn pdf(name: &str) -> UploadFile {
    UploadFile {
        filename: name.to_string(),
        content_type: Some("application/pdf".to_string()),
        bytes: b"%PDF-1.7".to_vec(),
    }
}
