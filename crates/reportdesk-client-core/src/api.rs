//! Transport seam between the client core and the report service.
//!
//! The core only talks to the backend through [`ReportApi`]; the reqwest
//! implementation lives in `reportdesk-api-client`, tests use in-process
//! fakes.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ClientError;
use crate::job::{JobType, UploadedFile};

pub const DEFAULT_LINK_TTL_SECONDS: u64 = 1_800;

/// Request bodies are wrapped as `{"data": ...}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DataEnvelope<T> {
    pub data: T,
}

impl<T> DataEnvelope<T> {
    pub fn new(data: T) -> Self {
        Self { data }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RequestLinkBody {
    pub email: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobIdBody {
    pub job_id: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RequestLinkResponse {
    #[serde(default = "default_ok")]
    pub ok: bool,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub ttl_seconds: Option<u64>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct VerifyResponse {
    #[serde(default = "default_ok")]
    pub ok: bool,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub access: Option<Value>,
    #[serde(default)]
    pub app_url: Option<String>,
    #[serde(default)]
    pub session_token: Option<String>,
    #[serde(default)]
    pub session_ttl_seconds: Option<u64>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InitJobRequest {
    pub job_type: JobType,
    pub inputs: Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct InitJobResponse {
    pub job_id: String,
    #[serde(default)]
    pub required: Vec<String>,
    #[serde(default)]
    pub optional: Vec<String>,
    #[serde(default)]
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadFile {
    pub filename: String,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct UploadListing {
    #[serde(default, deserialize_with = "crate::job::null_as_default")]
    pub files: Vec<UploadedFile>,
    #[serde(default)]
    pub missing_required_sets: Option<Vec<String>>,
    #[serde(default)]
    pub status: Option<String>,
}

/// `/jobs/status` answers either `{status}` or `{job: {status}}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct StatusPayload {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub job: Option<NestedJobStatus>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct NestedJobStatus {
    #[serde(default)]
    pub status: Option<String>,
}

impl StatusPayload {
    #[must_use]
    pub fn from_status(status: impl Into<String>) -> Self {
        Self {
            status: Some(status.into()),
            job: None,
        }
    }

    #[must_use]
    pub fn status(&self) -> Option<&str> {
        self.status
            .as_deref()
            .or_else(|| self.job.as_ref().and_then(|job| job.status.as_deref()))
            .map(str::trim)
            .filter(|status| !status.is_empty())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ReviewQueue {
    #[serde(default)]
    pub jobs: Vec<Value>,
}

/// A download handed to whatever opens documents for the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadAction {
    pub job_id: String,
    pub url: String,
}

#[async_trait]
pub trait ReportApi: Send + Sync {
    async fn health(&self) -> Result<(), ClientError>;

    async fn request_link(&self, email: &str) -> Result<RequestLinkResponse, ClientError>;

    async fn verify(&self, one_time_token: &str) -> Result<VerifyResponse, ClientError>;

    async fn access(&self, session_token: &str) -> Result<Value, ClientError>;

    async fn init_job(
        &self,
        session_token: &str,
        request: &InitJobRequest,
    ) -> Result<InitJobResponse, ClientError>;

    async fn upload_file(
        &self,
        session_token: &str,
        job_id: &str,
        file_set: &str,
        file: &UploadFile,
    ) -> Result<(), ClientError>;

    async fn list_uploads(
        &self,
        session_token: &str,
        job_id: &str,
    ) -> Result<UploadListing, ClientError>;

    async fn submit_job(&self, session_token: &str, job_id: &str) -> Result<(), ClientError>;

    async fn job_status(
        &self,
        session_token: &str,
        job_id: &str,
    ) -> Result<StatusPayload, ClientError>;

    async fn approve_job(&self, session_token: &str, job_id: &str) -> Result<(), ClientError>;

    async fn review_queue(&self, session_token: &str) -> Result<ReviewQueue, ClientError>;

    /// Direct-navigation address of the delivered document. The token rides
    /// in the query string because no header can be attached.
    fn download_url(&self, session_token: &str, job_id: &str) -> String;
}

fn default_ok() -> bool {
    true
}
