//! Job model and its reconciliation against server truth.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};

use crate::api::{InitJobResponse, StatusPayload, UploadListing};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    SectorReport,
    CompanyAnalysis,
    StrategicMasterPlan,
}

impl JobType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SectorReport => "sector_report",
            Self::CompanyAnalysis => "company_analysis",
            Self::StrategicMasterPlan => "strategic_master_plan",
        }
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown job type '{0}'")]
pub struct UnknownJobType(pub String);

impl FromStr for JobType {
    type Err = UnknownJobType;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "sector_report" | "sector" => Ok(Self::SectorReport),
            "company_analysis" | "company" => Ok(Self::CompanyAnalysis),
            "strategic_master_plan" | "smp" => Ok(Self::StrategicMasterPlan),
            _ => Err(UnknownJobType(raw.to_string())),
        }
    }
}

/// Lifecycle position as reported by the server. `Unknown` keeps the raw
/// value for display and is never acted upon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobStatus {
    Draft,
    PendingReview,
    Generating,
    Delivered,
    Failed,
    Unknown(String),
}

impl JobStatus {
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "draft" => Self::Draft,
            "pending_review" => Self::PendingReview,
            "generating" => Self::Generating,
            "delivered" => Self::Delivered,
            "failed" => Self::Failed,
            _ => Self::Unknown(raw.trim().to_string()),
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Draft => "draft",
            Self::PendingReview => "pending_review",
            Self::Generating => "generating",
            Self::Delivered => "delivered",
            Self::Failed => "failed",
            Self::Unknown(raw) => raw,
        }
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Delivered | Self::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The only way a job's status changes. A payload without a status leaves
/// the current value untouched; anything else is taken verbatim from the
/// server, with no client-side transition rules.
#[must_use]
pub fn apply_server_status(current: &JobStatus, payload: &StatusPayload) -> JobStatus {
    match payload.status() {
        Some(raw) => JobStatus::parse(raw),
        None => current.clone(),
    }
}

/// Reads an absent or `null` field as the type's default.
pub(crate) fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadedFile {
    pub file_set: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub filename: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub key: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    id: String,
    job_type: Option<JobType>,
    required_sets: BTreeSet<String>,
    optional_sets: BTreeSet<String>,
    uploaded_files: Vec<UploadedFile>,
    missing_required_sets: BTreeSet<String>,
    status: JobStatus,
    warnings: Vec<String>,
}

impl Job {
    #[must_use]
    pub fn from_init(job_type: JobType, response: InitJobResponse) -> Self {
        let mut job = Self {
            id: response.job_id,
            job_type: Some(job_type),
            required_sets: response.required.into_iter().collect(),
            optional_sets: response.optional.into_iter().collect(),
            uploaded_files: Vec::new(),
            missing_required_sets: BTreeSet::new(),
            status: JobStatus::Draft,
            warnings: response.warnings,
        };
        job.reconcile_missing(None);
        job
    }

    /// Adopts a job that already exists server-side. Only the server's
    /// missing sets are known to be required.
    #[must_use]
    pub fn from_listing(job_id: impl Into<String>, listing: &UploadListing) -> Self {
        let required_sets = listing
            .missing_required_sets
            .iter()
            .flatten()
            .cloned()
            .collect();
        let mut job = Self {
            id: job_id.into(),
            job_type: None,
            required_sets,
            optional_sets: BTreeSet::new(),
            uploaded_files: Vec::new(),
            missing_required_sets: BTreeSet::new(),
            status: JobStatus::Unknown(String::new()),
            warnings: Vec::new(),
        };
        job.apply_listing(listing);
        job
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn job_type(&self) -> Option<JobType> {
        self.job_type
    }

    #[must_use]
    pub fn required_sets(&self) -> &BTreeSet<String> {
        &self.required_sets
    }

    #[must_use]
    pub fn optional_sets(&self) -> &BTreeSet<String> {
        &self.optional_sets
    }

    #[must_use]
    pub fn uploaded_files(&self) -> &[UploadedFile] {
        &self.uploaded_files
    }

    #[must_use]
    pub fn missing_required_sets(&self) -> &BTreeSet<String> {
        &self.missing_required_sets
    }

    #[must_use]
    pub fn status(&self) -> &JobStatus {
        &self.status
    }

    #[must_use]
    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    #[must_use]
    pub fn is_ready_to_submit(&self) -> bool {
        self.missing_required_sets.is_empty()
    }

    /// Overwrites files, missing sets, and (when reported) status from an
    /// upload listing.
    pub fn apply_listing(&mut self, listing: &UploadListing) {
        self.uploaded_files.clone_from(&listing.files);
        self.reconcile_missing(listing.missing_required_sets.as_deref());
        if let Some(status) = listing.status.as_deref() {
            self.apply_status(&StatusPayload::from_status(status));
        }
    }

    pub fn apply_status(&mut self, payload: &StatusPayload) {
        self.status = apply_server_status(&self.status, payload);
    }

    // Sole writer of `missing_required_sets`.
    fn reconcile_missing(&mut self, server_missing: Option<&[String]>) {
        self.missing_required_sets = match server_missing {
            Some(missing) => missing.iter().cloned().collect(),
            None => {
                let uploaded: BTreeSet<&str> = self
                    .uploaded_files
                    .iter()
                    .map(|file| file.file_set.as_str())
                    .collect();
                self.required_sets
                    .iter()
                    .filter(|set| !uploaded.contains(set.as_str()))
                    .cloned()
                    .collect()
            }
        };
    }
}
