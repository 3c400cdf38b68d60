//! Client core for the ReportDesk report service: passwordless login, the
//! single active job's upload checklist and submission, and status polling
//! with exactly-once auto-delivery.

pub mod api;
pub mod auth;
pub mod config;
pub mod controller;
pub mod desk;
pub mod error;
pub mod features;
pub mod job;
pub mod location;
pub mod polling;
pub mod store;

pub use api::{DownloadAction, ReportApi, UploadFile};
pub use auth::{AuthFlow, AuthPhase, LinkRequest};
pub use config::ClientConfig;
pub use controller::JobLifecycleController;
pub use desk::ReportDesk;
pub use error::ClientError;
pub use features::{AccessGrant, Capabilities, capabilities};
pub use job::{Job, JobStatus, JobType, UploadedFile, apply_server_status};
pub use location::{AddressBar, MemoryAddressBar};
pub use polling::{DeliverySink, JobSnapshot, PollOutcome, PollingScheduler};
pub use store::{FileStorage, KeyValueStorage, MemoryStorage, PersistentStore, Session};
