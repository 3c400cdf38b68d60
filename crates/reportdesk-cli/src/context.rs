use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use reportdesk_api_client::HttpReportApi;
use reportdesk_client_core::{
    AuthFlow, ClientConfig, DeliverySink, FileStorage, JobLifecycleController, PersistentStore,
    ReportDesk,
};
use tracing_subscriber::EnvFilter;

pub const STATE_DIR_NAME: &str = "reportdesk";

/// Installs the stderr subscriber. `RUST_LOG` wins over the configured filter.
pub fn init_tracing(default_filter: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

/// `--state-dir`, then `REPORTDESK_STATE_DIR`, then the platform data dir.
pub fn resolve_state_dir(flag: Option<&Path>, configured: Option<&Path>) -> PathBuf {
    flag.or(configured).map_or_else(
        || {
            dirs::data_dir().map_or_else(
                || PathBuf::from(format!(".{STATE_DIR_NAME}")),
                |dir| dir.join(STATE_DIR_NAME),
            )
        },
        Path::to_path_buf,
    )
}

pub struct CliContext {
    pub config: ClientConfig,
    pub state_dir: PathBuf,
    pub api: Arc<HttpReportApi>,
    pub store: Arc<PersistentStore>,
}

impl CliContext {
    pub fn load(config: ClientConfig, state_dir_flag: Option<&Path>) -> Result<Self> {
        let state_dir = resolve_state_dir(state_dir_flag, config.state_dir.as_deref());
        let api = HttpReportApi::from_config(&config)
            .context("failed to build report service client")?;
        let store = PersistentStore::new(FileStorage::in_dir(&state_dir));
        tracing::debug!(
            base_url = api.base_url(),
            state_dir = %state_dir.display(),
            "cli context loaded"
        );
        Ok(Self {
            config,
            state_dir,
            api: Arc::new(api),
            store: Arc::new(store),
        })
    }

    pub fn auth_flow(&self) -> AuthFlow {
        AuthFlow::new(self.api.clone(), self.store.clone())
    }

    pub fn controller(&self) -> JobLifecycleController {
        JobLifecycleController::new(self.api.clone(), self.store.clone())
    }

    pub fn desk(&self, sink: Arc<dyn DeliverySink>) -> ReportDesk {
        ReportDesk::new(
            self.api.clone(),
            self.store.clone(),
            sink,
            self.config.poll_interval,
        )
    }

    pub fn session_token(&self) -> Result<String> {
        self.store
            .load_token()
            .context("not signed in; run `reportdesk login <email>` first")
    }
}
