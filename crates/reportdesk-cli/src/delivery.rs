use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use async_trait::async_trait;
use reportdesk_api_client::{Document, HttpReportApi};
use reportdesk_client_core::{DeliverySink, DownloadAction};

/// Saves delivered documents into `out_dir`, or prints the download address
/// when no directory was given.
pub struct SaveToDirectory {
    api: Arc<HttpReportApi>,
    out_dir: Option<PathBuf>,
    saved: Mutex<Vec<PathBuf>>,
}

impl SaveToDirectory {
    pub fn new(api: Arc<HttpReportApi>, out_dir: Option<PathBuf>) -> Self {
        Self {
            api,
            out_dir,
            saved: Mutex::new(Vec::new()),
        }
    }

    pub fn saved(&self) -> Vec<PathBuf> {
        self.saved
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    async fn save(&self, out_dir: &Path, action: &DownloadAction) -> Result<PathBuf> {
        let document = self
            .api
            .fetch_document(&action.url)
            .await
            .with_context(|| format!("failed to download report for {}", action.job_id))?;
        tokio::fs::create_dir_all(out_dir)
            .await
            .with_context(|| format!("failed to create {}", out_dir.display()))?;
        let path = out_dir.join(document_file_name(&action.job_id, &document));
        tokio::fs::write(&path, &document.bytes)
            .await
            .with_context(|| format!("failed to write {}", path.display()))?;
        Ok(path)
    }
}

#[async_trait]
impl DeliverySink for SaveToDirectory {
    async fn deliver(&self, action: DownloadAction) {
        let Some(out_dir) = self.out_dir.as_deref() else {
            println!("report {} ready: {}", action.job_id, action.url);
            return;
        };
        match self.save(out_dir, &action).await {
            Ok(path) => {
                println!("report {} saved to {}", action.job_id, path.display());
                self.saved
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner())
                    .push(path);
            }
            Err(error) => {
                tracing::warn!(job_id = %action.job_id, error = %format!("{error:#}"), "auto-delivery failed");
                println!("report {} ready: {}", action.job_id, action.url);
            }
        }
    }
}

/// Server-suggested name without any directory part, else `<job_id>` with an
/// extension guessed from the content type.
pub fn document_file_name(job_id: &str, document: &Document) -> String {
    document
        .filename
        .as_deref()
        .and_then(|name| Path::new(name).file_name())
        .and_then(|name| name.to_str())
        .filter(|name| !name.is_empty())
        .map_or_else(
            || {
                let extension = match document.content_type.as_deref() {
                    Some(content_type) if content_type.starts_with("application/pdf") => ".pdf",
                    Some(content_type) if content_type.contains("wordprocessingml") => ".docx",
                    Some(content_type) if content_type.starts_with("text/html") => ".html",
                    _ => "",
                };
                format!("{job_id}{extension}")
            },
            str::to_string,
        )
}
