use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use uuid::Uuid;

pub mod run;

pub use run::{Downstream, PipelineRunner, RunKind, RunReport, RunSettings, UploadedAsset};

use crate::config::StorageConfig;
use crate::remote::{MediaType, RemoteCapabilities, UploadSlot};
use crate::{PipelineError, Result};

/// Host substitution that turns a storage URL into its public form
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostRewrite {
    pub internal_host: String,
    pub public_host: String,
}

impl HostRewrite {
    pub fn new(internal_host: impl Into<String>, public_host: impl Into<String>) -> Self {
        Self {
            internal_host: internal_host.into(),
            public_host: public_host.into(),
        }
    }

    pub fn from_config(storage: &StorageConfig) -> Self {
        Self::new(storage.internal_host.clone(), storage.public_host.clone())
    }
}

/// Public URL of an uploaded object: the slot URL without its query string and
/// with the internal storage host replaced by the public one.
pub fn derive_public_url(upload_url: &str, rewrite: &HostRewrite) -> Result<String> {
    let base = upload_url
        .split_once('?')
        .map(|(base, _)| base)
        .unwrap_or(upload_url);

    if rewrite.internal_host.is_empty() || !base.contains(&rewrite.internal_host) {
        return Err(PipelineError::DomainRewriteFailed {
            url: base.to_string(),
            host: rewrite.internal_host.clone(),
        });
    }

    Ok(base.replace(&rewrite.internal_host, &rewrite.public_host))
}

/// Lifecycle of one upload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum UploadState {
    Created,
    InFlight,
    Succeeded { public_url: String },
    Failed { reason: String },
}

/// One local file on its way to object storage
#[derive(Debug, Clone)]
pub struct UploadTask {
    pub id: Uuid,
    pub source: PathBuf,
    pub media_type: MediaType,
    pub slot: Option<UploadSlot>,
    pub state: UploadState,
}

impl UploadTask {
    pub fn new(source: impl Into<PathBuf>, media_type: MediaType) -> Self {
        Self {
            id: Uuid::new_v4(),
            source: source.into(),
            media_type,
            slot: None,
            state: UploadState::Created,
        }
    }

    pub fn public_url(&self) -> Option<&str> {
        match &self.state {
            UploadState::Succeeded { public_url } => Some(public_url),
            _ => None,
        }
    }
}

/// Drives slot request -> PUT -> public URL rewrite for local files
pub struct UploadOrchestrator {
    remote: Arc<dyn RemoteCapabilities>,
    rewrite: HostRewrite,
}

impl UploadOrchestrator {
    pub fn new(remote: Arc<dyn RemoteCapabilities>, rewrite: HostRewrite) -> Self {
        Self { remote, rewrite }
    }

    /// Upload one file and return the finished task
    pub async fn upload(&self, source: &Path, media_type: MediaType) -> Result<UploadTask> {
        let mut task = UploadTask::new(source, media_type);
        self.run(&mut task).await?;
        Ok(task)
    }

    /// Upload several independent files, sequentially or concurrently.
    ///
    /// Fails with the first error either way; finished uploads are kept.
    pub async fn upload_all(
        &self,
        assets: &[(PathBuf, MediaType)],
        parallel: bool,
    ) -> Result<Vec<UploadTask>> {
        if parallel {
            let uploads = assets
                .iter()
                .map(|(path, media_type)| self.upload(path, *media_type));
            return futures_util::future::try_join_all(uploads).await;
        }

        let mut tasks = Vec::with_capacity(assets.len());
        for (path, media_type) in assets {
            tasks.push(self.upload(path, *media_type).await?);
        }
        Ok(tasks)
    }

    /// Run `task` to a terminal state
    pub async fn run(&self, task: &mut UploadTask) -> Result<String> {
        task.state = UploadState::InFlight;

        match self.stages(task).await {
            Ok(public_url) => {
                tracing::info!("Uploaded {} -> {}", task.source.display(), public_url);
                task.state = UploadState::Succeeded {
                    public_url: public_url.clone(),
                };
                Ok(public_url)
            }
            Err(e) => {
                tracing::warn!("Upload of {} failed: {}", task.source.display(), e);
                task.state = UploadState::Failed {
                    reason: e.to_string(),
                };
                Err(e)
            }
        }
    }

    async fn stages(&self, task: &mut UploadTask) -> Result<String> {
        let slot = self.remote.request_upload_slot(task.media_type).await?;
        task.slot = Some(slot.clone());

        let bytes = fs_err::tokio::read(&task.source)
            .await
            .map_err(|e| PipelineError::UploadFailed(e.to_string()))?;

        tracing::info!(
            "Uploading {} ({}, {})",
            task.source.display(),
            task.media_type,
            crate::utils::format_file_size(bytes.len() as u64)
        );

        self.remote
            .put_bytes(&slot.upload_url, bytes, task.media_type)
            .await?;

        derive_public_url(&slot.upload_url, &self.rewrite)
    }
}
