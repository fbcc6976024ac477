use futures_util::FutureExt;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use uuid::Uuid;

pub mod ffmpeg;

pub use ffmpeg::{build_ffmpeg_args, FfmpegCommand, FfmpegExporter};

use crate::media::{compose, CompositionPlan, SourceMedia, TimeRange};
use crate::remote::MediaType;
use crate::{PipelineError, Result};

/// Output container of an export
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Container {
    Mp4,
    M4a,
}

impl Container {
    pub fn extension(&self) -> &'static str {
        match self {
            Container::Mp4 => "mp4",
            Container::M4a => "m4a",
        }
    }

    /// Content type used both for the upload slot and the PUT request
    pub fn media_type(&self) -> MediaType {
        match self {
            Container::Mp4 => MediaType::Mp4Video,
            Container::M4a => MediaType::M4aAudio,
        }
    }
}

/// Quality/codec preset of an export
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ExportPreset {
    /// H.264 CRF 18 + AAC 192k
    Highest,
    /// H.264 CRF 23 + AAC 128k
    Medium,
    /// H.264 CRF 28 + AAC 96k
    Low,
    /// AAC only, video dropped
    Audio,
}

impl ExportPreset {
    pub fn container(&self) -> Container {
        match self {
            ExportPreset::Audio => Container::M4a,
            _ => Container::Mp4,
        }
    }

    pub fn has_video(&self) -> bool {
        !matches!(self, ExportPreset::Audio)
    }
}

impl fmt::Display for ExportPreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExportPreset::Highest => write!(f, "highest"),
            ExportPreset::Medium => write!(f, "medium"),
            ExportPreset::Low => write!(f, "low"),
            ExportPreset::Audio => write!(f, "audio"),
        }
    }
}

/// What an export renders
#[derive(Debug, Clone)]
pub enum ExportInput {
    Composition(CompositionPlan),
    Trim { source: SourceMedia, range: TimeRange },
}

/// A single-shot export request
#[derive(Debug, Clone)]
pub struct ExportJob {
    pub id: Uuid,
    pub input: ExportInput,
    pub output_path: PathBuf,
    pub preset: ExportPreset,
}

impl ExportJob {
    /// Create a job writing to a fresh unique file inside `temp_dir`
    pub fn new(input: ExportInput, preset: ExportPreset, temp_dir: &Path) -> Self {
        let id = Uuid::new_v4();
        let output_path = temp_dir.join(format!("{}.{}", id, preset.container().extension()));

        Self {
            id,
            input,
            output_path,
            preset,
        }
    }

    /// Resolve the input into the plan that gets rendered
    pub fn plan(&self) -> Result<CompositionPlan> {
        match &self.input {
            ExportInput::Composition(plan) => Ok(plan.clone()),
            ExportInput::Trim { source, range } => compose(source, std::slice::from_ref(range)),
        }
    }

    pub fn media_type(&self) -> MediaType {
        self.preset.container().media_type()
    }
}

/// Lifecycle of an export job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl ExportStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExportStatus::Completed | ExportStatus::Failed | ExportStatus::Cancelled
        )
    }
}

impl fmt::Display for ExportStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExportStatus::Pending => write!(f, "pending"),
            ExportStatus::Running => write!(f, "running"),
            ExportStatus::Completed => write!(f, "completed"),
            ExportStatus::Failed => write!(f, "failed"),
            ExportStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Trait for anything that can render an `ExportJob` to a file
#[cfg_attr(test, mockall::automock)]
pub trait MediaExporter: Send + Sync {
    /// Start rendering; the job is consumed and cannot be restarted
    fn start(&self, job: ExportJob) -> ExportHandle;
}

/// Cancels an export from outside its handle
#[derive(Clone)]
pub struct ExportCanceller(Arc<watch::Sender<bool>>);

impl ExportCanceller {
    pub fn cancel(&self) {
        self.0.send_replace(true);
    }
}

/// Running export. Reaches exactly one terminal status.
///
/// Dropping the handle and every `ExportCanceller` cancels the export.
pub struct ExportHandle {
    job_id: Uuid,
    output_path: PathBuf,
    status: watch::Receiver<ExportStatus>,
    cancel: Arc<watch::Sender<bool>>,
    task: JoinHandle<Result<PathBuf>>,
}

impl ExportHandle {
    /// Drive `render` on the runtime and track its status.
    ///
    /// On failure or cancellation the partial output file is removed.
    pub fn spawn<F, Fut>(job: ExportJob, render: F) -> Self
    where
        F: FnOnce(ExportJob) -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let (status_tx, status_rx) = watch::channel(ExportStatus::Pending);
        let (cancel_tx, mut cancel_rx) = watch::channel(false);
        let job_id = job.id;
        let output_path = job.output_path.clone();
        let path = output_path.clone();

        let task = tokio::spawn(async move {
            status_tx.send_replace(ExportStatus::Running);

            let render = AssertUnwindSafe(render(job)).catch_unwind();

            let mut outcome = tokio::select! {
                result = render => result.unwrap_or_else(|_| {
                    Err(PipelineError::ExportFailed("export renderer panicked".to_string()))
                }),
                _ = cancel_rx.wait_for(|cancelled| *cancelled) => Err(PipelineError::ExportCancelled),
            };

            if outcome.is_ok() && !path.is_file() {
                outcome = Err(PipelineError::ExportFailed(format!(
                    "no output written to {}",
                    path.display()
                )));
            }

            let status = match &outcome {
                Ok(()) => ExportStatus::Completed,
                Err(PipelineError::ExportCancelled) => ExportStatus::Cancelled,
                Err(_) => ExportStatus::Failed,
            };

            if outcome.is_err() && path.exists() {
                if let Err(e) = fs_err::tokio::remove_file(&path).await {
                    tracing::warn!("Failed to remove partial export: {}", e);
                }
            }

            tracing::info!("Export {} {}", job_id, status);
            status_tx.send_replace(status);

            outcome.map(|()| path)
        });

        Self {
            job_id,
            output_path,
            status: status_rx,
            cancel: Arc::new(cancel_tx),
            task,
        }
    }

    pub fn job_id(&self) -> Uuid {
        self.job_id
    }

    pub fn output_path(&self) -> &Path {
        &self.output_path
    }

    pub fn status(&self) -> ExportStatus {
        *self.status.borrow()
    }

    /// Receiver that observes every status change
    pub fn subscribe(&self) -> watch::Receiver<ExportStatus> {
        self.status.clone()
    }

    /// Request cancellation; a no-op once the job is terminal
    pub fn cancel(&self) {
        self.cancel.send_replace(true);
    }

    pub fn canceller(&self) -> ExportCanceller {
        ExportCanceller(Arc::clone(&self.cancel))
    }

    /// Wait for the terminal status and return the written file
    pub async fn wait(self) -> Result<PathBuf> {
        let ExportHandle {
            task,
            cancel,
            output_path,
            ..
        } = self;

        let result = match task.await {
            Ok(result) => result,
            Err(e) => {
                if output_path.exists() {
                    if let Err(e) = fs_err::tokio::remove_file(&output_path).await {
                        tracing::warn!("Failed to remove partial export: {}", e);
                    }
                }
                Err(PipelineError::ExportFailed(format!("export task aborted: {}", e)))
            }
        };
        drop(cancel);
        result
    }
}
