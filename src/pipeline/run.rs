use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::Instrument;
use uuid::Uuid;

use super::{HostRewrite, UploadOrchestrator, UploadTask};
use crate::config::Config;
use crate::export::{ExportHandle, ExportInput, ExportJob, ExportPreset, MediaExporter};
use crate::media::CompositionPlan;
use crate::remote::{CreatorInfo, MediaType, PostInfo, PublishRequest, RemoteCapabilities, UserProfile};
use crate::token::TokenStore;
use crate::{PipelineError, Result};

/// Which pipeline produced a report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunKind {
    Stitch,
    Publish,
    Transcribe,
    Upload,
}

impl fmt::Display for RunKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunKind::Stitch => write!(f, "stitch"),
            RunKind::Publish => write!(f, "publish"),
            RunKind::Transcribe => write!(f, "transcribe"),
            RunKind::Upload => write!(f, "upload"),
        }
    }
}

/// Result of the final downstream call
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Downstream {
    Published { publish_id: String },
    TranscriptionRequested,
}

#[derive(Debug, Clone, Serialize)]
pub struct UploadedAsset {
    pub media_type: MediaType,
    pub public_url: String,
}

/// Summary of a finished run
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub kind: RunKind,
    /// Composed output length in seconds
    pub duration_secs: Option<f64>,
    /// Exported files still on disk
    pub outputs: Vec<PathBuf>,
    pub uploads: Vec<UploadedAsset>,
    pub downstream: Option<Downstream>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl RunReport {
    fn new(kind: RunKind) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            kind,
            duration_secs: None,
            outputs: Vec::new(),
            uploads: Vec::new(),
            downstream: None,
            completed_at: None,
        }
    }

    fn record_uploads(&mut self, tasks: &[UploadTask]) {
        for task in tasks {
            if let Some(url) = task.public_url() {
                self.uploads.push(UploadedAsset {
                    media_type: task.media_type,
                    public_url: url.to_string(),
                });
            }
        }
    }

    fn finish(mut self) -> Self {
        self.completed_at = Some(Utc::now());
        self
    }

    /// Public URL of the first uploaded asset of `media_type`
    pub fn public_url(&self, media_type: MediaType) -> Option<&str> {
        self.uploads
            .iter()
            .find(|asset| asset.media_type == media_type)
            .map(|asset| asset.public_url.as_str())
    }
}

/// Runner settings taken from the config file
#[derive(Debug, Clone)]
pub struct RunSettings {
    pub preset: ExportPreset,
    pub export_dir: PathBuf,
    pub keep_outputs: bool,
    pub parallel_uploads: bool,
    pub token_key: String,
}

impl RunSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            preset: config.export.preset,
            export_dir: config.export_dir(),
            keep_outputs: config.export.keep_outputs,
            parallel_uploads: config.upload.parallel,
            token_key: config.tokens.key.clone(),
        }
    }
}

/// Sequences export, upload and the downstream call for one composition.
///
/// Each stage starts only after the previous one succeeded. The first error
/// ends the run and is returned as is.
pub struct PipelineRunner {
    exporter: Arc<dyn MediaExporter>,
    remote: Arc<dyn RemoteCapabilities>,
    tokens: Arc<dyn TokenStore>,
    uploader: UploadOrchestrator,
    settings: RunSettings,
    cancel: Option<watch::Receiver<bool>>,
}

impl PipelineRunner {
    pub fn new(
        exporter: Arc<dyn MediaExporter>,
        remote: Arc<dyn RemoteCapabilities>,
        tokens: Arc<dyn TokenStore>,
        rewrite: HostRewrite,
        settings: RunSettings,
    ) -> Self {
        let uploader = UploadOrchestrator::new(Arc::clone(&remote), rewrite);

        Self {
            exporter,
            remote,
            tokens,
            uploader,
            settings,
            cancel: None,
        }
    }

    /// Cancel the running export once `cancel` turns true
    pub fn with_cancel(mut self, cancel: watch::Receiver<bool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn settings(&self) -> &RunSettings {
        &self.settings
    }

    /// Export the composition and keep it at `output` (or in the export dir)
    pub async fn stitch(
        &self,
        plan: &CompositionPlan,
        preset: ExportPreset,
        output: Option<&Path>,
    ) -> Result<RunReport> {
        let mut report = RunReport::new(RunKind::Stitch);
        let span = tracing::info_span!("stitch", run_id = %report.run_id);

        async move {
            report.duration_secs = Some(plan.duration().as_seconds());
            let exported = self.export_plan(plan, preset).await?;

            let path = match output {
                Some(target) => move_file(&exported, target).await?,
                None => exported,
            };

            report.outputs.push(path);
            Ok(report.finish())
        }
        .instrument(span)
        .await
    }

    /// Export, upload as `video/mp4` and submit a pull-from-URL publish request
    pub async fn publish(&self, plan: &CompositionPlan, post: PostInfo) -> Result<RunReport> {
        let mut report = RunReport::new(RunKind::Publish);
        let span = tracing::info_span!("publish", run_id = %report.run_id);

        async move {
            let token = self.tokens.require(&self.settings.token_key)?;
            report.duration_secs = Some(plan.duration().as_seconds());

            let video = self.export_plan(plan, self.settings.preset).await?;
            let task = self
                .uploader
                .upload(&video, self.settings.preset.container().media_type())
                .await?;
            report.record_uploads(std::slice::from_ref(&task));
            self.discard_outputs(&mut report, vec![video]).await;

            let video_url = task
                .public_url()
                .ok_or_else(|| PipelineError::UploadFailed("upload produced no public URL".to_string()))?
                .to_string();

            tracing::info!("Submitting publish request for {}", video_url);
            let result = self
                .remote
                .submit_publish(&token, &PublishRequest::pull_from_url(video_url, post))
                .await?;

            tracing::info!("Publish accepted: {}", result.publish_id);
            report.downstream = Some(Downstream::Published {
                publish_id: result.publish_id,
            });
            Ok(report.finish())
        }
        .instrument(span)
        .await
    }

    /// Export audio and video, upload both and request a transcription
    pub async fn transcribe(&self, plan: &CompositionPlan) -> Result<RunReport> {
        let mut report = RunReport::new(RunKind::Transcribe);
        let span = tracing::info_span!("transcribe", run_id = %report.run_id);

        async move {
            report.duration_secs = Some(plan.duration().as_seconds());

            let audio = self.export_plan(plan, ExportPreset::Audio).await?;
            let video = match self.export_plan(plan, self.settings.preset).await {
                Ok(video) => video,
                Err(e) => {
                    self.discard_outputs(&mut report, vec![audio]).await;
                    return Err(e);
                }
            };

            let assets = vec![
                (audio.clone(), MediaType::M4aAudio),
                (video.clone(), self.settings.preset.container().media_type()),
            ];
            let tasks = self
                .uploader
                .upload_all(&assets, self.settings.parallel_uploads)
                .await?;
            report.record_uploads(&tasks);
            self.discard_outputs(&mut report, vec![audio, video]).await;

            let audio_url = report
                .public_url(MediaType::M4aAudio)
                .ok_or_else(|| PipelineError::UploadFailed("audio upload produced no public URL".to_string()))?
                .to_string();
            let video_url = report
                .public_url(MediaType::Mp4Video)
                .ok_or_else(|| PipelineError::UploadFailed("video upload produced no public URL".to_string()))?
                .to_string();

            tracing::info!("Requesting transcription");
            self.remote.request_transcription(&audio_url, &video_url).await?;

            report.downstream = Some(Downstream::TranscriptionRequested);
            Ok(report.finish())
        }
        .instrument(span)
        .await
    }

    /// Upload an existing local file; the file is never deleted
    pub async fn upload_file(&self, path: &Path, media_type: MediaType) -> Result<RunReport> {
        let mut report = RunReport::new(RunKind::Upload);
        let task = self
            .uploader
            .upload(path, media_type)
            .instrument(tracing::info_span!("upload", run_id = %report.run_id))
            .await?;

        report.record_uploads(std::slice::from_ref(&task));
        report.outputs.push(path.to_path_buf());
        Ok(report.finish())
    }

    pub async fn creator_info(&self) -> Result<CreatorInfo> {
        let token = self.tokens.require(&self.settings.token_key)?;
        self.remote.query_creator_info(&token).await
    }

    pub async fn user_profile(&self) -> Result<UserProfile> {
        let token = self.tokens.require(&self.settings.token_key)?;
        self.remote.fetch_user_profile(&token).await
    }

    async fn export_plan(&self, plan: &CompositionPlan, preset: ExportPreset) -> Result<PathBuf> {
        if plan.is_empty() {
            return Err(PipelineError::Composition("no time ranges selected".to_string()));
        }

        let job = ExportJob::new(
            ExportInput::Composition(plan.clone()),
            preset,
            &self.settings.export_dir,
        );
        tracing::info!(
            "Exporting {} segment(s) from {} ({})",
            plan.segments.len(),
            plan.source().display(),
            preset
        );

        let handle = self.exporter.start(job);
        self.await_export(handle).await
    }

    async fn await_export(&self, handle: ExportHandle) -> Result<PathBuf> {
        let Some(cancel) = &self.cancel else {
            return handle.wait().await;
        };

        let mut cancel = cancel.clone();
        let canceller = handle.canceller();
        let wait = handle.wait();
        tokio::pin!(wait);

        tokio::select! {
            result = &mut wait => return result,
            Ok(_) = cancel.wait_for(|cancelled| *cancelled) => {
                tracing::warn!("Cancelling export");
                canceller.cancel();
            }
        }

        wait.await
    }

    /// Remove uploaded exports unless outputs are kept
    async fn discard_outputs(&self, report: &mut RunReport, paths: Vec<PathBuf>) {
        for path in paths {
            if self.settings.keep_outputs {
                report.outputs.push(path);
                continue;
            }

            if let Err(e) = fs_err::tokio::remove_file(&path).await {
                tracing::warn!("Failed to remove export: {}", e);
                report.outputs.push(path);
            }
        }
    }
}

async fn move_file(from: &Path, to: &Path) -> Result<PathBuf> {
    if let Some(parent) = to.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs_err::tokio::create_dir_all(parent)
            .await
            .map_err(|e| PipelineError::ExportFailed(e.to_string()))?;
    }

    if fs_err::tokio::rename(from, to).await.is_err() {
        fs_err::tokio::copy(from, to)
            .await
            .map_err(|e| PipelineError::ExportFailed(e.to_string()))?;
        fs_err::tokio::remove_file(from)
            .await
            .map_err(|e| PipelineError::ExportFailed(e.to_string()))?;
    }

    Ok(to.to_path_buf())
}
