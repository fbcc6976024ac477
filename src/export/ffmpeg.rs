use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

use super::{ExportHandle, ExportJob, ExportPreset, MediaExporter};
use crate::media::CompositionPlan;
use crate::{PipelineError, Result};

/// Builder for ffmpeg command lines
#[derive(Debug, Clone)]
pub struct FfmpegCommand {
    input: PathBuf,
    output: PathBuf,
    output_args: Vec<String>,
    log_level: String,
}

impl FfmpegCommand {
    pub fn new(input: impl AsRef<Path>, output: impl AsRef<Path>) -> Self {
        Self {
            input: input.as_ref().to_path_buf(),
            output: output.as_ref().to_path_buf(),
            output_args: Vec::new(),
            log_level: "error".to_string(),
        }
    }

    pub fn output_arg(mut self, arg: impl Into<String>) -> Self {
        self.output_args.push(arg.into());
        self
    }

    pub fn output_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.output_args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn filter_complex(self, filter: impl Into<String>) -> Self {
        self.output_arg("-filter_complex").output_arg(filter)
    }

    pub fn map(self, label: impl Into<String>) -> Self {
        self.output_arg("-map").output_arg(label)
    }

    pub fn video_codec(self, codec: impl Into<String>) -> Self {
        self.output_arg("-c:v").output_arg(codec)
    }

    pub fn audio_codec(self, codec: impl Into<String>) -> Self {
        self.output_arg("-c:a").output_arg(codec)
    }

    pub fn crf(self, crf: u8) -> Self {
        self.output_arg("-crf").output_arg(crf.to_string())
    }

    pub fn preset(self, preset: impl Into<String>) -> Self {
        self.output_arg("-preset").output_arg(preset)
    }

    pub fn audio_bitrate(self, bitrate: impl Into<String>) -> Self {
        self.output_arg("-b:a").output_arg(bitrate)
    }

    pub fn build_args(&self) -> Vec<String> {
        let mut args = vec![
            "-y".to_string(),
            "-v".to_string(),
            self.log_level.clone(),
            "-i".to_string(),
            self.input.to_string_lossy().to_string(),
        ];
        args.extend(self.output_args.iter().cloned());
        args.push(self.output.to_string_lossy().to_string());
        args
    }
}

/// Build a trim/concat filter graph for `plan`.
///
/// Video labels are `[v<i>]`, audio labels `[a<i>]`, outputs `[outv]`/`[outa]`.
fn concat_filter(plan: &CompositionPlan, with_video: bool) -> String {
    let mut chains = Vec::with_capacity(plan.segments.len() * 2 + 1);
    let mut inputs = String::new();

    for (i, segment) in plan.segments.iter().enumerate() {
        if with_video {
            chains.push(format!(
                "[0:{}]trim=start={:.6}:end={:.6},setpts=PTS-STARTPTS[v{}]",
                plan.video_track,
                segment.video.start().as_seconds(),
                segment.video.end().as_seconds(),
                i
            ));
            inputs.push_str(&format!("[v{}]", i));
        }

        chains.push(format!(
            "[0:{}]atrim=start={:.6}:end={:.6},asetpts=PTS-STARTPTS[a{}]",
            plan.audio_track,
            segment.audio.start().as_seconds(),
            segment.audio.end().as_seconds(),
            i
        ));
        inputs.push_str(&format!("[a{}]", i));
    }

    let outputs = if with_video { "[outv][outa]" } else { "[outa]" };
    chains.push(format!(
        "{}concat=n={}:v={}:a=1{}",
        inputs,
        plan.segments.len(),
        u8::from(with_video),
        outputs
    ));

    chains.join(";")
}

/// ffmpeg arguments that render `job` to its output path
pub fn build_ffmpeg_args(job: &ExportJob) -> Result<Vec<String>> {
    let plan = job.plan()?;

    if plan.is_empty() {
        return Err(PipelineError::Composition(
            "composition plan is empty".to_string(),
        ));
    }

    let with_video = job.preset.has_video();
    let cmd = FfmpegCommand::new(&plan.source, &job.output_path)
        .filter_complex(concat_filter(&plan, with_video));

    let cmd = match job.preset {
        ExportPreset::Highest => video_out(cmd).crf(18).preset("slow").audio_bitrate("192k"),
        ExportPreset::Medium => video_out(cmd).crf(23).preset("medium").audio_bitrate("128k"),
        ExportPreset::Low => video_out(cmd).crf(28).preset("veryfast").audio_bitrate("96k"),
        ExportPreset::Audio => cmd
            .map("[outa]")
            .output_arg("-vn")
            .audio_codec("aac")
            .audio_bitrate("128k"),
    };

    Ok(cmd.build_args())
}

fn video_out(cmd: FfmpegCommand) -> FfmpegCommand {
    cmd.map("[outv]")
        .map("[outa]")
        .video_codec("libx264")
        .output_args(["-pix_fmt", "yuv420p", "-movflags", "+faststart"])
        .audio_codec("aac")
}

/// Exporter backed by the ffmpeg CLI
#[derive(Debug, Clone)]
pub struct FfmpegExporter {
    ffmpeg_path: String,
    timeout: Option<Duration>,
}

impl FfmpegExporter {
    pub fn new() -> Self {
        Self {
            ffmpeg_path: "ffmpeg".to_string(),
            timeout: None,
        }
    }

    pub fn with_binary(mut self, path: impl Into<String>) -> Self {
        self.ffmpeg_path = path.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }
}

impl Default for FfmpegExporter {
    fn default() -> Self {
        Self::new()
    }
}

impl MediaExporter for FfmpegExporter {
    fn start(&self, job: ExportJob) -> ExportHandle {
        let ffmpeg_path = self.ffmpeg_path.clone();
        let timeout = self.timeout;
        ExportHandle::spawn(job, move |job| render(ffmpeg_path, timeout, job))
    }
}

async fn render(ffmpeg_path: String, timeout: Option<Duration>, job: ExportJob) -> Result<()> {
    let args = build_ffmpeg_args(&job)?;

    if let Some(parent) = job.output_path.parent() {
        fs_err::tokio::create_dir_all(parent)
            .await
            .map_err(|e| PipelineError::ExportFailed(e.to_string()))?;
    }

    tracing::info!(
        "Exporting job {} ({}) to {}",
        job.id,
        job.preset,
        job.output_path.display()
    );
    tracing::debug!("Running: {} {}", ffmpeg_path, args.join(" "));

    let run = Command::new(&ffmpeg_path)
        .args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output();

    let output = match timeout {
        Some(limit) => tokio::time::timeout(limit, run).await.map_err(|_| {
            PipelineError::ExportFailed(format!("ffmpeg timed out after {}s", limit.as_secs()))
        })?,
        None => run.await,
    }
    .map_err(|e| PipelineError::ExportFailed(format!("failed to run {}: {}", ffmpeg_path, e)))?;

    if !output.status.success() {
        let error = String::from_utf8_lossy(&output.stderr);
        return Err(PipelineError::ExportFailed(format!(
            "ffmpeg exited with {}: {}",
            output.status,
            error.trim()
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::{ExportInput, ExportStatus};
    use crate::media::tests::source_with;
    use crate::media::{compose, TimeRange, TrackKind};
    use tempfile::TempDir;

    fn plan(ranges: &[(f64, f64)]) -> CompositionPlan {
        let source = source_with(30.0, &[TrackKind::Audio, TrackKind::Video]);
        let ranges: Vec<TimeRange> = ranges
            .iter()
            .map(|(s, e)| TimeRange::from_seconds(*s, *e).unwrap())
            .collect();
        compose(&source, &ranges).unwrap()
    }

    #[test]
    fn test_build_args_concatenates_segments() {
        let dir = TempDir::new().unwrap();
        let job = ExportJob::new(
            ExportInput::Composition(plan(&[(2.3, 17.0), (21.35, 29.26)])),
            ExportPreset::Highest,
            dir.path(),
        );

        let args = build_ffmpeg_args(&job).unwrap();
        let filter = &args[args.iter().position(|a| a == "-filter_complex").unwrap() + 1];

        assert!(filter.contains("[0:1]trim=start=2.300000:end=17.000000,setpts=PTS-STARTPTS[v0]"));
        assert!(filter.contains("[0:0]atrim=start=21.350000:end=29.260000,asetpts=PTS-STARTPTS[a1]"));
        assert!(filter.ends_with("[v0][a0][v1][a1]concat=n=2:v=1:a=1[outv][outa]"));
        assert!(args.contains(&"libx264".to_string()));
        assert_eq!(args.last().unwrap(), &job.output_path.to_string_lossy().to_string());
    }

    #[test]
    fn test_build_args_audio_only() {
        let dir = TempDir::new().unwrap();
        let job = ExportJob::new(
            ExportInput::Composition(plan(&[(0.0, 5.0)])),
            ExportPreset::Audio,
            dir.path(),
        );

        let args = build_ffmpeg_args(&job).unwrap();
        let filter = &args[args.iter().position(|a| a == "-filter_complex").unwrap() + 1];

        assert!(args.contains(&"-vn".to_string()));
        assert!(!filter.contains("trim=start=0.000000:end=5.000000,setpts"));
        assert!(filter.ends_with("[a0]concat=n=1:v=0:a=1[outa]"));
        assert!(!args.contains(&"[outv]".to_string()));
    }

    #[test]
    fn test_build_args_rejects_empty_plan() {
        let dir = TempDir::new().unwrap();
        let job = ExportJob::new(
            ExportInput::Composition(plan(&[])),
            ExportPreset::Medium,
            dir.path(),
        );

        let err = build_ffmpeg_args(&job).unwrap_err();
        assert!(matches!(err, PipelineError::Composition(_)));
    }

    #[tokio::test]
    async fn test_exporter_rejects_empty_plan_without_output() {
        let dir = TempDir::new().unwrap();
        let job = ExportJob::new(
            ExportInput::Composition(plan(&[])),
            ExportPreset::Medium,
            dir.path(),
        );
        let path = job.output_path.clone();

        let handle = FfmpegExporter::new().start(job);
        let status = handle.subscribe();
        let err = handle.wait().await.unwrap_err();

        assert!(matches!(err, PipelineError::Composition(_)));
        assert_eq!(*status.borrow(), ExportStatus::Failed);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_exporter_missing_binary_fails() {
        let dir = TempDir::new().unwrap();
        let job = ExportJob::new(
            ExportInput::Composition(plan(&[(0.0, 1.0)])),
            ExportPreset::Low,
            dir.path(),
        );

        let exporter = FfmpegExporter::new().with_binary("/nonexistent/ffmpeg-binary");
        let err = exporter.start(job).wait().await.unwrap_err();

        assert!(matches!(err, PipelineError::ExportFailed(_)));
    }
}
