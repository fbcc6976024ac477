use serde::Deserialize;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;

use super::{MediaTime, SourceMedia, Track, TrackKind};
use crate::{PipelineError, Result};

/// ffprobe `-print_format json` output
#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    format: Option<FfprobeFormat>,
    streams: Vec<FfprobeStream>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    index: u32,
    codec_type: Option<String>,
    codec_name: Option<String>,
    duration: Option<String>,
}

fn parse_seconds(value: Option<&str>) -> Option<MediaTime> {
    value
        .and_then(|v| v.parse::<f64>().ok())
        .filter(|secs| secs.is_finite() && *secs >= 0.0)
        .map(MediaTime::from_seconds)
}

/// Decode ffprobe JSON for `path` into a `SourceMedia`
pub fn parse_probe_output(path: &Path, json: &[u8]) -> Result<SourceMedia> {
    let probe: FfprobeOutput = serde_json::from_slice(json).map_err(|e| {
        PipelineError::InvalidAsset(format!(
            "unreadable ffprobe output for {}: {}",
            path.display(),
            e
        ))
    })?;

    let tracks: Vec<Track> = probe
        .streams
        .iter()
        .map(|stream| Track {
            index: stream.index,
            kind: match stream.codec_type.as_deref() {
                Some("video") => TrackKind::Video,
                Some("audio") => TrackKind::Audio,
                _ => TrackKind::Other,
            },
            codec: stream.codec_name.clone(),
            duration: parse_seconds(stream.duration.as_deref()),
        })
        .collect();

    // Container duration first, then the longest stream
    let duration = probe
        .format
        .as_ref()
        .and_then(|f| parse_seconds(f.duration.as_deref()))
        .or_else(|| tracks.iter().filter_map(|t| t.duration).max())
        .ok_or_else(|| {
            PipelineError::InvalidAsset(format!("{} has no known duration", path.display()))
        })?;

    Ok(SourceMedia {
        path: path.to_path_buf(),
        duration,
        tracks,
    })
}

/// Probe a source file with the `ffprobe` binary at `ffprobe_path`
pub async fn probe_source(ffprobe_path: &str, path: &Path) -> Result<SourceMedia> {
    if !path.is_file() {
        return Err(PipelineError::InvalidAsset(format!(
            "source file does not exist: {}",
            path.display()
        )));
    }

    tracing::debug!("Probing source: {}", path.display());

    let output = Command::new(ffprobe_path)
        .args([
            "-v", "quiet",
            "-print_format", "json",
            "-show_format",
            "-show_streams",
        ])
        .arg(path)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|e| {
            PipelineError::InvalidAsset(format!("failed to run {}: {}", ffprobe_path, e))
        })?;

    if !output.status.success() {
        let error = String::from_utf8_lossy(&output.stderr);
        return Err(PipelineError::InvalidAsset(format!(
            "ffprobe could not read {}: {}",
            path.display(),
            error.trim()
        )));
    }

    parse_probe_output(path, &output.stdout)
}
