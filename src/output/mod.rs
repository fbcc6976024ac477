use anyhow::Result;
use console::style;
use serde::Serialize;

use crate::cli::OutputFormat;
use crate::pipeline::{Downstream, RunKind, RunReport};
use crate::remote::{CreatorInfo, UserProfile};
use crate::utils;
use crate::PipelineError;

/// One human-readable line describing how a run ended
pub fn outcome_message(result: &std::result::Result<RunReport, PipelineError>) -> String {
    match result {
        Ok(report) => match (&report.downstream, report.kind) {
            (Some(Downstream::Published { publish_id }), _) => {
                format!("Published video (publish id {})", publish_id)
            }
            (Some(Downstream::TranscriptionRequested), _) => {
                "Transcription requested for uploaded audio and video".to_string()
            }
            (None, RunKind::Upload) => match report.uploads.first() {
                Some(asset) => format!("Uploaded to {}", asset.public_url),
                None => "Upload finished".to_string(),
            },
            (None, _) => match report.outputs.first() {
                Some(path) => format!("Exported {}", path.display()),
                None => format!("{} finished", report.kind),
            },
        },
        Err(e) => format!("{} failed: {}", stage_name(e), e),
    }
}

fn stage_name(error: &PipelineError) -> &'static str {
    match error {
        PipelineError::InvalidAsset(_) | PipelineError::Composition(_) => "Composition",
        PipelineError::ExportFailed(_) | PipelineError::ExportCancelled => "Export",
        PipelineError::SlotRequestFailed(_)
        | PipelineError::InvalidResponse(_)
        | PipelineError::UploadFailed(_)
        | PipelineError::DomainRewriteFailed { .. } => "Upload",
        PipelineError::MissingCredential(_) | PipelineError::TokenStore(_) => "Authorization",
        PipelineError::Decode(_)
        | PipelineError::DownstreamApi { .. }
        | PipelineError::DownstreamRequestFailed(_) => "Remote call",
    }
}

/// Render a finished run report
pub fn format_report(report: &RunReport, format: OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Json => format_as_json(report),
        OutputFormat::Text => Ok(format_report_text(report)),
    }
}

fn format_report_text(report: &RunReport) -> String {
    let mut lines = vec![format!("Run {} ({})", report.run_id, report.kind)];

    if let Some(duration) = report.duration_secs {
        lines.push(format!("  Duration: {}", utils::format_duration(duration)));
    }

    for path in &report.outputs {
        let size = fs_err::metadata(path)
            .map(|meta| utils::format_file_size(meta.len()))
            .unwrap_or_else(|_| "missing".to_string());
        lines.push(format!("  Output: {} ({})", path.display(), size));
    }

    for asset in &report.uploads {
        lines.push(format!("  Uploaded {}: {}", asset.media_type, asset.public_url));
    }

    match &report.downstream {
        Some(Downstream::Published { publish_id }) => {
            lines.push(format!("  Publish ID: {}", publish_id));
        }
        Some(Downstream::TranscriptionRequested) => {
            lines.push("  Transcription: requested".to_string());
        }
        None => {}
    }

    lines.join("\n")
}

pub fn format_creator_info(info: &CreatorInfo, format: OutputFormat) -> Result<String> {
    if format == OutputFormat::Json {
        return format_as_json(info);
    }

    let mut lines = vec![
        format!(
            "Creator: {} (@{})",
            info.creator_nickname.as_deref().unwrap_or(&info.creator_username),
            info.creator_username
        ),
        format!("  Privacy options: {}", info.privacy_level_options.join(", ")),
        format!("  Comments disabled: {}", info.comment_disabled),
        format!("  Duet disabled: {}", info.duet_disabled),
        format!("  Stitch disabled: {}", info.stitch_disabled),
    ];
    if let Some(max) = info.max_video_post_duration_sec {
        lines.push(format!("  Max video length: {}", utils::format_duration(max as f64)));
    }

    Ok(lines.join("\n"))
}

pub fn format_profile(profile: &UserProfile, format: OutputFormat) -> Result<String> {
    if format == OutputFormat::Json {
        return format_as_json(profile);
    }

    Ok(format!(
        "User: {}\n  Open ID: {}",
        profile.display_name.as_deref().unwrap_or("(no display name)"),
        profile.open_id
    ))
}

fn format_as_json<T: Serialize>(value: &T) -> Result<String> {
    Ok(serde_json::to_string_pretty(value)?)
}

/// Print the outcome line and, on success, the report
pub fn print_outcome(
    result: &std::result::Result<RunReport, PipelineError>,
    format: OutputFormat,
) -> Result<()> {
    let message = outcome_message(result);

    match result {
        Ok(report) => {
            if format == OutputFormat::Json {
                println!("{}", format_report(report, format)?);
            } else {
                println!("{} {}", style("✓").green().bold(), message);
                println!("{}", format_report(report, format)?);
            }
        }
        Err(_) => {
            eprintln!("{} {}", style("✗").red().bold(), message);
        }
    }

    Ok(())
}
