use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use stitchcast::cli::{Cli, Commands, OutputFormat, TokenCommand};
use stitchcast::config::Config;
use stitchcast::media::{compose, probe_source, CompositionPlan, TimeRange};
use stitchcast::pipeline::{HostRewrite, PipelineRunner, RunReport, RunSettings};
use stitchcast::remote::{HttpRemoteClient, MediaType};
use stitchcast::token::{BearerToken, FileTokenStore, TokenStore};
use stitchcast::{output, utils, FfmpegExporter, PipelineError};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_json);

    let mut config = Config::load().await?;
    if let Some(url) = &cli.slot_base_url {
        config.endpoints.slot_base_url = url.clone();
    }

    let format = cli.format;
    let quiet = cli.quiet;

    match cli.command {
        Commands::Config { show } => {
            if show {
                config.display();
            } else {
                config.save().await?;
                println!("Configuration written to: {}", Config::config_path()?.display());
            }
        }
        Commands::Token { action } => {
            let path = config.token_path()?;
            let store = FileTokenStore::new(&path);
            let key = &config.tokens.key;

            match action {
                TokenCommand::Set { token } => {
                    store.set(key, BearerToken::new(token))?;
                    println!("Token '{}' saved to {}", key, path.display());
                }
                TokenCommand::Show => match store.get(key)? {
                    Some(token) => println!("Token '{}' is set ({} chars)", key, token.secret().len()),
                    None => println!("No token stored under '{}'", key),
                },
                TokenCommand::Clear => {
                    store.remove(key)?;
                    println!("Token '{}' removed", key);
                }
            }
        }
        Commands::CreatorInfo => {
            let runner = build_runner(&config).await?;
            let info = runner.creator_info().await?;
            println!("{}", output::format_creator_info(&info, format)?);
        }
        Commands::Profile => {
            let runner = build_runner(&config).await?;
            let profile = runner.user_profile().await?;
            println!("{}", output::format_profile(&profile, format)?);
        }
        Commands::Upload { file } => {
            utils::check_file_accessible(&file)?;
            let media_type = MediaType::from_path(&file)
                .with_context(|| format!("Unsupported file type: {}", file.display()))?;

            let runner = build_runner(&config).await?;
            let progress = spinner(quiet, format!("Uploading {}...", file.display()));
            let result = runner.upload_file(&file, media_type).await;
            finish(progress, result, format)?;
        }
        Commands::Stitch {
            source,
            ranges,
            output,
            preset,
        } => {
            warn_missing_dependencies(&config).await;
            let runner = build_runner(&config).await?.with_cancel(ctrl_c_signal());
            let preset = preset.unwrap_or(runner.settings().preset);

            let progress = spinner(quiet, format!("Stitching {} range(s)...", ranges.len()));
            let result = async {
                let plan = load_plan(&config.export.ffprobe_path, &source, &ranges).await?;
                runner.stitch(&plan, preset, output.as_deref()).await
            }
            .await;
            finish(progress, result, format)?;
        }
        Commands::Publish {
            source,
            ranges,
            title,
            privacy,
            cover_ms,
        } => {
            warn_missing_dependencies(&config).await;
            let runner = build_runner(&config).await?.with_cancel(ctrl_c_signal());

            let mut post = config.publish.clone();
            if let Some(title) = title {
                post.title = title;
            }
            if let Some(privacy) = privacy {
                post.privacy_level = privacy;
            }
            if let Some(cover_ms) = cover_ms {
                post.video_cover_timestamp_ms = cover_ms;
            }

            let progress = spinner(quiet, "Exporting, uploading and publishing...".to_string());
            let result = async {
                let plan = load_plan(&config.export.ffprobe_path, &source, &ranges).await?;
                runner.publish(&plan, post).await
            }
            .await;
            finish(progress, result, format)?;
        }
        Commands::Transcribe { source, ranges } => {
            warn_missing_dependencies(&config).await;
            let runner = build_runner(&config).await?.with_cancel(ctrl_c_signal());

            let progress = spinner(quiet, "Exporting and uploading audio and video...".to_string());
            let result = async {
                let plan = load_plan(&config.export.ffprobe_path, &source, &ranges).await?;
                runner.transcribe(&plan).await
            }
            .await;
            finish(progress, result, format)?;
        }
    }

    Ok(())
}

fn init_tracing(verbose: bool, json: bool) {
    let default_filter = if verbose { "stitchcast=debug" } else { "stitchcast=info" };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(json.then(|| tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr)))
        .with((!json).then(|| tracing_subscriber::fmt::layer().with_writer(std::io::stderr)))
        .init();
}

async fn warn_missing_dependencies(config: &Config) {
    let missing =
        utils::check_dependencies(&config.export.ffmpeg_path, &config.export.ffprobe_path).await;
    if !missing.is_empty() {
        eprintln!("⚠️  Dependency check warnings:");
        for dep in missing {
            eprintln!("   • {}", dep);
        }
    }
}

async fn build_runner(config: &Config) -> Result<PipelineRunner> {
    config.validate()?;

    let remote = Arc::new(
        HttpRemoteClient::from_config(config)
            .await
            .context("Failed to create HTTP client")?,
    );
    let exporter = Arc::new(
        FfmpegExporter::new()
            .with_binary(config.export.ffmpeg_path.clone())
            .with_timeout(config.export_timeout()),
    );
    let tokens = Arc::new(FileTokenStore::new(config.token_path()?));

    Ok(PipelineRunner::new(
        exporter,
        remote,
        tokens,
        HostRewrite::from_config(&config.storage),
        RunSettings::from_config(config),
    ))
}

async fn load_plan(
    ffprobe_path: &str,
    source: &Path,
    ranges: &[TimeRange],
) -> stitchcast::Result<CompositionPlan> {
    let media = probe_source(ffprobe_path, source).await?;
    compose(&media, ranges)
}

/// Flips to true on Ctrl-C
fn ctrl_c_signal() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tx.send_replace(true);
        }
    });
    rx
}

fn spinner(quiet: bool, message: String) -> Option<ProgressBar> {
    if quiet {
        return None;
    }

    let progress = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} [{elapsed_precise}] {msg}") {
        progress.set_style(style);
    }
    progress.set_message(message);
    progress.enable_steady_tick(Duration::from_millis(120));
    Some(progress)
}

fn finish(
    progress: Option<ProgressBar>,
    result: std::result::Result<RunReport, PipelineError>,
    format: OutputFormat,
) -> Result<()> {
    if let Some(progress) = progress {
        progress.finish_and_clear();
    }

    output::print_outcome(&result, format)?;

    if let Err(e) = result {
        tracing::debug!("Run failed with {}", e.kind());
        std::process::exit(1);
    }
    Ok(())
}
