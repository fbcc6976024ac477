//! Stitchcast - clip-and-stitch videos and push them through upload and publish APIs
//!
//! This library composes a new video from time ranges of a source file, exports it with
//! ffmpeg, uploads the result through pre-signed storage slots and hands the public URL
//! to a downstream transcription or publish API.

pub mod cli;
pub mod config;
pub mod export;
pub mod media;
pub mod output;
pub mod pipeline;
pub mod remote;
pub mod token;
pub mod utils;

pub use cli::{Cli, Commands, OutputFormat};
pub use config::Config;
pub use export::{ExportHandle, ExportJob, ExportPreset, ExportStatus, FfmpegExporter, MediaExporter};
pub use media::{CompositionPlan, MediaTime, SourceMedia, TimeRange};
pub use pipeline::{PipelineRunner, RunReport, UploadOrchestrator};
pub use remote::{HttpRemoteClient, RemoteCapabilities};
pub use token::{BearerToken, FileTokenStore, MemoryTokenStore, TokenStore};

/// Result type used throughout the library
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Terminal failure of a pipeline stage
#[derive(thiserror::Error, Debug)]
pub enum PipelineError {
    #[error("Invalid asset: {0}")]
    InvalidAsset(String),

    #[error("Composition failed: {0}")]
    Composition(String),

    #[error("Export failed: {0}")]
    ExportFailed(String),

    #[error("Export cancelled")]
    ExportCancelled,

    #[error("Upload slot request failed: {0}")]
    SlotRequestFailed(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Upload failed: {0}")]
    UploadFailed(String),

    #[error("Public URL rewrite failed: host '{host}' not found in {url}")]
    DomainRewriteFailed { url: String, host: String },

    #[error("Failed to decode response: {0}")]
    Decode(String),

    #[error("Missing credential: {0}")]
    MissingCredential(String),

    #[error("Downstream API returned HTTP {status_code}: {body}")]
    DownstreamApi { status_code: u16, body: String },

    #[error("Downstream request failed: {0}")]
    DownstreamRequestFailed(String),

    #[error("Token store error: {0}")]
    TokenStore(String),
}

impl PipelineError {
    /// Short stage-independent name used in reports and logs
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::InvalidAsset(_) => "invalid_asset",
            PipelineError::Composition(_) => "composition",
            PipelineError::ExportFailed(_) => "export_failed",
            PipelineError::ExportCancelled => "export_cancelled",
            PipelineError::SlotRequestFailed(_) => "slot_request_failed",
            PipelineError::InvalidResponse(_) => "invalid_response",
            PipelineError::UploadFailed(_) => "upload_failed",
            PipelineError::DomainRewriteFailed { .. } => "domain_rewrite_failed",
            PipelineError::Decode(_) => "decode_error",
            PipelineError::MissingCredential(_) => "missing_credential",
            PipelineError::DownstreamApi { .. } => "downstream_api_error",
            PipelineError::DownstreamRequestFailed(_) => "downstream_request_failed",
            PipelineError::TokenStore(_) => "token_store",
        }
    }
}
