use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

pub mod http;
pub mod s3;

pub use http::HttpRemoteClient;
pub use s3::S3Presigner;

use crate::token::BearerToken;
use crate::Result;

/// Content type of an uploaded asset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MediaType {
    Mp4Video,
    M4aAudio,
}

impl MediaType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaType::Mp4Video => "video/mp4",
            MediaType::M4aAudio => "audio/m4a",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            MediaType::Mp4Video => "mp4",
            MediaType::M4aAudio => "m4a",
        }
    }

    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "mp4" | "m4v" | "mov" => Some(MediaType::Mp4Video),
            "m4a" | "aac" => Some(MediaType::M4aAudio),
            _ => None,
        }
    }

    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|ext| ext.to_str())
            .and_then(Self::from_extension)
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pre-signed, single-use write destination
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadSlot {
    pub upload_url: String,
    pub media_type: MediaType,
}

/// Posting capabilities of the authenticated creator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatorInfo {
    pub creator_username: String,
    pub creator_nickname: Option<String>,
    pub creator_avatar_url: Option<String>,
    pub privacy_level_options: Vec<String>,
    #[serde(default)]
    pub comment_disabled: bool,
    #[serde(default)]
    pub duet_disabled: bool,
    #[serde(default)]
    pub stitch_disabled: bool,
    pub max_video_post_duration_sec: Option<u32>,
}

/// Where the publish API pulls the video from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceInfo {
    pub video_url: String,
    pub source: String,
}

/// Post settings sent along with a publish request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostInfo {
    pub privacy_level: String,
    pub disable_comment: bool,
    pub title: String,
    pub video_cover_timestamp_ms: u64,
    pub disable_stitch: bool,
    pub disable_duet: bool,
}

impl Default for PostInfo {
    fn default() -> Self {
        Self {
            privacy_level: "SELF_ONLY".to_string(),
            disable_comment: false,
            title: String::new(),
            video_cover_timestamp_ms: 1000,
            disable_stitch: false,
            disable_duet: false,
        }
    }
}

/// Body of a video publish request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishRequest {
    pub source_info: SourceInfo,
    pub post_info: PostInfo,
}

impl PublishRequest {
    /// Publish request that lets the API pull the video from `video_url`
    pub fn pull_from_url(video_url: impl Into<String>, post_info: PostInfo) -> Self {
        Self {
            source_info: SourceInfo {
                video_url: video_url.into(),
                source: "PULL_FROM_URL".to_string(),
            },
            post_info,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishResult {
    pub publish_id: String,
}

/// Basic profile of the authenticated user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub open_id: String,
    pub union_id: Option<String>,
    pub avatar_url: Option<String>,
    pub display_name: Option<String>,
}

/// Network capabilities the pipeline depends on.
///
/// Every call is a single request/response without retries.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RemoteCapabilities: Send + Sync {
    /// Obtain a pre-signed upload slot for `media_type`
    async fn request_upload_slot(&self, media_type: MediaType) -> Result<UploadSlot>;

    /// PUT `bytes` to `url`; any 2xx is success
    async fn put_bytes(&self, url: &str, bytes: Vec<u8>, media_type: MediaType) -> Result<()>;

    async fn query_creator_info(&self, token: &BearerToken) -> Result<CreatorInfo>;

    async fn submit_publish(
        &self,
        token: &BearerToken,
        request: &PublishRequest,
    ) -> Result<PublishResult>;

    /// Hand public audio and video URLs to the transcription service
    async fn request_transcription(&self, audio_url: &str, video_url: &str) -> Result<()>;

    async fn fetch_user_profile(&self, token: &BearerToken) -> Result<UserProfile>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_media_type_from_path() {
        assert_eq!(MediaType::from_path(Path::new("/tmp/a.MP4")), Some(MediaType::Mp4Video));
        assert_eq!(MediaType::from_path(Path::new("voice.m4a")), Some(MediaType::M4aAudio));
        assert_eq!(MediaType::from_path(Path::new("notes.txt")), None);
        assert_eq!(MediaType::from_path(Path::new("noext")), None);
    }

    #[test]
    fn test_publish_request_shape() {
        let post = PostInfo {
            title: "First reel".to_string(),
            ..PostInfo::default()
        };
        let request = PublishRequest::pull_from_url("https://cdn.example.com/v.mp4", post);
        let json = serde_json::to_value(&request).unwrap();

        assert_eq!(json["source_info"]["source"], "PULL_FROM_URL");
        assert_eq!(json["source_info"]["video_url"], "https://cdn.example.com/v.mp4");
        assert_eq!(json["post_info"]["privacy_level"], "SELF_ONLY");
        assert_eq!(json["post_info"]["title"], "First reel");
        assert_eq!(json["post_info"]["video_cover_timestamp_ms"], 1000);
        assert_eq!(json["post_info"]["disable_duet"], false);
    }
}
