use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::export::ExportPreset;
use crate::remote::PostInfo;
use crate::utils;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Remote endpoints
    pub endpoints: EndpointsConfig,

    /// Object storage settings
    pub storage: StorageConfig,

    /// HTTP client settings
    pub http: HttpConfig,

    /// Export settings
    pub export: ExportConfig,

    /// Upload settings
    pub upload: UploadConfig,

    /// Default post settings for publish runs
    pub publish: PostInfo,

    /// Token store settings
    pub tokens: TokenConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointsConfig {
    /// Base URL of the service issuing upload slots (`<base>/s3url`)
    pub slot_base_url: String,

    /// Base URL of the transcription service (defaults to the slot service)
    pub transcribe_base_url: Option<String>,

    /// Base URL of the publish API
    pub publish_base_url: String,
}

impl EndpointsConfig {
    pub fn transcribe_base(&self) -> &str {
        self.transcribe_base_url
            .as_deref()
            .unwrap_or(&self.slot_base_url)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Host found in pre-signed upload URLs
    pub internal_host: String,

    /// Host that serves uploaded objects publicly
    pub public_host: String,

    /// Presign slots locally instead of asking the slot service
    pub s3: Option<S3SlotConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct S3SlotConfig {
    pub region: String,
    pub bucket: String,
    pub key_prefix: Option<String>,
    pub presign_expiry_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Per-request timeout
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportConfig {
    /// Preset for video exports
    pub preset: ExportPreset,

    /// Directory for exported files
    pub temp_dir: Option<PathBuf>,

    /// Keep exported files after a successful upload
    pub keep_outputs: bool,

    /// Abort an export after this many seconds
    pub timeout_secs: Option<u64>,

    /// ffmpeg binary
    pub ffmpeg_path: String,

    /// ffprobe binary used to read sources
    #[serde(default = "default_ffprobe_path")]
    pub ffprobe_path: String,
}

fn default_ffprobe_path() -> String {
    "ffprobe".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    /// Upload independent assets concurrently
    pub parallel: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenConfig {
    /// Token file (defaults to the config directory)
    pub path: Option<PathBuf>,

    /// Key of the publish API access token
    pub key: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            endpoints: EndpointsConfig {
                slot_base_url: "".to_string(),
                transcribe_base_url: None,
                publish_base_url: "https://open.tiktokapis.com".to_string(),
            },
            storage: StorageConfig {
                internal_host: "".to_string(),
                public_host: "".to_string(),
                s3: None,
            },
            http: HttpConfig { timeout_secs: 60 },
            export: ExportConfig {
                preset: ExportPreset::Highest,
                temp_dir: None,
                keep_outputs: false,
                timeout_secs: None,
                ffmpeg_path: "ffmpeg".to_string(),
                ffprobe_path: default_ffprobe_path(),
            },
            upload: UploadConfig { parallel: false },
            publish: PostInfo::default(),
            tokens: TokenConfig {
                path: None,
                key: "access_token".to_string(),
            },
        }
    }
}

impl Config {
    /// Load configuration from file or create default.
    ///
    /// Not validated; callers apply overrides first and then call `validate`.
    pub async fn load() -> Result<Self> {
        let config_path = Self::config_path()?;

        if config_path.exists() {
            Self::read_from(&config_path)
        } else {
            let config = Self::default();
            config.save().await?;
            Ok(config)
        }
    }

    /// Load and validate a specific config file
    pub fn load_from(path: &Path) -> Result<Self> {
        let config = Self::read_from(path)?;
        config.validate()?;
        Ok(config)
    }

    fn read_from(path: &Path) -> Result<Self> {
        let content = fs_err::read_to_string(path)
            .context("Failed to read config file")?;

        serde_yaml::from_str(&content).context("Failed to parse config file")
    }

    /// Save configuration to file
    pub async fn save(&self) -> Result<()> {
        let config_path = Self::config_path()?;

        if let Some(parent) = config_path.parent() {
            fs_err::create_dir_all(parent)?;
        }

        let content = serde_yaml::to_string(self)
            .context("Failed to serialize config")?;

        fs_err::write(&config_path, content)
            .context("Failed to write config file")?;

        Ok(())
    }

    /// Get configuration file path
    pub fn config_path() -> Result<PathBuf> {
        // First try current directory for easy testing
        let local_config = PathBuf::from("config.yaml");
        if local_config.exists() {
            return Ok(local_config);
        }

        Ok(Self::app_dir()?.join("config.yaml"))
    }

    fn app_dir() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Could not determine config directory")?;

        Ok(config_dir.join("stitchcast"))
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.endpoints.slot_base_url.is_empty() && self.storage.s3.is_none() {
            anyhow::bail!("endpoints.slot_base_url or storage.s3 must be configured");
        }

        if !self.endpoints.slot_base_url.is_empty() {
            utils::validate_and_normalize_url(&self.endpoints.slot_base_url)
                .context("Invalid endpoints.slot_base_url")?;
        }

        if let Some(url) = &self.endpoints.transcribe_base_url {
            utils::validate_and_normalize_url(url)
                .context("Invalid endpoints.transcribe_base_url")?;
        }

        utils::validate_and_normalize_url(&self.endpoints.publish_base_url)
            .context("Invalid endpoints.publish_base_url")?;

        if self.storage.internal_host.is_empty() || self.storage.public_host.is_empty() {
            anyhow::bail!("storage.internal_host and storage.public_host must be configured");
        }

        if let Some(s3) = &self.storage.s3 {
            if s3.bucket.is_empty() {
                anyhow::bail!("storage.s3.bucket must be configured");
            }
            if s3.presign_expiry_secs == 0 {
                anyhow::bail!("storage.s3.presign_expiry_secs must be positive");
            }
        }

        if self.http.timeout_secs == 0 {
            anyhow::bail!("http.timeout_secs must be positive");
        }

        if self.export.preset == ExportPreset::Audio {
            anyhow::bail!("export.preset must be a video preset");
        }

        Ok(())
    }

    /// Display current configuration
    pub fn display(&self) {
        println!("Current Configuration:");
        println!("  Slot Endpoint: {}", self.endpoints.slot_base_url);
        println!("  Transcribe Endpoint: {}", self.endpoints.transcribe_base());
        println!("  Publish Endpoint: {}", self.endpoints.publish_base_url);
        println!("  Storage Host: {} -> {}", self.storage.internal_host, self.storage.public_host);
        if let Some(s3) = &self.storage.s3 {
            println!("  S3 Presign: s3://{} ({})", s3.bucket, s3.region);
        }
        println!("  Export Preset: {}", self.export.preset);
        println!("  Export Dir: {}", self.export_dir().display());
        println!("  Keep Outputs: {}", self.export.keep_outputs);
        println!("  ffmpeg: {}", self.export.ffmpeg_path);
        println!("  ffprobe: {}", self.export.ffprobe_path);
        println!("  Parallel Uploads: {}", self.upload.parallel);
        println!("  HTTP Timeout: {}s", self.http.timeout_secs);
    }

    /// Directory exports are written to
    pub fn export_dir(&self) -> PathBuf {
        self.export
            .temp_dir
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("stitchcast"))
    }

    /// Token file location
    pub fn token_path(&self) -> Result<PathBuf> {
        match &self.tokens.path {
            Some(path) => Ok(path.clone()),
            None => Ok(Self::app_dir()?.join("tokens.json")),
        }
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http.timeout_secs)
    }

    pub fn export_timeout(&self) -> Option<Duration> {
        self.export.timeout_secs.map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const CONFIG_YAML: &str = r#"
endpoints:
  slot_base_url: "https://slots.example.com"
  transcribe_base_url: null
  publish_base_url: "https://open.tiktokapis.com"
storage:
  internal_host: "bucket.s3.us-east-2.amazonaws.com"
  public_host: "media.example.com"
  s3: null
http:
  timeout_secs: 30
export:
  preset: medium
  temp_dir: null
  keep_outputs: true
  timeout_secs: 600
  ffmpeg_path: ffmpeg
upload:
  parallel: true
publish:
  privacy_level: PUBLIC_TO_EVERYONE
  disable_comment: false
  title: ""
  video_cover_timestamp_ms: 1000
  disable_stitch: true
  disable_duet: false
tokens:
  path: null
  key: access_token
"#;

    fn write_config(content: &str) -> (TempDir, PathBuf) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.yaml");
        fs_err::write(&path, content).unwrap();
        (dir, path)
    }

    #[test]
    fn test_load_from_yaml() {
        let (_dir, path) = write_config(CONFIG_YAML);
        let config = Config::load_from(&path).unwrap();

        assert_eq!(config.export.preset, ExportPreset::Medium);
        assert!(config.upload.parallel);
        assert_eq!(config.endpoints.transcribe_base(), "https://slots.example.com");
        assert_eq!(config.publish.privacy_level, "PUBLIC_TO_EVERYONE");
        assert!(config.publish.disable_stitch);
        assert_eq!(config.http_timeout(), Duration::from_secs(30));
        assert_eq!(config.export_timeout(), Some(Duration::from_secs(600)));
        assert_eq!(config.export.ffprobe_path, "ffprobe");
    }

    #[test]
    fn test_custom_ffprobe_path() {
        let (_dir, path) = write_config(&CONFIG_YAML.replace(
            "  ffmpeg_path: ffmpeg\n",
            "  ffmpeg_path: /opt/ff/ffmpeg\n  ffprobe_path: /opt/ff/ffprobe\n",
        ));
        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.export.ffmpeg_path, "/opt/ff/ffmpeg");
        assert_eq!(config.export.ffprobe_path, "/opt/ff/ffprobe");
    }

    #[test]
    fn test_default_config_needs_endpoints() {
        assert!(Config::default().validate().is_err());
    }

    #[test]
    fn test_rejects_invalid_slot_url() {
        let (_dir, path) = write_config(
            &CONFIG_YAML.replace("https://slots.example.com", "ftp://slots.example.com"),
        );
        assert!(Config::load_from(&path).is_err());
    }

    #[test]
    fn test_rejects_missing_public_host() {
        let (_dir, path) = write_config(&CONFIG_YAML.replace("media.example.com", ""));
        assert!(Config::load_from(&path).is_err());
    }

    #[test]
    fn test_rejects_audio_export_preset() {
        let (_dir, path) = write_config(&CONFIG_YAML.replace("preset: medium", "preset: audio"));
        assert!(Config::load_from(&path).is_err());
    }

    #[test]
    fn test_default_round_trips_through_yaml() {
        let yaml = serde_yaml::to_string(&Config::default()).unwrap();
        let parsed: Config = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed.endpoints.publish_base_url, "https://open.tiktokapis.com");
        assert_eq!(parsed.tokens.key, "access_token");
    }
}
