use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;
use url::Url;

use super::{
    CreatorInfo, MediaType, PublishRequest, PublishResult, RemoteCapabilities, S3Presigner,
    UploadSlot, UserProfile,
};
use crate::config::{Config, EndpointsConfig};
use crate::token::BearerToken;
use crate::{PipelineError, Result};

const USER_INFO_FIELDS: &str = "open_id,union_id,avatar_url,display_name";

/// `{"uploadURL": "..."}` returned by the slot service
#[derive(Debug, Deserialize)]
struct SlotResponse {
    #[serde(rename = "uploadURL")]
    upload_url: String,
}

/// Envelope used by the publish API
#[derive(Debug, Deserialize)]
struct ApiEnvelope {
    #[serde(default)]
    data: serde_json::Value,
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    code: String,
    #[serde(default)]
    message: String,
    log_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UserData {
    user: UserProfile,
}

/// Where upload slots come from
enum SlotSource {
    Endpoint,
    Presigned(S3Presigner),
}

/// reqwest-backed implementation of `RemoteCapabilities`
pub struct HttpRemoteClient {
    client: Client,
    slot_base: String,
    transcribe_base: String,
    publish_base: String,
    slots: SlotSource,
}

impl HttpRemoteClient {
    /// Create a client that asks the slot service for upload slots
    pub fn new(endpoints: &EndpointsConfig, timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("stitchcast/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            slot_base: endpoints.slot_base_url.trim_end_matches('/').to_string(),
            transcribe_base: endpoints.transcribe_base().trim_end_matches('/').to_string(),
            publish_base: endpoints.publish_base_url.trim_end_matches('/').to_string(),
            slots: SlotSource::Endpoint,
        })
    }

    /// Create a client from configuration, presigning locally when `storage.s3` is set
    pub async fn from_config(config: &Config) -> anyhow::Result<Self> {
        let client = Self::new(&config.endpoints, config.http_timeout())?;

        match &config.storage.s3 {
            Some(s3) => Ok(client.with_presigner(S3Presigner::from_config(s3).await)),
            None => Ok(client),
        }
    }

    pub fn with_presigner(mut self, presigner: S3Presigner) -> Self {
        self.slots = SlotSource::Presigned(presigner);
        self
    }

    async fn slot_from_endpoint(&self, media_type: MediaType) -> Result<UploadSlot> {
        let url = format!("{}/s3url", self.slot_base);
        tracing::debug!("Requesting upload slot for {} from {}", media_type, url);

        let response = self
            .client
            .get(&url)
            .query(&[("contentType", media_type.as_str())])
            .send()
            .await
            .map_err(|e| PipelineError::SlotRequestFailed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(PipelineError::SlotRequestFailed(format!(
                "slot service returned HTTP {}",
                status
            )));
        }

        let body = response
            .text()
            .await
            .map_err(|e| PipelineError::SlotRequestFailed(e.to_string()))?;

        let slot: SlotResponse = serde_json::from_str(&body)
            .map_err(|e| PipelineError::InvalidResponse(format!("slot response: {}", e)))?;

        Url::parse(&slot.upload_url).map_err(|e| {
            PipelineError::InvalidResponse(format!("slot uploadURL is not a URL: {}", e))
        })?;

        Ok(UploadSlot {
            upload_url: slot.upload_url,
            media_type,
        })
    }
}

/// Turn a downstream API response into `T`, failing on non-2xx or an error envelope
async fn read_api_response<T: DeserializeOwned>(response: Response) -> Result<T> {
    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| PipelineError::DownstreamRequestFailed(e.to_string()))?;

    if !status.is_success() {
        return Err(PipelineError::DownstreamApi {
            status_code: status.as_u16(),
            body,
        });
    }

    let envelope: ApiEnvelope =
        serde_json::from_str(&body).map_err(|e| PipelineError::Decode(e.to_string()))?;

    if let Some(error) = envelope.error {
        if error.code != "ok" {
            tracing::debug!("API error log id: {:?}", error.log_id);
            return Err(PipelineError::DownstreamApi {
                status_code: status.as_u16(),
                body: format!("{}: {}", error.code, error.message),
            });
        }
    }

    serde_json::from_value(envelope.data).map_err(|e| PipelineError::Decode(e.to_string()))
}

#[async_trait]
impl RemoteCapabilities for HttpRemoteClient {
    async fn request_upload_slot(&self, media_type: MediaType) -> Result<UploadSlot> {
        match &self.slots {
            SlotSource::Endpoint => self.slot_from_endpoint(media_type).await,
            SlotSource::Presigned(presigner) => presigner.presign_put(media_type).await,
        }
    }

    async fn put_bytes(&self, url: &str, bytes: Vec<u8>, media_type: MediaType) -> Result<()> {
        tracing::debug!("PUT {} bytes ({})", bytes.len(), media_type);

        let response = self
            .client
            .put(url)
            .header(CONTENT_TYPE, media_type.as_str())
            .body(bytes)
            .send()
            .await
            .map_err(|e| PipelineError::UploadFailed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PipelineError::UploadFailed(format!(
                "storage returned HTTP {}: {}",
                status,
                body.trim()
            )));
        }

        Ok(())
    }

    async fn query_creator_info(&self, token: &BearerToken) -> Result<CreatorInfo> {
        let url = format!("{}/v2/post/publish/creator_info/query/", self.publish_base);

        let response = self
            .client
            .post(&url)
            .bearer_auth(token.secret())
            .header(CONTENT_TYPE, "application/json; charset=UTF-8")
            .send()
            .await
            .map_err(|e| PipelineError::DownstreamRequestFailed(e.to_string()))?;

        read_api_response(response).await
    }

    async fn submit_publish(
        &self,
        token: &BearerToken,
        request: &PublishRequest,
    ) -> Result<PublishResult> {
        let url = format!("{}/v2/post/publish/video/init/", self.publish_base);
        tracing::info!("Submitting publish request for {}", request.source_info.video_url);

        let response = self
            .client
            .post(&url)
            .bearer_auth(token.secret())
            .json(request)
            .send()
            .await
            .map_err(|e| PipelineError::DownstreamRequestFailed(e.to_string()))?;

        read_api_response(response).await
    }

    async fn request_transcription(&self, audio_url: &str, video_url: &str) -> Result<()> {
        let url = format!(
            "{}/transcribe?audioUrl={}&videoUrl={}",
            self.transcribe_base,
            urlencoding::encode(audio_url),
            urlencoding::encode(video_url)
        );
        tracing::info!("Requesting transcription");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| PipelineError::DownstreamRequestFailed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PipelineError::DownstreamApi {
                status_code: status.as_u16(),
                body,
            });
        }

        Ok(())
    }

    async fn fetch_user_profile(&self, token: &BearerToken) -> Result<UserProfile> {
        let url = format!("{}/v2/user/info/", self.publish_base);

        let response = self
            .client
            .get(&url)
            .query(&[("fields", USER_INFO_FIELDS)])
            .bearer_auth(token.secret())
            .send()
            .await
            .map_err(|e| PipelineError::DownstreamRequestFailed(e.to_string()))?;

        let data: UserData = read_api_response(response).await?;
        Ok(data.user)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::PostInfo;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> HttpRemoteClient {
        let endpoints = EndpointsConfig {
            slot_base_url: format!("{}/", server.uri()),
            transcribe_base_url: None,
            publish_base_url: server.uri(),
        };
        HttpRemoteClient::new(&endpoints, Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn test_request_upload_slot() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/s3url"))
            .and(query_param("contentType", "audio/m4a"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "uploadURL": "https://bucket.s3.amazonaws.com/key.m4a?X-Amz-Signature=abc"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let slot = client_for(&server)
            .request_upload_slot(MediaType::M4aAudio)
            .await
            .unwrap();

        assert_eq!(slot.media_type, MediaType::M4aAudio);
        assert!(slot.upload_url.starts_with("https://bucket.s3.amazonaws.com/key.m4a?"));
    }

    #[tokio::test]
    async fn test_upload_slot_invalid_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/s3url"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"url": "x"})))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .request_upload_slot(MediaType::Mp4Video)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::InvalidResponse(_)));
    }

    #[tokio::test]
    async fn test_upload_slot_http_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/s3url"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .request_upload_slot(MediaType::Mp4Video)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::SlotRequestFailed(_)));
    }

    #[tokio::test]
    async fn test_put_bytes() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/bucket/key.mp4"))
            .and(header("content-type", "video/mp4"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let url = format!("{}/bucket/key.mp4?X-Sig=abc", server.uri());
        client_for(&server)
            .put_bytes(&url, Vec::new(), MediaType::Mp4Video)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_put_bytes_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(403).set_body_string("SignatureDoesNotMatch"))
            .mount(&server)
            .await;

        let url = format!("{}/bucket/key.mp4", server.uri());
        let err = client_for(&server)
            .put_bytes(&url, b"data".to_vec(), MediaType::Mp4Video)
            .await
            .unwrap_err();

        match err {
            PipelineError::UploadFailed(message) => assert!(message.contains("403")),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_query_creator_info() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v2/post/publish/creator_info/query/"))
            .and(header("authorization", "Bearer act.123"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": {
                    "creator_avatar_url": "https://cdn.example.com/a.jpg",
                    "creator_username": "reels",
                    "creator_nickname": "Reels",
                    "privacy_level_options": ["PUBLIC_TO_EVERYONE", "SELF_ONLY"],
                    "comment_disabled": false,
                    "duet_disabled": true,
                    "stitch_disabled": false,
                    "max_video_post_duration_sec": 600
                },
                "error": {"code": "ok", "message": "", "log_id": "log"}
            })))
            .mount(&server)
            .await;

        let info = client_for(&server)
            .query_creator_info(&BearerToken::new("act.123"))
            .await
            .unwrap();

        assert_eq!(info.creator_username, "reels");
        assert!(info.duet_disabled);
        assert_eq!(info.privacy_level_options.len(), 2);
        assert_eq!(info.max_video_post_duration_sec, Some(600));
    }

    #[tokio::test]
    async fn test_query_creator_info_decode_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v2/post/publish/creator_info/query/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": {"nope": 1}})))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .query_creator_info(&BearerToken::new("act.123"))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Decode(_)));
    }

    #[tokio::test]
    async fn test_query_creator_info_unauthorized() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("access_token_invalid"))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .query_creator_info(&BearerToken::new("expired"))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::DownstreamApi { status_code: 401, .. }));
    }

    #[tokio::test]
    async fn test_submit_publish() {
        let server = MockServer::start().await;
        let request = PublishRequest::pull_from_url(
            "https://media.example.com/v.mp4",
            PostInfo {
                title: "hello".to_string(),
                ..PostInfo::default()
            },
        );

        Mock::given(method("POST"))
            .and(path("/v2/post/publish/video/init/"))
            .and(header("authorization", "Bearer act.123"))
            .and(body_json(json!({
                "source_info": {"video_url": "https://media.example.com/v.mp4", "source": "PULL_FROM_URL"},
                "post_info": {
                    "privacy_level": "SELF_ONLY",
                    "disable_comment": false,
                    "title": "hello",
                    "video_cover_timestamp_ms": 1000,
                    "disable_stitch": false,
                    "disable_duet": false
                }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": {"publish_id": "v_pub_url~v2.123"},
                "error": {"code": "ok", "message": "", "log_id": "log"}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let result = client_for(&server)
            .submit_publish(&BearerToken::new("act.123"), &request)
            .await
            .unwrap();
        assert_eq!(result.publish_id, "v_pub_url~v2.123");
    }

    #[tokio::test]
    async fn test_submit_publish_error_includes_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v2/post/publish/video/init/"))
            .respond_with(ResponseTemplate::new(429).set_body_string("rate_limit_exceeded"))
            .mount(&server)
            .await;

        let request = PublishRequest::pull_from_url("https://media.example.com/v.mp4", PostInfo::default());
        let err = client_for(&server)
            .submit_publish(&BearerToken::new("act.123"), &request)
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::DownstreamApi { status_code: 429, .. }));
        assert!(err.to_string().contains("429"));
    }

    #[tokio::test]
    async fn test_submit_publish_error_envelope() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v2/post/publish/video/init/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": {},
                "error": {"code": "spam_risk_too_many_posts", "message": "slow down", "log_id": "x"}
            })))
            .mount(&server)
            .await;

        let request = PublishRequest::pull_from_url("https://media.example.com/v.mp4", PostInfo::default());
        let err = client_for(&server)
            .submit_publish(&BearerToken::new("act.123"), &request)
            .await
            .unwrap_err();

        match err {
            PipelineError::DownstreamApi { status_code, body } => {
                assert_eq!(status_code, 200);
                assert!(body.contains("spam_risk_too_many_posts"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_request_transcription_encodes_urls() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/transcribe"))
            .and(query_param("audioUrl", "https://media.example.com/a.m4a"))
            .and(query_param("videoUrl", "https://media.example.com/v.mp4"))
            .respond_with(ResponseTemplate::new(202))
            .expect(1)
            .mount(&server)
            .await;

        client_for(&server)
            .request_transcription("https://media.example.com/a.m4a", "https://media.example.com/v.mp4")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_fetch_user_profile() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v2/user/info/"))
            .and(query_param("fields", USER_INFO_FIELDS))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": {"user": {
                    "open_id": "-000abc",
                    "union_id": "fe2d71ce",
                    "avatar_url": "https://cdn.example.com/a.jpeg",
                    "display_name": "Devin"
                }},
                "error": {"code": "ok", "message": "", "log_id": "log"}
            })))
            .mount(&server)
            .await;

        let profile = client_for(&server)
            .fetch_user_profile(&BearerToken::new("act.123"))
            .await
            .unwrap();
        assert_eq!(profile.open_id, "-000abc");
        assert_eq!(profile.display_name.as_deref(), Some("Devin"));
    }
}
