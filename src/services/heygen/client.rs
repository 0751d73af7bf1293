use super::{Avatar, GenerationRequest, JobResult, JobStatusReport, VideoService, Voice};
use crate::core::config::{Dimension, HeyGenConfig};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use log::debug;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

const API_KEY_HEADER: &str = "X-Api-Key";
const STATUS_OK_CODE: i64 = 100;

// --- Wire schema ---

/// `{ "error": ..., "data": ... }` returned by the v2 endpoints.
#[derive(Deserialize)]
struct V2Envelope<T> {
    #[serde(default)]
    error: Option<ApiError>,
    data: Option<T>,
}

#[derive(Deserialize, Debug)]
struct ApiError {
    #[serde(default)]
    message: String,
}

/// `{ "code": 100, "message": ..., "data": ... }` returned by the v1 status endpoint.
#[derive(Deserialize)]
struct V1Envelope<T> {
    code: i64,
    #[serde(default)]
    message: Option<String>,
    data: Option<T>,
}

#[derive(Deserialize)]
struct VoiceList {
    voices: Vec<Voice>,
}

#[derive(Deserialize)]
struct AvatarList {
    avatars: Vec<Avatar>,
}

#[derive(Deserialize)]
struct GenerateData {
    video_id: String,
}

#[derive(Deserialize)]
struct StatusData {
    status: String,
    #[serde(default)]
    video_url: Option<String>,
    #[serde(default)]
    thumbnail_url: Option<String>,
    #[serde(default)]
    error: Option<StatusError>,
}

#[derive(Deserialize)]
struct StatusError {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    detail: Option<String>,
}

#[derive(Serialize)]
struct GenerateBody<'a> {
    video_inputs: Vec<VideoInput<'a>>,
    dimension: Dimension,
}

#[derive(Serialize)]
struct VideoInput<'a> {
    character: Character<'a>,
    voice: VoiceInput<'a>,
}

#[derive(Serialize)]
struct Character<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    avatar_id: &'a str,
    avatar_style: &'a str,
}

#[derive(Serialize)]
struct VoiceInput<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    input_text: &'a str,
    voice_id: &'a str,
}

fn parse_v2<T: DeserializeOwned>(body: &str, what: &str) -> Result<T> {
    let envelope: V2Envelope<T> = serde_json::from_str(body)
        .with_context(|| format!("Unexpected {} response: {}", what, body))?;
    if let Some(err) = envelope.error {
        return Err(anyhow!("HeyGen {} error: {}", what, err.message));
    }
    envelope
        .data
        .ok_or_else(|| anyhow!("HeyGen {} response has no data: {}", what, body))
}

fn parse_status_data(body: &str) -> Result<StatusData> {
    let envelope: V1Envelope<StatusData> = serde_json::from_str(body)
        .with_context(|| format!("Unexpected status response: {}", body))?;
    if envelope.code != STATUS_OK_CODE {
        return Err(anyhow!(
            "HeyGen status error (code {}): {}",
            envelope.code,
            envelope.message.unwrap_or_default()
        ));
    }
    envelope
        .data
        .ok_or_else(|| anyhow!("HeyGen status response has no data: {}", body))
}

pub(crate) fn parse_voices(body: &str) -> Result<Vec<Voice>> {
    Ok(parse_v2::<VoiceList>(body, "voice list")?.voices)
}

pub(crate) fn parse_avatars(body: &str) -> Result<Vec<Avatar>> {
    Ok(parse_v2::<AvatarList>(body, "avatar list")?.avatars)
}

pub(crate) fn parse_generate(body: &str) -> Result<String> {
    Ok(parse_v2::<GenerateData>(body, "generate")?.video_id)
}

pub(crate) fn parse_status(body: &str) -> Result<JobStatusReport> {
    let data = parse_status_data(body)?;
    let error_detail = data.error.and_then(|e| e.detail.or(e.message));
    Ok(JobStatusReport {
        status: data.status,
        error_detail,
    })
}

pub(crate) fn parse_result(body: &str) -> Result<JobResult> {
    let data = parse_status_data(body)?;
    let result_url = data
        .video_url
        .filter(|u| !u.is_empty())
        .ok_or_else(|| anyhow!("Video is {} but has no video_url", data.status))?;
    Ok(JobResult {
        result_url,
        thumbnail_url: data.thumbnail_url,
    })
}

// --- Client ---

pub struct HeyGenClient {
    config: HeyGenConfig,
    base_url: Url,
    client: Client,
}

impl HeyGenClient {
    pub fn new(config: HeyGenConfig) -> Result<Self> {
        let mut base = config.base_url.trim().to_string();
        if !base.ends_with('/') {
            base.push('/');
        }
        let base_url =
            Url::parse(&base).with_context(|| format!("Invalid HeyGen base_url: {}", base))?;
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            config,
            base_url,
            client,
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .with_context(|| format!("Invalid endpoint path: {}", path))
    }

    fn status_url(&self, job_id: &str) -> Result<Url> {
        let mut url = self.endpoint("v1/video_status.get")?;
        url.query_pairs_mut().append_pair("video_id", job_id);
        Ok(url)
    }

    async fn get_text(&self, url: Url) -> Result<String> {
        debug!("GET {}", url);
        let resp = self
            .client
            .get(url.clone())
            .header(API_KEY_HEADER, &self.config.api_key)
            .send()
            .await
            .with_context(|| format!("Request to {} failed", url.path()))?;
        Self::read_body(resp).await
    }

    async fn read_body(resp: reqwest::Response) -> Result<String> {
        let status = resp.status();
        let body = resp.text().await.context("Failed to read response body")?;
        if !status.is_success() {
            return Err(anyhow!("HeyGen API error ({}): {}", status, body));
        }
        Ok(body)
    }
}

#[async_trait]
impl VideoService for HeyGenClient {
    async fn list_voices(&self) -> Result<Vec<Voice>> {
        let body = self.get_text(self.endpoint("v2/voices")?).await?;
        parse_voices(&body)
    }

    async fn list_avatars(&self) -> Result<Vec<Avatar>> {
        let body = self.get_text(self.endpoint("v2/avatars")?).await?;
        parse_avatars(&body)
    }

    async fn submit_generation(&self, request: &GenerationRequest) -> Result<String> {
        let body = GenerateBody {
            video_inputs: vec![VideoInput {
                character: Character {
                    kind: "avatar",
                    avatar_id: &request.avatar_id,
                    avatar_style: &self.config.avatar_style,
                },
                voice: VoiceInput {
                    kind: "text",
                    input_text: &request.script,
                    voice_id: &request.voice_id,
                },
            }],
            dimension: self.config.dimension,
        };

        let url = self.endpoint("v2/video/generate")?;
        debug!("POST {}", url);
        let resp = self
            .client
            .post(url)
            .header(API_KEY_HEADER, &self.config.api_key)
            .json(&body)
            .send()
            .await
            .context("Failed to send generate request")?;
        let text = Self::read_body(resp).await?;
        parse_generate(&text)
    }

    async fn query_job_status(&self, job_id: &str) -> Result<JobStatusReport> {
        let body = self.get_text(self.status_url(job_id)?).await?;
        parse_status(&body)
    }

    async fn fetch_job_result(&self, job_id: &str) -> Result<JobResult> {
        let body = self.get_text(self.status_url(job_id)?).await?;
        parse_result(&body)
    }
}
