use crate::core::config::Config;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use log::info;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Voice {
    pub voice_id: String,
    pub name: String,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub gender: Option<String>,
    #[serde(default)]
    pub preview_audio: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Avatar {
    pub avatar_id: String,
    pub avatar_name: String,
    #[serde(default)]
    pub gender: Option<String>,
    #[serde(default)]
    pub preview_image_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    pub voice_id: String,
    pub avatar_id: String,
    pub script: String,
}

/// Raw status as reported by the vendor. Mapping to `JobStatus` is the
/// poller's job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobStatusReport {
    pub status: String,
    pub error_detail: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobResult {
    pub result_url: String,
    pub thumbnail_url: Option<String>,
}

#[async_trait]
pub trait VideoService: Send + Sync {
    async fn list_voices(&self) -> Result<Vec<Voice>>;
    async fn list_avatars(&self) -> Result<Vec<Avatar>>;
    /// Returns the vendor job id.
    async fn submit_generation(&self, request: &GenerationRequest) -> Result<String>;
    async fn query_job_status(&self, job_id: &str) -> Result<JobStatusReport>;
    async fn fetch_job_result(&self, job_id: &str) -> Result<JobResult>;
}

pub fn create_video_service(config: &Config) -> Result<Arc<dyn VideoService>> {
    if config.heygen.api_key.trim().is_empty() {
        return Err(anyhow!(
            "HeyGen API key missing. Set heygen.api_key in config.yml or {}.",
            crate::core::config::API_KEY_ENV
        ));
    }
    info!("Initializing HeyGen client at {}", config.heygen.base_url);
    Ok(Arc::new(client::HeyGenClient::new(config.heygen.clone())?))
}

pub mod client;
