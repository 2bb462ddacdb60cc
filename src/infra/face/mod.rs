//! Client for the external face-embedding service.
//!
//! The service exposes `POST /extract-face` taking `{"image": "<base64 or data URL>"}`
//! and answering `{"success": true, "embedding": [f64, ...]}` or
//! `{"success": false, "message": "..."}`.

use crate::infra::config::FaceServiceConfig;
use async_trait::async_trait;
use base64::Engine;
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum FaceServiceError {
    #[error("face verification is not configured on this server")]
    Disabled,
    #[error("invalid image: {0}")]
    InvalidImage(String),
    #[error("no usable face in image: {0}")]
    NoFace(String),
    #[error("face service unavailable: {0}")]
    Unavailable(String),
    #[error("face service returned an invalid response: {0}")]
    InvalidResponse(String),
}

#[async_trait]
pub trait FaceEmbedder: Send + Sync {
    /// Returns the embedding of the single face in `image`.
    async fn embed(&self, image: &str) -> Result<Vec<f64>, FaceServiceError>;
}

/// Strips an optional `data:image/...;base64,` prefix and checks the payload decodes.
pub fn decode_image(image: &str) -> Result<Vec<u8>, FaceServiceError> {
    let image = image.trim();
    if image.is_empty() {
        return Err(FaceServiceError::InvalidImage("no image provided".to_string()));
    }
    let payload = match image.strip_prefix("data:") {
        Some(rest) => {
            let (meta, data) = rest
                .split_once(',')
                .ok_or_else(|| FaceServiceError::InvalidImage("malformed data URL".to_string()))?;
            if !meta.starts_with("image/") || !meta.ends_with(";base64") {
                return Err(FaceServiceError::InvalidImage(
                    "data URL must be a base64-encoded image".to_string(),
                ));
            }
            data
        }
        None => image,
    };
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(payload)
        .map_err(|e| FaceServiceError::InvalidImage(e.to_string()))?;
    if bytes.is_empty() {
        return Err(FaceServiceError::InvalidImage("image is empty".to_string()));
    }
    Ok(bytes)
}

#[derive(Debug, Deserialize)]
struct ExtractResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    embedding: Option<Vec<f64>>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug)]
pub struct HttpFaceEmbedder {
    http: reqwest::Client,
    endpoint: String,
}

impl HttpFaceEmbedder {
    pub fn new(config: &FaceServiceConfig) -> Result<Self, FaceServiceError> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| FaceServiceError::Unavailable(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            http,
            endpoint: format!("{}/extract-face", config.url),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl FaceEmbedder for HttpFaceEmbedder {
    async fn embed(&self, image: &str) -> Result<Vec<f64>, FaceServiceError> {
        decode_image(image)?;

        let resp = self
            .http
            .post(&self.endpoint)
            .json(&json!({ "image": image.trim() }))
            .send()
            .await
            .map_err(|e| FaceServiceError::Unavailable(e.to_string()))?;

        let status = resp.status();
        if status.is_server_error() {
            return Err(FaceServiceError::Unavailable(format!("HTTP {}", status)));
        }
        let body: ExtractResponse = resp
            .json()
            .await
            .map_err(|e| FaceServiceError::InvalidResponse(e.to_string()))?;

        if !status.is_success() || !body.success {
            let message = body.message.unwrap_or_else(|| "face not detected".to_string());
            return Err(FaceServiceError::NoFace(message));
        }
        match body.embedding {
            Some(v) if !v.is_empty() && v.iter().all(|x| x.is_finite()) => Ok(v),
            _ => Err(FaceServiceError::InvalidResponse("missing or malformed embedding".to_string())),
        }
    }
}

/// Used when no face service is configured: every call fails with `Disabled`.
#[derive(Debug, Default)]
pub struct DisabledFaceEmbedder;

#[async_trait]
impl FaceEmbedder for DisabledFaceEmbedder {
    async fn embed(&self, _image: &str) -> Result<Vec<f64>, FaceServiceError> {
        Err(FaceServiceError::Disabled)
    }
}
