use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::{BlobStore, ImageUpload, UploadError, DEFAULT_MAX_IMAGE_BYTES};

const ALLOWED_FORMATS: &str = "jpg,png,jpeg,gif,webp";
const TRANSFORMATION: &str = "c_limit,h_800,q_auto,w_800";

#[derive(Debug, Clone)]
pub struct CloudinaryConfig {
    pub api_base: String,
    pub cloud_name: String,
    pub api_key: String,
    pub api_secret: String,
    pub folder: String,
    pub max_image_bytes: usize,
}

impl CloudinaryConfig {
    pub fn new(
        cloud_name: impl Into<String>,
        api_key: impl Into<String>,
        api_secret: impl Into<String>,
    ) -> Self {
        Self {
            api_base: "https://api.cloudinary.com".into(),
            cloud_name: cloud_name.into(),
            api_key: api_key.into(),
            api_secret: api_secret.into(),
            folder: "chat_images".into(),
            max_image_bytes: DEFAULT_MAX_IMAGE_BYTES,
        }
    }

    fn upload_url(&self) -> String {
        format!(
            "{}/v1_1/{}/image/upload",
            self.api_base.trim_end_matches('/'),
            self.cloud_name
        )
    }
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    secure_url: String,
    #[serde(default)]
    format: Option<String>,
    #[serde(default)]
    bytes: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

/// Signed uploads against the Cloudinary image API.
pub struct CloudinaryBlobStore {
    http: Client,
    config: CloudinaryConfig,
}

impl CloudinaryBlobStore {
    pub fn new(config: CloudinaryConfig) -> Self {
        Self {
            http: Client::new(),
            config,
        }
    }

    fn signed_params(&self, timestamp: i64) -> Vec<(&'static str, String)> {
        // Alphabetical order; the signature covers exactly these.
        let mut params = vec![
            ("allowed_formats", ALLOWED_FORMATS.to_string()),
            ("folder", self.config.folder.clone()),
            ("timestamp", timestamp.to_string()),
            ("transformation", TRANSFORMATION.to_string()),
        ];
        let signature = sign(&params, &self.config.api_secret);
        params.push(("api_key", self.config.api_key.clone()));
        params.push(("signature_algorithm", "sha256".to_string()));
        params.push(("signature", signature));
        params
    }
}

pub(crate) fn sign(params: &[(&str, String)], api_secret: &str) -> String {
    let joined = params
        .iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect::<Vec<_>>()
        .join("&");
    let digest = Sha256::digest(format!("{joined}{api_secret}").as_bytes());
    digest.iter().map(|byte| format!("{byte:02x}")).collect()
}

pub(crate) fn classify_failure(status: StatusCode, message: &str) -> UploadError {
    if message.contains("Invalid image file") {
        return UploadError::InvalidFormat(message.to_string());
    }
    if message.contains("File size too large") {
        return UploadError::TooLarge {
            size: 0,
            limit: DEFAULT_MAX_IMAGE_BYTES,
        };
    }
    match status.as_u16() {
        401 | 403 => UploadError::Credentials(message.to_string()),
        420 | 429 => UploadError::RateLimited,
        _ => UploadError::Upstream(format!("{status}: {message}")),
    }
}

#[async_trait]
impl BlobStore for CloudinaryBlobStore {
    async fn upload(&self, image: &ImageUpload) -> Result<String, UploadError> {
        if self.config.cloud_name.is_empty()
            || self.config.api_key.is_empty()
            || self.config.api_secret.is_empty()
        {
            return Err(UploadError::Credentials(
                "cloud name, api key and api secret are required".into(),
            ));
        }
        if image.bytes.len() > self.config.max_image_bytes {
            return Err(UploadError::TooLarge {
                size: image.bytes.len(),
                limit: self.config.max_image_bytes,
            });
        }

        let mut form = self.signed_params(Utc::now().timestamp());
        form.push(("file", image.data_uri.clone()));

        let response = self
            .http
            .post(self.config.upload_url())
            .form(&form)
            .send()
            .await
            .map_err(|err| UploadError::Upstream(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ErrorResponse>(&body)
                .map(|parsed| parsed.error.message)
                .unwrap_or(body);
            let err = classify_failure(status, &message);
            warn!(%status, error = %err, "image upload rejected");
            return Err(err);
        }

        let uploaded: UploadResponse = response
            .json()
            .await
            .map_err(|err| UploadError::Upstream(format!("malformed upload response: {err}")))?;
        info!(
            url = %uploaded.secure_url,
            format = uploaded.format.as_deref().unwrap_or("unknown"),
            bytes = uploaded.bytes.unwrap_or_default(),
            "image uploaded"
        );
        Ok(uploaded.secure_url)
    }

    fn max_image_bytes(&self) -> usize {
        self.config.max_image_bytes
    }
}
