//! Image storage collaborator. Callers hand over a base64 data URI and get
//! back a durable URL; nothing else about the backing service leaks out.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use shared::error::UploadFailure;
use thiserror::Error;

mod cloudinary;

pub use cloudinary::{CloudinaryBlobStore, CloudinaryConfig};

pub const DEFAULT_MAX_IMAGE_BYTES: usize = 10 * 1024 * 1024;

const ACCEPTED_DATA_URI_PREFIXES: [&str; 2] = ["data:image/", "data:application/octet-stream"];

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("invalid image: {0}")]
    InvalidFormat(String),
    #[error("image is {size} bytes, limit is {limit}")]
    TooLarge { size: usize, limit: usize },
    #[error("blob store rejected credentials: {0}")]
    Credentials(String),
    #[error("blob store rate limit exceeded")]
    RateLimited,
    #[error("blob store upload failed: {0}")]
    Upstream(String),
}

impl UploadError {
    pub fn failure(&self) -> UploadFailure {
        match self {
            Self::InvalidFormat(_) => UploadFailure::InvalidFormat,
            Self::TooLarge { .. } => UploadFailure::TooLarge,
            Self::Credentials(_) => UploadFailure::Credentials,
            Self::RateLimited => UploadFailure::RateLimited,
            Self::Upstream(_) => UploadFailure::Upstream,
        }
    }
}

/// True when `value` looks like something [`ImageUpload::from_data_uri`] can accept.
pub fn is_image_data_uri(value: &str) -> bool {
    ACCEPTED_DATA_URI_PREFIXES
        .iter()
        .any(|prefix| value.starts_with(prefix))
}

/// A decoded image plus the data URI it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageUpload {
    pub mime_type: String,
    pub bytes: Vec<u8>,
    pub data_uri: String,
}

impl ImageUpload {
    pub fn from_data_uri(data_uri: &str, max_bytes: usize) -> Result<Self, UploadError> {
        if !is_image_data_uri(data_uri) {
            return Err(UploadError::InvalidFormat(
                "must be base64 encoded with data URI (data:image/...)".into(),
            ));
        }
        let rest = &data_uri["data:".len()..];
        let (header, payload) = rest
            .split_once(',')
            .ok_or_else(|| UploadError::InvalidFormat("data URI has no payload".into()))?;
        let mime_type = header
            .strip_suffix(";base64")
            .ok_or_else(|| UploadError::InvalidFormat("data URI is not base64 encoded".into()))?;

        // Size bound before decoding; base64 inflates by 4/3.
        let estimated = payload.len() / 4 * 3;
        if estimated > max_bytes.saturating_add(3) {
            return Err(UploadError::TooLarge {
                size: estimated,
                limit: max_bytes,
            });
        }
        let bytes = STANDARD
            .decode(payload.trim())
            .map_err(|err| UploadError::InvalidFormat(format!("invalid base64 payload: {err}")))?;
        if bytes.is_empty() {
            return Err(UploadError::InvalidFormat("image payload is empty".into()));
        }
        if bytes.len() > max_bytes {
            return Err(UploadError::TooLarge {
                size: bytes.len(),
                limit: max_bytes,
            });
        }

        Ok(Self {
            mime_type: mime_type.to_string(),
            bytes,
            data_uri: data_uri.to_string(),
        })
    }
}

#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Stores the image and returns a durable, publicly retrievable URL.
    async fn upload(&self, image: &ImageUpload) -> Result<String, UploadError>;

    fn max_image_bytes(&self) -> usize {
        DEFAULT_MAX_IMAGE_BYTES
    }
}

/// Stand-in used when no blob store credentials are configured.
pub struct MissingBlobStore;

#[async_trait]
impl BlobStore for MissingBlobStore {
    async fn upload(&self, _image: &ImageUpload) -> Result<String, UploadError> {
        Err(UploadError::Credentials(
            "blob store credentials are not configured".into(),
        ))
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
