use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    Unauthorized,
    NotFound,
    Validation,
    UploadFailed,
    StorageFailed,
    Internal,
}

/// Why the blob store refused an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadFailure {
    InvalidFormat,
    TooLarge,
    Credentials,
    RateLimited,
    Upstream,
}

impl UploadFailure {
    pub fn user_message(self) -> &'static str {
        match self {
            Self::InvalidFormat => {
                "Invalid image file. Please upload a valid image (JPG, PNG, GIF, WEBP)"
            }
            Self::TooLarge => "Image file is too large. Maximum size is 10MB",
            Self::Credentials => "Image storage authentication failed. Check the server credentials",
            Self::RateLimited => "Image storage rate limit exceeded. Please try again later",
            Self::Upstream => "Failed to upload image",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiError {
    pub code: ErrorCode,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<UploadFailure>,
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            reason: None,
        }
    }

    pub fn upload(reason: UploadFailure) -> Self {
        Self {
            code: ErrorCode::UploadFailed,
            message: reason.user_message().to_string(),
            reason: Some(reason),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Validation, message)
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.code, self.message)
    }
}

impl std::error::Error for ApiError {}
