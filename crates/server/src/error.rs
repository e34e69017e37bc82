use axum::{http::StatusCode, Json};
use shared::error::{ApiError, ErrorCode, UploadFailure};

pub(crate) type HttpError = (StatusCode, Json<ApiError>);

pub(crate) fn status_for(err: &ApiError) -> StatusCode {
    match err.code {
        ErrorCode::Validation => StatusCode::BAD_REQUEST,
        ErrorCode::Unauthorized => StatusCode::UNAUTHORIZED,
        ErrorCode::NotFound => StatusCode::NOT_FOUND,
        ErrorCode::UploadFailed => match err.reason {
            Some(UploadFailure::InvalidFormat) => StatusCode::UNPROCESSABLE_ENTITY,
            Some(UploadFailure::TooLarge) => StatusCode::PAYLOAD_TOO_LARGE,
            Some(UploadFailure::RateLimited) => StatusCode::SERVICE_UNAVAILABLE,
            Some(UploadFailure::Credentials) | Some(UploadFailure::Upstream) | None => {
                StatusCode::BAD_GATEWAY
            }
        },
        ErrorCode::StorageFailed | ErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub(crate) fn http_error(err: ApiError) -> HttpError {
    (status_for(&err), Json(err))
}
