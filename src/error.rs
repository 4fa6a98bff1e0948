use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("Missing form field: {0}")]
    MissingField(&'static str),
    #[error("Invalid user_id: {0}")]
    InvalidUserId(String),
    #[error("Invalid file type. Only .jpg and .jpeg files are accepted, got `{0}`")]
    UnsupportedExtension(String),
    #[error("Invalid image file: {0}")]
    UndecodableImage(String),
    #[error("Malformed multipart request: {0}")]
    MalformedForm(String),
    #[error("Upload too large: {0}")]
    PayloadTooLarge(String),
}

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Missing credential token")]
    MissingToken,
    #[error("Invalid or expired token: {0}")]
    InvalidToken(String),
    #[error("Token does not belong to user {0}")]
    UserMismatch(String),
    #[error("Identity service unavailable: {0}")]
    Unavailable(String),
}

#[derive(Error, Debug)]
pub enum InferenceError {
    #[error("Preprocessing failed: {0}")]
    Preprocess(String),
    #[error("Model prediction failed: {0}")]
    Predict(String),
    #[error("Unexpected mask shape {0:?}")]
    UnexpectedShape(Vec<usize>),
    #[error("Image encoding failed: {0}")]
    Encode(#[from] image::ImageError),
    #[error("Inference task aborted: {0}")]
    TaskAborted(String),
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Upload of {key} failed: {reason}")]
    Upload { key: String, reason: String },
    #[error("Metadata write failed: {0}")]
    Metadata(String),
    #[error("{operation} timed out after {seconds}s")]
    Timeout { operation: &'static str, seconds: u64 },
}

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Inference(#[from] InferenceError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl PipelineError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            PipelineError::Validation(ValidationError::PayloadTooLarge(_)) => {
                StatusCode::PAYLOAD_TOO_LARGE
            }
            PipelineError::Validation(_) => StatusCode::BAD_REQUEST,
            PipelineError::Auth(AuthError::UserMismatch(_)) => StatusCode::FORBIDDEN,
            PipelineError::Auth(AuthError::Unavailable(_)) => StatusCode::INTERNAL_SERVER_ERROR,
            PipelineError::Auth(_) => StatusCode::UNAUTHORIZED,
            PipelineError::Inference(_) | PipelineError::Storage(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::Validation(_) => "validation_error",
            PipelineError::Auth(_) => "auth_error",
            PipelineError::Inference(_) => "inference_error",
            PipelineError::Storage(_) => "storage_error",
        }
    }
}

#[derive(Serialize)]
pub struct ErrorBody {
    pub detail: String,
}

impl IntoResponse for PipelineError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let detail = if status.is_server_error() {
            tracing::error!(kind = self.kind(), "Prediction failed: {}", self);
            format!("Internal Server Error: {}", self)
        } else {
            tracing::warn!(kind = self.kind(), "Prediction rejected: {}", self);
            self.to_string()
        };

        (status, Json(ErrorBody { detail })).into_response()
    }
}
