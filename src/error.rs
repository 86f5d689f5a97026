use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::time::Duration;
use thiserror::Error;

use crate::config::TaskType;

/// Failures raised while loading or running a model.
#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Model not found at path: {0}")]
    ModelNotFound(String),

    #[error("Tokenizer not found at path: {0}")]
    TokenizerNotFound(String),

    #[error("ONNX Runtime error: {0}")]
    Runtime(String),

    #[error("Tokenizer error: {0}")]
    Tokenizer(String),

    #[error("Unsupported model signature: {0}")]
    Unsupported(String),

    #[error("Inference backend unavailable: {0}")]
    BackendDisabled(String),

    #[error("Inference failed: {0}")]
    Inference(String),
}

/// Errors surfaced at the HTTP boundary.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),

    #[error("{0} model not available")]
    Unavailable(TaskType),

    #[error("rate limit exceeded: {limit}")]
    RateLimited { limit: String, retry_after: Duration },

    #[error("prediction failed: {0}")]
    Inference(#[from] ModelError),

    #[error("prediction timed out after {0:?}")]
    Timeout(Duration),

    #[error("model reload failed: {0}")]
    Reload(String),
}

impl ApiError {
    pub fn validation(msg: impl Into<String>) -> Self {
        ApiError::Validation(msg.into())
    }

    /// Label used for the `predict_errors_total` metric.
    pub fn kind(&self) -> &'static str {
        match self {
            ApiError::Validation(_) => "validation",
            ApiError::Unavailable(_) => "unavailable",
            ApiError::RateLimited { .. } => "rate_limited",
            ApiError::Inference(_) => "inference",
            ApiError::Timeout(_) => "timeout",
            ApiError::Reload(_) => "reload",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Inference(_) | ApiError::Reload(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();

        // Internal failure details stay in the server log.
        let error_message = match &self {
            ApiError::Inference(err) => {
                tracing::error!(error = %err, "Prediction failed");
                "prediction failed".to_string()
            }
            ApiError::Reload(err) => {
                tracing::error!(error = %err, "Model reload failed");
                "model reload failed".to_string()
            }
            ApiError::Timeout(after) => {
                tracing::warn!(?after, "Prediction timed out");
                "prediction timed out".to_string()
            }
            _ => self.to_string(),
        };

        let body = Json(json!({
            "error": error_message
        }));

        let mut response = (status, body).into_response();
        if let ApiError::RateLimited { retry_after, .. } = &self {
            // Round up so clients never retry before the window resets.
            let secs = retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0);
            if let Ok(value) = HeaderValue::from_str(&secs.max(1).to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}
