use axum::{
    extract::{
        multipart::{MultipartError, MultipartRejection},
        rejection::JsonRejection,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tracing::error;

use crate::{model::ModelError, ocr::OcrError, recipe::RecipeError};

/// Errors surfaced by the HTTP handlers.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{}", .0.body_text())]
    Multipart(#[from] MultipartError),
    #[error("{}", .0.body_text())]
    MultipartRejection(#[from] MultipartRejection),
    #[error("{}", .0.body_text())]
    JsonRejection(#[from] JsonRejection),
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error(transparent)]
    Ocr(#[from] OcrError),
    #[error(transparent)]
    Recipe(#[from] RecipeError),
    #[error("recipe suggestions are not configured")]
    RecipeUnavailable,
}

impl AppError {
    fn status(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_) | AppError::Model(ModelError::Image(_)) => {
                StatusCode::BAD_REQUEST
            }
            AppError::Multipart(err) => err.status(),
            AppError::MultipartRejection(err) => err.status(),
            AppError::JsonRejection(err) => err.status(),
            AppError::RecipeUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Recipe(_) => StatusCode::BAD_GATEWAY,
            AppError::Model(_) | AppError::Ocr(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(error = %self, "request failed");
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}
