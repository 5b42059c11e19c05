use crate::services::store::StoreError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use std::fmt::Display;

/// One rejected query parameter.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, utoipa::ToSchema)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DashboardError {
    #[error("invalid query parameters: {}", join_fields(.0))]
    InvalidParameters(Vec<FieldError>),
    #[error("site {0} is not registered")]
    UnknownSite(String),
    #[error("no forecast model registered for {0}")]
    ModelNotFound(String),
    #[error("failed to load model {model_id}: {message}")]
    ModelLoad { model_id: String, message: String },
    #[error("inference failed: {0}")]
    Inference(String),
    #[error("request cancelled")]
    Cancelled,
    #[error(transparent)]
    Store(#[from] StoreError),
}

fn join_fields(fields: &[FieldError]) -> String {
    fields
        .iter()
        .map(|err| format!("{}: {}", err.field, err.message))
        .collect::<Vec<_>>()
        .join("; ")
}

impl DashboardError {
    pub fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidParameters(vec![FieldError::new(field, message)])
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::InvalidParameters(_) => StatusCode::BAD_REQUEST,
            Self::UnknownSite(_) | Self::ModelNotFound(_) => StatusCode::NOT_FOUND,
            Self::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
            Self::ModelLoad { .. } | Self::Inference(_) | Self::Store(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

#[derive(Debug, Clone, serde::Serialize, utoipa::ToSchema)]
pub struct ErrorBody {
    pub error: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<FieldError>,
}

impl IntoResponse for DashboardError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match self {
            Self::InvalidParameters(fields) => ErrorBody {
                error: "Invalid request".to_string(),
                fields,
            },
            Self::UnknownSite(_) | Self::ModelNotFound(_) | Self::Cancelled => ErrorBody {
                error: self.to_string(),
                fields: Vec::new(),
            },
            Self::ModelLoad { .. } | Self::Inference(_) | Self::Store(_) => {
                let (_, message) = internal_error(&self);
                ErrorBody {
                    error: message,
                    fields: Vec::new(),
                }
            }
        };
        (status, Json(body)).into_response()
    }
}

pub type DashboardResult<T> = Result<T, DashboardError>;

pub fn internal_error(err: impl Display) -> (StatusCode, String) {
    tracing::error!(error = %err, "internal error");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        "Internal server error".to_string(),
    )
}
