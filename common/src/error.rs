use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use std::io;

#[derive(thiserror::Error, Debug)]
pub enum ApiError {
    #[error("not found: unknown node")]
    NodeNotFound,
    #[error("not found: unknown mount")]
    MountNotFound,
    #[error("not found: unknown migration job")]
    JobNotFound,
    #[error("validation: {0}")]
    Validation(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("invalid or expired transfer token")]
    InvalidToken,
    #[error("peer unreachable: {0}")]
    ProxyUnreachable(String),
    #[error("upstream request failed: {0}")]
    UpstreamReq(#[source] reqwest::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Any(#[from] anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status_code = match self {
            ApiError::NodeNotFound => StatusCode::NOT_FOUND,
            ApiError::MountNotFound => StatusCode::NOT_FOUND,
            ApiError::JobNotFound => StatusCode::NOT_FOUND,
            ApiError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::InvalidToken => StatusCode::UNAUTHORIZED,
            ApiError::ProxyUnreachable(_) => StatusCode::BAD_GATEWAY,
            ApiError::UpstreamReq(_) => StatusCode::BAD_GATEWAY,
            ApiError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Any(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        (status_code, self.to_string()).into_response()
    }
}
