//! 统一的 API 错误类型与转换；领域错误只在此处映射为状态码。

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use tracing::{error, warn};

use crate::auth::{AuthError, Unauthenticated};
use crate::config::ConfigError;
use crate::credential::PersistenceError;
use crate::upload::UploadError;

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Unauthorized(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg).into_response(),
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg).into_response(),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg).into_response(),
        }
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::InvalidState => {
                warn!("oauth callback with invalid state");
                ApiError::BadRequest("Invalid state parameter".into())
            }
            AuthError::MissingCode => ApiError::BadRequest("Missing authorization code".into()),
            AuthError::ExchangeFailed(err) => {
                error!(error = %err, "token exchange failed");
                ApiError::Internal("Unable to retrieve token from web".into())
            }
        }
    }
}

impl From<Unauthenticated> for ApiError {
    fn from(err: Unauthenticated) -> Self {
        warn!(reason = %err, "upload rejected");
        ApiError::Unauthorized("Not authorized. Please authorize the application first.".into())
    }
}

impl From<UploadError> for ApiError {
    fn from(err: UploadError) -> Self {
        match err {
            UploadError::TooLarge { limit } => {
                warn!(limit, "upload too large");
                ApiError::BadRequest("File too large".into())
            }
            UploadError::MalformedForm(detail) => {
                warn!(detail, "malformed upload form");
                ApiError::BadRequest("Malformed upload form".into())
            }
            UploadError::MissingFile => ApiError::BadRequest("Missing uploadfile field".into()),
            UploadError::StagingFailed(err) => {
                error!(error = %err, "staging upload failed");
                ApiError::Internal("Unable to stage upload".into())
            }
            UploadError::RemoteWriteFailed(detail) => {
                error!(detail, "remote write failed");
                ApiError::Internal("Failed to upload file to Google Drive".into())
            }
        }
    }
}

/// 启动阶段的致命错误，由入口函数决定是否退出。
#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
    #[error("invalid bind address {0}")]
    InvalidHost(String),
    #[error("unable to build http client: {0}")]
    HttpClient(#[from] reqwest::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
