//! 远端对象存储：`ObjectStore` 抽象与 Google Drive v3 实现。

use async_trait::async_trait;
use reqwest::{Body, Client, StatusCode, header};
use serde::Deserialize;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio::fs::File;
use tokio_util::io::ReaderStream;
use tracing::debug;

use crate::credential::Credential;

pub const DRIVE_UPLOAD_URL: &str = "https://www.googleapis.com/upload/drive/v3/files";

/// 远端返回的不透明对象 ID。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteObjectId(pub String);

impl fmt::Display for RemoteObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("object store returned {status}: {body}")]
    Status { status: StatusCode, body: String },
    #[error("missing upload session location")]
    MissingLocation,
}

/// 按名称写入字节流并返回对象 ID。
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn create(
        &self,
        name: &str,
        content: File,
        size: u64,
    ) -> Result<RemoteObjectId, RemoteError>;
}

/// 由当前凭据构造已认证的对象存储客户端（每个请求一次）。
pub trait ObjectStoreConnector: Send + Sync {
    fn connect(&self, credential: &Credential) -> Arc<dyn ObjectStore>;
}

pub struct DriveConnector {
    http: Client,
    upload_url: String,
}

impl DriveConnector {
    pub fn new(http: Client) -> Self {
        Self {
            http,
            upload_url: DRIVE_UPLOAD_URL.to_string(),
        }
    }

    #[cfg(test)]
    fn with_upload_url(http: Client, upload_url: String) -> Self {
        Self { http, upload_url }
    }
}

impl ObjectStoreConnector for DriveConnector {
    fn connect(&self, credential: &Credential) -> Arc<dyn ObjectStore> {
        Arc::new(DriveObjectStore {
            http: self.http.clone(),
            upload_url: self.upload_url.clone(),
            authorization: credential.authorization_header(),
        })
    }
}

pub struct DriveObjectStore {
    http: Client,
    upload_url: String,
    authorization: String,
}

#[derive(Deserialize)]
struct DriveFile {
    id: String,
}

impl DriveObjectStore {
    /// 创建 resumable 上传会话，返回上传地址。
    async fn start_session(&self, name: &str, size: u64) -> Result<String, RemoteError> {
        let response = self
            .http
            .post(&self.upload_url)
            .query(&[("uploadType", "resumable")])
            .header(header::AUTHORIZATION, &self.authorization)
            .header("X-Upload-Content-Length", size.to_string())
            .json(&serde_json::json!({ "name": name }))
            .send()
            .await?;
        let response = check_status(response).await?;
        response
            .headers()
            .get(header::LOCATION)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
            .ok_or(RemoteError::MissingLocation)
    }
}

#[async_trait]
impl ObjectStore for DriveObjectStore {
    async fn create(
        &self,
        name: &str,
        content: File,
        size: u64,
    ) -> Result<RemoteObjectId, RemoteError> {
        let session = self.start_session(name, size).await?;
        debug!(name, size, "drive upload session started");

        let response = self
            .http
            .put(&session)
            .header(header::CONTENT_LENGTH, size)
            .body(Body::wrap_stream(ReaderStream::new(content)))
            .send()
            .await?;
        let file: DriveFile = check_status(response).await?.json().await?;
        Ok(RemoteObjectId(file.id))
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, RemoteError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(RemoteError::Status { status, body })
}
