//! 上传处理：流式限长写入暂存文件，再转交远端对象存储。

use axum::extract::multipart::MultipartRejection;
use axum::extract::{Extension, Multipart};
use axum::http::{HeaderMap, HeaderName, HeaderValue, header};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use futures_util::stream::{Stream, StreamExt};
use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::pin::pin;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tempfile::TempPath;
use thiserror::Error;
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::auth::AuthorizationFlow;
use crate::config::{MULTIPART_OVERHEAD_ALLOWANCE, UPLOAD_FIELD_NAME};
use crate::drive::{ObjectStore, ObjectStoreConnector, RemoteObjectId};
use crate::error::ApiError;

const STAGED_PREFIX: &str = "upload-";
const STAGED_SUFFIX: &str = ".tmp";

#[derive(Debug)]
pub struct UploadConfig {
    pub max_bytes: u64,
    pub staging_dir: PathBuf,
    pub staging_ttl: Duration,
}

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("upload exceeds {limit} bytes")]
    TooLarge { limit: u64 },
    #[error("malformed multipart form: {0}")]
    MalformedForm(String),
    #[error("form has no uploadfile field")]
    MissingFile,
    #[error("staging failed: {0}")]
    StagingFailed(#[source] std::io::Error),
    #[error("remote write failed: {0}")]
    RemoteWriteFailed(String),
}

/// 请求独占的暂存文件；drop 时删除，无论请求成功、失败还是被取消。
#[derive(Debug)]
pub struct StagedFile {
    path: TempPath,
    original_name: String,
    size: u64,
}

impl StagedFile {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn original_name(&self) -> &str {
        &self.original_name
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// 服务端生成的暂存名，远端对象以此命名。
    pub fn staged_name(&self) -> String {
        self.path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload".into())
    }
}

/// 将字节流写入暂存目录，超过 `max_bytes` 的分块在写入前即被拒绝。
pub async fn receive<S, E>(
    stream: S,
    declared_name: &str,
    config: &UploadConfig,
) -> Result<StagedFile, UploadError>
where
    S: Stream<Item = Result<Bytes, E>>,
    E: Display,
{
    fs::create_dir_all(&config.staging_dir)
        .await
        .map_err(UploadError::StagingFailed)?;
    let (std_file, path) = tempfile::Builder::new()
        .prefix(STAGED_PREFIX)
        .suffix(STAGED_SUFFIX)
        .tempfile_in(&config.staging_dir)
        .map_err(UploadError::StagingFailed)?
        .into_parts();
    let mut file = File::from_std(std_file);

    let mut stream = pin!(stream);
    let mut written: u64 = 0;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|err| UploadError::MalformedForm(err.to_string()))?;
        if chunk.is_empty() {
            continue;
        }
        written += chunk.len() as u64;
        if written > config.max_bytes {
            return Err(UploadError::TooLarge {
                limit: config.max_bytes,
            });
        }
        file.write_all(&chunk)
            .await
            .map_err(UploadError::StagingFailed)?;
    }
    file.flush().await.map_err(UploadError::StagingFailed)?;
    drop(file);

    debug!(path = ?path, bytes = written, "upload staged");
    Ok(StagedFile {
        path,
        original_name: display_name(declared_name),
        size: written,
    })
}

/// 打开暂存文件并以暂存名写入远端。
pub async fn forward(
    staged: &StagedFile,
    store: &dyn ObjectStore,
) -> Result<RemoteObjectId, UploadError> {
    let file = File::open(staged.path())
        .await
        .map_err(UploadError::StagingFailed)?;
    let metadata = file.metadata().await.map_err(UploadError::StagingFailed)?;
    store
        .create(&staged.staged_name(), file, metadata.len())
        .await
        .map_err(|err| UploadError::RemoteWriteFailed(err.to_string()))
}

/// 接收 multipart 上传并转存到远端。
pub async fn upload_file(
    Extension(flow): Extension<Arc<AuthorizationFlow>>,
    Extension(connector): Extension<Arc<dyn ObjectStoreConnector>>,
    Extension(upload): Extension<Arc<UploadConfig>>,
    headers: HeaderMap,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Response, ApiError> {
    if !flow.status().await {
        return Err(ApiError::Unauthorized(
            "Not authorized. Please authorize the application first.".into(),
        ));
    }
    check_declared_length(&headers, upload.max_bytes)?;
    let credential = flow.active_credential().await?;
    let store = connector.connect(&credential);

    let mut multipart =
        multipart.map_err(|rejection| UploadError::MalformedForm(rejection.body_text()))?;
    let staged = loop {
        let field = multipart
            .next_field()
            .await
            .map_err(|err| UploadError::MalformedForm(err.body_text()))?
            .ok_or(UploadError::MissingFile)?;
        if field.name() != Some(UPLOAD_FIELD_NAME) {
            continue;
        }
        let declared_name = field.file_name().unwrap_or_default().to_string();
        break receive(field, &declared_name, &upload).await?;
    };

    let file_id = forward(&staged, store.as_ref()).await?;
    info!(
        name = staged.original_name(),
        staged = staged.staged_name(),
        bytes = staged.size(),
        file_id = %file_id,
        "upload forwarded"
    );

    let mut response_headers = HeaderMap::new();
    response_headers.insert(
        HeaderName::from_static("x-file-id"),
        HeaderValue::from_str(&file_id.0)
            .map_err(|_| ApiError::Internal("invalid file id".into()))?,
    );
    let message = format!("Successfully Uploaded File: {}", staged.original_name());
    Ok((response_headers, message).into_response())
}

/// 请求声明的长度已超过上限（含 multipart 开销）时直接拒绝。
fn check_declared_length(headers: &HeaderMap, max_bytes: u64) -> Result<(), UploadError> {
    let declared = headers
        .get(header::CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<u64>().ok());
    match declared {
        Some(length) if length > max_bytes.saturating_add(MULTIPART_OVERHEAD_ALLOWANCE) => {
            Err(UploadError::TooLarge { limit: max_bytes })
        }
        _ => Ok(()),
    }
}

fn display_name(declared: &str) -> String {
    let base = declared.rsplit(['/', '\\']).next().unwrap_or_default().trim();
    if base.is_empty() {
        "upload".into()
    } else {
        base.to_string()
    }
}

/// 清理暂存目录中遗留的暂存文件（例如进程崩溃残留）。
pub async fn sweep_staging_dir(dir: &Path, min_age: Duration) -> std::io::Result<usize> {
    if fs::metadata(dir).await.is_err() {
        return Ok(0);
    }

    let now = SystemTime::now();
    let mut removed = 0;
    let mut entries = fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if !name.starts_with(STAGED_PREFIX) || !name.ends_with(STAGED_SUFFIX) {
            continue;
        }
        let metadata = entry.metadata().await?;
        if !metadata.is_file() {
            continue;
        }
        let age = metadata
            .modified()
            .ok()
            .and_then(|modified| now.duration_since(modified).ok())
            .unwrap_or_default();
        if age < min_age {
            continue;
        }
        let path = entry.path();
        match fs::remove_file(&path).await {
            Ok(()) => {
                removed += 1;
                info!(path = ?path, "removed orphaned staged file");
            }
            Err(err) => warn!(path = ?path, error = %err, "failed to remove staged file"),
        }
    }
    Ok(removed)
}
