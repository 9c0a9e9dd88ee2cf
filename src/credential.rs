//! 委托凭据的持久化：单一 JSON 文件，写入采用临时文件 + rename。

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tracing::{debug, info};

use crate::atomic::write_atomic;

/// 距离过期不足该秒数即视为已过期。
const EXPIRY_SKEW_SECS: i64 = 60;

/// OAuth 访问/刷新令牌及其元数据。
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry: Option<DateTime<Utc>>,
    #[serde(default = "default_token_type")]
    pub token_type: String,
}

fn default_token_type() -> String {
    "Bearer".into()
}

impl Credential {
    /// 没有过期时间的凭据永不过期。
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        match self.expiry {
            Some(expiry) => expiry <= now + Duration::seconds(EXPIRY_SKEW_SECS),
            None => false,
        }
    }

    pub fn authorization_header(&self) -> String {
        format!("{} {}", self.token_type, self.access_token)
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("access_token", &"<redacted>")
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "<redacted>"),
            )
            .field("expiry", &self.expiry)
            .field("token_type", &self.token_type)
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("unable to read credential file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("credential file {path} is corrupt: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("unable to write credential file {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("unable to serialize credential: {0}")]
    Serialize(#[source] serde_json::Error),
}

/// 位于固定路径的单一凭据存储。
#[derive(Debug, Clone)]
pub struct CredentialStore {
    path: PathBuf,
}

impl CredentialStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 启动时的存在性检查。
    pub async fn exists(&self) -> bool {
        fs::metadata(&self.path).await.is_ok()
    }

    /// 读取凭据；文件不存在返回 `Ok(None)`（从未授权）。
    pub async fn load(&self) -> Result<Option<Credential>, PersistenceError> {
        let bytes = match fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(PersistenceError::Read {
                    path: self.path.clone(),
                    source,
                });
            }
        };
        let credential = serde_json::from_slice(&bytes).map_err(|source| PersistenceError::Parse {
            path: self.path.clone(),
            source,
        })?;
        debug!(path = ?self.path, "credential loaded");
        Ok(Some(credential))
    }

    /// 原子覆盖凭据文件，读者不会看到写了一半的内容。
    pub async fn save(&self, credential: &Credential) -> Result<(), PersistenceError> {
        let bytes = serde_json::to_vec_pretty(credential).map_err(PersistenceError::Serialize)?;
        write_atomic(&self.path, &bytes)
            .await
            .map_err(|source| PersistenceError::Write {
                path: self.path.clone(),
                source,
            })?;
        info!(path = ?self.path, "credential saved");
        Ok(())
    }

    /// 启动时确认存储位置可写。
    pub async fn ensure_writable(&self) -> Result<(), PersistenceError> {
        let probe = self.path.with_file_name(format!(
            ".{}.probe",
            self.path
                .file_name()
                .map(|name| name.to_string_lossy())
                .unwrap_or_else(|| "credential".into())
        ));
        write_atomic(&probe, b"{}")
            .await
            .map_err(|source| PersistenceError::Write {
                path: self.path.clone(),
                source,
            })?;
        let _ = fs::remove_file(&probe).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_credential() -> Credential {
        Credential {
            access_token: "access".into(),
            refresh_token: Some("refresh".into()),
            expiry: Some(Utc::now() + Duration::hours(1)),
            token_type: "Bearer".into(),
        }
    }

    #[tokio::test]
    async fn load_missing_file_is_none() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = CredentialStore::new(temp.path().join("token.json"));
        assert!(store.load().await.expect("load").is_none());
        assert!(!store.exists().await);
    }

    #[tokio::test]
    async fn saved_credential_reloads_equal() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = CredentialStore::new(temp.path().join("nested").join("token.json"));
        let credential = sample_credential();
        store.save(&credential).await.expect("save");

        let reopened = CredentialStore::new(store.path().to_path_buf());
        assert_eq!(reopened.load().await.expect("load"), Some(credential));
    }

    #[tokio::test]
    async fn corrupt_file_is_parse_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("token.json");
        std::fs::write(&path, b"{not json").expect("write");
        let result = CredentialStore::new(path).load().await;
        assert!(matches!(result, Err(PersistenceError::Parse { .. })));
    }

    #[tokio::test]
    async fn ensure_writable_leaves_no_probe() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = CredentialStore::new(temp.path().join("token.json"));
        store.ensure_writable().await.expect("writable");
        let count = std::fs::read_dir(temp.path()).expect("read dir").count();
        assert_eq!(count, 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn ensure_writable_fails_on_read_only_dir() {
        use std::os::unix::fs::PermissionsExt;

        let temp = tempfile::tempdir().expect("tempdir");
        let locked = temp.path().join("locked");
        std::fs::create_dir(&locked).expect("mkdir");
        std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o500))
            .expect("chmod");
        // root 不受目录权限限制
        if std::fs::write(locked.join("x"), b"x").is_ok() {
            return;
        }

        let store = CredentialStore::new(locked.join("token.json"));
        let result = store.ensure_writable().await;
        std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o700))
            .expect("chmod back");
        assert!(matches!(result, Err(PersistenceError::Write { .. })));
    }

    #[test]
    fn expiry_uses_skew_window() {
        let mut credential = sample_credential();
        credential.expiry = Some(Utc::now() + Duration::seconds(30));
        assert!(credential.is_expired());
        credential.expiry = None;
        assert!(!credential.is_expired());
    }

    #[test]
    fn debug_output_redacts_tokens() {
        let rendered = format!("{:?}", sample_credential());
        assert!(!rendered.contains("access\""));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn token_type_defaults_to_bearer() {
        let credential: Credential =
            serde_json::from_str(r#"{"access_token":"a"}"#).expect("parse");
        assert_eq!(credential.authorization_header(), "Bearer a");
    }
}
