//! 命令行参数、默认值与 OAuth 客户端密钥文件解析。

use clap::Parser;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const DEFAULT_PORT: u16 = 8081;
pub const DEFAULT_MAX_UPLOAD_SIZE: u64 = 50 * 1024 * 1024;
pub const DEFAULT_STAGING_DIR: &str = "./tmp";
pub const DEFAULT_TOKEN_FILE: &str = "token.json";
pub const DEFAULT_CREDENTIALS_FILE: &str = "credentials.json";
pub const DEFAULT_REDIRECT_URL: &str = "http://localhost:8081/oauth2callback";
pub const DEFAULT_STATE_TOKEN: &str = "state-token";
pub const DEFAULT_REMOTE_TIMEOUT_SECS: u64 = 300;
pub const DEFAULT_STAGING_TTL_SECS: u64 = 60 * 60;
pub const OAUTH_TIMEOUT_SECS: u64 = 30;
pub const STAGING_SWEEP_INTERVAL_SECS: u64 = 900;
/// multipart 边界与字段头允许的额外字节数。
pub const MULTIPART_OVERHEAD_ALLOWANCE: u64 = 64 * 1024;
pub const UPLOAD_FIELD_NAME: &str = "uploadfile";
pub const DRIVE_FILE_SCOPE: &str = "https://www.googleapis.com/auth/drive.file";

/// 服务器的命令行参数与环境变量配置。
#[derive(Parser, Debug, Clone)]
#[command(name = "drive-relay", version, about = "Google Drive upload relay")]
pub struct Args {
    #[arg(
        long,
        env = "DRIVE_RELAY_CREDENTIALS_FILE",
        default_value = DEFAULT_CREDENTIALS_FILE,
        help = "OAuth client secret file downloaded from the Google console"
    )]
    pub credentials_file: PathBuf,
    #[arg(
        long,
        env = "DRIVE_RELAY_TOKEN_FILE",
        default_value = DEFAULT_TOKEN_FILE,
        help = "Where the delegated credential is persisted"
    )]
    pub token_file: PathBuf,
    #[arg(
        long,
        env = "DRIVE_RELAY_REDIRECT_URL",
        default_value = DEFAULT_REDIRECT_URL,
        help = "OAuth redirect URL registered with the provider"
    )]
    pub redirect_url: String,
    #[arg(
        short = 'b',
        long,
        env = "DRIVE_RELAY_BIND",
        default_value = "0.0.0.0",
        help = "Bind address"
    )]
    pub host: String,
    #[arg(
        short = 'p',
        long,
        env = "DRIVE_RELAY_PORT",
        default_value_t = DEFAULT_PORT,
        help = "HTTP port"
    )]
    pub port: u16,
    #[arg(
        short = 's',
        long,
        env = "DRIVE_RELAY_STAGING_DIR",
        default_value = DEFAULT_STAGING_DIR,
        help = "Directory for staged uploads"
    )]
    pub staging_dir: PathBuf,
    #[arg(
        long,
        env = "DRIVE_RELAY_INDEX_FILE",
        default_value = "index.html",
        help = "Static client page served at /"
    )]
    pub index_file: PathBuf,
    #[arg(
        long,
        env = "DRIVE_RELAY_MAX_UPLOAD_SIZE",
        default_value_t = DEFAULT_MAX_UPLOAD_SIZE,
        help = "Max accepted upload size in bytes"
    )]
    pub max_upload_size: u64,
    #[arg(
        long,
        env = "DRIVE_RELAY_STATE_TOKEN",
        default_value = DEFAULT_STATE_TOKEN,
        help = "Anti-forgery state token embedded in the consent URL"
    )]
    pub state_token: String,
    #[arg(
        long,
        env = "DRIVE_RELAY_REMOTE_TIMEOUT_SECS",
        default_value_t = DEFAULT_REMOTE_TIMEOUT_SECS,
        help = "Timeout for a single upload to the object store"
    )]
    pub remote_timeout_secs: u64,
    #[arg(
        long,
        env = "DRIVE_RELAY_STAGING_TTL_SECS",
        default_value_t = DEFAULT_STAGING_TTL_SECS,
        help = "Age after which orphaned staged files are removed (0 to disable)"
    )]
    pub staging_ttl_secs: u64,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unable to read client secret file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("unable to parse client secret file: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("client secret file has neither a \"web\" nor an \"installed\" section")]
    MissingClient,
    #[error("invalid {field} url: {source}")]
    InvalidUrl {
        field: &'static str,
        #[source]
        source: url::ParseError,
    },
}

/// OAuth 客户端配置（来自 Google 控制台导出的密钥文件）。
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub client_id: String,
    pub client_secret: String,
    pub auth_uri: url::Url,
    pub token_uri: url::Url,
    pub redirect_url: url::Url,
}

#[derive(Deserialize)]
struct ClientSecretFile {
    web: Option<ClientSecret>,
    installed: Option<ClientSecret>,
}

#[derive(Deserialize)]
struct ClientSecret {
    client_id: String,
    client_secret: String,
    #[serde(default = "default_auth_uri")]
    auth_uri: String,
    #[serde(default = "default_token_uri")]
    token_uri: String,
}

fn default_auth_uri() -> String {
    "https://accounts.google.com/o/oauth2/auth".into()
}

fn default_token_uri() -> String {
    "https://oauth2.googleapis.com/token".into()
}

impl ProviderConfig {
    /// 读取密钥文件，并用 `redirect_url` 覆盖其中的回调地址。
    pub fn from_file(path: &Path, redirect_url: &str) -> Result<Self, ConfigError> {
        let bytes = std::fs::read(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&bytes, redirect_url)
    }

    pub fn from_json(bytes: &[u8], redirect_url: &str) -> Result<Self, ConfigError> {
        let file: ClientSecretFile = serde_json::from_slice(bytes)?;
        let secret = file
            .web
            .or(file.installed)
            .ok_or(ConfigError::MissingClient)?;
        let parse = |field: &'static str, value: &str| {
            url::Url::parse(value).map_err(|source| ConfigError::InvalidUrl { field, source })
        };
        Ok(Self {
            auth_uri: parse("auth_uri", &secret.auth_uri)?,
            token_uri: parse("token_uri", &secret.token_uri)?,
            redirect_url: parse("redirect", redirect_url)?,
            client_id: secret.client_id,
            client_secret: secret.client_secret,
        })
    }
}
