//! 启动装配：读取配置、校验凭据存储、构造共享状态。

use reqwest::Client;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::auth::AuthorizationFlow;
use crate::config::{Args, OAUTH_TIMEOUT_SECS, ProviderConfig};
use crate::credential::CredentialStore;
use crate::drive::{DriveConnector, ObjectStoreConnector};
use crate::error::StartupError;
use crate::oauth::GoogleOAuth;
use crate::upload::UploadConfig;

/// 各处理器共享的状态，经 `Extension` 注入。
pub struct AppState {
    pub flow: Arc<AuthorizationFlow>,
    pub connector: Arc<dyn ObjectStoreConnector>,
    pub upload: Arc<UploadConfig>,
    pub index_file: PathBuf,
}

impl AppState {
    /// 任何一步失败都阻止服务启动。
    pub async fn initialize(args: &Args) -> Result<Self, StartupError> {
        let provider_config = ProviderConfig::from_file(&args.credentials_file, &args.redirect_url)?;
        info!(
            credentials = ?args.credentials_file,
            redirect_url = %provider_config.redirect_url,
            "oauth client configuration loaded"
        );

        let oauth_http = Client::builder()
            .timeout(Duration::from_secs(OAUTH_TIMEOUT_SECS))
            .build()?;
        let remote_http = Client::builder()
            .timeout(Duration::from_secs(args.remote_timeout_secs))
            .build()?;

        let store = CredentialStore::new(args.token_file.clone());
        if !store.exists().await {
            info!(path = ?store.path(), "no stored credential, authorization required");
        }
        store.ensure_writable().await?;
        let flow = AuthorizationFlow::initialize(
            Arc::new(GoogleOAuth::new(provider_config, oauth_http)),
            store,
            args.state_token.clone(),
        )
        .await?;

        Ok(Self {
            flow: Arc::new(flow),
            connector: Arc::new(DriveConnector::new(remote_http)),
            upload: Arc::new(UploadConfig {
                max_bytes: args.max_upload_size,
                staging_dir: args.staging_dir.clone(),
                staging_ttl: Duration::from_secs(args.staging_ttl_secs),
            }),
            index_file: args.index_file.clone(),
        })
    }
}
