//! 委托授权流程：同意页地址、回调换取凭据、授权状态与凭据续期。

use axum::extract::{Extension, Query};
use axum::response::Json as JsonResponse;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::credential::{Credential, CredentialStore, PersistenceError};
use crate::error::ApiError;
use crate::oauth::OAuthProvider;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("state parameter does not match the issued token")]
    InvalidState,
    #[error("authorization code is missing")]
    MissingCode,
    #[error("token exchange failed: {0}")]
    ExchangeFailed(String),
}

/// 无可用凭据，等同于未授权。
#[derive(Debug, Error)]
pub enum Unauthenticated {
    #[error("no credential available")]
    NoCredential,
    #[error("credential expired and has no refresh token")]
    Expired,
    #[error("credential refresh failed: {0}")]
    RefreshFailed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthPhase {
    Unauthorized,
    AwaitingCallback,
    Authorized,
}

#[derive(Debug, Default)]
struct AuthState {
    authorized: bool,
    awaiting_callback: bool,
    session_credential: Option<Credential>,
}

/// 进程内唯一的授权状态，所有读写经由同一把读写锁。
pub struct AuthorizationFlow {
    provider: Arc<dyn OAuthProvider>,
    store: CredentialStore,
    state_token: String,
    state: RwLock<AuthState>,
}

impl AuthorizationFlow {
    /// 依据已持久化的凭据决定初始状态；凭据文件损坏视为错误。
    pub async fn initialize(
        provider: Arc<dyn OAuthProvider>,
        store: CredentialStore,
        state_token: String,
    ) -> Result<Self, PersistenceError> {
        let authorized = store.load().await?.is_some();
        info!(authorized, path = ?store.path(), "authorization state initialized");
        Ok(Self {
            provider,
            store,
            state_token,
            state: RwLock::new(AuthState {
                authorized,
                ..AuthState::default()
            }),
        })
    }

    /// 生成同意页地址；不改变授权标志。
    pub async fn begin_authorization(&self) -> String {
        let url = self.provider.authorize_url(&self.state_token);
        self.state.write().await.awaiting_callback = true;
        info!("authorization url issued");
        url
    }

    pub async fn handle_callback(&self, state: &str, code: &str) -> Result<(), AuthError> {
        if state != self.state_token {
            return Err(AuthError::InvalidState);
        }
        if code.is_empty() {
            return Err(AuthError::MissingCode);
        }

        let credential = self
            .provider
            .exchange_code(code)
            .await
            .map_err(|err| AuthError::ExchangeFailed(err.to_string()))?;

        // 持久化与内存更新在同一写锁内完成，重叠回调按提交顺序落盘
        let mut state = self.state.write().await;
        if let Err(err) = self.store.save(&credential).await {
            warn!(error = %err, "credential not persisted, keeping it in memory");
        }
        state.session_credential = Some(credential);
        state.authorized = true;
        state.awaiting_callback = false;
        info!("authorization completed");
        Ok(())
    }

    pub async fn status(&self) -> bool {
        self.state.read().await.authorized
    }

    pub async fn phase(&self) -> AuthPhase {
        let state = self.state.read().await;
        if state.awaiting_callback {
            AuthPhase::AwaitingCallback
        } else if state.authorized {
            AuthPhase::Authorized
        } else {
            AuthPhase::Unauthorized
        }
    }

    /// 取得可用凭据：优先使用本次会话换得的凭据，其次读取存储；过期时用刷新令牌续期。
    pub async fn active_credential(&self) -> Result<Credential, Unauthenticated> {
        let session = self.state.read().await.session_credential.clone();
        let credential = match session {
            Some(credential) => credential,
            None => match self.store.load().await {
                Ok(stored) => stored.ok_or(Unauthenticated::NoCredential)?,
                Err(err) => {
                    warn!(error = %err, "credential store unreadable");
                    return Err(Unauthenticated::NoCredential);
                }
            },
        };
        if !credential.is_expired() {
            return Ok(credential);
        }

        let refresh_token = credential
            .refresh_token
            .as_deref()
            .ok_or(Unauthenticated::Expired)?;
        let refreshed = self
            .provider
            .refresh(refresh_token)
            .await
            .map_err(|err| Unauthenticated::RefreshFailed(err.to_string()))?;
        info!("access token refreshed");

        let mut state = self.state.write().await;
        if let Some(current) = &state.session_credential
            && current != &credential
        {
            // 刷新期间已完成新的授权
            return Ok(current.clone());
        }
        if let Err(err) = self.store.save(&refreshed).await {
            warn!(error = %err, "refreshed credential not persisted");
        }
        state.session_credential = Some(refreshed.clone());
        Ok(refreshed)
    }
}

#[derive(Serialize)]
pub(crate) struct AuthUrlResponse {
    url: String,
}

#[derive(Serialize)]
pub(crate) struct AuthStatusResponse {
    authorized: bool,
}

#[derive(Deserialize)]
pub(crate) struct CallbackQuery {
    #[serde(default)]
    state: String,
    #[serde(default)]
    code: String,
}

/// 返回同意页地址。
pub async fn get_auth_url(
    Extension(flow): Extension<Arc<AuthorizationFlow>>,
) -> JsonResponse<AuthUrlResponse> {
    JsonResponse(AuthUrlResponse {
        url: flow.begin_authorization().await,
    })
}

/// 查询当前授权状态。
pub async fn check_auth_status(
    Extension(flow): Extension<Arc<AuthorizationFlow>>,
) -> JsonResponse<AuthStatusResponse> {
    let phase = flow.phase().await;
    debug!(?phase, "auth status requested");
    JsonResponse(AuthStatusResponse {
        authorized: flow.status().await,
    })
}

/// OAuth 回调：校验 state，换取并保存凭据。
pub async fn oauth2_callback(
    Extension(flow): Extension<Arc<AuthorizationFlow>>,
    Query(query): Query<CallbackQuery>,
) -> Result<&'static str, ApiError> {
    info!(has_code = !query.code.is_empty(), "oauth callback received");
    flow.handle_callback(&query.state, &query.code).await?;
    Ok("Authorization successful! You can close this window and return to the application.")
}
