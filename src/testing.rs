//! 测试用的假提供方与假对象存储。

use async_trait::async_trait;
use chrono::{Duration, Utc};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::fs::File;
use tokio::io::AsyncReadExt;

use crate::credential::Credential;
use crate::drive::{ObjectStore, ObjectStoreConnector, RemoteError, RemoteObjectId};
use crate::oauth::{OAuthProvider, ProviderError};

pub fn credential_expiring_in(offset: Duration, refresh_token: Option<&str>) -> Credential {
    Credential {
        access_token: "stale".into(),
        refresh_token: refresh_token.map(str::to_string),
        expiry: Some(Utc::now() + offset),
        token_type: "Bearer".into(),
    }
}

pub struct FakeProvider {
    accept: bool,
    exchanges: AtomicUsize,
    refreshes: AtomicUsize,
}

impl FakeProvider {
    pub fn accepting() -> Self {
        Self {
            accept: true,
            exchanges: AtomicUsize::new(0),
            refreshes: AtomicUsize::new(0),
        }
    }

    pub fn rejecting() -> Self {
        Self {
            accept: false,
            ..Self::accepting()
        }
    }

    pub fn exchange_calls(&self) -> usize {
        self.exchanges.load(Ordering::SeqCst)
    }

    pub fn refresh_calls(&self) -> usize {
        self.refreshes.load(Ordering::SeqCst)
    }

    fn rejection() -> ProviderError {
        ProviderError::Status {
            status: reqwest::StatusCode::BAD_REQUEST,
            body: "invalid_grant".into(),
        }
    }
}

#[async_trait]
impl OAuthProvider for FakeProvider {
    fn authorize_url(&self, state: &str) -> String {
        format!("https://accounts.example.com/o/oauth2/auth?access_type=offline&state={state}")
    }

    async fn exchange_code(&self, code: &str) -> Result<Credential, ProviderError> {
        self.exchanges.fetch_add(1, Ordering::SeqCst);
        if !self.accept {
            return Err(Self::rejection());
        }
        Ok(Credential {
            access_token: format!("access-{code}"),
            refresh_token: Some(format!("refresh-{code}")),
            expiry: Some(Utc::now() + Duration::hours(1)),
            token_type: "Bearer".into(),
        })
    }

    async fn refresh(&self, refresh_token: &str) -> Result<Credential, ProviderError> {
        self.refreshes.fetch_add(1, Ordering::SeqCst);
        if !self.accept {
            return Err(Self::rejection());
        }
        Ok(Credential {
            access_token: format!("refreshed-{refresh_token}"),
            refresh_token: Some(refresh_token.to_string()),
            expiry: Some(Utc::now() + Duration::hours(1)),
            token_type: "Bearer".into(),
        })
    }
}

/// 记录每次 create 调用（名称与内容）的假对象存储。
#[derive(Default)]
pub struct FakeObjectStore {
    pub fail: bool,
    pub calls: Mutex<Vec<(String, Vec<u8>)>>,
}

impl FakeObjectStore {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn calls(&self) -> Vec<(String, Vec<u8>)> {
        self.calls.lock().expect("calls lock").clone()
    }
}

#[async_trait]
impl ObjectStore for FakeObjectStore {
    async fn create(
        &self,
        name: &str,
        mut content: File,
        _size: u64,
    ) -> Result<RemoteObjectId, RemoteError> {
        let mut bytes = Vec::new();
        content
            .read_to_end(&mut bytes)
            .await
            .expect("read staged content");
        let index = {
            let mut calls = self.calls.lock().expect("calls lock");
            calls.push((name.to_string(), bytes));
            calls.len()
        };
        if self.fail {
            return Err(RemoteError::Status {
                status: reqwest::StatusCode::SERVICE_UNAVAILABLE,
                body: "backend unavailable".into(),
            });
        }
        Ok(RemoteObjectId(format!("remote-{index}")))
    }
}

pub struct FakeConnector {
    pub store: Arc<FakeObjectStore>,
    pub tokens: Mutex<Vec<String>>,
}

impl FakeConnector {
    pub fn new(store: Arc<FakeObjectStore>) -> Self {
        Self {
            store,
            tokens: Mutex::new(Vec::new()),
        }
    }

    /// 每次 connect 收到的访问令牌。
    pub fn tokens(&self) -> Vec<String> {
        self.tokens.lock().expect("tokens lock").clone()
    }
}

impl ObjectStoreConnector for FakeConnector {
    fn connect(&self, credential: &Credential) -> Arc<dyn ObjectStore> {
        self.tokens
            .lock()
            .expect("tokens lock")
            .push(credential.access_token.clone());
        self.store.clone()
    }
}
