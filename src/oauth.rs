//! OAuth 2.0 授权码模式的提供方适配（Google）。

use async_trait::async_trait;
use chrono::{Duration, Utc};
use reqwest::Client;
use serde::Deserialize;
use thiserror::Error;
use url::Url;

use crate::config::{DRIVE_FILE_SCOPE, ProviderConfig};
use crate::credential::Credential;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("token request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("token endpoint returned {status}: {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },
}

/// 委托授权提供方：生成同意页地址、用授权码或刷新令牌换取凭据。
#[async_trait]
pub trait OAuthProvider: Send + Sync {
    fn authorize_url(&self, state: &str) -> String;

    async fn exchange_code(&self, code: &str) -> Result<Credential, ProviderError>;

    async fn refresh(&self, refresh_token: &str) -> Result<Credential, ProviderError>;
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    token_type: Option<String>,
}

impl TokenResponse {
    fn into_credential(self) -> Credential {
        Credential {
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            expiry: self
                .expires_in
                .map(|secs| Utc::now() + Duration::seconds(secs)),
            token_type: self.token_type.unwrap_or_else(|| "Bearer".into()),
        }
    }
}

pub struct GoogleOAuth {
    config: ProviderConfig,
    http: Client,
}

impl GoogleOAuth {
    pub fn new(config: ProviderConfig, http: Client) -> Self {
        Self { config, http }
    }

    async fn token_request(&self, params: &[(&str, &str)]) -> Result<TokenResponse, ProviderError> {
        let response = self
            .http
            .post(self.config.token_uri.clone())
            .form(params)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Status { status, body });
        }
        Ok(response.json().await?)
    }
}

#[async_trait]
impl OAuthProvider for GoogleOAuth {
    fn authorize_url(&self, state: &str) -> String {
        build_authorize_url(&self.config, state).to_string()
    }

    async fn exchange_code(&self, code: &str) -> Result<Credential, ProviderError> {
        let token = self
            .token_request(&[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.as_str()),
                ("redirect_uri", self.config.redirect_url.as_str()),
            ])
            .await?;
        Ok(token.into_credential())
    }

    async fn refresh(&self, refresh_token: &str) -> Result<Credential, ProviderError> {
        let token = self
            .token_request(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.as_str()),
            ])
            .await?;
        let mut credential = token.into_credential();
        // 刷新响应通常不再返回 refresh_token
        if credential.refresh_token.is_none() {
            credential.refresh_token = Some(refresh_token.to_string());
        }
        Ok(credential)
    }
}

fn build_authorize_url(config: &ProviderConfig, state: &str) -> Url {
    let mut url = config.auth_uri.clone();
    url.query_pairs_mut()
        .append_pair("access_type", "offline")
        .append_pair("client_id", &config.client_id)
        .append_pair("prompt", "consent")
        .append_pair("redirect_uri", config.redirect_url.as_str())
        .append_pair("response_type", "code")
        .append_pair("scope", DRIVE_FILE_SCOPE)
        .append_pair("state", state);
    url
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_REDIRECT_URL;
    use axum::Router;
    use axum::response::IntoResponse;
    use axum::routing::post;
    use std::collections::HashMap;

    fn provider_config() -> ProviderConfig {
        ProviderConfig::from_json(
            br#"{"web":{"client_id":"client-123","client_secret":"secret"}}"#,
            DEFAULT_REDIRECT_URL,
        )
        .expect("config")
    }

    #[test]
    fn authorize_url_requests_offline_access_with_state() {
        let url = build_authorize_url(&provider_config(), "state-token");
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        let get = |key: &str| {
            pairs
                .iter()
                .find(|(name, _)| name == key)
                .map(|(_, value)| value.clone())
        };

        assert_eq!(get("state").as_deref(), Some("state-token"));
        assert_eq!(get("access_type").as_deref(), Some("offline"));
        assert_eq!(get("client_id").as_deref(), Some("client-123"));
        assert_eq!(get("redirect_uri").as_deref(), Some(DEFAULT_REDIRECT_URL));
        assert_eq!(get("scope").as_deref(), Some(DRIVE_FILE_SCOPE));
    }

    #[test]
    fn token_response_without_expiry_never_expires() {
        let token: TokenResponse =
            serde_json::from_str(r#"{"access_token":"a","token_type":"Bearer"}"#).expect("parse");
        let credential = token.into_credential();
        assert!(credential.expiry.is_none());
        assert!(!credential.is_expired());
    }

    #[test]
    fn token_response_sets_expiry_from_expires_in() {
        let token: TokenResponse = serde_json::from_str(
            r#"{"access_token":"a","refresh_token":"r","expires_in":3599}"#,
        )
        .expect("parse");
        let credential = token.into_credential();
        assert_eq!(credential.refresh_token.as_deref(), Some("r"));
        assert_eq!(credential.token_type, "Bearer");
        assert!(!credential.is_expired());
    }

    async fn spawn_token_endpoint() -> String {
        let router = Router::new().route(
            "/token",
            post(|axum::Form(form): axum::Form<HashMap<String, String>>| async move {
                match form.get("grant_type").map(String::as_str) {
                    Some("authorization_code") if form.get("code").map(String::as_str) == Some("good") => {
                        axum::Json(serde_json::json!({
                            "access_token": "access-1",
                            "refresh_token": "refresh-1",
                            "expires_in": 3600,
                            "token_type": "Bearer",
                        }))
                        .into_response()
                    }
                    Some("refresh_token") => axum::Json(serde_json::json!({
                        "access_token": "access-2",
                        "expires_in": 3600,
                    }))
                    .into_response(),
                    _ => (
                        axum::http::StatusCode::BAD_REQUEST,
                        r#"{"error":"invalid_grant"}"#,
                    )
                        .into_response(),
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let addr = listener.local_addr().expect("addr");
        tokio::spawn(async move {
            let _ = axum::serve(listener, router).await;
        });
        format!("http://{addr}/token")
    }

    async fn provider_against_local_endpoint() -> GoogleOAuth {
        let mut config = provider_config();
        config.token_uri = Url::parse(&spawn_token_endpoint().await).expect("url");
        GoogleOAuth::new(config, Client::new())
    }

    #[tokio::test]
    async fn exchange_code_posts_form_and_parses_token() {
        let provider = provider_against_local_endpoint().await;
        let credential = provider.exchange_code("good").await.expect("exchange");
        assert_eq!(credential.access_token, "access-1");
        assert_eq!(credential.refresh_token.as_deref(), Some("refresh-1"));
        assert!(!credential.is_expired());
    }

    #[tokio::test]
    async fn rejected_code_reports_status() {
        let provider = provider_against_local_endpoint().await;
        match provider.exchange_code("bad").await {
            Err(ProviderError::Status { status, body }) => {
                assert_eq!(status, reqwest::StatusCode::BAD_REQUEST);
                assert!(body.contains("invalid_grant"));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn refresh_keeps_existing_refresh_token() {
        let provider = provider_against_local_endpoint().await;
        let credential = provider.refresh("refresh-1").await.expect("refresh");
        assert_eq!(credential.access_token, "access-2");
        assert_eq!(credential.refresh_token.as_deref(), Some("refresh-1"));
    }
}
