//! 路由装配、CORS 与请求追踪。

use axum::Router;
use axum::extract::{DefaultBodyLimit, Extension, connect_info::ConnectInfo};
use axum::http::{HeaderName, Method, Request, header};
use axum::routing::{get, post};
use std::net::SocketAddr;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeFile;
use tower_http::trace::{DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::{Level, info_span};

use crate::auth;
use crate::state::AppState;
use crate::upload;

/// 允许任意来源；方法限于 GET、POST 与预检。
pub fn build_cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            header::ACCEPT,
            header::CONTENT_TYPE,
            header::CONTENT_LENGTH,
            header::ACCEPT_ENCODING,
            HeaderName::from_static("x-csrf-token"),
            header::AUTHORIZATION,
        ])
        .expose_headers([HeaderName::from_static("x-file-id")])
}

pub fn build_router(state: &AppState) -> Router {
    Router::new()
        .route_service("/", ServeFile::new(&state.index_file))
        .route("/get-auth-url", get(auth::get_auth_url))
        .route("/check-auth-status", get(auth::check_auth_status))
        .route("/oauth2callback", get(auth::oauth2_callback))
        .route(
            "/upload",
            post(upload::upload_file).layer(DefaultBodyLimit::disable()),
        )
        .layer(build_cors_layer())
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|request: &Request<_>| {
                    let forwarded_ip = request
                        .headers()
                        .get("x-forwarded-for")
                        .and_then(|v| v.to_str().ok())
                        .map(|s| s.split(',').next().unwrap_or("").trim().to_string())
                        .filter(|s| !s.is_empty());
                    let connect_ip = request
                        .extensions()
                        .get::<ConnectInfo<SocketAddr>>()
                        .map(|ConnectInfo(addr)| addr.ip().to_string());
                    let client_ip = forwarded_ip
                        .or(connect_ip)
                        .unwrap_or_else(|| "unknown".to_string());

                    info_span!(
                        env!("CARGO_CRATE_NAME"),
                        client_ip,
                        method = ?request.method(),
                        path = ?request.uri().path(),
                    )
                })
                .on_request(DefaultOnRequest::new().level(Level::DEBUG))
                .on_response(DefaultOnResponse::new().level(Level::DEBUG)),
        )
        .layer(Extension(state.flow.clone()))
        .layer(Extension(state.connector.clone()))
        .layer(Extension(state.upload.clone()))
}
