//! HTTP surface.
//!
//! ```text
//! GET /                      -> 301 {content}/
//! GET /favicon.ico           -> 301 {content}/favicon.ico
//! GET {content}[/...]        -> request pipeline
//! GET {api}/search           -> ?keyword=&num=&searchType=
//! GET {api}/searchers        -> [{"type", "brief"}]
//! ```
//!
//! Every route runs behind the rate limiter, keyed by the peer address
//! (or proxy headers when `server.trust_proxy_headers` is set).

use anyhow::Context;
use axum::extract::{ConnectInfo, Path as UrlPath, Query, Request, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;

use crate::app::App;
use crate::error::ServeError;
use crate::paths::NormalizedPath;

/// Build the router. Route prefixes are taken from the settings in effect
/// when it is built.
pub fn router(app: Arc<App>) -> Router {
    let settings = app.settings();
    let content = settings.server.content_router.clone();
    let api = settings.server.api_router.clone();

    Router::new()
        .route("/", get(redirect_root))
        .route("/favicon.ico", get(redirect_favicon))
        .route(&content, get(content_index))
        .route(&format!("{content}/"), get(content_index))
        .route(&format!("{content}/{{*path}}"), get(content_path))
        .route(&format!("{api}/search"), get(search))
        .route(&format!("{api}/searchers"), get(searchers))
        .layer(middleware::from_fn_with_state(Arc::clone(&app), rate_limit))
        .layer(CorsLayer::permissive())
        .with_state(app)
}

/// Identity used for rate limiting.
///
/// The peer address unless `trust_proxy_headers` is set, in which case
/// `X-Real-IP` and then the first `X-Forwarded-For` hop win over it.
pub fn client_identity(
    headers: &HeaderMap,
    peer: Option<SocketAddr>,
    trust_proxy_headers: bool,
) -> String {
    let forwarded = trust_proxy_headers
        .then(|| {
            headers
                .get("x-real-ip")
                .or_else(|| headers.get("x-forwarded-for"))
        })
        .flatten()
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty());

    match (forwarded, peer) {
        (Some(ip), _) => ip.to_string(),
        (None, Some(addr)) => addr.ip().to_string(),
        (None, None) => "unknown".to_string(),
    }
}

async fn rate_limit(State(app): State<Arc<App>>, request: Request, next: Next) -> Response {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let trust = app.settings().server.trust_proxy_headers;
    let identity = client_identity(request.headers(), peer, trust);

    if let Err(err) = app.admit(&identity) {
        return err.into_response();
    }
    next.run(request).await
}

/// 301 to a location inside the content prefix.
fn moved_permanently(location: &str) -> Response {
    (StatusCode::MOVED_PERMANENTLY, [(header::LOCATION, location.to_string())]).into_response()
}

async fn redirect_root(State(app): State<Arc<App>>) -> Response {
    moved_permanently(&app.normalizer().route_for(&NormalizedPath::root()))
}

async fn redirect_favicon(State(app): State<Arc<App>>) -> Response {
    moved_permanently(&format!("{}/favicon.ico", app.normalizer().route_prefix()))
}

async fn content_index(State(app): State<Arc<App>>) -> Result<Response, ServeError> {
    let route = format!("{}/", app.normalizer().route_prefix());
    Ok(app.handle_content(&route).await?.into_response())
}

async fn content_path(
    State(app): State<Arc<App>>,
    UrlPath(path): UrlPath<String>,
) -> Result<Response, ServeError> {
    let route = format!("{}/{path}", app.normalizer().route_prefix());
    Ok(app.handle_content(&route).await?.into_response())
}

async fn search(
    State(app): State<Arc<App>>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<Vec<String>>, ServeError> {
    let settings = app.settings();

    let keyword = params.get("keyword").map(String::as_str).unwrap_or_default();
    if keyword.trim().is_empty() {
        return Err(ServeError::InvalidRequest("keyword is empty".to_string()));
    }
    let limit = match params.get("num") {
        Some(num) => num
            .trim()
            .parse::<usize>()
            .map_err(|_| ServeError::InvalidRequest("num must be int".to_string()))?,
        None => settings.search.default_limit,
    };
    let strategy = params
        .get("searchType")
        .filter(|s| !s.is_empty())
        .cloned()
        .unwrap_or_else(|| settings.search.default_strategy.clone());

    crate::debug_event!("search", "request", "{strategy}: {keyword} (limit {limit})");
    let routes = app.search(keyword, &strategy, limit).await?;
    Ok(Json(routes.as_ref().clone()))
}

async fn searchers(State(app): State<Arc<App>>) -> impl IntoResponse {
    Json(app.strategies())
}

/// Bind the configured port and serve until Ctrl+C.
pub async fn serve(app: Arc<App>) -> anyhow::Result<()> {
    let settings = app.settings();
    let bind = format!("0.0.0.0:{}", settings.server.port);
    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("Failed to bind {bind}"))?;

    crate::log_event!("server", "listening", "http://{bind}");
    crate::log_event!(
        "server",
        "routes",
        "content at {}, api at {}",
        settings.server.content_router,
        settings.server.api_router
    );

    let service = router(Arc::clone(&app)).into_make_service_with_connect_info::<SocketAddr>();
    let result = axum::serve(listener, service)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    app.stop();
    result.context("HTTP server failed")?;
    crate::log_event!("server", "shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("[server] failed to listen for ctrl+c: {e}");
        std::future::pending::<()>().await;
    }
    crate::log_event!("server", "shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_client_identity_uses_peer_by_default() {
        let peer: SocketAddr = "10.0.0.1:5000".parse().unwrap();
        let mut headers = HeaderMap::new();
        assert_eq!(client_identity(&headers, Some(peer), false), "10.0.0.1");
        assert_eq!(client_identity(&headers, None, false), "unknown");

        headers.insert("x-forwarded-for", HeaderValue::from_static("1.2.3.4"));
        headers.insert("x-real-ip", HeaderValue::from_static("5.6.7.8"));
        assert_eq!(client_identity(&headers, Some(peer), false), "10.0.0.1");
    }

    #[test]
    fn test_client_identity_trusts_proxy_headers_when_enabled() {
        let peer: SocketAddr = "10.0.0.1:5000".parse().unwrap();
        let mut headers = HeaderMap::new();
        assert_eq!(client_identity(&headers, Some(peer), true), "10.0.0.1");

        headers.insert("x-forwarded-for", HeaderValue::from_static("1.2.3.4, 10.0.0.2"));
        assert_eq!(client_identity(&headers, Some(peer), true), "1.2.3.4");

        headers.insert("x-real-ip", HeaderValue::from_static("5.6.7.8"));
        assert_eq!(client_identity(&headers, Some(peer), true), "5.6.7.8");
    }
}
