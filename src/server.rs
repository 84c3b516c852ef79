#![forbid(unsafe_code)]

//! HTTP surface of the gateway.
//!
//! [`build_router`] assembles the whole dispatch table from an explicit
//! [`AppState`]; [`serve`] binds it. Asset routes resolve to a single stored
//! file or a single redirect, API routes validate and forward through
//! [`crate::proxy`].

use std::{net::SocketAddr, path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use axum::{
    Json, Router,
    body::Bytes,
    extract::{
        Path as AxumPath, Query, RawQuery, Request, State, rejection::QueryRejection,
    },
    http::{HeaderMap, StatusCode, header},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::signal;

use crate::{
    assets::{
        AssetError, AssetStore, CanonicalFilename, canonicalize, canonicalize_terminal,
        redirect_target, resolve_under_root, stream_file,
    },
    config::RuntimeConfig,
    proxy::{
        ApiError, ApiResult, FailureEnvelope, forward, forward_beacon, non_blank,
        parse_json_body, required_string,
    },
    upstream::{Beacon, Upstream, UpstreamResponse},
};

const THUMBNAIL_URL_PREFIX: &str = "https://i.ytimg.com/vi/";

const MISSING_BROWSE_ID_QUERY: &str = "Missing browseId parameter in the request.";
const MISSING_BROWSE_ID_BODY: &str = "Missing browseId parameter in the request body.";
const INVALID_NEXT_PARAMS: &str = "\"params\" is required and must be a non-empty string.";
const INVALID_NEXT_VIDEO_ID: &str = "\"videoId\" is required and must be a non-empty string.";
const INVALID_SEARCH_BODY: &str = "Search request body must be a JSON object.";
const MISSING_VIDEO_ID: &str = "Video ID is required.";

const NEXT_FAILURE: &str = "Failed to fetch data from YouTube /next API.";
const SEARCH_FAILURE: &str = "Failed to fetch data from YouTube /search API.";
const VIDEO_INFO_FAILURE: &str = "Failed to fetch video info.";

#[derive(Clone)]
pub struct AppState {
    pub assets: AssetStore,
    pub logs_root: Arc<PathBuf>,
    pub index_path: Arc<PathBuf>,
    pub upstream: Arc<dyn Upstream>,
}

impl AppState {
    pub fn new(config: &RuntimeConfig, upstream: Arc<dyn Upstream>) -> Self {
        Self {
            assets: AssetStore::new(config.assets_root.clone()),
            logs_root: Arc::new(config.logs_root.clone()),
            index_path: Arc::new(config.index_path.clone()),
            upstream,
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/get-thumbnail", get(get_thumbnail))
        .route("/web/{*path}", get(web_redirect))
        .route("/assets/{name}/{*path}", get(nested_asset))
        .route("/assets/{name}", get(serve_asset))
        .route("/logs/{*path}", get(serve_log))
        .route("/gen_204", get(gen_204))
        .route("/device_204", get(device_204))
        .route("/get_video_info", get(get_video_info))
        .route("/api/browse", get(browse_by_query).post(browse_by_body))
        .route("/api/guide", get(guide).post(guide))
        .route("/api/next", post(next))
        .route("/api/search", post(search))
        .fallback(not_found)
        .layer(middleware::from_fn(log_request))
        .with_state(state)
}

pub async fn serve(router: Router, addr: SocketAddr) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding to {}", addr))?;
    tracing::info!("gateway listening on http://{}", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("running gateway")?;

    Ok(())
}

async fn shutdown_signal() {
    // Only graceful shutdown depends on this; Ctrl+C still ends the process.
    if let Err(err) = signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to install Ctrl+C handler");
    }
}

async fn log_request(req: Request, next: Next) -> Response {
    tracing::info!(method = %req.method(), uri = %req.uri(), "received request");
    next.run(req).await
}

async fn not_found() -> ApiError {
    ApiError::not_found("endpoint not found")
}

async fn index(State(state): State<AppState>, headers: HeaderMap) -> Response {
    deliver(stream_file(state.index_path.to_path_buf(), Some(&headers)).await)
}

#[derive(Deserialize)]
struct ThumbnailQuery {
    #[serde(rename = "videoId")]
    video_id: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ThumbnailResponse {
    thumbnail_url: String,
}

async fn get_thumbnail(
    query: Result<Query<ThumbnailQuery>, QueryRejection>,
) -> ApiResult<Json<ThumbnailResponse>> {
    let query = query_or_bad_request(query, MISSING_VIDEO_ID)?;
    let video_id = non_blank(query.video_id.as_deref())
        .ok_or_else(|| ApiError::bad_request(MISSING_VIDEO_ID))?;
    Ok(Json(ThumbnailResponse {
        thumbnail_url: format!("{THUMBNAIL_URL_PREFIX}{video_id}/hqdefault.jpg"),
    }))
}

async fn web_redirect(AxumPath(path): AxumPath<String>) -> Response {
    match canonicalize(&path) {
        Ok(canonical) => redirect_to_asset(&canonical),
        Err(err) => err.into_response(),
    }
}

/// `/assets/<folder>/<path>`: served as-is when that nested file exists,
/// otherwise the folder is dropped and the client is sent to the flat name.
async fn nested_asset(
    State(state): State<AppState>,
    AxumPath((folder, path)): AxumPath<(String, String)>,
    headers: HeaderMap,
) -> Response {
    if let Some(file) = state.assets.static_file(&format!("{folder}/{path}")).await {
        return deliver(stream_file(file, Some(&headers)).await);
    }
    match canonicalize(&path) {
        Ok(canonical) => redirect_to_asset(&canonical),
        Err(err) => err.into_response(),
    }
}

/// `/assets/<filename>` is terminal and never redirects.
async fn serve_asset(
    State(state): State<AppState>,
    AxumPath(filename): AxumPath<String>,
    headers: HeaderMap,
) -> Response {
    deliver(resolve_asset(&state.assets, &filename, &headers).await)
}

async fn resolve_asset(
    store: &AssetStore,
    filename: &str,
    headers: &HeaderMap,
) -> Result<Response, AssetError> {
    // An exact stored name wins over hash stripping.
    let literal = CanonicalFilename::literal(filename)?;
    if let Some(file) = store.static_file(literal.as_str()).await {
        return stream_file(file, Some(headers)).await;
    }
    let canonical = canonicalize_terminal(filename)?;
    tracing::debug!("serving file: /assets/{}", canonical);
    let file = store.resolve(&canonical).await?;
    stream_file(file, Some(headers)).await
}

async fn serve_log(
    State(state): State<AppState>,
    AxumPath(path): AxumPath<String>,
    headers: HeaderMap,
) -> Response {
    let Some(file) = resolve_under_root(&state.logs_root, &path) else {
        return AssetError::NotFound(state.logs_root.join(path)).into_response();
    };
    deliver(stream_file(file, Some(&headers)).await)
}

/// A query string that does not deserialize (a repeated key, say) is reported
/// with the same message as a missing parameter.
fn query_or_bad_request<T>(
    query: Result<Query<T>, QueryRejection>,
    message: &'static str,
) -> ApiResult<T> {
    query.map(|Query(query)| query).map_err(|rejection| {
        tracing::debug!(error = %rejection, "rejecting query string");
        ApiError::bad_request(message)
    })
}

fn redirect_to_asset(canonical: &CanonicalFilename) -> Response {
    let target = redirect_target(canonical);
    tracing::debug!("redirecting to asset: {}", target);
    (StatusCode::FOUND, [(header::LOCATION, target)]).into_response()
}

fn deliver(result: Result<Response, AssetError>) -> Response {
    match result {
        Ok(response) => response,
        Err(err) => err.into_response(),
    }
}

async fn gen_204(State(state): State<AppState>) -> Response {
    forward_beacon(state.upstream, Beacon::Gen204).await
}

async fn device_204(State(state): State<AppState>) -> Response {
    forward_beacon(state.upstream, Beacon::Device204).await
}

async fn get_video_info(
    State(state): State<AppState>,
    RawQuery(query): RawQuery,
) -> ApiResult<UpstreamResponse> {
    let query = query.unwrap_or_default();
    forward(
        state.upstream,
        FailureEnvelope::Detailed(VIDEO_INFO_FAILURE),
        move |upstream| upstream.video_info(&query),
    )
    .await
}

#[derive(Deserialize)]
struct BrowseQuery {
    #[serde(rename = "browseId")]
    browse_id: Option<String>,
}

async fn browse_by_query(
    State(state): State<AppState>,
    query: Result<Query<BrowseQuery>, QueryRejection>,
) -> ApiResult<UpstreamResponse> {
    let query = query_or_bad_request(query, MISSING_BROWSE_ID_QUERY)?;
    let browse_id = non_blank(query.browse_id.as_deref())
        .ok_or_else(|| ApiError::bad_request(MISSING_BROWSE_ID_QUERY))?
        .to_string();
    forward_browse(state.upstream, browse_id).await
}

async fn browse_by_body(State(state): State<AppState>, body: Bytes) -> ApiResult<UpstreamResponse> {
    let body = parse_json_body(&body)?;
    let browse_id = required_string(&body, "browseId")
        .ok_or_else(|| ApiError::bad_request(MISSING_BROWSE_ID_BODY))?
        .to_string();
    forward_browse(state.upstream, browse_id).await
}

async fn forward_browse(
    upstream: Arc<dyn Upstream>,
    browse_id: String,
) -> ApiResult<UpstreamResponse> {
    forward(upstream, FailureEnvelope::Message, move |upstream| {
        upstream.browse(&browse_id)
    })
    .await
}

async fn guide(State(state): State<AppState>) -> ApiResult<UpstreamResponse> {
    forward(state.upstream, FailureEnvelope::Message, |upstream| {
        upstream.guide()
    })
    .await
}

async fn next(State(state): State<AppState>, body: Bytes) -> ApiResult<UpstreamResponse> {
    let body = parse_json_body(&body)?;
    let params = required_string(&body, "params")
        .ok_or_else(|| ApiError::bad_request(INVALID_NEXT_PARAMS))?
        .to_string();
    let video_id = required_string(&body, "videoId")
        .ok_or_else(|| ApiError::bad_request(INVALID_NEXT_VIDEO_ID))?
        .to_string();
    forward(
        state.upstream,
        FailureEnvelope::Detailed(NEXT_FAILURE),
        move |upstream| upstream.next(&params, &video_id),
    )
    .await
}

async fn search(State(state): State<AppState>, body: Bytes) -> ApiResult<UpstreamResponse> {
    let Value::Object(body) = parse_json_body(&body)? else {
        return Err(ApiError::bad_request(INVALID_SEARCH_BODY));
    };
    forward(
        state.upstream,
        FailureEnvelope::Detailed(SEARCH_FAILURE),
        move |upstream| upstream.search(body),
    )
    .await
}
