#![forbid(unsafe_code)]

//! Uniform forwarding of validated client requests to the upstream API.
//!
//! Handlers validate their few required fields, then hand a closure over the
//! [`Upstream`] to [`forward`]. Upstream calls block, so they run on the
//! blocking pool. Success passes the upstream response through untouched;
//! failure becomes a JSON envelope. Telemetry beacons go through
//! [`forward_beacon`] instead, which never reports a failure to the caller.

use std::sync::Arc;

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::{Map, Value, json};
use tokio::task;

use crate::upstream::{Beacon, Upstream, UpstreamError, UpstreamResponse};

pub const BEACON_FAILURE_STATUS: &str = "Failed to fetch data from YouTube";

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
    pub details: Option<String>,
}

impl ApiError {
    /// Creates a 400 error with the provided message.
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
            details: None,
        }
    }

    /// Creates a 404 error with the provided message.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
            details: None,
        }
    }

    /// Creates a 500 error with the provided message.
    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut body = json!({
            "error": self.message,
        });
        if let Some(details) = self.details {
            body["details"] = Value::String(details);
        }
        (self.status, Json(body)).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

/// Shape of the 500 body when an upstream call fails.
#[derive(Debug, Clone, Copy)]
pub enum FailureEnvelope {
    /// `{"error": "<upstream message>"}`
    Message,
    /// `{"error": "<summary>", "details": "<upstream message>"}`
    Detailed(&'static str),
}

impl FailureEnvelope {
    fn into_error(self, err: &UpstreamError) -> ApiError {
        let message = err.to_string();
        match self {
            Self::Message => ApiError::internal(message),
            Self::Detailed(summary) => ApiError::internal(summary).with_details(message),
        }
    }
}

/// Runs one upstream call on the blocking pool.
pub async fn dispatch<F>(
    upstream: Arc<dyn Upstream>,
    call: F,
) -> Result<UpstreamResponse, UpstreamError>
where
    F: FnOnce(&dyn Upstream) -> Result<UpstreamResponse, UpstreamError> + Send + 'static,
{
    task::spawn_blocking(move || call(&*upstream))
        .await
        .map_err(|err| UpstreamError::Task(err.to_string()))?
}

pub async fn forward<F>(
    upstream: Arc<dyn Upstream>,
    envelope: FailureEnvelope,
    call: F,
) -> ApiResult<UpstreamResponse>
where
    F: FnOnce(&dyn Upstream) -> Result<UpstreamResponse, UpstreamError> + Send + 'static,
{
    dispatch(upstream, call).await.map_err(|err| {
        tracing::error!(error = %err, "upstream call failed");
        envelope.into_error(&err)
    })
}

/// Fire-and-forget beacon: always answers 200.
pub async fn forward_beacon(upstream: Arc<dyn Upstream>, beacon: Beacon) -> Response {
    match dispatch(upstream, move |upstream| upstream.beacon(beacon)).await {
        Ok(response) => UpstreamResponse {
            status: StatusCode::OK.as_u16(),
            ..response
        }
        .into_response(),
        Err(err) => {
            tracing::warn!(beacon = beacon.path(), error = %err, "beacon forwarding failed");
            (
                StatusCode::OK,
                Json(json!({ "status": BEACON_FAILURE_STATUS })),
            )
                .into_response()
        }
    }
}

/// Returns the value when it is non-empty after trimming. The untrimmed
/// value is what gets forwarded.
pub fn non_blank(value: Option<&str>) -> Option<&str> {
    value.filter(|value| !value.trim().is_empty())
}

/// Looks up a required string field in a JSON object body.
pub fn required_string<'a>(body: &'a Value, key: &str) -> Option<&'a str> {
    non_blank(body.get(key).and_then(Value::as_str))
}

/// Parses a JSON request body. An empty body reads as `{}`.
pub fn parse_json_body(bytes: &[u8]) -> ApiResult<Value> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Object(Map::new()));
    }
    serde_json::from_slice(bytes).map_err(|err| {
        tracing::debug!(error = %err, "rejecting malformed JSON body");
        ApiError::bad_request("Request body must be valid JSON.")
    })
}
