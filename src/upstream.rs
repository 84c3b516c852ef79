#![forbid(unsafe_code)]

//! Calls into the video platform's internal API.
//!
//! The gateway only needs a handful of endpoints, each reached with a single
//! request. The [`Upstream`] trait is what handlers depend on; the
//! [`InnerTubeClient`] is the real implementation and uses a blocking `ureq`
//! agent, so callers run it on the blocking pool.

use std::io::Read;

use axum::{
    body::Body,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use serde_json::{Map, Value, json};
use thiserror::Error;

use crate::config::UpstreamConfig;

/// Fixed query string the TV client sends with its analytics beacons.
const TELEMETRY_QUERY: &str = "app_anon_id=a8d9033a-9d84-4178-a37f-8bf49003bc66\
&firstactive=1456804800&prevactive=1456804800&firstactivegeo=US&loginstate=0\
&firstlogin=0&prevlogin=0&c=TVHTML5&cver=5.20150715&ctheme=CLASSIC&label=c96c1c11";

// Upstream bodies past this size are refused rather than relayed.
const MAX_BODY_BYTES: u64 = 32 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("Request failed with status code {0}")]
    Status(u16),
    #[error("{0}")]
    Transport(String),
    #[error("failed to read upstream response: {0}")]
    Body(String),
    #[error("upstream task failed: {0}")]
    Task(String),
}

/// Status, content type and raw body of a successful upstream call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

impl UpstreamResponse {
    pub fn json(status: u16, value: &Value) -> Self {
        Self {
            status,
            content_type: Some("application/json".to_string()),
            body: value.to_string().into_bytes(),
        }
    }
}

impl IntoResponse for UpstreamResponse {
    fn into_response(self) -> Response {
        let mut response = Response::new(Body::from(self.body));
        *response.status_mut() = StatusCode::from_u16(self.status).unwrap_or(StatusCode::OK);
        if let Some(value) = self
            .content_type
            .as_deref()
            .and_then(|content_type| content_type.parse().ok())
        {
            response.headers_mut().insert(header::CONTENT_TYPE, value);
        }
        response
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Beacon {
    Gen204,
    Device204,
}

impl Beacon {
    pub fn path(self) -> &'static str {
        match self {
            Self::Gen204 => "gen_204",
            Self::Device204 => "device_204",
        }
    }
}

/// The upstream operations the gateway forwards to. Each call is one
/// request; implementations may block.
pub trait Upstream: Send + Sync + 'static {
    fn browse(&self, browse_id: &str) -> Result<UpstreamResponse, UpstreamError>;
    fn guide(&self) -> Result<UpstreamResponse, UpstreamError>;
    fn next(&self, params: &str, video_id: &str) -> Result<UpstreamResponse, UpstreamError>;
    /// `body` is the client's search request, forwarded as-is apart from the
    /// client context.
    fn search(&self, body: Map<String, Value>) -> Result<UpstreamResponse, UpstreamError>;
    /// `query` is the raw query string of the incoming request.
    fn video_info(&self, query: &str) -> Result<UpstreamResponse, UpstreamError>;
    fn beacon(&self, beacon: Beacon) -> Result<UpstreamResponse, UpstreamError>;
}

pub struct InnerTubeClient {
    agent: ureq::Agent,
    config: UpstreamConfig,
}

impl InnerTubeClient {
    pub fn new(config: UpstreamConfig) -> Self {
        Self {
            agent: ureq::AgentBuilder::new().build(),
            config,
        }
    }

    fn context(&self) -> Value {
        json!({
            "client": {
                "clientName": self.config.client_name,
                "clientVersion": self.config.client_version,
                "hl": "en",
                "gl": "US",
            }
        })
    }

    fn endpoint_url(&self, endpoint: &str) -> String {
        format!(
            "{}/{endpoint}?prettyPrint=false",
            self.config.innertube_base_url
        )
    }

    fn post(
        &self,
        endpoint: &str,
        mut body: Map<String, Value>,
    ) -> Result<UpstreamResponse, UpstreamError> {
        body.insert("context".to_string(), self.context());
        let url = self.endpoint_url(endpoint);
        tracing::debug!(%url, "posting to upstream");
        let result = self
            .agent
            .post(&url)
            .set("Content-Type", "application/json")
            .send_json(Value::Object(body));
        read_response(result)
    }

    fn get(&self, url: &str) -> Result<UpstreamResponse, UpstreamError> {
        tracing::debug!(%url, "fetching from upstream");
        read_response(self.agent.get(url).call())
    }
}

impl Upstream for InnerTubeClient {
    fn browse(&self, browse_id: &str) -> Result<UpstreamResponse, UpstreamError> {
        let mut body = Map::new();
        body.insert("browseId".to_string(), Value::from(browse_id));
        self.post("browse", body)
    }

    fn guide(&self) -> Result<UpstreamResponse, UpstreamError> {
        self.post("guide", Map::new())
    }

    fn next(&self, params: &str, video_id: &str) -> Result<UpstreamResponse, UpstreamError> {
        let mut body = Map::new();
        body.insert("videoId".to_string(), Value::from(video_id));
        body.insert("params".to_string(), Value::from(params));
        self.post("next", body)
    }

    fn search(&self, body: Map<String, Value>) -> Result<UpstreamResponse, UpstreamError> {
        self.post("search", body)
    }

    fn video_info(&self, query: &str) -> Result<UpstreamResponse, UpstreamError> {
        let url = if query.is_empty() {
            self.config.video_info_url.clone()
        } else {
            format!("{}?{query}", self.config.video_info_url)
        };
        self.get(&url)
    }

    fn beacon(&self, beacon: Beacon) -> Result<UpstreamResponse, UpstreamError> {
        let url = format!(
            "{}/{}?{TELEMETRY_QUERY}",
            self.config.telemetry_base_url,
            beacon.path()
        );
        self.get(&url)
    }
}

fn read_response(
    result: Result<ureq::Response, ureq::Error>,
) -> Result<UpstreamResponse, UpstreamError> {
    let response = match result {
        Ok(response) => response,
        Err(ureq::Error::Status(code, _)) => return Err(UpstreamError::Status(code)),
        Err(ureq::Error::Transport(err)) => return Err(UpstreamError::Transport(err.to_string())),
    };

    let status = response.status();
    let content_type = response.header("Content-Type").map(str::to_string);
    let mut body = Vec::new();
    let read = response
        .into_reader()
        .take(MAX_BODY_BYTES + 1)
        .read_to_end(&mut body)
        .map_err(|err| UpstreamError::Body(err.to_string()))?;
    if read as u64 > MAX_BODY_BYTES {
        return Err(UpstreamError::Body(format!(
            "upstream response exceeds {} MiB",
            MAX_BODY_BYTES / (1024 * 1024)
        )));
    }

    Ok(UpstreamResponse {
        status,
        content_type,
        body,
    })
}
