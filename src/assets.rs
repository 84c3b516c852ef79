#![forbid(unsafe_code)]

//! Asset path canonicalization and delivery.
//!
//! Clients request assets through three shapes of URL: `/web/<anything>`,
//! `/assets/<folder>/<anything>` and `/assets/<filename>`. The first two can
//! carry a whole source URL or arbitrary folders in front of the real file,
//! and every shape may glue an 8-digit hex hash in front of the stored name.
//! Everything in here boils those down to a single basename inside the asset
//! root.

use std::{
    fmt,
    path::{Component, Path, PathBuf},
};

use axum::{
    body::Body,
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
};
use mime_guess::MimeGuess;
use thiserror::Error;
use tokio::{
    fs::File,
    io::{AsyncReadExt, AsyncSeekExt},
};
use tokio_util::io::ReaderStream;

const HASH_PREFIX_LEN: usize = 8;

#[derive(Debug, Error)]
pub enum AssetError {
    #[error("unsafe asset path: {0:?}")]
    UnsafePath(String),
    #[error("file not found: {}", .0.display())]
    NotFound(PathBuf),
}

impl IntoResponse for AssetError {
    fn into_response(self) -> Response {
        match self {
            Self::UnsafePath(_) => {
                crate::proxy::ApiError::bad_request("Invalid asset path.").into_response()
            }
            Self::NotFound(_) => (StatusCode::NOT_FOUND, "File not found").into_response(),
        }
    }
}

/// A basename that is safe to join onto the asset root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalFilename(String);

impl CanonicalFilename {
    fn new(name: &str) -> Result<Self, AssetError> {
        if name.is_empty()
            || name == "."
            || name.contains("..")
            || name.contains(['/', '\\', '\0'])
        {
            return Err(AssetError::UnsafePath(name.to_string()));
        }
        Ok(Self(name.to_string()))
    }

    /// The name exactly as requested, held to the same safety floor.
    pub fn literal(name: &str) -> Result<Self, AssetError> {
        Self::new(name)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CanonicalFilename {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Reduces a raw `/web/*` or `/assets/<folder>/*` path to the stored filename.
pub fn canonicalize(raw: &str) -> Result<CanonicalFilename, AssetError> {
    // Source URLs are sometimes wrapped inside the asset path; only the part
    // starting at the embedded scheme is meaningful.
    let embedded = raw.find("http").map_or(raw, |start| &raw[start..]);
    CanonicalFilename::new(strip_hash_prefix(basename(embedded)))
}

/// Applies only the hash stripping and the safety floor. Used for
/// `/assets/<filename>`, which never carries a folder or embedded URL.
pub fn canonicalize_terminal(filename: &str) -> Result<CanonicalFilename, AssetError> {
    CanonicalFilename::new(strip_hash_prefix(filename))
}

fn basename(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    trimmed.rsplit('/').next().unwrap_or(trimmed)
}

/// Drops a leading 8-character lowercase hex hash when something follows it.
pub fn strip_hash_prefix(name: &str) -> &str {
    let bytes = name.as_bytes();
    if bytes.len() > HASH_PREFIX_LEN
        && bytes[..HASH_PREFIX_LEN]
            .iter()
            .all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
    {
        &name[HASH_PREFIX_LEN..]
    } else {
        name
    }
}

/// Location of the terminal `/assets/<filename>` request for a canonical name.
pub fn redirect_target(canonical: &CanonicalFilename) -> String {
    format!("/assets/{}", urlencoding::encode(canonical.as_str()))
}

/// Read-only view over the asset directory.
#[derive(Debug, Clone)]
pub struct AssetStore {
    root: PathBuf,
}

impl AssetStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Confirms the canonical filename names an existing file in the store.
    pub async fn resolve(&self, canonical: &CanonicalFilename) -> Result<PathBuf, AssetError> {
        let path = self.root.join(canonical.as_str());
        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => Ok(path),
            _ => {
                tracing::warn!(path = %path.display(), "asset not found");
                Err(AssetError::NotFound(path))
            }
        }
    }

    /// Static-mount lookup: the request path taken literally below the root.
    pub async fn static_file(&self, request_path: &str) -> Option<PathBuf> {
        let path = resolve_under_root(&self.root, request_path)?;
        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => Some(path),
            _ => None,
        }
    }
}

/// Joins a request path onto a root, refusing anything but normal components.
pub fn resolve_under_root(root: &Path, request_path: &str) -> Option<PathBuf> {
    let trimmed = request_path.trim_start_matches('/');
    if trimmed.is_empty() || trimmed.contains('\\') {
        return None;
    }
    let candidate = Path::new(trimmed);
    if candidate
        .components()
        .any(|component| !matches!(component, Component::Normal(_)))
    {
        return None;
    }
    Some(root.join(candidate))
}

/// Streams a file with an extension-derived content type and single-range
/// support. A file that vanished since it was resolved reports as not found.
pub async fn stream_file(
    path: PathBuf,
    headers: Option<&HeaderMap>,
) -> Result<Response, AssetError> {
    let missing = |path: &Path| AssetError::NotFound(path.to_path_buf());
    let mut file = File::open(&path).await.map_err(|_| missing(&path))?;
    let metadata = file.metadata().await.map_err(|_| missing(&path))?;
    let size = metadata.len();

    let guessed = MimeGuess::from_path(&path).first();
    let range = headers
        .and_then(|headers| headers.get(header::RANGE))
        .and_then(|value| parse_range_header(value, size));

    let mut response = if let Some((start, end)) = range {
        if start >= size {
            let mut response = Response::new(Body::empty());
            *response.status_mut() = StatusCode::RANGE_NOT_SATISFIABLE;
            if let Ok(value) = format!("bytes */{size}").parse() {
                response.headers_mut().insert(header::CONTENT_RANGE, value);
            }
            response
        } else {
            let end = end.min(size.saturating_sub(1));
            let length = end - start + 1;
            file.seek(std::io::SeekFrom::Start(start))
                .await
                .map_err(|_| missing(&path))?;
            let stream = ReaderStream::new(file.take(length));
            let mut response = Body::from_stream(stream).into_response();
            *response.status_mut() = StatusCode::PARTIAL_CONTENT;
            if let Ok(value) = format!("bytes {start}-{end}/{size}").parse() {
                response.headers_mut().insert(header::CONTENT_RANGE, value);
            }
            response
                .headers_mut()
                .insert(header::CONTENT_LENGTH, header::HeaderValue::from(length));
            response
        }
    } else {
        let mut response = Body::from_stream(ReaderStream::new(file)).into_response();
        response
            .headers_mut()
            .insert(header::CONTENT_LENGTH, header::HeaderValue::from(size));
        response
    };

    response
        .headers_mut()
        .insert(header::ACCEPT_RANGES, header::HeaderValue::from_static("bytes"));
    if let Some(mime) = guessed
        && let Ok(value) = mime.to_string().parse()
    {
        response.headers_mut().insert(header::CONTENT_TYPE, value);
    }

    Ok(response)
}

fn parse_range_header(value: &header::HeaderValue, size: u64) -> Option<(u64, u64)> {
    let value = value.to_str().ok()?.trim();
    let range = value.strip_prefix("bytes=")?.trim();
    // Multi-range requests fall back to the full body.
    if range.is_empty() || range.contains(',') {
        return None;
    }
    let (start_str, end_str) = range.split_once('-')?;

    if start_str.is_empty() {
        // Suffix range: "-N" means last N bytes.
        let suffix_len: u64 = end_str.parse().ok()?;
        if suffix_len == 0 {
            return None;
        }
        if suffix_len >= size {
            return Some((0, size.saturating_sub(1)));
        }
        return Some((size - suffix_len, size.saturating_sub(1)));
    }

    let start: u64 = start_str.parse().ok()?;
    // Open-ended ranges past the end must still reach the 416 path.
    let end = if end_str.is_empty() {
        size.saturating_sub(1).max(start)
    } else {
        end_str.parse().ok()?
    };
    if end < start {
        return None;
    }
    Some((start, end))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;
    use tempfile::tempdir;

    #[test]
    fn embedded_url_yields_stripped_basename() {
        let name = canonicalize("watch/http://cdn.example/abcd1234filename.png").unwrap();
        assert_eq!(name.as_str(), "filename.png");
    }

    #[test]
    fn embedded_https_url_keeps_only_the_last_segment() {
        let name =
            canonicalize("yt/www/https://s.ytimg.com/yts/tvfilm/0123abcdapp-prod.js").unwrap();
        assert_eq!(name.as_str(), "app-prod.js");
    }

    #[test]
    fn names_without_hash_are_unchanged() {
        for raw in ["logo.png", "img/logo.png", "deadbeXf-logo.png", "ABCDEF12logo.png"] {
            let expected = raw.rsplit('/').next().unwrap();
            assert_eq!(canonicalize(raw).unwrap().as_str(), expected, "{raw}");
        }
    }

    #[test]
    fn short_hex_prefix_is_not_stripped() {
        assert_eq!(canonicalize("abc123.png").unwrap().as_str(), "abc123.png");
    }

    #[test]
    fn bare_hash_is_kept_whole() {
        assert_eq!(strip_hash_prefix("0123abcd"), "0123abcd");
        assert_eq!(strip_hash_prefix("0123abcde"), "e");
    }

    #[test]
    fn trailing_slash_is_ignored_for_basename() {
        assert_eq!(canonicalize("http://cdn.example/fonts/").unwrap().as_str(), "fonts");
    }

    #[test]
    fn http_match_is_case_sensitive() {
        // No lowercase "http", so the whole input is treated as a path.
        let name = canonicalize("HTTP://cdn.example/a/b.css").unwrap();
        assert_eq!(name.as_str(), "b.css");
    }

    #[test]
    fn traversal_and_separators_are_rejected() {
        for raw in ["..", "foo/..", "a\\..\\secret", "", "/", "http://x/.."] {
            assert!(
                matches!(canonicalize(raw), Err(AssetError::UnsafePath(_))),
                "{raw:?} should be rejected"
            );
        }
        for name in ["..%2f", "..", "a/b", "a\\b", "0123abcd../x", "."] {
            assert!(canonicalize_terminal(name).is_err(), "{name:?} should be rejected");
        }
    }

    #[test]
    fn terminal_form_only_strips_hash() {
        let name = canonicalize_terminal("0123abcdhttp-style.js").unwrap();
        assert_eq!(name.as_str(), "http-style.js");
    }

    #[test]
    fn redirect_target_encodes_segment() {
        let name = canonicalize("http://cdn.example/my%20file.png").unwrap();
        assert_eq!(redirect_target(&name), "/assets/my%2520file.png");
        let name = canonicalize_terminal("space name.png").unwrap();
        assert_eq!(redirect_target(&name), "/assets/space%20name.png");
    }

    #[test]
    fn resolve_under_root_rejects_traversal() {
        let root = Path::new("/srv/assets");
        assert!(resolve_under_root(root, "/../etc/passwd").is_none());
        assert!(resolve_under_root(root, "/a/./b").is_some());
        assert!(resolve_under_root(root, "/").is_none());
        assert_eq!(
            resolve_under_root(root, "/img/logo.png"),
            Some(root.join("img/logo.png"))
        );
    }

    #[tokio::test]
    async fn store_resolves_existing_and_reports_missing() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("logo.png"), b"PNG").unwrap();
        let store = AssetStore::new(dir.path());

        let found = store
            .resolve(&canonicalize_terminal("logo.png").unwrap())
            .await
            .unwrap();
        assert_eq!(found, dir.path().join("logo.png"));

        let err = store
            .resolve(&canonicalize_terminal("doesnotexist.png").unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, AssetError::NotFound(_)));
        assert_eq!(err.into_response().status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn store_does_not_resolve_directories() {
        let dir = tempdir().unwrap();
        std::fs::create_dir(dir.path().join("fonts")).unwrap();
        let store = AssetStore::new(dir.path());
        assert!(store
            .resolve(&canonicalize_terminal("fonts").unwrap())
            .await
            .is_err());
        assert!(store.static_file("/fonts").await.is_none());
    }

    #[tokio::test]
    async fn stream_file_sets_content_type_and_body() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("app.css");
        std::fs::write(&path, "body{}").unwrap();

        let response = stream_file(path, None).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers().get(header::CONTENT_TYPE).unwrap(), "text/css");
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(body.as_ref(), b"body{}");
    }

    #[tokio::test]
    async fn stream_file_honors_range() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("clip.bin");
        std::fs::write(&path, b"0123456789").unwrap();

        let mut headers = HeaderMap::new();
        headers.insert(header::RANGE, "bytes=2-5".parse().unwrap());
        let response = stream_file(path.clone(), Some(&headers)).await.unwrap();
        assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
        assert_eq!(
            response.headers().get(header::CONTENT_RANGE).unwrap(),
            "bytes 2-5/10"
        );
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(body.as_ref(), b"2345");

        headers.insert(header::RANGE, "bytes=20-".parse().unwrap());
        let response = stream_file(path, Some(&headers)).await.unwrap();
        assert_eq!(response.status(), StatusCode::RANGE_NOT_SATISFIABLE);
    }

    #[test]
    fn parse_range_header_variants() {
        let value = |raw: &str| header::HeaderValue::from_str(raw).unwrap();
        assert_eq!(parse_range_header(&value("bytes=0-"), 10), Some((0, 9)));
        assert_eq!(parse_range_header(&value("bytes=-3"), 10), Some((7, 9)));
        assert_eq!(parse_range_header(&value("bytes=-30"), 10), Some((0, 9)));
        assert_eq!(parse_range_header(&value("bytes=5-2"), 10), None);
        assert_eq!(parse_range_header(&value("bytes=0-1,4-5"), 10), None);
        assert_eq!(parse_range_header(&value("items=0-1"), 10), None);
    }

    #[tokio::test]
    async fn missing_file_streams_as_not_found() {
        let dir = tempdir().unwrap();
        let err = stream_file(dir.path().join("gone.png"), None).await.unwrap_err();
        assert!(matches!(err, AssetError::NotFound(_)));
    }
}
