//! Capture store interface and the in-memory store.
//!
//! Persistent capture storage and indexing live outside this crate; the
//! dispatcher only needs page listing and resource lookup. [`MemoryStore`]
//! backs the demo binary and the test suite.

use async_trait::async_trait;
use axum::http::{header, HeaderMap, HeaderValue, Method, StatusCode};
use bytes::Bytes;
use chrono::Utc;

use crate::response::ArchiveResponse;
use crate::util::ts_to_date;

/// One page-level capture, as listed in the collection's page index.
#[derive(Debug, Clone)]
pub struct PageEntry {
    pub url: String,
    /// 14-digit capture timestamp, when known.
    pub date: Option<String>,
}

/// Lookup query for a single resource.
#[derive(Debug, Clone)]
pub struct ResourceQuery {
    pub url: String,
    pub method: Method,
    /// Requested capture timestamp digits; empty selects the best capture.
    pub timestamp: String,
    /// Request headers, for stores that match on them.
    pub headers: HeaderMap,
}

/// Store failures. `AuthNeeded` is the only variant the dispatcher treats
/// specially; anything else degrades to not-found.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Authentication required from source")]
    AuthNeeded,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Capture lookup and listing, supplied by the surrounding application.
#[async_trait]
pub trait Store: Send + Sync {
    /// Enumerate page-level captures for the page-list view.
    async fn get_all_pages(&self) -> Result<Vec<PageEntry>, StoreError>;

    /// Look up the capture best matching the query. `Ok(None)` is a miss.
    /// `prefix` is the resource prefix the response's own references should
    /// be rewritten under, for stores that pre-rewrite.
    async fn get_resource(
        &self,
        query: &ResourceQuery,
        prefix: &str,
    ) -> Result<Option<ArchiveResponse>, StoreError>;
}

/// One stored capture for [`MemoryStore`].
#[derive(Debug, Clone)]
pub struct Capture {
    pub url: String,
    /// 14-digit capture timestamp.
    pub timestamp: String,
    pub content_type: String,
    pub body: Bytes,
    pub status: u16,
    /// Listed in the page index.
    pub is_page: bool,
    /// Marks content the rewriter must not touch.
    pub no_rw: bool,
}

impl Capture {
    pub fn new(url: &str, timestamp: &str, content_type: &str, body: impl Into<Bytes>) -> Self {
        Self {
            url: url.to_string(),
            timestamp: timestamp.to_string(),
            content_type: content_type.to_string(),
            body: body.into(),
            status: 200,
            is_page: false,
            no_rw: false,
        }
    }

    pub fn page(mut self) -> Self {
        self.is_page = true;
        self
    }

    pub fn no_rewrite(mut self) -> Self {
        self.no_rw = true;
        self
    }
}

/// In-memory capture store: exact-URL match, nearest timestamp wins.
#[derive(Debug, Default)]
pub struct MemoryStore {
    captures: Vec<Capture>,
    /// Simulate a source that rejects unauthenticated lookups.
    pub require_auth: bool,
}

impl MemoryStore {
    pub fn new(captures: Vec<Capture>) -> Self {
        Self {
            captures,
            require_auth: false,
        }
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get_all_pages(&self) -> Result<Vec<PageEntry>, StoreError> {
        Ok(self
            .captures
            .iter()
            .filter(|c| c.is_page)
            .map(|c| PageEntry {
                url: c.url.clone(),
                date: Some(c.timestamp.clone()),
            })
            .collect())
    }

    async fn get_resource(
        &self,
        query: &ResourceQuery,
        _prefix: &str,
    ) -> Result<Option<ArchiveResponse>, StoreError> {
        if self.require_auth {
            return Err(StoreError::AuthNeeded);
        }

        let requested: i64 = pad_ts(&query.timestamp);
        let best = self
            .captures
            .iter()
            .filter(|c| c.url == query.url)
            .min_by_key(|c| (pad_ts(&c.timestamp) - requested).abs());

        let Some(capture) = best else {
            return Ok(None);
        };

        let mut headers = HeaderMap::new();
        if let Ok(value) = HeaderValue::from_str(&capture.content_type) {
            headers.insert(header::CONTENT_TYPE, value);
        }

        let date = ts_to_date(&capture.timestamp).unwrap_or_else(Utc::now);
        let mut response = ArchiveResponse::new(
            capture.body.clone(),
            StatusCode::from_u16(capture.status).unwrap_or(StatusCode::OK),
            headers,
            capture.url.clone(),
            date,
        );
        response.no_rw = capture.no_rw;
        Ok(Some(response))
    }
}

/// Numeric value of a timestamp padded to 14 digits; empty sorts latest.
fn pad_ts(ts: &str) -> i64 {
    if ts.is_empty() {
        return 99_999_999_999_999;
    }
    let mut full = [b'0'; 14];
    full[..4].copy_from_slice(b"2001");
    full[4..8].copy_from_slice(b"0101");
    for (i, b) in ts.bytes().take(14).enumerate() {
        full[i] = b;
    }
    std::str::from_utf8(&full)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(0)
}
