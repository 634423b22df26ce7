//! Archived response container.
//!
//! An [`ArchiveResponse`] is owned by exactly one request's processing: the
//! rewriter replaces its body in place, the dispatcher applies range slicing,
//! and `make_response` consumes it into the final HTTP response.

use axum::body::Body as HttpBody;
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::Response;
use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use futures::stream::{self, BoxStream};
use futures::{StreamExt, TryStreamExt};

use crate::error::Error;

/// Response body: buffered payload, lazy byte stream, or nothing.
pub enum Body {
    Empty,
    Buffered(Bytes),
    Stream(BoxStream<'static, std::io::Result<Bytes>>),
}

impl std::fmt::Debug for Body {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Body::Empty => f.write_str("Body::Empty"),
            Body::Buffered(b) => write!(f, "Body::Buffered({} bytes)", b.len()),
            Body::Stream(_) => f.write_str("Body::Stream"),
        }
    }
}

/// Byte range parsed from a `Range` header, inclusive end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ByteRange {
    start: u64,
    end: Option<u64>,
}

/// One archived capture's response, plus replay flags.
#[derive(Debug)]
pub struct ArchiveResponse {
    pub status: StatusCode,
    pub status_text: String,
    pub headers: HeaderMap,
    pub url: String,
    pub date: DateTime<Utc>,
    /// Content fetched live rather than from the archive.
    pub is_live: bool,
    /// Binary or otherwise non-rewritable content; skips the rewriter.
    pub no_rw: bool,
    body: Body,
    range: Option<ByteRange>,
}

impl ArchiveResponse {
    /// Build a buffered response.
    pub fn new(
        payload: Bytes,
        status: StatusCode,
        headers: HeaderMap,
        url: impl Into<String>,
        date: DateTime<Utc>,
    ) -> Self {
        Self {
            status,
            status_text: String::new(),
            headers,
            url: url.into(),
            date,
            is_live: false,
            no_rw: false,
            body: Body::Buffered(payload),
            range: None,
        }
    }

    /// Whether any body content is available.
    pub fn has_body(&self) -> bool {
        !matches!(self.body, Body::Empty)
    }

    /// Replace the body with a lazily produced byte stream. The archived
    /// length and encoding headers no longer describe the new body, so they
    /// are dropped and the transport recomputes framing.
    pub fn set_content(&mut self, stream: BoxStream<'static, std::io::Result<Bytes>>) {
        self.headers.remove(header::CONTENT_LENGTH);
        self.headers.remove(header::CONTENT_ENCODING);
        self.headers.remove(header::TRANSFER_ENCODING);
        self.body = Body::Stream(stream);
    }

    /// Take the body as a stream, leaving the response empty-bodied.
    /// Returns `None` when no body is available.
    pub fn take_body_stream(&mut self) -> Option<BoxStream<'static, std::io::Result<Bytes>>> {
        match std::mem::replace(&mut self.body, Body::Empty) {
            Body::Empty => None,
            Body::Buffered(bytes) => Some(stream::once(async move { Ok(bytes) }).boxed()),
            Body::Stream(s) => Some(s),
        }
    }

    /// Drain the body into a single buffer (range application, tests).
    pub async fn body_bytes(&mut self) -> Result<Bytes, Error> {
        match std::mem::replace(&mut self.body, Body::Empty) {
            Body::Empty => Ok(Bytes::new()),
            Body::Buffered(bytes) => Ok(bytes),
            Body::Stream(s) => {
                let buf = s
                    .try_fold(BytesMut::new(), |mut acc, chunk| async move {
                        acc.extend_from_slice(&chunk);
                        Ok(acc)
                    })
                    .await?;
                Ok(buf.freeze())
            }
        }
    }

    /// Record a `Range` header to be applied when the final response is
    /// built. Malformed headers are ignored, never an error.
    pub fn set_range(&mut self, header: &str) {
        self.range = parse_range(header);
    }

    /// Consume into the final HTTP response, applying any recorded range.
    pub async fn make_response(mut self) -> Result<Response, Error> {
        if let Some(range) = self.range {
            let data = self.body_bytes().await?;
            return self.ranged_response(range, data);
        }

        let body = match self.body {
            Body::Empty => HttpBody::empty(),
            Body::Buffered(bytes) => HttpBody::from(bytes),
            Body::Stream(s) => HttpBody::from_stream(s),
        };

        let mut resp = Response::builder().status(self.status).body(body)?;
        *resp.headers_mut() = self.headers;
        Ok(resp)
    }

    fn ranged_response(self, range: ByteRange, data: Bytes) -> Result<Response, Error> {
        let total = data.len() as u64;

        if range.start >= total {
            let mut resp = Response::builder()
                .status(StatusCode::RANGE_NOT_SATISFIABLE)
                .body(HttpBody::empty())?;
            *resp.headers_mut() = self.headers;
            resp.headers_mut().remove(header::CONTENT_LENGTH);
            resp.headers_mut().insert(
                header::CONTENT_RANGE,
                HeaderValue::from_str(&format!("bytes */{total}"))?,
            );
            return Ok(resp);
        }

        let end = range.end.map_or(total - 1, |e| e.min(total - 1));
        let slice = data.slice(range.start as usize..(end + 1) as usize);

        let mut resp = Response::builder()
            .status(StatusCode::PARTIAL_CONTENT)
            .body(HttpBody::from(slice.clone()))?;
        *resp.headers_mut() = self.headers;
        resp.headers_mut().insert(
            header::CONTENT_RANGE,
            HeaderValue::from_str(&format!("bytes {}-{}/{}", range.start, end, total))?,
        );
        resp.headers_mut().insert(
            header::CONTENT_LENGTH,
            HeaderValue::from_str(&slice.len().to_string())?,
        );
        Ok(resp)
    }
}

fn parse_range(header: &str) -> Option<ByteRange> {
    let spec = header.strip_prefix("bytes=")?;
    // multipart ranges are not served from the archive
    let spec = spec.split(',').next()?.trim();
    let (start, end) = spec.split_once('-')?;
    let start: u64 = start.trim().parse().ok()?;
    let end = match end.trim() {
        "" => None,
        e => Some(e.parse().ok()?),
    };
    if let Some(e) = end {
        if e < start {
            return None;
        }
    }
    Some(ByteRange { start, end })
}
