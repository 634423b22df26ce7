//! Error types for the replay pipeline.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

/// Failures that abort a replay request. Unresolvable targets never surface
/// here; they are rendered as normal not-found pages by the dispatcher.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Live fetch failed (top-frame template, blob: targets).
    #[error("Upstream fetch failed: {0}")]
    Fetch(#[from] reqwest::Error),

    /// Response construction failed.
    #[error("Response build failed: {0}")]
    Http(#[from] axum::http::Error),

    /// A computed header value was not representable.
    #[error("Invalid header value: {0}")]
    Header(#[from] axum::http::header::InvalidHeaderValue),

    /// Body streaming failed mid-rewrite. A partially rewritten document is
    /// never served.
    #[error("Body stream failed: {0}")]
    Io(#[from] std::io::Error),

    /// Page-index enumeration failed. Resource lookups degrade to not-found
    /// instead of surfacing this.
    #[error("Store failed: {0}")]
    Store(#[from] crate::store::StoreError),
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = match &self {
            Error::Fetch(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        tracing::error!(error = %self, "request failed");
        (status, self.to_string()).into_response()
    }
}
