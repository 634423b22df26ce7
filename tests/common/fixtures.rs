//! Archived-site fixtures and request helpers.

use std::sync::Arc;

use arclight::{
    AppState, Capture, Collection, CollectionConfig, LogNotifier, MemoryStore, Prefixes,
    PrefixTransforms,
};
use axum::body::Body;
use axum::http::{HeaderMap, Request};
use axum::response::Response;
use axum::Router;
use http_body_util::BodyExt;
use tower::ServiceExt;

/// Capture timestamp shared by the fixture site.
pub const TS: &str = "20201226101010";

/// A small archived site: a page with outbound references, a stylesheet,
/// a script, and an opaque binary.
pub fn sample_captures() -> Vec<Capture> {
    vec![
        Capture::new(
            "https://example.com/",
            TS,
            "text/html",
            concat!(
                "<html><head><title>Fixture</title></head>",
                "<body>",
                "<a href=\"http://other.com/page\">link</a>",
                "<img src=\"https://example.com/logo.png\">",
                "<script src=\"https://example.com/app.js\"></script>",
                "</body></html>"
            ),
        )
        .page(),
        Capture::new(
            "https://example.com/style.css",
            TS,
            "text/css",
            "body { background: url(https://example.com/bg.png) }",
        ),
        Capture::new(
            "https://example.com/app.js",
            TS,
            "application/javascript",
            "console.log('archived');",
        ),
        Capture::new(
            "https://example.com/data.bin",
            TS,
            "application/octet-stream",
            "0123456789",
        ),
    ]
}

pub fn collection(name: &str, config: CollectionConfig, captures: Vec<Capture>) -> Collection {
    Collection::new(
        name,
        Arc::new(MemoryStore::new(captures)),
        config,
        Prefixes {
            main: "/w/".to_string(),
            root: None,
            static_prefix: "/static/".to_string(),
        },
        Arc::new(PrefixTransforms),
        Arc::new(LogNotifier),
    )
}

/// Router serving `sample_captures` under `/w/demo/`.
pub fn demo_router() -> Router {
    let coll = collection("demo", CollectionConfig::default(), sample_captures());
    arclight::build_router(AppState::new(vec![coll]), true)
}

/// One GET through the router.
pub async fn get(router: Router, uri: &str) -> Response {
    get_with_headers(router, uri, HeaderMap::new()).await
}

pub async fn get_with_headers(router: Router, uri: &str, headers: HeaderMap) -> Response {
    let mut builder = Request::builder().uri(uri);
    for (name, value) in headers.iter() {
        builder = builder.header(name, value);
    }
    router
        .oneshot(builder.body(Body::empty()).expect("request"))
        .await
        .expect("router response")
}

pub async fn body_text(resp: Response) -> String {
    let bytes = resp
        .into_body()
        .collect()
        .await
        .expect("collect body")
        .to_bytes();
    String::from_utf8_lossy(&bytes).into_owned()
}
