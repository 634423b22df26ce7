//! End-to-end replay dispatch tests
//!
//! Each test sends a real request through the router and checks the decoded
//! replay semantics: page listing, rewriting, modifiers, pseudo-schemes,
//! redirects, and failure pages.

use super::common::fixtures::{
    body_text, collection, demo_router, get, get_with_headers, sample_captures, TS,
};
use arclight::{AppState, CollectionConfig, DEFAULT_CSP};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};

#[tokio::test]
async fn page_list_links_to_captures() {
    let resp = get(demo_router(), "/w/demo/").await;
    assert_eq!(resp.status(), StatusCode::OK);

    let body = body_text(resp).await;
    assert!(body.contains("<h2>Available Pages</h2>"));
    // only page-level captures are listed
    assert!(body.contains(&format!("href=\"/w/demo/{TS}/https://example.com/\"")));
    assert!(!body.contains("style.css"));
}

#[tokio::test]
async fn replayed_page_is_rewritten_under_its_prefix() {
    let resp = get(demo_router(), &format!("/w/demo/{TS}mp_/https://example.com/")).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(
        resp.headers()
            .get(header::CONTENT_SECURITY_POLICY)
            .and_then(|v| v.to_str().ok()),
        Some(DEFAULT_CSP)
    );

    let body = body_text(resp).await;
    assert!(body.contains(&format!("href=\"/w/demo/{TS}mp_/http://other.com/page\"")));
    assert!(body.contains(&format!("src=\"/w/demo/{TS}mp_/https://example.com/logo.png\"")));
    // bootstrap block lands inside <head>
    assert!(body.contains("wbinfo.url = \"https://example.com/\";"));
    let insert_at = body.find("wbinfo").expect("insert present");
    let title_at = body.find("<title>").expect("title present");
    assert!(insert_at < title_at);
}

#[tokio::test]
async fn identity_modifier_serves_raw_bytes() {
    let resp = get(demo_router(), &format!("/w/demo/{TS}id_/https://example.com/")).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(resp.headers().get(header::CONTENT_SECURITY_POLICY).is_none());

    let body = body_text(resp).await;
    assert!(body.contains("href=\"http://other.com/page\""));
    assert!(!body.contains("wbinfo"));
}

#[tokio::test]
async fn timestamp_fallback_picks_nearest_capture() {
    let resp = get(demo_router(), "/w/demo/2018mp_/https://example.com/").await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(body_text(resp).await.contains("link"));
}

#[tokio::test]
async fn miss_offers_live_version() {
    let resp = get(demo_router(), &format!("/w/demo/{TS}mp_/https://example.com/missing")).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    let body = body_text(resp).await;
    assert!(body.contains("<b>https://example.com/missing</b>"));
    assert!(body.contains("href=\"https://example.com/missing\""));
}

#[tokio::test]
async fn bare_domain_under_named_collection_is_rejected() {
    let resp = get(demo_router(), "/w/demo/example.com").await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    assert!(body_text(resp).await.contains("Replay URL example.com not found"));
}

#[tokio::test]
async fn root_collection_upgrades_bare_domain() {
    let coll = collection(
        "root",
        CollectionConfig {
            root: true,
            ..Default::default()
        },
        sample_captures(),
    );
    let router = arclight::build_router(AppState::new(vec![coll]), true);

    let resp = get(router, "/w/example.com/page").await;
    // "example.com/page" fails the grammar; root collections assume https
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(body_text(resp)
        .await
        .contains("\"url\": \"https://example.com/page\""));
}

#[tokio::test]
async fn srcdoc_document_is_decoded_and_rewritten() {
    // base64 of "<h1>hi</h1>"
    let resp = get(demo_router(), "/w/demo/mp_/srcdoc:PGgxPmhpPC9oMT4=").await;
    assert_eq!(resp.status(), StatusCode::OK);

    let body = body_text(resp).await;
    assert!(body.contains("<h1>hi</h1>"));
    // inline documents still get the bootstrap block
    assert!(body.contains("wbinfo"));
}

#[tokio::test]
async fn missing_slash_redirects_to_canonical_form() {
    let resp = get(demo_router(), &format!("/w/demo/{TS}mp_/https://example.com")).await;
    assert_eq!(resp.status(), StatusCode::MOVED_PERMANENTLY);
    assert_eq!(
        resp.headers()
            .get(header::LOCATION)
            .and_then(|v| v.to_str().ok()),
        Some(format!("/w/demo/{TS}mp_/https://example.com/").as_str())
    );
}

#[tokio::test]
async fn range_request_returns_partial_content() {
    let mut headers = HeaderMap::new();
    headers.insert(header::RANGE, HeaderValue::from_static("bytes=4-7"));
    let resp = get_with_headers(
        demo_router(),
        &format!("/w/demo/{TS}mp_/https://example.com/data.bin"),
        headers,
    )
    .await;
    assert_eq!(resp.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(
        resp.headers()
            .get(header::CONTENT_RANGE)
            .and_then(|v| v.to_str().ok()),
        Some("bytes 4-7/10")
    );
    assert_eq!(body_text(resp).await, "4567");
}

#[tokio::test]
async fn full_range_is_served_as_plain_200() {
    let mut headers = HeaderMap::new();
    headers.insert(header::RANGE, HeaderValue::from_static("bytes=0-"));
    let resp = get_with_headers(
        demo_router(),
        &format!("/w/demo/{TS}mp_/https://example.com/data.bin"),
        headers,
    )
    .await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_text(resp).await, "0123456789");
}

#[tokio::test]
async fn top_frame_without_modifier_serves_shell() {
    let resp = get(demo_router(), &format!("/w/demo/{TS}/https://example.com/")).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(resp.headers().get(header::CONTENT_SECURITY_POLICY).is_some());

    let body = body_text(resp).await;
    assert!(body.contains("replay_iframe"));
    assert!(body.contains("\"url\": \"https://example.com/\""));
    assert!(body.contains(&format!("\"request_ts\": \"{TS}\"")));
}

#[tokio::test]
async fn css_capture_passes_through_collaborator() {
    let resp = get(
        demo_router(),
        &format!("/w/demo/{TS}cs_/https://example.com/style.css"),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::OK);
    // demo transforms leave CSS alone but the CSP still applies
    assert!(resp.headers().get(header::CONTENT_SECURITY_POLICY).is_some());
    assert!(body_text(resp)
        .await
        .contains("url(https://example.com/bg.png)"));
}
