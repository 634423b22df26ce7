//! Streaming rewrite behavior
//!
//! Exercises the HTML rewriter through the public API with chunked bodies,
//! checking that chunk boundaries never change the output and that
//! non-rewritten bytes survive untouched.

use std::sync::Arc;

use arclight::{
    ArchiveResponse, DocTransforms, HtmlRewriter, NoopTransforms, PrefixRewriter, RewriteOpts,
};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use bytes::Bytes;
use chrono::Utc;
use futures::StreamExt;

const PREFIX: &str = "/w/20201226101010mp_/";

fn opts(head_insert: Option<&'static str>) -> RewriteOpts {
    let noop = Arc::new(NoopTransforms);
    RewriteOpts {
        base_url: "https://example.com/page".to_string(),
        response_url: "https://example.com/page".to_string(),
        prefix: PREFIX.to_string(),
        head_insert: head_insert.map(|ins| -> arclight::rewrite::HeadInsertFn {
            Arc::new(move |_| Some(ins.to_string()))
        }),
        url_rewrite: true,
        content_rewrite: true,
        decode: false,
        transforms: DocTransforms {
            urls: Arc::new(PrefixRewriter {
                prefix: PREFIX.to_string(),
            }),
            js: noop.clone(),
            css: noop,
        },
    }
}

fn html_response(chunks: Vec<Bytes>) -> ArchiveResponse {
    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/html"));
    let mut response = ArchiveResponse::new(
        Bytes::new(),
        StatusCode::OK,
        headers,
        "https://example.com/page",
        Utc::now(),
    );
    let stream = futures::stream::iter(chunks.into_iter().map(Ok));
    response.set_content(stream.boxed());
    response
}

async fn rewrite_chunked(doc: &[u8], chunk_size: usize) -> Vec<u8> {
    let chunks = doc
        .chunks(chunk_size.max(1))
        .map(Bytes::copy_from_slice)
        .collect();
    let mut rewritten = HtmlRewriter::new(Arc::new(opts(Some("<!--I-->"))))
        .rewrite(html_response(chunks))
        .expect("rewrite");
    rewritten.body_bytes().await.expect("drain").to_vec()
}

#[tokio::test]
async fn chunk_boundaries_never_change_output() {
    let doc: &[u8] = b"<html><head><meta charset=\"utf-8\"></head><body>\
        <a href=\"http://other.com/a\">one</a>\
        some longer text between the anchors that will straddle chunks\
        <img src=\"https://example.com/logo.png\">\
        </body></html>";

    let whole = rewrite_chunked(doc, doc.len()).await;
    for chunk_size in [1, 2, 3, 7, 19, 64] {
        let out = rewrite_chunked(doc, chunk_size).await;
        assert_eq!(out, whole, "chunk size {chunk_size}");
    }
}

#[tokio::test]
async fn tag_split_across_chunks_is_still_rewritten() {
    let doc = b"<body><a href=\"http://other.com/long/path/here\">x</a></body>";
    // split in the middle of the href value
    let out = rewrite_chunked(doc, 20).await;
    let text = String::from_utf8_lossy(&out);
    assert!(text.contains("href=\"/w/20201226101010mp_/http://other.com/long/path/here\""));
}

#[tokio::test]
async fn high_bytes_survive_byte_for_byte() {
    // ISO-8859-1 body: "café" as raw bytes, plus an untouched tag
    let doc: &[u8] = b"<body><p>caf\xe9</p></body>";
    let out = rewrite_chunked(doc, 4).await;
    // strip the insert at the byte level; the body is not valid UTF-8
    let needle = b"<!--I-->";
    let pos = out
        .windows(needle.len())
        .position(|w| w == needle)
        .expect("insert present");
    let mut without_insert = out[..pos].to_vec();
    without_insert.extend_from_slice(&out[pos + needle.len()..]);
    assert_eq!(without_insert, doc);
}

#[tokio::test]
async fn comments_and_doctype_pass_through() {
    let doc = b"<!DOCTYPE html><!-- keep me --><body>x</body>";
    let out = rewrite_chunked(doc, 9).await;
    let text = String::from_utf8_lossy(&out);
    assert!(text.starts_with("<!DOCTYPE html>"));
    assert!(text.contains("<!-- keep me -->"));
}

#[tokio::test]
async fn insert_is_not_duplicated_across_chunks() {
    let doc = b"<html><head><title>t</title></head><body><p>a</p><p>b</p></body></html>";
    for chunk_size in [3, 10, 100] {
        let out = rewrite_chunked(doc, chunk_size).await;
        let text = String::from_utf8_lossy(&out);
        assert_eq!(text.matches("<!--I-->").count(), 1, "chunk size {chunk_size}");
        // before the first in-head element
        assert!(text.starts_with("<html><head><!--I--><title>"));
    }
}

#[tokio::test]
async fn stream_error_is_surfaced_not_swallowed() {
    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/html"));
    let mut response = ArchiveResponse::new(
        Bytes::new(),
        StatusCode::OK,
        headers,
        "https://example.com/page",
        Utc::now(),
    );
    let stream = futures::stream::iter(vec![
        Ok(Bytes::from_static(b"<body>ok")),
        Err(std::io::Error::other("backing store went away")),
    ]);
    response.set_content(stream.boxed());

    let mut rewritten = HtmlRewriter::new(Arc::new(opts(None)))
        .rewrite(response)
        .expect("rewrite");
    assert!(rewritten.body_bytes().await.is_err());
}
