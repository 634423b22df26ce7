//! Response rewriting.
//!
//! The streaming HTML rewriter lives in [`html`]; the URL/JS/CSS text-rule
//! engines are external collaborators consumed through the traits below. The
//! [`Rewriter`] facade picks the transform for a response's content type and
//! replaces its body in place.

pub mod html;
pub mod tokenizer;
pub mod window;

use std::sync::Arc;

use crate::error::Error;
use crate::response::ArchiveResponse;
use crate::util::decode_latin1;

pub use html::HtmlRewriter;

/// URL rewriting engine.
pub trait UrlRewriter: Send + Sync {
    /// Rewrite a URL for replay under the document's prefix. With
    /// `force_missing`, an otherwise non-rewritable URL is still pointed at
    /// the archive so a broken reference never resolves against the live web.
    fn rewrite_url(&self, url: &str, force_missing: bool) -> String;

    /// Rewrite a `<base href>` value, preserving whether the original was
    /// relative or absolute (a `<base>` changes the resolution root for
    /// everything after it).
    fn update_base_url(&self, href: &str) -> anyhow::Result<String>;
}

/// JS rewriting engine. Classic scripts get a lexical-scope shim guarding
/// `this`/`eval`/global references; module sources import replay-proxy
/// globals instead.
pub trait JsRewriter: Send + Sync {
    fn rewrite_js(&self, src: &str, inline: bool) -> String;
}

/// CSS rewriting engine.
pub trait CssRewriter: Send + Sync {
    fn rewrite_css(&self, css: &str) -> String;
}

/// The per-document transform set handed to the rewriter.
#[derive(Clone)]
pub struct DocTransforms {
    pub urls: Arc<dyn UrlRewriter>,
    pub js: Arc<dyn JsRewriter>,
    pub css: Arc<dyn CssRewriter>,
}

/// Builds transform sets bound to a document's resource prefix and base URL.
pub trait TransformFactory: Send + Sync {
    fn for_document(&self, prefix: &str, base_url: &str) -> DocTransforms;
}

/// Head-insert builder: given the document URL, returns the bootstrap block
/// to inject, or `None` to skip injection.
pub type HeadInsertFn = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Per-document rewrite configuration.
pub struct RewriteOpts {
    /// The document's own (request) URL; drives page-specific text rules and
    /// the head insert.
    pub base_url: String,
    /// URL the archived response was actually captured under.
    pub response_url: String,
    /// Resource prefix for rewritten references (`<prefix><ts><mod>/`).
    pub prefix: String,
    pub head_insert: Option<HeadInsertFn>,
    /// False for identity/worker-raw modifiers: URLs are left untouched.
    pub url_rewrite: bool,
    /// False for identity/worker-raw modifiers: content is left untouched.
    pub content_rewrite: bool,
    /// Response bodies require content-decoding before rewriting.
    pub decode: bool,
    pub transforms: DocTransforms,
}

/// Content-type dispatching facade over the transform engines.
pub struct Rewriter {
    opts: Arc<RewriteOpts>,
}

impl Rewriter {
    pub fn new(opts: RewriteOpts) -> Self {
        Self {
            opts: Arc::new(opts),
        }
    }

    /// Rewrite the response body in place. A response with no available body,
    /// or one whose content type has no transform, is returned unchanged.
    pub async fn rewrite(&self, mut response: ArchiveResponse) -> Result<ArchiveResponse, Error> {
        if !self.opts.content_rewrite {
            return Ok(response);
        }

        let content_type = response
            .headers
            .get(axum::http::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_ascii_lowercase();

        if content_type.starts_with("text/html") {
            return HtmlRewriter::new(self.opts.clone()).rewrite(response);
        }

        if content_type.starts_with("text/css") {
            let body = response.body_bytes().await?;
            let rewritten = self.opts.transforms.css.rewrite_css(&decode_latin1(&body));
            response.set_content(one_shot(rewritten));
            return Ok(response);
        }

        if content_type.contains("javascript") || content_type.contains("ecmascript") {
            let body = response.body_bytes().await?;
            let rewritten = self
                .opts
                .transforms
                .js
                .rewrite_js(&decode_latin1(&body), false);
            response.set_content(one_shot(rewritten));
            return Ok(response);
        }

        Ok(response)
    }
}

fn one_shot(text: String) -> futures::stream::BoxStream<'static, std::io::Result<bytes::Bytes>> {
    use futures::StreamExt;
    let bytes = bytes::Bytes::from(crate::util::encode_latin1(&text));
    futures::stream::once(async move { Ok(bytes) }).boxed()
}

/// No-op transforms: every engine returns its input. Used by tests and as a
/// stand-in when no rule engine is wired up.
#[derive(Debug, Default, Clone)]
pub struct NoopTransforms;

impl UrlRewriter for NoopTransforms {
    fn rewrite_url(&self, url: &str, _force_missing: bool) -> String {
        url.to_string()
    }

    fn update_base_url(&self, href: &str) -> anyhow::Result<String> {
        Ok(href.to_string())
    }
}

impl JsRewriter for NoopTransforms {
    fn rewrite_js(&self, src: &str, _inline: bool) -> String {
        src.to_string()
    }
}

impl CssRewriter for NoopTransforms {
    fn rewrite_css(&self, css: &str) -> String {
        css.to_string()
    }
}

impl TransformFactory for NoopTransforms {
    fn for_document(&self, _prefix: &str, _base_url: &str) -> DocTransforms {
        let shared = Arc::new(NoopTransforms);
        DocTransforms {
            urls: shared.clone(),
            js: shared.clone(),
            css: shared,
        }
    }
}

/// Prefix-joining URL rewriter: absolute and scheme-relative URLs are pointed
/// under the document prefix, everything else is left alone. This is the
/// transform the demo server runs with; real deployments plug in a full rule
/// engine.
#[derive(Debug, Clone)]
pub struct PrefixRewriter {
    pub prefix: String,
}

impl UrlRewriter for PrefixRewriter {
    fn rewrite_url(&self, url: &str, force_missing: bool) -> String {
        let rewritable = url.starts_with("http://") || url.starts_with("https://") || url.starts_with("//");
        if rewritable || force_missing {
            format!("{}{}", self.prefix, url)
        } else {
            url.to_string()
        }
    }

    fn update_base_url(&self, href: &str) -> anyhow::Result<String> {
        match url::Url::parse(href) {
            Ok(_) => Ok(self.rewrite_url(href, false)),
            Err(url::ParseError::RelativeUrlWithoutBase) => Ok(href.to_string()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Demo transform factory wrapping [`PrefixRewriter`] with no-op JS/CSS.
#[derive(Debug, Default, Clone)]
pub struct PrefixTransforms;

impl TransformFactory for PrefixTransforms {
    fn for_document(&self, prefix: &str, _base_url: &str) -> DocTransforms {
        let noop = Arc::new(NoopTransforms);
        DocTransforms {
            urls: Arc::new(PrefixRewriter {
                prefix: prefix.to_string(),
            }),
            js: noop.clone(),
            css: noop,
        }
    }
}
