//! Collection request dispatching.
//!
//! A [`Collection`] owns one archive's replay URL space. It decodes the
//! replay URL grammar, resolves the target against the capture store (or the
//! `srcdoc:`/`blob:` pseudo-schemes), runs the rewriter, and builds the final
//! HTTP response.

pub mod topframe;

use std::sync::Arc;

use axum::body::Body as HttpBody;
use axum::http::{header, HeaderMap, HeaderValue, Method, StatusCode};
use axum::response::Response;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bytes::Bytes;
use chrono::Utc;
use percent_encoding::percent_decode_str;

use crate::error::Error;
use crate::notify::AuthNotifier;
use crate::replay_url::ReplayUrl;
use crate::response::ArchiveResponse;
use crate::rewrite::{HeadInsertFn, RewriteOpts, Rewriter, TransformFactory};
use crate::store::{ResourceQuery, Store, StoreError};
use crate::util::{not_found, starts_with_any};

use topframe::HeadInsertCtx;

/// Replay-friendly CSP attached to every rewritten response (except under
/// the identity modifier): same-origin plus the inline/eval/data allowances
/// archived pages need, with form posts confined to the archive.
pub const DEFAULT_CSP: &str = "default-src 'unsafe-eval' 'unsafe-inline' 'self' data: blob: mediastream: ws: wss: ; form-action 'self'";

/// Header carrying cookies the store wants preset into the replayed page.
const PRESET_COOKIE_HEADER: &str = "x-wabac-preset-cookie";

/// Per-collection configuration.
#[derive(Debug, Clone, Default)]
pub struct CollectionConfig {
    /// Root collections serve directly under the main prefix and accept bare
    /// domains as replay targets.
    pub root: bool,
    /// Where this archive was loaded from; enables the embedding-app
    /// top-frame redirect and auth notifications.
    pub source_url: Option<String>,
    /// Embedding app URL that owns the top frame.
    pub base_url: Option<String>,
    /// Fetchable template for the top frame ($URL/$TS/$PREFIX placeholders).
    pub top_template_url: Option<String>,
    /// Response bodies are stored content-encoded and need decoding before
    /// rewrite.
    pub decode: bool,
}

/// URL-space layout the collection serves under.
#[derive(Debug, Clone)]
pub struct Prefixes {
    /// Prefix all collections hang off (`/w/`).
    pub main: String,
    /// App root for top-frame navigation; defaults to `main`.
    pub root: Option<String>,
    /// Where the replay client scripts are served from.
    pub static_prefix: String,
}

/// The request surface the dispatcher consumes.
#[derive(Debug, Clone)]
pub struct ReplayRequest {
    /// Full request path (plus query) as received.
    pub url: String,
    pub method: Method,
    pub headers: HeaderMap,
}

impl ReplayRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: Method::GET,
            headers: HeaderMap::new(),
        }
    }
}

/// One replayable archive bound into a URL prefix.
pub struct Collection {
    pub name: String,
    pub(crate) config: CollectionConfig,
    pub(crate) is_root: bool,
    /// This collection's own prefix (`<main>[<name>/]`).
    pub prefix: String,
    pub(crate) root_prefix: String,
    pub(crate) static_prefix: String,
    store: Arc<dyn Store>,
    transforms: Arc<dyn TransformFactory>,
    notifier: Arc<dyn AuthNotifier>,
    pub(crate) client: reqwest::Client,
}

impl Collection {
    pub fn new(
        name: impl Into<String>,
        store: Arc<dyn Store>,
        config: CollectionConfig,
        prefixes: Prefixes,
        transforms: Arc<dyn TransformFactory>,
        notifier: Arc<dyn AuthNotifier>,
    ) -> Self {
        let name = name.into();
        let root_prefix = prefixes.root.unwrap_or_else(|| prefixes.main.clone());
        let mut prefix = prefixes.main;
        let is_root = config.root;
        if !is_root {
            prefix.push_str(&name);
            prefix.push('/');
        }
        Self {
            name,
            config,
            is_root,
            prefix,
            root_prefix,
            static_prefix: prefixes.static_prefix,
            store,
            transforms,
            notifier,
            client: reqwest::Client::new(),
        }
    }

    /// Handle one request. `Ok(None)` means the URL is outside this
    /// collection's prefix and the caller should try the next collection.
    pub async fn handle_request(&self, request: &ReplayRequest) -> Result<Option<Response>, Error> {
        let Some(remainder) = request.url.strip_prefix(&self.prefix) else {
            return Ok(None);
        };

        if remainder.is_empty() {
            return Ok(Some(self.page_list().await?));
        }

        let (request_ts, modifier, mut request_url) = match ReplayUrl::parse(remainder) {
            Some(decoded) => (decoded.timestamp, decoded.modifier, decoded.target),
            None if starts_with_any(remainder, &["https:", "http:", "blob:"]) => {
                (String::new(), String::new(), remainder.to_string())
            }
            None if self.is_root => {
                (String::new(), String::new(), format!("https://{remainder}"))
            }
            None => {
                return Ok(Some(not_found(&format!(
                    "Replay URL {remainder} not found"
                ))));
            }
        };

        if modifier.is_empty() {
            return Ok(Some(self.make_top_frame(&request_url, &request_ts).await?));
        }

        // a fragment is client-side only; never part of the lookup key
        if let Some(hash) = request_url.find('#') {
            if hash > 0 {
                request_url.truncate(hash);
            }
        }

        let query = ResourceQuery {
            url: request_url.clone(),
            method: request.method.clone(),
            timestamp: request_ts.clone(),
            headers: request.headers.clone(),
        };

        let lookup = if let Some(base64) = request_url.strip_prefix("srcdoc:") {
            self.srcdoc_response(&request_url, base64).map(Some)
        } else if request_url.starts_with("blob:") {
            self.blob_response(&request_url).await.map(Some)
        } else {
            if let Some(redirect) = self.check_slash(&request_url, &request_ts, &modifier)? {
                return Ok(Some(redirect));
            }
            self.store.get_resource(&query, &self.prefix).await
        };

        let response = match lookup {
            Ok(response) => response,
            Err(StoreError::AuthNeeded) => {
                if let Some(source) = &self.config.source_url {
                    self.notifier.notify_auth_needed(source, &self.name).await;
                }
                return Ok(Some(not_found(
                    "<p>Sorry, this URL requires authentication from the source.</p>",
                )));
            }
            Err(StoreError::Other(e)) => {
                tracing::warn!(url = %request_url, error = %e, "store lookup failed");
                None
            }
        };

        let Some(mut response) = response else {
            let msg = format!(
                "<p>Sorry, the URL <b>{request_url}</b> is not in this archive.</p>\n\
                 <p><a target=\"_blank\" href=\"{request_url}\">Try Live Version?</a></p>"
            );
            return Ok(Some(not_found(&msg)));
        };

        if !response.no_rw {
            let no_rewrite = modifier == "id_" || modifier == "wkrf_";
            let prefix = format!("{}{}{}/", self.prefix, request_ts, modifier);

            let ctx = HeadInsertCtx {
                prefix: self.prefix.clone(),
                coll: self.name.clone(),
                static_prefix: self.static_prefix.clone(),
                request_ts: request_ts.clone(),
                date: response.date,
                preset_cookie: response
                    .headers
                    .get(PRESET_COOKIE_HEADER)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string),
                is_live: response.is_live,
            };
            let head_insert: HeadInsertFn = Arc::new(move |url| ctx.render(url));

            let opts = RewriteOpts {
                base_url: request_url.clone(),
                response_url: response.url.clone(),
                prefix: prefix.clone(),
                head_insert: Some(head_insert),
                url_rewrite: !no_rewrite,
                content_rewrite: !no_rewrite,
                decode: self.config.decode,
                transforms: self.transforms.for_document(&prefix, &request_url),
            };

            response = Rewriter::new(opts).rewrite(response).await?;

            if modifier != "id_" {
                response.headers.append(
                    header::CONTENT_SECURITY_POLICY,
                    HeaderValue::from_static(DEFAULT_CSP),
                );
            }
        }

        if let Some(range) = request
            .headers
            .get(header::RANGE)
            .and_then(|v| v.to_str().ok())
        {
            // a full-range request is a plain 200
            if response.status == StatusCode::OK && range != "bytes=0-" {
                response.set_range(range);
            }
        }

        Ok(Some(response.make_response().await?))
    }

    async fn page_list(&self) -> Result<Response, Error> {
        let mut content = String::from("<html><body><h2>Available Pages</h2><ul>");

        for page in self.store.get_all_pages().await? {
            let mut href = self.prefix.clone();
            if let Some(date) = page.date.as_deref().filter(|d| !d.is_empty()) {
                href.push_str(date);
                href.push('/');
            }
            href.push_str(&page.url);
            content.push_str(&format!("<li><a href=\"{href}\">{}</a></li>", page.url));
        }

        content.push_str("</ul></body></html>");

        let resp = Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, "text/html")
            .body(HttpBody::from(content))?;
        Ok(resp)
    }

    /// Redirect to the slash-normalized form of a bare-domain target so the
    /// address bar matches the canonical capture URL.
    fn check_slash(
        &self,
        request_url: &str,
        request_ts: &str,
        modifier: &str,
    ) -> Result<Option<Response>, Error> {
        let Ok(parsed) = url::Url::parse(request_url) else {
            return Ok(None);
        };
        if parsed.path() == "/" && parsed.as_str() != request_url {
            let mut redirect = format!("{}{request_ts}{modifier}", self.prefix);
            if !request_ts.is_empty() || !modifier.is_empty() {
                redirect.push('/');
            }
            redirect.push_str(parsed.as_str());
            let resp = Response::builder()
                .status(StatusCode::MOVED_PERMANENTLY)
                .header(header::LOCATION, redirect)
                .body(HttpBody::empty())?;
            return Ok(Some(resp));
        }
        Ok(None)
    }

    /// Decode an inline `srcdoc:` document: base64, then percent-decoding.
    /// Never consults the store.
    fn srcdoc_response(&self, url: &str, base64: &str) -> Result<ArchiveResponse, StoreError> {
        let decoded = BASE64.decode(base64).map_err(anyhow::Error::from)?;
        let text = percent_decode_str(&crate::util::decode_latin1(&decoded))
            .decode_utf8()
            .map_err(anyhow::Error::from)?
            .into_owned();

        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/html"));
        Ok(ArchiveResponse::new(
            Bytes::from(text),
            StatusCode::OK,
            headers,
            url,
            Utc::now(),
        ))
    }

    /// Fetch a live `blob:` URL from the hosting runtime. XHTML is
    /// renormalized to HTML so the rewriter picks it up.
    async fn blob_response(&self, url: &str) -> Result<ArchiveResponse, StoreError> {
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(anyhow::Error::from)?;

        let status = resp.status();
        let mut headers = resp.headers().clone();
        if headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            == Some("application/xhtml+xml")
        {
            headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/html"));
        }

        let payload = resp.bytes().await.map_err(anyhow::Error::from)?;
        Ok(ArchiveResponse::new(
            payload,
            status,
            headers,
            url,
            Utc::now(),
        ))
    }
}
