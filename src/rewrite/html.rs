//! Streaming HTML rewriter.
//!
//! Walks the tokenizer's tag/text sequence and applies per-tag, per-attribute
//! rewrite rules, tag morphing, security-attribute neutralization, and the
//! injected head insert, while re-emitting untouched markup byte-for-byte
//! from the recovery window. Output is produced lazily as input chunks are
//! pulled; only the recovery window is buffered, never the document.

use std::sync::{Arc, LazyLock};

use bytes::Bytes;
use futures::stream::BoxStream;
use futures::StreamExt;
use regex::Regex;

use crate::error::Error;
use crate::response::ArchiveResponse;
use crate::rewrite::tokenizer::{Attr, StartTag, Token, Tokenizer};
use crate::rewrite::window::ChunkWindow;
use crate::rewrite::RewriteOpts;
use crate::util::{decode_latin1, encode_latin1, starts_with_any};

const DEFMOD: &str = "mp_";

/// Attribute values that look like rewritable URLs.
const DATA_RW_PROTOCOLS: &[&str] = &["http://", "https://", "//"];

static META_REFRESH_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)([\d.]+\s*;\s*url\s*=\s*)(.+)").expect("meta refresh regex"));

/// Known legacy flash-embed URL transforms; a match morphs the `<object>`
/// into a modern `<iframe>` embed.
static FLASH_YOUTUBE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"youtube\.com/v/([^&]+)&").expect("flash embed regex"));

/// Page-specific legacy text rule: documents whose URL carries a
/// `:loadOrderID` query get the entity-escaped load-order id in their markup
/// patched to the one from the request URL.
static LOAD_ORDER_URL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[?&]:loadOrderID=(\d+)").expect("load order url regex"));

static LOAD_ORDER_TEXT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(loadOrderID&(?:quot;&)?#x[^;]+?;)(\d+)").expect("load order text regex")
});

/// A width/density descriptor ending a srcset candidate, e.g. ` 2x` or ` 640w`.
static SRCSET_DESC_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s[\d.]+[wx]$").expect("srcset descriptor regex"));

/// Per-tag attribute → modifier rule table. Presence gates the fallback URL
/// rewrite; the modifier names the request purpose of the referenced
/// resource.
fn tag_rules(tag: &str) -> &'static [(&'static str, &'static str)] {
    match tag {
        "a" => &[("href", DEFMOD)],
        "applet" => &[("codebase", "oe_"), ("archive", "oe_")],
        "area" => &[("href", DEFMOD)],
        "audio" => &[("src", "oe_")],
        "base" => &[("href", DEFMOD)],
        "blockquote" => &[("cite", DEFMOD)],
        "body" => &[("background", "im_")],
        "button" => &[("formaction", DEFMOD)],
        "command" => &[("icon", "im_")],
        "del" => &[("cite", DEFMOD)],
        "embed" => &[("src", "oe_")],
        "iframe" => &[("src", "if_")],
        "image" => &[("src", "im_"), ("xlink:href", "im_"), ("href", "im_")],
        "img" => &[("src", "im_"), ("srcset", "im_")],
        "ins" => &[("cite", DEFMOD)],
        "input" => &[("src", "im_"), ("formaction", DEFMOD)],
        "form" => &[("action", DEFMOD)],
        "frame" => &[("src", "fr_")],
        "link" => &[("href", "oe_")],
        "meta" => &[("content", DEFMOD)],
        "object" => &[("codebase", "oe_"), ("data", "oe_")],
        "param" => &[("value", "oe_")],
        "q" => &[("cite", DEFMOD)],
        "ref" => &[("href", "oe_")],
        "script" => &[("src", "js_"), ("xlink:href", "js_")],
        "source" => &[("src", "oe_"), ("srcset", "oe_")],
        "video" => &[("src", "oe_"), ("poster", "im_")],
        _ => &[],
    }
}

/// Element context carried through a document, including a pending tag-name
/// morph whose close tag must be matched against the original name.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Context {
    None,
    InScript { rewritable: bool },
    InStyle,
    Morphed { original: String, replacement: String },
}

struct ActiveTextRule {
    order_id: String,
}

/// One document's streaming rewrite.
pub struct HtmlRewriter {
    opts: Arc<RewriteOpts>,
    rule: Option<ActiveTextRule>,
}

impl HtmlRewriter {
    pub fn new(opts: Arc<RewriteOpts>) -> Self {
        let rule = LOAD_ORDER_URL_RE
            .captures(&opts.base_url)
            .map(|caps| ActiveTextRule {
                order_id: caps[1].to_string(),
            });
        Self { opts, rule }
    }

    /// Replace the response body with the rewritten stream. A response with
    /// no available body is returned unchanged.
    pub fn rewrite(self, mut response: ArchiveResponse) -> Result<ArchiveResponse, Error> {
        let Some(input) = response.take_body_stream() else {
            return Ok(response);
        };

        let state = DocState {
            rewriter: self,
            input,
            tokenizer: Tokenizer::new(),
            window: ChunkWindow::new(),
            context: Context::None,
            insert_added: false,
            has_data: false,
            done: false,
        };

        let stream = futures::stream::unfold(state, |mut st| async move {
            loop {
                if st.done {
                    return None;
                }
                match st.input.next().await {
                    Some(Ok(chunk)) => {
                        if chunk.is_empty() {
                            continue;
                        }
                        st.has_data = true;
                        st.window.push(chunk.clone());
                        st.tokenizer.feed(&chunk);
                        let out = st.pump();
                        if out.is_empty() {
                            continue;
                        }
                        return Some((Ok(Bytes::from(out)), st));
                    }
                    Some(Err(e)) => {
                        st.done = true;
                        return Some((Err(e), st));
                    }
                    None => {
                        st.done = true;
                        let out = st.finish();
                        if out.is_empty() {
                            return None;
                        }
                        return Some((Ok(Bytes::from(out)), st));
                    }
                }
            }
        });

        response.set_content(stream.boxed());
        Ok(response)
    }

    fn rewrite_url(&self, url: &str) -> String {
        if !self.opts.url_rewrite {
            return url.to_string();
        }
        self.opts.transforms.urls.rewrite_url(url, false)
    }

    /// Apply the first-match attribute precedence to a start tag. Returns
    /// true when anything changed and the tag must be re-serialized.
    fn rewrite_tag_and_attrs(&self, tag: &mut StartTag) -> bool {
        let rules = tag_rules(&tag.name);
        let tx = &self.opts.transforms;
        let is_url = |v: &str| starts_with_any(v, DATA_RW_PROTOCOLS);

        let object_type = (tag.name == "object")
            .then(|| tag.get_attr("type").map(str::to_string))
            .flatten();
        let meta_equiv = (tag.name == "meta")
            .then(|| tag.get_attr("http-equiv").map(|v| v.to_ascii_lowercase()))
            .flatten();
        let meta_name = (tag.name == "meta")
            .then(|| tag.get_attr("name").map(str::to_string))
            .flatten();

        let tag_name = tag.name.clone();
        let mut morph_to: Option<&'static str> = None;
        let mut extra_attrs: Vec<Attr> = Vec::new();
        let mut modified = false;

        let set = |attr: &mut Attr, new: String, modified: &mut bool| {
            if attr.value != new {
                attr.value = new;
                *modified = true;
            }
        };

        for attr in &mut tag.attrs {
            let name = attr.name.clone();
            let value = attr.value.clone();

            if name.starts_with("on")
                && value.starts_with("javascript:")
                && name.as_bytes().get(2) != Some(&b'-')
            {
                let body = &value["javascript:".len()..];
                set(
                    attr,
                    format!("javascript:{}", tx.js.rewrite_js(body, true)),
                    &mut modified,
                );
            } else if name == "style" {
                set(attr, tx.css.rewrite_css(&value), &mut modified);
            } else if name == "background" {
                set(attr, self.rewrite_url(&value), &mut modified);
            } else if name == "srcset" {
                set(attr, self.rewrite_srcset(&value), &mut modified);
            } else if name == "crossorigin" || name == "integrity" {
                // the rewritten bytes no longer match; neutralize the check
                attr.name = format!("_{name}");
                modified = true;
            } else if tag_name == "meta" && name == "content" {
                if meta_equiv.as_deref() == Some("content-security-policy") {
                    attr.name = format!("_{name}");
                    modified = true;
                } else if meta_equiv.as_deref() == Some("refresh") {
                    let new = META_REFRESH_RE
                        .replace(&value, |caps: &regex::Captures| {
                            format!("{}{}", &caps[1], self.rewrite_url(&caps[2]))
                        })
                        .into_owned();
                    set(attr, new, &mut modified);
                } else if meta_name.as_deref() == Some("referrer") {
                    set(attr, "no-referrer-when-downgrade".to_string(), &mut modified);
                } else if is_url(&value) {
                    set(attr, self.rewrite_url(&value), &mut modified);
                }
            } else if tag_name == "param" && is_url(&value) {
                set(attr, self.rewrite_url(&value), &mut modified);
            } else if name.starts_with("data-") && is_url(&value) {
                set(attr, self.rewrite_url(&value), &mut modified);
            } else if tag_name == "base" && name == "href" {
                match tx.urls.update_base_url(&value) {
                    Ok(new) => set(attr, new, &mut modified),
                    Err(e) => {
                        tracing::warn!(href = %value, error = %e, "invalid <base> href, left unrewritten");
                    }
                }
            } else if tag_name == "script" && name == "src" {
                let new = self.rewrite_url(&value);
                if new == value {
                    // non-rewritable reference: keep the original aside and
                    // force a placeholder so it never hits the live web
                    extra_attrs.push(Attr {
                        name: "__wb_orig_src".to_string(),
                        value: value.clone(),
                        has_value: true,
                    });
                    attr.value = tx.urls.rewrite_url(&value, true);
                    modified = true;
                } else {
                    set(attr, new, &mut modified);
                }
            } else if tag_name == "object" && name == "data" {
                match object_type.as_deref() {
                    Some("application/pdf") => {
                        attr.name = "src".to_string();
                        morph_to = Some("iframe");
                        modified = true;
                    }
                    Some("application/x-shockwave-flash") => {
                        let new = FLASH_YOUTUBE_RE.replace(&value, "youtube.com/embed/$1?");
                        if new != value {
                            attr.name = "src".to_string();
                            let rewritten = self.rewrite_url(&new);
                            attr.value = rewritten;
                            morph_to = Some("iframe");
                            modified = true;
                        }
                    }
                    _ => {}
                }
            } else if name == "href" || name == "src" {
                set(attr, self.rewrite_url(&value), &mut modified);
            } else if rules.iter().any(|(a, _)| *a == name) {
                set(attr, self.rewrite_url(&value), &mut modified);
            }
        }

        tag.attrs.extend(extra_attrs);
        if let Some(new_name) = morph_to {
            tag.name = new_name.to_string();
        }
        modified
    }

    /// Rewrite only the URL portion of each srcset candidate, rejoining with
    /// `", "`.
    fn rewrite_srcset(&self, value: &str) -> String {
        let mut out = Vec::new();
        for candidate in split_srcset(value) {
            let candidate = candidate.trim();
            if candidate.is_empty() {
                continue;
            }
            let mut parts: Vec<String> = candidate.split_whitespace().map(str::to_string).collect();
            if let Some(first) = parts.first_mut() {
                *first = self.rewrite_url(first);
            }
            out.push(parts.join(" "));
        }
        out.join(", ")
    }

    /// Apply the page-specific text rule; `None` means the text is untouched.
    fn rewrite_html_text(&self, text: &str) -> Option<String> {
        let rule = self.rule.as_ref()?;
        let new = LOAD_ORDER_TEXT_RE.replace_all(text, |caps: &regex::Captures| {
            format!("{}{}", &caps[1], rule.order_id)
        });
        match new {
            std::borrow::Cow::Borrowed(_) => None,
            std::borrow::Cow::Owned(changed) => Some(changed),
        }
    }
}

/// Split a srcset value into candidates. URLs may legally contain commas, so
/// a comma only separates candidates when the text before it ends in a
/// width/density descriptor, or the comma is followed by whitespace or the
/// start of a new absolute URL.
fn split_srcset(value: &str) -> Vec<&str> {
    let mut candidates = Vec::new();
    let mut start = 0;
    for (i, b) in value.bytes().enumerate() {
        if b != b',' {
            continue;
        }
        let before = &value[start..i];
        let after = &value[i + 1..];
        if SRCSET_DESC_RE.is_match(before)
            || after.starts_with(char::is_whitespace)
            || after.starts_with("http:")
            || after.starts_with("https:")
        {
            candidates.push(before);
            start = i + 1;
        }
    }
    candidates.push(&value[start..]);
    candidates
}

/// Per-document rewrite state driven by the output stream's pulls.
struct DocState {
    rewriter: HtmlRewriter,
    input: BoxStream<'static, std::io::Result<Bytes>>,
    tokenizer: Tokenizer,
    window: ChunkWindow,
    context: Context,
    insert_added: bool,
    has_data: bool,
    done: bool,
}

impl DocState {
    fn pump(&mut self) -> Vec<u8> {
        let mut out = Vec::new();
        while let Some(token) = self.tokenizer.next_token() {
            self.process(token, &mut out);
        }
        out
    }

    fn finish(&mut self) -> Vec<u8> {
        self.tokenizer.finish();
        let mut out = self.pump();
        // a document with no qualifying start tag still gets its insert
        self.add_insert(&mut out);
        out
    }

    fn add_insert(&mut self, out: &mut Vec<u8>) {
        if self.insert_added || !self.has_data {
            return;
        }
        if let Some(insert_fn) = &self.rewriter.opts.head_insert {
            if let Some(insert) = insert_fn(&self.rewriter.opts.base_url) {
                out.extend_from_slice(&encode_latin1(&insert));
            }
            self.insert_added = true;
        }
    }

    fn process(&mut self, token: Token, out: &mut Vec<u8>) {
        let span = token.span();
        match token {
            Token::Start(mut tag) => {
                let original = tag.name.clone();
                let modified = self.rewriter.rewrite_tag_and_attrs(&mut tag);

                if !self.insert_added && tag.name != "head" && tag.name != "html" {
                    self.has_data = true;
                    self.add_insert(out);
                }

                if modified {
                    out.extend_from_slice(&encode_latin1(&tag.serialize()));
                } else {
                    out.extend_from_slice(&self.window.slice(span.start, span.end));
                }

                match tag.name.as_str() {
                    "script" if !tag.self_closing => {
                        let rewritable = tag.get_attr("type").map_or(true, |t| {
                            t.contains("javascript") || t.contains("ecmascript")
                        });
                        self.context = Context::InScript { rewritable };
                    }
                    "style" if !tag.self_closing => {
                        self.context = Context::InStyle;
                    }
                    _ => {}
                }

                if tag.name != original {
                    self.context = Context::Morphed {
                        original,
                        replacement: tag.name.clone(),
                    };
                }
            }
            Token::End(end) => match std::mem::replace(&mut self.context, Context::None) {
                Context::InScript { .. } if end.name == "script" => {
                    out.extend_from_slice(&self.window.slice(span.start, span.end));
                }
                Context::InStyle if end.name == "style" => {
                    out.extend_from_slice(&self.window.slice(span.start, span.end));
                }
                Context::Morphed {
                    original,
                    replacement,
                } if end.name == original => {
                    out.extend_from_slice(&encode_latin1(&format!("</{replacement}>")));
                }
                other => {
                    // not ours to close; restore the context
                    self.context = other;
                    out.extend_from_slice(&self.window.slice(span.start, span.end));
                }
            },
            Token::Text(text) => {
                let tx = &self.rewriter.opts.transforms;
                match &self.context {
                    Context::InScript { rewritable: true } => {
                        out.extend_from_slice(&encode_latin1(&tx.js.rewrite_js(&text.text, false)));
                    }
                    Context::InScript { rewritable: false } => {
                        out.extend_from_slice(&encode_latin1(&text.text));
                    }
                    Context::InStyle => {
                        out.extend_from_slice(&encode_latin1(&tx.css.rewrite_css(&text.text)));
                    }
                    _ => {
                        // if the run started before the tokenizer's watermark,
                        // its buffer lost the raw bytes; the window has them
                        let raw = if text.span.start < self.tokenizer.dropped_bytes() {
                            self.window.slice(span.start, span.end)
                        } else {
                            encode_latin1(&text.text)
                        };
                        match self.rewriter.rewrite_html_text(&decode_latin1(&raw)) {
                            Some(changed) => out.extend_from_slice(&encode_latin1(&changed)),
                            None => out.extend_from_slice(&raw),
                        }
                    }
                }
            }
            Token::Raw(_) => {
                out.extend_from_slice(&self.window.slice(span.start, span.end));
            }
        }
        self.window.evict_before(span.end);
    }
}
