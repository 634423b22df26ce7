//! Top-frame document and head-insert rendering.
//!
//! A modifier-less replay URL asks for the outer shell around the replayed
//! page rather than the page itself. Depending on configuration that is a
//! redirect to an embedding app, a fetched template, or the built-in iframe
//! shell. The head insert is the bootstrap block the HTML rewriter injects
//! into every rewritten document.

use axum::body::Body as HttpBody;
use axum::http::{header, StatusCode};
use axum::response::Response;
use chrono::{DateTime, Utc};

use crate::collection::{Collection, DEFAULT_CSP};
use crate::error::Error;
use crate::util::{get_seconds_str, get_ts};

impl Collection {
    /// Build the top-frame response for `url` at `request_ts`.
    pub(crate) async fn make_top_frame(
        &self,
        url: &str,
        request_ts: &str,
    ) -> Result<Response, Error> {
        let base_url = if let Some(base) = &self.config.base_url {
            Some(base.clone())
        } else if !self.is_root {
            self.config
                .source_url
                .as_ref()
                .map(|source| format!("/?source={source}"))
        } else {
            None
        };

        // an embedding app owns the top frame; hand over via fragment params
        if let Some(base) = base_url {
            let params = url::form_urlencoded::Serializer::new(String::new())
                .append_pair("url", url)
                .append_pair("ts", request_ts)
                .append_pair("view", "replay")
                .finish();
            let resp = Response::builder()
                .status(StatusCode::FOUND)
                .header(header::LOCATION, format!("{base}#{params}"))
                .body(HttpBody::empty())?;
            return Ok(resp);
        }

        let content = if let Some(template_url) = &self.config.top_template_url {
            let template = self.client.get(template_url).send().await?.text().await?;
            template
                .replacen("$URL", url, 1)
                .replacen("$TS", request_ts, 1)
                .replacen("$PREFIX", &self.prefix, 1)
        } else {
            self.builtin_top_frame(url, request_ts)
        };

        let resp = Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, "text/html")
            .header(header::CONTENT_SECURITY_POLICY, DEFAULT_CSP)
            .body(HttpBody::from(content))?;
        Ok(resp)
    }

    fn builtin_top_frame(&self, url: &str, request_ts: &str) -> String {
        format!(
            r##"<!DOCTYPE html>
<html>
<head>
<style>
html, body
{{
  height: 100%;
  margin: 0px;
  padding: 0px;
  border: 0px;
  overflow: hidden;
}}

</style>
<script src='{static_prefix}wb_frame.js'> </script>

<script>
window.home = "{root_prefix}";
</script>

<script src='{static_prefix}default_banner.js'> </script>
<link rel='stylesheet' href='{static_prefix}default_banner.css'/>

</head>
<body style="margin: 0px; padding: 0px;">
<div id="wb_iframe_div">
<iframe id="replay_iframe" frameborder="0" seamless="seamless" scrolling="yes" class="wb_iframe" allow="autoplay; fullscreen"></iframe>
</div>
<script>
  var cframe = new ContentFrame({{"url": "{url}",
                                 "app_prefix": "{prefix}",
                                 "content_prefix": "{prefix}",
                                 "request_ts": "{request_ts}",
                                 "iframe": "#replay_iframe"}});

</script>
</body>
</html>
"##,
            static_prefix = self.static_prefix,
            root_prefix = self.root_prefix,
            prefix = self.prefix,
            url = url,
            request_ts = request_ts,
        )
    }
}

/// Everything the head insert needs, captured up front so the render closure
/// stays `'static` while the response body streams.
pub(crate) struct HeadInsertCtx {
    pub prefix: String,
    pub coll: String,
    pub static_prefix: String,
    pub request_ts: String,
    pub date: DateTime<Utc>,
    pub preset_cookie: Option<String>,
    pub is_live: bool,
}

impl HeadInsertCtx {
    /// Render the bootstrap block for `url`, or `None` when the document URL
    /// cannot be parsed (the document is then served without bootstrap).
    pub(crate) fn render(&self, url: &str) -> Option<String> {
        let parsed = match url::Url::parse(url) {
            Ok(parsed) => parsed,
            Err(e) => {
                tracing::warn!(url = %url, error = %e, "unparseable document URL, skipping head insert");
                return None;
            }
        };

        let prefix = &self.prefix;
        let request_ts = &self.request_ts;
        let top_url = format!(
            "{prefix}{request_ts}{}{url}",
            if request_ts.is_empty() { "" } else { "/" }
        );

        let seconds = get_seconds_str(&self.date);
        let timestamp = get_ts(&self.date);

        let scheme = if parsed.scheme() == "blob" {
            "https"
        } else {
            parsed.scheme()
        };
        let host = match (parsed.host_str(), parsed.port()) {
            (Some(h), Some(p)) => format!("{h}:{p}"),
            (Some(h), None) => h.to_string(),
            _ => String::new(),
        };

        let preset_cookie = self
            .preset_cookie
            .as_deref()
            .and_then(|c| serde_json::to_string(c).ok())
            .unwrap_or_else(|| "\"\"".to_string());

        let wombat_ts = if self.is_live { &timestamp } else { request_ts };

        Some(format!(
            r#"
<!-- WB Insert -->
<style>
body {{
  font-family: inherit;
  font-size: inherit;
}}
</style>
<script>
  wbinfo = {{}};
  wbinfo.top_url = "{top_url}";
  // Fast Top-Frame Redirect
  if (window == window.top && wbinfo.top_url) {{
    var loc = window.location.href.replace(window.location.hash, "");
    loc = decodeURI(loc);

    if (loc != decodeURI(wbinfo.top_url)) {{
        window.location.href = wbinfo.top_url + window.location.hash;
    }}
  }}
  wbinfo.url = "{url}";
  wbinfo.timestamp = "{timestamp}";
  wbinfo.request_ts = "{request_ts}";
  wbinfo.prefix = decodeURI("{prefix}");
  wbinfo.mod = "mp_";
  wbinfo.is_framed = true;
  wbinfo.is_live = {is_live};
  wbinfo.coll = "{coll}";
  wbinfo.proxy_magic = "";
  wbinfo.static_prefix = "{static_prefix}";
  wbinfo.enable_auto_fetch = true;
  wbinfo.presetCookie = {preset_cookie};
  wbinfo.isSW = true;
</script>
<script src='{static_prefix}wombat.js'> </script>
<script>
  wbinfo.wombat_ts = "{wombat_ts}";
  wbinfo.wombat_sec = "{seconds}";
  wbinfo.wombat_scheme = "{scheme}";
  wbinfo.wombat_host = "{host}";

  wbinfo.wombat_opts = {{}};

  if (window && window._WBWombatInit) {{
    window._WBWombatInit(wbinfo);
  }}
</script>
  "#,
            is_live = self.is_live,
            coll = self.coll,
            static_prefix = self.static_prefix,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> HeadInsertCtx {
        HeadInsertCtx {
            prefix: "/w/demo/".to_string(),
            coll: "demo".to_string(),
            static_prefix: "/static/".to_string(),
            request_ts: "20201226101010".to_string(),
            date: crate::util::ts_to_date("20201226101010").unwrap(),
            preset_cookie: None,
            is_live: false,
        }
    }

    #[test]
    fn insert_carries_replay_identity() {
        let out = ctx().render("https://example.com/page").unwrap();
        assert!(out.contains("wbinfo.url = \"https://example.com/page\";"));
        assert!(out.contains("wbinfo.top_url = \"/w/demo/20201226101010/https://example.com/page\";"));
        assert!(out.contains("wbinfo.request_ts = \"20201226101010\";"));
        assert!(out.contains("wbinfo.coll = \"demo\";"));
        assert!(out.contains("wbinfo.wombat_scheme = \"https\";"));
        assert!(out.contains("wbinfo.wombat_host = \"example.com\";"));
        assert!(out.contains("wbinfo.presetCookie = \"\";"));
    }

    #[test]
    fn blob_scheme_reports_https() {
        let out = ctx()
            .render("blob:https://example.com/2fe7d609-b4a7")
            .unwrap();
        assert!(out.contains("wbinfo.wombat_scheme = \"https\";"));
    }

    #[test]
    fn top_url_omits_slash_without_timestamp() {
        let mut c = ctx();
        c.request_ts = String::new();
        let out = c.render("https://example.com/").unwrap();
        assert!(out.contains("wbinfo.top_url = \"/w/demo/https://example.com/\";"));
    }

    #[test]
    fn preset_cookie_is_json_quoted() {
        let mut c = ctx();
        c.preset_cookie = Some("sid=\"x\"".to_string());
        let out = c.render("https://example.com/").unwrap();
        assert!(out.contains("wbinfo.presetCookie = \"sid=\\\"x\\\"\";"));
    }

    #[test]
    fn unparseable_url_skips_insert() {
        assert!(ctx().render("not a url").is_none());
    }
}
