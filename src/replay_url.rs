//! Replay URL grammar.
//!
//! A replay URL (after the collection prefix has been stripped) is
//! `<digits>?<mod>?(/|\||%7C|%7c)<target>`: an optional capture timestamp, an
//! optional purpose modifier (`mp_`, `im_`, `id_`, … or a `$`-prefixed scheme
//! tag), a separator, and the original target URL. An absent modifier means
//! the request is for the top frame, not the resource itself.

use std::sync::LazyLock;

use regex::Regex;

static REPLAY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d*)([a-z]+_|\$[a-z0-9:.-]+)?(?:/|\||%7C|%7c)(.+)")
        .expect("replay grammar regex")
});

/// A decoded replay URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayUrl {
    /// Capture timestamp digits; empty when the request is not pinned.
    pub timestamp: String,
    /// Purpose modifier including its trailing underscore (or `$`-scheme tag);
    /// empty means top-frame semantics.
    pub modifier: String,
    /// The original target URL.
    pub target: String,
}

impl ReplayUrl {
    /// Parse the remainder of a replay request against the grammar.
    /// Returns `None` on a grammar mismatch; the dispatcher then applies its
    /// absolute-scheme and bare-domain fallbacks.
    pub fn parse(remainder: &str) -> Option<ReplayUrl> {
        let caps = REPLAY_RE.captures(remainder)?;
        Some(ReplayUrl {
            timestamp: caps.get(1).map_or(String::new(), |m| m.as_str().to_string()),
            modifier: caps.get(2).map_or(String::new(), |m| m.as_str().to_string()),
            target: caps.get(3).map_or(String::new(), |m| m.as_str().to_string()),
        })
    }

    /// True when the absent modifier calls for the outer top-frame document.
    pub fn is_top_frame(&self) -> bool {
        self.modifier.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parts(s: &str) -> (String, String, String) {
        let u = ReplayUrl::parse(s).expect("should parse");
        (u.timestamp, u.modifier, u.target)
    }

    #[test]
    fn full_form_decodes_exactly() {
        let (ts, m, url) = parts("20201226101010mp_/http://example.com/");
        assert_eq!(ts, "20201226101010");
        assert_eq!(m, "mp_");
        assert_eq!(url, "http://example.com/");
    }

    #[test]
    fn separators_are_equivalent() {
        for sep in ["/", "|", "%7C", "%7c"] {
            let (ts, m, url) = parts(&format!("2020mp_{sep}https://x.com/y"));
            assert_eq!(ts, "2020");
            assert_eq!(m, "mp_");
            assert_eq!(url, "https://x.com/y");
        }
    }

    #[test]
    fn timestamp_only_is_top_frame() {
        let u = ReplayUrl::parse("20201226101010/http://example.com/").unwrap();
        assert_eq!(u.timestamp, "20201226101010");
        assert!(u.is_top_frame());
    }

    #[test]
    fn modifier_only() {
        let (ts, m, url) = parts("im_/https://example.com/img.png");
        assert_eq!(ts, "");
        assert_eq!(m, "im_");
        assert_eq!(url, "https://example.com/img.png");
    }

    #[test]
    fn dollar_scheme_modifier() {
        let (ts, m, url) = parts("2020$br:chrome/http://example.com/");
        assert_eq!(ts, "2020");
        assert_eq!(m, "$br:chrome");
        assert_eq!(url, "http://example.com/");
    }

    #[test]
    fn bare_domain_does_not_match() {
        assert!(ReplayUrl::parse("example.com").is_none());
    }

    #[test]
    fn missing_target_does_not_match() {
        assert!(ReplayUrl::parse("2020mp_/").is_none());
        assert!(ReplayUrl::parse("").is_none());
    }

    mod grammar_props {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn compose_then_parse_round_trips(
                ts in "[0-9]{0,14}",
                modifier in "[a-z]{1,5}_",
                url in "https?://[a-z0-9.]{1,20}/[a-z0-9/]{0,20}",
            ) {
                let composed = format!("{ts}{modifier}/{url}");
                let parsed = ReplayUrl::parse(&composed).expect("grammar match");
                prop_assert_eq!(parsed.timestamp, ts);
                prop_assert_eq!(parsed.modifier, modifier);
                prop_assert_eq!(parsed.target, url);
            }
        }
    }
}
