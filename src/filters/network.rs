use std::fmt;

use bitflags::bitflags;
use once_cell::sync::{Lazy, OnceCell};
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

use crate::filters::domains::DomainSpec;
use crate::filters::{Filter, OPTIONS_RE};

bitflags! {
    /// Request types a filter applies to. Every recognized `$type` option
    /// gets its own bit.
    #[derive(Serialize, Deserialize)]
    pub struct ContentType: u32 {
        const OTHER = 1 << 0;
        const SCRIPT = 1 << 1;
        const IMAGE = 1 << 2;
        const STYLESHEET = 1 << 3;
        const OBJECT = 1 << 4;
        const SUBDOCUMENT = 1 << 5;
        const DOCUMENT = 1 << 6;
        const XBL = 1 << 7;
        const PING = 1 << 8;
        const XMLHTTPREQUEST = 1 << 9;
        const OBJECT_SUBREQUEST = 1 << 10;
        const DTD = 1 << 11;
        const MEDIA = 1 << 12;
        const FONT = 1 << 13;
        const BACKGROUND = 1 << 14;
        const POPUP = 1 << 15;
        const ELEMHIDE = 1 << 16;

        /// What an unqualified filter applies to: everything except the
        /// types that must be requested explicitly.
        const DEFAULT = Self::OTHER.bits
            | Self::SCRIPT.bits
            | Self::IMAGE.bits
            | Self::STYLESHEET.bits
            | Self::OBJECT.bits
            | Self::SUBDOCUMENT.bits
            | Self::DOCUMENT.bits
            | Self::XBL.bits
            | Self::PING.bits
            | Self::XMLHTTPREQUEST.bits
            | Self::OBJECT_SUBREQUEST.bits
            | Self::DTD.bits
            | Self::MEDIA.bits
            | Self::FONT.bits
            | Self::BACKGROUND.bits;
    }
}

impl ContentType {
    /// Resolves an uppercase type name (option names already have `-`
    /// mapped to `_`). Unknown names resolve to the empty mask, which never
    /// matches anything.
    pub fn from_name(name: &str) -> ContentType {
        match name {
            "OTHER" => ContentType::OTHER,
            "SCRIPT" => ContentType::SCRIPT,
            "IMAGE" => ContentType::IMAGE,
            "STYLESHEET" => ContentType::STYLESHEET,
            "OBJECT" => ContentType::OBJECT,
            "SUBDOCUMENT" => ContentType::SUBDOCUMENT,
            "DOCUMENT" => ContentType::DOCUMENT,
            "XBL" => ContentType::XBL,
            "PING" => ContentType::PING,
            "XMLHTTPREQUEST" => ContentType::XMLHTTPREQUEST,
            "OBJECT_SUBREQUEST" => ContentType::OBJECT_SUBREQUEST,
            "DTD" => ContentType::DTD,
            "MEDIA" => ContentType::MEDIA,
            "FONT" => ContentType::FONT,
            "BACKGROUND" => ContentType::BACKGROUND,
            "POPUP" => ContentType::POPUP,
            "ELEMHIDE" => ContentType::ELEMHIDE,
            _ => ContentType::empty(),
        }
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:b}", self.bits)
    }
}

/// Third-party restriction of a filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ThirdParty {
    /// `$third-party`: only third-party requests.
    Yes,
    /// `$~third-party`: only first-party requests.
    No,
    /// No option given.
    Any,
}

impl ThirdParty {
    #[inline]
    fn allows(self, third_party: bool) -> bool {
        match self {
            ThirdParty::Yes => third_party,
            ThirdParty::No => !third_party,
            ThirdParty::Any => true,
        }
    }
}

/// State shared by blocking and whitelist filters: the pattern, its
/// compiled form, and the gating options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegExpData {
    pub text: String,
    pattern: String,
    pub content_type: ContentType,
    pub match_case: bool,
    pub third_party: ThirdParty,
    pub(crate) domains: DomainSpec,
    #[serde(skip)]
    regex: OnceCell<Regex>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockingFilter {
    pub rule: RegExpData,
    pub collapse: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhitelistFilter {
    pub rule: RegExpData,
    pub site_keys: Vec<String>,
}

static SCHEME_ANCHOR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\|?[\w\-]+:").unwrap());
static WILDCARD_RUN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\*+").unwrap());
// Escape the regex metacharacters; `*`, `^` and `|` keep their filter
// meaning until the later translation steps.
static SPECIAL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"([\|\.\$\+\?\{\}\(\)\[\]\\])").unwrap());

/// Any ANSI byte that is not alphanumeric and not `_%.-`, or the end of the
/// URL.
const SEPARATOR_CLASS: &str =
    r"(?:[\x00-\x24\x26-\x2C\x2F\x3A-\x40\x5B-\x5E\x60\x7B-\x80]|$)";
/// Scheme plus host prefix, the expansion of a leading `||`.
const EXTENDED_ANCHOR: &str = r"^[\w\-]+:/+(?:[^./]+\.)*?";

/// Parses a network filter line (already normalized, `#`-free or at least
/// not an element hiding rule).
pub(crate) fn parse(text: &str) -> Filter {
    let mut blocking = true;
    let mut body = text;
    if let Some(rest) = body.strip_prefix("@@") {
        blocking = false;
        body = rest;
    }

    let mut pattern = body;
    let mut content_type: Option<ContentType> = None;
    let mut explicit_document = false;
    let mut match_case = false;
    let mut third_party = ThirdParty::Any;
    let mut collapse = true;
    let mut domain_source: Option<String> = None;
    let mut site_keys: Vec<String> = Vec::new();

    if let Some(captures) = OPTIONS_RE.captures(body) {
        pattern = &body[..captures.get(0).unwrap().start()];
        let options = captures[1].to_uppercase();
        for raw_option in options.split(',') {
            let (negated, option) = match raw_option.strip_prefix('~') {
                Some(rest) => (true, rest),
                None => (false, raw_option),
            };
            let mut parts = option.splitn(2, '=');
            let name = parts.next().unwrap_or_default().replace('-', "_");
            let value = parts.next().unwrap_or_default();

            match (name.as_str(), negated) {
                ("MATCH_CASE", false) => match_case = true,
                ("MATCH_CASE", true) => match_case = false,
                ("DOMAIN", _) => domain_source = Some(value.to_string()),
                ("THIRD_PARTY", false) => third_party = ThirdParty::Yes,
                ("THIRD_PARTY", true) => third_party = ThirdParty::No,
                ("COLLAPSE", false) => collapse = true,
                ("COLLAPSE", true) => collapse = false,
                ("SITEKEY", _) => {
                    site_keys = value
                        .split('|')
                        .filter(|key| !key.is_empty())
                        .map(String::from)
                        .collect();
                }
                (name, negated) => {
                    let bit = ContentType::from_name(name);
                    if bit.is_empty() {
                        return Filter::Invalid {
                            text: text.to_string(),
                            reason: format!("Unknown option {}", raw_option),
                        };
                    }
                    if negated {
                        let mask = content_type.get_or_insert(ContentType::DEFAULT);
                        mask.remove(bit);
                    } else {
                        match content_type.as_mut() {
                            Some(mask) => mask.insert(bit),
                            None => content_type = Some(bit),
                        }
                        if bit == ContentType::DOCUMENT {
                            explicit_document = true;
                        }
                    }
                }
            }
        }
    }

    if pattern.is_empty() {
        return Filter::Invalid {
            text: text.to_string(),
            reason: "empty filter pattern".to_string(),
        };
    }

    // Exception filters should not whitelist whole pages unless asked to:
    // clear the DOCUMENT bit unless it was named, the pattern is anchored
    // to a scheme, or a site key narrows the filter anyway.
    if !blocking
        && content_type.map_or(true, |mask| mask.contains(ContentType::DOCUMENT))
        && !explicit_document
        && !SCHEME_ANCHOR_RE.is_match(pattern)
    {
        let mut mask = content_type.unwrap_or(ContentType::DEFAULT);
        mask.remove(ContentType::DOCUMENT);
        content_type = Some(mask);
    }
    if !blocking && !site_keys.is_empty() {
        content_type = Some(ContentType::DOCUMENT);
    }

    let rule = RegExpData {
        text: text.to_string(),
        pattern: pattern.to_string(),
        content_type: content_type.unwrap_or(ContentType::DEFAULT),
        match_case,
        third_party,
        domains: DomainSpec::for_network(domain_source),
        regex: OnceCell::new(),
    };

    // `/.../` patterns are real regexes and compile eagerly so that syntax
    // errors surface at parse time rather than at first query.
    if regex_literal(&rule.pattern).is_some() {
        match rule.build_regex() {
            Ok(regex) => {
                let _ = rule.regex.set(regex);
            }
            Err(err) => {
                return Filter::Invalid {
                    text: text.to_string(),
                    reason: err.to_string(),
                }
            }
        }
    }

    if blocking {
        Filter::Blocking(BlockingFilter { rule, collapse })
    } else {
        Filter::Whitelist(WhitelistFilter { rule, site_keys })
    }
}

#[inline]
fn regex_literal(pattern: &str) -> Option<&str> {
    if pattern.len() >= 2 && pattern.starts_with('/') && pattern.ends_with('/') {
        Some(&pattern[1..pattern.len() - 1])
    } else {
        None
    }
}

/// Translates the wildcard mini-language into regex source.
fn translate_pattern(pattern: &str) -> String {
    let collapsed = WILDCARD_RUN_RE.replace_all(pattern, "*");
    let mut source: &str = collapsed.as_ref();
    source = source.strip_prefix('*').unwrap_or(source);
    source = source.strip_suffix('*').unwrap_or(source);

    // A separator right before the end anchor is redundant.
    let merged_anchor;
    if let Some(head) = source.strip_suffix("^|") {
        merged_anchor = format!("{}^", head);
        source = &merged_anchor;
    }

    let escaped = SPECIAL_RE.replace_all(source, r"\$1");
    let with_wildcards = escaped.replace('*', ".*");
    let with_separators = with_wildcards.replace('^', SEPARATOR_CLASS);

    let anchored = if let Some(rest) = with_separators.strip_prefix(r"\|\|") {
        format!("{}{}", EXTENDED_ANCHOR, rest)
    } else if let Some(rest) = with_separators.strip_prefix(r"\|") {
        format!("^{}", rest)
    } else {
        with_separators
    };
    if let Some(head) = anchored.strip_suffix(r"\|") {
        format!("{}$", head)
    } else {
        anchored
    }
}

impl RegExpData {
    fn build_regex(&self) -> Result<Regex, regex::Error> {
        let source = match regex_literal(&self.pattern) {
            Some(inner) => inner.to_string(),
            None => translate_pattern(&self.pattern),
        };
        RegexBuilder::new(&source)
            .case_insensitive(!self.match_case)
            .build()
    }

    /// The compiled pattern. A translated pattern that fails to compile
    /// yields `None` and the filter never matches.
    pub fn regex(&self) -> Option<&Regex> {
        self.regex.get_or_try_init(|| self.build_regex()).ok()
    }

    /// Forces regex compilation and domain parsing so later queries are
    /// read-only.
    pub fn warm(&self) {
        self.regex();
        self.domains.warm();
    }

    /// Whether this filter fires for the given request. `content_type` is
    /// the uppercase type name.
    pub fn matches(
        &self,
        location: &str,
        content_type: &str,
        doc_domain: &str,
        third_party: bool,
    ) -> bool {
        if (ContentType::from_name(content_type) & self.content_type).is_empty() {
            return false;
        }
        if !self.third_party.allows(third_party) {
            return false;
        }
        if !self.domains.is_active_on_domain(doc_domain) {
            return false;
        }
        self.regex().map_or(false, |regex| regex.is_match(location))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_blocking(line: &str) -> BlockingFilter {
        match parse(line) {
            Filter::Blocking(filter) => filter,
            other => panic!("expected a blocking filter, got {:?}", other),
        }
    }

    fn parse_whitelist(line: &str) -> WhitelistFilter {
        match parse(line) {
            Filter::Whitelist(filter) => filter,
            other => panic!("expected a whitelist filter, got {:?}", other),
        }
    }

    #[test]
    fn plain_filter_defaults() {
        let filter = parse_blocking("/banner/ads/");
        assert_eq!(filter.rule.content_type, ContentType::DEFAULT);
        assert_eq!(filter.rule.third_party, ThirdParty::Any);
        assert!(!filter.rule.match_case);
        assert!(filter.collapse);
    }

    #[test]
    fn positive_type_options_replace_the_default() {
        let filter = parse_blocking("||ads.example.com^$script");
        assert_eq!(filter.rule.content_type, ContentType::SCRIPT);

        let filter = parse_blocking("||ads.example.com^$script,image");
        assert_eq!(
            filter.rule.content_type,
            ContentType::SCRIPT | ContentType::IMAGE
        );
    }

    #[test]
    fn negative_type_options_subtract_from_the_default() {
        let filter = parse_blocking("||ads.example.com^$~script");
        assert_eq!(
            filter.rule.content_type,
            ContentType::DEFAULT - ContentType::SCRIPT
        );
    }

    #[test]
    fn unknown_options_invalidate() {
        match parse("||example.com^$foobar2000") {
            Filter::Invalid { text, reason } => {
                assert_eq!(text, "||example.com^$foobar2000");
                assert!(reason.to_ascii_lowercase().contains("unknown option"));
            }
            other => panic!("expected invalid, got {:?}", other),
        }
    }

    #[test]
    fn empty_pattern_is_invalid() {
        assert!(matches!(parse("@@"), Filter::Invalid { .. }));
        assert!(matches!(parse("$script"), Filter::Invalid { .. }));
    }

    #[test]
    fn third_party_options() {
        let filter = parse_blocking("*/advert.$third-party");
        assert_eq!(filter.rule.third_party, ThirdParty::Yes);
        let filter = parse_blocking("*/advert.$~third-party");
        assert_eq!(filter.rule.third_party, ThirdParty::No);
    }

    #[test]
    fn collapse_option_is_tracked() {
        assert!(parse_blocking("||example.com^$collapse").collapse);
        assert!(!parse_blocking("||example.com^$~collapse").collapse);
    }

    #[test]
    fn domain_option_feeds_the_domain_map() {
        let filter = parse_blocking("||example.com^$domain=foo.com|~bar.foo.com");
        assert!(filter.rule.domains.is_active_on_domain("foo.com"));
        assert!(!filter.rule.domains.is_active_on_domain("bar.foo.com"));
        assert!(!filter.rule.domains.is_active_on_domain("other.com"));
    }

    #[test]
    fn exception_filters_drop_the_document_bit_by_default() {
        let filter = parse_whitelist("@@||example.com^");
        assert!(!filter.rule.content_type.contains(ContentType::DOCUMENT));

        let filter = parse_whitelist("@@||example.com^$document");
        assert_eq!(filter.rule.content_type, ContentType::DOCUMENT);

        // A scheme-anchored pattern keeps the default mask untouched.
        let filter = parse_whitelist("@@|http://example.com/");
        assert!(filter.rule.content_type.contains(ContentType::DOCUMENT));
    }

    #[test]
    fn site_keys_force_document() {
        let filter = parse_whitelist("@@||example.com^$sitekey=abcdKey|otherKey");
        assert_eq!(filter.site_keys, vec!["ABCDKEY", "OTHERKEY"]);
        assert_eq!(filter.rule.content_type, ContentType::DOCUMENT);
    }

    #[test]
    fn extended_anchor_matches_host_boundaries() {
        let filter = parse_blocking("||example.com^");
        let regex = filter.rule.regex().unwrap();
        assert!(regex.is_match("http://example.com/foo"));
        assert!(regex.is_match("https://sub.example.com/"));
        assert!(!regex.is_match("http://example.com.evil.com/"));
        assert!(!regex.is_match("http://badexample.com/"));
    }

    #[test]
    fn separator_matches_end_of_url() {
        let filter = parse_blocking("||example.com^");
        let regex = filter.rule.regex().unwrap();
        assert!(regex.is_match("http://example.com"));
    }

    #[test]
    fn pipe_anchors_translate_to_regex_anchors() {
        let filter = parse_blocking("|http://example.com/ad.gif|");
        let regex = filter.rule.regex().unwrap();
        assert!(regex.is_match("http://example.com/ad.gif"));
        assert!(!regex.is_match("http://example.com/ad.gif?x"));
        assert!(!regex.is_match("http://other.com/http://example.com/ad.gif"));
    }

    #[test]
    fn wildcards_and_edge_stars_are_normalized() {
        let filter = parse_blocking("**/advert.***");
        let regex = filter.rule.regex().unwrap();
        assert!(regex.is_match("http://a.com/advert.gif"));
        assert!(!regex.is_match("http://a.com/advert_gif"));
    }

    #[test]
    fn trailing_separator_anchor_is_merged() {
        let filter = parse_blocking("||example.com^|");
        let regex = filter.rule.regex().unwrap();
        assert!(regex.is_match("http://example.com/"));
        assert!(regex.is_match("http://example.com"));
    }

    #[test]
    fn regex_literals_are_used_verbatim() {
        let filter = parse_blocking("/adv[0-9]+/");
        let regex = filter.rule.regex().unwrap();
        assert!(regex.is_match("http://example.com/adv42.png"));
        assert!(!regex.is_match("http://example.com/advx.png"));
    }

    #[test]
    fn broken_regex_literals_are_invalid() {
        assert!(matches!(parse("/adv[0-9+/"), Filter::Invalid { .. }));
    }

    #[test]
    fn match_case_controls_regex_flags() {
        let filter = parse_blocking("*/AdBanner.$match-case");
        assert!(filter
            .rule
            .matches("http://example.com/AdBanner.png", "IMAGE", "", false));
        assert!(!filter
            .rule
            .matches("http://example.com/adbanner.png", "IMAGE", "", false));

        let filter = parse_blocking("*/AdBanner.");
        assert!(filter
            .rule
            .matches("http://example.com/adbanner.png", "IMAGE", "", false));
    }

    #[test]
    fn matches_gates_on_every_dimension() {
        let filter = parse_blocking("||ads.example.com^$script,third-party");
        assert!(filter
            .rule
            .matches("http://ads.example.com/a.js", "SCRIPT", "site.com", true));
        assert!(!filter
            .rule
            .matches("http://ads.example.com/a.js", "IMAGE", "site.com", true));
        assert!(!filter
            .rule
            .matches("http://ads.example.com/a.js", "SCRIPT", "site.com", false));
        assert!(!filter
            .rule
            .matches("http://other.com/a.js", "SCRIPT", "site.com", true));
    }

    #[test]
    fn unknown_content_type_names_never_match() {
        let filter = parse_blocking("||ads.example.com^");
        assert!(!filter
            .rule
            .matches("http://ads.example.com/", "BOGUS", "", false));
    }

    #[test]
    fn popup_requires_an_explicit_option() {
        let unqualified = parse_blocking("||ads.example.com^");
        assert!(!unqualified
            .rule
            .matches("http://ads.example.com/", "POPUP", "", false));

        let popup = parse_blocking("||ads.example.com^$popup");
        assert!(popup
            .rule
            .matches("http://ads.example.com/", "POPUP", "", false));
    }
}
