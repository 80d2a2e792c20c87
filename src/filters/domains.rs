use std::borrow::Cow;
use std::collections::HashMap;

use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};

/// Uppercased domain names mapped to whether the filter applies there. The
/// empty key holds the fallback used when no entry matches.
pub type DomainMap = HashMap<String, bool>;

/// The include/exclude domain restriction of an active filter. The raw
/// source string is kept around and parsed into a [`DomainMap`] on first
/// use.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainSpec {
    source: Option<String>,
    separator: char,
    ignore_trailing_dot: bool,
    #[serde(skip)]
    map: OnceCell<DomainMap>,
}

impl DomainSpec {
    /// Network filters separate domains with `|` and treat a trailing dot
    /// as noise.
    pub fn for_network(source: Option<String>) -> DomainSpec {
        DomainSpec {
            source,
            separator: '|',
            ignore_trailing_dot: true,
            map: OnceCell::new(),
        }
    }

    /// Element hiding filters separate domains with `,` and keep trailing
    /// dots as written.
    pub fn for_elem_hide(source: Option<String>) -> DomainSpec {
        DomainSpec {
            source,
            separator: ',',
            ignore_trailing_dot: false,
            map: OnceCell::new(),
        }
    }

    /// The parsed domain map, or `None` when the filter carries no domain
    /// restriction at all.
    pub fn domains(&self) -> Option<&DomainMap> {
        let source = self.source.as_deref()?;
        Some(self.map.get_or_init(|| {
            parse_domains(source, self.separator, self.ignore_trailing_dot)
        }))
    }

    /// Whether the filter fires on `doc_domain`, walking up the domain
    /// hierarchy until an entry matches and falling back to the default.
    pub fn is_active_on_domain(&self, doc_domain: &str) -> bool {
        let map = match self.domains() {
            Some(map) => map,
            None => return true,
        };
        if doc_domain.is_empty() {
            return default_of(map);
        }

        let domain = canonical_domain(doc_domain, self.ignore_trailing_dot);
        let mut current: &str = &domain;
        loop {
            if let Some(&included) = map.get(current) {
                return included;
            }
            match current.find('.') {
                Some(dot) => current = &current[dot + 1..],
                None => return default_of(map),
            }
        }
    }

    /// Forces the lazy parse so later lookups are read-only.
    pub fn warm(&self) {
        self.domains();
    }
}

#[inline]
fn default_of(map: &DomainMap) -> bool {
    map.get("").copied().unwrap_or(true)
}

/// Uppercases a domain name, punycoding non-ASCII names first so that rule
/// domains and document domains normalize identically.
fn canonical_domain(domain: &str, ignore_trailing_dot: bool) -> String {
    let domain = if ignore_trailing_dot {
        domain.trim_end_matches('.')
    } else {
        domain
    };
    let ascii: Cow<str> = if domain.is_ascii() {
        Cow::Borrowed(domain)
    } else {
        match idna::domain_to_ascii(domain) {
            Ok(ascii) => Cow::Owned(ascii),
            Err(_) => Cow::Borrowed(domain),
        }
    };
    ascii.to_uppercase()
}

fn parse_domains(source: &str, separator: char, ignore_trailing_dot: bool) -> DomainMap {
    // Fast path for the overwhelmingly common single-include source.
    if !source.starts_with('~') && !source.contains(separator) {
        let token = if ignore_trailing_dot {
            source.trim_end_matches('.')
        } else {
            source
        };
        if !token.is_empty() {
            let mut map = DomainMap::with_capacity(2);
            map.insert(canonical_domain(token, false), true);
            map.insert(String::new(), false);
            return map;
        }
    }

    let mut map = DomainMap::new();
    let mut has_includes = false;
    for token in source.split(separator) {
        let token = if ignore_trailing_dot {
            token.trim_end_matches('.')
        } else {
            token
        };
        if token.is_empty() {
            continue;
        }
        let (name, included) = match token.strip_prefix('~') {
            Some(rest) => (rest, false),
            None => {
                has_includes = true;
                (token, true)
            }
        };
        if name.is_empty() {
            continue;
        }
        map.insert(canonical_domain(name, false), included);
    }
    map.insert(String::new(), !has_includes);
    map
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_source_is_active_everywhere() {
        let spec = DomainSpec::for_network(None);
        assert!(spec.domains().is_none());
        assert!(spec.is_active_on_domain("example.com"));
        assert!(spec.is_active_on_domain(""));
    }

    #[test]
    fn includes_set_a_false_default() {
        let spec = DomainSpec::for_network(Some("EXAMPLE.COM".into()));
        let map = spec.domains().unwrap();
        assert_eq!(map.get(""), Some(&false));
        assert_eq!(map.get("EXAMPLE.COM"), Some(&true));

        assert!(spec.is_active_on_domain("example.com"));
        assert!(spec.is_active_on_domain("sub.example.com"));
        assert!(!spec.is_active_on_domain("other.com"));
        assert!(!spec.is_active_on_domain(""));
    }

    #[test]
    fn all_negations_keep_a_true_default() {
        let spec = DomainSpec::for_network(Some("~EXAMPLE.COM".into()));
        let map = spec.domains().unwrap();
        assert_eq!(map.get(""), Some(&true));

        assert!(!spec.is_active_on_domain("example.com"));
        assert!(!spec.is_active_on_domain("deep.sub.example.com"));
        assert!(spec.is_active_on_domain("other.com"));
        assert!(spec.is_active_on_domain(""));
    }

    #[test]
    fn nearest_ancestor_wins() {
        let spec =
            DomainSpec::for_network(Some("EXAMPLE.COM|~ADS.EXAMPLE.COM".into()));
        assert!(spec.is_active_on_domain("example.com"));
        assert!(!spec.is_active_on_domain("ads.example.com"));
        assert!(!spec.is_active_on_domain("tracker.ads.example.com"));
        assert!(spec.is_active_on_domain("images.example.com"));
    }

    #[test]
    fn trailing_dots_are_ignored_for_network_filters() {
        let spec = DomainSpec::for_network(Some("EXAMPLE.COM.".into()));
        assert_eq!(spec.domains().unwrap().get("EXAMPLE.COM"), Some(&true));
        assert!(spec.is_active_on_domain("example.com."));
        assert!(spec.is_active_on_domain("example.com"));
    }

    #[test]
    fn trailing_dots_are_kept_for_elem_hide_filters() {
        let spec = DomainSpec::for_elem_hide(Some("example.com.".into()));
        let map = spec.domains().unwrap();
        assert_eq!(map.get("EXAMPLE.COM."), Some(&true));
        assert_eq!(map.get("EXAMPLE.COM"), None);
    }

    #[test]
    fn document_domain_is_case_insensitive() {
        let spec = DomainSpec::for_network(Some("EXAMPLE.COM".into()));
        assert!(spec.is_active_on_domain("EXAMPLE.com"));
        assert!(spec.is_active_on_domain("Sub.Example.Com"));
    }

    #[test]
    fn empty_tokens_are_skipped() {
        let spec = DomainSpec::for_network(Some("|EXAMPLE.COM||~FOO.EXAMPLE.COM|".into()));
        assert!(spec.is_active_on_domain("example.com"));
        assert!(!spec.is_active_on_domain("foo.example.com"));
    }

    #[test]
    fn non_ascii_domains_are_punycoded() {
        let spec = DomainSpec::for_network(Some("BÜCHER.EXAMPLE".into()));
        assert!(spec.is_active_on_domain("bücher.example"));
        assert!(spec.is_active_on_domain("xn--bcher-kva.example"));
        assert!(!spec.is_active_on_domain("other.example"));
    }
}
