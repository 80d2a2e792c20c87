//! Element hiding rules: a CSS selector plus the domains it applies to.
//! Covers both the `##`/`#@#` form with a raw selector and the legacy
//! `domain#tag(attr=value)` form, which is rewritten into a selector here.

use itertools::Itertools;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};

use crate::filters::domains::DomainSpec;
use crate::filters::Filter;

/// State shared by element hiding filters and their exceptions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElemHideData {
    pub text: String,
    /// Comma-joined, lowercased list of the non-negated domains.
    pub selector_domain: String,
    pub selector: String,
    pub(crate) domains: DomainSpec,
}

impl ElemHideData {
    pub fn warm(&self) {
        self.domains.warm();
    }
}

static ATTR_RULE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"\([\w\-]+(?:[$^*]?=[^()"]*)?\)"#).unwrap());

/// Builds an element hiding filter (or exception) from the capture groups
/// of the detector regex: `(domain, exception_marker, tag_name, attr_rules,
/// raw_selector)`.
pub(crate) fn parse(text: &str, captures: &Captures) -> Filter {
    let domain = captures.get(1).map_or("", |m| m.as_str());
    let exception = captures.get(2).is_some();

    let selector = match captures.get(5) {
        Some(raw) => raw.as_str().to_string(),
        None => {
            let tag_name = captures.get(3).map_or("", |m| m.as_str());
            let attr_rules = captures.get(4).map_or("", |m| m.as_str());
            match synthesize_selector(tag_name, attr_rules) {
                Ok(selector) => selector,
                Err(reason) => {
                    return Filter::Invalid {
                        text: text.to_string(),
                        reason: reason.to_string(),
                    }
                }
            }
        }
    };

    let selector_domain = domain
        .split(',')
        .filter(|d| !d.is_empty() && !d.starts_with('~'))
        .map(str::to_lowercase)
        .join(",");

    let data = ElemHideData {
        text: text.to_string(),
        selector_domain,
        selector,
        domains: DomainSpec::for_elem_hide(if domain.is_empty() {
            None
        } else {
            Some(domain.to_uppercase())
        }),
    };

    if exception {
        Filter::ElemHideException(data)
    } else {
        Filter::ElemHide(data)
    }
}

/// Rewrites the legacy `tag(attr)(attr2^=value)` body into a CSS selector.
/// An attribute rule without `=` names an element ID.
fn synthesize_selector(tag_name: &str, attr_rules: &str) -> Result<String, &'static str> {
    let tag = if tag_name == "*" { "" } else { tag_name };

    let mut id: Option<&str> = None;
    let mut additional = String::new();
    for rule_match in ATTR_RULE_RE.find_iter(attr_rules) {
        let rule = &rule_match.as_str()[1..rule_match.as_str().len() - 1];
        match rule.find('=') {
            Some(pos) if pos > 0 => {
                additional.push('[');
                additional.push_str(&rule.replacen('=', "=\"", 1));
                additional.push_str("\"]");
            }
            _ => {
                if id.is_some() {
                    return Err("filter_elemhide_duplicate_id");
                }
                id = Some(rule);
            }
        }
    }

    match id {
        Some(id) => Ok(format!("{}.{},{}#{}", tag, id, tag, id)),
        None if !tag.is_empty() || !additional.is_empty() => {
            Ok(format!("{}{}", tag, additional))
        }
        None => Err("filter_elemhide_nocriteria"),
    }
}
