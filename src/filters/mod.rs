//! Filter text parsing: normalization, classification into the filter
//! kinds, and the intern table that makes repeated lines share one
//! instance.

pub mod cosmetic;
pub mod domains;
pub mod network;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use memchr::memchr as find_char;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::filters::cosmetic::ElemHideData;
use crate::filters::network::{BlockingFilter, RegExpData, WhitelistFilter};
use crate::utils::RandomState;

/// Detects element hiding rules and splits them into domain, exception
/// marker, legacy tag/attribute rules and raw selector.
pub(crate) static ELEM_HIDE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"^([^/\*\|@"!]*?)#(@)?(?:([\w\-]+|\*)((?:\([\w\-]+(?:[$^*]?=[^()"]*)?\))*)|#([^{}]+))$"#)
        .unwrap()
});

/// The `$opt1,opt2` tail of a network filter.
pub(crate) static OPTIONS_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\$(~?[\w\-]+(?:=[^,\s]+)?(?:,~?[\w\-]+(?:=[^,\s]+)?)*)$").unwrap()
});

/// Filters written as a raw `/.../` regular expression.
pub(crate) static REGEXP_FORM_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(@@)?/.*/(?:\$~?[\w\-]+(?:=[^,\s]+)?(?:,~?[\w\-]+(?:=[^,\s]+)?)*)?$")
        .unwrap()
});

/// Splits any rule containing `#` into prefix, marker and body so that the
/// body keeps its internal spaces during normalization. The marker covers
/// the legacy single-`#` and `#@` forms as well as `##` and `#@#`.
static MARKER_SPLIT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(.*?)(#@?#?)(.*)$").unwrap());

/// One parsed line of filter-list text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Filter {
    /// A `!` line; ignored at query time.
    Comment { text: String },
    /// A line that could not be parsed, kept for diagnostics.
    Invalid { text: String, reason: String },
    Blocking(BlockingFilter),
    Whitelist(WhitelistFilter),
    ElemHide(ElemHideData),
    ElemHideException(ElemHideData),
}

impl Filter {
    /// The normalized filter text, identical to what the line was interned
    /// under.
    pub fn text(&self) -> &str {
        match self {
            Filter::Comment { text } => text,
            Filter::Invalid { text, .. } => text,
            Filter::Blocking(filter) => &filter.rule.text,
            Filter::Whitelist(filter) => &filter.rule.text,
            Filter::ElemHide(data) => &data.text,
            Filter::ElemHideException(data) => &data.text,
        }
    }

    /// RegExp state for blocking and whitelist filters.
    pub fn rule(&self) -> Option<&RegExpData> {
        match self {
            Filter::Blocking(filter) => Some(&filter.rule),
            Filter::Whitelist(filter) => Some(&filter.rule),
            _ => None,
        }
    }

    /// Selector state for element hiding filters and exceptions.
    pub fn elem_hide_data(&self) -> Option<&ElemHideData> {
        match self {
            Filter::ElemHide(data) | Filter::ElemHideException(data) => Some(data),
            _ => None,
        }
    }

    pub fn is_network(&self) -> bool {
        self.rule().is_some()
    }

    /// Triggers the lazy regex compile and domain parse so that subsequent
    /// queries are read-only.
    pub fn warm(&self) {
        match self {
            Filter::Blocking(filter) => filter.rule.warm(),
            Filter::Whitelist(filter) => filter.rule.warm(),
            Filter::ElemHide(data) | Filter::ElemHideException(data) => data.warm(),
            Filter::Comment { .. } | Filter::Invalid { .. } => {}
        }
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.text())
    }
}

/// Removes unnecessary whitespace from a filter line. Comments keep their
/// internal spaces, element hiding rules keep spaces in the selector body,
/// everything else loses all whitespace.
pub fn normalize(text: &str) -> String {
    if text.is_empty() {
        return String::new();
    }

    // Line breaks and other non-space whitespace never survive.
    let cleaned: String = text
        .chars()
        .filter(|&c| c == ' ' || !c.is_whitespace())
        .collect();

    let trimmed = cleaned.trim();
    if trimmed.starts_with('!') {
        return trimmed.to_string();
    }

    if ELEM_HIDE_RE.is_match(&cleaned) {
        if let Some(captures) = MARKER_SPLIT_RE.captures(&cleaned) {
            let prefix: String =
                captures[1].chars().filter(|c| !c.is_whitespace()).collect();
            return format!("{}{}{}", prefix, &captures[2], captures[3].trim());
        }
    }

    cleaned.chars().filter(|c| !c.is_whitespace()).collect()
}

fn classify(text: String) -> Filter {
    if text.starts_with('!') {
        return Filter::Comment { text };
    }
    if find_char(b'#', text.as_bytes()).is_some() {
        if let Some(captures) = ELEM_HIDE_RE.captures(&text) {
            return cosmetic::parse(&text, &captures);
        }
    }
    network::parse(&text)
}

/// The intern table: normalized filter text mapped to its single parsed
/// instance. Entries are never pruned; they live as long as the engine.
#[derive(Default)]
pub struct FilterSet {
    known: HashMap<String, Arc<Filter>, RandomState>,
}

impl FilterSet {
    pub fn new() -> FilterSet {
        Default::default()
    }

    /// Parses a line into a filter, reusing the interned instance when the
    /// same normalized text was seen before. Returns `None` only for lines
    /// that normalize to nothing.
    pub fn from_text(&mut self, line: &str) -> Option<Arc<Filter>> {
        let text = normalize(line);
        if text.is_empty() {
            return None;
        }
        if let Some(existing) = self.known.get(&text) {
            return Some(existing.clone());
        }
        let filter = Arc::new(classify(text));
        self.known
            .insert(filter.text().to_string(), filter.clone());
        Some(filter)
    }

    /// Looks up a previously interned filter by its normalized text.
    pub fn get(&self, text: &str) -> Option<&Arc<Filter>> {
        self.known.get(text)
    }

    pub fn len(&self) -> usize {
        self.known.len()
    }

    pub fn is_empty(&self) -> bool {
        self.known.is_empty()
    }
}
