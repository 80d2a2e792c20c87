//! The engine object that owns the intern table and both query indexes and
//! routes parsed filters between them.

use std::sync::Arc;

use crate::elem_hide::ElemHide;
use crate::filters::{normalize, Filter, FilterSet};
use crate::matcher::CombinedMatcher;

/// Owns every piece of per-engine state: the intern table, the combined
/// network matcher and the element hiding index. Filters added here are
/// pre-warmed, so queries afterwards never mutate per-filter state.
#[derive(Default)]
pub struct Engine {
    filters: FilterSet,
    matcher: CombinedMatcher,
    elem_hide: ElemHide,
}

impl Engine {
    pub fn new() -> Engine {
        Default::default()
    }

    /// Builds an engine from filter-list lines.
    pub fn from_rules<I, S>(rules: I) -> Engine
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut engine = Engine::new();
        for line in rules {
            engine.add_filter(line.as_ref());
        }
        engine
    }

    /// Parses one line, interns the result and routes active filters into
    /// the matching index. Comments and invalid filters are interned but
    /// not indexed. Returns `None` for lines that normalize to nothing.
    pub fn add_filter(&mut self, line: &str) -> Option<Arc<Filter>> {
        let filter = self.filters.from_text(line)?;
        filter.warm();
        match filter.as_ref() {
            Filter::Blocking(_) | Filter::Whitelist(_) => {
                let _ = self.matcher.add(&filter);
            }
            Filter::ElemHide(_) | Filter::ElemHideException(_) => {
                let _ = self.elem_hide.add(&filter);
            }
            Filter::Comment { .. } | Filter::Invalid { .. } => {}
        }
        Some(filter)
    }

    /// Removes a previously added filter from the indexes. The interned
    /// instance stays alive.
    pub fn remove_filter(&mut self, line: &str) {
        let text = normalize(line);
        let filter = match self.filters.get(&text) {
            Some(filter) => filter.clone(),
            None => return,
        };
        match filter.as_ref() {
            Filter::Blocking(_) | Filter::Whitelist(_) => {
                let _ = self.matcher.remove(&filter);
            }
            Filter::ElemHide(_) | Filter::ElemHideException(_) => {
                let _ = self.elem_hide.remove(&filter);
            }
            Filter::Comment { .. } | Filter::Invalid { .. } => {}
        }
    }

    /// Which filter, if any, decides this request. Whitelist filters win
    /// over blocking filters.
    pub fn matches_any(
        &mut self,
        location: &str,
        content_type: &str,
        doc_domain: &str,
        third_party: bool,
    ) -> Option<Arc<Filter>> {
        self.matcher
            .matches_any(location, content_type, doc_domain, third_party)
    }

    /// Resolves a site key presented by the loading document.
    pub fn matches_by_key(
        &self,
        location: &str,
        key: &str,
        doc_domain: &str,
    ) -> Option<Arc<Filter>> {
        self.matcher
            .matches_by_key(location, key, doc_domain, &self.filters)
    }

    /// The CSS selectors to hide on `domain`.
    pub fn hidden_selectors(&self, domain: &str, specific: bool) -> Vec<String> {
        self.elem_hide.get_selectors(domain, specific)
    }

    pub fn known_filters(&self) -> &FilterSet {
        &self.filters
    }

    pub fn matcher(&self) -> &CombinedMatcher {
        &self.matcher
    }

    pub fn elem_hide(&self) -> &ElemHide {
        &self.elem_hide
    }
}
