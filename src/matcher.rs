//! Keyword-indexed matching of network filters: a [`Matcher`] per filter
//! class and the [`CombinedMatcher`] that layers whitelisting, site keys
//! and a bounded result cache on top.

use std::collections::HashMap;
use std::iter;
use std::sync::Arc;

use thiserror::Error;

use crate::filters::{Filter, FilterSet, OPTIONS_RE, REGEXP_FORM_RE};
use crate::utils::{self, RandomState};

/// The result cache is dropped wholesale once it grows past this.
pub const MAX_CACHE_ENTRIES: usize = 1000;

#[derive(Debug, Error, PartialEq)]
pub enum MatcherError {
    #[error("only network filters can be indexed")]
    NotANetworkFilter,
}

/// Stores network filters under a keyword picked from their text, so a
/// query only has to look at the buckets named by the URL's own tokens.
#[derive(Default)]
pub struct Matcher {
    filter_by_keyword: HashMap<String, Vec<Arc<Filter>>, RandomState>,
    keyword_by_filter: HashMap<String, String, RandomState>,
}

impl Matcher {
    pub fn new() -> Matcher {
        Default::default()
    }

    /// Removes all known filters.
    pub fn clear(&mut self) {
        self.filter_by_keyword.clear();
        self.keyword_by_filter.clear();
    }

    /// Adds a filter under its chosen keyword. Adding the same filter text
    /// twice is a no-op.
    pub fn add(&mut self, filter: &Arc<Filter>) -> Result<(), MatcherError> {
        if !filter.is_network() {
            return Err(MatcherError::NotANetworkFilter);
        }
        if self.keyword_by_filter.contains_key(filter.text()) {
            return Ok(());
        }

        let keyword = self.find_keyword(filter);
        self.filter_by_keyword
            .entry(keyword.clone())
            .or_default()
            .push(filter.clone());
        self.keyword_by_filter
            .insert(filter.text().to_string(), keyword);
        Ok(())
    }

    /// Removes a filter from its keyword bucket; other filters sharing the
    /// keyword stay indexed.
    pub fn remove(&mut self, filter: &Arc<Filter>) {
        let keyword = match self.keyword_by_filter.remove(filter.text()) {
            Some(keyword) => keyword,
            None => return,
        };
        if let Some(bucket) = self.filter_by_keyword.get_mut(&keyword) {
            bucket.retain(|entry| entry.text() != filter.text());
            if bucket.is_empty() {
                self.filter_by_keyword.remove(&keyword);
            }
        }
    }

    /// Chooses the keyword to index a filter under: the candidate token
    /// whose bucket currently holds the fewest filters, ties broken toward
    /// longer tokens. Raw `/.../` filters get the empty keyword and land in
    /// the slow bucket consulted for every URL.
    pub fn find_keyword(&self, filter: &Arc<Filter>) -> String {
        let text = filter.text();
        if REGEXP_FORM_RE.is_match(text) {
            return String::new();
        }

        let mut body = text;
        if let Some(options) = OPTIONS_RE.find(body) {
            body = &body[..options.start()];
        }
        body = body.strip_prefix("@@").unwrap_or(body);
        let lower = body.to_lowercase();

        let mut result = String::new();
        let mut result_count = usize::MAX;
        let mut result_len = 0;
        for candidate in utils::keyword_candidates(&lower) {
            let count = self
                .filter_by_keyword
                .get(candidate)
                .map_or(0, Vec::len);
            if count < result_count
                || (count == result_count && candidate.len() > result_len)
            {
                result_count = count;
                result_len = candidate.len();
                result = candidate.to_string();
            }
        }
        result
    }

    /// Whether this filter is currently indexed.
    pub fn has_filter(&self, filter: &Arc<Filter>) -> bool {
        self.keyword_by_filter.contains_key(filter.text())
    }

    /// The keyword a filter is indexed under, `None` for unknown filters.
    pub fn get_keyword(&self, filter: &Arc<Filter>) -> Option<&str> {
        self.keyword_by_filter
            .get(filter.text())
            .map(String::as_str)
    }

    /// Scans one keyword bucket in insertion order and returns the first
    /// filter matching the request.
    pub fn check_entry_match(
        &self,
        keyword: &str,
        location: &str,
        content_type: &str,
        doc_domain: &str,
        third_party: bool,
    ) -> Option<Arc<Filter>> {
        let bucket = self.filter_by_keyword.get(keyword)?;
        bucket
            .iter()
            .find(|filter| {
                filter
                    .rule()
                    .map_or(false, |rule| {
                        rule.matches(location, content_type, doc_domain, third_party)
                    })
            })
            .cloned()
    }

    /// Tests whether the URL matches any of the known filters.
    pub fn matches_any(
        &self,
        location: &str,
        content_type: &str,
        doc_domain: &str,
        third_party: bool,
    ) -> Option<Arc<Filter>> {
        let lower = location.to_lowercase();
        for token in utils::tokenize(&lower).into_iter().chain(iter::once("")) {
            if let Some(hit) =
                self.check_entry_match(token, location, content_type, doc_domain, third_party)
            {
                return Some(hit);
            }
        }
        None
    }
}

/// Cache key for one `matches_any` query.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct RequestKey {
    location: String,
    content_type: String,
    doc_domain: String,
    third_party: bool,
}

/// Combines a blocking and a whitelist [`Matcher`], the site-key table and
/// a result cache. Exceptions always win over blocking filters.
#[derive(Default)]
pub struct CombinedMatcher {
    blacklist: Matcher,
    whitelist: Matcher,
    keys: HashMap<String, String, RandomState>,
    result_cache: HashMap<RequestKey, Option<Arc<Filter>>, RandomState>,
}

impl CombinedMatcher {
    pub fn new() -> CombinedMatcher {
        Default::default()
    }

    pub fn clear(&mut self) {
        self.blacklist.clear();
        self.whitelist.clear();
        self.keys.clear();
        self.result_cache.clear();
    }

    /// Routes a network filter into the right index. Whitelist filters
    /// restricted by site keys go into the key table instead of the
    /// whitelist matcher. Flushes the result cache.
    pub fn add(&mut self, filter: &Arc<Filter>) -> Result<(), MatcherError> {
        match filter.as_ref() {
            Filter::Whitelist(whitelist) if !whitelist.site_keys.is_empty() => {
                for key in &whitelist.site_keys {
                    self.keys.insert(key.clone(), whitelist.rule.text.clone());
                }
            }
            Filter::Whitelist(_) => self.whitelist.add(filter)?,
            Filter::Blocking(_) => self.blacklist.add(filter)?,
            _ => return Err(MatcherError::NotANetworkFilter),
        }
        self.result_cache.clear();
        Ok(())
    }

    /// Removes a network filter. Flushes the result cache.
    pub fn remove(&mut self, filter: &Arc<Filter>) -> Result<(), MatcherError> {
        match filter.as_ref() {
            Filter::Whitelist(whitelist) if !whitelist.site_keys.is_empty() => {
                for key in &whitelist.site_keys {
                    self.keys.remove(key);
                }
            }
            Filter::Whitelist(_) => self.whitelist.remove(filter),
            Filter::Blocking(_) => self.blacklist.remove(filter),
            _ => return Err(MatcherError::NotANetworkFilter),
        }
        self.result_cache.clear();
        Ok(())
    }

    fn matcher_for(&self, filter: &Arc<Filter>) -> &Matcher {
        match filter.as_ref() {
            Filter::Whitelist(_) => &self.whitelist,
            _ => &self.blacklist,
        }
    }

    pub fn find_keyword(&self, filter: &Arc<Filter>) -> String {
        self.matcher_for(filter).find_keyword(filter)
    }

    pub fn has_filter(&self, filter: &Arc<Filter>) -> bool {
        self.matcher_for(filter).has_filter(filter)
    }

    pub fn get_keyword(&self, filter: &Arc<Filter>) -> Option<&str> {
        self.matcher_for(filter).get_keyword(filter)
    }

    /// A filter is slow when no usable keyword exists for it and every
    /// query has to consider it.
    pub fn is_slow_filter(&self, filter: &Arc<Filter>) -> bool {
        let matcher = self.matcher_for(filter);
        match matcher.get_keyword(filter) {
            Some(keyword) => keyword.is_empty(),
            None => matcher.find_keyword(filter).is_empty(),
        }
    }

    fn matches_any_internal(
        &self,
        location: &str,
        content_type: &str,
        doc_domain: &str,
        third_party: bool,
    ) -> Option<Arc<Filter>> {
        let lower = location.to_lowercase();
        let mut blacklist_hit: Option<Arc<Filter>> = None;
        for token in utils::tokenize(&lower).into_iter().chain(iter::once("")) {
            if let Some(hit) = self.whitelist.check_entry_match(
                token,
                location,
                content_type,
                doc_domain,
                third_party,
            ) {
                return Some(hit);
            }
            if blacklist_hit.is_none() {
                blacklist_hit = self.blacklist.check_entry_match(
                    token,
                    location,
                    content_type,
                    doc_domain,
                    third_party,
                );
            }
        }
        blacklist_hit
    }

    /// Tests whether the URL matches any known filter, preferring whitelist
    /// hits. Results (including misses) are cached per query tuple.
    pub fn matches_any(
        &mut self,
        location: &str,
        content_type: &str,
        doc_domain: &str,
        third_party: bool,
    ) -> Option<Arc<Filter>> {
        let key = RequestKey {
            location: location.to_string(),
            content_type: content_type.to_string(),
            doc_domain: doc_domain.to_string(),
            third_party,
        };
        if let Some(cached) = self.result_cache.get(&key) {
            return cached.clone();
        }

        let result =
            self.matches_any_internal(location, content_type, doc_domain, third_party);
        if self.result_cache.len() >= MAX_CACHE_ENTRIES {
            self.result_cache.clear();
        }
        self.result_cache.insert(key, result.clone());
        result
    }

    /// Resolves a site key presented by the document: key → whitelist
    /// filter text → interned filter, which must then match the location as
    /// a first-party DOCUMENT request.
    pub fn matches_by_key(
        &self,
        location: &str,
        key: &str,
        doc_domain: &str,
        known_filters: &FilterSet,
    ) -> Option<Arc<Filter>> {
        let text = self.keys.get(&key.to_uppercase())?;
        let filter = known_filters.get(text)?;
        match filter.as_ref() {
            Filter::Whitelist(whitelist)
                if whitelist
                    .rule
                    .matches(location, "DOCUMENT", doc_domain, false) =>
            {
                Some(filter.clone())
            }
            _ => None,
        }
    }
}
