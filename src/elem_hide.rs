//! The element hiding index: which selectors are hidden on a document, and
//! the exception rules that disable them per selector.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use thiserror::Error;

use crate::filters::Filter;
use crate::utils::RandomState;

#[derive(Debug, Error, PartialEq)]
pub enum ElemHideError {
    #[error("only element hiding filters can be indexed")]
    NotAnElemHideFilter,
}

#[derive(Default)]
pub struct ElemHide {
    /// Hiding filters by their text.
    elem_filters: HashMap<String, Arc<Filter>, RandomState>,
    /// Texts of all registered exceptions.
    known_exceptions: HashSet<String, RandomState>,
    /// Exceptions grouped by the selector they disable.
    exceptions_by_selector: HashMap<String, Vec<Arc<Filter>>, RandomState>,
}

impl ElemHide {
    pub fn new() -> ElemHide {
        Default::default()
    }

    /// Removes all known filters.
    pub fn clear(&mut self) {
        self.elem_filters.clear();
        self.known_exceptions.clear();
        self.exceptions_by_selector.clear();
    }

    pub fn add(&mut self, filter: &Arc<Filter>) -> Result<(), ElemHideError> {
        match filter.as_ref() {
            Filter::ElemHideException(data) => {
                if self.known_exceptions.insert(data.text.clone()) {
                    self.exceptions_by_selector
                        .entry(data.selector.clone())
                        .or_default()
                        .push(filter.clone());
                }
            }
            Filter::ElemHide(data) => {
                self.elem_filters.insert(data.text.clone(), filter.clone());
            }
            _ => return Err(ElemHideError::NotAnElemHideFilter),
        }
        Ok(())
    }

    /// Removes a filter; an exception removal leaves other exceptions for
    /// the same selector in place.
    pub fn remove(&mut self, filter: &Arc<Filter>) -> Result<(), ElemHideError> {
        match filter.as_ref() {
            Filter::ElemHideException(data) => {
                if self.known_exceptions.remove(&data.text) {
                    if let Some(bucket) =
                        self.exceptions_by_selector.get_mut(&data.selector)
                    {
                        bucket.retain(|entry| entry.text() != data.text);
                        if bucket.is_empty() {
                            self.exceptions_by_selector.remove(&data.selector);
                        }
                    }
                }
            }
            Filter::ElemHide(data) => {
                self.elem_filters.remove(&data.text);
            }
            _ => return Err(ElemHideError::NotAnElemHideFilter),
        }
        Ok(())
    }

    /// The first registered exception for the filter's selector that is
    /// active on `doc_domain`, if any.
    pub fn get_exception(
        &self,
        filter: &Filter,
        doc_domain: &str,
    ) -> Option<&Arc<Filter>> {
        let selector = &filter.elem_hide_data()?.selector;
        self.exception_for_selector(selector, doc_domain)
    }

    fn exception_for_selector(
        &self,
        selector: &str,
        doc_domain: &str,
    ) -> Option<&Arc<Filter>> {
        self.exceptions_by_selector
            .get(selector)?
            .iter()
            .find(|exception| match exception.as_ref() {
                Filter::ElemHideException(data) => {
                    data.domains.is_active_on_domain(doc_domain)
                }
                _ => false,
            })
    }

    /// All selectors to hide on `domain`. With `specific`, filters that
    /// apply to every domain are skipped.
    pub fn get_selectors(&self, domain: &str, specific: bool) -> Vec<String> {
        let mut selectors = Vec::new();
        for filter in self.elem_filters.values() {
            let data = match filter.as_ref() {
                Filter::ElemHide(data) => data,
                _ => continue,
            };
            if specific {
                match data.domains.domains() {
                    None => continue,
                    Some(map) if map.get("").copied().unwrap_or(false) => continue,
                    Some(_) => {}
                }
            }
            if data.domains.is_active_on_domain(domain)
                && self.exception_for_selector(&data.selector, domain).is_none()
            {
                selectors.push(data.selector.clone());
            }
        }
        selectors
    }
}
