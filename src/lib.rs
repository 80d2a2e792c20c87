//! An EasyList-style content blocking core: parses Adblock Plus filter
//! syntax and answers, against tens of thousands of rules, which filter
//! decides a network request and which CSS selectors to hide on a page.
//!
//! Everything happens in memory through [`Engine`]; list fetching,
//! persistence and browser integration belong to the host.

pub mod elem_hide;
pub mod engine;
pub mod filters;
pub mod matcher;
pub mod utils;

pub use crate::elem_hide::ElemHide;
pub use crate::engine::Engine;
pub use crate::filters::{normalize, Filter, FilterSet};
pub use crate::matcher::{CombinedMatcher, Matcher};
