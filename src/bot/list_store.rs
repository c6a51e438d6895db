// src/bot/list_store.rs - Deny-list, name filters and the session safelist

use log::{debug, info};
use regex::Regex;
use std::collections::HashSet;
use thiserror::Error;

use crate::types::NameVerdict;

#[derive(Debug, Error)]
pub enum ListError {
    #[error("invalid filter '{pattern}': {source}")]
    InvalidFilter {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

/// A name filter, always evaluated from the start of the name
#[derive(Debug, Clone)]
pub struct FilterPattern {
    raw: String,
    compiled: Regex,
}

impl FilterPattern {
    /// Compile a filter, adding a start anchor when the pattern lacks one
    pub fn compile(raw: &str) -> Result<Self, ListError> {
        let anchored = if raw.starts_with('^') {
            raw.to_string()
        } else {
            format!("^{}", raw)
        };

        let compiled = Regex::new(&anchored).map_err(|source| ListError::InvalidFilter {
            pattern: raw.to_string(),
            source,
        })?;

        Ok(Self {
            raw: raw.to_string(),
            compiled,
        })
    }

    /// The pattern as it was written by the moderator or in the list file
    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn matches(&self, name: &str) -> bool {
        self.compiled.is_match(name)
    }
}

/// Deny-list, filters and safelist. Holds no lock of its own; the
/// moderation engine owns the only synchronization point around it.
/// Deny-list entries are kept lowercase and matched case-insensitively.
#[derive(Debug, Default)]
pub struct ListStore {
    banned_names: HashSet<String>,
    filters: Vec<FilterPattern>,
    safelist: HashSet<String>,
}

impl ListStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_lists(banned_names: Vec<String>, filters: Vec<FilterPattern>) -> Self {
        Self {
            banned_names: banned_names.iter().map(|n| n.to_lowercase()).collect(),
            filters,
            safelist: HashSet::new(),
        }
    }

    /// Evaluate a name. Safelisted names are returned `Clear` without
    /// looking at the deny-list or filters again.
    pub fn match_name(&self, name: &str) -> NameVerdict {
        if self.safelist.contains(name) {
            return NameVerdict::Clear;
        }

        if self.banned_names.is_empty() {
            debug!("No banned usernames loaded, if this is expected, please ignore.");
        } else if self.banned_names.contains(&name.to_lowercase()) {
            info!("Found the name {} in the ban lists", name);
            return NameVerdict::Denied;
        }

        if self.filters.is_empty() {
            debug!("No name filters loaded, if this is expected, please ignore.");
            return NameVerdict::Clear;
        }

        // insertion order, first hit wins
        if let Some(filter) = self.filters.iter().find(|f| f.matches(name)) {
            info!("The name {} matched ban filter '{}'", name, filter.raw());
            return NameVerdict::Denied;
        }

        NameVerdict::Clear
    }

    /// Returns false when the name was already on the deny-list.
    /// An explicit deny entry overrides an earlier safelisting.
    pub fn add_banned_name(&mut self, name: &str) -> bool {
        self.safelist.remove(name);
        self.banned_names.insert(name.to_lowercase())
    }

    /// Compile and append a filter. The store is untouched on error.
    pub fn add_filter(&mut self, pattern: &str) -> Result<(), ListError> {
        let filter = FilterPattern::compile(pattern)?;
        self.filters.push(filter);
        Ok(())
    }

    pub fn safelist(&mut self, name: &str) {
        if self.safelist.insert(name.to_string()) {
            info!("Safelisting user {} for this stream", name);
        }
    }

    pub fn is_safelisted(&self, name: &str) -> bool {
        self.safelist.contains(name)
    }

    pub fn is_banned_name(&self, name: &str) -> bool {
        self.banned_names.contains(&name.to_lowercase())
    }

    pub fn banned_count(&self) -> usize {
        self.banned_names.len()
    }

    pub fn filter_count(&self) -> usize {
        self.filters.len()
    }

    pub fn safelist_count(&self) -> usize {
        self.safelist.len()
    }

    pub fn filter_patterns(&self) -> Vec<String> {
        self.filters.iter().map(|f| f.raw().to_string()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(banned: &[&str], filters: &[&str]) -> ListStore {
        let filters = filters
            .iter()
            .map(|p| FilterPattern::compile(p).unwrap())
            .collect();
        ListStore::with_lists(banned.iter().map(|s| s.to_string()).collect(), filters)
    }

    #[test]
    fn test_banned_names_are_denied() {
        let store = store(&["spammer1", "spammer2"], &[]);
        assert_eq!(store.match_name("spammer1"), NameVerdict::Denied);
        assert_eq!(store.match_name("spammer2"), NameVerdict::Denied);
    }

    #[test]
    fn test_deny_list_is_exact_not_substring() {
        let store = store(&["spammer1"], &[]);
        assert_eq!(store.match_name("spammer"), NameVerdict::Clear);
        assert_eq!(store.match_name("xspammer1"), NameVerdict::Clear);
    }

    #[test]
    fn test_deny_list_ignores_case() {
        let mut store = store(&["Spammer1"], &[]);
        assert_eq!(store.match_name("spammer1"), NameVerdict::Denied);
        assert_eq!(store.match_name("SPAMMER1"), NameVerdict::Denied);

        assert!(!store.add_banned_name("spammer1"));
        assert!(store.is_banned_name("Spammer1"));
        assert_eq!(store.banned_count(), 1);
    }

    #[test]
    fn test_filters_are_start_anchored() {
        let store = store(&[], &["bot_", "^hoss\\d+"]);
        assert_eq!(store.match_name("bot_42"), NameVerdict::Denied);
        assert_eq!(store.match_name("hoss00312"), NameVerdict::Denied);
        assert_eq!(store.match_name("not_bot_42"), NameVerdict::Clear);
        assert_eq!(store.match_name("xhoss1"), NameVerdict::Clear);
    }

    #[test]
    fn test_empty_store_is_clear() {
        let store = ListStore::new();
        assert_eq!(store.match_name("anyone"), NameVerdict::Clear);
    }

    #[test]
    fn test_invalid_filter_leaves_store_unchanged() {
        let mut store = store(&[], &["bot_"]);
        let result = store.add_filter("xyz(");
        assert!(matches!(result, Err(ListError::InvalidFilter { .. })));
        assert_eq!(store.filter_count(), 1);
        assert_eq!(store.filter_patterns(), vec!["bot_".to_string()]);
    }

    #[test]
    fn test_added_filter_matches() {
        let mut store = ListStore::new();
        store.add_filter("raid[0-9]+").unwrap();
        assert_eq!(store.match_name("raid77"), NameVerdict::Denied);
        assert_eq!(store.match_name("myraid77"), NameVerdict::Clear);
    }

    #[test]
    fn test_safelisted_name_is_not_reevaluated() {
        let mut store = ListStore::new();
        assert_eq!(store.match_name("bot_late"), NameVerdict::Clear);
        store.safelist("bot_late");

        store.add_filter("bot_").unwrap();
        assert_eq!(store.match_name("bot_late"), NameVerdict::Clear);
        assert_eq!(store.match_name("bot_new"), NameVerdict::Denied);
    }

    #[test]
    fn test_add_banned_name_reports_duplicates() {
        let mut store = ListStore::new();
        assert!(store.add_banned_name("a"));
        assert!(!store.add_banned_name("a"));
        assert_eq!(store.banned_count(), 1);
    }

    #[test]
    fn test_ban_entry_overrides_safelist() {
        let mut store = ListStore::new();
        store.safelist("latecomer");
        store.add_banned_name("latecomer");
        assert!(!store.is_safelisted("latecomer"));
        assert_eq!(store.match_name("latecomer"), NameVerdict::Denied);
    }
}
