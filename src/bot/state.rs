// src/bot/state.rs - Session accumulators flushed at shutdown

use chrono::{DateTime, Utc};
use std::collections::HashSet;

use crate::types::{ActionStep, BanLogEntry, FailedAction, NewFilterEntry};

/// Append-only record of what this session did
#[derive(Debug, Default)]
pub struct ModerationState {
    ban_log: Vec<BanLogEntry>,
    new_filters: Vec<NewFilterEntry>,
    failures: Vec<FailedAction>,
    /// Every name that has ever been handed to the action queue
    attempted: HashSet<String>,
}

/// Copy of the persisted parts of the session
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub banned_names: Vec<String>,
    pub new_filters: Vec<String>,
}

impl ModerationState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim a name for the action queue. Returns false when the name was
    /// already claimed this session, whatever the outcome of that action.
    pub fn reserve(&mut self, name: &str) -> bool {
        self.attempted.insert(name.to_string())
    }

    pub fn is_reserved(&self, name: &str) -> bool {
        self.attempted.contains(name)
    }

    pub fn record_ban(&mut self, name: &str, banned_at: DateTime<Utc>) {
        if self.ban_log.iter().any(|entry| entry.name == name) {
            return;
        }
        self.attempted.insert(name.to_string());
        self.ban_log.push(BanLogEntry {
            name: name.to_string(),
            banned_at,
        });
    }

    pub fn record_new_filter(&mut self, pattern: &str) {
        self.new_filters.push(NewFilterEntry {
            pattern: pattern.to_string(),
        });
    }

    pub fn record_failure(&mut self, name: &str, channel: &str, step: ActionStep, reason: String) {
        self.failures.push(FailedAction {
            name: name.to_string(),
            channel: channel.to_string(),
            step,
            reason,
            failed_at: Utc::now(),
        });
    }

    pub fn is_banned(&self, name: &str) -> bool {
        self.ban_log.iter().any(|entry| entry.name == name)
    }

    pub fn ban_log(&self) -> &[BanLogEntry] {
        &self.ban_log
    }

    pub fn new_filters(&self) -> &[NewFilterEntry] {
        &self.new_filters
    }

    pub fn failures(&self) -> &[FailedAction] {
        &self.failures
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            banned_names: self.ban_log.iter().map(|e| e.name.clone()).collect(),
            new_filters: self.new_filters.iter().map(|e| e.pattern.clone()).collect(),
        }
    }
}
