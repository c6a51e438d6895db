// src/bot/moderation.rs - Moderation engine: the single owner of list and session state

use chrono::Utc;
use log::{debug, info};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::bot::list_store::{FilterPattern, ListError, ListStore};
use crate::bot::state::{ModerationState, SessionSnapshot};
use crate::types::{ActionStep, FailedAction, NameVerdict};

/// Everything guarded by the engine lock
#[derive(Debug, Default)]
struct EngineState {
    lists: ListStore,
    session: ModerationState,
}

/// Counters for status logging
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineStats {
    pub banned_names: usize,
    pub filters: usize,
    pub safelisted: usize,
    pub session_bans: usize,
    pub session_filters: usize,
    pub failed_actions: usize,
}

/// Owns the deny-list, filters, safelist and session logs. Every read and
/// write goes through one lock, held for a single match-or-mutate step and
/// never across a network call.
#[derive(Clone, Default)]
pub struct ModerationEngine {
    state: Arc<RwLock<EngineState>>,
}

impl ModerationEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_lists(banned_names: Vec<String>, filters: Vec<FilterPattern>) -> Self {
        let state = EngineState {
            lists: ListStore::with_lists(banned_names, filters),
            session: ModerationState::new(),
        };
        Self {
            state: Arc::new(RwLock::new(state)),
        }
    }

    /// Match without side effects
    pub async fn check(&self, name: &str) -> NameVerdict {
        self.state.read().await.lists.match_name(name)
    }

    /// Match, and safelist the name when it comes back clear
    pub async fn evaluate(&self, name: &str) -> NameVerdict {
        let mut state = self.state.write().await;
        let verdict = state.lists.match_name(name);
        if verdict == NameVerdict::Clear {
            state.lists.safelist(name);
        }
        verdict
    }

    pub async fn is_safelisted(&self, name: &str) -> bool {
        self.state.read().await.lists.is_safelisted(name)
    }

    pub async fn safelist(&self, name: &str) {
        self.state.write().await.lists.safelist(name);
    }

    pub async fn add_banned_name(&self, name: &str) -> bool {
        let added = self.state.write().await.lists.add_banned_name(name);
        if added {
            info!("Added {} to the deny-list", name);
        } else {
            debug!("{} is already on the deny-list", name);
        }
        added
    }

    /// Add a filter and log it as new for this session
    pub async fn add_filter(&self, pattern: &str) -> Result<(), ListError> {
        let mut state = self.state.write().await;
        state.lists.add_filter(pattern)?;
        state.session.record_new_filter(pattern);
        info!("Added name filter '{}'", pattern);
        Ok(())
    }

    /// Claim a name for banning; false if it was banned or queued before
    pub async fn reserve_action(&self, name: &str) -> bool {
        self.state.write().await.session.reserve(name)
    }

    pub async fn record_ban(&self, name: &str) {
        self.state.write().await.session.record_ban(name, Utc::now());
    }

    pub async fn record_failure(&self, name: &str, channel: &str, step: ActionStep, reason: String) {
        self.state
            .write()
            .await
            .session
            .record_failure(name, channel, step, reason);
    }

    pub async fn failures(&self) -> Vec<FailedAction> {
        self.state.read().await.session.failures().to_vec()
    }

    pub async fn is_banned(&self, name: &str) -> bool {
        self.state.read().await.session.is_banned(name)
    }

    pub async fn filter_count(&self) -> usize {
        self.state.read().await.lists.filter_count()
    }

    pub async fn session_snapshot(&self) -> SessionSnapshot {
        self.state.read().await.session.snapshot()
    }

    pub async fn stats(&self) -> EngineStats {
        let state = self.state.read().await;
        EngineStats {
            banned_names: state.lists.banned_count(),
            filters: state.lists.filter_count(),
            safelisted: state.lists.safelist_count(),
            session_bans: state.session.ban_log().len(),
            session_filters: state.session.new_filters().len(),
            failed_actions: state.session.failures().len(),
        }
    }
}
