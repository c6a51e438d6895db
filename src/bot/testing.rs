// src/bot/testing.rs - In-memory collaborators for unit tests

use anyhow::Result;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;

use crate::platforms::{AccountDirectory, PlatformConnection, RosterQuery};
use crate::types::{ChatEvent, ChatMessage};

/// Everything a mock collaborator observed, in call order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recorded {
    Directive { channel: String, username: String },
    Message { channel: String, text: String },
    Lookup(Vec<String>),
    Block(String),
    Join(String),
    Leave(String),
}

#[derive(Default)]
struct MockInner {
    calls: Vec<Recorded>,
    rosters: HashMap<String, Vec<String>>,
    failing_directives: HashSet<String>,
    failing_rosters: HashSet<String>,
    fail_blocks: bool,
    directive_delay: Option<Duration>,
}

/// Chat transport, roster and account directory in one recorder
#[derive(Clone)]
pub struct MockPlatform {
    inner: Arc<Mutex<MockInner>>,
    events: broadcast::Sender<ChatEvent>,
}

impl MockPlatform {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            inner: Arc::new(Mutex::new(MockInner::default())),
            events,
        }
    }

    pub fn set_roster(&self, channel: &str, users: &[&str]) {
        self.inner.lock().unwrap().rosters.insert(
            channel.to_string(),
            users.iter().map(|u| u.to_string()).collect(),
        );
    }

    pub fn fail_roster_for(&self, channel: &str) {
        self.inner.lock().unwrap().failing_rosters.insert(channel.to_string());
    }

    pub fn fail_directive_for(&self, username: &str) {
        self.inner.lock().unwrap().failing_directives.insert(username.to_string());
    }

    pub fn fail_blocks(&self) {
        self.inner.lock().unwrap().fail_blocks = true;
    }

    pub fn delay_directives(&self, delay: Duration) {
        self.inner.lock().unwrap().directive_delay = Some(delay);
    }

    pub fn emit(&self, event: ChatEvent) {
        let _ = self.events.send(event);
    }

    pub fn calls(&self) -> Vec<Recorded> {
        self.inner.lock().unwrap().calls.clone()
    }

    pub fn banned(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Recorded::Directive { username, .. } => Some(username),
                _ => None,
            })
            .collect()
    }

    pub fn blocked(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Recorded::Block(id) => Some(id),
                _ => None,
            })
            .collect()
    }

    pub fn messages(&self) -> Vec<(String, String)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Recorded::Message { channel, text } => Some((channel, text)),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: Recorded) {
        self.inner.lock().unwrap().calls.push(call);
    }
}

#[async_trait]
impl PlatformConnection for MockPlatform {
    async fn connect(&self) -> Result<()> {
        Ok(())
    }

    async fn join(&self, channel: &str) -> Result<()> {
        self.record(Recorded::Join(channel.to_string()));
        Ok(())
    }

    async fn leave(&self, channel: &str) -> Result<()> {
        self.record(Recorded::Leave(channel.to_string()));
        Ok(())
    }

    async fn send_message(&self, channel: &str, message: &str) -> Result<()> {
        self.record(Recorded::Message {
            channel: channel.to_string(),
            text: message.to_string(),
        });
        Ok(())
    }

    async fn send_moderation_directive(&self, channel: &str, username: &str) -> Result<()> {
        let (delay, fails) = {
            let inner = self.inner.lock().unwrap();
            (inner.directive_delay, inner.failing_directives.contains(username))
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.record(Recorded::Directive {
            channel: channel.to_string(),
            username: username.to_string(),
        });
        if fails {
            return Err(anyhow::anyhow!("chat write failed"));
        }
        Ok(())
    }

    fn platform_name(&self) -> &str {
        "mock"
    }

    async fn is_connected(&self) -> bool {
        true
    }

    fn get_event_receiver(&self) -> Option<broadcast::Receiver<ChatEvent>> {
        Some(self.events.subscribe())
    }

    async fn disconnect(&self) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl RosterQuery for MockPlatform {
    async fn list_users(&self, channel: &str) -> Result<Vec<String>> {
        let inner = self.inner.lock().unwrap();
        if inner.failing_rosters.contains(channel) {
            return Err(anyhow::anyhow!("roster unavailable for {}", channel));
        }
        Ok(inner.rosters.get(channel).cloned().unwrap_or_default())
    }
}

#[async_trait]
impl AccountDirectory for MockPlatform {
    async fn lookup_user_ids(&self, names: &[String]) -> Result<HashMap<String, String>> {
        self.record(Recorded::Lookup(names.to_vec()));
        Ok(names
            .iter()
            .map(|name| (name.clone(), format!("id-{}", name)))
            .collect())
    }

    async fn block_user(&self, user_id: &str) -> Result<()> {
        self.record(Recorded::Block(user_id.to_string()));
        if self.inner.lock().unwrap().fail_blocks {
            return Err(anyhow::anyhow!("block API returned 500"));
        }
        Ok(())
    }
}

pub fn chat_message(channel: &str, username: &str, content: &str, badges: &[&str]) -> ChatMessage {
    ChatMessage {
        platform: "mock".to_string(),
        channel: channel.to_string(),
        username: username.to_string(),
        display_name: None,
        content: content.to_string(),
        timestamp: chrono::Utc::now(),
        user_badges: badges.iter().map(|b| b.to_string()).collect(),
        is_mod: badges.contains(&"moderator"),
        is_subscriber: badges.contains(&"subscriber"),
    }
}
