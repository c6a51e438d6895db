// src/bot/channels.rs - Broadcaster channels and their joined/left state

use log::info;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::types::{Broadcaster, ChannelState};

/// Tracks which broadcaster channels the bot currently sits in
#[derive(Clone, Default)]
pub struct ChannelRegistry {
    channels: Arc<RwLock<BTreeMap<String, Broadcaster>>>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn mark_joined(&self, channel: &str) {
        let mut channels = self.channels.write().await;
        channels
            .entry(channel.to_string())
            .and_modify(|b| b.state = ChannelState::Joined)
            .or_insert_with(|| Broadcaster::joined(channel));
        info!("Joined #{}", channel);
    }

    /// A left channel stays known but is skipped by audits
    pub async fn mark_left(&self, channel: &str) {
        if let Some(broadcaster) = self.channels.write().await.get_mut(channel) {
            broadcaster.state = ChannelState::Left;
            info!("Left #{}", channel);
        }
    }

    pub async fn is_joined(&self, channel: &str) -> bool {
        self.channels
            .read()
            .await
            .get(channel)
            .map(Broadcaster::is_joined)
            .unwrap_or(false)
    }

    /// Joined channel names in name order
    pub async fn joined(&self) -> Vec<String> {
        self.channels
            .read()
            .await
            .values()
            .filter(|b| b.is_joined())
            .map(|b| b.name.clone())
            .collect()
    }

    pub async fn all(&self) -> Vec<Broadcaster> {
        self.channels.read().await.values().cloned().collect()
    }
}
