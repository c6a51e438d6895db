use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::broadcast;

use crate::types::ChatEvent;

pub mod helix;
pub mod twitch;

/// Trait defining the chat transport the moderation core talks to
#[async_trait]
pub trait PlatformConnection: Send + Sync {
    /// Connect to the platform and start receiving events
    async fn connect(&self) -> Result<()>;

    async fn join(&self, channel: &str) -> Result<()>;

    async fn leave(&self, channel: &str) -> Result<()>;

    /// Send a message to the specified channel
    async fn send_message(&self, channel: &str, message: &str) -> Result<()>;

    /// Issue the in-chat ban directive for a user
    async fn send_moderation_directive(&self, channel: &str, username: &str) -> Result<()>;

    /// Get the platform identifier (e.g., "twitch")
    fn platform_name(&self) -> &str;

    /// Check if the connection is healthy
    async fn is_connected(&self) -> bool;

    /// Get a receiver for incoming events
    fn get_event_receiver(&self) -> Option<broadcast::Receiver<ChatEvent>>;

    /// Gracefully disconnect
    async fn disconnect(&self) -> Result<()>;
}

/// Full list of users present in a channel
#[async_trait]
pub trait RosterQuery: Send + Sync {
    async fn list_users(&self, channel: &str) -> Result<Vec<String>>;
}

/// Platform account directory used to block accounts outside of chat
#[async_trait]
pub trait AccountDirectory: Send + Sync {
    /// Resolve login names to account ids; unknown names are absent from the map
    async fn lookup_user_ids(&self, names: &[String]) -> Result<HashMap<String, String>>;

    async fn block_user(&self, user_id: &str) -> Result<()>;
}
