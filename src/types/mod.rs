// src/types/mod.rs - Shared data model for the moderation agent

use serde::{Deserialize, Serialize};

/// Badges that mark a chatter as holding a role in the channel
pub const ROLE_BADGES: &[&str] = &[
    "broadcaster",
    "moderator",
    "vip",
    "subscriber",
    "founder",
    "staff",
    "admin",
    "global_mod",
];

/// Badges that allow a chatter to issue moderation commands
pub const COMMAND_BADGES: &[&str] = &["broadcaster", "moderator", "vip"];

/// A chat message received from the platform
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub platform: String,
    pub channel: String,
    pub username: String,
    pub display_name: Option<String>,
    pub content: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub user_badges: Vec<String>,
    pub is_mod: bool,
    pub is_subscriber: bool,
}

impl ChatMessage {
    /// True when the sender is not a moderator or subscriber and carries none
    /// of the recognised role badges
    pub fn has_no_role(&self) -> bool {
        !self.is_mod
            && !self.is_subscriber
            && !self
                .user_badges
                .iter()
                .any(|badge| ROLE_BADGES.contains(&badge.as_str()))
    }

    /// Moderator, broadcaster and VIP may use moderation commands
    pub fn can_moderate(&self) -> bool {
        self.is_mod
            || self
                .user_badges
                .iter()
                .any(|badge| COMMAND_BADGES.contains(&badge.as_str()))
    }
}

/// User-state notice: login and display name are screened independently
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserStateNotice {
    pub channel: String,
    pub login: Option<String>,
    pub display_name: Option<String>,
}

/// Inbound events routed by the dispatcher
#[derive(Debug, Clone)]
pub enum ChatEvent {
    /// A user joined a channel we are present in
    Join { channel: String, username: String },
    Message(ChatMessage),
    UserState(UserStateNotice),
}

/// Result of evaluating a name against the deny-list and filters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NameVerdict {
    Clear,
    Denied,
}

impl NameVerdict {
    pub fn is_denied(&self) -> bool {
        matches!(self, NameVerdict::Denied)
    }
}

/// Connection state of a channel the agent is present in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChannelState {
    Joined,
    Left,
}

/// A channel (room) the agent has joined
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Broadcaster {
    pub name: String,
    pub state: ChannelState,
}

impl Broadcaster {
    pub fn joined(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: ChannelState::Joined,
        }
    }

    pub fn is_joined(&self) -> bool {
        self.state == ChannelState::Joined
    }
}

/// A name banned during this session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BanLogEntry {
    pub name: String,
    pub banned_at: chrono::DateTime<chrono::Utc>,
}

/// A filter added during this session (as opposed to loaded from disk)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewFilterEntry {
    pub pattern: String,
}

/// Which step of a moderation action failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActionStep {
    ChatBan,
    AccountBlock,
    /// Still queued when the worker stopped
    NotStarted,
}

/// Recorded partial failure of a moderation action
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedAction {
    pub name: String,
    pub channel: String,
    pub step: ActionStep,
    pub reason: String,
    pub failed_at: chrono::DateTime<chrono::Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message_with_badges(badges: &[&str], is_mod: bool) -> ChatMessage {
        ChatMessage {
            platform: "twitch".to_string(),
            channel: "chan".to_string(),
            username: "someone".to_string(),
            display_name: None,
            content: "hi".to_string(),
            timestamp: chrono::Utc::now(),
            user_badges: badges.iter().map(|b| b.to_string()).collect(),
            is_mod,
            is_subscriber: false,
        }
    }

    #[test]
    fn test_role_detection() {
        assert!(message_with_badges(&[], false).has_no_role());
        assert!(!message_with_badges(&["subscriber"], false).has_no_role());
        assert!(!message_with_badges(&[], true).has_no_role());
        // unknown cosmetic badges do not count as a role
        assert!(message_with_badges(&["glhf-pledge"], false).has_no_role());

        // the subscriber tag counts even when the badge list is missing
        let mut subscriber = message_with_badges(&[], false);
        subscriber.is_subscriber = true;
        assert!(!subscriber.has_no_role());
    }

    #[test]
    fn test_command_permission() {
        assert!(message_with_badges(&["vip"], false).can_moderate());
        assert!(message_with_badges(&["broadcaster"], false).can_moderate());
        assert!(message_with_badges(&[], true).can_moderate());
        assert!(!message_with_badges(&["subscriber"], false).can_moderate());
    }
}
