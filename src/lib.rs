//! # Namewarden
//!
//! A chat moderation agent for Twitch that bans accounts whose usernames
//! match a deny-list or a set of anchored regex filters.
//!
//! ## Features
//!
//! - **Live screening**: every unbadged chatter, new joiner and user state notice is checked
//! - **Roster audits**: the full channel roster is re-checked on a fixed interval
//! - **Rate-paced actions**: bans run one at a time with a pause between them
//! - **Runtime lists**: moderators add names and filters from chat
//! - **Session logs**: bans and new filters are written out on shutdown
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use namewarden::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = BotConfiguration::default();
//!     let engine = ModerationBot::load_engine(&config).await;
//!
//!     let twitch = Arc::new(TwitchConnection::new(TwitchConfig::from_env()?));
//!     let bot = ModerationBot::new(config, engine, twitch.clone(), twitch, None);
//!
//!     bot.run(&["somestreamer".to_string()]).await
//! }
//! ```

pub mod bot;
pub mod config;
pub mod platforms;
pub mod types;

// Re-export commonly used items
pub mod prelude {
    pub use crate::bot::action_queue::{ActionQueue, ActionSettings};
    pub use crate::bot::moderation::ModerationEngine;
    pub use crate::bot::ModerationBot;
    pub use crate::config::BotConfiguration;
    pub use crate::platforms::{
        helix::{HelixClient, HelixConfig},
        twitch::{TwitchConfig, TwitchConnection},
        AccountDirectory, PlatformConnection, RosterQuery,
    };
    pub use crate::types::{ChatEvent, ChatMessage, NameVerdict};
    pub use anyhow::Result;
}

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
