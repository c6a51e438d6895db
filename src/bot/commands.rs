use anyhow::Result;
use log::{debug, error, info, warn};
use tokio::sync::mpsc;

use crate::bot::action_queue::ActionQueue;
use crate::bot::moderation::ModerationEngine;
use crate::types::ChatMessage;

/// (platform, channel, message) waiting to be posted to chat
pub type ResponseSender = mpsc::UnboundedSender<(String, String, String)>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandPrefixes {
    pub ban_add: String,
    pub filter_add: String,
}

impl Default for CommandPrefixes {
    fn default() -> Self {
        Self {
            ban_add: "!BanAdd".to_string(),
            filter_add: "!FilterAdd".to_string(),
        }
    }
}

/// A recognised moderator command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModerationCommand {
    BanAdd(String),
    FilterAdd(String),
    /// Command word present but the argument is missing
    Usage(String),
}

impl CommandPrefixes {
    /// Parse `<prefix> <token>`. Anything after the first token is ignored.
    pub fn parse(&self, content: &str) -> Option<ModerationCommand> {
        if let Some(argument) = Self::argument(content, &self.ban_add) {
            return Some(match argument {
                Some(name) => {
                    let name = name.trim_start_matches('@').to_lowercase();
                    if name.is_empty() {
                        ModerationCommand::Usage(format!("Usage: {} <username>", self.ban_add))
                    } else {
                        ModerationCommand::BanAdd(name)
                    }
                }
                None => ModerationCommand::Usage(format!("Usage: {} <username>", self.ban_add)),
            });
        }

        if let Some(argument) = Self::argument(content, &self.filter_add) {
            return Some(match argument {
                Some(pattern) => ModerationCommand::FilterAdd(pattern.to_string()),
                None => ModerationCommand::Usage(format!("Usage: {} <pattern>", self.filter_add)),
            });
        }

        None
    }

    /// Outer None: not this command. Inner None: command without argument.
    fn argument<'a>(content: &'a str, prefix: &str) -> Option<Option<&'a str>> {
        let rest = content.trim_start().strip_prefix(prefix)?;
        if !rest.is_empty() && !rest.starts_with(char::is_whitespace) {
            return None;
        }
        Some(rest.split_whitespace().next())
    }
}

/// Handles the runtime list commands used by moderators in chat
#[derive(Clone)]
pub struct ModerationCommands {
    engine: ModerationEngine,
    queue: ActionQueue,
    prefixes: CommandPrefixes,
}

impl ModerationCommands {
    pub fn new(engine: ModerationEngine, queue: ActionQueue, prefixes: CommandPrefixes) -> Self {
        Self {
            engine,
            queue,
            prefixes,
        }
    }

    /// Process a single message. Returns true when it was a command we acted on.
    pub async fn process_message(
        &self,
        message: &ChatMessage,
        response_sender: &ResponseSender,
    ) -> Result<bool> {
        let command = match self.prefixes.parse(&message.content) {
            Some(command) => command,
            None => return Ok(false),
        };

        if !message.can_moderate() {
            debug!(
                "Ignoring list command from unprivileged user '{}' in #{}",
                message.username, message.channel
            );
            return Ok(false);
        }

        let response = match command {
            ModerationCommand::BanAdd(name) => {
                info!("{} added {} to the ban list in #{}", message.username, name, message.channel);
                self.engine.add_banned_name(&name).await;
                self.queue.submit(&name, &message.channel).await;
                format!("Added {} to the banned users list.", name)
            }
            ModerationCommand::FilterAdd(pattern) => match self.engine.add_filter(&pattern).await {
                Ok(()) => {
                    info!("{} added filter '{}' in #{}", message.username, pattern, message.channel);
                    format!("Added {} to the filter list.", pattern)
                }
                Err(e) => {
                    warn!("Rejected filter from {}: {}", message.username, e);
                    format!("Could not add {} to the filter list: invalid pattern.", pattern)
                }
            },
            ModerationCommand::Usage(usage) => usage,
        };

        self.send_response(response, message, response_sender);
        Ok(true)
    }

    fn send_response(&self, response: String, message: &ChatMessage, response_sender: &ResponseSender) {
        if let Err(e) = response_sender.send((
            message.platform.clone(),
            message.channel.clone(),
            response,
        )) {
            error!("Failed to send command response: {}", e);
        }
    }
}
