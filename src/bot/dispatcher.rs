// src/bot/dispatcher.rs - Routes inbound chat events to the moderation core

use log::{debug, error, info};

use crate::bot::action_queue::ActionQueue;
use crate::bot::commands::{ModerationCommands, ResponseSender};
use crate::bot::moderation::ModerationEngine;
use crate::types::{ChatEvent, ChatMessage, NameVerdict, UserStateNotice};

/// Screens names from live events. Never waits on network I/O; denied names
/// go to the action queue.
#[derive(Clone)]
pub struct EventDispatcher {
    engine: ModerationEngine,
    queue: ActionQueue,
    commands: ModerationCommands,
    response_sender: ResponseSender,
}

impl EventDispatcher {
    pub fn new(
        engine: ModerationEngine,
        queue: ActionQueue,
        commands: ModerationCommands,
        response_sender: ResponseSender,
    ) -> Self {
        Self {
            engine,
            queue,
            commands,
            response_sender,
        }
    }

    pub async fn dispatch(&self, event: ChatEvent) {
        match event {
            ChatEvent::Join { channel, username } => {
                debug!("{} joined #{}", username, channel);
                self.screen(&username, &channel).await;
            }
            ChatEvent::Message(message) => self.handle_message(&message).await,
            ChatEvent::UserState(notice) => self.handle_user_state(&notice).await,
        }
    }

    /// Same decision an audit makes for one roster entry
    async fn screen(&self, name: &str, channel: &str) -> Option<NameVerdict> {
        if self.engine.is_safelisted(name).await {
            return None;
        }
        let verdict = self.engine.evaluate(name).await;
        if verdict.is_denied() {
            info!("{} in #{} matches the ban lists", name, channel);
            self.queue.submit(name, channel).await;
        }
        Some(verdict)
    }

    async fn handle_message(&self, message: &ChatMessage) {
        if message.has_no_role() && !self.screen_display_name(message).await {
            self.screen(&message.username, &message.channel).await;
        }

        // a message can be screened and still be a command
        if message.can_moderate() {
            if let Err(e) = self
                .commands
                .process_message(message, &self.response_sender)
                .await
            {
                error!("Error processing command from {}: {}", message.username, e);
            }
        }
    }

    /// A display name that is more than a recapitalised login is screened on
    /// its own; the ban still targets the login. Returns true when it did.
    async fn screen_display_name(&self, message: &ChatMessage) -> bool {
        let display = match message.display_name.as_deref() {
            Some(display) if !display.is_empty() && !display.eq_ignore_ascii_case(&message.username) => {
                display
            }
            _ => return false,
        };

        if !self.engine.check(display).await.is_denied() {
            return false;
        }
        info!(
            "Display name '{}' of {} in #{} matches the ban lists",
            display, message.username, message.channel
        );
        self.queue.submit(&message.username, &message.channel).await;
        true
    }

    /// Login and display name are checked as two separate strings
    async fn handle_user_state(&self, notice: &UserStateNotice) {
        let candidates = [notice.login.as_deref(), notice.display_name.as_deref()];

        let mut denied = false;
        for name in candidates.iter().flatten().filter(|n| !n.is_empty()) {
            if self.engine.check(name).await.is_denied() {
                debug!("User state name '{}' in #{} matches the ban lists", name, notice.channel);
                denied = true;
            }
        }
        if !denied {
            return;
        }

        let target = notice
            .login
            .as_deref()
            .filter(|l| !l.is_empty())
            .or(notice.display_name.as_deref());
        if let Some(target) = target {
            self.queue.submit(&target.to_lowercase(), &notice.channel).await;
        }
    }
}
