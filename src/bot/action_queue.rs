// src/bot/action_queue.rs - Sequential, rate-paced ban worker

use log::{debug, error, info, warn};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, timeout, Instant};

use crate::bot::moderation::ModerationEngine;
use crate::bot::shutdown::ShutdownPhase;
use crate::platforms::{AccountDirectory, PlatformConnection};
use crate::types::ActionStep;

/// A denied name waiting to be banned
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BanRequest {
    pub name: String,
    pub channel: String,
}

#[derive(Debug, Clone)]
pub struct ActionSettings {
    /// Minimum gap between the end of one action and the start of the next
    pub rate_limit_interval: Duration,
    /// Bound on every external call made by an action
    pub call_timeout: Duration,
    /// Post "banned <name>" after a successful chat ban
    pub announce_bans: bool,
}

impl Default for ActionSettings {
    fn default() -> Self {
        Self {
            rate_limit_interval: Duration::from_millis(1000),
            call_timeout: Duration::from_secs(10),
            announce_bans: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepStatus {
    Succeeded,
    Failed(String),
    Skipped,
}

/// What one action did, step by step
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionOutcome {
    pub name: String,
    pub channel: String,
    pub chat_ban: StepStatus,
    pub block: StepStatus,
}

/// Handle used by producers to submit bans. Cloning shares the same worker.
#[derive(Clone)]
pub struct ActionQueue {
    sender: mpsc::UnboundedSender<BanRequest>,
    engine: ModerationEngine,
}

/// Runs the actions themselves
struct ActionExecutor {
    engine: ModerationEngine,
    chat: Arc<dyn PlatformConnection>,
    directory: Option<Arc<dyn AccountDirectory>>,
    settings: ActionSettings,
}

impl ActionQueue {
    /// Spawn the single worker and return the producer handle
    pub fn start(
        engine: ModerationEngine,
        chat: Arc<dyn PlatformConnection>,
        directory: Option<Arc<dyn AccountDirectory>>,
        settings: ActionSettings,
        shutdown: broadcast::Receiver<ShutdownPhase>,
    ) -> (Self, JoinHandle<()>) {
        let (sender, receiver) = mpsc::unbounded_channel();

        if directory.is_none() {
            warn!("No account directory configured, account blocks will be skipped");
        }

        let executor = ActionExecutor {
            engine: engine.clone(),
            chat,
            directory,
            settings,
        };
        let worker = tokio::spawn(executor.run(receiver, shutdown));

        (Self { sender, engine }, worker)
    }

    /// Queue a ban without waiting for it. Returns false when the name was
    /// already banned or queued this session, or the worker has stopped.
    pub async fn submit(&self, name: &str, channel: &str) -> bool {
        if !self.engine.reserve_action(name).await {
            debug!("{} was already actioned this session, not queueing again", name);
            return false;
        }

        let request = BanRequest {
            name: name.to_string(),
            channel: channel.to_string(),
        };
        match self.sender.send(request) {
            Ok(()) => {
                info!("Queued ban for {} in #{}", name, channel);
                true
            }
            Err(e) => {
                error!("Action queue is closed, dropping ban for {}", e.0.name);
                false
            }
        }
    }
}

impl ActionExecutor {
    async fn run(
        self,
        mut receiver: mpsc::UnboundedReceiver<BanRequest>,
        mut shutdown: broadcast::Receiver<ShutdownPhase>,
    ) {
        info!("Action queue worker started");
        let mut last_completed: Option<Instant> = None;

        loop {
            let request = tokio::select! {
                biased;
                _ = shutdown.recv() => break,
                request = receiver.recv() => match request {
                    Some(request) => request,
                    None => break,
                },
            };

            if let Some(completed) = last_completed {
                let ready_at = completed + self.settings.rate_limit_interval;
                tokio::select! {
                    biased;
                    _ = shutdown.recv() => break,
                    _ = sleep_until(ready_at) => {}
                }
            }

            // runs to completion even if shutdown arrives meanwhile
            let outcome = self.execute(&request).await;
            debug!("Action outcome: {:?}", outcome);
            last_completed = Some(Instant::now());
        }

        receiver.close();
        let mut abandoned = 0usize;
        while let Ok(BanRequest { name, channel }) = receiver.try_recv() {
            warn!("Ban for {} in #{} was never started, abandoning it", name, channel);
            self.engine
                .record_failure(&name, &channel, ActionStep::NotStarted, "worker stopped".to_string())
                .await;
            abandoned += 1;
        }
        if abandoned > 0 {
            warn!("Action queue stopped with {} unprocessed bans", abandoned);
        }
        info!("Action queue worker stopped");
    }

    /// Chat ban, then account block, then log. Each step is attempted.
    async fn execute(&self, request: &BanRequest) -> ActionOutcome {
        let BanRequest { name, channel } = request;

        let chat_ban = match self
            .bounded(self.chat.send_moderation_directive(channel, name))
            .await
        {
            Ok(()) => {
                info!("Banned {} in #{}", name, channel);
                StepStatus::Succeeded
            }
            Err(e) => {
                error!("Failed to ban {} in #{}: {}", name, channel, e);
                self.engine
                    .record_failure(name, channel, ActionStep::ChatBan, e.clone())
                    .await;
                StepStatus::Failed(e)
            }
        };

        if chat_ban == StepStatus::Succeeded && self.settings.announce_bans {
            let text = format!("banned {}", name);
            if let Err(e) = self.bounded(self.chat.send_message(channel, &text)).await {
                warn!("Failed to announce ban of {}: {}", name, e);
            }
        }

        let block = self.block(name).await;
        if let StepStatus::Failed(reason) = &block {
            self.engine
                .record_failure(name, channel, ActionStep::AccountBlock, reason.clone())
                .await;
        }

        if chat_ban == StepStatus::Succeeded {
            self.engine.record_ban(name).await;
        }

        ActionOutcome {
            name: name.clone(),
            channel: channel.clone(),
            chat_ban,
            block,
        }
    }

    async fn block(&self, name: &str) -> StepStatus {
        let directory = match &self.directory {
            Some(directory) => directory,
            None => return StepStatus::Skipped,
        };

        let names = vec![name.to_string()];
        let ids = match self.bounded(directory.lookup_user_ids(&names)).await {
            Ok(ids) => ids,
            Err(e) => {
                warn!("Failed to look up account id for {}: {}", name, e);
                return StepStatus::Failed(e);
            }
        };

        let user_id = match ids.get(name) {
            Some(id) => id,
            None => {
                warn!("No account found for {}, skipping block", name);
                return StepStatus::Failed(format!("no account found for {}", name));
            }
        };

        match self.bounded(directory.block_user(user_id)).await {
            Ok(()) => {
                info!("Blocked account {} ({})", name, user_id);
                StepStatus::Succeeded
            }
            Err(e) => {
                warn!("Failed to block account {} ({}): {}", name, user_id, e);
                StepStatus::Failed(e)
            }
        }
    }

    /// Apply the call timeout; a timeout counts as a failure of that call
    async fn bounded<T, F>(&self, call: F) -> Result<T, String>
    where
        F: Future<Output = anyhow::Result<T>>,
    {
        match timeout(self.settings.call_timeout, call).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => Err(format!(
                "timed out after {}ms",
                self.settings.call_timeout.as_millis()
            )),
        }
    }
}
