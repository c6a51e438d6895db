use anyhow::{Context, Result};
use log::{error, info, warn};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::timeout;

use crate::config::BotConfiguration;
use crate::platforms::{AccountDirectory, PlatformConnection, RosterQuery};
use crate::types::ChatEvent;

pub mod action_queue;
pub mod audit;
pub mod channels;
pub mod commands;
pub mod dispatcher;
pub mod list_store;
pub mod moderation;
pub mod persistence;
pub mod shutdown;
pub mod state;

#[cfg(test)]
pub(crate) mod testing;

use action_queue::ActionQueue;
use audit::AuditLoop;
use channels::ChannelRegistry;
use commands::ModerationCommands;
use dispatcher::EventDispatcher;
use moderation::ModerationEngine;
use shutdown::{
    ConnectionShutdownComponent, GracefulShutdown, SessionLogShutdownComponent, ShutdownConfig,
    ShutdownPhase, TaskShutdownComponent,
};

/// Core bot engine: wires the chat connection to the moderation core and
/// owns the shutdown sequence
pub struct ModerationBot {
    config: BotConfiguration,
    engine: ModerationEngine,
    channels: ChannelRegistry,
    connection: Arc<dyn PlatformConnection>,
    roster: Arc<dyn RosterQuery>,
    directory: Option<Arc<dyn AccountDirectory>>,
    shutdown: Arc<GracefulShutdown>,
}

impl ModerationBot {
    pub fn new(
        config: BotConfiguration,
        engine: ModerationEngine,
        connection: Arc<dyn PlatformConnection>,
        roster: Arc<dyn RosterQuery>,
        directory: Option<Arc<dyn AccountDirectory>>,
    ) -> Self {
        let shutdown = Arc::new(GracefulShutdown::new(ShutdownConfig {
            component_timeout_seconds: config.shutdown_timeout_seconds,
        }));

        Self {
            config,
            engine,
            channels: ChannelRegistry::new(),
            connection,
            roster,
            directory,
            shutdown,
        }
    }

    /// Build the engine from the list and filter directories. Anything that
    /// cannot be read is logged and left out.
    pub async fn load_engine(config: &BotConfiguration) -> ModerationEngine {
        let banned_names = persistence::load_list_dir(&config.lists_dir).await;
        let filters = persistence::compile_filters(persistence::load_list_dir(&config.filters_dir).await);

        info!("Loaded {} banned names and {} filters", banned_names.len(), filters.len());
        ModerationEngine::with_lists(banned_names, filters)
    }

    pub fn engine(&self) -> &ModerationEngine {
        &self.engine
    }

    pub fn channels(&self) -> &ChannelRegistry {
        &self.channels
    }

    pub fn shutdown_handle(&self) -> Arc<GracefulShutdown> {
        Arc::clone(&self.shutdown)
    }

    /// Connect, join channels and start the background tasks. Only a failed
    /// connect is an error.
    pub async fn start(&self, channels: &[String]) -> Result<()> {
        info!("Starting moderation bot...");

        self.connection
            .connect()
            .await
            .with_context(|| format!("Failed to connect to {}", self.connection.platform_name()))?;

        let events = self
            .connection
            .get_event_receiver()
            .context("Chat connection provides no event stream")?;

        for channel in channels {
            match self.connection.join(channel).await {
                Ok(()) => self.channels.mark_joined(channel).await,
                Err(e) => error!("Failed to join #{}: {:#}", channel, e),
            }
        }
        if self.channels.joined().await.is_empty() {
            warn!("Not present in any channel, only commands from other sources will be seen");
        }

        let (queue, worker) = ActionQueue::start(
            self.engine.clone(),
            Arc::clone(&self.connection),
            self.directory.clone(),
            self.config.action_settings(),
            self.shutdown.subscribe_to_shutdown(),
        );

        let (response_tx, response_rx) = mpsc::unbounded_channel();
        self.spawn_response_sender(response_rx);

        let commands =
            ModerationCommands::new(self.engine.clone(), queue.clone(), self.config.command_prefixes());
        let dispatcher = EventDispatcher::new(self.engine.clone(), queue.clone(), commands, response_tx);
        let event_loop = Self::spawn_event_loop(dispatcher, events, self.shutdown.subscribe_to_shutdown());

        let audit = AuditLoop::new(
            self.engine.clone(),
            queue,
            Arc::clone(&self.roster),
            self.channels.clone(),
            self.config.audit_interval(),
            self.config.call_timeout(),
        )
        .spawn(self.shutdown.subscribe_to_shutdown());

        // order matters: stop producers, finish the in-flight ban, then flush
        // and leave
        self.shutdown
            .register_component(Box::new(TaskShutdownComponent::new("EventDispatcher", event_loop)))
            .await;
        self.shutdown
            .register_component(Box::new(TaskShutdownComponent::new("AuditLoop", audit)))
            .await;
        self.shutdown
            .register_component(Box::new(
                TaskShutdownComponent::new("ActionQueue", worker)
                    .with_timeout(self.config.action_drain_timeout()),
            ))
            .await;
        self.shutdown
            .register_component(Box::new(SessionLogShutdownComponent::new(
                self.engine.clone(),
                self.config.logs_dir.clone(),
            )))
            .await;
        self.shutdown
            .register_component(Box::new(ConnectionShutdownComponent::new(
                Arc::clone(&self.connection),
                self.channels.clone(),
            )))
            .await;

        let stats = self.engine.stats().await;
        info!(
            "Moderation bot started: {} channels, {} banned names, {} filters",
            self.channels.joined().await.len(),
            stats.banned_names,
            stats.filters
        );
        Ok(())
    }

    /// Start, then block until a shutdown signal has been handled
    pub async fn run(&self, channels: &[String]) -> Result<()> {
        self.start(channels).await?;
        self.shutdown.start_signal_handlers().await;
        self.shutdown.wait_for_shutdown().await?;

        let stats = self.engine.stats().await;
        info!(
            "Session finished: {} bans, {} new filters, {} failed actions",
            stats.session_bans, stats.session_filters, stats.failed_actions
        );
        Ok(())
    }

    fn spawn_event_loop(
        dispatcher: EventDispatcher,
        mut events: broadcast::Receiver<ChatEvent>,
        mut shutdown: broadcast::Receiver<ShutdownPhase>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = shutdown.recv() => break,
                    event = events.recv() => match event {
                        Ok(event) => dispatcher.dispatch(event).await,
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!("Event dispatcher fell behind, {} chat events skipped", skipped);
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            warn!("Chat event stream closed");
                            break;
                        }
                    },
                }
            }
            info!("Event dispatcher stopped");
        })
    }

    /// Posts command acknowledgements. Ends once every sender is dropped.
    fn spawn_response_sender(&self, mut responses: mpsc::UnboundedReceiver<(String, String, String)>) {
        let connection = Arc::clone(&self.connection);
        let call_timeout = self.config.call_timeout();

        tokio::spawn(async move {
            while let Some((platform, channel, message)) = responses.recv().await {
                match timeout(call_timeout, connection.send_message(&channel, &message)).await {
                    Ok(Ok(())) => info!("Sent response to {}#{}: {}", platform, channel, message),
                    Ok(Err(e)) => error!("Failed to send response to {}#{}: {}", platform, channel, e),
                    Err(_) => error!("Timed out sending response to {}#{}", platform, channel),
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bot::testing::{chat_message, MockPlatform, Recorded};
    use std::path::Path;
    use std::time::Duration;
    use tempfile::tempdir;

    fn config_in(dir: &Path) -> BotConfiguration {
        BotConfiguration {
            rate_limit_interval_ms: 1,
            lists_dir: dir.join("lists"),
            filters_dir: dir.join("filters"),
            logs_dir: dir.join("logs"),
            ..BotConfiguration::default()
        }
    }

    fn bot_with(config: BotConfiguration, engine: ModerationEngine, platform: &MockPlatform) -> ModerationBot {
        ModerationBot::new(
            config,
            engine,
            Arc::new(platform.clone()),
            Arc::new(platform.clone()),
            Some(Arc::new(platform.clone())),
        )
    }

    async fn wait_until<F: Fn() -> bool>(condition: F) {
        for _ in 0..200 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    #[tokio::test]
    async fn test_load_engine_from_directories() {
        let dir = tempdir().unwrap();
        let config = config_in(dir.path());
        std::fs::create_dir_all(&config.lists_dir).unwrap();
        std::fs::create_dir_all(&config.filters_dir).unwrap();
        std::fs::write(config.lists_dir.join("names"), "spammer1\nSpammer2\n").unwrap();
        std::fs::write(config.filters_dir.join("patterns"), "bot_\nxyz(\n").unwrap();

        let engine = ModerationBot::load_engine(&config).await;

        assert!(engine.check("spammer1").await.is_denied());
        assert!(engine.check("spammer2").await.is_denied());
        assert!(engine.check("bot_9").await.is_denied());
        assert_eq!(engine.filter_count().await, 1);
    }

    #[tokio::test]
    async fn test_load_engine_survives_bad_fragments() {
        let dir = tempdir().unwrap();
        let config = config_in(dir.path());
        std::fs::create_dir_all(&config.lists_dir).unwrap();
        std::fs::write(config.lists_dir.join("good"), "spammer1\n").unwrap();
        std::fs::write(config.lists_dir.join("bad"), [0xff, 0xfe, 0x00]).unwrap();
        // a file where a directory is expected
        std::fs::write(&config.filters_dir, "not a directory").unwrap();

        let engine = ModerationBot::load_engine(&config).await;

        assert!(engine.check("spammer1").await.is_denied());
        assert_eq!(engine.filter_count().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_in_flight_ban_is_logged_at_shutdown() {
        let dir = tempdir().unwrap();
        let platform = MockPlatform::new();
        platform.delay_directives(Duration::from_secs(5));
        let config = BotConfiguration {
            call_timeout_seconds: 10,
            shutdown_timeout_seconds: 3,
            ..config_in(dir.path())
        };
        let engine = ModerationEngine::with_lists(vec!["spammer1".to_string()], Vec::new());
        let bot = bot_with(config, engine, &platform);

        bot.start(&["chan".to_string()]).await.unwrap();
        platform.emit(ChatEvent::Message(chat_message("chan", "spammer1", "hi", &[])));
        // let the worker pick the ban up and block in the directive
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(platform.banned().is_empty());

        let shutdown = bot.shutdown_handle();
        shutdown.trigger_shutdown().await;
        shutdown.wait_for_shutdown().await.unwrap();

        assert_eq!(platform.banned(), vec!["spammer1".to_string()]);
        assert_eq!(
            bot.engine().session_snapshot().await.banned_names,
            vec!["spammer1".to_string()]
        );
        let stats = shutdown.get_stats().await;
        assert!(stats.components_shutdown.contains(&"ActionQueue".to_string()));
        assert!(!stats.failed_components.iter().any(|(name, _)| name == "ActionQueue"));
    }

    #[tokio::test]
    async fn test_session_end_to_end() {
        let dir = tempdir().unwrap();
        let platform = MockPlatform::new();
        let engine = ModerationEngine::with_lists(vec!["spammer1".to_string()], Vec::new());
        let bot = bot_with(config_in(dir.path()), engine, &platform);

        bot.start(&["chan".to_string()]).await.unwrap();
        assert!(bot.channels().is_joined("chan").await);

        platform.emit(ChatEvent::Message(chat_message("chan", "spammer1", "buy followers", &[])));
        platform.emit(ChatEvent::Message(chat_message(
            "chan",
            "modguy",
            "!FilterAdd ^bot_",
            &["moderator"],
        )));

        wait_until(|| !platform.blocked().is_empty() && !platform.messages().is_empty()).await;
        assert_eq!(platform.banned(), vec!["spammer1".to_string()]);
        assert_eq!(platform.blocked(), vec!["id-spammer1".to_string()]);
        assert_eq!(
            platform.messages(),
            vec![("chan".to_string(), "Added ^bot_ to the filter list.".to_string())]
        );

        let shutdown = bot.shutdown_handle();
        shutdown.trigger_shutdown().await;
        shutdown.wait_for_shutdown().await.unwrap();

        let stats = shutdown.get_stats().await;
        assert!(stats.failed_components.is_empty());
        assert_eq!(stats.components_shutdown.len(), 5);
        assert_eq!(platform.calls().last(), Some(&Recorded::Leave("chan".to_string())));

        let mut logs: Vec<String> = std::fs::read_dir(dir.path().join("logs"))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        logs.sort();
        assert_eq!(logs.len(), 2);
        assert!(logs[0].starts_with("banlog-"));
        assert!(logs[1].starts_with("newfilters-"));
    }
}
