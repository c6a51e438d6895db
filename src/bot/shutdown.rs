// src/bot/shutdown.rs - Graceful shutdown management

use anyhow::{Context, Result};
use log::{debug, error, info, warn};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::timeout;

use crate::bot::channels::ChannelRegistry;
use crate::bot::moderation::ModerationEngine;
use crate::bot::persistence;
use crate::platforms::PlatformConnection;

/// Shutdown phases for orderly termination
#[derive(Debug, Clone, PartialEq)]
pub enum ShutdownPhase {
    /// Normal operation
    Running,
    /// Stop taking new work, let in-flight work finish
    Draining,
    /// Components are being shut down
    Terminating,
    /// Shutdown complete
    Stopped,
}

#[derive(Debug, Clone)]
pub struct ShutdownConfig {
    /// Time to wait for each component before forcing it
    pub component_timeout_seconds: u64,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            component_timeout_seconds: 30,
        }
    }
}

/// Statistics about the shutdown process
#[derive(Debug, Clone)]
pub struct ShutdownStats {
    pub phase: ShutdownPhase,
    pub started_at: Option<chrono::DateTime<chrono::Utc>>,
    pub completed_at: Option<chrono::DateTime<chrono::Utc>>,
    pub duration_seconds: Option<f64>,
    pub components_shutdown: Vec<String>,
    pub failed_components: Vec<(String, String)>, // (component, error)
}

impl Default for ShutdownStats {
    fn default() -> Self {
        Self {
            phase: ShutdownPhase::Running,
            started_at: None,
            completed_at: None,
            duration_seconds: None,
            components_shutdown: Vec::new(),
            failed_components: Vec::new(),
        }
    }
}

/// Component that can be gracefully shut down
#[async_trait::async_trait]
pub trait ShutdownComponent: Send + Sync {
    /// Component name for logging
    fn name(&self) -> &str;

    /// Overrides the configured per-component timeout
    fn timeout(&self) -> Option<Duration> {
        None
    }

    /// Gracefully shutdown the component
    async fn shutdown(&self) -> Result<()>;

    /// Force shutdown the component (called if graceful shutdown fails)
    async fn force_shutdown(&self) -> Result<()> {
        self.shutdown().await
    }
}

/// Main graceful shutdown manager
pub struct GracefulShutdown {
    config: ShutdownConfig,
    phase: Arc<RwLock<ShutdownPhase>>,
    stats: Arc<RwLock<ShutdownStats>>,
    shutdown_notifier: broadcast::Sender<ShutdownPhase>,
    components: Arc<RwLock<Vec<Box<dyn ShutdownComponent>>>>,
    is_shutdown_requested: Arc<RwLock<bool>>,
}

impl GracefulShutdown {
    pub fn new(config: ShutdownConfig) -> Self {
        let (shutdown_tx, _) = broadcast::channel(10);

        Self {
            config,
            phase: Arc::new(RwLock::new(ShutdownPhase::Running)),
            stats: Arc::new(RwLock::new(ShutdownStats::default())),
            shutdown_notifier: shutdown_tx,
            components: Arc::new(RwLock::new(Vec::new())),
            is_shutdown_requested: Arc::new(RwLock::new(false)),
        }
    }

    pub fn with_default_config() -> Self {
        Self::new(ShutdownConfig::default())
    }

    /// Register a component. Components shut down in registration order.
    pub async fn register_component(&self, component: Box<dyn ShutdownComponent>) {
        let name = component.name().to_string();
        self.components.write().await.push(component);
        debug!("Registered shutdown component: {}", name);
    }

    /// Start listening for shutdown signals
    pub async fn start_signal_handlers(&self) {
        let phase_sigint = Arc::clone(&self.phase);
        let notifier_sigint = self.shutdown_notifier.clone();
        let requested_sigint = Arc::clone(&self.is_shutdown_requested);

        tokio::spawn(async move {
            match signal::ctrl_c().await {
                Ok(()) => {
                    info!("Received Ctrl+C signal, writing out state and closing...");
                    Self::request(&requested_sigint, &phase_sigint, &notifier_sigint).await;
                }
                Err(err) => {
                    error!("Failed to listen for Ctrl+C signal: {}", err);
                }
            }
        });

        #[cfg(unix)]
        {
            let phase_sigterm = Arc::clone(&self.phase);
            let notifier_sigterm = self.shutdown_notifier.clone();
            let requested_sigterm = Arc::clone(&self.is_shutdown_requested);

            tokio::spawn(async move {
                let mut sigterm = match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                    Ok(sigterm) => sigterm,
                    Err(err) => {
                        error!("Failed to register SIGTERM handler: {}", err);
                        return;
                    }
                };

                sigterm.recv().await;
                info!("Received SIGTERM signal, writing out state and closing...");
                Self::request(&requested_sigterm, &phase_sigterm, &notifier_sigterm).await;
            });
        }

        info!("Shutdown signal handlers started");
    }

    async fn request(
        requested: &RwLock<bool>,
        phase: &RwLock<ShutdownPhase>,
        notifier: &broadcast::Sender<ShutdownPhase>,
    ) {
        *requested.write().await = true;
        *phase.write().await = ShutdownPhase::Draining;
        let _ = notifier.send(ShutdownPhase::Draining);
    }

    /// Wait for shutdown signal and perform graceful shutdown
    pub async fn wait_for_shutdown(&self) -> Result<()> {
        info!("Waiting for shutdown signal...");

        let mut receiver = self.subscribe_to_shutdown();
        if !self.is_shutdown_requested().await {
            let _ = receiver.recv().await;
        }

        info!("Shutdown requested, beginning graceful shutdown process...");
        self.perform_shutdown().await
    }

    /// Perform the actual shutdown process
    async fn perform_shutdown(&self) -> Result<()> {
        let start_time = chrono::Utc::now();

        {
            let mut stats = self.stats.write().await;
            stats.started_at = Some(start_time);
            stats.phase = ShutdownPhase::Terminating;
        }

        info!("Shutting down components...");
        *self.phase.write().await = ShutdownPhase::Terminating;
        let _ = self.shutdown_notifier.send(ShutdownPhase::Terminating);

        self.shutdown_all_components().await;

        let end_time = chrono::Utc::now();
        let duration = (end_time - start_time).num_milliseconds() as f64 / 1000.0;

        {
            let mut stats = self.stats.write().await;
            stats.completed_at = Some(end_time);
            stats.duration_seconds = Some(duration);
            stats.phase = ShutdownPhase::Stopped;
        }

        *self.phase.write().await = ShutdownPhase::Stopped;
        let _ = self.shutdown_notifier.send(ShutdownPhase::Stopped);

        info!("Graceful shutdown completed in {:.2} seconds", duration);
        Ok(())
    }

    /// Shutdown all registered components
    async fn shutdown_all_components(&self) {
        let components = self.components.read().await;
        let default_timeout = Duration::from_secs(self.config.component_timeout_seconds);

        info!("Shutting down {} components...", components.len());

        for component in components.iter() {
            let component_name = component.name().to_string();
            let component_timeout = component.timeout().unwrap_or(default_timeout);
            info!("Shutting down component: {}", component_name);

            match timeout(component_timeout, component.shutdown()).await {
                Ok(Ok(())) => {
                    info!("Component '{}' shut down gracefully", component_name);
                    self.stats.write().await.components_shutdown.push(component_name);
                }
                Ok(Err(e)) => {
                    error!("Component '{}' failed to shutdown gracefully: {}", component_name, e);
                    self.stats
                        .write()
                        .await
                        .failed_components
                        .push((component_name, e.to_string()));
                }
                Err(_) => {
                    error!(
                        "Component '{}' shutdown timed out after {:?}",
                        component_name, component_timeout
                    );

                    warn!("Attempting force shutdown of timed out component '{}'", component_name);
                    let reason = match timeout(component_timeout, component.force_shutdown()).await {
                        Ok(Ok(())) => {
                            warn!("Component '{}' was forced down after timeout", component_name);
                            "Forced after shutdown timeout"
                        }
                        _ => {
                            error!("Component '{}' could not be shut down", component_name);
                            "Shutdown timeout"
                        }
                    };
                    self.stats
                        .write()
                        .await
                        .failed_components
                        .push((component_name, reason.to_string()));
                }
            }
        }
    }

    /// Get current shutdown phase
    pub async fn get_phase(&self) -> ShutdownPhase {
        self.phase.read().await.clone()
    }

    /// Get shutdown statistics
    pub async fn get_stats(&self) -> ShutdownStats {
        self.stats.read().await.clone()
    }

    /// Check if shutdown has been requested
    pub async fn is_shutdown_requested(&self) -> bool {
        *self.is_shutdown_requested.read().await
    }

    /// Subscribe to shutdown phase changes
    pub fn subscribe_to_shutdown(&self) -> broadcast::Receiver<ShutdownPhase> {
        self.shutdown_notifier.subscribe()
    }

    /// Manually trigger shutdown (for testing or programmatic shutdown)
    pub async fn trigger_shutdown(&self) {
        info!("Shutdown manually triggered");
        Self::request(&self.is_shutdown_requested, &self.phase, &self.shutdown_notifier).await;
    }
}

/// Waits for a background task that stops on its own once it sees the
/// shutdown broadcast
pub struct TaskShutdownComponent {
    name: String,
    handle: Mutex<Option<JoinHandle<()>>>,
    timeout: Option<Duration>,
}

impl TaskShutdownComponent {
    pub fn new(name: impl Into<String>, handle: JoinHandle<()>) -> Self {
        Self {
            name: name.into(),
            handle: Mutex::new(Some(handle)),
            timeout: None,
        }
    }

    /// Wait up to `timeout` for this task instead of the shared component timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

#[async_trait::async_trait]
impl ShutdownComponent for TaskShutdownComponent {
    fn name(&self) -> &str {
        &self.name
    }

    fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    async fn shutdown(&self) -> Result<()> {
        let handle = self.handle.lock().await.take();
        if let Some(handle) = handle {
            handle
                .await
                .with_context(|| format!("{} task ended abnormally", self.name))?;
        }
        Ok(())
    }

    async fn force_shutdown(&self) -> Result<()> {
        if let Some(handle) = self.handle.lock().await.take() {
            handle.abort();
        }
        Ok(())
    }
}

/// Writes the session ban log and new filters to the log directory
pub struct SessionLogShutdownComponent {
    engine: ModerationEngine,
    logs_dir: PathBuf,
}

impl SessionLogShutdownComponent {
    pub fn new(engine: ModerationEngine, logs_dir: PathBuf) -> Self {
        Self { engine, logs_dir }
    }
}

#[async_trait::async_trait]
impl ShutdownComponent for SessionLogShutdownComponent {
    fn name(&self) -> &str {
        "SessionLog"
    }

    async fn shutdown(&self) -> Result<()> {
        let snapshot = self.engine.session_snapshot().await;
        let written =
            persistence::write_session_logs(&self.logs_dir, &snapshot, chrono::Utc::now()).await?;
        if written.is_empty() {
            info!("Nothing banned or added this session, no logs written");
        }
        for path in written {
            info!("Wrote session log {}", path.display());
        }
        Ok(())
    }
}

/// Leaves every joined channel and closes the chat connection
pub struct ConnectionShutdownComponent {
    connection: Arc<dyn PlatformConnection>,
    channels: ChannelRegistry,
}

impl ConnectionShutdownComponent {
    pub fn new(connection: Arc<dyn PlatformConnection>, channels: ChannelRegistry) -> Self {
        Self {
            connection,
            channels,
        }
    }
}

#[async_trait::async_trait]
impl ShutdownComponent for ConnectionShutdownComponent {
    fn name(&self) -> &str {
        "ChatConnection"
    }

    async fn shutdown(&self) -> Result<()> {
        for channel in self.channels.joined().await {
            if let Err(e) = self.connection.leave(&channel).await {
                warn!("Failed to leave #{}: {}", channel, e);
            }
            self.channels.mark_left(&channel).await;
        }
        self.connection.disconnect().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bot::testing::{MockPlatform, Recorded};
    use std::sync::atomic::{AtomicBool, Ordering};
    use tempfile::tempdir;

    struct TestComponent {
        name: String,
        shutdown_called: Arc<AtomicBool>,
        should_fail: bool,
    }

    #[async_trait::async_trait]
    impl ShutdownComponent for TestComponent {
        fn name(&self) -> &str {
            &self.name
        }

        async fn shutdown(&self) -> Result<()> {
            self.shutdown_called.store(true, Ordering::Relaxed);
            if self.should_fail {
                Err(anyhow::anyhow!("Test component shutdown failure"))
            } else {
                Ok(())
            }
        }
    }

    #[tokio::test]
    async fn test_graceful_shutdown_phases() {
        let shutdown_manager = GracefulShutdown::with_default_config();
        let mut receiver = shutdown_manager.subscribe_to_shutdown();

        assert_eq!(shutdown_manager.get_phase().await, ShutdownPhase::Running);

        shutdown_manager.trigger_shutdown().await;

        assert_eq!(shutdown_manager.get_phase().await, ShutdownPhase::Draining);
        assert_eq!(receiver.recv().await.unwrap(), ShutdownPhase::Draining);
        assert!(shutdown_manager.is_shutdown_requested().await);
    }

    #[tokio::test]
    async fn test_components_shutdown_and_failures_are_recorded() {
        let shutdown_manager = GracefulShutdown::with_default_config();

        let ok_called = Arc::new(AtomicBool::new(false));
        let failing_called = Arc::new(AtomicBool::new(false));
        shutdown_manager
            .register_component(Box::new(TestComponent {
                name: "failing".to_string(),
                shutdown_called: failing_called.clone(),
                should_fail: true,
            }))
            .await;
        shutdown_manager
            .register_component(Box::new(TestComponent {
                name: "ok".to_string(),
                shutdown_called: ok_called.clone(),
                should_fail: false,
            }))
            .await;

        shutdown_manager.trigger_shutdown().await;
        shutdown_manager.wait_for_shutdown().await.unwrap();

        assert!(ok_called.load(Ordering::Relaxed));
        assert!(failing_called.load(Ordering::Relaxed));
        let stats = shutdown_manager.get_stats().await;
        assert_eq!(stats.phase, ShutdownPhase::Stopped);
        assert_eq!(stats.components_shutdown, vec!["ok".to_string()]);
        assert_eq!(stats.failed_components.len(), 1);
    }

    #[tokio::test]
    async fn test_task_component_waits_for_task() {
        let finished = Arc::new(AtomicBool::new(false));
        let flag = finished.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            flag.store(true, Ordering::Relaxed);
        });

        let component = TaskShutdownComponent::new("worker", handle);
        component.shutdown().await.unwrap();
        assert!(finished.load(Ordering::Relaxed));
        // a second call is a no-op
        component.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_task_component_timeout_override() {
        let shutdown_manager = GracefulShutdown::new(ShutdownConfig {
            component_timeout_seconds: 1,
        });

        let slow = tokio::spawn(tokio::time::sleep(Duration::from_secs(5)));
        let stuck = tokio::spawn(tokio::time::sleep(Duration::from_secs(60)));
        shutdown_manager
            .register_component(Box::new(
                TaskShutdownComponent::new("slow", slow).with_timeout(Duration::from_secs(10)),
            ))
            .await;
        shutdown_manager
            .register_component(Box::new(TaskShutdownComponent::new("stuck", stuck)))
            .await;

        shutdown_manager.trigger_shutdown().await;
        shutdown_manager.wait_for_shutdown().await.unwrap();

        let stats = shutdown_manager.get_stats().await;
        assert_eq!(stats.components_shutdown, vec!["slow".to_string()]);
        assert_eq!(
            stats.failed_components,
            vec![("stuck".to_string(), "Forced after shutdown timeout".to_string())]
        );
    }

    #[tokio::test]
    async fn test_session_log_component_writes_bans() {
        let dir = tempdir().unwrap();
        let engine = ModerationEngine::new();
        engine.record_ban("a").await;
        engine.record_ban("b").await;

        let component = SessionLogShutdownComponent::new(engine, dir.path().to_path_buf());
        component.shutdown().await.unwrap();

        let entries: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
        let path = entries[0].as_ref().unwrap().path();
        assert!(path.file_name().unwrap().to_string_lossy().starts_with("banlog-"));
        assert_eq!(std::fs::read_to_string(path).unwrap(), "a\nb");
    }

    #[tokio::test]
    async fn test_connection_component_leaves_joined_channels() {
        let platform = MockPlatform::new();
        let channels = ChannelRegistry::new();
        channels.mark_joined("one").await;
        channels.mark_joined("two").await;
        channels.mark_left("two").await;

        let component = ConnectionShutdownComponent::new(Arc::new(platform.clone()), channels.clone());
        component.shutdown().await.unwrap();

        assert_eq!(platform.calls(), vec![Recorded::Leave("one".to_string())]);
        assert!(channels.joined().await.is_empty());
    }
}
