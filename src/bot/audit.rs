// src/bot/audit.rs - Periodic roster audit

use anyhow::{Context, Result};
use log::{debug, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, timeout, Instant, MissedTickBehavior};

use crate::bot::action_queue::ActionQueue;
use crate::bot::channels::ChannelRegistry;
use crate::bot::moderation::ModerationEngine;
use crate::bot::shutdown::ShutdownPhase;
use crate::platforms::RosterQuery;
use crate::types::NameVerdict;

/// Result of auditing one channel roster
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuditReport {
    pub channel: String,
    pub roster_size: usize,
    /// Names skipped because they were already safelisted
    pub already_safelisted: usize,
    /// Names that came back clear and were safelisted by this pass
    pub safelisted: Vec<String>,
    /// Denied names handed to the action queue by this pass
    pub queued: Vec<String>,
}

/// Fetches each joined channel's roster on a fixed interval and screens
/// every name not yet safelisted
#[derive(Clone)]
pub struct AuditLoop {
    engine: ModerationEngine,
    queue: ActionQueue,
    roster: Arc<dyn RosterQuery>,
    channels: ChannelRegistry,
    interval: Duration,
    call_timeout: Duration,
}

impl AuditLoop {
    pub fn new(
        engine: ModerationEngine,
        queue: ActionQueue,
        roster: Arc<dyn RosterQuery>,
        channels: ChannelRegistry,
        interval: Duration,
        call_timeout: Duration,
    ) -> Self {
        Self {
            engine,
            queue,
            roster,
            channels,
            interval,
            call_timeout,
        }
    }

    /// Run one audit of a single channel
    pub async fn audit_channel(&self, channel: &str) -> Result<AuditReport> {
        let users = timeout(self.call_timeout, self.roster.list_users(channel))
            .await
            .with_context(|| format!("Roster fetch for #{} timed out", channel))?
            .with_context(|| format!("Failed to fetch roster for #{}", channel))?;

        let mut report = AuditReport {
            channel: channel.to_string(),
            roster_size: users.len(),
            ..AuditReport::default()
        };

        for user in users {
            if self.engine.is_safelisted(&user).await {
                report.already_safelisted += 1;
                continue;
            }

            match self.engine.evaluate(&user).await {
                NameVerdict::Clear => report.safelisted.push(user),
                NameVerdict::Denied => {
                    if self.queue.submit(&user, channel).await {
                        report.queued.push(user);
                    }
                }
            }
        }

        debug!(
            "Audit of #{}: {} users, {} new safelisted, {} queued",
            channel,
            report.roster_size,
            report.safelisted.len(),
            report.queued.len()
        );
        Ok(report)
    }

    /// Audit every joined channel. A failing channel is logged and skipped.
    pub async fn run_pass(&self) -> Vec<AuditReport> {
        let mut reports = Vec::new();
        for channel in self.channels.joined().await {
            match self.audit_channel(&channel).await {
                Ok(report) => reports.push(report),
                Err(e) => warn!("Skipping audit of #{} this round: {:#}", channel, e),
            }
        }
        reports
    }

    /// Tick until shutdown. The first pass runs one interval after start.
    pub fn spawn(self, mut shutdown: broadcast::Receiver<ShutdownPhase>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!("Audit loop started ({}s interval)", self.interval.as_secs());

            loop {
                tokio::select! {
                    biased;
                    _ = shutdown.recv() => break,
                    _ = ticker.tick() => {}
                }

                // a pass in progress is dropped on shutdown; names already
                // evaluated keep their state
                tokio::select! {
                    biased;
                    _ = shutdown.recv() => break,
                    reports = self.run_pass() => {
                        let queued: usize = reports.iter().map(|r| r.queued.len()).sum();
                        if queued > 0 {
                            info!("Audit pass queued {} bans", queued);
                        }
                    }
                }
            }

            info!("Audit loop stopped");
        })
    }
}
