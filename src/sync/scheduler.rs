//! Background scheduler with debouncing
//!
//! Edits mark the store dirty; once edits stop for the debounce window, a
//! session runs. A session already in progress makes a trigger a no-op, so
//! a flood of dirty marks never queues up redundant sessions.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{interval, Instant};

use crate::error::{CarnetError, Result};
use crate::sync::synchronizer::{SyncOptions, Synchronizer};

/// Commands for the scheduler task
#[derive(Debug)]
enum SchedulerCommand {
    /// Run a session now, ignoring the debounce window
    Sync,
    /// Note that local data changed; a session runs after the window passes
    MarkDirty,
    /// Final session, then shut down
    Stop,
}

/// Handle to the background scheduler task
pub struct SyncScheduler {
    sender: mpsc::Sender<SchedulerCommand>,
}

impl SyncScheduler {
    /// Spawn the scheduler task for one synchronizer
    pub fn start(synchronizer: Arc<Synchronizer>, debounce: Duration) -> Self {
        let (sender, mut receiver) = mpsc::channel::<SchedulerCommand>(100);

        tokio::spawn(async move {
            let mut last_dirty: Option<Instant> = None;
            let mut check_interval = interval(Duration::from_secs(1));

            loop {
                tokio::select! {
                    cmd = receiver.recv() => {
                        match cmd {
                            Some(SchedulerCommand::Sync) => {
                                run_session(&synchronizer).await;
                                last_dirty = None;
                            }
                            Some(SchedulerCommand::MarkDirty) => {
                                last_dirty = Some(Instant::now());
                            }
                            Some(SchedulerCommand::Stop) => {
                                if last_dirty.is_some() {
                                    run_session(&synchronizer).await;
                                }
                                break;
                            }
                            // Every handle is gone; nothing can ever send
                            // another command, so the task must not outlive
                            // them ticking forever
                            None => break,
                        }
                    }
                    _ = check_interval.tick() => {
                        if let Some(dirty_time) = last_dirty {
                            if dirty_time.elapsed() >= debounce {
                                run_session(&synchronizer).await;
                                last_dirty = None;
                            }
                        }
                    }
                }
            }

            tracing::info!(
                target_id = synchronizer.target_id(),
                "sync scheduler stopped"
            );
        });

        Self { sender }
    }

    /// Run a session as soon as possible
    pub async fn sync_now(&self) -> Result<()> {
        self.send(SchedulerCommand::Sync).await
    }

    /// Note a local change; a session runs once changes settle
    pub async fn mark_dirty(&self) -> Result<()> {
        self.send(SchedulerCommand::MarkDirty).await
    }

    /// Stop the scheduler, running a final session if changes are pending
    pub async fn stop(&self) -> Result<()> {
        self.send(SchedulerCommand::Stop).await
    }

    async fn send(&self, cmd: SchedulerCommand) -> Result<()> {
        self.sender
            .send(cmd)
            .await
            .map_err(|_| CarnetError::Sync("scheduler channel closed".to_string()))
    }
}

async fn run_session(synchronizer: &Synchronizer) {
    match synchronizer.start(SyncOptions::default()).await {
        Ok(Some(report)) => {
            tracing::debug!(
                target_id = synchronizer.target_id(),
                changes = report.total_changes(),
                "scheduled session finished"
            );
        }
        Ok(None) => {
            tracing::debug!(
                target_id = synchronizer.target_id(),
                "session already running, trigger skipped"
            );
        }
        Err(err) => {
            tracing::error!(
                target_id = synchronizer.target_id(),
                error = %err,
                "scheduled session failed"
            );
        }
    }
}
