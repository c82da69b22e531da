//! Sync scheduler.
//!
//! A single background task decides when cycles run: on reconnect, on a fixed
//! interval while online and in the foreground, after local mutations, and on
//! request. Triggers that arrive while a cycle runs collapse into one re-run.

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

use crate::models::SyncFailure;
use crate::state::SyncState;

use super::{SyncEngine, SyncError, SyncReport};

const EVENT_CAPACITY: usize = 64;

/// Notifications published by the scheduler
#[derive(Debug, Clone)]
pub enum SyncEvent {
    CycleCompleted(SyncReport),
    /// Sent exactly once per abandoned operation
    TerminalFailure(SyncFailure),
    /// The server rejected the session; log in again to resume
    AuthRequired,
    /// The cycle stopped on a local store error
    CycleFailed(String),
}

/// Initial connectivity and visibility
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerOptions {
    pub online: bool,
    pub foreground: bool,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self {
            online: true,
            foreground: true,
        }
    }
}

#[derive(Debug)]
enum Command {
    SetOnline(bool),
    SetForeground(bool),
    RequestSync,
    Shutdown,
}

/// Control surface for a running scheduler
pub struct SchedulerHandle {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<SyncState>,
    events: broadcast::Sender<SyncEvent>,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    pub fn set_online(&self, online: bool) {
        self.send(Command::SetOnline(online));
    }

    pub fn set_foreground(&self, foreground: bool) {
        self.send(Command::SetForeground(foreground));
    }

    /// Manual refresh
    pub fn request_sync(&self) {
        self.send(Command::RequestSync);
    }

    pub fn state(&self) -> watch::Receiver<SyncState> {
        self.state.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    /// Stop after the current cycle, if any
    pub async fn shutdown(self) {
        self.send(Command::Shutdown);
        if let Err(error) = self.task.await {
            tracing::warn!(%error, "Sync scheduler task ended abnormally");
        }
    }

    fn send(&self, command: Command) {
        if self.commands.send(command).is_err() {
            tracing::debug!("Sync scheduler is no longer running");
        }
    }
}

pub struct SyncScheduler {
    engine: Arc<SyncEngine>,
    online: bool,
    foreground: bool,
    state: watch::Sender<SyncState>,
    events: broadcast::Sender<SyncEvent>,
}

impl SyncScheduler {
    /// Start the scheduler task on the current runtime
    pub fn spawn(engine: Arc<SyncEngine>, options: SchedulerOptions) -> SchedulerHandle {
        let initial = if options.online {
            SyncState::Synced
        } else {
            SyncState::Offline
        };
        let (state_tx, state_rx) = watch::channel(initial);
        let (events_tx, _) = broadcast::channel(EVENT_CAPACITY);
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();

        let scheduler = Self {
            engine,
            online: options.online,
            foreground: options.foreground,
            state: state_tx,
            events: events_tx.clone(),
        };
        let task = tokio::spawn(scheduler.run(commands_rx));

        SchedulerHandle {
            commands: commands_tx,
            state: state_rx,
            events: events_tx,
            task,
        }
    }

    const fn active(&self) -> bool {
        self.online && self.foreground
    }

    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        let mut ticker = interval(self.engine.settings().sync_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let engine = Arc::clone(&self.engine);

        tracing::debug!(online = self.online, foreground = self.foreground, "Sync scheduler started");

        loop {
            let trigger = tokio::select! {
                command = commands.recv() => match command {
                    None | Some(Command::Shutdown) => break,
                    Some(command) => self.apply(command),
                },
                _ = ticker.tick() => self.active(),
                () = engine.local_changes().notified() => self.active(),
            };
            if !trigger {
                continue;
            }

            loop {
                self.run_cycle().await;

                let mut again = false;
                while let Ok(command) = commands.try_recv() {
                    if matches!(command, Command::Shutdown) {
                        tracing::debug!("Sync scheduler stopped");
                        return;
                    }
                    again |= self.apply(command);
                }
                if !again {
                    break;
                }
            }
        }

        tracing::debug!("Sync scheduler stopped");
    }

    /// Update flags; returns whether the command warrants a cycle
    fn apply(&mut self, command: Command) -> bool {
        match command {
            Command::SetOnline(online) => {
                let reconnected = online && !self.online;
                self.online = online;
                if !online {
                    self.state.send_replace(SyncState::Offline);
                }
                // A background reconnect waits for the foreground catch-up.
                reconnected && self.foreground
            }
            Command::SetForeground(foreground) => {
                let resumed = foreground && !self.foreground;
                self.foreground = foreground;
                resumed && self.online
            }
            Command::RequestSync => self.online,
            Command::Shutdown => false,
        }
    }

    async fn run_cycle(&self) {
        self.state.send_replace(SyncState::Syncing);

        let next_state = match self.engine.sync_now().await {
            Ok(report) => {
                for failure in &report.failures {
                    self.publish(SyncEvent::TerminalFailure(failure.clone()));
                }
                let state = if report.fetch_error.is_some() {
                    SyncState::Error
                } else {
                    SyncState::Synced
                };
                self.publish(SyncEvent::CycleCompleted(report));
                state
            }
            Err(SyncError::AlreadyRunning) => {
                tracing::debug!("Cycle already running, follow-up scheduled");
                SyncState::Syncing
            }
            Err(SyncError::AuthRequired) => {
                self.publish(SyncEvent::AuthRequired);
                SyncState::Error
            }
            Err(SyncError::Store(error)) => {
                tracing::warn!(%error, "Sync cycle aborted by local store error");
                self.publish(SyncEvent::CycleFailed(error.to_string()));
                SyncState::Error
            }
        };

        let next_state = if self.online {
            next_state
        } else {
            SyncState::Offline
        };
        self.state.send_replace(next_state);
    }

    fn publish(&self, event: SyncEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}
