//! # Network Monitor
//!
//! Turns connectivity transitions into sync passes.
//!
//! ## Event Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                       Network Monitor                               │
//! │                                                                     │
//! │  Host app observes the platform:                                    │
//! │    connection restored  ──► handle.notify(Online)                   │
//! │    window refocused     ──► handle.notify(Foreground)               │
//! │    connection lost      ──► handle.notify(Offline)                  │
//! │                              │                                      │
//! │                              ▼                                      │
//! │  ┌───────────────────────────────────────────────────────────────┐  │
//! │  │  select! loop                                                 │  │
//! │  │   • Online            → mark online, trigger full sync        │  │
//! │  │   • Foreground+online → trigger full sync                     │  │
//! │  │   • Offline           → mark offline (queue keeps growing)    │  │
//! │  │   • cleanup tick      → sweep retry-exhausted mutations       │  │
//! │  │   • shutdown          → exit                                  │  │
//! │  └───────────────────────────────────────────────────────────────┘  │
//! │                                                                     │
//! │  NO per-mutation backoff timers: passes are spaced by these         │
//! │  events, and the bounded retry counter caps total attempts.         │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The channel is the whole interface - tests drive the monitor by sending
//! events, no real connectivity required.

use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::engine::SyncEngine;
use crate::error::{SyncError, SyncResult};

/// A connectivity transition observed by the host application.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityEvent {
    /// The device came (back) online.
    Online,

    /// The device lost connectivity.
    Offline,

    /// The application regained foreground focus.
    Foreground,
}

/// Handle for feeding events to (and stopping) a running monitor.
#[derive(Clone)]
pub struct NetworkMonitorHandle {
    event_tx: mpsc::Sender<ConnectivityEvent>,
    shutdown_tx: mpsc::Sender<()>,
}

impl NetworkMonitorHandle {
    /// Delivers a connectivity event to the monitor.
    pub async fn notify(&self, event: ConnectivityEvent) -> SyncResult<()> {
        self.event_tx
            .send(event)
            .await
            .map_err(|_| SyncError::Channel("Monitor event channel closed".into()))
    }

    /// Stops the monitor loop.
    pub async fn shutdown(&self) -> SyncResult<()> {
        self.shutdown_tx
            .send(())
            .await
            .map_err(|_| SyncError::Channel("Monitor shutdown channel closed".into()))
    }
}

/// Background task reacting to connectivity events and running the periodic
/// cleanup sweep.
pub struct NetworkMonitor {
    engine: Arc<SyncEngine>,
    event_rx: mpsc::Receiver<ConnectivityEvent>,
    shutdown_rx: mpsc::Receiver<()>,
}

impl NetworkMonitor {
    /// Creates a monitor for the engine and returns its handle.
    pub fn new(engine: Arc<SyncEngine>) -> (Self, NetworkMonitorHandle) {
        let (event_tx, event_rx) = mpsc::channel(16);
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);

        let monitor = NetworkMonitor {
            engine,
            event_rx,
            shutdown_rx,
        };
        let handle = NetworkMonitorHandle {
            event_tx,
            shutdown_tx,
        };

        (monitor, handle)
    }

    /// Runs the monitor loop. Spawn this as a background task.
    pub async fn run(mut self) {
        info!("Network monitor starting");

        let mut cleanup = tokio::time::interval(self.engine.config().cleanup_interval());
        cleanup.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                Some(event) = self.event_rx.recv() => {
                    self.handle_event(event).await;
                }

                // The first tick fires immediately, which doubles as crash
                // recovery: entries stranded past the retry cap by a dead
                // process get swept on startup.
                _ = cleanup.tick() => {
                    self.run_cleanup().await;
                }

                _ = self.shutdown_rx.recv() => {
                    info!("Network monitor shutting down");
                    break;
                }
            }
        }

        info!("Network monitor stopped");
    }

    async fn handle_event(&self, event: ConnectivityEvent) {
        match event {
            ConnectivityEvent::Online => {
                info!("Connectivity restored, triggering sync");
                self.engine.set_online(true);
                self.trigger().await;
            }

            ConnectivityEvent::Foreground => {
                if self.engine.is_online() {
                    debug!("Foreground while online, triggering sync");
                    self.trigger().await;
                } else {
                    debug!("Foreground while offline, nothing to do");
                }
            }

            ConnectivityEvent::Offline => {
                info!("Connectivity lost, queueing locally");
                self.engine.set_online(false);
            }
        }
    }

    async fn trigger(&self) {
        let summary = self.engine.trigger_sync().await;
        if summary.errors.is_empty() {
            debug!(
                processed = summary.total_processed(),
                skipped = summary.total_skipped(),
                evicted = summary.total_evicted(),
                "Triggered sync finished"
            );
        } else {
            warn!(errors = ?summary.errors, "Triggered sync finished with errors");
        }
    }

    async fn run_cleanup(&self) {
        match self.engine.evict_exhausted().await {
            Ok(evicted) if evicted.is_empty() => {
                debug!("Cleanup sweep found nothing to evict");
            }
            Ok(evicted) => {
                warn!(count = evicted.len(), "Cleanup sweep evicted stale mutations");
            }
            Err(e) => {
                warn!(error = %e, "Cleanup sweep failed");
            }
        }
    }
}
