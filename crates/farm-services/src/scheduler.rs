//! Periodic background work.
//!
//! Every tick prunes expired transfer sessions. Every Nth tick, when watching
//! is enabled, the change source is polled on a blocking worker and its
//! events are routed to the coordinator. A poll that is still running when
//! the next one is due causes that one to be skipped; pruning never waits
//! for it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::replication::ReplicationCoordinator;
use crate::session::SessionRegistry;
use crate::watcher::ChangeSource;

#[derive(Debug)]
pub struct TickReport {
    pub pruned: Vec<String>,
    /// Handle of the watch poll started by this tick, yielding the number of
    /// events handled.
    pub poll: Option<JoinHandle<usize>>,
}

pub struct Scheduler {
    sessions: Arc<SessionRegistry>,
    coordinator: Arc<ReplicationCoordinator>,
    watcher: Option<Arc<Mutex<Box<dyn ChangeSource>>>>,
    frequency: u32,
    count: u32,
    polling: Arc<AtomicBool>,
}

/// Clears the in-flight flag even if the poll panics.
struct PollGuard(Arc<AtomicBool>);

impl Drop for PollGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Scheduler {
    /// `watcher` is `None` when watching is disabled. A zero frequency is
    /// treated as 1.
    pub fn new(
        sessions: Arc<SessionRegistry>,
        coordinator: Arc<ReplicationCoordinator>,
        watcher: Option<Box<dyn ChangeSource>>,
        frequency: u32,
    ) -> Self {
        Self {
            sessions,
            coordinator,
            watcher: watcher.map(|w| Arc::new(Mutex::new(w))),
            frequency: frequency.max(1),
            count: 0,
            polling: Arc::new(AtomicBool::new(false)),
        }
    }

    pub async fn tick(&mut self) -> TickReport {
        let poll = self.maybe_poll();
        let pruned = self.sessions.prune_expired(Instant::now()).await;
        if !pruned.is_empty() {
            tracing::info!(count = pruned.len(), "pruned expired transfer sessions");
        }
        TickReport { pruned, poll }
    }

    fn maybe_poll(&mut self) -> Option<JoinHandle<usize>> {
        let watcher = self.watcher.as_ref()?.clone();
        self.count = (self.count + 1) % self.frequency;
        if self.count != 0 {
            return None;
        }
        if self.polling.swap(true, Ordering::AcqRel) {
            tracing::debug!("previous watch check still running, skipping");
            return None;
        }

        let guard = PollGuard(self.polling.clone());
        let coordinator = self.coordinator.clone();
        Some(tokio::task::spawn_blocking(move || {
            let _guard = guard;
            let events = watcher
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .check();
            for event in &events {
                coordinator.on_change(event);
            }
            events.len()
        }))
    }

    /// Tick every `period` until shutdown.
    pub async fn run(
        mut self,
        period: Duration,
        mut shutdown: broadcast::Receiver<()>,
    ) -> anyhow::Result<()> {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::info!(
            period_ms = period.as_millis() as u64,
            frequency = self.frequency,
            watching = self.watcher.is_some(),
            "scheduler starting"
        );

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    tracing::info!("scheduler shutting down");
                    return Ok(());
                }

                _ = interval.tick() => {
                    // Polls run detached; the next due poll is skipped while
                    // this one is in flight.
                    let _ = self.tick().await;
                }
            }
        }
    }
}
