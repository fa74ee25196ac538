// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Reload-cycle supervisor.
//!
//! # Cycle
//!
//! ```text
//! Loading --> Connecting --> Running --(reload)--> Draining --> Loading
//!                                    \--(shutdown)--> Draining --> exit
//! ```
//!
//! Control signals are only acted upon at the top of the tick loop, so an
//! in-flight `update()` always runs to completion. Any fatal error drains the
//! current set and ends [`Supervisor::run`].

use crate::bus::MessageBus;
use crate::config::{ConfigError, ConfigSource, MotionTrackerConfig, RobotFilter, StateStoreConfig};
use crate::endpoint::FaultSender;
use crate::error::TrackerError;
use crate::stats::TrackerStatsSnapshot;
use crate::store::{open_store, StateStore};
use crate::tracker::RobotTracker;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, oneshot};

/// External request for the supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlSignal {
    /// Drain and start a new cycle from freshly loaded configuration.
    Reload,
    /// Drain and stop.
    Shutdown,
}

impl ControlSignal {
    /// Combine two pending signals; shutdown takes precedence.
    fn merge(pending: Option<Self>, incoming: Self) -> Self {
        match pending {
            Some(Self::Shutdown) => Self::Shutdown,
            _ => incoming,
        }
    }
}

/// How a reload cycle ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    Reload,
    Shutdown,
}

impl From<ControlSignal> for CycleOutcome {
    fn from(signal: ControlSignal) -> Self {
        match signal {
            ControlSignal::Reload => Self::Reload,
            ControlSignal::Shutdown => Self::Shutdown,
        }
    }
}

enum Control {
    Signal(ControlSignal),
    Stats(oneshot::Sender<Vec<TrackerStatsSnapshot>>),
}

/// Handle to control a supervisor.
#[derive(Clone)]
pub struct SupervisorHandle {
    control: mpsc::UnboundedSender<Control>,
    running: Arc<AtomicBool>,
}

impl SupervisorHandle {
    /// Check if the supervisor is running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Request a reload at the next checkpoint.
    pub fn reload(&self) -> Result<(), TrackerError> {
        self.send(Control::Signal(ControlSignal::Reload))
    }

    /// Request a shutdown at the next checkpoint.
    pub fn shutdown(&self) -> Result<(), TrackerError> {
        self.send(Control::Signal(ControlSignal::Shutdown))
    }

    /// Statistics of the trackers in the running cycle, in tick order.
    pub async fn stats(&self) -> Result<Vec<TrackerStatsSnapshot>, TrackerError> {
        let (tx, rx) = oneshot::channel();
        self.send(Control::Stats(tx))?;
        rx.await.map_err(|_| TrackerError::NotRunning)
    }

    fn send(&self, control: Control) -> Result<(), TrackerError> {
        self.control
            .send(control)
            .map_err(|_| TrackerError::NotRunning)
    }
}

/// The trackers of one reload cycle, in configuration order.
pub struct TrackerSet {
    trackers: Vec<RobotTracker>,
}

impl TrackerSet {
    /// Build a tracker for every robot selected by `filter`.
    pub fn build(
        config: &MotionTrackerConfig,
        filter: &RobotFilter,
        bus: Arc<dyn MessageBus>,
        store: Option<Arc<dyn StateStore>>,
    ) -> Result<Self, ConfigError> {
        let trackers = config
            .select(filter)?
            .into_iter()
            .map(|robot| RobotTracker::new(robot.clone(), Arc::clone(&bus), store.clone()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { trackers })
    }

    pub fn len(&self) -> usize {
        self.trackers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trackers.is_empty()
    }

    pub fn ids(&self) -> Vec<&str> {
        self.trackers.iter().map(|t| t.id()).collect()
    }

    pub fn trackers(&self) -> &[RobotTracker] {
        &self.trackers
    }

    pub fn stats(&self) -> Vec<TrackerStatsSnapshot> {
        self.trackers.iter().map(|t| t.stats().snapshot()).collect()
    }

    /// Connect every tracker in order.
    ///
    /// On the first failure every tracker is drained before the error is
    /// returned, so no tracker is left half connected.
    pub async fn connect(&mut self, faults: FaultSender) -> Result<(), TrackerError> {
        for index in 0..self.trackers.len() {
            if let Err(e) = self.trackers[index].connect(faults.clone()).await {
                self.drain().await;
                return Err(e);
            }
        }
        Ok(())
    }

    /// Run one `update()` on every tracker, in order.
    ///
    /// Returns the number of poses published.
    pub async fn tick(&mut self) -> Result<usize, TrackerError> {
        let mut published = 0;
        for tracker in &mut self.trackers {
            if tracker.update().await?.is_some() {
                published += 1;
            }
        }
        Ok(published)
    }

    /// Disconnect every tracker, in order.
    pub async fn drain(&mut self) {
        for tracker in &mut self.trackers {
            tracker.disconnect().await;
        }
    }

    fn log_stats(&self) {
        for stats in self.stats() {
            tracing::info!(
                robot = %stats.robot_id,
                received = stats.messages_received,
                dropped = stats.messages_dropped,
                applied = stats.updates_applied,
                skipped = stats.updates_skipped,
                published = stats.poses_published,
                backlog = stats.backlog(),
                "Tracker stats ({:.1} updates/s)",
                stats.updates_per_second()
            );
        }
    }
}

/// Owns the tracker set and drives reload cycles.
pub struct Supervisor {
    source: Box<dyn ConfigSource>,
    bus: Arc<dyn MessageBus>,
    filter: RobotFilter,
    store_override: Option<Arc<dyn StateStore>>,
    opened_store: Option<(StateStoreConfig, Arc<dyn StateStore>)>,
    control_tx: mpsc::UnboundedSender<Control>,
    control_rx: mpsc::UnboundedReceiver<Control>,
    running: Arc<AtomicBool>,
    cycles: u64,
}

impl Supervisor {
    pub fn new(source: Box<dyn ConfigSource>, bus: Arc<dyn MessageBus>, filter: RobotFilter) -> Self {
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        Self {
            source,
            bus,
            filter,
            store_override: None,
            opened_store: None,
            control_tx,
            control_rx,
            running: Arc::new(AtomicBool::new(false)),
            cycles: 0,
        }
    }

    /// Use `store` instead of the backend named by the configuration.
    pub fn with_state_store(mut self, store: Arc<dyn StateStore>) -> Self {
        self.store_override = Some(store);
        self
    }

    pub fn handle(&self) -> SupervisorHandle {
        SupervisorHandle {
            control: self.control_tx.clone(),
            running: Arc::clone(&self.running),
        }
    }

    /// Run reload cycles until shutdown or a fatal error.
    pub async fn run(mut self) -> Result<(), TrackerError> {
        self.running.store(true, Ordering::Relaxed);

        let result = loop {
            match self.run_cycle().await {
                Ok(CycleOutcome::Reload) => {
                    tracing::info!("Reloading configuration");
                }
                Ok(CycleOutcome::Shutdown) => {
                    tracing::info!("Supervisor stopped after {} cycle(s)", self.cycles);
                    break Ok(());
                }
                Err(e) => break Err(e),
            }
        };

        self.running.store(false, Ordering::Relaxed);
        result
    }

    async fn run_cycle(&mut self) -> Result<CycleOutcome, TrackerError> {
        self.cycles += 1;

        // Loading
        let config = self.source.load()?;
        let store = self.state_store(&config)?;
        let mut trackers = TrackerSet::build(&config, &self.filter, Arc::clone(&self.bus), store)?;
        tracing::info!(
            cycle = self.cycles,
            version = %config.version,
            interval_ms = config.interval().as_millis() as u64,
            "Configuration loaded, tracking {:?}",
            trackers.ids()
        );

        // Connecting
        let (faults_tx, mut faults_rx) = mpsc::unbounded_channel();
        trackers.connect(faults_tx).await?;

        // Running
        let outcome = self.run_ticks(&config, &mut trackers, &mut faults_rx).await;

        // Draining
        trackers.drain().await;
        if let Err(e) = &outcome {
            tracing::error!(robot = ?e.robot(), "Cycle {} aborted: {}", self.cycles, e);
        }
        outcome
    }

    async fn run_ticks(
        &mut self,
        config: &MotionTrackerConfig,
        trackers: &mut TrackerSet,
        faults: &mut mpsc::UnboundedReceiver<TrackerError>,
    ) -> Result<CycleOutcome, TrackerError> {
        let interval = config.interval();
        let stats_interval = config.stats_interval();
        let mut last_stats = Instant::now();
        let mut pending: Option<ControlSignal> = None;

        loop {
            // Checkpoint
            while let Ok(control) = self.control_rx.try_recv() {
                Self::absorb(control, trackers, &mut pending);
            }
            if let Ok(fault) = faults.try_recv() {
                return Err(fault);
            }
            if let Some(signal) = pending {
                return Ok(signal.into());
            }

            trackers.tick().await?;

            if let Some(every) = stats_interval {
                if last_stats.elapsed() >= every {
                    trackers.log_stats();
                    last_stats = Instant::now();
                }
            }

            let sleep = tokio::time::sleep(interval);
            tokio::pin!(sleep);
            while pending.is_none() {
                tokio::select! {
                    _ = &mut sleep => break,
                    Some(control) = self.control_rx.recv() => {
                        Self::absorb(control, trackers, &mut pending);
                    }
                    Some(fault) = faults.recv() => return Err(fault),
                }
            }
        }
    }

    fn absorb(control: Control, trackers: &TrackerSet, pending: &mut Option<ControlSignal>) {
        match control {
            Control::Signal(signal) => {
                tracing::debug!("Control signal received: {:?}", signal);
                *pending = Some(ControlSignal::merge(*pending, signal));
            }
            Control::Stats(reply) => {
                let _ = reply.send(trackers.stats());
            }
        }
    }

    /// Store for the cycle: the override, or the configured backend.
    ///
    /// A backend is reopened only when its configuration changed, so memory
    /// snapshots survive a reload.
    fn state_store(
        &mut self,
        config: &MotionTrackerConfig,
    ) -> Result<Option<Arc<dyn StateStore>>, TrackerError> {
        if let Some(store) = &self.store_override {
            return Ok(Some(Arc::clone(store)));
        }

        let Some(wanted) = &config.state_store else {
            self.opened_store = None;
            return Ok(None);
        };

        if let Some((opened, store)) = &self.opened_store {
            if opened == wanted {
                return Ok(Some(Arc::clone(store)));
            }
        }

        let store = open_store(wanted).map_err(TrackerError::StoreOpen)?;
        tracing::info!(backend = ?wanted.backend, path = ?wanted.path, "State store opened");
        self.opened_store = Some((wanted.clone(), Arc::clone(&store)));
        Ok(Some(store))
    }
}
