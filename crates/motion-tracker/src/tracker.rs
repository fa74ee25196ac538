// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Per-robot tracker.
//!
//! A [`RobotTracker`] owns one robot's [`KinematicState`]. Subscriber tasks
//! only ever push validated telemetry into its FIFO queue through a
//! [`TelemetryInbox`]; the state itself is mutated exclusively by
//! [`RobotTracker::update`], which takes `&mut self` and therefore can never
//! overlap with another update of the same tracker.
//!
//! # Tick
//!
//! ```text
//! queue --(one message, oldest first)--> geometry lookup --> KinematicState::apply
//!       --> PoseMessage --> every publisher on each pose exchange
//!       --> snapshot (optional)
//! ```

use crate::bus::MessageBus;
use crate::config::{ConfigError, GeometrySource, RobotConfig};
use crate::endpoint::{FaultSender, Publisher, Subscriber};
use crate::error::TrackerError;
use crate::kinematics::{ArmGeometry, JointUpdate, KinematicState};
use crate::message::{PersistedSnapshot, Placement, PoseMessage, Rejection, TelemetryMessage};
use crate::stats::TrackerStats;
use crate::store::{SnapshotStore, StateStore};
use std::sync::Arc;
use std::time::SystemTime;
use tokio::sync::mpsc;

/// Result of handing a payload to an inbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    Queued,
    Dropped(Rejection),
}

/// Message-ingestion entry point of a tracker.
///
/// Cheap to clone; safe to use from any task.
#[derive(Clone)]
pub struct TelemetryInbox {
    robot_id: Arc<str>,
    source: GeometrySource,
    queue: mpsc::UnboundedSender<TelemetryMessage>,
    stats: Arc<TrackerStats>,
}

impl TelemetryInbox {
    pub fn robot_id(&self) -> &str {
        &self.robot_id
    }

    /// Validate a payload and enqueue it. Never blocks.
    ///
    /// Malformed or foreign telemetry is dropped and reported as
    /// [`IngestOutcome::Dropped`]. An error means the tracker behind this
    /// inbox is gone while deliveries are still arriving.
    pub fn ingest(&self, payload: &[u8]) -> Result<IngestOutcome, TrackerError> {
        TrackerStats::bump(&self.stats.messages_received);

        let message = match TelemetryMessage::parse(payload, &self.robot_id, self.source) {
            Ok(message) => message,
            Err(rejection) => {
                TrackerStats::bump(&self.stats.messages_dropped);
                match rejection {
                    Rejection::IdMismatch { .. } => {
                        tracing::debug!(robot = %self.robot_id, "Dropping telemetry: {}", rejection)
                    }
                    _ => tracing::warn!(robot = %self.robot_id, "Dropping telemetry: {}", rejection),
                }
                return Ok(IngestOutcome::Dropped(rejection));
            }
        };

        self.queue
            .send(message)
            .map_err(|_| TrackerError::fault(&self.robot_id, "ingest", "telemetry queue closed"))?;
        TrackerStats::bump(&self.stats.messages_queued);
        Ok(IngestOutcome::Queued)
    }
}

/// Tracks one two-joint arm.
pub struct RobotTracker {
    config: RobotConfig,
    arm: ArmGeometry,
    state: KinematicState,
    queue_tx: mpsc::UnboundedSender<TelemetryMessage>,
    queue_rx: mpsc::UnboundedReceiver<TelemetryMessage>,
    publishers: Vec<Publisher>,
    subscribers: Vec<Subscriber>,
    snapshots: Option<SnapshotStore>,
    stats: Arc<TrackerStats>,
}

impl RobotTracker {
    /// Build a tracker and resolve its endpoints.
    ///
    /// Fails on a missing protocol block, an unsupported endpoint type or an
    /// unknown handler; nothing is connected yet.
    pub fn new(
        config: RobotConfig,
        bus: Arc<dyn MessageBus>,
        store: Option<Arc<dyn StateStore>>,
    ) -> Result<Self, ConfigError> {
        let protocol = config.protocol()?;

        let publishers = protocol
            .publishers
            .iter()
            .map(|endpoint| Publisher::from_config(&config.id, endpoint, Arc::clone(&bus)))
            .collect::<Result<Vec<_>, _>>()?;
        let subscribers = protocol
            .subscribers
            .iter()
            .map(|endpoint| Subscriber::from_config(&config.id, endpoint, Arc::clone(&bus)))
            .collect::<Result<Vec<_>, _>>()?;

        let needs_store =
            config.geometry_source == GeometrySource::Store || config.persist_snapshots;
        if needs_store && store.is_none() {
            return Err(ConfigError::Invalid(format!(
                "robot '{}': no state store available",
                config.id
            )));
        }

        let arm = config.geometry();
        let state = KinematicState::new(
            config.initial_position.base,
            config.initial_position.shoulder,
            arm,
        );
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        let stats = Arc::new(TrackerStats::new(config.id.clone()));

        Ok(Self {
            arm,
            state,
            queue_tx,
            queue_rx,
            publishers,
            subscribers,
            snapshots: store.map(SnapshotStore::new),
            stats,
            config,
        })
    }

    pub fn id(&self) -> &str {
        &self.config.id
    }

    pub fn config(&self) -> &RobotConfig {
        &self.config
    }

    pub fn state(&self) -> &KinematicState {
        &self.state
    }

    /// Arm geometry used by the last update.
    pub fn arm(&self) -> ArmGeometry {
        self.arm
    }

    pub fn stats(&self) -> Arc<TrackerStats> {
        Arc::clone(&self.stats)
    }

    pub fn publishers(&self) -> &[Publisher] {
        &self.publishers
    }

    pub fn subscribers(&self) -> &[Subscriber] {
        &self.subscribers
    }

    /// Ingestion entry point for this tracker's robot.
    pub fn inbox(&self) -> TelemetryInbox {
        TelemetryInbox {
            robot_id: Arc::from(self.config.id.as_str()),
            source: self.config.geometry_source,
            queue: self.queue_tx.clone(),
            stats: Arc::clone(&self.stats),
        }
    }

    /// Connect all publishers, then all subscribers, in configuration order.
    ///
    /// Stops at the first failure; the caller is expected to
    /// [`disconnect`](Self::disconnect) the tracker.
    pub async fn connect(&mut self, faults: FaultSender) -> Result<(), TrackerError> {
        for publisher in &mut self.publishers {
            publisher.connect().await?;
        }

        let inbox = self.inbox();
        for subscriber in &mut self.subscribers {
            subscriber.connect(inbox.clone(), faults.clone()).await?;
        }

        tracing::info!(
            robot = %self.config.id,
            publishers = self.publishers.len(),
            subscribers = self.subscribers.len(),
            source = ?self.config.geometry_source,
            sample_interval_ms = self.config.sample_interval().as_millis() as u64,
            "Tracker connected"
        );
        Ok(())
    }

    /// One tick: consume at most one queued message.
    ///
    /// Returns the published pose, or `None` when the queue was empty or no
    /// snapshot was available. An empty queue leaves state untouched and
    /// publishes nothing.
    pub async fn update(&mut self) -> Result<Option<PoseMessage>, TrackerError> {
        let Ok(message) = self.queue_rx.try_recv() else {
            return Ok(None);
        };

        let Some((placement, arm)) = self.resolve_geometry(&message)? else {
            TrackerStats::bump(&self.stats.updates_skipped);
            tracing::debug!(robot = %self.config.id, "No snapshot stored, telemetry skipped");
            return Ok(None);
        };

        self.arm = arm;
        self.state.apply(
            JointUpdate {
                theta1: message.theta1,
                theta2: message.theta2,
                base: placement.base,
                shoulder: placement.shoulder,
            },
            arm,
            SystemTime::now(),
        );
        TrackerStats::bump(&self.stats.updates_applied);

        if self.config.persist_snapshots && self.config.geometry_source == GeometrySource::Message {
            if let Some(snapshots) = &self.snapshots {
                let snapshot = PersistedSnapshot::new(placement.base, placement.shoulder, arm);
                snapshots
                    .save(&self.config.id, &snapshot)
                    .map_err(|source| TrackerError::Store {
                        robot: self.config.id.clone(),
                        source,
                    })?;
            }
        }

        let pose = PoseMessage::from_state(&self.config.id, &self.state);
        let payload = serde_json::to_vec(&pose)
            .map_err(|e| TrackerError::fault(&self.config.id, "encode", e))?;

        for exchange in &self.config.pose_exchanges {
            self.publish(exchange, &payload).await?;
        }

        tracing::debug!(
            robot = %self.config.id,
            elbow = ?pose.elbow,
            wrist = ?pose.wrist,
            "Pose published"
        );
        Ok(Some(pose))
    }

    fn resolve_geometry(
        &self,
        message: &TelemetryMessage,
    ) -> Result<Option<(Placement, ArmGeometry)>, TrackerError> {
        match self.config.geometry_source {
            GeometrySource::Message => {
                let placement = message.placement.ok_or_else(|| {
                    TrackerError::fault(&self.config.id, "update", "telemetry without base/shoulder")
                })?;
                Ok(Some((placement, self.arm)))
            }
            GeometrySource::Store => {
                let snapshots = self.snapshots.as_ref().ok_or_else(|| {
                    TrackerError::fault(&self.config.id, "update", "no state store attached")
                })?;
                let snapshot =
                    snapshots
                        .load(&message.robot_id)
                        .map_err(|source| TrackerError::Store {
                            robot: self.config.id.clone(),
                            source,
                        })?;
                Ok(snapshot.map(|s| (s.placement(), s.arm())))
            }
        }
    }

    /// Forward `payload` to every publisher on `exchange`.
    ///
    /// Returns how many publishers received it; zero is not an error.
    pub async fn publish(&self, exchange: &str, payload: &[u8]) -> Result<usize, TrackerError> {
        let mut delivered = 0;
        for publisher in self.publishers.iter().filter(|p| p.exchange() == exchange) {
            publisher
                .publish(payload.to_vec())
                .await
                .map_err(|source| TrackerError::Publish {
                    robot: self.config.id.clone(),
                    exchange: exchange.to_string(),
                    source,
                })?;
            TrackerStats::bump(&self.stats.poses_published);
            delivered += 1;
        }
        Ok(delivered)
    }

    /// Stop subscriber tasks and mark publishers disconnected.
    pub async fn disconnect(&mut self) {
        for subscriber in &mut self.subscribers {
            subscriber.disconnect().await;
        }
        for publisher in &mut self.publishers {
            publisher.disconnect();
        }
        tracing::info!(robot = %self.config.id, "Tracker disconnected");
    }
}
