// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Two-joint Robotic Arm Motion Tracker
//!
//! Subscribes to joint-angle telemetry on a message bus, keeps a kinematic
//! state per robot, derives elbow and wrist positions by forward kinematics
//! and publishes the resulting pose on every tick.
//!
//! # Features
//!
//! - **Per-robot trackers**: one FIFO queue and one `KinematicState` each
//! - **Bounded ticks**: at most one telemetry message applied per tick
//! - **Hot reload**: configuration re-read on every reload cycle
//! - **Snapshot handoff**: optional geometry snapshots in a key-value store
//!
//! # Quick Start
//!
//! ```bash
//! # Write an example configuration
//! robot-motion-tracker gen-config --output motion.yaml
//!
//! # Track robot r1, feeding telemetry from stdin and printing poses
//! robot-motion-tracker --config motion.yaml --id r1 --stdin-exchange telemetry --echo
//!
//! # Reload after editing motion.yaml
//! kill -HUP <pid>
//! ```
//!
//! # Configuration File
//!
//! ```yaml
//! motion_tracker:
//!   attributes:
//!     interval: 0.1
//!   robots:
//!     - id: r1
//!       arm: { length_shoulder_to_elbow: 1.0, length_elbow_to_gripper: 1.0 }
//!       protocol:
//!         publishers:
//!           - { type: amq, exchange: rmt_robot }
//!           - { type: amq, exchange: visual }
//!         subscribers:
//!           - { type: amq, exchange: telemetry, binding: "robot.r1.#" }
//! ```

pub mod bus;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod health;
pub mod kinematics;
pub mod message;
pub mod stats;
pub mod store;
pub mod supervisor;
pub mod tracker;

pub use bus::{BusError, Delivery, LocalBroker, MessageBus, Subscription};
pub use config::{
    ConfigError, ConfigSource, FileConfigSource, GeometrySource, MotionTrackerConfig, RobotConfig,
    RobotFilter,
};
pub use error::TrackerError;
pub use health::HealthProbe;
pub use kinematics::{forward_kinematics, ArmGeometry, KinematicState, Point2};
pub use message::{PersistedSnapshot, PoseMessage, Rejection, TelemetryMessage};
pub use stats::{TrackerStats, TrackerStatsSnapshot};
pub use store::{MemoryStateStore, SnapshotStore, SqliteStateStore, StateStore, StoreError};
pub use supervisor::{ControlSignal, CycleOutcome, Supervisor, SupervisorHandle, TrackerSet};
pub use tracker::{IngestOutcome, RobotTracker, TelemetryInbox};
