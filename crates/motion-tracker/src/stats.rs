// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Per-tracker statistics.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Counters shared between a tracker and its subscriber tasks.
#[derive(Debug)]
pub struct TrackerStats {
    /// Robot id.
    pub robot_id: String,

    /// Deliveries handed to the inbox.
    pub messages_received: AtomicU64,

    /// Deliveries accepted into the queue.
    pub messages_queued: AtomicU64,

    /// Deliveries rejected by validation.
    pub messages_dropped: AtomicU64,

    /// Messages applied to the kinematic state.
    pub updates_applied: AtomicU64,

    /// Messages consumed without a state change (no snapshot available).
    pub updates_skipped: AtomicU64,

    /// Pose payloads handed to publishers.
    pub poses_published: AtomicU64,

    /// Tracker creation time.
    pub created: Instant,
}

impl TrackerStats {
    pub fn new(robot_id: impl Into<String>) -> Self {
        Self {
            robot_id: robot_id.into(),
            messages_received: AtomicU64::new(0),
            messages_queued: AtomicU64::new(0),
            messages_dropped: AtomicU64::new(0),
            updates_applied: AtomicU64::new(0),
            updates_skipped: AtomicU64::new(0),
            poses_published: AtomicU64::new(0),
            created: Instant::now(),
        }
    }

    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Get snapshot of current stats.
    pub fn snapshot(&self) -> TrackerStatsSnapshot {
        TrackerStatsSnapshot {
            robot_id: self.robot_id.clone(),
            messages_received: self.messages_received.load(Ordering::Relaxed),
            messages_queued: self.messages_queued.load(Ordering::Relaxed),
            messages_dropped: self.messages_dropped.load(Ordering::Relaxed),
            updates_applied: self.updates_applied.load(Ordering::Relaxed),
            updates_skipped: self.updates_skipped.load(Ordering::Relaxed),
            poses_published: self.poses_published.load(Ordering::Relaxed),
            uptime_secs: self.created.elapsed().as_secs(),
        }
    }
}

/// Snapshot of tracker statistics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackerStatsSnapshot {
    pub robot_id: String,
    pub messages_received: u64,
    pub messages_queued: u64,
    pub messages_dropped: u64,
    pub updates_applied: u64,
    pub updates_skipped: u64,
    pub poses_published: u64,
    pub uptime_secs: u64,
}

impl TrackerStatsSnapshot {
    /// Messages accepted but not yet consumed by a tick.
    pub fn backlog(&self) -> u64 {
        self.messages_queued
            .saturating_sub(self.updates_applied + self.updates_skipped)
    }

    /// Applied updates per second since creation.
    pub fn updates_per_second(&self) -> f64 {
        if self.uptime_secs > 0 {
            self.updates_applied as f64 / self.uptime_secs as f64
        } else {
            0.0
        }
    }
}
