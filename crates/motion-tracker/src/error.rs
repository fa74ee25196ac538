// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Fatal error taxonomy.
//!
//! Every variant here stops the current reload cycle and, through the
//! supervisor, the process. Malformed telemetry is not an error: see
//! [`crate::message::Rejection`].

use crate::bus::BusError;
use crate::config::ConfigError;
use crate::store::StoreError;
use thiserror::Error;

/// Tracker and supervisor errors.
#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("robot '{robot}': connecting {endpoint} failed: {source}")]
    Connection {
        robot: String,
        endpoint: String,
        #[source]
        source: BusError,
    },

    #[error("robot '{robot}': publishing to '{exchange}' failed: {source}")]
    Publish {
        robot: String,
        exchange: String,
        #[source]
        source: BusError,
    },

    #[error("robot '{robot}': handler fault during {stage}: {reason}")]
    HandlerFault {
        robot: String,
        stage: &'static str,
        reason: String,
    },

    #[error("robot '{robot}': state store failure: {source}")]
    Store {
        robot: String,
        #[source]
        source: StoreError,
    },

    #[error("state store unavailable: {0}")]
    StoreOpen(#[source] StoreError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("supervisor is not running")]
    NotRunning,
}

impl TrackerError {
    /// Robot the error is attributed to, if any.
    pub fn robot(&self) -> Option<&str> {
        match self {
            Self::Connection { robot, .. }
            | Self::Publish { robot, .. }
            | Self::HandlerFault { robot, .. }
            | Self::Store { robot, .. } => Some(robot),
            Self::Config(_) | Self::StoreOpen(_) | Self::Io(_) | Self::NotRunning => None,
        }
    }

    pub(crate) fn fault(robot: &str, stage: &'static str, reason: impl ToString) -> Self {
        Self::HandlerFault {
            robot: robot.to_string(),
            stage,
            reason: reason.to_string(),
        }
    }
}
