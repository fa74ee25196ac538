// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Publisher and subscriber endpoints.
//!
//! Endpoint type and delivery handler are resolved from configuration once,
//! when the tracker is built. Deliveries are then dispatched through the
//! resolved [`TelemetryHandler`] without any per-message lookup.

use crate::bus::{BusError, Delivery, MessageBus};
use crate::config::{ConfigError, EndpointConfig};
use crate::error::TrackerError;
use crate::tracker::TelemetryInbox;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Channel subscriber tasks report fatal faults on.
pub type FaultSender = mpsc::UnboundedSender<TrackerError>;

/// Supported endpoint protocols.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolKind {
    Amq,
}

impl ProtocolKind {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "amq" => Some(Self::Amq),
            _ => None,
        }
    }
}

/// Handler a subscriber's deliveries are dispatched to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TelemetryHandler {
    /// Joint-angle telemetry for this tracker's robot.
    #[default]
    RobotTelemetry,
}

impl TelemetryHandler {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "robot_telemetry" | "robot_msg_handler" => Some(Self::RobotTelemetry),
            _ => None,
        }
    }

    /// Hand a delivery to the inbox.
    ///
    /// Rejected payloads are handled inside the inbox; only faults surface.
    pub fn dispatch(self, inbox: &TelemetryInbox, delivery: &Delivery) -> Result<(), TrackerError> {
        match self {
            Self::RobotTelemetry => inbox.ingest(&delivery.payload).map(|_| ()),
        }
    }
}

/// Outbound endpoint.
pub struct Publisher {
    robot_id: String,
    kind: ProtocolKind,
    exchange: String,
    routing_key: String,
    bus: Arc<dyn MessageBus>,
    connected: bool,
}

impl Publisher {
    pub fn from_config(
        robot_id: &str,
        config: &EndpointConfig,
        bus: Arc<dyn MessageBus>,
    ) -> Result<Self, ConfigError> {
        let kind = config.protocol_kind(robot_id)?;
        Ok(Self {
            robot_id: robot_id.to_string(),
            kind,
            exchange: config.exchange.clone(),
            routing_key: config
                .routing_key
                .clone()
                .unwrap_or_else(|| robot_id.to_string()),
            bus,
            connected: false,
        })
    }

    pub fn kind(&self) -> ProtocolKind {
        self.kind
    }

    pub fn exchange(&self) -> &str {
        &self.exchange
    }

    pub fn routing_key(&self) -> &str {
        &self.routing_key
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub async fn connect(&mut self) -> Result<(), TrackerError> {
        self.bus
            .declare_exchange(&self.exchange)
            .await
            .map_err(|source| TrackerError::Connection {
                robot: self.robot_id.clone(),
                endpoint: format!("publisher '{}'", self.exchange),
                source,
            })?;
        self.connected = true;
        tracing::debug!(robot = %self.robot_id, exchange = %self.exchange, "Publisher connected");
        Ok(())
    }

    pub async fn publish(&self, payload: Vec<u8>) -> Result<(), BusError> {
        if !self.connected {
            return Err(BusError::NotConnected);
        }
        self.bus
            .publish(&self.exchange, &self.routing_key, payload)
            .await
    }

    pub fn disconnect(&mut self) {
        self.connected = false;
    }
}

/// Inbound endpoint.
pub struct Subscriber {
    robot_id: String,
    kind: ProtocolKind,
    exchange: String,
    binding: String,
    handler: TelemetryHandler,
    bus: Arc<dyn MessageBus>,
    task: Option<JoinHandle<()>>,
}

impl Subscriber {
    pub fn from_config(
        robot_id: &str,
        config: &EndpointConfig,
        bus: Arc<dyn MessageBus>,
    ) -> Result<Self, ConfigError> {
        let kind = config.protocol_kind(robot_id)?;
        let handler = config.handler(robot_id)?;
        Ok(Self {
            robot_id: robot_id.to_string(),
            kind,
            exchange: config.exchange.clone(),
            binding: config.binding.clone().unwrap_or_else(|| "#".to_string()),
            handler,
            bus,
            task: None,
        })
    }

    pub fn kind(&self) -> ProtocolKind {
        self.kind
    }

    pub fn exchange(&self) -> &str {
        &self.exchange
    }

    pub fn binding(&self) -> &str {
        &self.binding
    }

    pub fn handler(&self) -> TelemetryHandler {
        self.handler
    }

    pub fn is_connected(&self) -> bool {
        self.task.as_ref().map(|t| !t.is_finished()).unwrap_or(false)
    }

    /// Bind to the exchange and start forwarding deliveries to `inbox`.
    pub async fn connect(
        &mut self,
        inbox: TelemetryInbox,
        faults: FaultSender,
    ) -> Result<(), TrackerError> {
        let connection_error = |source| TrackerError::Connection {
            robot: self.robot_id.clone(),
            endpoint: format!("subscriber '{}' ({})", self.exchange, self.binding),
            source,
        };

        self.bus
            .declare_exchange(&self.exchange)
            .await
            .map_err(connection_error)?;
        let mut subscription = self
            .bus
            .bind(&self.exchange, &self.binding)
            .await
            .map_err(connection_error)?;

        let handler = self.handler;
        self.task = Some(tokio::spawn(async move {
            while let Some(delivery) = subscription.recv().await {
                if let Err(fault) = handler.dispatch(&inbox, &delivery) {
                    tracing::error!(
                        exchange = %delivery.exchange,
                        routing_key = %delivery.routing_key,
                        "{}",
                        fault
                    );
                    let _ = faults.send(fault);
                    break;
                }
            }
        }));

        tracing::debug!(
            robot = %self.robot_id,
            exchange = %self.exchange,
            binding = %self.binding,
            "Subscriber connected"
        );
        Ok(())
    }

    /// Stop forwarding and drop the binding.
    pub async fn disconnect(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            let _ = task.await;
        }
    }
}
