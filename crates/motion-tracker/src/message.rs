// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Bus payloads and telemetry validation.
//!
//! Inbound telemetry:
//!
//! ```json
//! {"id": "r1", "theta1": 0.0, "theta2": 0.0, "base": [0, 0], "shoulder": [0, 0]}
//! ```
//!
//! Outbound pose:
//!
//! ```json
//! {"id": "r1", "base": [0, 0], "shoulder": [0, 0], "elbow": [1, 0], "wrist": [2, 0], "timestamp": 1700000000000000000}
//! ```

use crate::config::GeometrySource;
use crate::kinematics::{ArmGeometry, KinematicState, Point2};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// Why a telemetry payload was not queued.
///
/// Rejections are an accept-filter, not a failure: the payload is logged,
/// counted and discarded.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("payload is not valid JSON: {0}")]
    NotJson(String),

    #[error("payload is not a JSON object")]
    NotObject,

    #[error("missing field '{0}'")]
    MissingField(&'static str),

    #[error("invalid field value: {0}")]
    InvalidField(String),

    #[error("robot id mismatch (expected '{expected}', got '{got}')")]
    IdMismatch { expected: String, got: String },
}

/// Base and shoulder carried by a telemetry message.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Placement {
    pub base: Point2,
    pub shoulder: Point2,
}

/// Validated telemetry, ready for the tracker queue.
#[derive(Debug, Clone, PartialEq)]
pub struct TelemetryMessage {
    pub robot_id: String,
    pub theta1: f64,
    pub theta2: f64,
    /// Always present for [`GeometrySource::Message`] robots.
    pub placement: Option<Placement>,
    /// Producer timestamp, when supplied.
    pub timestamp: Option<u64>,
}

#[derive(Deserialize)]
struct RawTelemetry {
    id: String,
    theta1: f64,
    theta2: f64,
    #[serde(default)]
    base: Option<Point2>,
    #[serde(default)]
    shoulder: Option<Point2>,
    #[serde(default)]
    timestamp: Option<serde_json::Number>,
}

/// Fields a telemetry message must carry for a given geometry source.
pub fn required_fields(source: GeometrySource) -> &'static [&'static str] {
    match source {
        GeometrySource::Message => &["id", "theta1", "theta2", "base", "shoulder"],
        GeometrySource::Store => &["id", "theta1", "theta2"],
    }
}

impl TelemetryMessage {
    /// Validate a raw payload for the robot `expected_id`.
    pub fn parse(
        payload: &[u8],
        expected_id: &str,
        source: GeometrySource,
    ) -> Result<Self, Rejection> {
        let value: serde_json::Value =
            serde_json::from_slice(payload).map_err(|e| Rejection::NotJson(e.to_string()))?;

        let object = value.as_object().ok_or(Rejection::NotObject)?;
        for &field in required_fields(source) {
            match object.get(field) {
                None | Some(serde_json::Value::Null) => {
                    return Err(Rejection::MissingField(field));
                }
                Some(_) => {}
            }
        }

        let raw: RawTelemetry =
            serde_json::from_value(value).map_err(|e| Rejection::InvalidField(e.to_string()))?;

        if raw.id != expected_id {
            return Err(Rejection::IdMismatch {
                expected: expected_id.to_string(),
                got: raw.id,
            });
        }

        if !raw.theta1.is_finite() || !raw.theta2.is_finite() {
            return Err(Rejection::InvalidField("joint angles must be finite".into()));
        }

        let placement = match (raw.base, raw.shoulder) {
            (Some(base), Some(shoulder)) if base.is_finite() && shoulder.is_finite() => {
                Some(Placement { base, shoulder })
            }
            (Some(_), Some(_)) => {
                return Err(Rejection::InvalidField("positions must be finite".into()));
            }
            _ => None,
        };

        let timestamp = raw
            .timestamp
            .and_then(|n| n.as_u64().or_else(|| n.as_f64().map(|f| f as u64)));

        Ok(Self {
            robot_id: raw.id,
            theta1: raw.theta1,
            theta2: raw.theta2,
            placement,
            timestamp,
        })
    }
}

/// Outbound pose message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoseMessage {
    pub id: String,
    pub base: Point2,
    pub shoulder: Point2,
    pub elbow: Point2,
    pub wrist: Point2,
    /// Unix nanoseconds at which the pose was computed.
    pub timestamp: u64,
}

impl PoseMessage {
    pub fn from_state(id: &str, state: &KinematicState) -> Self {
        Self {
            id: id.to_string(),
            base: state.base(),
            shoulder: state.shoulder(),
            elbow: state.elbow(),
            wrist: state.wrist(),
            timestamp: state.last_updated().map(unix_nanos).unwrap_or(0),
        }
    }
}

/// Geometry snapshot shared through the state store under `robot_<id>`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PersistedSnapshot {
    pub base: Point2,
    pub shoulder: Point2,
    pub length_shoulder_to_elbow: f64,
    pub length_elbow_to_gripper: f64,
}

impl PersistedSnapshot {
    pub fn new(base: Point2, shoulder: Point2, arm: ArmGeometry) -> Self {
        Self {
            base,
            shoulder,
            length_shoulder_to_elbow: arm.shoulder_to_elbow,
            length_elbow_to_gripper: arm.elbow_to_gripper,
        }
    }

    pub fn arm(&self) -> ArmGeometry {
        ArmGeometry::new(self.length_shoulder_to_elbow, self.length_elbow_to_gripper)
    }

    pub fn placement(&self) -> Placement {
        Placement {
            base: self.base,
            shoulder: self.shoulder,
        }
    }
}

/// Nanoseconds since the Unix epoch (0 for times before it).
pub fn unix_nanos(at: SystemTime) -> u64 {
    at.duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> Result<TelemetryMessage, Rejection> {
        TelemetryMessage::parse(json.as_bytes(), "r1", GeometrySource::Message)
    }

    #[test]
    fn test_accepts_complete_message() {
        let msg = parse(
            r#"{"id":"r1","theta1":0.5,"theta2":-0.25,"base":[0,0],"shoulder":[0,1],"timestamp":42}"#,
        )
        .expect("valid");
        assert_eq!(msg.theta1, 0.5);
        assert_eq!(msg.theta2, -0.25);
        assert_eq!(
            msg.placement,
            Some(Placement {
                base: Point2::ORIGIN,
                shoulder: Point2::new(0.0, 1.0)
            })
        );
        assert_eq!(msg.timestamp, Some(42));
    }

    #[test]
    fn test_each_required_field_is_enforced() {
        let full = serde_json::json!({
            "id": "r1", "theta1": 0.0, "theta2": 0.0, "base": [0, 0], "shoulder": [0, 0]
        });
        for &field in required_fields(GeometrySource::Message) {
            let mut partial = full.clone();
            partial.as_object_mut().unwrap().remove(field);
            let payload = serde_json::to_vec(&partial).unwrap();
            assert_eq!(
                TelemetryMessage::parse(&payload, "r1", GeometrySource::Message),
                Err(Rejection::MissingField(field))
            );
        }
    }

    #[test]
    fn test_null_counts_as_missing() {
        assert_eq!(
            parse(r#"{"id":"r1","theta1":null,"theta2":0,"base":[0,0],"shoulder":[0,0]}"#),
            Err(Rejection::MissingField("theta1"))
        );
    }

    #[test]
    fn test_id_mismatch() {
        let err = parse(r#"{"id":"r2","theta1":0,"theta2":0,"base":[0,0],"shoulder":[0,0]}"#)
            .unwrap_err();
        assert!(matches!(err, Rejection::IdMismatch { ref got, .. } if got == "r2"));
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(matches!(parse("not json"), Err(Rejection::NotJson(_))));
        assert_eq!(parse("[1, 2]"), Err(Rejection::NotObject));
        assert!(matches!(
            parse(r#"{"id":"r1","theta1":"a","theta2":0,"base":[0,0],"shoulder":[0,0]}"#),
            Err(Rejection::InvalidField(_))
        ));
        assert!(matches!(
            parse(r#"{"id":"r1","theta1":0,"theta2":0,"base":[0],"shoulder":[0,0]}"#),
            Err(Rejection::InvalidField(_))
        ));
    }

    #[test]
    fn test_store_source_needs_only_angles() {
        let msg = TelemetryMessage::parse(
            br#"{"id":"r1","theta1":1.0,"theta2":2.0}"#,
            "r1",
            GeometrySource::Store,
        )
        .expect("valid");
        assert!(msg.placement.is_none());
    }

    #[test]
    fn test_pose_message_layout() {
        let pose = PoseMessage {
            id: "r1".into(),
            base: Point2::ORIGIN,
            shoulder: Point2::ORIGIN,
            elbow: Point2::new(1.0, 0.0),
            wrist: Point2::new(2.0, 0.0),
            timestamp: 7,
        };
        let value = serde_json::to_value(&pose).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "id": "r1",
                "base": [0.0, 0.0],
                "shoulder": [0.0, 0.0],
                "elbow": [1.0, 0.0],
                "wrist": [2.0, 0.0],
                "timestamp": 7
            })
        );
    }

    #[test]
    fn test_snapshot_field_names() {
        let snap = PersistedSnapshot::new(Point2::ORIGIN, Point2::new(0.0, 1.0), ArmGeometry::new(2.0, 1.5));
        let value = serde_json::to_value(snap).unwrap();
        assert_eq!(value["length_shoulder_to_elbow"], 2.0);
        assert_eq!(value["length_elbow_to_gripper"], 1.5);
        assert_eq!(value["shoulder"], serde_json::json!([0.0, 1.0]));
    }
}
