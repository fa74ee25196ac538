// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Planar two-joint arm kinematics.
//!
//! ```text
//!            wrist
//!           /
//!    L2    /  theta1 + theta2
//!         /
//!    elbow
//!       |   L1, theta1
//!    shoulder
//!       |
//!     base
//! ```

use serde::{Deserialize, Serialize};
use std::ops::Add;
use std::time::SystemTime;

/// 2D coordinate, serialized as `[x, y]`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; 2]", into = "[f64; 2]")]
pub struct Point2 {
    pub x: f64,
    pub y: f64,
}

impl Point2 {
    pub const ORIGIN: Point2 = Point2 { x: 0.0, y: 0.0 };

    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Point at `length` along `angle` (radians) from the origin.
    pub fn polar(length: f64, angle: f64) -> Self {
        let (sin, cos) = angle.sin_cos();
        Self::new(length * cos, length * sin)
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

impl Add for Point2 {
    type Output = Point2;

    fn add(self, rhs: Point2) -> Point2 {
        Point2::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl From<[f64; 2]> for Point2 {
    fn from([x, y]: [f64; 2]) -> Self {
        Self::new(x, y)
    }
}

impl From<Point2> for [f64; 2] {
    fn from(p: Point2) -> Self {
        [p.x, p.y]
    }
}

/// Arm segment lengths.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ArmGeometry {
    /// L1: shoulder to elbow.
    pub shoulder_to_elbow: f64,
    /// L2: elbow to gripper.
    pub elbow_to_gripper: f64,
}

impl ArmGeometry {
    pub const fn new(shoulder_to_elbow: f64, elbow_to_gripper: f64) -> Self {
        Self {
            shoulder_to_elbow,
            elbow_to_gripper,
        }
    }
}

/// Forward kinematics: returns `(elbow, wrist)`.
///
/// `elbow = shoulder + L1·(cos θ1, sin θ1)`,
/// `wrist = elbow + L2·(cos(θ1+θ2), sin(θ1+θ2))`.
pub fn forward_kinematics(
    shoulder: Point2,
    arm: ArmGeometry,
    theta1: f64,
    theta2: f64,
) -> (Point2, Point2) {
    let elbow = shoulder + Point2::polar(arm.shoulder_to_elbow, theta1);
    let wrist = elbow + Point2::polar(arm.elbow_to_gripper, theta1 + theta2);
    (elbow, wrist)
}

/// Mutable pose of one robot.
///
/// `elbow` and `wrist` have no setters: they are recomputed from the joint
/// angles, shoulder and arm geometry on every [`KinematicState::apply`].
#[derive(Debug, Clone, PartialEq)]
pub struct KinematicState {
    theta1: f64,
    theta2: f64,
    base: Point2,
    shoulder: Point2,
    elbow: Point2,
    wrist: Point2,
    last_updated: Option<SystemTime>,
}

/// Inputs of one state transition.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct JointUpdate {
    pub theta1: f64,
    pub theta2: f64,
    pub base: Point2,
    pub shoulder: Point2,
}

impl KinematicState {
    /// Initial pose with both joints at zero.
    pub fn new(base: Point2, shoulder: Point2, arm: ArmGeometry) -> Self {
        let (elbow, wrist) = forward_kinematics(shoulder, arm, 0.0, 0.0);
        Self {
            theta1: 0.0,
            theta2: 0.0,
            base,
            shoulder,
            elbow,
            wrist,
            last_updated: None,
        }
    }

    /// Apply a joint update and re-derive elbow and wrist.
    ///
    /// Every field is computed before any is written, so the state never
    /// reflects a partially applied update.
    pub fn apply(&mut self, update: JointUpdate, arm: ArmGeometry, at: SystemTime) {
        let (elbow, wrist) = forward_kinematics(update.shoulder, arm, update.theta1, update.theta2);
        *self = Self {
            theta1: update.theta1,
            theta2: update.theta2,
            base: update.base,
            shoulder: update.shoulder,
            elbow,
            wrist,
            last_updated: Some(at),
        };
    }

    pub fn theta1(&self) -> f64 {
        self.theta1
    }

    pub fn theta2(&self) -> f64 {
        self.theta2
    }

    pub fn base(&self) -> Point2 {
        self.base
    }

    pub fn shoulder(&self) -> Point2 {
        self.shoulder
    }

    pub fn elbow(&self) -> Point2 {
        self.elbow
    }

    pub fn wrist(&self) -> Point2 {
        self.wrist
    }

    /// Time of the last applied update, `None` before the first one.
    pub fn last_updated(&self) -> Option<SystemTime> {
        self.last_updated
    }
}
