// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Tracker configuration.
//!
//! The configuration file is YAML (or TOML, selected by the `.toml`
//! extension) rooted at a `motion_tracker` key. It is re-read from disk at
//! the start of every reload cycle, so nothing here is cached between cycles.

use crate::endpoint::{ProtocolKind, TelemetryHandler};
use crate::kinematics::{ArmGeometry, Point2};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("robot '{robot}': no 'protocol' block configured")]
    MissingProtocol { robot: String },

    #[error("robot '{robot}': unsupported protocol type '{kind}' (only 'amq' is supported)")]
    UnsupportedProtocol { robot: String, kind: String },

    #[error("robot '{robot}': unknown subscriber handler '{handler}'")]
    UnknownHandler { robot: String, handler: String },

    #[error("no configured robot matches '{filter}'")]
    NoMatchingRobots { filter: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// On-disk document wrapper.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigDocument {
    pub motion_tracker: MotionTrackerConfig,
}

/// Top-level tracker configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MotionTrackerConfig {
    /// Free-form configuration version, logged on every load.
    #[serde(default = "default_version")]
    pub version: String,

    /// Loop attributes.
    pub attributes: Attributes,

    /// Liveness probe listener.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health: Option<HealthConfig>,

    /// Key-value store used for snapshot handoff.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_store: Option<StateStoreConfig>,

    /// Robots, in tick order.
    #[serde(default)]
    pub robots: Vec<RobotConfig>,
}

/// Tick loop attributes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attributes {
    /// Seconds between two tick sweeps.
    pub interval: f64,

    /// Seconds between two statistics log lines (0 disables).
    #[serde(default = "default_stats_interval")]
    pub stats_interval: u64,
}

/// Health probe listener.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthConfig {
    #[serde(default = "default_health_host")]
    pub host: String,
    pub port: u16,
}

impl HealthConfig {
    /// `host:port` suitable for binding.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// State store backend selection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackend {
    #[default]
    Memory,
    Sqlite,
}

/// State store configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateStoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,

    /// SQLite database path. In-memory database when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

/// Which input is authoritative for base/shoulder/arm geometry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GeometrySource {
    /// Base and shoulder from the telemetry message, lengths from config.
    #[default]
    Message,
    /// Base, shoulder and lengths from the snapshot stored under `robot_<id>`.
    Store,
}

/// Per-robot configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RobotConfig {
    /// Robot identifier. Telemetry carrying another id is dropped.
    pub id: String,

    /// Control sample interval of the robot (seconds).
    #[serde(default = "default_sample_interval")]
    pub sample_interval: f64,

    #[serde(default)]
    pub geometry_source: GeometrySource,

    /// Write a geometry snapshot after every applied update.
    #[serde(default)]
    pub persist_snapshots: bool,

    pub arm: ArmConfig,

    #[serde(default)]
    pub initial_position: InitialPosition,

    /// Exchanges every computed pose is published to.
    #[serde(default = "default_pose_exchanges")]
    pub pose_exchanges: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<ProtocolConfig>,
}

impl RobotConfig {
    /// Arm segment lengths.
    pub fn geometry(&self) -> ArmGeometry {
        ArmGeometry::new(
            self.arm.length_shoulder_to_elbow,
            self.arm.length_elbow_to_gripper,
        )
    }

    /// Sample interval as a `Duration`.
    pub fn sample_interval(&self) -> Duration {
        Duration::from_secs_f64(self.sample_interval)
    }

    /// Protocol block, or `MissingProtocol`.
    pub fn protocol(&self) -> Result<&ProtocolConfig, ConfigError> {
        self.protocol
            .as_ref()
            .ok_or_else(|| ConfigError::MissingProtocol {
                robot: self.id.clone(),
            })
    }

    fn validate(&self, has_store: bool) -> Result<(), ConfigError> {
        if self.id.trim().is_empty() {
            return Err(ConfigError::Invalid("robot with empty id".into()));
        }

        for (name, len) in [
            ("length_shoulder_to_elbow", self.arm.length_shoulder_to_elbow),
            ("length_elbow_to_gripper", self.arm.length_elbow_to_gripper),
        ] {
            if !len.is_finite() || len < 0.0 {
                return Err(ConfigError::Invalid(format!(
                    "robot '{}': {} must be a finite non-negative number",
                    self.id, name
                )));
            }
        }

        if !self.sample_interval.is_finite() || self.sample_interval <= 0.0 {
            return Err(ConfigError::Invalid(format!(
                "robot '{}': sample_interval must be positive",
                self.id
            )));
        }

        if self.geometry_source == GeometrySource::Store && !has_store {
            return Err(ConfigError::Invalid(format!(
                "robot '{}': geometry_source 'store' requires a state_store section",
                self.id
            )));
        }
        if self.persist_snapshots && !has_store {
            return Err(ConfigError::Invalid(format!(
                "robot '{}': persist_snapshots requires a state_store section",
                self.id
            )));
        }

        let protocol = self.protocol()?;
        for endpoint in protocol.publishers.iter().chain(&protocol.subscribers) {
            endpoint.protocol_kind(&self.id)?;
            if endpoint.exchange.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "robot '{}': endpoint with empty exchange name",
                    self.id
                )));
            }
        }
        for subscriber in &protocol.subscribers {
            subscriber.handler(&self.id)?;
        }

        Ok(())
    }
}

/// Arm segment lengths.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ArmConfig {
    pub length_shoulder_to_elbow: f64,
    pub length_elbow_to_gripper: f64,
}

/// Initial base/shoulder position.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct InitialPosition {
    #[serde(default)]
    pub base: Point2,
    #[serde(default)]
    pub shoulder: Point2,
}

/// Publisher and subscriber endpoints of one robot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProtocolConfig {
    #[serde(default)]
    pub publishers: Vec<EndpointConfig>,
    #[serde(default)]
    pub subscribers: Vec<EndpointConfig>,
}

/// A single publisher or subscriber endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointConfig {
    /// Protocol type. Only `amq` is supported.
    #[serde(rename = "type")]
    pub kind: String,

    pub exchange: String,

    /// Routing key used when publishing (defaults to the robot id).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub routing_key: Option<String>,

    /// Binding key used when subscribing (defaults to `#`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub binding: Option<String>,

    /// Handler deliveries are dispatched to (defaults to `robot_telemetry`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handler: Option<String>,
}

impl EndpointConfig {
    /// AMQ endpoint on `exchange`.
    pub fn amq(exchange: impl Into<String>) -> Self {
        Self {
            kind: "amq".into(),
            exchange: exchange.into(),
            routing_key: None,
            binding: None,
            handler: None,
        }
    }

    /// Set the publish routing key.
    pub fn routing_key(mut self, key: impl Into<String>) -> Self {
        self.routing_key = Some(key.into());
        self
    }

    /// Set the subscribe binding key.
    pub fn binding(mut self, key: impl Into<String>) -> Self {
        self.binding = Some(key.into());
        self
    }

    /// Resolve the protocol type.
    pub fn protocol_kind(&self, robot: &str) -> Result<ProtocolKind, ConfigError> {
        ProtocolKind::from_name(&self.kind).ok_or_else(|| ConfigError::UnsupportedProtocol {
            robot: robot.to_string(),
            kind: self.kind.clone(),
        })
    }

    /// Resolve the delivery handler.
    pub fn handler(&self, robot: &str) -> Result<TelemetryHandler, ConfigError> {
        match self.handler.as_deref() {
            None => Ok(TelemetryHandler::default()),
            Some(name) => {
                TelemetryHandler::from_name(name).ok_or_else(|| ConfigError::UnknownHandler {
                    robot: robot.to_string(),
                    handler: name.to_string(),
                })
            }
        }
    }
}

fn default_version() -> String {
    "1.0".to_string()
}

fn default_stats_interval() -> u64 {
    10
}

fn default_health_host() -> String {
    "0.0.0.0".to_string()
}

fn default_sample_interval() -> f64 {
    0.1
}

fn default_pose_exchanges() -> Vec<String> {
    vec!["rmt_robot".to_string(), "visual".to_string()]
}

impl MotionTrackerConfig {
    /// Load and validate a configuration file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let is_toml = path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("toml"))
            .unwrap_or(false);

        if is_toml {
            Self::from_toml_str(&content)
        } else {
            Self::from_yaml_str(&content)
        }
    }

    /// Parse and validate a YAML document.
    pub fn from_yaml_str(content: &str) -> Result<Self, ConfigError> {
        let doc: ConfigDocument = serde_yaml::from_str(content)?;
        doc.motion_tracker.validate()?;
        Ok(doc.motion_tracker)
    }

    /// Parse and validate a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let doc: ConfigDocument = toml::from_str(content)?;
        doc.motion_tracker.validate()?;
        Ok(doc.motion_tracker)
    }

    /// Serialize as a YAML document.
    pub fn to_yaml(&self) -> Result<String, ConfigError> {
        let doc = ConfigDocument {
            motion_tracker: self.clone(),
        };
        Ok(serde_yaml::to_string(&doc)?)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.attributes.interval.is_finite() || self.attributes.interval <= 0.0 {
            return Err(ConfigError::Invalid(
                "attributes.interval must be a positive number of seconds".into(),
            ));
        }

        if let Some(store) = &self.state_store {
            if store.backend == StoreBackend::Memory && store.path.is_some() {
                return Err(ConfigError::Invalid(
                    "state_store.path is only valid with the sqlite backend".into(),
                ));
            }
        }

        let mut seen = HashSet::new();
        for robot in &self.robots {
            robot.validate(self.state_store.is_some())?;
            if !seen.insert(robot.id.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "robot '{}' configured more than once",
                    robot.id
                )));
            }
        }

        Ok(())
    }

    /// Tick interval.
    pub fn interval(&self) -> Duration {
        Duration::from_secs_f64(self.attributes.interval)
    }

    /// Statistics interval, `None` when disabled.
    pub fn stats_interval(&self) -> Option<Duration> {
        match self.attributes.stats_interval {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    /// Robots selected by `filter`, in configuration order.
    pub fn select(&self, filter: &RobotFilter) -> Result<Vec<&RobotConfig>, ConfigError> {
        let selected: Vec<_> = self
            .robots
            .iter()
            .filter(|robot| filter.matches(&robot.id))
            .collect();

        if selected.is_empty() {
            return Err(ConfigError::NoMatchingRobots {
                filter: filter.as_str().to_string(),
            });
        }
        Ok(selected)
    }

    /// Example configuration written by `gen-config`.
    pub fn example() -> Self {
        let robot = |id: &str| RobotConfig {
            id: id.to_string(),
            sample_interval: 0.1,
            geometry_source: GeometrySource::Message,
            persist_snapshots: true,
            arm: ArmConfig {
                length_shoulder_to_elbow: 1.0,
                length_elbow_to_gripper: 1.0,
            },
            initial_position: InitialPosition::default(),
            pose_exchanges: default_pose_exchanges(),
            protocol: Some(ProtocolConfig {
                publishers: vec![
                    EndpointConfig::amq("rmt_robot").routing_key(format!("robot.{}.pose", id)),
                    EndpointConfig::amq("visual").routing_key(format!("robot.{}.pose", id)),
                ],
                subscribers: vec![
                    EndpointConfig::amq("telemetry").binding(format!("robot.{}.#", id))
                ],
            }),
        };

        Self {
            version: default_version(),
            attributes: Attributes {
                interval: 0.1,
                stats_interval: default_stats_interval(),
            },
            health: Some(HealthConfig {
                host: default_health_host(),
                port: 9001,
            }),
            state_store: Some(StateStoreConfig {
                backend: StoreBackend::Sqlite,
                path: Some(PathBuf::from("motion-tracker-state.db")),
            }),
            robots: vec![robot("r1"), robot("r2")],
        }
    }
}

/// Source of configuration for each reload cycle.
pub trait ConfigSource: Send + Sync {
    /// Read and validate the current configuration.
    fn load(&self) -> Result<MotionTrackerConfig, ConfigError>;
}

/// Reads the configuration file from disk on every load.
#[derive(Debug, Clone)]
pub struct FileConfigSource {
    path: PathBuf,
}

impl FileConfigSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ConfigSource for FileConfigSource {
    fn load(&self) -> Result<MotionTrackerConfig, ConfigError> {
        MotionTrackerConfig::from_file(&self.path)
    }
}

impl<F> ConfigSource for F
where
    F: Fn() -> Result<MotionTrackerConfig, ConfigError> + Send + Sync,
{
    fn load(&self) -> Result<MotionTrackerConfig, ConfigError> {
        self()
    }
}

/// Selects which configured robots a process tracks (exact id or `*`/`?` glob).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RobotFilter(String);

impl RobotFilter {
    pub fn new(pattern: impl Into<String>) -> Self {
        Self(pattern.into())
    }

    /// Filter matching every robot.
    pub fn all() -> Self {
        Self("*".into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Check whether `id` is selected.
    pub fn matches(&self, id: &str) -> bool {
        self.0 == id || glob_match(&self.0, id)
    }
}

/// Simple glob matching (supports * and ?).
fn glob_match(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();
    glob_match_recursive(&pattern, &text, 0, 0)
}

fn glob_match_recursive(pattern: &[char], text: &[char], pi: usize, ti: usize) -> bool {
    if pi == pattern.len() {
        return ti == text.len();
    }

    match pattern[pi] {
        '*' => (ti..=text.len()).any(|i| glob_match_recursive(pattern, text, pi + 1, i)),
        '?' => ti < text.len() && glob_match_recursive(pattern, text, pi + 1, ti + 1),
        c => ti < text.len() && text[ti] == c && glob_match_recursive(pattern, text, pi + 1, ti + 1),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
motion_tracker:
  version: "2.1"
  attributes:
    interval: 0.05
  robots:
    - id: r1
      arm:
        length_shoulder_to_elbow: 1.0
        length_elbow_to_gripper: 0.5
      initial_position:
        base: [0.0, 0.0]
        shoulder: [0.0, 0.3]
      protocol:
        publishers:
          - type: amq
            exchange: rmt_robot
        subscribers:
          - type: amq
            exchange: telemetry
            binding: "robot.r1.#"
"#;

    #[test]
    fn test_parse_yaml() {
        let config = MotionTrackerConfig::from_yaml_str(SAMPLE).expect("parse");
        assert_eq!(config.version, "2.1");
        assert_eq!(config.interval(), Duration::from_millis(50));
        assert_eq!(config.stats_interval(), Some(Duration::from_secs(10)));

        let robot = &config.robots[0];
        assert_eq!(robot.id, "r1");
        assert_eq!(robot.geometry_source, GeometrySource::Message);
        assert_eq!(robot.initial_position.shoulder, Point2::new(0.0, 0.3));
        assert_eq!(robot.pose_exchanges, vec!["rmt_robot", "visual"]);
        assert_eq!(robot.geometry().elbow_to_gripper, 0.5);
    }

    #[test]
    fn test_missing_protocol() {
        let yaml = SAMPLE.replace("      protocol:", "      unused:");
        let err = MotionTrackerConfig::from_yaml_str(&yaml).unwrap_err();
        assert!(matches!(err, ConfigError::MissingProtocol { ref robot } if robot == "r1"));
    }

    #[test]
    fn test_unsupported_protocol_type() {
        let yaml = SAMPLE.replacen("type: amq", "type: mqtt", 1);
        let err = MotionTrackerConfig::from_yaml_str(&yaml).unwrap_err();
        assert!(matches!(err, ConfigError::UnsupportedProtocol { ref kind, .. } if kind == "mqtt"));
    }

    #[test]
    fn test_unknown_handler() {
        let yaml = SAMPLE.replace(
            "binding: \"robot.r1.#\"",
            "binding: \"robot.r1.#\"\n            handler: joint_torques",
        );
        let err = MotionTrackerConfig::from_yaml_str(&yaml).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownHandler { ref handler, .. } if handler == "joint_torques"));
    }

    #[test]
    fn test_invalid_interval() {
        let yaml = SAMPLE.replace("interval: 0.05", "interval: 0");
        assert!(matches!(
            MotionTrackerConfig::from_yaml_str(&yaml),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_store_source_requires_store() {
        let yaml = SAMPLE.replace("    - id: r1", "    - id: r1\n      geometry_source: store");
        assert!(matches!(
            MotionTrackerConfig::from_yaml_str(&yaml),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_duplicate_robot_ids() {
        let mut config = MotionTrackerConfig::example();
        config.robots[1].id = "r1".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_file() {
        let err = MotionTrackerConfig::from_file("/nonexistent/motion.yaml").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn test_example_round_trips_through_yaml() {
        let yaml = MotionTrackerConfig::example().to_yaml().expect("serialize");
        let config = MotionTrackerConfig::from_yaml_str(&yaml).expect("parse");
        assert_eq!(config.robots.len(), 2);
        assert_eq!(config.state_store.unwrap().backend, StoreBackend::Sqlite);
    }

    #[test]
    fn test_robot_filter() {
        assert!(RobotFilter::all().matches("r1"));
        assert!(RobotFilter::new("r1").matches("r1"));
        assert!(!RobotFilter::new("r1").matches("r2"));
        assert!(RobotFilter::new("arm-?").matches("arm-7"));
        assert!(!RobotFilter::new("arm-?").matches("arm-12"));
        assert!(RobotFilter::new("cell3/*").matches("cell3/left"));
    }

    #[test]
    fn test_select_preserves_order_and_rejects_empty() {
        let config = MotionTrackerConfig::example();
        let ids: Vec<_> = config
            .select(&RobotFilter::all())
            .expect("select")
            .iter()
            .map(|r| r.id.as_str())
            .collect();
        assert_eq!(ids, vec!["r1", "r2"]);

        assert!(matches!(
            config.select(&RobotFilter::new("r9")),
            Err(ConfigError::NoMatchingRobots { .. })
        ));
    }
}
