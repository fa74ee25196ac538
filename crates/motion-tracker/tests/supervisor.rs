// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Supervisor integration tests
//!
//! Drives full reload cycles against the in-process broker with
//! configuration files on disk.

use async_trait::async_trait;
use motion_tracker::config::ConfigError;
use motion_tracker::{
    BusError, FileConfigSource, LocalBroker, MemoryStateStore, MessageBus, Point2, PoseMessage,
    RobotFilter, StateStore, Subscription, Supervisor, TrackerError,
};
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tempfile::NamedTempFile;

const TIMEOUT: Duration = Duration::from_secs(5);

fn robot_yaml(id: &str) -> String {
    format!(
        r#"    - id: {id}
      arm: {{ length_shoulder_to_elbow: 1.0, length_elbow_to_gripper: 1.0 }}
      initial_position: {{ base: [0.0, 0.0], shoulder: [0.0, 0.0] }}
      protocol:
        publishers:
          - {{ type: amq, exchange: rmt_robot, routing_key: "robot.{id}.pose" }}
          - {{ type: amq, exchange: visual, routing_key: "robot.{id}.pose" }}
        subscribers:
          - {{ type: amq, exchange: telemetry, binding: "robot.{id}.#" }}
"#
    )
}

fn config_yaml(ids: &[&str]) -> String {
    let mut yaml = String::from(
        "motion_tracker:\n  attributes:\n    interval: 0.01\n    stats_interval: 0\n  robots:\n",
    );
    for id in ids {
        yaml.push_str(&robot_yaml(id));
    }
    yaml
}

fn config_file(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("temp file");
    file.write_all(content.as_bytes()).expect("write config");
    file.flush().expect("flush config");
    file
}

async fn broker_with_exchanges(names: &[&str]) -> LocalBroker {
    let broker = LocalBroker::new();
    for name in names {
        broker.declare_exchange(name).await.expect("declare");
    }
    broker
}

fn telemetry(id: &str, theta1: f64, theta2: f64) -> Vec<u8> {
    serde_json::to_vec(&serde_json::json!({
        "id": id, "theta1": theta1, "theta2": theta2, "base": [0.0, 0.0], "shoulder": [0.0, 0.0]
    }))
    .expect("encode telemetry")
}

async fn send_telemetry(broker: &LocalBroker, exchange: &str, id: &str, payload: Vec<u8>) {
    broker
        .publish(exchange, &format!("robot.{}.telemetry", id), payload)
        .await
        .expect("publish telemetry");
}

async fn next_pose(subscription: &mut Subscription) -> (String, PoseMessage) {
    let delivery = tokio::time::timeout(TIMEOUT, subscription.recv())
        .await
        .expect("timed out waiting for a pose")
        .expect("subscription closed");
    let pose = serde_json::from_slice(&delivery.payload).expect("pose payload");
    (delivery.routing_key, pose)
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(TIMEOUT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

#[tokio::test]
async fn test_scenario_pose_published_to_every_pose_exchange() {
    let file = config_file(&config_yaml(&["r1"]));
    let broker = broker_with_exchanges(&["telemetry", "rmt_robot", "visual"]).await;
    let mut rmt = broker.bind("rmt_robot", "robot.*.pose").await.unwrap();
    let mut visual = broker.bind("visual", "#").await.unwrap();

    let supervisor = Supervisor::new(
        Box::new(FileConfigSource::new(file.path())),
        Arc::new(broker.clone()),
        RobotFilter::new("r1"),
    );
    let handle = supervisor.handle();
    let task = tokio::spawn(supervisor.run());

    wait_until(|| broker.binding_count("telemetry") == 1).await;
    send_telemetry(&broker, "telemetry", "r1", telemetry("r1", 0.0, 0.0)).await;

    for subscription in [&mut rmt, &mut visual] {
        let (routing_key, pose) = next_pose(subscription).await;
        assert_eq!(routing_key, "robot.r1.pose");
        assert_eq!(pose.id, "r1");
        assert_eq!(pose.base, Point2::ORIGIN);
        assert_eq!(pose.shoulder, Point2::ORIGIN);
        assert_eq!(pose.elbow, Point2::new(1.0, 0.0));
        assert_eq!(pose.wrist, Point2::new(2.0, 0.0));
        assert!(pose.timestamp > 0);
    }

    handle.shutdown().unwrap();
    task.await.unwrap().expect("clean shutdown");
    assert_eq!(broker.binding_count("telemetry"), 0);
}

#[tokio::test]
async fn test_malformed_telemetry_is_not_fatal() {
    let file = config_file(&config_yaml(&["r1"]));
    let broker = broker_with_exchanges(&["telemetry", "visual"]).await;
    let mut visual = broker.bind("visual", "#").await.unwrap();

    let supervisor = Supervisor::new(
        Box::new(FileConfigSource::new(file.path())),
        Arc::new(broker.clone()),
        RobotFilter::all(),
    );
    let handle = supervisor.handle();
    let task = tokio::spawn(supervisor.run());

    wait_until(|| broker.binding_count("telemetry") == 1).await;
    send_telemetry(&broker, "telemetry", "r1", b"not json".to_vec()).await;
    send_telemetry(&broker, "telemetry", "r1", br#"{"id":"r1","theta1":1.0}"#.to_vec()).await;
    send_telemetry(&broker, "telemetry", "r1", telemetry("r9", 0.0, 0.0)).await;
    send_telemetry(&broker, "telemetry", "r1", telemetry("r1", 0.0, 0.0)).await;

    let (_, pose) = next_pose(&mut visual).await;
    assert_eq!(pose.wrist, Point2::new(2.0, 0.0));

    let stats = handle.stats().await.unwrap();
    assert_eq!(stats[0].messages_dropped, 3);
    assert_eq!(stats[0].updates_applied, 1);

    handle.shutdown().unwrap();
    task.await.unwrap().expect("clean shutdown");
}

#[tokio::test]
async fn test_reload_replaces_removed_and_added_robots() {
    let file = config_file(&config_yaml(&["r1", "r2"]));
    let broker = broker_with_exchanges(&["telemetry", "visual"]).await;
    let mut visual = broker.bind("visual", "#").await.unwrap();

    let supervisor = Supervisor::new(
        Box::new(FileConfigSource::new(file.path())),
        Arc::new(broker.clone()),
        RobotFilter::all(),
    );
    let handle = supervisor.handle();
    let task = tokio::spawn(supervisor.run());

    wait_until(|| broker.binding_count("telemetry") == 2).await;
    send_telemetry(&broker, "telemetry", "r2", telemetry("r2", 0.0, 0.0)).await;
    let (_, pose) = next_pose(&mut visual).await;
    assert_eq!(pose.id, "r2");

    std::fs::write(file.path(), config_yaml(&["r1", "r3"])).unwrap();
    handle.reload().unwrap();

    tokio::time::timeout(TIMEOUT, async {
        loop {
            let ids: Vec<String> = handle
                .stats()
                .await
                .unwrap()
                .into_iter()
                .map(|s| s.robot_id)
                .collect();
            if ids == ["r1", "r3"] {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("reload not observed");
    assert_eq!(broker.binding_count("telemetry"), 2);

    while visual.try_recv().is_some() {}
    send_telemetry(&broker, "telemetry", "r2", telemetry("r2", 0.0, 0.0)).await;
    send_telemetry(&broker, "telemetry", "r3", telemetry("r3", 0.0, 0.0)).await;

    let (_, pose) = next_pose(&mut visual).await;
    assert_eq!(pose.id, "r3");

    tokio::time::sleep(Duration::from_millis(100)).await;
    while let Some(delivery) = visual.try_recv() {
        let pose: PoseMessage = serde_json::from_slice(&delivery.payload).unwrap();
        assert_ne!(pose.id, "r2", "removed robot still publishing");
    }

    handle.shutdown().unwrap();
    task.await.unwrap().expect("clean shutdown");
}

#[tokio::test]
async fn test_robot_filter_selects_subset() {
    let file = config_file(&config_yaml(&["r1", "cell-a", "r2"]));
    let broker = broker_with_exchanges(&[]).await;

    let supervisor = Supervisor::new(
        Box::new(FileConfigSource::new(file.path())),
        Arc::new(broker.clone()),
        RobotFilter::new("r?"),
    );
    let handle = supervisor.handle();
    let task = tokio::spawn(supervisor.run());

    let ids: Vec<String> = handle
        .stats()
        .await
        .unwrap()
        .into_iter()
        .map(|s| s.robot_id)
        .collect();
    assert_eq!(ids, ["r1", "r2"]);

    handle.shutdown().unwrap();
    task.await.unwrap().expect("clean shutdown");
}

#[tokio::test]
async fn test_missing_protocol_is_fatal() {
    let yaml = config_yaml(&["r1"]).replace("      protocol:", "      ignored:");
    let file = config_file(&yaml);

    let supervisor = Supervisor::new(
        Box::new(FileConfigSource::new(file.path())),
        Arc::new(LocalBroker::new()),
        RobotFilter::all(),
    );

    let err = supervisor.run().await.unwrap_err();
    assert!(matches!(
        err,
        TrackerError::Config(ConfigError::MissingProtocol { ref robot }) if robot == "r1"
    ));
}

#[tokio::test]
async fn test_missing_config_file_is_fatal() {
    let supervisor = Supervisor::new(
        Box::new(FileConfigSource::new("/nonexistent/motion-tracker.yaml")),
        Arc::new(LocalBroker::new()),
        RobotFilter::all(),
    );

    assert!(matches!(
        supervisor.run().await,
        Err(TrackerError::Config(ConfigError::Io { .. }))
    ));
}

/// Bus whose `visual` exchange cannot be declared.
struct FailingBus {
    inner: LocalBroker,
}

#[async_trait]
impl MessageBus for FailingBus {
    async fn declare_exchange(&self, exchange: &str) -> Result<(), BusError> {
        if exchange == "visual" {
            return Err(BusError::Broker("connection refused".into()));
        }
        self.inner.declare_exchange(exchange).await
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: Vec<u8>,
    ) -> Result<(), BusError> {
        self.inner.publish(exchange, routing_key, payload).await
    }

    async fn bind(&self, exchange: &str, binding_key: &str) -> Result<Subscription, BusError> {
        self.inner.bind(exchange, binding_key).await
    }
}

#[tokio::test]
async fn test_connection_failure_is_fatal() {
    let file = config_file(&config_yaml(&["r1", "r2"]));
    let broker = LocalBroker::new();

    let supervisor = Supervisor::new(
        Box::new(FileConfigSource::new(file.path())),
        Arc::new(FailingBus {
            inner: broker.clone(),
        }),
        RobotFilter::all(),
    );

    let err = supervisor.run().await.unwrap_err();
    assert!(matches!(err, TrackerError::Connection { ref robot, .. } if robot == "r1"));
    assert_eq!(broker.binding_count("telemetry"), 0);
}

#[tokio::test]
async fn test_snapshot_handoff_between_supervisors() {
    let producer = config_file(
        r#"
motion_tracker:
  attributes: { interval: 0.01, stats_interval: 0 }
  state_store: { backend: memory }
  robots:
    - id: r1
      persist_snapshots: true
      arm: { length_shoulder_to_elbow: 1.0, length_elbow_to_gripper: 1.0 }
      pose_exchanges: [visual]
      protocol:
        publishers: [{ type: amq, exchange: visual, routing_key: producer }]
        subscribers: [{ type: amq, exchange: telemetry, binding: "robot.r1.#" }]
"#,
    );
    let consumer = config_file(
        r##"
motion_tracker:
  attributes: { interval: 0.01, stats_interval: 0 }
  state_store: { backend: memory }
  robots:
    - id: r1
      geometry_source: store
      arm: { length_shoulder_to_elbow: 9.0, length_elbow_to_gripper: 9.0 }
      pose_exchanges: [visual]
      protocol:
        publishers: [{ type: amq, exchange: visual, routing_key: consumer }]
        subscribers: [{ type: amq, exchange: angles, binding: "#" }]
"##,
    );

    let broker = broker_with_exchanges(&["telemetry", "angles", "visual"]).await;
    let mut visual = broker.bind("visual", "#").await.unwrap();
    let store: Arc<dyn StateStore> = Arc::new(MemoryStateStore::new());

    let mut handles = Vec::new();
    let mut tasks = Vec::new();
    for file in [&producer, &consumer] {
        let supervisor = Supervisor::new(
            Box::new(FileConfigSource::new(file.path())),
            Arc::new(broker.clone()),
            RobotFilter::all(),
        )
        .with_state_store(Arc::clone(&store));
        handles.push(supervisor.handle());
        tasks.push(tokio::spawn(supervisor.run()));
    }
    wait_until(|| broker.binding_count("telemetry") == 1 && broker.binding_count("angles") == 1)
        .await;

    // Angles before any snapshot exists are consumed without a pose.
    broker
        .publish("angles", "r1", br#"{"id":"r1","theta1":0,"theta2":0}"#.to_vec())
        .await
        .unwrap();
    tokio::time::timeout(TIMEOUT, async {
        while handles[1].stats().await.unwrap()[0].updates_skipped == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("angles without snapshot not consumed");
    assert_eq!(broker.published_count(), 1);

    send_telemetry(
        &broker,
        "telemetry",
        "r1",
        serde_json::to_vec(&serde_json::json!({
            "id": "r1", "theta1": 0.0, "theta2": 0.0, "base": [5.0, 0.0], "shoulder": [5.0, 1.0]
        }))
        .unwrap(),
    )
    .await;

    let (routing_key, _) = next_pose(&mut visual).await;
    assert_eq!(routing_key, "producer");

    broker
        .publish("angles", "r1", br#"{"id":"r1","theta1":0,"theta2":0}"#.to_vec())
        .await
        .unwrap();
    let (routing_key, pose) = next_pose(&mut visual).await;
    assert_eq!(routing_key, "consumer");
    assert_eq!(pose.base, Point2::new(5.0, 0.0));
    assert_eq!(pose.shoulder, Point2::new(5.0, 1.0));
    assert_eq!(pose.elbow, Point2::new(6.0, 1.0));
    assert_eq!(pose.wrist, Point2::new(7.0, 1.0));

    for handle in &handles {
        handle.shutdown().unwrap();
    }
    for task in tasks {
        task.await.unwrap().expect("clean shutdown");
    }
}
