use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use lib_telemetry::core::{ConnectionManager, ConnectionState, ReadingDispatcher};
use lib_telemetry::ingestors::{IngestionConfig, IngestionCoordinator};
use lib_telemetry::sensors::{SensorKind, SeverityTier};
use project_tests::{eventually, manager_with, wait_for_state, FakeTransport, RecordingSink};

struct Pipeline {
    transport: Arc<FakeTransport>,
    manager: ConnectionManager,
    sink: Arc<RecordingSink>,
    dispatcher: Arc<ReadingDispatcher>,
    coordinator: Arc<IngestionCoordinator>,
}

async fn connected_pipeline() -> Pipeline {
    let transport = FakeTransport::new();
    let manager = manager_with(Arc::clone(&transport), 5);
    let sink = RecordingSink::new();
    let dispatcher = Arc::new(ReadingDispatcher::new());
    let coordinator = IngestionCoordinator::start(IngestionConfig::default(), sink.clone(), Arc::clone(&dispatcher));

    let handles = coordinator.attach(&manager).await.unwrap();
    assert_eq!(handles.len(), 4);

    manager.connect().await.unwrap();
    wait_for_state(&manager, ConnectionState::Connected).await;

    Pipeline {
        transport,
        manager,
        sink,
        dispatcher,
        coordinator,
    }
}

#[tokio::test(start_paused = true)]
async fn attach_subscribes_all_sensor_topics_at_least_once() {
    let p = connected_pipeline().await;

    let mut topics: Vec<String> = p.transport.subscribe_calls().into_iter().map(|(t, _)| t).collect();
    topics.sort();
    assert_eq!(
        topics,
        vec![
            "waterqualitymonitoring/Levelsensor",
            "waterqualitymonitoring/TDSsensor",
            "waterqualitymonitoring/pHsensor",
            "waterqualitymonitoring/phosphatesensor",
        ]
    );
    assert!(p
        .transport
        .subscribe_calls()
        .iter()
        .all(|(_, qos)| *qos == lib_telemetry::core::Qos::AtLeastOnce));
}

#[tokio::test(start_paused = true)]
async fn ph_frame_is_classified_persisted_and_broadcast() {
    let p = connected_pipeline().await;
    let mut observer = p.dispatcher.add_observer("dashboard");

    assert!(p.transport.inject_frame(
        "waterqualitymonitoring/pHsensor",
        r#"{"value":7.42,"timestamp":"2024-01-01T00:00:00Z"}"#,
    ));

    let seen = tokio::time::timeout(Duration::from_secs(5), observer.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(seen.reading.kind(), SensorKind::Ph);
    assert_eq!(seen.reading.value(), 7.42);
    assert_eq!(seen.classification.label(), "Slightly Alkaline");
    assert_eq!(
        seen.reading.timestamp(),
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    );

    assert!(eventually(|| p.sink.records().len() == 1).await);
    let record = &p.sink.records()[0];
    assert_eq!(record.sensor_type, "pHsensor");
    assert_eq!(record.value, 7.42);
    assert_eq!(record.topic, "waterqualitymonitoring/pHsensor");
    assert_eq!(record.raw_message["value"], 7.42);

    assert_eq!(p.dispatcher.latest().value(SensorKind::Ph), Some(7.42));
    let stats = p.coordinator.stats();
    assert_eq!(stats.frames_received, 1);
    assert_eq!(stats.accepted, 1);
    assert_eq!(stats.persisted, 1);
}

#[tokio::test(start_paused = true)]
async fn tds_upper_edge_is_marginal() {
    let p = connected_pipeline().await;
    let mut observer = p.dispatcher.add_observer("dashboard");

    assert!(p.transport.inject_frame("waterqualitymonitoring/TDSsensor", r#"{"value":900,"timestamp":"2024-01-01T00:00:00Z"}"#));

    let seen = tokio::time::timeout(Duration::from_secs(5), observer.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(seen.classification.label(), "Marginal");
    assert_eq!(seen.classification.band().map(|b| b.severity), Some(SeverityTier::Advisory));
}

#[tokio::test(start_paused = true)]
async fn malformed_frames_are_counted_and_dropped() {
    let p = connected_pipeline().await;
    let mut observer = p.dispatcher.add_observer("dashboard");

    assert!(p.transport.inject_frame("waterqualitymonitoring/pHsensor", "not json"));
    assert!(p.transport.inject_frame("waterqualitymonitoring/pHsensor", r#"{"timestamp":"2024-01-01T00:00:00Z"}"#));
    assert!(p.transport.inject_frame("waterqualitymonitoring/pHsensor", r#"{"value":"7.1"}"#));
    assert!(p.transport.inject_frame("waterqualitymonitoring/pHsensor", r#"{"value":7.1,"timestamp":"yesterday"}"#));

    assert!(eventually(|| p.coordinator.stats().frames_received == 4).await);
    let stats = p.coordinator.stats();
    assert_eq!(stats.rejected.total(), 4);
    assert_eq!(stats.rejected.malformed_encoding, 1);
    assert_eq!(stats.rejected.missing_value_field, 1);
    assert_eq!(stats.rejected.non_numeric_value, 1);
    assert_eq!(stats.rejected.unparseable_timestamp, 1);
    assert_eq!(stats.accepted, 0);

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(p.sink.records().is_empty());
    assert!(observer.try_recv().is_err());
    assert!(p.dispatcher.latest().is_empty());
    assert_eq!(p.manager.state(), ConnectionState::Connected);
}

#[tokio::test(start_paused = true)]
async fn sink_failure_does_not_block_observers() {
    let p = connected_pipeline().await;
    let mut observer = p.dispatcher.add_observer("dashboard");
    p.sink.set_failing(true);

    assert!(p.transport.inject_frame("waterqualitymonitoring/Levelsensor", r#"{"value":42.5,"timestamp":"2024-01-01T00:00:00Z"}"#));

    let seen = tokio::time::timeout(Duration::from_secs(5), observer.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(seen.reading.kind(), SensorKind::Level);

    assert!(eventually(|| p.coordinator.stats().persistence_failures == 1).await);
    let letters = p.coordinator.dead_letters();
    assert_eq!(letters.len(), 1);
    assert_eq!(letters[0].record.sensor_type, "Levelsensor");
    assert!(letters[0].error.contains("database offline"));
    assert!(p.sink.records().is_empty());
}

#[tokio::test(start_paused = true)]
async fn frames_on_unregistered_topics_reach_nobody() {
    let p = connected_pipeline().await;
    let mut observer = p.dispatcher.add_observer("dashboard");

    assert!(p.transport.inject_frame("waterqualitymonitoring/Oxygensensor", r#"{"value":8.0,"timestamp":"2024-01-01T00:00:00Z"}"#));
    assert!(p.transport.inject_frame("waterqualitymonitoring/pHsensor", r#"{"value":6.5,"timestamp":"2024-01-01T00:00:00Z"}"#));

    // The second frame arriving proves the first was consumed without effect.
    let seen = tokio::time::timeout(Duration::from_secs(5), observer.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(seen.reading.kind(), SensorKind::Ph);

    let stats = p.coordinator.stats();
    assert_eq!(stats.frames_received, 1);
    assert_eq!(stats.unknown_topic, 0);
    assert_eq!(p.manager.registry().handler_failures(), 0);
}
