mod common;

use common::MockHttpServer;
use futures::future::join_all;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio_test::{assert_err, assert_ok};
use topic_relay::broker::{Broker, InMemoryBroker};
use topic_relay::config::SerializationMode;
use topic_relay::consumer::{ConsumerConfig, ConsumptionLoop, OffsetPolicy};
use topic_relay::error::Error;
use topic_relay::producer::{
    ProvisionOutcome, ProvisionRegistry, ProvisioningRecord, Publisher, PublisherConfig,
    TopicProvisioner,
};
use topic_relay::schema::{
    value_subject, HttpSchemaRegistry, RecordSchema, SchemaRegistry, StaticSchemaRegistry,
};
use topic_relay::types::NewTopic;
use uuid::Uuid;

const STATIONS: &str = "org.chicago.cta.stations";

const STATION_SCHEMA: &str = r#"{
    "type": "record",
    "name": "station",
    "namespace": "com.udacity",
    "fields": [
        {"name": "station_id", "type": "int"},
        {"name": "station_name", "type": "string"},
        {"name": "line", "type": ["null", "string"], "default": null}
    ]
}"#;

fn provisioner(broker: &InMemoryBroker) -> TopicProvisioner {
    TopicProvisioner::isolated(broker.admin().unwrap())
}

#[tokio::test]
async fn test_concurrent_ensure_creates_once() {
    let broker = InMemoryBroker::new();
    // Widen the window so every caller is in flight at once
    broker.set_admin_latency(Duration::from_millis(50));
    let provisioner = provisioner(&broker);

    let outcomes = join_all((0..10).map(|_| provisioner.ensure(STATIONS, 3, 1))).await;

    let outcomes: Vec<ProvisionOutcome> = outcomes.into_iter().map(|o| o.unwrap()).collect();
    let created = outcomes
        .iter()
        .filter(|o| **o == ProvisionOutcome::Created)
        .count();
    assert_eq!(created, 1);
    assert_eq!(broker.create_topic_calls(), 1);
    assert_eq!(broker.metadata_calls(), 1);
    assert_eq!(broker.partition_count(STATIONS), Some(3));
}

#[tokio::test]
async fn test_ensure_skips_broker_once_provisioned() {
    let broker = InMemoryBroker::new();
    let provisioner = provisioner(&broker);

    assert_eq!(
        assert_ok!(provisioner.ensure(STATIONS, 1, 1).await),
        ProvisionOutcome::Created
    );
    assert_eq!(
        assert_ok!(provisioner.ensure(STATIONS, 1, 1).await),
        ProvisionOutcome::AlreadyProvisioned
    );

    assert_eq!(broker.metadata_calls(), 1);
    assert_eq!(broker.create_topic_calls(), 1);
    assert_eq!(
        provisioner.registry().get(STATIONS),
        Some(ProvisioningRecord {
            topic: STATIONS.to_string(),
            partitions: 1,
            replication_factor: 1,
        })
    );
}

#[tokio::test]
async fn test_existing_topic_is_recorded_without_create() {
    let broker = InMemoryBroker::new();
    broker.create_topic(NewTopic::new(STATIONS, 1, 1).unwrap());
    let provisioner = provisioner(&broker);

    let outcome = assert_ok!(provisioner.ensure(STATIONS, 1, 1).await);

    assert_eq!(outcome, ProvisionOutcome::Existing);
    assert_eq!(broker.create_topic_calls(), 0);
    assert!(provisioner.registry().is_provisioned(STATIONS));
}

#[tokio::test]
async fn test_rejected_creation_can_be_retried() {
    let broker = InMemoryBroker::new();
    broker.reject_topic_creation(STATIONS, "policy violation");
    let provisioner = provisioner(&broker);

    let err = assert_err!(provisioner.ensure(STATIONS, 1, 1).await);
    match err {
        Error::TopicCreationError { topic, reason } => {
            assert_eq!(topic, STATIONS);
            assert!(reason.contains("policy violation"));
        }
        other => panic!("unexpected error: {}", other),
    }
    assert!(!provisioner.registry().is_provisioned(STATIONS));

    // Nothing was recorded, so the next attempt goes to the broker again
    let outcome = assert_ok!(provisioner.ensure(STATIONS, 1, 1).await);
    assert_eq!(outcome, ProvisionOutcome::Created);
    assert_eq!(broker.create_topic_calls(), 2);
}

#[tokio::test]
async fn test_unreachable_broker_records_nothing() {
    let broker = InMemoryBroker::new();
    broker.set_available(false);
    let provisioner = provisioner(&broker);

    let err = assert_err!(provisioner.ensure(STATIONS, 1, 1).await);

    assert!(err.is_transport());
    assert!(provisioner.registry().provisioned_topics().is_empty());
}

#[tokio::test]
async fn test_invalid_layout_is_rejected() {
    let broker = InMemoryBroker::new();
    let provisioner = provisioner(&broker);

    let err = assert_err!(provisioner.ensure(STATIONS, 0, 1).await);
    assert!(matches!(err, Error::ValidationError(_)));
    assert_eq!(broker.metadata_calls(), 0);
}

#[tokio::test]
async fn test_publishers_share_provisioning() {
    let broker = InMemoryBroker::new();
    let registry = Arc::new(ProvisionRegistry::new());
    let provisioner = TopicProvisioner::with_registry(broker.admin().unwrap(), registry.clone());

    let config = PublisherConfig::new(STATIONS);
    let first = assert_ok!(Publisher::new(&broker, &provisioner, config.clone()).await);
    let second = assert_ok!(Publisher::new(&broker, &provisioner, config).await);
    assert_eq!(broker.create_topic_calls(), 1);

    assert_ok!(first.publish(&json!(40380), &json!({"station_name": "Clark/Lake"})));
    assert_ok!(second.publish(&json!(40260), &json!({"station_name": "State/Lake"})));

    let first_report = assert_ok!(first.close().await);
    let second_report = assert_ok!(second.close().await);
    assert_eq!(first_report.delivered + second_report.delivered, 2);

    let records = broker.records(STATIONS, 0);
    assert_eq!(records.len(), 2);
    let names: Vec<String> = records
        .iter()
        .map(|m| m.json::<serde_json::Value>().unwrap()["station_name"].to_string())
        .collect();
    assert!(names.contains(&"\"Clark/Lake\"".to_string()));
    assert!(names.contains(&"\"State/Lake\"".to_string()));
    assert_eq!(registry.provisioned_topics(), vec![STATIONS.to_string()]);
}

#[tokio::test]
async fn test_provisioners_share_the_process_registry() {
    let broker = InMemoryBroker::new();
    // Unique name, the process-wide registry outlives this test
    let topic = format!("{}.{}", STATIONS, Uuid::new_v4());

    let first = TopicProvisioner::new(broker.admin().unwrap());
    let second = TopicProvisioner::new(broker.admin().unwrap());

    assert_eq!(
        assert_ok!(first.ensure(&topic, 1, 1).await),
        ProvisionOutcome::Created
    );
    assert_eq!(
        assert_ok!(second.ensure(&topic, 1, 1).await),
        ProvisionOutcome::AlreadyProvisioned
    );
    assert_eq!(broker.create_topic_calls(), 1);
    assert_eq!(broker.metadata_calls(), 1);
    assert!(Arc::ptr_eq(first.registry(), second.registry()));
    assert!(ProvisionRegistry::global().is_provisioned(&topic));
}

#[tokio::test]
async fn test_close_reports_undelivered_records() {
    let broker = InMemoryBroker::new();
    let provisioner = provisioner(&broker);
    let config = PublisherConfig::new(STATIONS).with_flush_timeout(Duration::from_millis(50));
    let publisher = assert_ok!(Publisher::new(&broker, &provisioner, config).await);

    broker.set_available(false);
    assert_ok!(publisher.publish(&json!(1), &json!({"station_name": "Lost"})));
    assert_eq!(publisher.in_flight(), 1);

    let err = assert_err!(publisher.close().await);
    assert!(matches!(err, Error::FlushError { remaining: 1, failed: 0 }));
}

#[tokio::test]
async fn test_schema_mode_validates_values() {
    let broker = InMemoryBroker::new();
    let provisioner = provisioner(&broker);
    let config = PublisherConfig::new(STATIONS)
        .with_serialization(SerializationMode::Schema)
        .with_value_schema(STATION_SCHEMA);
    let publisher = assert_ok!(Publisher::new(&broker, &provisioner, config).await);

    assert_ok!(publisher.publish(
        &json!(Publisher::time_millis()),
        &json!({"station_id": 40380, "station_name": "Clark/Lake", "line": "blue"})
    ));
    let err = assert_err!(publisher.publish(&json!(1), &json!({"station_name": "No id"})));
    assert!(matches!(err, Error::EncodingError(_)));

    let registry: Arc<dyn SchemaRegistry> = Arc::new(StaticSchemaRegistry::new());
    assert_ok!(publisher.register_schemas(&registry).await);
    let resolved = assert_ok!(registry.resolve(&value_subject(STATIONS)).await);
    assert_eq!(resolved.map(|s| s.full_name()), Some("com.udacity.station".to_string()));

    let report = assert_ok!(publisher.close().await);
    assert_eq!(report.delivered, 1);
}

#[tokio::test]
async fn test_malformed_schema_fails_construction() {
    let broker = InMemoryBroker::new();
    let provisioner = provisioner(&broker);
    let config = PublisherConfig::new(STATIONS).with_value_schema("{not a schema");

    assert_err!(Publisher::new(&broker, &provisioner, config).await);
    assert_eq!(broker.metadata_calls(), 0);
}

#[tokio::test]
async fn test_published_records_reach_consumer() {
    let broker = InMemoryBroker::new();
    let provisioner = provisioner(&broker);
    let publisher = assert_ok!(
        Publisher::new(&broker, &provisioner, PublisherConfig::new(STATIONS).with_layout(2, 1)).await
    );
    for id in 0..4 {
        assert_ok!(publisher.publish_json(&id, &json!({"station_id": id})));
    }
    assert_ok!(publisher.close().await);

    let (h, seen) = common::recording_handler(&[], &[]);
    let config = ConsumerConfig::new(STATIONS)
        .with_offset_policy(OffsetPolicy::Earliest)
        .with_poll_timeout_ms(10);
    let mut consumer = assert_ok!(ConsumptionLoop::connect(&broker, config, h).await);
    let report = assert_ok!(consumer.drain_round().await);

    assert_eq!(report.handled, 4);
    assert_eq!(seen.lock().unwrap().len(), 4);
    assert_ok!(consumer.close().await);
}

#[tokio::test]
async fn test_schemas_register_with_registry_service() {
    let server = MockHttpServer::start_with_bodies(vec![(200, r#"{"id": 7}"#.to_string())]).await;
    let broker = InMemoryBroker::new();
    let provisioner = provisioner(&broker);
    let config = PublisherConfig::new(STATIONS)
        .with_serialization(SerializationMode::Schema)
        .with_value_schema(STATION_SCHEMA);
    let publisher = assert_ok!(Publisher::new(&broker, &provisioner, config).await);

    let registry: Arc<dyn SchemaRegistry> = Arc::new(HttpSchemaRegistry::new(&server.base_url));
    assert_ok!(publisher.register_schemas(&registry).await);

    let requests = server.requests.lock().unwrap().clone();
    assert_eq!(requests.len(), 1);
    assert_eq!(
        requests[0].line,
        format!("POST /subjects/{}-value/versions", STATIONS)
    );
    assert_eq!(
        requests[0].content_type.as_deref(),
        Some(HttpSchemaRegistry::CONTENT_TYPE)
    );

    // The schema travels as a JSON string inside the request body
    let body: serde_json::Value = serde_json::from_str(&requests[0].body).unwrap();
    let sent = assert_ok!(RecordSchema::parse(body["schema"].as_str().unwrap()));
    assert_eq!(sent.full_name(), "com.udacity.station");
    assert_ok!(publisher.close().await);
}

#[tokio::test]
async fn test_registry_service_rejection_is_an_error() {
    let server = MockHttpServer::start(vec![409]).await;
    let registry = HttpSchemaRegistry::new(format!("{}/", server.base_url));
    let schema = assert_ok!(RecordSchema::parse(STATION_SCHEMA));

    let err = assert_err!(registry.register(&value_subject(STATIONS), &schema).await);

    assert!(matches!(err, Error::HttpError { status: 409, .. }));
    assert_eq!(
        server.lines(),
        vec![format!("POST /subjects/{}-value/versions", STATIONS)]
    );
}
