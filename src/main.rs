use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};

use topic_relay::broker::{Broker, InMemoryBroker};
use topic_relay::consumer::{handler, ConsumerConfig, ConsumptionLoop, OffsetPolicy};
use topic_relay::producer::{Publisher, PublisherConfig, TopicProvisioner};
use topic_relay::{BrokerConnectionConfig, HandlerError, Result};

const STATIONS_TOPIC: &str = "org.chicago.cta.stations";

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    if let Err(e) = run().await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn connect(config: &BrokerConnectionConfig) -> Result<Arc<dyn Broker>> {
    #[cfg(feature = "kafka")]
    if std::env::var("BROKER_BACKEND").as_deref() == Ok("kafka") {
        return Ok(Arc::new(topic_relay::broker::kafka::KafkaBroker::new(config.clone())));
    }

    info!("using in-memory broker");
    Ok(Arc::new(InMemoryBroker::with_config(config)))
}

async fn run() -> Result<()> {
    let config = BrokerConnectionConfig::from_env()?;
    let broker = connect(&config)?;
    let provisioner = TopicProvisioner::new(broker.admin()?);

    // Two publishers on one topic share a single provisioning round trip
    let stations = PublisherConfig::new(STATIONS_TOPIC).with_serialization(config.serialization);
    let first = Publisher::new(broker.as_ref(), &provisioner, stations.clone()).await?;
    let second = Publisher::new(broker.as_ref(), &provisioner, stations).await?;

    first.publish(&json!(40380), &json!({ "station_name": "Clark/Lake", "line": "blue" }))?;
    second.publish(&json!(40260), &json!({ "station_name": "State/Lake", "line": "red" }))?;
    first.publish(&json!(0), &json!("not a station"))?;
    first.close().await?;
    second.close().await?;

    let consumer_config = ConsumerConfig::from_connection(STATIONS_TOPIC, &config)
        .with_offset_policy(OffsetPolicy::Earliest);
    let mut consumer = ConsumptionLoop::connect(
        broker.as_ref(),
        consumer_config,
        handler(|msg| async move {
            let station: serde_json::Value = msg.json()?;
            let name = station
                .get("station_name")
                .and_then(|v| v.as_str())
                .ok_or("station record without a name")?;
            info!(station = name, offset = msg.offset, "station update");
            Ok::<(), HandlerError>(())
        }),
    )
    .await?;

    let close = consumer.close_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_err() {
            warn!("cannot listen for ctrl-c");
        }
        close.close();
    });

    info!("consuming, press ctrl-c to stop");
    consumer.run().await
}
