use mongo_topology::{ClientOptions, ReadPreference, ServerProbe, TopologyWatcher};
use serde_json::json;
use tracing::subscriber::set_global_default;
use tracing_bunyan_formatter::{BunyanFormattingLayer, JsonStorageLayer};
use tracing_log::LogTracer;
use tracing_subscriber::{layer::SubscriberExt, EnvFilter, Registry};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    setup_tracing();
    let connection_string = std::env::var("MONGO_URI").unwrap_or_else(|_| {
        "mongodb://a.example.com:27017,b.example.com:27017/?readPreference=secondaryPreferred\
         &readPreferenceTags=region:east&readPreferenceTags=&heartbeatFrequencyMS=10000"
            .to_string()
    });

    let options = ClientOptions::parse(&connection_string)?;
    let watcher = TopologyWatcher::new(options);

    // Stand-in for the monitoring subsystem: one round of probe results.
    let now = mongo_topology::Timestamp::now().as_millis();
    let probes = [
        json!({
            "address": "a.example.com:27017",
            "type": "RSPrimary",
            "maxWireVersion": 17,
            "roundTripTimeMs": 4,
            "lastWrite": { "lastWriteDate": now - 200 },
            "lastUpdateTime": now,
            "setName": "rs0",
            "tags": { "region": "west" },
            "logicalSessionTimeoutMinutes": 30
        }),
        json!({
            "address": "b.example.com:27017",
            "type": "RSSecondary",
            "maxWireVersion": 17,
            "roundTripTimeMs": 9,
            "lastWrite": { "lastWriteDate": now - 1_500 },
            "lastUpdateTime": now,
            "setName": "rs0",
            "tags": { "region": "east" },
            "logicalSessionTimeoutMinutes": 30
        }),
    ]
    .iter()
    .map(|probe| ServerProbe::from_json(&probe.to_string()))
    .collect::<anyhow::Result<Vec<_>>>()?;

    watcher.publish("ReplicaSetWithPrimary", probes).await?;

    let topology = watcher.topology();
    println!(
        "{} topology, set `{}`, sessions supported: {}",
        topology.topology_type(),
        topology.set_name().unwrap_or("-"),
        topology.supports_sessions()
    );

    match watcher.select_server(None).await {
        Ok(server) => println!("Read goes to {} ({})", server.address(), server.server_type()),
        Err(e) => {
            tracing::error!("Error happened: {}", &e);
            return Err(e.into());
        }
    }

    let writable = watcher.select_writable_server().await?;
    println!("Writes go to {}", writable.address());

    let strict = ReadPreference::secondary().with_max_staleness_seconds(90);
    let server = watcher.select_server(Some(&strict)).await?;
    println!("Bounded-staleness read goes to {}", server.address());

    Ok(())
}

fn setup_tracing() {
    // Redirect all `log`'s events to the subscriber
    LogTracer::init().expect("Failed to set logger");
    // Set up tracing
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let formatting_layer =
        BunyanFormattingLayer::new("mongo-topology-demo".into(), std::io::stdout);
    let subscriber = Registry::default()
        .with(env_filter)
        .with(JsonStorageLayer)
        .with(formatting_layer);
    set_global_default(subscriber).expect("Failed to set subscriber");
}
