//! ---
//! fab_section: "02-messaging"
//! fab_subsection: "tests"
//! fab_type: "source"
//! fab_scope: "test"
//! fab_description: "Publisher pool feeding file and in-memory transports."
//! fab_version: "v0.1.0"
//! fab_owner: "tbd"
//! ---
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use fabsim_msg::{
    DeliveryObserver, InMemoryTransport, JsonLinesTransport, OutboundBatch, OutboundRecord,
    Publisher, PublisherConfig, TopicScheme,
};

fn tick_batch(scheme: &TopicScheme, machine: &str, seq: u64) -> OutboundBatch {
    let records = ["energy", "production", "environmental"]
        .into_iter()
        .map(|kind| {
            let payload = serde_json::to_vec(&serde_json::json!({
                "machine_id": machine,
                "seq": seq,
            }))
            .unwrap();
            OutboundRecord::new(scheme.topic(machine, kind), kind, payload)
        })
        .collect();
    OutboundBatch::new(machine, records)
}

#[derive(Default)]
struct Counting {
    published: AtomicU64,
}

impl DeliveryObserver for Counting {
    fn published(&self, _machine_id: &str, _kind: &str) {
        self.published.fetch_add(1, Ordering::Relaxed);
    }
}

#[tokio::test]
async fn ndjson_file_receives_every_record() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("readings.ndjson");
    let transport = Arc::new(JsonLinesTransport::open(&path).await?);
    let observer = Arc::new(Counting::default());
    let publisher =
        Publisher::spawn_with_observer(transport, PublisherConfig::default(), observer.clone());
    let scheme = TopicScheme::new("factory");

    let handle = publisher.handle();
    for seq in 0..10 {
        assert!(handle.try_enqueue(tick_batch(&scheme, "press-1", seq)));
    }
    drop(handle);
    let stats = publisher.shutdown(Duration::from_secs(5)).await;

    assert_eq!(stats.published, 30);
    assert_eq!(observer.published.load(Ordering::Relaxed), 30);
    let contents = std::fs::read_to_string(&path)?;
    assert_eq!(contents.lines().count(), 30);
    for line in contents.lines() {
        let value: serde_json::Value = serde_json::from_str(line)?;
        let topic = value["topic"].as_str().unwrap_or_default();
        let (machine, _kind) = scheme.parse(topic).expect("topic follows scheme");
        assert_eq!(machine, "press-1");
    }
    Ok(())
}

#[tokio::test]
async fn records_of_one_batch_keep_their_order() -> anyhow::Result<()> {
    let transport = InMemoryTransport::new();
    let config = PublisherConfig {
        workers: 1,
        ..PublisherConfig::default()
    };
    let publisher = Publisher::spawn(Arc::new(transport.clone()), config);
    let scheme = TopicScheme::default();
    let handle = publisher.handle();
    handle.try_enqueue(tick_batch(&scheme, "fan-3", 0));
    drop(handle);
    publisher.shutdown(Duration::from_secs(5)).await;

    let topics: Vec<String> = transport.messages().into_iter().map(|m| m.topic).collect();
    assert_eq!(
        topics,
        [
            "factory/fan-3/energy",
            "factory/fan-3/production",
            "factory/fan-3/environmental"
        ]
    );
    Ok(())
}
