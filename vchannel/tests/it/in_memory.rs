use std::time::Duration;

use serde_json::json;
use vchannel::{
    backends::{MemoryBroker, MemoryConfig, MemoryTransport},
    Codec, DynChannel, Envelope, QueueError, Transport, TransportOptions, VirtualChannel,
};

fn options() -> TransportOptions {
    TransportOptions {
        polling_interval: Some(0.05),
        ..Default::default()
    }
}

fn connect(broker: &MemoryBroker) -> DynChannel {
    MemoryTransport::builder(MemoryConfig {
        broker: broker.clone(),
        transport_options: options(),
    })
    .make_dynamic()
    .build()
}

/// Drains `queue` the way a consumer loop would: poll, back off on empty, rebuild the channel on
/// connection errors, skip messages that only fail the current operation.
async fn drain(broker: &MemoryBroker, queue: &str, expected: usize) -> Vec<Envelope> {
    let mut channel = connect(broker);
    let mut seen = Vec::new();

    while seen.len() < expected {
        match channel.get(queue).await {
            Ok(Some(delivery)) => {
                seen.push(delivery.payload().clone());
                delivery.ack().await.map_err(|(e, _)| e).unwrap();
            }
            Ok(None) => tokio::time::sleep(MemoryTransport::interval(&options())).await,
            Err(e) if MemoryTransport::is_connection_error(&e) => {
                channel.close().unwrap();
                broker.set_online(true);
                channel = connect(broker);
            }
            Err(e) if MemoryTransport::is_channel_error(&e) => {}
            Err(e) => panic!("unexpected error: {e}"),
        }
    }

    channel.close().unwrap();
    seen
}

#[tokio::test]
async fn consumer_loop_survives_outage() {
    let broker = MemoryBroker::new();
    let producer = connect(&broker);

    producer.put("jobs", &json!({ "n": 1 })).await.unwrap();
    producer.put("jobs", &json!({ "n": 2 })).await.unwrap();
    broker.set_online(false);

    let seen = drain(&broker, "jobs", 2).await;
    assert_eq!(seen, vec![json!({ "n": 1 }), json!({ "n": 2 })]);
    assert!(broker.clients_opened() >= 2);
}

#[tokio::test(start_paused = true)]
async fn consumer_loop_waits_for_late_messages() {
    let broker = MemoryBroker::new();
    let producer = connect(&broker);

    let consumer = tokio::spawn({
        let broker = broker.clone();
        async move { drain(&broker, "late", 1).await }
    });

    tokio::time::sleep(Duration::from_millis(500)).await;
    producer.put("late", &json!("hello")).await.unwrap();

    assert_eq!(consumer.await.unwrap(), vec![json!("hello")]);
}

struct Tagged;

impl Codec for Tagged {
    fn encode(&self, envelope: &Envelope) -> vchannel::Result<String> {
        Ok(format!("v1:{envelope}"))
    }

    fn decode(&self, body: &str) -> vchannel::Result<Envelope> {
        let raw = body
            .strip_prefix("v1:")
            .ok_or_else(|| QueueError::MalformedResponse(format!("untagged body `{body}`")))?;
        serde_json::from_str(raw).map_err(Into::into)
    }
}

#[tokio::test]
async fn custom_codec_shapes_the_body() {
    let broker = MemoryBroker::new();
    let c = MemoryTransport::builder(MemoryConfig {
        broker: broker.clone(),
        transport_options: TransportOptions::default(),
    })
    .with_codec(Tagged)
    .build();

    c.put("tagged", &json!([1, 2])).await.unwrap();
    broker.send_raw("tagged", "[3]").unwrap();

    let d = c.get("tagged").await.unwrap().unwrap();
    assert_eq!(d.payload(), &json!([1, 2]));
    d.ack().await.unwrap();

    let err = c.get("tagged").await.unwrap_err();
    assert!(MemoryTransport::is_channel_error(&err));
}
