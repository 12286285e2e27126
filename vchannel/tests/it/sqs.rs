use std::time::Duration;

use serde::{Deserialize, Serialize};
use vchannel::{
    backends::{SqsChannel, SqsTransport},
    ConnectionInfo, ErrorKind, Transport, TransportOptions, VirtualChannel,
};

const ROOT_URL: &str = "http://localhost:9324";

/// Returns a channel connected to the ElasticMQ instance spawned by the file
/// `testing-docker-compose.yaml` in the root of the repository.
///
/// Every channel gets its own random queue name prefix, so tests never steal each other's
/// messages.
fn make_test_channel(visibility_timeout: Option<u32>) -> SqsChannel {
    let prefix: String = std::iter::repeat_with(fastrand::alphanumeric)
        .take(8)
        .collect();

    SqsTransport::builder(ConnectionInfo {
        userid: Some("x".to_owned()),
        password: Some("x".to_owned()),
        transport_options: TransportOptions {
            visibility_timeout,
            region: Some("localhost".to_owned()),
            endpoint_url: Some(ROOT_URL.to_owned()),
            queue_name_prefix: Some(format!("{prefix}.")),
            ..Default::default()
        },
    })
    .build()
}

#[derive(Debug, Deserialize, Serialize, PartialEq)]
pub struct ExType {
    a: u8,
}

#[tokio::test]
async fn test_serde_put_get() {
    let c = make_test_channel(None);
    let payload = ExType { a: 2 };

    c.put_serde_json("celery.tasks", &payload).await.unwrap();

    let d = c.get("celery.tasks").await.unwrap().unwrap();
    assert_eq!(d.payload_serde_json::<ExType>().unwrap(), payload);
    d.ack().await.unwrap();

    assert!(c.get("celery.tasks").await.unwrap().is_none());
}

#[tokio::test]
async fn test_get_on_empty_queue() {
    let c = make_test_channel(None);
    assert!(c.get("nothing.here").await.unwrap().is_none());
    assert!(c.is_connected());
}

#[tokio::test]
async fn test_queue_is_created_once() {
    let c = make_test_channel(Some(30));

    let first = c.resolve_queue("a.b").await.unwrap();
    let second = c.resolve_queue("a.b").await.unwrap();
    assert_eq!(first, second);
    assert!(first.name.ends_with("-a-b"));
    assert!(first.url.ends_with(&first.name));
}

#[tokio::test]
async fn test_size_and_purge() {
    let c = make_test_channel(None);

    for a in 0..3 {
        c.put_serde_json("bulk", &ExType { a }).await.unwrap();
    }
    assert_eq!(c.size("bulk").await.unwrap(), 3);
    assert_eq!(c.purge("bulk").await.unwrap(), 3);
    assert_eq!(c.size("bulk").await.unwrap(), 0);
}

#[tokio::test]
async fn test_nack_redelivers() {
    let c = make_test_channel(Some(30));
    c.put_serde_json("retry", &ExType { a: 1 }).await.unwrap();

    let d = c.get("retry").await.unwrap().unwrap();
    d.nack().await.unwrap();

    let d = c.get("retry").await.unwrap().unwrap();
    assert_eq!(d.payload_serde_json::<ExType>().unwrap(), ExType { a: 1 });
    d.ack().await.unwrap();
}

#[tokio::test]
async fn test_unacked_message_reappears() {
    let c = make_test_channel(Some(1));
    c.put_serde_json("slow", &ExType { a: 5 }).await.unwrap();

    let _d = c.get("slow").await.unwrap().unwrap();
    assert!(c.get("slow").await.unwrap().is_none());

    tokio::time::sleep(Duration::from_millis(1500)).await;
    let d = c.get("slow").await.unwrap().unwrap();
    assert_eq!(d.payload_serde_json::<ExType>().unwrap(), ExType { a: 5 });
    d.ack().await.unwrap();
}

#[tokio::test]
async fn test_undecodable_body_is_a_channel_error() {
    let c = make_test_channel(None);
    let handle = c.resolve_queue("raw").await.unwrap();

    c.client()
        .await
        .unwrap()
        .send_message()
        .queue_url(&handle.url)
        .message_body("not json")
        .send()
        .await
        .unwrap();

    let err = c.get("raw").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Decode);
    assert!(SqsTransport::is_channel_error(&err));
    assert!(!SqsTransport::is_connection_error(&err));

    // the channel stays usable
    c.put_serde_json("raw.ok", &ExType { a: 0 }).await.unwrap();
    assert!(c.get("raw.ok").await.unwrap().is_some());
}

#[tokio::test]
async fn test_close_after_use() {
    let mut c = make_test_channel(None);
    c.size("closing").await.unwrap();
    assert!(c.is_connected());

    c.close().unwrap();
    assert!(!c.is_connected());
    c.close().unwrap();

    assert_eq!(c.size("closing").await.unwrap_err().kind(), ErrorKind::Closed);
}

#[tokio::test]
async fn test_unreachable_endpoint_is_a_connection_error() {
    let c = SqsTransport::builder(ConnectionInfo {
        userid: Some("x".to_owned()),
        password: Some("x".to_owned()),
        transport_options: TransportOptions {
            region: Some("localhost".to_owned()),
            // port 9 is "discard"; nothing answers HTTP there
            endpoint_url: Some("http://127.0.0.1:9".to_owned()),
            ..Default::default()
        },
    })
    .build();

    let err = c.size("orders").await.unwrap_err();
    assert!(SqsTransport::is_connection_error(&err), "{err:?}");
}

#[tokio::test]
async fn test_dynamic_channel() {
    let c = make_test_channel(None).into_dyn();

    c.put_serde_json("dyn", &ExType { a: 9 }).await.unwrap();
    let d = c.get("dyn").await.unwrap().unwrap();
    assert_eq!(d.payload_serde_json::<ExType>().unwrap(), ExType { a: 9 });
    d.ack().await.unwrap();
}
