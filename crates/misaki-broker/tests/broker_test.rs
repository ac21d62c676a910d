// Integration tests: broker served over TCP, driven through the client crate

use misaki_broker::{Broker, BrokerConfig, MessageStore, QueueSettings};
use misaki_client::{BrokerQueue, QueueService};
use misaki_protocol::{Message, MessageCodec, ReceiveRequest};

use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::Framed;

async fn start_broker(settings: QueueSettings) -> (Arc<Broker>, String) {
    let store = Arc::new(MessageStore::in_memory(settings).unwrap());
    let broker = Arc::new(Broker::with_store(BrokerConfig::default(), store));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap().to_string();

    let server = broker.clone();
    tokio::spawn(async move { server.serve(listener).await });

    (broker, address)
}

#[tokio::test]
async fn test_round_trip_over_tcp() {
    let (broker, address) = start_broker(QueueSettings::default()).await;
    let queue = BrokerQueue::new(address, "misaki");

    queue.enqueue(r#"{"command_name":"deploy"}"#).await.unwrap();
    queue.enqueue(r#"{"command_name":"deploy"}"#).await.unwrap();
    assert_eq!(broker.store().depth("misaki").visible, 2);

    let msg = queue
        .receive_blocking(Duration::from_secs(1))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(msg.body, r#"{"command_name":"deploy"}"#);
    assert_eq!(msg.receive_count, 1);

    queue.delete(&msg.receipt_token).await.unwrap();
    // Deleting twice still succeeds
    queue.delete(&msg.receipt_token).await.unwrap();

    assert_eq!(broker.store().depth("misaki").visible, 1);
    broker.shutdown();
}

#[tokio::test]
async fn test_empty_receive_returns_none() {
    let (broker, address) = start_broker(QueueSettings::default()).await;
    let queue = BrokerQueue::new(address, "idle");

    let received = queue
        .receive_blocking(Duration::from_secs(1))
        .await
        .unwrap();
    assert!(received.is_none());
    broker.shutdown();
}

#[tokio::test]
async fn test_undeleted_message_is_redelivered() {
    let settings = QueueSettings {
        visibility_timeout: Duration::from_secs(1),
        ..QueueSettings::default()
    };
    let (broker, address) = start_broker(settings).await;
    let queue = BrokerQueue::new(address, "misaki");

    queue.enqueue("retry me").await.unwrap();

    let first = queue
        .receive_blocking(Duration::from_secs(1))
        .await
        .unwrap()
        .unwrap();
    let second = queue
        .receive_blocking(Duration::from_secs(3))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(second.body, "retry me");
    assert_eq!(second.receive_count, 2);
    assert_ne!(first.receipt_token, second.receipt_token);
    broker.shutdown();
}

#[tokio::test]
async fn test_protocol_level_receive() {
    let (broker, address) = start_broker(QueueSettings::default()).await;

    let stream = TcpStream::connect(&address).await.unwrap();
    let mut framed = Framed::new(stream, MessageCodec);

    framed
        .send(Message::Receive(ReceiveRequest {
            queue: "misaki".to_string(),
            wait_secs: 0,
            visibility_timeout_secs: None,
        }))
        .await
        .unwrap();

    match framed.next().await {
        Some(Ok(Message::Ack(ack))) => assert!(ack.message.is_none()),
        other => panic!("unexpected response: {:?}", other),
    }
    broker.shutdown();
}
