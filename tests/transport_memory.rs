// tests/transport_memory.rs

use std::sync::Arc;

use bytes::Bytes;
use tokio::time::{timeout, Duration};

use proton::{
    // ---
    create_memory_transport_with_hub,
    delivery_channel,
    ClientIdentity,
    DeliveryInbox,
    Envelope,
    MemoryHub,
    Topic,
    TransportBase,
    TransportPtr,
};

async fn open(hub: &Arc<MemoryHub>, name: &str) -> (TransportPtr, DeliveryInbox) {
    // ---
    let (sink, inbox) = delivery_channel();
    let transport = create_memory_transport_with_hub(TransportBase::new(name, sink), hub.clone())
        .await
        .expect("failed to create memory transport");
    (transport, inbox)
}

fn topic() -> Topic {
    Topic::new("test-namespace", "test-subject").unwrap()
}

fn sender() -> ClientIdentity {
    ClientIdentity::new("sender", Vec::<String>::new()).unwrap()
}

async fn expect_one(inbox: &mut DeliveryInbox) -> Envelope {
    timeout(Duration::from_millis(200), inbox.recv())
        .await
        .expect("timed out waiting for message")
        .expect("delivery channel closed unexpectedly")
}

async fn expect_none(inbox: &mut DeliveryInbox) {
    let res = timeout(Duration::from_millis(100), inbox.recv()).await;
    assert!(res.is_err(), "unexpected delivery: {res:?}");
}

#[tokio::test]
async fn bind_then_send_directed_delivers() {
    // ---
    // Arrange
    // ---
    let hub = MemoryHub::new();
    let (receiver, mut inbox) = open(&hub, "client1").await;
    receiver.bind_recipient(&topic(), "client1").await.unwrap();

    let payload = Bytes::from_static(b"\"hello\"");
    let env = Envelope::directed(&sender(), "client1", topic(), payload.clone());

    // ---
    // Act
    // ---
    receiver.send_directed(env.clone()).await.expect("send failed");

    // ---
    // Assert
    // ---
    let received = expect_one(&mut inbox).await;
    assert_eq!(received, env);
    assert_eq!(received.payload, payload);
}

#[tokio::test]
async fn group_token_fans_in_one_copy_per_queue() {
    // ---
    let hub = MemoryHub::new();
    let (a, mut inbox_a) = open(&hub, "a").await;
    let (b, mut inbox_b) = open(&hub, "b").await;
    let (c, mut inbox_c) = open(&hub, "c").await;

    // Binding the same address twice must not duplicate deliveries.
    a.bind_recipient(&topic(), "workers").await.unwrap();
    a.bind_recipient(&topic(), "workers").await.unwrap();
    b.bind_recipient(&topic(), "workers").await.unwrap();
    c.bind_recipient(&topic(), "c").await.unwrap();

    let env = Envelope::directed(&sender(), "workers", topic(), Bytes::new());
    c.send_directed(env).await.unwrap();

    expect_one(&mut inbox_a).await;
    expect_one(&mut inbox_b).await;
    expect_none(&mut inbox_a).await;
    expect_none(&mut inbox_c).await;
}

#[tokio::test]
async fn broadcast_reaches_broadcast_bindings_only() {
    // ---
    let hub = MemoryHub::new();
    let (a, mut inbox_a) = open(&hub, "a").await;
    let (b, mut inbox_b) = open(&hub, "b").await;

    a.bind_broadcast(&topic()).await.unwrap();
    b.bind_recipient(&topic(), "b").await.unwrap();

    let env = Envelope::broadcast(&sender(), topic(), Bytes::new());
    b.send_broadcast(env).await.unwrap();

    assert!(expect_one(&mut inbox_a).await.is_broadcast());
    expect_none(&mut inbox_b).await;
}

#[tokio::test]
async fn other_topic_is_not_delivered() {
    // ---
    let hub = MemoryHub::new();
    let (a, mut inbox) = open(&hub, "a").await;
    a.bind_recipient(&topic(), "a").await.unwrap();

    let elsewhere = Topic::new("test-namespace", "other").unwrap();
    a.send_directed(Envelope::directed(&sender(), "a", elsewhere, Bytes::new()))
        .await
        .unwrap();

    expect_none(&mut inbox).await;
}

#[tokio::test]
async fn close_removes_only_own_queue() {
    // ---
    let hub = MemoryHub::new();
    let (a, mut inbox_a) = open(&hub, "a").await;
    let (b, mut inbox_b) = open(&hub, "b").await;
    a.bind_broadcast(&topic()).await.unwrap();
    b.bind_broadcast(&topic()).await.unwrap();
    assert_eq!(hub.queue_count().await, 2);

    a.close().await.unwrap();
    assert_eq!(hub.queue_count().await, 1);

    b.send_broadcast(Envelope::broadcast(&sender(), topic(), Bytes::new()))
        .await
        .unwrap();

    expect_one(&mut inbox_b).await;
    expect_none(&mut inbox_a).await;
}

#[tokio::test]
async fn separate_hubs_are_isolated() {
    // ---
    let (a, mut inbox_a) = open(&MemoryHub::new(), "a").await;
    let (b, _inbox_b) = open(&MemoryHub::new(), "b").await;
    a.bind_broadcast(&topic()).await.unwrap();

    b.send_broadcast(Envelope::broadcast(&sender(), topic(), Bytes::new()))
        .await
        .unwrap();

    expect_none(&mut inbox_a).await;
    assert_eq!(a.transport_id(), "a");
}

#[tokio::test]
async fn dropping_a_transport_removes_its_queue() {
    // ---
    let hub = MemoryHub::new();
    let (a, _inbox_a) = open(&hub, "a").await;
    let (b, mut inbox_b) = open(&hub, "b").await;
    a.bind_broadcast(&topic()).await.unwrap();
    b.bind_broadcast(&topic()).await.unwrap();

    drop(a);
    assert_eq!(hub.queue_count().await, 1);

    b.send_broadcast(Envelope::broadcast(&sender(), topic(), Bytes::new()))
        .await
        .unwrap();
    expect_one(&mut inbox_b).await;
}

#[tokio::test]
async fn queue_with_closed_inbox_is_pruned_on_publish() {
    // ---
    let hub = MemoryHub::new();
    let (a, inbox_a) = open(&hub, "a").await;
    let (b, mut inbox_b) = open(&hub, "b").await;
    a.bind_broadcast(&topic()).await.unwrap();
    b.bind_broadcast(&topic()).await.unwrap();

    // The transport is still alive but nobody reads its deliveries anymore.
    drop(inbox_a);

    b.send_broadcast(Envelope::broadcast(&sender(), topic(), Bytes::new()))
        .await
        .unwrap();

    expect_one(&mut inbox_b).await;
    assert_eq!(hub.queue_count().await, 1);
    assert_eq!(a.transport_id(), "a");
}
