use super::*;
use std::time::Duration;
use tokio::sync::mpsc;

fn join(user_id: &str) -> ChannelEvent {
    ChannelEvent::Join {
        user_id: user_id.to_string(),
    }
}

async fn recv_with_timeout(rx: &mut mpsc::UnboundedReceiver<ChannelEvent>) -> ChannelEvent {
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timed out waiting for event")
        .expect("channel closed")
}

#[tokio::test]
async fn emit_records_outbound_traffic() {
    let transport = InMemoryTransport::new();
    let channel = EventChannel::new(transport.clone());

    channel.emit(join("u1")).await.expect("emit");
    channel.emit(join("u2")).await.expect("emit");

    assert_eq!(transport.outbound(), vec![join("u1"), join("u2")]);
}

#[tokio::test]
async fn injected_events_reach_subscribed_handler() {
    let transport = InMemoryTransport::new();
    let channel = EventChannel::new(transport.clone());

    let (tx, mut rx) = mpsc::unbounded_channel();
    let _subscription = channel.on(move |event| {
        let tx = tx.clone();
        async move {
            let _ = tx.send(event);
        }
    });

    transport.inject(join("peer"));
    assert_eq!(recv_with_timeout(&mut rx).await, join("peer"));
}

#[tokio::test]
async fn dropping_the_subscription_stops_delivery() {
    let transport = InMemoryTransport::new();
    let channel = EventChannel::new(transport.clone());

    let (tx, mut rx) = mpsc::unbounded_channel();
    let subscription = channel.on(move |event| {
        let tx = tx.clone();
        async move {
            let _ = tx.send(event);
        }
    });

    transport.inject(join("before"));
    assert_eq!(recv_with_timeout(&mut rx).await, join("before"));

    drop(subscription);
    tokio::time::sleep(Duration::from_millis(50)).await;
    transport.inject(join("after"));
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(rx.try_recv().is_err(), "handler ran after deregistration");
}

#[tokio::test]
async fn connect_handler_fires_on_every_connect_signal() {
    let transport = InMemoryTransport::new();
    let channel = EventChannel::new(transport.clone());

    let (tx, mut rx) = mpsc::unbounded_channel();
    let _subscription = channel.on_connect(move || {
        let tx = tx.clone();
        async move {
            let _ = tx.send(join("connected"));
        }
    });

    // Initial connect plus a reconnect.
    transport.signal_connected();
    transport.signal_connected();

    assert_eq!(recv_with_timeout(&mut rx).await, join("connected"));
    assert_eq!(recv_with_timeout(&mut rx).await, join("connected"));
}

#[tokio::test]
async fn connect_handler_fires_immediately_when_already_connected() {
    let transport = InMemoryTransport::new();
    transport.signal_connected();
    let channel = EventChannel::new(transport.clone());

    let (tx, mut rx) = mpsc::unbounded_channel();
    let _subscription = channel.on_connect(move || {
        let tx = tx.clone();
        async move {
            let _ = tx.send(join("connected"));
        }
    });

    assert_eq!(recv_with_timeout(&mut rx).await, join("connected"));
}
