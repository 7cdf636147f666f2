//! Typed adapter over the bidirectional event transport.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use shared::protocol::ChannelEvent;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportLifecycle {
    Connected,
}

/// Publish/subscribe primitive the channel is built on. Connection
/// establishment and reconnection live behind this trait.
#[async_trait]
pub trait EventTransport: Send + Sync {
    async fn publish(&self, event: ChannelEvent) -> Result<()>;
    fn events(&self) -> broadcast::Receiver<ChannelEvent>;
    fn lifecycle(&self) -> broadcast::Receiver<TransportLifecycle>;
    fn is_connected(&self) -> bool;
}

/// Stable handle returned at subscription time. Dropping it deregisters the
/// handler; components subscribe on open and drop on close, so listener
/// lifetime is tied to the handle rather than to reference identity.
pub struct Subscription {
    task: JoinHandle<()>,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[derive(Clone)]
pub struct EventChannel {
    transport: Arc<dyn EventTransport>,
}

impl EventChannel {
    pub fn new(transport: Arc<dyn EventTransport>) -> Self {
        Self { transport }
    }

    pub async fn emit(&self, event: ChannelEvent) -> Result<()> {
        debug!(kind = event.kind(), "channel: emit");
        self.transport.publish(event).await
    }

    /// Feed every inbound event to `handler` until the returned handle is
    /// dropped.
    pub fn on<F, Fut>(&self, mut handler: F) -> Subscription
    where
        F: FnMut(ChannelEvent) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        let mut events = self.transport.events();
        let task = tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => handler(event).await,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "channel: subscriber lagged, events dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        Subscription { task }
    }

    /// Run `handler` once per connect signal. If the transport is already
    /// connected at registration time the handler fires immediately, so a
    /// late subscriber still announces itself.
    pub fn on_connect<F, Fut>(&self, mut handler: F) -> Subscription
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        let mut lifecycle = self.transport.lifecycle();
        let already_connected = self.transport.is_connected();
        let task = tokio::spawn(async move {
            if already_connected {
                handler().await;
            }
            loop {
                match lifecycle.recv().await {
                    Ok(TransportLifecycle::Connected) => handler().await,
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        Subscription { task }
    }
}

/// Loopback transport for tests and local demos. Published events are
/// delivered to local subscribers (standing in for the server fan-out) and
/// recorded so tests can assert on outbound traffic.
pub struct InMemoryTransport {
    events: broadcast::Sender<ChannelEvent>,
    lifecycle: broadcast::Sender<TransportLifecycle>,
    connected: AtomicBool,
    outbound: std::sync::Mutex<Vec<ChannelEvent>>,
}

impl InMemoryTransport {
    pub fn new() -> Arc<Self> {
        let (events, _) = broadcast::channel(256);
        let (lifecycle, _) = broadcast::channel(8);
        Arc::new(Self {
            events,
            lifecycle,
            connected: AtomicBool::new(false),
            outbound: std::sync::Mutex::new(Vec::new()),
        })
    }

    /// Deliver a server-originated event to subscribers.
    pub fn inject(&self, event: ChannelEvent) {
        let _ = self.events.send(event);
    }

    pub fn signal_connected(&self) {
        self.connected.store(true, Ordering::SeqCst);
        let _ = self.lifecycle.send(TransportLifecycle::Connected);
    }

    /// Everything published by the client so far, in order.
    pub fn outbound(&self) -> Vec<ChannelEvent> {
        self.outbound.lock().expect("outbound lock").clone()
    }
}

#[async_trait]
impl EventTransport for InMemoryTransport {
    async fn publish(&self, event: ChannelEvent) -> Result<()> {
        self.outbound
            .lock()
            .map_err(|_| anyhow!("outbound log poisoned"))?
            .push(event.clone());
        let _ = self.events.send(event);
        Ok(())
    }

    fn events(&self) -> broadcast::Receiver<ChannelEvent> {
        self.events.subscribe()
    }

    fn lifecycle(&self) -> broadcast::Receiver<TransportLifecycle> {
        self.lifecycle.subscribe()
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
#[path = "tests/channel_tests.rs"]
mod tests;
