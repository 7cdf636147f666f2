//! WebSocket implementation of the event transport.

use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use shared::protocol::ChannelEvent;
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};
use tracing::warn;

use crate::channel::{EventTransport, TransportLifecycle};

pub struct WsEventTransport {
    outbound: mpsc::UnboundedSender<ChannelEvent>,
    events: broadcast::Sender<ChannelEvent>,
    lifecycle: broadcast::Sender<TransportLifecycle>,
}

impl WsEventTransport {
    /// Establish the socket and start the reader/writer pumps. Inbound
    /// frames that fail to decode are logged and skipped, never fatal.
    pub async fn connect(ws_url: &str) -> Result<Arc<Self>> {
        let (stream, _) = connect_async(ws_url)
            .await
            .with_context(|| format!("failed to connect event channel: {ws_url}"))?;
        let (mut writer, mut reader) = stream.split();

        let (events, _) = broadcast::channel(256);
        let (lifecycle, _) = broadcast::channel(8);
        let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<ChannelEvent>();

        tokio::spawn(async move {
            while let Some(event) = outbound_rx.recv().await {
                let text = match serde_json::to_string(&event) {
                    Ok(text) => text,
                    Err(err) => {
                        warn!(kind = event.kind(), "transport: encode failed: {err}");
                        continue;
                    }
                };
                if writer.send(WsMessage::Text(text)).await.is_err() {
                    break;
                }
            }
        });

        let inbound = events.clone();
        tokio::spawn(async move {
            while let Some(frame) = reader.next().await {
                match frame {
                    Ok(WsMessage::Text(text)) => match serde_json::from_str::<ChannelEvent>(&text)
                    {
                        Ok(event) => {
                            let _ = inbound.send(event);
                        }
                        Err(err) => warn!("transport: invalid channel event: {err}"),
                    },
                    Ok(WsMessage::Close(_)) => break,
                    Ok(_) => {}
                    Err(err) => {
                        warn!("transport: receive failed: {err}");
                        break;
                    }
                }
            }
        });

        let transport = Arc::new(Self {
            outbound,
            events,
            lifecycle,
        });
        let _ = transport.lifecycle.send(TransportLifecycle::Connected);
        Ok(transport)
    }
}

#[async_trait]
impl EventTransport for WsEventTransport {
    async fn publish(&self, event: ChannelEvent) -> Result<()> {
        self.outbound
            .send(event)
            .map_err(|_| anyhow!("event channel writer closed"))
    }

    fn events(&self) -> broadcast::Receiver<ChannelEvent> {
        self.events.subscribe()
    }

    fn lifecycle(&self) -> broadcast::Receiver<TransportLifecycle> {
        self.lifecycle.subscribe()
    }

    fn is_connected(&self) -> bool {
        true
    }
}
