//! WebSocket transport for realtime channels.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, warn};

use super::{CHANNEL_CAPACITY, ChannelError, ChannelMessage, Connector, RealtimeChannel};

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Connects realtime channels over `ws://` / `wss://`.
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketConnector;

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self, endpoint: &str) -> Result<RealtimeChannel, ChannelError> {
        let (ws, _response) =
            connect_async(endpoint)
                .await
                .map_err(|e| ChannelError::Connect {
                    endpoint: endpoint.to_string(),
                    reason: e.to_string(),
                })?;
        debug!(endpoint, "WebSocket connected");

        let (outbound_tx, outbound_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (inbound_tx, inbound_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let pump = tokio::spawn(pump_websocket(
            endpoint.to_string(),
            ws,
            outbound_rx,
            inbound_tx,
        ));

        Ok(RealtimeChannel::new(
            endpoint,
            outbound_tx,
            inbound_rx,
            Some(pump),
        ))
    }
}

/// Shuttle messages between the socket and the channel queues until either
/// side goes away.
async fn pump_websocket(
    endpoint: String,
    ws: WsStream,
    mut outbound: mpsc::Receiver<ChannelMessage>,
    inbound: mpsc::Sender<ChannelMessage>,
) {
    let (mut sink, mut stream) = ws.split();

    loop {
        tokio::select! {
            msg = outbound.recv() => {
                let Some(msg) = msg else {
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                };
                let frame = match msg {
                    ChannelMessage::Binary(data) => Message::Binary(data),
                    ChannelMessage::Text(text) => Message::Text(text.into()),
                };
                if let Err(e) = sink.send(frame).await {
                    warn!(endpoint = %endpoint, error = %e, "WebSocket send failed");
                    break;
                }
            }
            frame = stream.next() => {
                let msg = match frame {
                    Some(Ok(Message::Binary(data))) => ChannelMessage::Binary(data),
                    Some(Ok(Message::Text(text))) => ChannelMessage::Text(text.to_string()),
                    Some(Ok(Message::Close(_))) | None => {
                        debug!(endpoint = %endpoint, "WebSocket closed by remote");
                        break;
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        warn!(endpoint = %endpoint, error = %e, "WebSocket receive failed");
                        break;
                    }
                };
                if inbound.send(msg).await.is_err() {
                    break;
                }
            }
        }
    }
}
