//! WebSocket transport for rover link channels

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

/// One live message-framed channel to a rover
#[async_trait]
pub trait LinkChannel: Send + 'static {
    /// Send one binary frame
    async fn send(&mut self, frame: Bytes) -> Result<()>;

    /// Receive the next binary frame; None means the channel closed
    async fn recv(&mut self) -> Option<Bytes>;

    /// Close the channel gracefully
    async fn close(&mut self);
}

/// Factory for opening channels to one rover address
#[async_trait]
pub trait LinkConnector: Send + Sync + 'static {
    /// The channel type this connector produces
    type Channel: LinkChannel;

    /// Attempt to connect, returning a live channel on success
    async fn connect(&self) -> Result<Self::Channel>;

    /// Human-readable name for this channel kind
    fn name(&self) -> &'static str;
}

/// WebSocket connector for a rover command or video endpoint
pub struct WsLinkConnector {
    url: String,
    name: &'static str,
}

impl WsLinkConnector {
    /// Connector for the command/telemetry channel
    pub fn command(url: String) -> Self {
        Self {
            url,
            name: "command",
        }
    }

    /// Connector for the video channel
    pub fn video(url: String) -> Self {
        Self { url, name: "video" }
    }
}

#[async_trait]
impl LinkConnector for WsLinkConnector {
    type Channel = WsLinkChannel;

    async fn connect(&self) -> Result<Self::Channel> {
        let (ws, _) = connect_async(self.url.as_str()).await?;
        Ok(WsLinkChannel { ws })
    }

    fn name(&self) -> &'static str {
        self.name
    }
}

/// WebSocket channel carrying binary frames
pub struct WsLinkChannel {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl LinkChannel for WsLinkChannel {
    async fn send(&mut self, frame: Bytes) -> Result<()> {
        self.ws.send(Message::Binary(frame.to_vec())).await?;
        Ok(())
    }

    async fn recv(&mut self) -> Option<Bytes> {
        while let Some(message) = self.ws.next().await {
            match message {
                Ok(Message::Binary(data)) => return Some(Bytes::from(data)),
                Ok(Message::Close(_)) => return None,
                // Pings and pongs are handled by the library; text is noise
                Ok(_) => continue,
                Err(_) => return None,
            }
        }
        None
    }

    async fn close(&mut self) {
        let _ = self.ws.close(None).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connector_names() {
        let command = WsLinkConnector::command("ws://10.0.0.7:8765".into());
        assert_eq!(command.name(), "command");

        let video = WsLinkConnector::video("ws://10.0.0.7:8766".into());
        assert_eq!(video.name(), "video");
    }
}
