// Mock WebSocket client for exercising a running Hub end to end, adapted
// from the forwarding suite's `MockWsClient` to this protocol's
// `hub_protocol::Message` instead of the timing wire format.

use futures_util::{SinkExt, StreamExt};
use hub_protocol::Message;
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;
use tokio_tungstenite::MaybeTlsStream;

type WsStream = tokio_tungstenite::WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

pub struct TestClient {
    write: futures_util::stream::SplitSink<WsStream, WsMessage>,
    read: futures_util::stream::SplitStream<WsStream>,
}

impl TestClient {
    pub async fn connect(url: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let (ws_stream, _response) = tokio_tungstenite::connect_async(url).await?;
        let (write, read) = ws_stream.split();
        Ok(Self { write, read })
    }

    pub async fn send(&mut self, msg: &Message) -> Result<(), Box<dyn std::error::Error>> {
        let json = msg.encode()?;
        self.write.send(WsMessage::Text(json.into())).await?;
        Ok(())
    }

    /// Receives the next application message, transparently answering
    /// server pings with a pong and skipping any other control frame.
    pub async fn recv(&mut self) -> Result<Message, Box<dyn std::error::Error>> {
        loop {
            match self.read.next().await {
                Some(Ok(WsMessage::Text(text))) => return Ok(Message::decode(&text)?),
                Some(Ok(WsMessage::Ping(data))) => {
                    self.write.send(WsMessage::Pong(data)).await?;
                    continue;
                }
                Some(Ok(WsMessage::Pong(_))) => continue,
                Some(Ok(WsMessage::Close(_))) => return Err("connection closed by server".into()),
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(e.into()),
                None => return Err("connection stream ended".into()),
            }
        }
    }

    /// Convenience wrapper around [`Self::recv`] for the one-time
    /// unsolicited `identity` frame every freshly accepted peer gets.
    pub async fn recv_client_id(&mut self) -> Result<String, Box<dyn std::error::Error>> {
        let msg = self.recv().await?;
        if msg.event != "identity" {
            return Err(format!("expected identity frame, got event {:?}", msg.event).into());
        }
        let payload: serde_json::Value = serde_json::from_str(&msg.payload)?;
        Ok(payload["clientId"].as_str().unwrap_or_default().to_owned())
    }

    pub async fn close(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        self.write.send(WsMessage::Close(None)).await?;
        Ok(())
    }
}
