//! Mattermost adapter: REST directory client plus websocket event stream.
//!
//! The REST side lives in [`api`]; this module owns the persistent websocket
//! connection that delivers real-time events.

pub mod api;
pub mod events;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::error::ChannelAdapterError;
use crate::traits::EventSource;
use crate::types::Event;

pub use api::MattermostApiClient;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Live Mattermost websocket connection.
///
/// Events are yielded strictly in delivery order. Reconnection is not
/// attempted: once the server drops the connection the stream ends.
pub struct MattermostEventStream {
    url: String,
    stream: Option<WsStream>,
    seq: i64,
}

impl MattermostEventStream {
    /// Open the websocket and authenticate with the session token.
    pub async fn connect(url: &str, auth_token: &str) -> Result<Self, ChannelAdapterError> {
        if auth_token.is_empty() {
            return Err(ChannelAdapterError::NotLoggedIn);
        }

        let (stream, _response) = connect_async(url)
            .await
            .map_err(|e| ChannelAdapterError::Connection(format!("websocket connect: {}", e)))?;

        let mut source = Self {
            url: url.to_string(),
            stream: Some(stream),
            seq: 0,
        };
        source.authenticate(auth_token).await?;

        tracing::info!(url = %source.url, "Mattermost event stream connected");
        Ok(source)
    }

    async fn authenticate(&mut self, auth_token: &str) -> Result<(), ChannelAdapterError> {
        self.seq += 1;
        let challenge = events::AuthenticationChallenge::new(self.seq, auth_token);
        let text = serde_json::to_string(&challenge)
            .map_err(|e| ChannelAdapterError::Internal(format!("auth challenge encode: {}", e)))?;

        let stream = self.stream.as_mut().ok_or(ChannelAdapterError::NotConnected)?;
        stream
            .send(WsMessage::Text(text))
            .await
            .map_err(|e| ChannelAdapterError::Connection(format!("websocket auth: {}", e)))
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }
}

#[async_trait]
impl EventSource for MattermostEventStream {
    async fn next_event(&mut self) -> Option<Result<Event, ChannelAdapterError>> {
        loop {
            let stream = self.stream.as_mut()?;
            match stream.next().await {
                Some(Ok(WsMessage::Text(text))) => match events::parse_frame(&text) {
                    Ok(event) => return Some(Ok(event)),
                    Err(e) => {
                        tracing::debug!("skipping undecodable websocket frame: {}", e);
                    }
                },
                Some(Ok(WsMessage::Ping(data))) => {
                    if let Err(e) = stream.send(WsMessage::Pong(data)).await {
                        tracing::warn!("failed to answer websocket ping: {}", e);
                    }
                }
                Some(Ok(WsMessage::Close(_))) => {
                    tracing::info!(url = %self.url, "Mattermost websocket closed by server");
                    self.stream = None;
                    return None;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::warn!(url = %self.url, "Mattermost websocket error: {}", e);
                    self.stream = None;
                    return Some(Err(ChannelAdapterError::Connection(format!(
                        "websocket read: {}",
                        e
                    ))));
                }
                None => {
                    tracing::info!(url = %self.url, "Mattermost websocket stream ended");
                    self.stream = None;
                    return None;
                }
            }
        }
    }

    async fn close(&mut self) -> Result<(), ChannelAdapterError> {
        let Some(mut stream) = self.stream.take() else {
            return Ok(());
        };
        stream
            .close(None)
            .await
            .map_err(|e| ChannelAdapterError::Connection(format!("websocket close: {}", e)))?;
        tracing::info!(url = %self.url, "Mattermost event stream closed");
        Ok(())
    }
}
