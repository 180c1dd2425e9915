//! WebSocket transport using tokio-tungstenite.

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::debug;
use url::Url;

use crate::error::TransportError;
use crate::network::traits::{
    Connection, Transport, TransportFuture, TransportReceiver, TransportSender,
};

type Stream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Serializer version the Phoenix endpoint is asked for.
pub const PROTOCOL_VERSION: &str = "2.0.0";

#[derive(Clone, Debug)]
pub struct WebSocketTransport {
    url: Url,
}

impl WebSocketTransport {
    /// `socket_url` is the endpoint path (e.g. `wss://host/socket`); the
    /// `websocket` suffix and `vsn` parameter are added here.
    pub fn new(socket_url: &Url) -> Self {
        let mut url = socket_url.clone();
        if !url.path().ends_with("/websocket") {
            let path = format!("{}/websocket", url.path().trim_end_matches('/'));
            url.set_path(&path);
        }
        url.query_pairs_mut().append_pair("vsn", PROTOCOL_VERSION);
        Self { url }
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

impl Transport for WebSocketTransport {
    fn connect(&self) -> TransportFuture<'_, Result<Connection, TransportError>> {
        Box::pin(async move {
            debug!(url = %self.url, "connecting websocket");
            let (stream, _) = tokio_tungstenite::connect_async(self.url.as_str())
                .await
                .map_err(|e| TransportError::Connection(e.to_string()))?;
            let (sink, stream) = stream.split();
            let connection: Connection = (
                Box::new(WebSocketSender { inner: sink }),
                Box::new(WebSocketReceiver { inner: stream }),
            );
            Ok(connection)
        })
    }
}

struct WebSocketSender {
    inner: SplitSink<Stream, WsMessage>,
}

impl TransportSender for WebSocketSender {
    fn send(&mut self, text: String) -> TransportFuture<'_, Result<(), TransportError>> {
        Box::pin(async move {
            self.inner
                .send(WsMessage::Text(text.into()))
                .await
                .map_err(|e| TransportError::Send(e.to_string()))
        })
    }

    fn close(&mut self) -> TransportFuture<'_, Result<(), TransportError>> {
        Box::pin(async move {
            self.inner
                .send(WsMessage::Close(None))
                .await
                .map_err(|e| TransportError::Send(e.to_string()))
        })
    }
}

struct WebSocketReceiver {
    inner: SplitStream<Stream>,
}

impl TransportReceiver for WebSocketReceiver {
    fn recv(&mut self) -> TransportFuture<'_, Option<Result<String, TransportError>>> {
        Box::pin(async move {
            loop {
                match self.inner.next().await {
                    Some(Ok(WsMessage::Text(text))) => return Some(Ok(text.to_string())),
                    Some(Ok(WsMessage::Close(_))) | None => return None,
                    // binary, ping, pong
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => return Some(Err(TransportError::Receive(e.to_string()))),
                }
            }
        })
    }
}
