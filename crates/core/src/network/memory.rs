//! In-process transport, for driving a socket without a server.

use std::sync::Mutex;

use tokio::sync::mpsc;

use crate::error::TransportError;
use crate::network::message::Message;
use crate::network::traits::{
    Connection, Transport, TransportFuture, TransportReceiver, TransportSender,
};

/// Client half; hand it to the socket.
#[derive(Debug)]
pub struct MemoryTransport {
    accepted: mpsc::UnboundedSender<ServerConnection>,
    refuse: Mutex<bool>,
}

/// Server half; accepts one [`ServerConnection`] per `connect`.
#[derive(Debug)]
pub struct MemoryServer {
    pending: mpsc::UnboundedReceiver<ServerConnection>,
}

impl MemoryTransport {
    pub fn pair() -> (MemoryTransport, MemoryServer) {
        let (accepted, pending) = mpsc::unbounded_channel();
        (
            MemoryTransport {
                accepted,
                refuse: Mutex::new(false),
            },
            MemoryServer { pending },
        )
    }

    /// Make subsequent `connect` calls fail.
    pub fn refuse_connections(&self, refuse: bool) {
        *self.refuse.lock().unwrap_or_else(|e| e.into_inner()) = refuse;
    }
}

impl MemoryServer {
    pub async fn accept(&mut self) -> Option<ServerConnection> {
        self.pending.recv().await
    }
}

impl Transport for MemoryTransport {
    fn connect(&self) -> TransportFuture<'_, Result<Connection, TransportError>> {
        Box::pin(async move {
            if *self.refuse.lock().unwrap_or_else(|e| e.into_inner()) {
                return Err(TransportError::Connection("refused".to_string()));
            }

            let (to_server, from_client) = mpsc::unbounded_channel();
            let (to_client, from_server) = mpsc::unbounded_channel();
            self.accepted
                .send(ServerConnection {
                    incoming: from_client,
                    outgoing: Some(to_client),
                })
                .map_err(|_| TransportError::Connection("server dropped".to_string()))?;

            let connection: Connection = (
                Box::new(MemorySender {
                    outgoing: Some(to_server),
                }),
                Box::new(MemoryReceiver {
                    incoming: from_server,
                }),
            );
            Ok(connection)
        })
    }
}

struct MemorySender {
    outgoing: Option<mpsc::UnboundedSender<String>>,
}

impl TransportSender for MemorySender {
    fn send(&mut self, text: String) -> TransportFuture<'_, Result<(), TransportError>> {
        Box::pin(async move {
            self.outgoing
                .as_ref()
                .ok_or_else(|| TransportError::Send("closed".to_string()))?
                .send(text)
                .map_err(|_| TransportError::Send("server dropped".to_string()))
        })
    }

    fn close(&mut self) -> TransportFuture<'_, Result<(), TransportError>> {
        Box::pin(async move {
            self.outgoing = None;
            Ok(())
        })
    }
}

struct MemoryReceiver {
    incoming: mpsc::UnboundedReceiver<String>,
}

impl TransportReceiver for MemoryReceiver {
    fn recv(&mut self) -> TransportFuture<'_, Option<Result<String, TransportError>>> {
        Box::pin(async move { self.incoming.recv().await.map(Ok) })
    }
}

/// One accepted connection, seen from the server side.
#[derive(Debug)]
pub struct ServerConnection {
    incoming: mpsc::UnboundedReceiver<String>,
    outgoing: Option<mpsc::UnboundedSender<String>>,
}

impl ServerConnection {
    /// Next raw frame from the client; `None` once the client closed.
    pub async fn recv_text(&mut self) -> Option<String> {
        self.incoming.recv().await
    }

    /// Next decoded frame, skipping heartbeats.
    pub async fn recv(&mut self) -> Option<Message> {
        loop {
            let text = self.incoming.recv().await?;
            let Ok(message) = Message::decode(&text) else {
                continue;
            };
            if message.topic != crate::network::message::events::PHOENIX_TOPIC {
                return Some(message);
            }
        }
    }

    pub fn send(&self, message: &Message) -> bool {
        self.send_text(message.encode())
    }

    pub fn send_text(&self, text: String) -> bool {
        self.outgoing
            .as_ref()
            .is_some_and(|outgoing| outgoing.send(text).is_ok())
    }

    /// Close the connection as if the server went away.
    pub fn close(&mut self) {
        self.outgoing = None;
    }
}
