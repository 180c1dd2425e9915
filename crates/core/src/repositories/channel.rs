//! One live topic subscription whose messages decode into `T`.

use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{ApiResult, SocketError};
use crate::network::{Channel, Message, PushStatus, Socket};

pub type ReceiveCallback<T> = Arc<dyn Fn(ApiResult<T>) + Send + Sync>;

struct Active {
    channel: Arc<dyn Channel>,
    live: Arc<AtomicBool>,
}

/// Holds at most one channel. `connect` replaces it, `disconnect` drops it.
///
/// The join reply and every `event_name` push are decoded the same way, so
/// the callback sees the initial snapshot and each update alike.
pub struct ChannelSubscription<T> {
    socket: Arc<dyn Socket>,
    event_name: &'static str,
    active: Mutex<Option<Active>>,
    _payload: PhantomData<fn() -> T>,
}

impl<T> ChannelSubscription<T>
where
    T: DeserializeOwned + 'static,
{
    pub fn new(socket: Arc<dyn Socket>, event_name: &'static str) -> Self {
        Self {
            socket,
            event_name,
            active: Mutex::new(None),
            _payload: PhantomData,
        }
    }

    pub fn connect(&self, topic: &str, params: Value, on_receive: ReceiveCallback<T>) {
        let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(previous) = active.take() {
            previous.close();
        }

        let live = Arc::new(AtomicBool::new(true));
        let channel = self.socket.get_channel(topic, params);

        channel.on_event(self.event_name, deliver(&live, &on_receive));
        {
            let live = live.clone();
            let on_receive = on_receive.clone();
            channel.on_failure(Arc::new(move |_| {
                if live.load(Ordering::SeqCst) {
                    on_receive(Err(SocketError::Failure.into()));
                }
            }));
        }
        channel.on_detach(Arc::new(|message| {
            debug!(topic = %message.topic, "subscription channel left");
        }));

        let on_error = {
            let live = live.clone();
            let on_receive = on_receive.clone();
            Arc::new(move |_: &Message| {
                if live.load(Ordering::SeqCst) {
                    on_receive(Err(SocketError::ReceivedError.into()));
                }
            })
        };
        channel
            .attach()
            .receive(PushStatus::Ok, deliver(&live, &on_receive))
            .receive(PushStatus::Error, on_error);

        *active = Some(Active { channel, live });
    }

    pub fn disconnect(&self) {
        let previous = self
            .active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(previous) = previous {
            previous.close();
        }
    }

    pub fn is_connected(&self) -> bool {
        self.active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }

    pub fn topic(&self) -> Option<String> {
        self.active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map(|active| active.channel.topic().to_string())
    }
}

impl Active {
    fn close(self) {
        self.live.store(false, Ordering::SeqCst);
        self.channel.detach();
    }
}

fn deliver<T>(
    live: &Arc<AtomicBool>,
    on_receive: &ReceiveCallback<T>,
) -> Arc<dyn Fn(&Message) + Send + Sync>
where
    T: DeserializeOwned + 'static,
{
    let live = live.clone();
    let on_receive = on_receive.clone();
    Arc::new(move |message: &Message| {
        if !live.load(Ordering::SeqCst) {
            return;
        }
        let Some(body) = message.json_body() else {
            debug!(topic = %message.topic, event = %message.event, "message has no body");
            return;
        };
        match serde_json::from_str::<T>(&body) {
            Ok(data) => on_receive(Ok(data)),
            Err(error) => {
                warn!(topic = %message.topic, %error, "failed to parse channel message");
                on_receive(Err(SocketError::FailedToParse.into()));
            }
        }
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::error::ApiError;
    use crate::network::memory::{MemoryServer, MemoryTransport, ServerConnection};
    use crate::network::message::events;
    use crate::network::{PhoenixSocket, SocketOptions};
    use serde::Deserialize;
    use serde_json::json;
    use tokio::runtime::Handle;
    use tokio::sync::mpsc;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Count {
        count: u32,
    }

    pub(crate) async fn connected_socket() -> (Arc<PhoenixSocket>, MemoryServer, ServerConnection)
    {
        let (transport, mut server) = MemoryTransport::pair();
        let socket = Arc::new(PhoenixSocket::new(
            Arc::new(transport),
            Handle::current(),
            SocketOptions::default(),
        ));
        socket.attach();
        let connection = server.accept().await.unwrap();
        (socket, server, connection)
    }

    pub(crate) fn collector<T: Send + 'static>()
    -> (ReceiveCallback<T>, mpsc::UnboundedReceiver<ApiResult<T>>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let callback: ReceiveCallback<T> = Arc::new(move |result| {
            let _ = sender.send(result);
        });
        (callback, receiver)
    }

    pub(crate) fn reply_to(join: &Message, status: &str, response: Value) -> Message {
        Message::reply(&join.topic, status, response)
            .with_refs(join.join_ref.clone(), join.msg_ref.clone())
    }

    #[tokio::test]
    async fn test_join_reply_and_pushes_are_parsed_alike() {
        let (socket, _server, mut connection) = connected_socket().await;
        let subscription = ChannelSubscription::<Count>::new(socket, "stream_data");
        let (on_receive, mut results) = collector();

        subscription.connect("counts", json!({"scope": "all"}), on_receive);
        let join = connection.recv().await.unwrap();
        assert_eq!(join.payload, json!({"scope": "all"}));

        connection.send(&reply_to(&join, "ok", json!({"count": 1})));
        assert_eq!(results.recv().await.unwrap(), Ok(Count { count: 1 }));

        connection.send(
            &Message::new("counts", "stream_data", json!({"count": 2}))
                .with_refs(join.join_ref.clone(), None),
        );
        assert_eq!(results.recv().await.unwrap(), Ok(Count { count: 2 }));
    }

    #[tokio::test]
    async fn test_error_outcomes() {
        let (socket, _server, mut connection) = connected_socket().await;
        let subscription = ChannelSubscription::<Count>::new(socket, "stream_data");
        let (on_receive, mut results) = collector();

        subscription.connect("counts", json!({}), on_receive.clone());
        let join = connection.recv().await.unwrap();
        connection.send(&reply_to(&join, "error", json!({"reason": "nope"})));
        assert_eq!(
            results.recv().await.unwrap(),
            Err(ApiError::Socket(SocketError::ReceivedError))
        );

        subscription.connect("counts", json!({}), on_receive);
        let join = connection.recv().await.unwrap();
        assert_eq!(join.event, events::JOIN);
        connection.send(&reply_to(&join, "ok", json!({"count": "many"})));
        assert_eq!(
            results.recv().await.unwrap(),
            Err(ApiError::Socket(SocketError::FailedToParse))
        );

        connection.send(&Message::new("counts", events::ERROR, json!({})));
        assert_eq!(
            results.recv().await.unwrap(),
            Err(ApiError::Socket(SocketError::Failure))
        );
    }

    #[tokio::test]
    async fn test_reply_without_body_is_skipped() {
        let (socket, _server, mut connection) = connected_socket().await;
        let subscription = ChannelSubscription::<Count>::new(socket, "stream_data");
        let (on_receive, mut results) = collector();

        subscription.connect("counts", json!({}), on_receive);
        let join = connection.recv().await.unwrap();
        let empty_reply = Message::new("counts", events::REPLY, json!({"status": "ok"}))
            .with_refs(join.join_ref.clone(), join.msg_ref.clone());
        connection.send(&empty_reply);
        connection.send(
            &Message::new("counts", "stream_data", json!({"count": 3}))
                .with_refs(join.join_ref.clone(), None),
        );

        assert_eq!(results.recv().await.unwrap(), Ok(Count { count: 3 }));
    }

    #[tokio::test]
    async fn test_connect_replaces_previous_channel() {
        let (socket, _server, mut connection) = connected_socket().await;
        let subscription = ChannelSubscription::<Count>::new(socket, "stream_data");
        let (on_receive, mut results) = collector();

        subscription.connect("first", json!({}), on_receive.clone());
        let first = connection.recv().await.unwrap();
        connection.send(&reply_to(&first, "ok", json!({"count": 1})));
        assert_eq!(results.recv().await.unwrap(), Ok(Count { count: 1 }));

        subscription.connect("second", json!({}), on_receive);
        assert_eq!(subscription.topic().as_deref(), Some("second"));

        let leave = connection.recv().await.unwrap();
        assert_eq!((leave.topic.as_str(), leave.event.as_str()), ("first", events::LEAVE));
        let join = connection.recv().await.unwrap();
        assert_eq!((join.topic.as_str(), join.event.as_str()), ("second", events::JOIN));

        // the old topic is no longer delivered
        connection.send(
            &Message::new("first", "stream_data", json!({"count": 9}))
                .with_refs(first.join_ref.clone(), None),
        );
        connection.send(&reply_to(&join, "ok", json!({"count": 2})));
        assert_eq!(results.recv().await.unwrap(), Ok(Count { count: 2 }));
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent_and_silences_callbacks() {
        let (socket, _server, mut connection) = connected_socket().await;
        let subscription = ChannelSubscription::<Count>::new(socket, "stream_data");
        let (on_receive, mut results) = collector();

        subscription.disconnect();
        subscription.connect("counts", json!({}), on_receive);
        let join = connection.recv().await.unwrap();
        subscription.disconnect();
        subscription.disconnect();
        assert!(!subscription.is_connected());

        // join reply arriving after disconnect is dropped
        connection.send(&reply_to(&join, "ok", json!({"count": 1})));
        let leave = connection.recv().await.unwrap();
        assert_eq!(leave.event, events::LEAVE);
        connection.send(&reply_to(&leave, "ok", json!({})));

        tokio::task::yield_now().await;
        assert!(results.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_refused_connection_fails_until_reattached() {
        let (transport, mut server) = MemoryTransport::pair();
        let transport = Arc::new(transport);
        transport.refuse_connections(true);
        let socket = Arc::new(PhoenixSocket::new(
            transport.clone(),
            Handle::current(),
            SocketOptions::default(),
        ));
        let (detached, mut detaches) = mpsc::unbounded_channel();
        socket.on_detach(Arc::new(move || {
            let _ = detached.send(());
        }));

        let subscription = ChannelSubscription::<Count>::new(socket.clone(), "stream_data");
        let (on_receive, mut results) = collector();
        subscription.connect("counts", json!({}), on_receive.clone());
        socket.attach();

        assert_eq!(
            results.recv().await.unwrap(),
            Err(ApiError::Socket(SocketError::Failure))
        );
        detaches.recv().await.unwrap();
        assert!(!socket.is_connected());

        transport.refuse_connections(false);
        socket.attach();
        subscription.connect("counts", json!({}), on_receive);
        let mut connection = server.accept().await.unwrap();
        let join = connection.recv().await.unwrap();
        assert_eq!((join.topic.as_str(), join.event.as_str()), ("counts", events::JOIN));

        connection.send(&reply_to(&join, "ok", json!({"count": 4})));
        assert_eq!(results.recv().await.unwrap(), Ok(Count { count: 4 }));
        assert!(socket.is_connected());
    }
}
