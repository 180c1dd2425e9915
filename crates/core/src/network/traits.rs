//! Transport-agnostic publish/subscribe channel protocol.
//!
//! A [`Socket`] multiplexes many topic [`Channel`]s over one connection. Each
//! outbound message is a [`Push`] that resolves exactly once with a
//! [`PushStatus`]. Implementations are expected to invoke callbacks outside
//! of any internal lock, so a callback may call back into the socket.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::Value;

use crate::error::TransportError;
use crate::network::message::Message;

pub type MessageCallback = Arc<dyn Fn(&Message) + Send + Sync>;
pub type LifecycleCallback = Arc<dyn Fn() + Send + Sync>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PushStatus {
    Ok,
    Error,
    Timeout,
}

impl PushStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PushStatus::Ok => "ok",
            PushStatus::Error => "error",
            PushStatus::Timeout => "timeout",
        }
    }

    /// The status carried in a reply payload. Anything unrecognized counts
    /// as an error.
    pub fn from_reply(status: Option<&str>) -> Self {
        match status {
            Some("ok") => PushStatus::Ok,
            Some("timeout") => PushStatus::Timeout,
            _ => PushStatus::Error,
        }
    }
}

/// Membership of a channel in its topic.
///
/// `Unjoined -> Joining -> Joined | JoinFailed`, then
/// `Joined -> Leaving -> Left`. Attaching again after `Left` or `JoinFailed`
/// starts a new join.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChannelState {
    Unjoined,
    Joining,
    Joined,
    JoinFailed,
    Leaving,
    Left,
}

/// Handle for removing a lifecycle callback with [`Socket::off`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CallbackRef(pub(crate) u64);

pub trait Socket: Send + Sync {
    /// Open the connection. No-op while already connecting or connected.
    fn attach(&self);

    /// Close the connection. No automatic reconnect follows.
    fn detach(&self);

    fn on_attach(&self, callback: LifecycleCallback) -> CallbackRef;

    fn on_detach(&self, callback: LifecycleCallback) -> CallbackRef;

    fn off(&self, callback: CallbackRef);

    /// Create a channel for `topic`. The channel is not joined until
    /// [`Channel::attach`] is called.
    fn get_channel(&self, topic: &str, params: Value) -> Arc<dyn Channel>;
}

pub trait Channel: Send + Sync {
    fn topic(&self) -> &str;

    fn state(&self) -> ChannelState;

    /// Every handler registered for `event` runs, in registration order.
    fn on_event(&self, event: &str, callback: MessageCallback);

    /// Channel error from the server, or the socket going away under it.
    fn on_failure(&self, callback: MessageCallback);

    /// The channel has left its topic.
    fn on_detach(&self, callback: MessageCallback);

    /// Join the topic. Returns the in-flight join push if already joining or
    /// joined.
    fn attach(&self) -> Arc<dyn Push>;

    /// Leave the topic. Event delivery stops before this returns. When not
    /// joined or joining, nothing is sent and the returned push is already
    /// `Ok`.
    fn detach(&self) -> Arc<dyn Push>;
}

pub trait Push: Send + Sync {
    /// Register `callback` for `status`. If the push already resolved with
    /// that status the callback runs immediately.
    fn receive(&self, status: PushStatus, callback: MessageCallback) -> &dyn Push;
}

pub type TransportFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

pub type Connection = (Box<dyn TransportSender>, Box<dyn TransportReceiver>);

/// Raw text-frame connection the socket runs its protocol over.
pub trait Transport: Send + Sync {
    fn connect(&self) -> TransportFuture<'_, Result<Connection, TransportError>>;
}

pub trait TransportSender: Send {
    fn send(&mut self, text: String) -> TransportFuture<'_, Result<(), TransportError>>;

    fn close(&mut self) -> TransportFuture<'_, Result<(), TransportError>>;
}

pub trait TransportReceiver: Send {
    /// Next text frame; `None` once the connection is closed.
    fn recv(&mut self) -> TransportFuture<'_, Option<Result<String, TransportError>>>;
}
