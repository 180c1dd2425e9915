//! Backend I/O: the HTTP client and the channel protocol.

pub mod http;
pub mod memory;
pub mod message;
pub mod phoenix;
pub mod traits;
pub mod websocket;

pub use http::{BackendClient, HttpResponse};
pub use message::Message;
pub use phoenix::{PhoenixSocket, SocketOptions};
pub use traits::{
    CallbackRef, Channel, ChannelState, LifecycleCallback, MessageCallback, Push, PushStatus,
    Socket, Transport,
};
pub use websocket::WebSocketTransport;
