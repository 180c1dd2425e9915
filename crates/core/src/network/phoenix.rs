//! Phoenix channels client over any [`Transport`].
//!
//! One task per connection owns the transport: it writes queued frames,
//! sends heartbeats and dispatches inbound frames to channels by topic.
//! Everything else happens on the caller's thread under short locks, and
//! callbacks always run after the lock that found them is released.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use serde_json::{Value, json};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::config::{ConfigError, DataLayerConfig};
use crate::network::message::{Message, events};
use crate::network::traits::{
    CallbackRef, Channel, ChannelState, LifecycleCallback, MessageCallback, Push, PushStatus,
    Socket, Transport,
};
use crate::network::websocket::WebSocketTransport;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

#[derive(Clone, Debug)]
pub struct SocketOptions {
    pub push_timeout: Duration,
    pub heartbeat_interval: Duration,
}

impl Default for SocketOptions {
    fn default() -> Self {
        Self {
            push_timeout: Duration::from_secs(10),
            heartbeat_interval: Duration::from_secs(30),
        }
    }
}

impl From<&DataLayerConfig> for SocketOptions {
    fn from(config: &DataLayerConfig) -> Self {
        Self {
            push_timeout: config.push_timeout(),
            heartbeat_interval: config.heartbeat_interval(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Connection {
    Disconnected,
    Connecting,
    Connected,
}

struct SocketState {
    connection: Connection,
    /// Bumped on every attach and detach so a finished connection task can
    /// tell it has been superseded.
    generation: u64,
    outbound: Option<mpsc::UnboundedSender<String>>,
    shutdown: Option<oneshot::Sender<()>>,
    /// Frames pushed while not connected, flushed on connect.
    buffer: Vec<String>,
    next_ref: u64,
    next_callback: u64,
    on_attach: Vec<(CallbackRef, LifecycleCallback)>,
    on_detach: Vec<(CallbackRef, LifecycleCallback)>,
    channels: Vec<Arc<PhoenixChannel>>,
}

struct SocketInner {
    transport: Arc<dyn Transport>,
    runtime: Handle,
    options: SocketOptions,
    state: Mutex<SocketState>,
}

pub struct PhoenixSocket {
    inner: Arc<SocketInner>,
}

impl PhoenixSocket {
    pub fn new(transport: Arc<dyn Transport>, runtime: Handle, options: SocketOptions) -> Self {
        Self {
            inner: Arc::new(SocketInner {
                transport,
                runtime,
                options,
                state: Mutex::new(SocketState {
                    connection: Connection::Disconnected,
                    generation: 0,
                    outbound: None,
                    shutdown: None,
                    buffer: Vec::new(),
                    next_ref: 0,
                    next_callback: 0,
                    on_attach: Vec::new(),
                    on_detach: Vec::new(),
                    channels: Vec::new(),
                }),
            }),
        }
    }

    /// Socket over a websocket to the configured endpoint. Nothing connects
    /// until [`Socket::attach`].
    pub fn from_config(config: &DataLayerConfig, runtime: Handle) -> Result<Self, ConfigError> {
        let transport = WebSocketTransport::new(&config.socket_url()?);
        Ok(Self::new(Arc::new(transport), runtime, SocketOptions::from(config)))
    }

    pub fn is_connected(&self) -> bool {
        lock(&self.inner.state).connection == Connection::Connected
    }
}

impl Drop for PhoenixSocket {
    fn drop(&mut self) {
        self.detach();
    }
}

impl Socket for PhoenixSocket {
    fn attach(&self) {
        let mut state = lock(&self.inner.state);
        if state.connection != Connection::Disconnected {
            return;
        }
        state.connection = Connection::Connecting;
        state.generation += 1;
        let generation = state.generation;
        let (shutdown, shutdown_rx) = oneshot::channel();
        state.shutdown = Some(shutdown);
        drop(state);

        info!("socket attaching");
        self.inner
            .runtime
            .spawn(run_connection(self.inner.clone(), generation, shutdown_rx));
    }

    fn detach(&self) {
        let (shutdown, on_detach, channels) = {
            let mut state = lock(&self.inner.state);
            if state.connection == Connection::Disconnected {
                return;
            }
            state.connection = Connection::Disconnected;
            state.generation += 1;
            state.outbound = None;
            state.buffer.clear();
            (
                state.shutdown.take(),
                callbacks(&state.on_detach),
                state.channels.clone(),
            )
        };

        if let Some(shutdown) = shutdown {
            let _ = shutdown.send(());
        }
        info!("socket detached");
        for callback in on_detach {
            callback();
        }
        for channel in channels {
            channel.handle_socket_failure();
        }
    }

    fn on_attach(&self, callback: LifecycleCallback) -> CallbackRef {
        let mut state = lock(&self.inner.state);
        state.next_callback += 1;
        let reference = CallbackRef(state.next_callback);
        state.on_attach.push((reference, callback));
        reference
    }

    fn on_detach(&self, callback: LifecycleCallback) -> CallbackRef {
        let mut state = lock(&self.inner.state);
        state.next_callback += 1;
        let reference = CallbackRef(state.next_callback);
        state.on_detach.push((reference, callback));
        reference
    }

    fn off(&self, callback: CallbackRef) {
        let mut state = lock(&self.inner.state);
        state.on_attach.retain(|(reference, _)| *reference != callback);
        state.on_detach.retain(|(reference, _)| *reference != callback);
    }

    fn get_channel(&self, topic: &str, params: Value) -> Arc<dyn Channel> {
        let channel = Arc::new_cyclic(|me| PhoenixChannel {
            topic: topic.to_string(),
            params,
            socket: Arc::downgrade(&self.inner),
            me: me.clone(),
            shared: Mutex::new(ChannelShared::new()),
        });
        self.inner.register(&channel);
        channel
    }
}

fn callbacks(entries: &[(CallbackRef, LifecycleCallback)]) -> Vec<LifecycleCallback> {
    entries.iter().map(|(_, callback)| callback.clone()).collect()
}

async fn run_connection(
    inner: Arc<SocketInner>,
    generation: u64,
    mut shutdown: oneshot::Receiver<()>,
) {
    let connected = tokio::select! {
        connected = inner.transport.connect() => connected,
        _ = &mut shutdown => return,
    };
    let (mut sender, mut receiver) = match connected {
        Ok(connection) => connection,
        Err(error) => {
            error!(%error, "socket connection failed");
            inner.handle_close(generation);
            return;
        }
    };

    let (outbound, mut frames) = mpsc::unbounded_channel();
    let Some(on_attach) = inner.handle_open(generation, outbound) else {
        let _ = sender.close().await;
        return;
    };
    info!("socket connected");
    for callback in on_attach {
        callback();
    }

    let period = inner.options.heartbeat_interval;
    let mut heartbeat = tokio::time::interval_at(Instant::now() + period, period);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                let _ = sender.close().await;
                return;
            }
            incoming = receiver.recv() => match incoming {
                Some(Ok(text)) => inner.dispatch(&text),
                Some(Err(error)) => {
                    error!(%error, "socket receive failed");
                    break;
                }
                None => {
                    info!("socket closed by server");
                    break;
                }
            },
            Some(frame) = frames.recv() => {
                if let Err(error) = sender.send(frame).await {
                    error!(%error, "socket send failed");
                    break;
                }
            }
            _ = heartbeat.tick() => {
                if let Err(error) = sender.send(inner.heartbeat_frame()).await {
                    error!(%error, "heartbeat failed");
                    break;
                }
            }
        }
    }

    inner.handle_close(generation);
}

impl SocketInner {
    fn make_ref(&self) -> String {
        let mut state = lock(&self.state);
        state.next_ref += 1;
        state.next_ref.to_string()
    }

    fn register(&self, channel: &Arc<PhoenixChannel>) {
        let mut state = lock(&self.state);
        if !state.channels.iter().any(|c| Arc::ptr_eq(c, channel)) {
            state.channels.push(channel.clone());
        }
    }

    fn remove_channel(&self, channel: &PhoenixChannel) {
        lock(&self.state)
            .channels
            .retain(|c| !std::ptr::eq(c.as_ref(), channel));
    }

    fn send(&self, message: &Message) {
        let frame = message.encode();
        debug!(topic = %message.topic, event = %message.event, "push");

        let mut state = lock(&self.state);
        if state.connection == Connection::Connected {
            if let Some(outbound) = &state.outbound {
                if outbound.send(frame).is_err() {
                    warn!("socket writer is gone, dropping frame");
                }
                return;
            }
        }
        state.buffer.push(frame);
    }

    fn heartbeat_frame(&self) -> String {
        Message::new(events::PHOENIX_TOPIC, events::HEARTBEAT, json!({}))
            .with_refs(None, Some(self.make_ref()))
            .encode()
    }

    /// Resolve `push` as timed out unless a reply arrives first.
    fn schedule_timeout(
        &self,
        channel: Weak<PhoenixChannel>,
        push_ref: String,
        push: Arc<PhoenixPush>,
    ) {
        let timeout = self.options.push_timeout;
        self.runtime.spawn(async move {
            tokio::time::sleep(timeout).await;
            match channel.upgrade() {
                Some(channel) => channel.handle_timeout(&push_ref, &push),
                None => {
                    push.resolve(PushStatus::Timeout, timeout_reply("", &push_ref));
                }
            }
        });
    }

    fn handle_open(
        &self,
        generation: u64,
        outbound: mpsc::UnboundedSender<String>,
    ) -> Option<Vec<LifecycleCallback>> {
        let mut state = lock(&self.state);
        if state.generation != generation {
            return None;
        }
        state.connection = Connection::Connected;
        for frame in state.buffer.drain(..) {
            let _ = outbound.send(frame);
        }
        state.outbound = Some(outbound);
        Some(callbacks(&state.on_attach))
    }

    fn handle_close(&self, generation: u64) {
        let (on_detach, channels) = {
            let mut state = lock(&self.state);
            if state.generation != generation {
                return;
            }
            state.connection = Connection::Disconnected;
            state.outbound = None;
            state.shutdown = None;
            state.buffer.clear();
            (callbacks(&state.on_detach), state.channels.clone())
        };

        for callback in on_detach {
            callback();
        }
        for channel in channels {
            channel.handle_socket_failure();
        }
    }

    fn dispatch(&self, text: &str) {
        let message = match Message::decode(text) {
            Ok(message) => message,
            Err(error) => {
                warn!(%error, "dropping malformed frame");
                return;
            }
        };
        if message.topic == events::PHOENIX_TOPIC {
            return;
        }

        let channels: Vec<_> = lock(&self.state)
            .channels
            .iter()
            .filter(|channel| channel.topic == message.topic)
            .cloned()
            .collect();
        if channels.is_empty() {
            debug!(topic = %message.topic, event = %message.event, "no channel for frame");
        }
        for channel in channels {
            channel.handle_message(&message);
        }
    }
}

fn timeout_reply(topic: &str, push_ref: &str) -> Message {
    Message::reply(topic, PushStatus::Timeout.as_str(), json!({}))
        .with_refs(None, Some(push_ref.to_string()))
}

struct ChannelShared {
    state: ChannelState,
    join_ref: Option<String>,
    join_push: Option<Arc<PhoenixPush>>,
    leave_push: Option<Arc<PhoenixPush>>,
    bindings: Vec<(String, MessageCallback)>,
    on_failure: Vec<MessageCallback>,
    on_detach: Vec<MessageCallback>,
    /// Pushes awaiting a reply, by ref.
    pending: HashMap<String, Arc<PhoenixPush>>,
}

impl ChannelShared {
    fn new() -> Self {
        Self {
            state: ChannelState::Unjoined,
            join_ref: None,
            join_push: None,
            leave_push: None,
            bindings: Vec::new(),
            on_failure: Vec::new(),
            on_detach: Vec::new(),
            pending: HashMap::new(),
        }
    }
}

pub struct PhoenixChannel {
    topic: String,
    params: Value,
    socket: Weak<SocketInner>,
    me: Weak<PhoenixChannel>,
    shared: Mutex<ChannelShared>,
}

impl PhoenixChannel {
    fn handle_message(&self, message: &Message) {
        if message.is_reply() {
            self.handle_reply(message);
            return;
        }

        match message.event.as_str() {
            events::ERROR => {
                if self.is_current(message) {
                    self.fail(message);
                }
            }
            events::CLOSE => {
                if self.is_current(message) {
                    self.finish(message);
                }
            }
            _ => {
                let handlers: Vec<MessageCallback> = {
                    let shared = lock(&self.shared);
                    if shared.state != ChannelState::Joined || !is_current(&shared, message) {
                        return;
                    }
                    shared
                        .bindings
                        .iter()
                        .filter(|(event, _)| *event == message.event)
                        .map(|(_, callback)| callback.clone())
                        .collect()
                };
                for handler in handlers {
                    handler(message);
                }
            }
        }
    }

    fn is_current(&self, message: &Message) -> bool {
        is_current(&lock(&self.shared), message)
    }

    fn handle_reply(&self, message: &Message) {
        let Some(msg_ref) = &message.msg_ref else {
            return;
        };
        let status = PushStatus::from_reply(message.status());

        let push = {
            let mut shared = lock(&self.shared);
            let Some(push) = shared.pending.remove(msg_ref) else {
                return;
            };
            if shared.join_ref.as_ref() == Some(msg_ref) && shared.state == ChannelState::Joining {
                if status == PushStatus::Ok {
                    info!(topic = %self.topic, "joined channel");
                    shared.state = ChannelState::Joined;
                } else {
                    warn!(topic = %self.topic, ?status, "join rejected");
                    shared.state = ChannelState::JoinFailed;
                }
            }
            push
        };
        push.resolve(status, message.clone());
    }

    fn handle_timeout(&self, push_ref: &str, push: &PhoenixPush) {
        {
            let mut shared = lock(&self.shared);
            if shared.pending.remove(push_ref).is_none() {
                return;
            }
            if shared.join_ref.as_deref() == Some(push_ref) && shared.state == ChannelState::Joining
            {
                warn!(topic = %self.topic, "join timed out");
                shared.state = ChannelState::JoinFailed;
            }
        }
        push.resolve(PushStatus::Timeout, timeout_reply(&self.topic, push_ref));
    }

    fn handle_socket_failure(&self) {
        let join_ref = lock(&self.shared).join_ref.clone();
        let message = Message::new(&self.topic, events::ERROR, json!({})).with_refs(join_ref, None);
        self.fail(&message);
    }

    fn fail(&self, message: &Message) {
        let callbacks = {
            let mut shared = lock(&self.shared);
            if !matches!(shared.state, ChannelState::Joining | ChannelState::Joined) {
                return;
            }
            shared.state = ChannelState::JoinFailed;
            shared.on_failure.clone()
        };
        warn!(topic = %self.topic, "channel failed");
        for callback in callbacks {
            callback(message);
        }
    }

    /// The channel is done with its topic, by leave reply, leave timeout or
    /// server close.
    fn finish(&self, message: &Message) {
        let callbacks = {
            let mut shared = lock(&self.shared);
            if shared.state == ChannelState::Left {
                return;
            }
            shared.state = ChannelState::Left;
            shared.leave_push = None;
            shared.on_detach.clone()
        };
        if let Some(socket) = self.socket.upgrade() {
            socket.remove_channel(self);
        }
        info!(topic = %self.topic, "left channel");
        for callback in callbacks {
            callback(message);
        }
    }
}

fn is_current(shared: &ChannelShared, message: &Message) -> bool {
    match &message.join_ref {
        Some(join_ref) => shared.join_ref.as_ref() == Some(join_ref),
        None => true,
    }
}

impl Channel for PhoenixChannel {
    fn topic(&self) -> &str {
        &self.topic
    }

    fn state(&self) -> ChannelState {
        lock(&self.shared).state
    }

    fn on_event(&self, event: &str, callback: MessageCallback) {
        lock(&self.shared).bindings.push((event.to_string(), callback));
    }

    fn on_failure(&self, callback: MessageCallback) {
        lock(&self.shared).on_failure.push(callback);
    }

    fn on_detach(&self, callback: MessageCallback) {
        lock(&self.shared).on_detach.push(callback);
    }

    fn attach(&self) -> Arc<dyn Push> {
        let Some(socket) = self.socket.upgrade() else {
            return PhoenixPush::resolved(
                PushStatus::Error,
                Message::reply(&self.topic, "error", json!({"reason": "socket closed"})),
            );
        };

        let (push, join_ref) = {
            let mut shared = lock(&self.shared);
            if matches!(shared.state, ChannelState::Joining | ChannelState::Joined) {
                if let Some(push) = &shared.join_push {
                    return push.clone();
                }
            }
            let join_ref = socket.make_ref();
            let push = Arc::new(PhoenixPush::new());
            shared.state = ChannelState::Joining;
            shared.join_ref = Some(join_ref.clone());
            shared.join_push = Some(push.clone());
            shared.pending.insert(join_ref.clone(), push.clone());
            (push, join_ref)
        };

        if let Some(me) = self.me.upgrade() {
            socket.register(&me);
        }
        info!(topic = %self.topic, "joining channel");
        socket.send(
            &Message::new(&self.topic, events::JOIN, self.params.clone())
                .with_refs(Some(join_ref.clone()), Some(join_ref.clone())),
        );
        socket.schedule_timeout(self.me.clone(), join_ref, push.clone());
        push
    }

    fn detach(&self) -> Arc<dyn Push> {
        let ok = || {
            PhoenixPush::resolved(
                PushStatus::Ok,
                Message::reply(&self.topic, "ok", json!({})),
            )
        };
        let socket = self.socket.upgrade();

        let (push, leave_ref, join_ref, socket) = {
            let mut shared = lock(&self.shared);
            match shared.state {
                ChannelState::Joining | ChannelState::Joined => {}
                ChannelState::Leaving => {
                    if let Some(push) = &shared.leave_push {
                        return push.clone();
                    }
                    return ok();
                }
                ChannelState::Unjoined | ChannelState::JoinFailed | ChannelState::Left => {
                    shared.state = ChannelState::Left;
                    drop(shared);
                    if let Some(socket) = socket {
                        socket.remove_channel(self);
                    }
                    return ok();
                }
            }
            let Some(socket) = socket else {
                shared.state = ChannelState::Left;
                return ok();
            };

            let leave_ref = socket.make_ref();
            let push = Arc::new(PhoenixPush::new());
            shared.state = ChannelState::Leaving;
            shared.leave_push = Some(push.clone());
            shared.pending.insert(leave_ref.clone(), push.clone());
            (push, leave_ref, shared.join_ref.clone(), socket)
        };

        for status in [PushStatus::Ok, PushStatus::Error, PushStatus::Timeout] {
            let me = self.me.clone();
            push.receive(
                status,
                Arc::new(move |message| {
                    if let Some(channel) = me.upgrade() {
                        channel.finish(message);
                    }
                }),
            );
        }

        info!(topic = %self.topic, "leaving channel");
        socket.send(
            &Message::new(&self.topic, events::LEAVE, json!({}))
                .with_refs(join_ref, Some(leave_ref.clone())),
        );
        socket.schedule_timeout(self.me.clone(), leave_ref, push.clone());
        push
    }
}

struct PushShared {
    resolved: Option<(PushStatus, Message)>,
    callbacks: Vec<(PushStatus, MessageCallback)>,
}

pub struct PhoenixPush {
    shared: Mutex<PushShared>,
}

impl PhoenixPush {
    fn new() -> Self {
        Self {
            shared: Mutex::new(PushShared {
                resolved: None,
                callbacks: Vec::new(),
            }),
        }
    }

    fn resolved(status: PushStatus, message: Message) -> Arc<Self> {
        let push = Arc::new(Self::new());
        push.resolve(status, message);
        push
    }

    pub fn status(&self) -> Option<PushStatus> {
        lock(&self.shared).resolved.as_ref().map(|(status, _)| *status)
    }

    /// First resolution wins; returns whether this call resolved the push.
    fn resolve(&self, status: PushStatus, message: Message) -> bool {
        let callbacks: Vec<MessageCallback> = {
            let mut guard = lock(&self.shared);
            let shared = &mut *guard;
            if shared.resolved.is_some() {
                return false;
            }
            let callbacks = shared
                .callbacks
                .drain(..)
                .filter(|(expected, _)| *expected == status)
                .map(|(_, callback)| callback)
                .collect();
            shared.resolved = Some((status, message.clone()));
            callbacks
        };
        for callback in callbacks {
            callback(&message);
        }
        true
    }
}

impl Push for PhoenixPush {
    fn receive(&self, status: PushStatus, callback: MessageCallback) -> &dyn Push {
        let resolved = {
            let mut guard = lock(&self.shared);
            let shared = &mut *guard;
            match &shared.resolved {
                Some((resolved, message)) if *resolved == status => Some(message.clone()),
                Some(_) => None,
                None => {
                    shared.callbacks.push((status, callback.clone()));
                    None
                }
            }
        };
        if let Some(message) = resolved {
            callback(&message);
        }
        self
    }
}
