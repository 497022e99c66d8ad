// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Message broker: handler registry, connected ports and the wakeup buffer.

use futures::future::BoxFuture;
use pass_session_proto::{ConnectionKey, Message, MessageType, Notification, Response, WorkerMessage};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};

/// Boxed async handler for one message type.
pub type Handler = Arc<dyn Fn(WorkerMessage) -> BoxFuture<'static, Response> + Send + Sync>;

/// Broker errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BrokerError {
    /// A handler is already registered for the message type.
    #[error("handler already registered for {0}")]
    DuplicateHandler(MessageType),
}

/// One handler per message type.
#[derive(Default)]
pub struct MessageRegistry {
    handlers: HashMap<MessageType, Handler>,
}

impl MessageRegistry {
    /// Registers `handler` for `kind`. Registering twice is an error.
    pub fn register<F>(&mut self, kind: MessageType, handler: F) -> Result<(), BrokerError>
    where
        F: Fn(WorkerMessage) -> BoxFuture<'static, Response> + Send + Sync + 'static,
    {
        if self.handlers.contains_key(&kind) {
            return Err(BrokerError::DuplicateHandler(kind));
        }
        self.handlers.insert(kind, Arc::new(handler));
        Ok(())
    }

    /// Handler for `kind`, if any.
    pub fn handler(&self, kind: MessageType) -> Option<Handler> {
        self.handlers.get(&kind).cloned()
    }

    /// Drops every handler.
    pub fn clear(&mut self) {
        self.handlers.clear();
    }
}

/// Identifies one connection behind a [`ConnectionKey`], so a stale
/// connection closing late cannot unregister its replacement.
pub type PortId = u64;

struct Port {
    id: PortId,
    tx: mpsc::UnboundedSender<Message>,
}

/// Connected replicas.
#[derive(Default)]
pub struct Ports {
    next_id: PortId,
    ports: HashMap<ConnectionKey, Port>,
}

impl Ports {
    /// Registers `tx` under `key`, replacing any previous connection.
    pub fn connect(&mut self, key: ConnectionKey, tx: mpsc::UnboundedSender<Message>) -> PortId {
        let id = self.next_id;
        self.next_id += 1;
        if self.ports.insert(key, Port { id, tx }).is_some() {
            debug!(%key, "replacing port");
        }
        id
    }

    /// Unregisters `key` if it still belongs to connection `id`.
    pub fn disconnect(&mut self, key: &ConnectionKey, id: PortId) {
        if self.ports.get(key).is_some_and(|port| port.id == id) {
            self.ports.remove(key);
        }
    }

    /// Sends to one port. Closed ports are dropped.
    pub fn send(&mut self, key: &ConnectionKey, message: Message) -> bool {
        let Some(port) = self.ports.get(key) else {
            return false;
        };
        if port.tx.send(message).is_err() {
            self.ports.remove(key);
            return false;
        }
        true
    }

    /// Sends to every port matching `filter`; returns the delivery count.
    pub fn broadcast(&mut self, message: &Message, filter: impl Fn(&ConnectionKey) -> bool) -> usize {
        let mut delivered = 0;
        self.ports.retain(|key, port| {
            if !filter(key) {
                return true;
            }
            if port.tx.send(message.clone()).is_ok() {
                delivered += 1;
                true
            } else {
                false
            }
        });
        delivered
    }

    /// Whether any open port matches `filter`.
    pub fn has(&self, filter: impl Fn(&ConnectionKey) -> bool) -> bool {
        self.ports
            .iter()
            .any(|(key, port)| filter(key) && !port.tx.is_closed())
    }

    /// Number of registered ports.
    pub fn len(&self) -> usize {
        self.ports.len()
    }

    /// Whether no port is registered.
    pub fn is_empty(&self) -> bool {
        self.ports.is_empty()
    }

    fn clear(&mut self) {
        self.ports.clear();
    }
}

/// Messages held for replicas that are not connected yet.
#[derive(Debug)]
pub struct MessageBuffer {
    queue: VecDeque<Message>,
    limit: usize,
}

impl MessageBuffer {
    /// Buffer keeping at most `limit` messages, the oldest going first.
    /// A zero limit keeps everything.
    pub fn new(limit: usize) -> Self {
        Self {
            queue: VecDeque::new(),
            limit,
        }
    }

    /// Appends a message.
    pub fn push(&mut self, message: Message) {
        if self.limit > 0 && self.queue.len() == self.limit {
            if let Some(dropped) = self.queue.pop_front() {
                warn!(kind = ?dropped.kind(), limit = self.limit, "buffer full, dropping oldest message");
            }
        }
        self.queue.push_back(message);
    }

    /// Drains the buffer, oldest first. A second flush returns nothing.
    pub fn flush(&mut self) -> Vec<Message> {
        self.queue.drain(..).collect()
    }

    /// Number of buffered messages.
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Whether nothing is buffered.
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

/// Registry, ports and buffer behind one handle.
pub struct Broker {
    registry: Mutex<MessageRegistry>,
    ports: Mutex<Ports>,
    buffer: Mutex<MessageBuffer>,
}

impl Broker {
    /// Empty broker buffering up to `buffer_limit` messages.
    pub fn new(buffer_limit: usize) -> Self {
        Self {
            registry: Mutex::new(MessageRegistry::default()),
            ports: Mutex::new(Ports::default()),
            buffer: Mutex::new(MessageBuffer::new(buffer_limit)),
        }
    }

    /// Registers the handler of a message type.
    pub async fn register_message<F>(&self, kind: MessageType, handler: F) -> Result<(), BrokerError>
    where
        F: Fn(WorkerMessage) -> BoxFuture<'static, Response> + Send + Sync + 'static,
    {
        self.registry.lock().await.register(kind, handler)
    }

    /// Routes a message to its handler. Unknown types get an error response.
    pub async fn handle(&self, message: WorkerMessage) -> Response {
        let kind = message.message.kind();
        let handler = self.registry.lock().await.handler(kind);
        match handler {
            Some(handler) => handler(message).await,
            None => {
                warn!(%kind, sender = %message.sender, "no handler registered");
                Response::error(format!("unsupported message type {kind}"))
            }
        }
    }

    /// Registers a replica's outbound channel.
    pub async fn connect(&self, key: ConnectionKey, tx: mpsc::UnboundedSender<Message>) -> PortId {
        debug!(%key, "port connected");
        self.ports.lock().await.connect(key, tx)
    }

    /// Unregisters a replica's outbound channel.
    pub async fn disconnect(&self, key: &ConnectionKey, id: PortId) {
        debug!(%key, "port disconnected");
        self.ports.lock().await.disconnect(key, id);
    }

    /// Sends to one replica.
    pub async fn send(&self, key: &ConnectionKey, message: Message) -> bool {
        self.ports.lock().await.send(key, message)
    }

    /// Sends to every connected replica.
    pub async fn broadcast(&self, message: Message) -> usize {
        self.ports.lock().await.broadcast(&message, |_| true)
    }

    /// Sends to every replica whose key starts with `prefix`.
    pub async fn multicast(&self, message: Message, prefix: &str) -> usize {
        self.ports
            .lock()
            .await
            .broadcast(&message, |key| key.matches_prefix(prefix))
    }

    /// Whether a replica matching `prefix` is connected.
    pub async fn has_port(&self, prefix: &str) -> bool {
        self.ports.lock().await.has(|key| key.matches_prefix(prefix))
    }

    /// Delivers a notification to its target endpoint (every endpoint when
    /// untargeted), buffering it when nobody is there to show it.
    pub async fn notify(&self, notification: Notification) {
        let target = notification.target;
        let message = Message::Notification(notification);
        let delivered = self
            .ports
            .lock()
            .await
            .broadcast(&message, |key| target.is_none_or(|t| key.endpoint == t));
        if delivered == 0 {
            self.buffer.lock().await.push(message);
        }
    }

    /// Broadcasts `message`, buffering it when no replica is connected.
    pub async fn publish(&self, message: Message) {
        let delivered = self.ports.lock().await.broadcast(&message, |_| true);
        if delivered == 0 {
            self.buffer.lock().await.push(message);
        }
    }

    /// Drains the buffer.
    pub async fn flush(&self) -> Vec<Message> {
        self.buffer.lock().await.flush()
    }

    /// Drops handlers and ports. Handlers may hold the worker alive, so
    /// this has to run before the worker can be freed.
    pub async fn shutdown(&self) {
        self.registry.lock().await.clear();
        self.ports.lock().await.clear();
    }
}
