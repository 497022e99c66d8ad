// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Replica side of the Pass worker session: a client for the worker hub
//! over Unix sockets (CBOR-framed), the replica store that proxies actions
//! to the worker, and a channel-backed host port for in-process use.

use anyhow::Result;
use async_trait::async_trait;
use pass_session_proto::wire::{decode_frame, encode_frame, frame_len, Frame, WireError};
use pass_session_proto::{Message, Response, WorkerMessage};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

pub mod replica;
pub mod tool;

pub use replica::{ReplicaError, ReplicaStore};
pub use tool::{ChannelHost, HostRequest};

/// Failures talking to the worker.
#[derive(Debug, Error)]
pub enum HostError {
    /// The worker went away before answering.
    #[error("host disconnected")]
    Disconnected,
    /// Socket failure.
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// Frame could not be encoded.
    #[error(transparent)]
    Wire(#[from] WireError),
}

/// Request/response channel to the store host.
#[async_trait]
pub trait HostPort: Send + Sync {
    /// Sends `message` and waits for the host's answer.
    async fn request(&self, message: WorkerMessage) -> Result<Response, HostError>;
}

type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<Response>>>>;

/// Async client over Unix sockets. Responses are matched to requests by
/// frame id; pushes go to the receiver returned by [`SessionClient::connect`].
pub struct SessionClient {
    writer: Mutex<OwnedWriteHalf>,
    pending: Pending,
    next_id: AtomicU64,
    reader: JoinHandle<()>,
}

impl SessionClient {
    /// Connect to the hub at the given Unix socket path.
    pub async fn connect(path: impl AsRef<Path>) -> Result<(Self, mpsc::UnboundedReceiver<Message>)> {
        let stream = UnixStream::connect(path).await?;
        Ok(Self::from_stream(stream))
    }

    /// Wraps an already connected stream.
    pub fn from_stream(stream: UnixStream) -> (Self, mpsc::UnboundedReceiver<Message>) {
        let (read, write) = stream.into_split();
        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let (push_tx, push_rx) = mpsc::unbounded_channel();
        let reader = tokio::spawn(read_loop(read, Arc::clone(&pending), push_tx));
        let client = Self {
            writer: Mutex::new(write),
            pending,
            next_id: AtomicU64::new(1),
            reader,
        };
        (client, push_rx)
    }
}

impl Drop for SessionClient {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

#[async_trait]
impl HostPort for SessionClient {
    async fn request(&self, message: WorkerMessage) -> Result<Response, HostError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        let sent = match encode_frame(&Frame::Request { id, message }) {
            Ok(packet) => self
                .writer
                .lock()
                .await
                .write_all(&packet)
                .await
                .map_err(HostError::from),
            Err(err) => Err(err.into()),
        };
        if let Err(err) = sent {
            self.pending.lock().await.remove(&id);
            return Err(err);
        }
        rx.await.map_err(|_| HostError::Disconnected)
    }
}

/// Reads frames until the hub closes. Short reads are accumulated so a
/// split packet never desynchronizes framing.
async fn read_loop(mut read: OwnedReadHalf, pending: Pending, pushes: mpsc::UnboundedSender<Message>) {
    let mut buf = vec![0u8; 16 * 1024];
    let mut acc: Vec<u8> = Vec::with_capacity(32 * 1024);
    'conn: loop {
        let n = match read.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(err) => {
                warn!(?err, "hub read failed");
                break;
            }
        };
        acc.extend_from_slice(&buf[..n]);

        loop {
            match frame_len(&acc) {
                Ok(Some(len)) if acc.len() >= len => {}
                Ok(_) => break,
                Err(err) => {
                    warn!(?err, "bad frame header from hub");
                    break 'conn;
                }
            }
            let (frame, used) = match decode_frame(&acc) {
                Ok(decoded) => decoded,
                Err(err) => {
                    warn!(?err, "failed to decode frame from hub");
                    break 'conn;
                }
            };
            acc.drain(..used);
            match frame {
                Frame::Response { id, response } => {
                    if let Some(tx) = pending.lock().await.remove(&id) {
                        let _ = tx.send(response);
                    }
                }
                Frame::Push(message) => {
                    let _ = pushes.send(message);
                }
                Frame::Request { .. } => debug!("ignoring request frame from hub"),
            }
        }
    }
    // Dropping the senders fails every waiting request.
    pending.lock().await.clear();
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use pass_session_proto::{Endpoint, Notification};
    use tokio::task;

    async fn read_request(server: &mut UnixStream) -> (u64, WorkerMessage) {
        let mut acc = Vec::new();
        let mut buf = [0u8; 1024];
        loop {
            if let Ok(Some(len)) = frame_len(&acc) {
                if acc.len() >= len {
                    break;
                }
            }
            let n = server.read(&mut buf).await.unwrap();
            acc.extend_from_slice(&buf[..n]);
        }
        match decode_frame(&acc).unwrap().0 {
            Frame::Request { id, message } => (id, message),
            other => panic!("expected request, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn responses_split_across_writes_reach_their_request() {
        let (client_stream, mut server) = UnixStream::pair().unwrap();
        let (client, _pushes) = SessionClient::from_stream(client_stream);
        let client = Arc::new(client);

        let request = {
            let client = Arc::clone(&client);
            task::spawn(async move {
                client
                    .request(WorkerMessage::new(
                        Endpoint::Popup,
                        Message::WorkerWakeup { tab_id: None },
                    ))
                    .await
            })
        };

        let (id, message) = read_request(&mut server).await;
        assert_eq!(message.sender, Endpoint::Popup);
        let encoded = encode_frame(&Frame::Response {
            id,
            response: Response::ack(),
        })
        .unwrap();
        server.write_all(&encoded[..5]).await.unwrap();
        task::yield_now().await;
        server.write_all(&encoded[5..]).await.unwrap();

        assert_eq!(request.await.unwrap().unwrap(), Response::ack());
    }

    #[tokio::test]
    async fn pushes_are_forwarded_in_order() {
        let (client_stream, mut server) = UnixStream::pair().unwrap();
        let (_client, mut pushes) = SessionClient::from_stream(client_stream);

        let mut packet = Vec::new();
        for text in ["one", "two"] {
            packet.extend(
                encode_frame(&Frame::Push(Message::Notification(Notification::success(text))))
                    .unwrap(),
            );
        }
        server.write_all(&packet).await.unwrap();

        for text in ["one", "two"] {
            match pushes.recv().await {
                Some(Message::Notification(n)) => assert_eq!(n.text, text),
                other => panic!("expected notification, got {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn closed_hub_fails_pending_requests() {
        let (client_stream, mut server) = UnixStream::pair().unwrap();
        let (client, _pushes) = SessionClient::from_stream(client_stream);
        let client = Arc::new(client);

        let request = {
            let client = Arc::clone(&client);
            task::spawn(async move {
                client
                    .request(WorkerMessage::new(Endpoint::Page, Message::WorkerWakeup { tab_id: None }))
                    .await
            })
        };
        read_request(&mut server).await;
        drop(server);

        assert!(matches!(request.await.unwrap(), Err(HostError::Disconnected)));
    }
}
