// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Channel-backed host port.
//!
//! [`ChannelHost`] lets a replica talk to a host living in the same process
//! (tests, embedders) without socket framing. The host side drains
//! [`HostRequest`]s from the receiver returned by [`ChannelHost::new`] and
//! answers each one.

use crate::{HostError, HostPort};
use async_trait::async_trait;
use pass_session_proto::{Response, WorkerMessage};
use tokio::sync::{mpsc, oneshot};

/// One request waiting for the host's answer.
#[derive(Debug)]
pub struct HostRequest {
    /// Tagged message.
    pub message: WorkerMessage,
    reply: oneshot::Sender<Response>,
}

impl HostRequest {
    /// Answers the request. A replica that stopped waiting is ignored.
    pub fn respond(self, response: Response) {
        let _ = self.reply.send(response);
    }
}

/// Host port over an in-process channel.
#[derive(Debug, Clone)]
pub struct ChannelHost {
    tx: mpsc::UnboundedSender<HostRequest>,
}

impl ChannelHost {
    /// Creates the port and the host-side inbox.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<HostRequest>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl HostPort for ChannelHost {
    async fn request(&self, message: WorkerMessage) -> Result<Response, HostError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(HostRequest { message, reply })
            .map_err(|_| HostError::Disconnected)?;
        rx.await.map_err(|_| HostError::Disconnected)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pass_session_proto::{Endpoint, Message};

    #[tokio::test]
    async fn requests_round_trip_through_the_inbox() {
        let (host, mut inbox) = ChannelHost::new();
        let server = tokio::spawn(async move {
            let request = inbox.recv().await.unwrap();
            assert_eq!(request.message.sender, Endpoint::Page);
            request.respond(Response::error("nope"));
        });
        let response = host
            .request(WorkerMessage::new(Endpoint::Page, Message::WorkerWakeup { tab_id: None }))
            .await
            .unwrap();
        assert_eq!(response, Response::error("nope"));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn dropped_inbox_reports_disconnect() {
        let (host, inbox) = ChannelHost::new();
        drop(inbox);
        let result = host
            .request(WorkerMessage::new(Endpoint::Page, Message::WorkerWakeup { tab_id: None }))
            .await;
        assert!(matches!(result, Err(HostError::Disconnected)));
    }
}
