// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Replica store and proxy middleware.
//!
//! A replica runs the same reducer pipeline as the worker. Synchronous
//! actions are applied locally at dispatch; every dispatched action is
//! forwarded to the worker, which broadcasts the canonical action order
//! back. Broadcast actions the replica already applied (the synchronous
//! ones) are skipped on receipt.

use crate::{HostError, HostPort};
use pass_app_core::toast::ToastService;
use pass_session_proto::{
    ConnectionKey, Endpoint, Message, Response, ResponsePayload, ShareServerEvent, WorkerMessage,
    WorkerState,
};
use pass_store::action::{wakeup_intent, wakeup_success};
use pass_store::{Envelope, RootReducer, State, StoreError};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, instrument, warn};

/// Toasts kept per replica.
const TOAST_CAPACITY: usize = 16;

/// Replica request failures.
#[derive(Debug, Error)]
pub enum ReplicaError {
    /// Transport failure; the replica is now stale.
    #[error(transparent)]
    Host(#[from] HostError),
    /// The worker refused the request.
    #[error("rejected by worker: {0}")]
    Rejected(String),
    /// The worker answered with the wrong payload.
    #[error("unexpected response: {0:?}")]
    Unexpected(Box<Response>),
}

/// Local mirror of the worker store for one UI context.
pub struct ReplicaStore {
    endpoint: Endpoint,
    tab_id: Option<u32>,
    state: State,
    reducer: RootReducer,
    host: Arc<dyn HostPort>,
    worker: WorkerState,
    stale: bool,
    toasts: ToastService,
    share_events: VecDeque<ShareServerEvent>,
}

impl ReplicaStore {
    /// Builds a replica for `endpoint`. It starts stale until its first
    /// wakeup.
    pub fn new(
        endpoint: Endpoint,
        tab_id: Option<u32>,
        host: Arc<dyn HostPort>,
    ) -> Result<Self, StoreError> {
        Ok(Self {
            endpoint,
            tab_id,
            state: State::default(),
            reducer: RootReducer::new()?,
            host,
            worker: WorkerState::default(),
            stale: true,
            toasts: ToastService::new(TOAST_CAPACITY),
            share_events: VecDeque::new(),
        })
    }

    /// Connection key the worker addresses this replica with.
    pub fn key(&self) -> ConnectionKey {
        ConnectionKey {
            endpoint: self.endpoint,
            tab_id: self.tab_id,
        }
    }

    /// Local state.
    pub fn state(&self) -> &State {
        &self.state
    }

    /// Last worker status seen.
    pub fn worker_state(&self) -> &WorkerState {
        &self.worker
    }

    /// Whether local state can no longer be trusted and a wakeup is due.
    pub fn is_stale(&self) -> bool {
        self.stale
    }

    /// Notification queue.
    pub fn toasts(&self) -> &ToastService {
        &self.toasts
    }

    /// Mutable notification queue, for dismissal and expiry.
    pub fn toasts_mut(&mut self) -> &mut ToastService {
        &mut self.toasts
    }

    fn apply(&mut self, envelope: &Envelope) {
        self.reducer.reduce(&mut self.state, envelope);
    }

    /// Stamps the sender, applies synchronous actions locally and forwards
    /// the action to the worker. A failed forward marks the replica stale.
    #[instrument(skip_all, fields(action = envelope.action.name()))]
    pub async fn dispatch(&mut self, envelope: Envelope) {
        let envelope = envelope.with_sender(self.endpoint);
        if envelope.action.is_synchronous() {
            self.apply(&envelope);
        }
        let message = WorkerMessage::new(self.endpoint, Message::store_action(envelope));
        match self.host.request(message).await {
            Ok(Response::Success { .. }) => {}
            Ok(Response::Error { error }) => {
                warn!(%error, "worker rejected action");
                self.stale = true;
            }
            Err(err) => {
                warn!(?err, "forward failed, replica is stale");
                self.stale = true;
            }
        }
    }

    /// Applies one message pushed by the worker.
    pub fn receive(&mut self, message: Message) {
        match message {
            Message::StoreAction { action } => {
                if !action.action.is_synchronous() {
                    self.apply(&action);
                }
            }
            Message::WorkerStatus { state } => self.worker = state,
            Message::Notification(notification) => {
                if notification.target.is_none_or(|t| t == self.endpoint) {
                    self.toasts.push(notification, Instant::now());
                }
            }
            Message::ShareServerEvent(event) => self.share_events.push_back(event),
            Message::WorkerWakeup { .. } | Message::Unlock { .. } => {
                debug!("ignoring request pushed to replica");
            }
        }
    }

    /// Applies every message already waiting in `inbox`. Returns how many
    /// were applied.
    pub fn receive_pending(&mut self, inbox: &mut mpsc::UnboundedReceiver<Message>) -> usize {
        let mut applied = 0;
        while let Ok(message) = inbox.try_recv() {
            self.receive(message);
            applied += 1;
        }
        applied
    }

    /// Share signals received since the last drain, oldest first.
    pub fn drain_share_events(&mut self) -> Vec<ShareServerEvent> {
        self.share_events.drain(..).collect()
    }

    /// Wakeup handshake: boots the worker if needed, mirrors its status and
    /// replays the messages buffered while no replica was listening.
    #[instrument(skip(self), fields(key = %self.key()))]
    pub async fn wakeup(&mut self) -> Result<WorkerState, ReplicaError> {
        self.apply(&wakeup_intent(self.endpoint, self.tab_id));
        let message = WorkerMessage::new(
            self.endpoint,
            Message::WorkerWakeup {
                tab_id: self.tab_id,
            },
        );
        let response = match self.host.request(message).await {
            Ok(response) => response,
            Err(err) => {
                self.stale = true;
                return Err(err.into());
            }
        };
        match response {
            Response::Success {
                payload: ResponsePayload::Wakeup { state, buffered },
            } => {
                self.worker = state.clone();
                for message in buffered {
                    self.receive(message);
                }
                self.stale = false;
                self.apply(&wakeup_success(self.endpoint, self.tab_id));
                Ok(state)
            }
            Response::Error { error } => {
                self.stale = true;
                Err(ReplicaError::Rejected(error))
            }
            other => Err(ReplicaError::Unexpected(Box::new(other))),
        }
    }

    /// Unlocks a locked worker with the PIN.
    pub async fn unlock(&mut self, pin: &str) -> Result<(), ReplicaError> {
        let message = WorkerMessage::new(self.endpoint, Message::Unlock { pin: pin.to_string() });
        match self.host.request(message).await? {
            Response::Success { .. } => Ok(()),
            Response::Error { error } => Err(ReplicaError::Rejected(error)),
        }
    }
}
