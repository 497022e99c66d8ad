// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Session wire schema between the Pass worker and its UI replicas.
//!
//! Messages are CBOR-encoded inside checksummed packets (see [`wire`]).
//! Store actions travel as full [`Envelope`]s; the only worker state that
//! crosses the boundary is the [`WorkerState`] snapshot.

use pass_store::{ItemId, ShareId};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

pub use pass_store::{Endpoint, Envelope, Notification};

pub mod wire;

/// Default Unix socket path for the worker hub.
///
/// Prefers a per-user runtime dir (XDG_RUNTIME_DIR) and falls back to `/tmp`
/// when unavailable.
pub fn default_socket_path() -> PathBuf {
    let base = std::env::var_os("XDG_RUNTIME_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("/tmp"));
    base.join("pass-worker.sock")
}

/// Identity of one connected replica: `<endpoint>-<tabId>` or `<endpoint>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionKey {
    /// Context kind.
    pub endpoint: Endpoint,
    /// Browser tab, for per-tab contexts.
    pub tab_id: Option<u32>,
}

impl ConnectionKey {
    /// Key of a context without a tab.
    pub fn new(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            tab_id: None,
        }
    }

    /// Key of a per-tab context.
    pub fn for_tab(endpoint: Endpoint, tab_id: u32) -> Self {
        Self {
            endpoint,
            tab_id: Some(tab_id),
        }
    }

    /// Prefix match on the rendered key, so `content-script` selects every
    /// content script while `content-script-4` selects one frame.
    pub fn matches_prefix(&self, prefix: &str) -> bool {
        let key = self.to_string();
        key == prefix
            || key
                .strip_prefix(prefix)
                .is_some_and(|rest| rest.starts_with('-'))
    }
}

impl fmt::Display for ConnectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.tab_id {
            Some(tab_id) => write!(f, "{}-{tab_id}", self.endpoint),
            None => f.write_str(self.endpoint.as_str()),
        }
    }
}

/// Worker lifecycle status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerStatus {
    /// Nothing started yet.
    #[default]
    Idle,
    /// Resuming the session.
    Authorizing,
    /// Hydrating the store.
    Booting,
    /// Hydrating the store after a lock or restart.
    Resuming,
    /// Authorized and hydrated.
    Ready,
    /// No valid session.
    Unauthorized,
    /// Session exists but needs the PIN.
    Locked,
    /// Boot failed; needs user action.
    Error,
    /// Resume failed; needs user action.
    ResumingFailed,
}

impl WorkerStatus {
    /// A boot is running.
    pub fn is_booting(self) -> bool {
        matches!(
            self,
            WorkerStatus::Authorizing | WorkerStatus::Booting | WorkerStatus::Resuming
        )
    }

    /// A wakeup in this status starts a boot.
    pub fn needs_boot(self) -> bool {
        matches!(
            self,
            WorkerStatus::Idle | WorkerStatus::Error | WorkerStatus::ResumingFailed
        )
    }
}

impl fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WorkerStatus::Idle => "IDLE",
            WorkerStatus::Authorizing => "AUTHORIZING",
            WorkerStatus::Booting => "BOOTING",
            WorkerStatus::Resuming => "RESUMING",
            WorkerStatus::Ready => "READY",
            WorkerStatus::Unauthorized => "UNAUTHORIZED",
            WorkerStatus::Locked => "LOCKED",
            WorkerStatus::Error => "ERROR",
            WorkerStatus::ResumingFailed => "RESUMING_FAILED",
        };
        f.write_str(name)
    }
}

/// Status snapshot broadcast on every worker transition.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerState {
    /// A session is established.
    pub logged_in: bool,
    /// Lifecycle status.
    pub status: WorkerStatus,
    /// Session uid, when logged in.
    pub uid: Option<String>,
}

impl WorkerState {
    /// Signed out, no session.
    pub fn unauthorized() -> Self {
        Self {
            logged_in: false,
            status: WorkerStatus::Unauthorized,
            uid: None,
        }
    }
}

/// Kind of share-scope server signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ShareEventKind {
    /// Access to the share was lost.
    ShareDisabled,
    /// Items were deleted remotely.
    ItemsDeleted,
}

/// Share-scope signal forwarded to replicas for UI eviction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShareServerEvent {
    /// Signal kind.
    pub kind: ShareEventKind,
    /// Share.
    pub share_id: ShareId,
    /// Deleted items, for `ITEMS_DELETED`.
    #[serde(default)]
    pub item_ids: Vec<ItemId>,
}

/// Message type tag, one registry handler per tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageType {
    /// Replica handshake.
    WorkerWakeup,
    /// Proxied store action.
    StoreAction,
    /// Worker status broadcast.
    WorkerStatus,
    /// User-facing toast.
    Notification,
    /// Share-scope signal.
    ShareServerEvent,
    /// PIN unlock.
    Unlock,
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MessageType::WorkerWakeup => "WORKER_WAKEUP",
            MessageType::StoreAction => "STORE_ACTION",
            MessageType::WorkerStatus => "WORKER_STATUS",
            MessageType::Notification => "NOTIFICATION",
            MessageType::ShareServerEvent => "SHARE_SERVER_EVENT",
            MessageType::Unlock => "UNLOCK",
        };
        f.write_str(name)
    }
}

/// Message payloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Message {
    /// Replica handshake: returns the status snapshot and buffered messages.
    WorkerWakeup {
        /// Tab of the waking context.
        tab_id: Option<u32>,
    },
    /// Proxied action, replica to worker and worker to every replica.
    StoreAction {
        /// Action envelope.
        action: Envelope,
    },
    /// Worker status broadcast.
    WorkerStatus {
        /// Status snapshot.
        state: WorkerState,
    },
    /// User-facing toast.
    Notification(Notification),
    /// Share-scope signal.
    ShareServerEvent(ShareServerEvent),
    /// Unlocks a locked session.
    Unlock {
        /// PIN.
        pin: String,
    },
}

impl Message {
    /// Type tag.
    pub fn kind(&self) -> MessageType {
        match self {
            Message::WorkerWakeup { .. } => MessageType::WorkerWakeup,
            Message::StoreAction { .. } => MessageType::StoreAction,
            Message::WorkerStatus { .. } => MessageType::WorkerStatus,
            Message::Notification(_) => MessageType::Notification,
            Message::ShareServerEvent(_) => MessageType::ShareServerEvent,
            Message::Unlock { .. } => MessageType::Unlock,
        }
    }

    /// Wraps an envelope for broadcast.
    pub fn store_action(action: Envelope) -> Self {
        Message::StoreAction { action }
    }
}

/// Message as received by the worker, tagged with its origin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerMessage {
    /// Sending context.
    pub sender: Endpoint,
    /// Payload.
    pub message: Message,
}

impl WorkerMessage {
    /// Tags `message` with `sender`.
    pub fn new(sender: Endpoint, message: Message) -> Self {
        Self { sender, message }
    }
}

/// Successful response bodies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResponsePayload {
    /// Plain acknowledgement.
    Ack,
    /// Wakeup result.
    Wakeup {
        /// Worker status snapshot.
        state: WorkerState,
        /// Messages buffered while the replica was away, oldest first.
        buffered: Vec<Message>,
    },
}

/// Response envelope of a request frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Response {
    /// Handled.
    Success {
        /// Body.
        payload: ResponsePayload,
    },
    /// Rejected or failed.
    Error {
        /// Reason.
        error: String,
    },
}

impl Response {
    /// Plain acknowledgement.
    pub fn ack() -> Self {
        Response::Success {
            payload: ResponsePayload::Ack,
        }
    }

    /// Failure with a reason.
    pub fn error(error: impl Into<String>) -> Self {
        Response::Error {
            error: error.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_keys_render_and_prefix_match() {
        let frame = ConnectionKey::for_tab(Endpoint::ContentScript, 4);
        assert_eq!(frame.to_string(), "content-script-4");
        assert!(frame.matches_prefix("content-script"));
        assert!(frame.matches_prefix("content-script-4"));
        assert!(!frame.matches_prefix("content-script-41"));
        assert!(!ConnectionKey::new(Endpoint::Popup).matches_prefix("content-script"));
    }

    #[test]
    fn boot_predicates() {
        assert!(WorkerStatus::Idle.needs_boot());
        assert!(WorkerStatus::Error.needs_boot());
        assert!(!WorkerStatus::Ready.needs_boot());
        assert!(WorkerStatus::Resuming.is_booting());
        assert!(!WorkerStatus::Locked.is_booting());
    }
}
