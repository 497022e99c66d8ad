// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Request tracker: start/success/failure bookkeeping for named async
//! operations, independent of their payload.
//!
//! Entries are only ever written through the `meta.request` field of an
//! envelope (see [`crate::Envelope::with_request`]) and removed by
//! [`crate::Action::Acknowledge`]. Callers own id uniqueness.

use crate::action::{Action, Envelope};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Caller chosen request identifier.
pub type RequestId = String;

/// Lifecycle stage of a tracked request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    /// Operation dispatched, no outcome yet.
    Start,
    /// Operation completed.
    Success,
    /// Operation failed.
    Failure,
}

impl RequestStatus {
    /// Whether the operation has an outcome.
    pub fn is_terminal(self) -> bool {
        !matches!(self, RequestStatus::Start)
    }
}

/// `meta.request` payload carried by an envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestMeta {
    /// Request id.
    pub id: RequestId,
    /// Stage reported by this envelope.
    pub status: RequestStatus,
}

/// Stored request row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestEntry {
    /// Last reported stage.
    pub status: RequestStatus,
}

/// All tracked requests, keyed by id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestState {
    entries: HashMap<RequestId, RequestEntry>,
}

impl RequestState {
    /// Applies the request side of an envelope. A new `start` replaces any
    /// terminal row for the same id; there is never more than one row per id.
    pub fn reduce(&mut self, envelope: &Envelope) {
        if let Action::Acknowledge { request_id } = &envelope.action {
            self.entries.remove(request_id);
        }
        if let Some(request) = &envelope.meta.request {
            self.entries.insert(
                request.id.clone(),
                RequestEntry {
                    status: request.status,
                },
            );
        }
    }

    /// Looks up a request row.
    pub fn get(&self, id: &str) -> Option<&RequestEntry> {
        self.entries.get(id)
    }

    /// True iff the request was started and has no outcome yet.
    pub fn in_flight(&self, id: &str) -> bool {
        matches!(
            self.entries.get(id),
            Some(RequestEntry {
                status: RequestStatus::Start
            })
        )
    }

    /// Number of tracked rows.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no request is tracked.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Entity-scoped request id builders.
pub mod request_id {
    /// Edit of a vault's content.
    pub fn vault_edit(share_id: &str) -> String {
        format!("vault-edit-request-{share_id}")
    }

    /// Creation of a vault, scoped by its optimistic id.
    pub fn vault_create(optimistic_id: &str) -> String {
        format!("vault-create-request-{optimistic_id}")
    }

    /// Deletion of a vault.
    pub fn vault_delete(share_id: &str) -> String {
        format!("vault-delete-request-{share_id}")
    }

    /// Worker wakeup issued by a given endpoint (and tab, when any).
    pub fn wakeup(endpoint: &str, tab_id: Option<u32>) -> String {
        match tab_id {
            Some(tab_id) => format!("wakeup-{endpoint}-{tab_id}"),
            None => format!("wakeup-{endpoint}"),
        }
    }

    /// Settings update.
    pub fn settings_edit() -> String {
        "settings-edit-request".to_string()
    }

    /// Worker boot.
    pub fn boot() -> String {
        "boot".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::Envelope;

    fn tracked(id: &str, status: RequestStatus) -> Envelope {
        Envelope::new(Action::Boot).with_request(id, status)
    }

    #[test]
    fn start_overwrites_terminal_entry() {
        let mut state = RequestState::default();
        state.reduce(&tracked("r", RequestStatus::Failure));
        assert!(!state.in_flight("r"));

        state.reduce(&tracked("r", RequestStatus::Start));
        assert!(state.in_flight("r"));
        assert_eq!(state.len(), 1);

        state.reduce(&tracked("r", RequestStatus::Success));
        assert!(!state.in_flight("r"));
        assert_eq!(
            state.get("r").map(|e| e.status),
            Some(RequestStatus::Success)
        );
    }

    #[test]
    fn acknowledge_removes_entry() {
        let mut state = RequestState::default();
        state.reduce(&tracked("r", RequestStatus::Failure));
        state.reduce(&Envelope::new(Action::Acknowledge {
            request_id: "r".into(),
        }));
        assert!(state.get("r").is_none());
        assert!(state.is_empty());
    }

    #[test]
    fn ids_are_entity_scoped() {
        assert_ne!(request_id::vault_edit("a"), request_id::vault_edit("b"));
        assert_eq!(
            request_id::wakeup("content-script", Some(4)),
            "wakeup-content-script-4"
        );
        assert_eq!(request_id::wakeup("popup", None), "wakeup-popup");
    }
}
