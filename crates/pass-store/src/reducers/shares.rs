// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Shares (vaults) collection, keyed by share id.

use crate::action::{Action, Envelope};
use crate::model::{EventId, OptimisticId, Share, ShareId};
use crate::optimistic::{KeyedCollection, Matcher, MutationKind, MutationRef, Reduce};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Every share the user can access.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SharesState {
    /// Shares by id.
    pub by_id: BTreeMap<ShareId, Share>,
}

impl SharesState {
    /// Looks up a share.
    pub fn get(&self, share_id: &str) -> Option<&Share> {
        self.by_id.get(share_id)
    }

    /// Stores `share`, never moving its event cursor backwards.
    fn put(&mut self, mut share: Share) {
        if let Some(current) = self.by_id.get(&share.share_id) {
            share.event_id = current.event_id.advance(share.event_id);
        }
        self.by_id.insert(share.share_id.clone(), share);
    }

    fn advance(&mut self, share_id: &str, event_id: EventId) {
        if let Some(share) = self.by_id.get_mut(share_id) {
            share.event_id = share.event_id.advance(event_id);
        }
    }
}

impl Reduce<Envelope> for SharesState {
    fn reduce(&mut self, envelope: &Envelope) {
        match &envelope.action {
            Action::VaultCreationIntent {
                optimistic_id,
                content,
            } => self.put(Share {
                share_id: optimistic_id.clone(),
                vault_id: optimistic_id.clone(),
                content: content.clone(),
                event_id: EventId::default(),
                primary: false,
                owner: true,
            }),
            Action::VaultCreationSuccess {
                optimistic_id,
                share,
            } => {
                self.by_id.remove(optimistic_id);
                self.put(share.clone());
            }
            Action::VaultEditIntent { share_id, content } => {
                if let Some(share) = self.by_id.get_mut(share_id) {
                    share.content = content.clone();
                }
            }
            Action::VaultEditSuccess { share, .. } => self.put(share.clone()),
            Action::VaultDeleteIntent { share_id }
            | Action::VaultDeleteSuccess { share_id }
            | Action::ShareDisabled { share_id } => {
                self.by_id.remove(share_id);
            }
            Action::ShareEvent {
                share_id, event_id, ..
            } => self.advance(share_id, *event_id),
            Action::SyncSuccess { shares, .. } => {
                self.by_id
                    .retain(|share_id, _| shares.iter().any(|s| &s.share_id == share_id));
                for share in shares {
                    self.put(share.clone());
                }
            }
            _ => {}
        }
    }
}

impl KeyedCollection for SharesState {
    fn contains_key(&self, key: &str) -> bool {
        self.by_id.contains_key(key)
    }
}

fn correlation(envelope: &Envelope, share_id: &str) -> OptimisticId {
    envelope
        .meta
        .optimistic_id
        .clone()
        .unwrap_or_else(|| share_id.to_string())
}

fn creation_initiate(e: &Envelope) -> Option<MutationRef> {
    match &e.action {
        Action::VaultCreationIntent { optimistic_id, .. } => Some(MutationRef {
            id: optimistic_id.clone(),
            key: optimistic_id.clone(),
        }),
        _ => None,
    }
}

fn creation_commit(e: &Envelope) -> Option<OptimisticId> {
    match &e.action {
        Action::VaultCreationSuccess { optimistic_id, .. } => Some(optimistic_id.clone()),
        _ => None,
    }
}

fn creation_revert(e: &Envelope) -> Option<OptimisticId> {
    match &e.action {
        Action::VaultCreationFailure { optimistic_id, .. } => Some(optimistic_id.clone()),
        _ => None,
    }
}

fn edit_initiate(e: &Envelope) -> Option<MutationRef> {
    match &e.action {
        Action::VaultEditIntent { share_id, .. } => Some(MutationRef {
            id: correlation(e, share_id),
            key: share_id.clone(),
        }),
        _ => None,
    }
}

fn edit_commit(e: &Envelope) -> Option<OptimisticId> {
    match &e.action {
        Action::VaultEditSuccess { share_id, .. } => Some(correlation(e, share_id)),
        _ => None,
    }
}

fn edit_revert(e: &Envelope) -> Option<OptimisticId> {
    match &e.action {
        Action::VaultEditFailure { share_id, .. } => Some(correlation(e, share_id)),
        _ => None,
    }
}

fn delete_initiate(e: &Envelope) -> Option<MutationRef> {
    match &e.action {
        Action::VaultDeleteIntent { share_id } => Some(MutationRef {
            id: correlation(e, share_id),
            key: share_id.clone(),
        }),
        _ => None,
    }
}

fn delete_commit(e: &Envelope) -> Option<OptimisticId> {
    match &e.action {
        Action::VaultDeleteSuccess { share_id } => Some(correlation(e, share_id)),
        _ => None,
    }
}

fn delete_revert(e: &Envelope) -> Option<OptimisticId> {
    match &e.action {
        Action::VaultDeleteFailure { share_id, .. } => Some(correlation(e, share_id)),
        _ => None,
    }
}

/// Optimistic capabilities of the shares collection. Every vault mutation
/// rolls back as soon as it fails.
pub fn share_matchers() -> Vec<Matcher<Envelope>> {
    vec![
        Matcher::new(MutationKind::Create, creation_initiate)
            .commit(creation_commit)
            .revert(creation_revert),
        Matcher::new(MutationKind::Update, edit_initiate)
            .commit(edit_commit)
            .revert(edit_revert),
        Matcher::new(MutationKind::Delete, delete_initiate)
            .commit(delete_commit)
            .revert(delete_revert),
    ]
}
